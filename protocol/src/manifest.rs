use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::ErrorCode;
use crate::lenient;

/// Name of the manifest the engine writes into its output directory.
pub const MANIFEST_FILE_NAME: &str = "result.json";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ManifestStatus {
    Succeeded,
    Failed,
    Cancelled,
    Timeout,
}

/// The engine's own account of how the run went. Evidence, not state: the
/// bridge reads it once after exit and never writes it.
///
/// Only `status` has to be well-formed; a malformed optional field reads as
/// absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultManifest {
    pub status: ManifestStatus,
    #[serde(default, deserialize_with = "lenient::optional")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, deserialize_with = "lenient::optional")]
    pub output_dir: Option<PathBuf>,
    /// Artifact category (`markdown`, `contentList`, ...) to produced files.
    #[serde(default, deserialize_with = "lenient::artifacts")]
    pub artifacts: BTreeMap<String, Vec<PathBuf>>,
    #[serde(default, deserialize_with = "lenient::optional")]
    pub engine_version: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional")]
    pub backend: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional")]
    pub method: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional")]
    pub timings: Option<ManifestTimings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestTimings {
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::optional")]
    pub duration_ms: Option<u64>,
}

impl ResultManifest {
    pub fn new(status: ManifestStatus, error_code: Option<ErrorCode>) -> Self {
        Self {
            status,
            error_code,
            output_dir: None,
            artifacts: BTreeMap::new(),
            engine_version: None,
            backend: None,
            method: None,
            timings: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_full_engine_manifest() {
        let raw = r#"{
          "status": "succeeded",
          "errorCode": null,
          "outputDir": "/tmp/out",
          "artifacts": {
            "markdown": ["/tmp/out/doc/auto/doc.md"],
            "contentList": [],
            "middleJson": [],
            "modelJson": []
          },
          "engineVersion": "2.5.4",
          "backend": "pipeline",
          "method": "auto",
          "timings": {
            "startedAt": "2025-03-01T10:00:00.000Z",
            "endedAt": "2025-03-01T10:00:03.500Z",
            "durationMs": 3500
          }
        }"#;
        let manifest: ResultManifest = serde_json::from_str(raw).expect("parse manifest");
        assert_eq!(manifest.status, ManifestStatus::Succeeded);
        assert_eq!(manifest.error_code, None);
        assert_eq!(
            manifest.artifacts.get("markdown"),
            Some(&vec![PathBuf::from("/tmp/out/doc/auto/doc.md")])
        );
        assert_eq!(
            manifest.timings.and_then(|timings| timings.duration_ms),
            Some(3500)
        );
    }

    #[test]
    fn status_is_the_only_required_field() {
        let manifest: ResultManifest =
            serde_json::from_str(r#"{"status":"timeout","errorCode":"E_TIMEOUT"}"#)
                .expect("parse manifest");
        assert_eq!(
            manifest,
            ResultManifest::new(ManifestStatus::Timeout, Some(ErrorCode::Timeout))
        );

        assert!(serde_json::from_str::<ResultManifest>(r#"{"errorCode":null}"#).is_err());
        assert!(serde_json::from_str::<ResultManifest>(r#"{"status":"done"}"#).is_err());
    }

    #[test]
    fn cosmetic_deviations_do_not_reject_the_manifest() {
        let raw = r#"{
          "status": "succeeded",
          "errorCode": 17,
          "outputDir": 42,
          "artifacts": null,
          "engineVersion": 2.5,
          "timings": {
            "startedAt": "2025-03-01 10:00:00",
            "endedAt": "soon",
            "durationMs": -3
          }
        }"#;
        let manifest: ResultManifest = serde_json::from_str(raw).expect("parse manifest");
        assert_eq!(manifest.status, ManifestStatus::Succeeded);
        assert_eq!(manifest.error_code, None);
        assert_eq!(manifest.output_dir, None);
        assert!(manifest.artifacts.is_empty());
        assert_eq!(manifest.engine_version, None);

        let timings = manifest.timings.expect("timings");
        assert_eq!(
            timings.started_at.map(|ts| ts.to_rfc3339()),
            Some("2025-03-01T10:00:00+00:00".to_string())
        );
        assert_eq!(timings.ended_at, None);
        assert_eq!(timings.duration_ms, None);
    }

    #[test]
    fn artifact_lists_keep_only_paths() {
        let manifest: ResultManifest = serde_json::from_str(
            r#"{"status":"failed","artifacts":{"markdown":["a.md",null,3],"images":"dir"}}"#,
        )
        .expect("parse manifest");
        assert_eq!(
            manifest.artifacts,
            BTreeMap::from([("markdown".to_string(), vec![PathBuf::from("a.md")])])
        );
    }
}
