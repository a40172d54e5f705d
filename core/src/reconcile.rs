//! Folds exit evidence into exactly one terminal state.
//!
//! The bridge's own intent (a cancel it requested, a timeout it fired) is
//! trusted over anything the engine reports, and the engine's manifest is
//! trusted over its raw exit code.

use std::io;
use std::path::Path;

use engine_bridge_protocol::ErrorCode;
use engine_bridge_protocol::JobState;
use engine_bridge_protocol::MANIFEST_FILE_NAME;
use engine_bridge_protocol::ManifestStatus;
use engine_bridge_protocol::ResultManifest;
use engine_bridge_protocol::exit_code;
use tracing::debug;

/// What the supervisor observed about one finished engine run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitEvidence {
    /// `None` when the engine died on a signal or never started.
    pub exit_code: Option<i32>,
    /// The engine could not be spawned or waited on.
    pub process_error: bool,
    pub cancel_requested: bool,
    pub timed_out: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub state: JobState,
    pub error_code: Option<ErrorCode>,
}

impl Outcome {
    fn succeeded() -> Self {
        Self {
            state: JobState::Succeeded,
            error_code: None,
        }
    }

    fn cancelled(code: ErrorCode) -> Self {
        Self {
            state: JobState::Cancelled,
            error_code: Some(code),
        }
    }

    fn failed(code: ErrorCode) -> Self {
        Self {
            state: JobState::Failed,
            error_code: Some(code),
        }
    }
}

pub fn reconcile(evidence: &ExitEvidence, manifest: Option<&ResultManifest>) -> Outcome {
    let manifest_status = manifest.map(|m| m.status);
    let manifest_code = manifest.and_then(|m| m.error_code.clone());

    if !evidence.cancel_requested
        && !evidence.timed_out
        && !evidence.process_error
        && evidence.exit_code == Some(exit_code::SUCCEEDED)
        && manifest_status == Some(ManifestStatus::Succeeded)
    {
        return Outcome::succeeded();
    }

    if evidence.cancel_requested {
        return Outcome::cancelled(ErrorCode::Cancelled);
    }

    if evidence.timed_out {
        return Outcome::failed(ErrorCode::Timeout);
    }

    if evidence.exit_code == Some(exit_code::CANCELLED)
        || manifest_status == Some(ManifestStatus::Cancelled)
    {
        return Outcome::cancelled(manifest_code.unwrap_or(ErrorCode::Cancelled));
    }

    let code = match manifest_code {
        Some(code) => code,
        None if evidence.process_error => ErrorCode::EngineFailed,
        None => ErrorCode::from_exit_code(evidence.exit_code),
    };
    Outcome::failed(code)
}

/// Reads `result.json` from `output_dir`. A missing or unparsable manifest is
/// not an error: the engine may have crashed before writing it.
pub async fn read_manifest(output_dir: &Path) -> Option<ResultManifest> {
    let path = output_dir.join(MANIFEST_FILE_NAME);
    let raw = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "engine left no manifest");
            return None;
        }
        Err(err) => {
            debug!(path = %path.display(), error = %err, "failed to read engine manifest");
            return None;
        }
    };
    match serde_json::from_slice::<ResultManifest>(&raw) {
        Ok(manifest) => Some(manifest),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "ignoring malformed engine manifest");
            None
        }
    }
}
