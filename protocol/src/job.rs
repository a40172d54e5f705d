use serde::Deserialize;
use serde::Serialize;

use crate::ErrorCode;
use crate::ProgressEvent;
use crate::ResultManifest;

/// Lifecycle of a supervised job.
///
/// `Queued -> Running -> {Succeeded, Failed, Cancelled}`; a job may also go
/// straight from `Queued` to `Failed` when the engine cannot be spawned.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// One message delivered to an event sink: either a state transition or a
/// progress line (`state == Running` with `progress` set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTransition {
    pub job_id: String,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl JobTransition {
    pub fn state(job_id: impl Into<String>, state: JobState) -> Self {
        Self {
            job_id: job_id.into(),
            state,
            progress: None,
            error_code: None,
        }
    }

    pub fn progress(job_id: impl Into<String>, event: ProgressEvent) -> Self {
        Self {
            job_id: job_id.into(),
            state: JobState::Running,
            progress: Some(event),
            error_code: None,
        }
    }

    pub fn terminal(
        job_id: impl Into<String>,
        state: JobState,
        error_code: Option<ErrorCode>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            state,
            progress: None,
            error_code,
        }
    }
}

/// Final, immutable outcome of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub job_id: String,
    pub state: JobState,
    /// Raw exit code; `None` when the engine never started or died on a signal.
    pub exit_code: Option<i32>,
    pub error_code: Option<ErrorCode>,
    pub manifest: Option<ResultManifest>,
    pub cancel_requested: bool,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}
