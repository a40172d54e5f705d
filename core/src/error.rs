use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeErr>;

/// Errors surfaced by the supervisor API itself. Configuration loading has
/// its own [`crate::ConfigError`].
///
/// Child-process anomalies are never reported through this type; they are
/// folded into the job's terminal state and error code instead.
#[derive(Debug, Error)]
pub enum BridgeErr {
    #[error("invalid job request: {reason}")]
    InvalidRequest { reason: String },
    #[error("job id {job_id} is already active")]
    DuplicateJob { job_id: String },
    #[error("supervision of job {job_id} ended without a result")]
    SupervisionAborted { job_id: String },
}

impl BridgeErr {
    pub(crate) fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}
