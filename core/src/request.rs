use std::path::PathBuf;
use std::time::Duration;

use engine_bridge_protocol::Backend;
use engine_bridge_protocol::ModelSource;
use engine_bridge_protocol::ParseMethod;

use crate::error::BridgeErr;
use crate::error::Result;

/// Everything a caller can ask of one engine run. Optional fields left as
/// `None` are not passed to the engine at all, except `backend` and `method`
/// which fall back to the configured contract defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobRequest {
    /// Caller-chosen id; a UUID is generated when absent.
    pub job_id: Option<String>,
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub backend: Option<Backend>,
    pub method: Option<ParseMethod>,
    pub lang: Option<String>,
    pub start_page: Option<u32>,
    pub end_page: Option<u32>,
    pub timeout: Option<Duration>,
    pub formula: Option<bool>,
    pub table: Option<bool>,
    pub device: Option<String>,
    /// Virtual VRAM budget in GB.
    pub vram: Option<u32>,
    pub model_source: Option<ModelSource>,
    pub server_url: Option<String>,
}

impl JobRequest {
    pub fn new(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.input.as_os_str().is_empty() {
            return Err(BridgeErr::invalid_request("input path is empty"));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(BridgeErr::invalid_request("output directory is empty"));
        }
        if let Some(job_id) = &self.job_id
            && job_id.trim().is_empty()
        {
            return Err(BridgeErr::invalid_request("job id is blank"));
        }
        if self.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(BridgeErr::invalid_request("timeout must be positive"));
        }
        if let (Some(start), Some(end)) = (self.start_page, self.end_page)
            && start > end
        {
            return Err(BridgeErr::invalid_request(format!(
                "start page {start} is after end page {end}"
            )));
        }
        Ok(())
    }
}
