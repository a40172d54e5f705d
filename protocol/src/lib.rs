//! Types shared between the engine bridge and its callers.
//!
//! Everything in here is plain data: the job state machine labels, the stable
//! error codes surfaced to the UI, the JSONL progress records emitted by the
//! conversion engine and the `result.json` manifest it leaves behind.

mod error_code;
mod job;
mod lenient;
mod manifest;
mod progress;
mod selectors;

pub use error_code::ErrorCode;
pub use job::JobResult;
pub use job::JobState;
pub use job::JobTransition;
pub use manifest::MANIFEST_FILE_NAME;
pub use manifest::ManifestStatus;
pub use manifest::ManifestTimings;
pub use manifest::ResultManifest;
pub use progress::ProgressEvent;
pub use selectors::Backend;
pub use selectors::ModelSource;
pub use selectors::ParseMethod;

/// Exit codes of the engine contract.
pub mod exit_code {
    pub const SUCCEEDED: i32 = 0;
    pub const ENGINE_FAILED: i32 = 1;
    pub const INVALID_INPUT: i32 = 2;
    pub const OUTPUT_UNWRITABLE: i32 = 3;
    pub const CANCELLED: i32 = 4;
    pub const TIMEOUT: i32 = 5;
}
