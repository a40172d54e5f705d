use serde::Deserialize;
use serde::Serialize;
use std::fmt;

use crate::exit_code;

/// Stable, locale-independent error codes carried by every non-successful
/// terminal state.
///
/// Codes the bridge does not know about (for example a newer engine reporting
/// a new failure class in its manifest) are preserved verbatim in
/// [`ErrorCode::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "E_ENGINE_FAILED")]
    EngineFailed,
    #[serde(rename = "E_INVALID_INPUT")]
    InvalidInput,
    #[serde(rename = "E_OUTPUT_UNWRITABLE")]
    OutputUnwritable,
    #[serde(rename = "E_CANCELLED")]
    Cancelled,
    #[serde(rename = "E_TIMEOUT")]
    Timeout,
    #[serde(untagged)]
    Other(String),
}

impl ErrorCode {
    /// Maps a raw engine exit code through the contract table. Signal exits
    /// (no numeric code) and unmapped codes become [`ErrorCode::EngineFailed`].
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(exit_code::INVALID_INPUT) => Self::InvalidInput,
            Some(exit_code::OUTPUT_UNWRITABLE) => Self::OutputUnwritable,
            Some(exit_code::CANCELLED) => Self::Cancelled,
            Some(exit_code::TIMEOUT) => Self::Timeout,
            _ => Self::EngineFailed,
        }
    }

    /// Inverse of [`ErrorCode::from_exit_code`], used when the bridge itself
    /// has to exit with a contract code.
    pub fn contract_exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput => exit_code::INVALID_INPUT,
            Self::OutputUnwritable => exit_code::OUTPUT_UNWRITABLE,
            Self::Cancelled => exit_code::CANCELLED,
            Self::Timeout => exit_code::TIMEOUT,
            Self::EngineFailed | Self::Other(_) => exit_code::ENGINE_FAILED,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::EngineFailed => "E_ENGINE_FAILED",
            Self::InvalidInput => "E_INVALID_INPUT",
            Self::OutputUnwritable => "E_OUTPUT_UNWRITABLE",
            Self::Cancelled => "E_CANCELLED",
            Self::Timeout => "E_TIMEOUT",
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
