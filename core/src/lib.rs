//! Supervision engine for the external document conversion process.
//!
//! A [`Supervisor`] spawns the engine with a deterministic command line,
//! decodes its JSONL progress stream, enforces timeouts, terminates the whole
//! process tree on cancellation and reconciles exit code, `result.json` and
//! local intent into exactly one terminal [`JobState`] per job.

// Prevent accidental direct writes to stdout/stderr in library code. The CLI
// owns stdout for its JSONL transition stream.
#![deny(clippy::print_stdout, clippy::print_stderr)]

mod command;
pub mod config;
mod error;
pub mod jsonl;
#[cfg(target_os = "linux")]
mod process_death;
pub mod reconcile;
mod request;
mod sink;
mod supervisor;
pub mod terminator;

pub use command::EngineCommand;
pub use config::BridgeConfig;
pub use config::ConfigError;
pub use config::ConfigOverrides;
pub use error::BridgeErr;
pub use error::Result;
pub use jsonl::JsonlDecoder;
pub use reconcile::ExitEvidence;
pub use reconcile::Outcome;
pub use reconcile::read_manifest;
pub use reconcile::reconcile;
pub use request::JobRequest;
pub use sink::ChannelSink;
pub use sink::EventSink;
pub use sink::NoopSink;
pub use sink::TracingSink;
pub use supervisor::JobCompletion;
pub use supervisor::JobHandle;
pub use supervisor::Supervisor;
pub use terminator::Escalation;
pub use terminator::KillStrategy;
pub use terminator::Terminator;

pub use engine_bridge_protocol as protocol;
pub use engine_bridge_protocol::ErrorCode;
pub use engine_bridge_protocol::JobResult;
pub use engine_bridge_protocol::JobState;
pub use engine_bridge_protocol::JobTransition;
