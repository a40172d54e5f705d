use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::ArgAction;
use clap::Parser;
use engine_bridge_core::BridgeConfig;
use engine_bridge_core::ConfigOverrides;
use engine_bridge_core::ErrorCode;
use engine_bridge_core::EventSink;
use engine_bridge_core::JobRequest;
use engine_bridge_core::JobResult;
use engine_bridge_core::JobState;
use engine_bridge_core::JobTransition;
use engine_bridge_core::Supervisor;
use engine_bridge_core::protocol::Backend;
use engine_bridge_core::protocol::ModelSource;
use engine_bridge_core::protocol::ParseMethod;
use engine_bridge_core::protocol::exit_code;
use tracing::warn;

/// Run one conversion job and stream its transitions as JSON lines.
#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Document to convert.
    #[arg(long = "input", value_name = "PATH")]
    pub input: PathBuf,
    /// Directory the engine writes its artifacts and `result.json` into.
    #[arg(long = "output", value_name = "DIR")]
    pub output: PathBuf,
    /// Job id (a UUID is generated when omitted).
    #[arg(long = "job-id", value_name = "ID")]
    pub job_id: Option<String>,
    #[arg(long = "backend", value_name = "BACKEND")]
    pub backend: Option<Backend>,
    #[arg(long = "method", value_name = "METHOD")]
    pub method: Option<ParseMethod>,
    #[arg(long = "lang", value_name = "LANG")]
    pub lang: Option<String>,
    /// First page to parse (0-based).
    #[arg(long = "start", value_name = "N")]
    pub start: Option<u32>,
    #[arg(long = "end", value_name = "N")]
    pub end: Option<u32>,
    #[arg(long = "timeout-ms", value_name = "MS")]
    pub timeout_ms: Option<u64>,
    #[arg(long = "formula", value_name = "BOOL", action = ArgAction::Set)]
    pub formula: Option<bool>,
    #[arg(long = "table", value_name = "BOOL", action = ArgAction::Set)]
    pub table: Option<bool>,
    #[arg(long = "device", value_name = "DEVICE")]
    pub device: Option<String>,
    /// Virtual VRAM budget in GB.
    #[arg(long = "vram", value_name = "GB")]
    pub vram: Option<u32>,
    #[arg(long = "source", value_name = "SOURCE")]
    pub source: Option<ModelSource>,
    /// Server URL for the http-client backends.
    #[arg(long = "url", value_name = "URL")]
    pub url: Option<String>,

    /// Bridge configuration file (TOML).
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Engine program, overriding the configured one.
    #[arg(long = "engine", value_name = "PROGRAM")]
    pub engine: Option<PathBuf>,
    /// Engine argument placed before the contract flags. Repeatable; replaces
    /// the configured arguments.
    #[arg(long = "engine-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,
    #[arg(long = "kill-grace-ms", value_name = "MS")]
    pub kill_grace_ms: Option<u64>,
    /// Forward the engine's stderr to ours.
    #[arg(long = "inherit-stderr")]
    pub inherit_stderr: bool,
}

impl RunArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            engine_program: self.engine.clone(),
            engine_args: (!self.engine_args.is_empty()).then(|| self.engine_args.clone()),
            default_backend: None,
            default_method: None,
            kill_grace_ms: self.kill_grace_ms,
            inherit_stderr: self.inherit_stderr.then_some(true),
        }
    }

    pub fn request(&self) -> JobRequest {
        JobRequest {
            job_id: self.job_id.clone(),
            backend: self.backend,
            method: self.method,
            lang: self.lang.clone(),
            start_page: self.start,
            end_page: self.end,
            timeout: self.timeout_ms.map(Duration::from_millis),
            formula: self.formula,
            table: self.table,
            device: self.device.clone(),
            vram: self.vram,
            model_source: self.source,
            server_url: self.url.clone(),
            ..JobRequest::new(&self.input, &self.output)
        }
    }
}

/// Writes each transition to stdout as one JSON line.
struct JsonlStdoutSink;

impl EventSink for JsonlStdoutSink {
    fn on_transition(&self, transition: JobTransition) {
        match serde_json::to_string(&transition) {
            Ok(line) => {
                let mut stdout = std::io::stdout().lock();
                if let Err(err) = writeln!(stdout, "{line}").and_then(|()| stdout.flush()) {
                    warn!(error = %err, "failed to write transition to stdout");
                }
            }
            Err(err) => warn!(error = %err, "failed to encode transition"),
        }
    }
}

/// Runs the job to completion and returns the process exit code.
pub async fn run(args: RunArgs) -> Result<i32> {
    let config = BridgeConfig::load_with_overrides(args.config.as_deref(), args.overrides())?;
    let supervisor = Supervisor::new(config, Arc::new(JsonlStdoutSink));

    let handle = supervisor.run(args.request())?;
    let job_id = handle.job_id.clone();
    let completion = handle.completion;
    tokio::pin!(completion);

    let result = tokio::select! {
        result = &mut completion => result?,
        interrupt = tokio::signal::ctrl_c() => {
            interrupt.context("failed to listen for Ctrl-C")?;
            warn!(job_id = %job_id, "interrupted; cancelling job");
            supervisor.cancel(&job_id);
            completion.await?
        }
    };

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, &result).context("failed to write job result")?;
    writeln!(stdout)?;
    stdout.flush()?;

    Ok(process_exit_code(&result))
}

/// Maps a settled job onto the engine's exit-code contract.
pub fn process_exit_code(result: &JobResult) -> i32 {
    match result.state {
        JobState::Succeeded => exit_code::SUCCEEDED,
        JobState::Cancelled => exit_code::CANCELLED,
        JobState::Queued | JobState::Running | JobState::Failed => result
            .error_code
            .as_ref()
            .map_or(exit_code::ENGINE_FAILED, ErrorCode::contract_exit_code),
    }
}
