use std::ffi::OsString;
use std::io;
use std::process::Stdio;

use tokio::process::Child;
use tokio::process::Command;

use crate::config::BridgeConfig;
use crate::request::JobRequest;

/// Fully resolved engine invocation for one job.
///
/// Arguments are laid out in a fixed order so the same request always yields
/// the same command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    program: OsString,
    args: Vec<OsString>,
}

impl EngineCommand {
    pub fn build(config: &BridgeConfig, job_id: &str, request: &JobRequest) -> Self {
        let mut args: Vec<OsString> = config.engine_args.iter().map(OsString::from).collect();

        push_flag(&mut args, "--input", request.input.as_os_str());
        push_flag(&mut args, "--output", request.output_dir.as_os_str());
        push_flag(&mut args, "--job-id", job_id);
        push_flag(
            &mut args,
            "--backend",
            request.backend.unwrap_or(config.default_backend).to_string(),
        );
        push_flag(
            &mut args,
            "--method",
            request.method.unwrap_or(config.default_method).to_string(),
        );

        if let Some(timeout) = request.timeout {
            push_flag(&mut args, "--timeout-ms", timeout.as_millis().to_string());
        }
        if let Some(lang) = &request.lang {
            push_flag(&mut args, "--lang", lang);
        }
        if let Some(start) = request.start_page {
            push_flag(&mut args, "--start", start.to_string());
        }
        if let Some(end) = request.end_page {
            push_flag(&mut args, "--end", end.to_string());
        }
        if let Some(formula) = request.formula {
            push_flag(&mut args, "--formula", formula.to_string());
        }
        if let Some(table) = request.table {
            push_flag(&mut args, "--table", table.to_string());
        }
        if let Some(device) = &request.device {
            push_flag(&mut args, "--device", device);
        }
        if let Some(vram) = request.vram {
            push_flag(&mut args, "--vram", vram.to_string());
        }
        if let Some(source) = request.model_source {
            push_flag(&mut args, "--source", source.to_string());
        }
        if let Some(url) = &request.server_url {
            push_flag(&mut args, "--url", url);
        }
        args.push(OsString::from("--jsonl"));

        Self {
            program: config.engine_program.clone().into_os_string(),
            args,
        }
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Spawns the engine with stdout piped and no stdin.
    ///
    /// On unix the child leads a fresh process group so the whole tree can be
    /// signalled at once.
    pub(crate) fn spawn(&self, config: &BridgeConfig) -> io::Result<Child> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(if config.inherit_stderr {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);

        #[cfg(target_os = "linux")]
        if config.parent_death_signal {
            let parent_pid = unsafe { libc::getpid() };
            unsafe {
                command.pre_exec(move || {
                    crate::process_death::set_parent_death(parent_pid);
                    Ok(())
                });
            }
        }

        command.spawn()
    }
}

fn push_flag(args: &mut Vec<OsString>, flag: &str, value: impl Into<OsString>) {
    args.push(OsString::from(flag));
    args.push(value.into());
}
