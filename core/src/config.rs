//! Bridge configuration, loaded from TOML and adjusted by CLI overrides.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use engine_bridge_protocol::Backend;
use engine_bridge_protocol::ParseMethod;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

const DEFAULT_ENGINE_PROGRAM: &str = "python3";
const DEFAULT_ENGINE_MODULE: &str = "mineru.cli.desktop_engine";
const DEFAULT_KILL_GRACE_MS: u64 = 500;
const MIN_KILL_GRACE_MS: u64 = 50;
const MAX_KILL_GRACE_MS: u64 = 10_000;
const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 1_000;
const MAX_DRAIN_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Program spawned for every job.
    pub engine_program: PathBuf,
    /// Arguments placed before the contract flags.
    pub engine_args: Vec<String>,
    /// Backend passed when the request leaves it unset. The bridge always
    /// passes one, whatever the engine's own default happens to be.
    pub default_backend: Backend,
    pub default_method: ParseMethod,
    /// Escalation window between SIGTERM and SIGKILL.
    pub kill_grace_ms: u64,
    /// How long to keep reading stdout after the engine has exited.
    pub drain_timeout_ms: u64,
    /// Extra environment for the engine (`MINERU_DEVICE_MODE`, ...).
    pub env: BTreeMap<String, String>,
    pub inherit_stderr: bool,
    /// Linux only: deliver SIGTERM to the engine if the bridge dies.
    pub parent_death_signal: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            engine_program: PathBuf::from(DEFAULT_ENGINE_PROGRAM),
            engine_args: vec!["-m".to_string(), DEFAULT_ENGINE_MODULE.to_string()],
            default_backend: Backend::Pipeline,
            default_method: ParseMethod::Auto,
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            env: BTreeMap::new(),
            inherit_stderr: false,
            parent_death_signal: true,
        }
    }
}

/// Values supplied on the command line; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub engine_program: Option<PathBuf>,
    pub engine_args: Option<Vec<String>>,
    pub default_backend: Option<Backend>,
    pub default_method: Option<ParseMethod>,
    pub kill_grace_ms: Option<u64>,
    pub inherit_stderr: Option<bool>,
}

impl BridgeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads `path` when given (defaults otherwise) and applies `overrides`.
    pub fn load_with_overrides(
        path: Option<&Path>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(overrides);
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        let ConfigOverrides {
            engine_program,
            engine_args,
            default_backend,
            default_method,
            kill_grace_ms,
            inherit_stderr,
        } = overrides;

        if let Some(program) = engine_program {
            self.engine_program = program;
        }
        if let Some(args) = engine_args {
            self.engine_args = args;
        }
        if let Some(backend) = default_backend {
            self.default_backend = backend;
        }
        if let Some(method) = default_method {
            self.default_method = method;
        }
        if let Some(grace) = kill_grace_ms {
            self.kill_grace_ms = grace;
        }
        if let Some(inherit) = inherit_stderr {
            self.inherit_stderr = inherit;
        }
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(
            self.kill_grace_ms
                .clamp(MIN_KILL_GRACE_MS, MAX_KILL_GRACE_MS),
        )
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms.min(MAX_DRAIN_TIMEOUT_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bridge.toml");
        std::fs::write(
            &path,
            r#"
engine_program = "/opt/mineru/bin/engine"
default_backend = "hybrid-auto-engine"
kill_grace_ms = 250

[env]
MINERU_DEVICE_MODE = "cpu"
"#,
        )
        .expect("write config");

        let config = BridgeConfig::load(&path).expect("load config");
        assert_eq!(config.engine_program, PathBuf::from("/opt/mineru/bin/engine"));
        assert_eq!(config.default_backend, Backend::HybridAutoEngine);
        assert_eq!(config.default_method, ParseMethod::Auto);
        assert_eq!(config.kill_grace(), Duration::from_millis(250));
        assert_eq!(
            config.env.get("MINERU_DEVICE_MODE").map(String::as_str),
            Some("cpu")
        );
        assert_eq!(config.engine_args, BridgeConfig::default().engine_args);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "grace = 10\n").expect("write config");

        let err = BridgeConfig::load(&path).expect_err("unknown key must fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempdir().expect("tempdir");
        let err = BridgeConfig::load(&dir.path().join("absent.toml"))
            .expect_err("missing file must fail");
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn overrides_win_and_grace_is_clamped() {
        let config = BridgeConfig::load_with_overrides(
            None,
            ConfigOverrides {
                engine_program: Some(PathBuf::from("/bin/sh")),
                engine_args: Some(vec!["engine.sh".to_string()]),
                kill_grace_ms: Some(1),
                ..Default::default()
            },
        )
        .expect("defaults never fail");

        assert_eq!(config.engine_program, PathBuf::from("/bin/sh"));
        assert_eq!(config.engine_args, vec!["engine.sh".to_string()]);
        assert_eq!(config.kill_grace(), Duration::from_millis(MIN_KILL_GRACE_MS));
    }
}
