//! Shared helpers for engine-bridge integration tests: a scriptable fake
//! engine, a recording sink and process liveness probes.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use engine_bridge_core::BridgeConfig;
use engine_bridge_core::EventSink;
use engine_bridge_core::JobRequest;
use engine_bridge_core::JobState;
use engine_bridge_core::JobTransition;
use tempfile::TempDir;

/// Parses the contract flags and defines `emit` and `manifest` helpers for
/// the script body.
const PREAMBLE: &str = r#"set -u
OUT=""
JOB=""
ARGV="$*"
while [ $# -gt 0 ]; do
  case "$1" in
    --output) OUT="$2"; shift 2 ;;
    --job-id) JOB="$2"; shift 2 ;;
    *) shift ;;
  esac
done
mkdir -p "$OUT"
printf '%s\n' "$ARGV" > "$OUT/argv.txt"

emit() {
  printf '{"type":"%s","jobId":"%s","stage":"%s","progress":%s,"message":"%s"}\n' "$1" "$JOB" "$2" "$3" "$4"
}

manifest() {
  if [ -n "${2:-}" ]; then code="\"$2\""; else code=null; fi
  printf '{"status":"%s","errorCode":%s,"outputDir":"%s","backend":"pipeline","method":"auto"}\n' "$1" "$code" "$OUT" > "$OUT/result.json"
}
"#;

/// A POSIX shell script standing in for the conversion engine.
pub struct FakeEngine {
    dir: TempDir,
    script: PathBuf,
}

impl FakeEngine {
    pub fn new(body: &str) -> Self {
        let dir = TempDir::new().expect("fake engine tempdir");
        let script = dir.path().join("engine.sh");
        std::fs::write(&script, format!("{PREAMBLE}\n{body}\n")).expect("write engine script");
        std::fs::write(dir.path().join("input.pdf"), b"%PDF-1.7\n").expect("write input");
        Self { dir, script }
    }

    pub fn config(&self) -> BridgeConfig {
        BridgeConfig {
            engine_program: PathBuf::from("/bin/sh"),
            engine_args: vec![self.script.to_string_lossy().into_owned()],
            kill_grace_ms: 200,
            ..Default::default()
        }
    }

    pub fn request(&self) -> JobRequest {
        JobRequest::new(self.input(), self.output_dir())
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    /// Path inside the engine's output directory.
    pub fn output_file(&self, name: &str) -> PathBuf {
        self.output_dir().join(name)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    pub fn input(&self) -> PathBuf {
        self.dir.path().join("input.pdf")
    }
}

/// Records every transition in delivery order.
#[derive(Debug, Default)]
pub struct CaptureSink {
    transitions: Mutex<Vec<JobTransition>>,
}

impl CaptureSink {
    pub fn transitions(&self) -> Vec<JobTransition> {
        self.transitions.lock().expect("capture lock").clone()
    }

    pub fn for_job(&self, job_id: &str) -> Vec<JobTransition> {
        self.transitions()
            .into_iter()
            .filter(|t| t.job_id == job_id)
            .collect()
    }

    /// State transitions for `job_id`, ignoring progress records.
    pub fn states(&self, job_id: &str) -> Vec<JobState> {
        self.for_job(job_id)
            .into_iter()
            .filter(|t| t.progress.is_none())
            .map(|t| t.state)
            .collect()
    }

    pub fn progress_kinds(&self, job_id: &str) -> Vec<String> {
        self.for_job(job_id)
            .into_iter()
            .filter_map(|t| t.progress.map(|p| p.kind))
            .collect()
    }

    /// Polls until `job_id` has been seen in `state`.
    pub async fn wait_for_state(&self, job_id: &str, state: JobState, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.states(job_id).contains(&state) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {job_id} never reached {state}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl EventSink for CaptureSink {
    fn on_transition(&self, transition: JobTransition) {
        self.transitions
            .lock()
            .expect("capture lock")
            .push(transition);
    }
}

/// Reads a pid the fake engine wrote to `path`, waiting for it to appear.
pub async fn read_pid_file(path: &Path, timeout: Duration) -> u32 {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(raw) = std::fs::read_to_string(path)
            && let Ok(pid) = raw.trim().parse()
        {
            return pid;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "pid file {} never appeared",
            path.display()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// True while `pid` is a live, non-zombie process.
#[cfg(target_os = "linux")]
pub fn pid_alive(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // The state field follows the parenthesised command name.
    match stat.rfind(')').and_then(|idx| stat[idx + 1..].split_whitespace().next()) {
        Some(state) => state != "Z" && state != "X",
        None => false,
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Waits up to `timeout` for `pid` to die. Returns whether it did.
#[cfg(unix)]
pub async fn wait_until_dead(pid: u32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while pid_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    true
}
