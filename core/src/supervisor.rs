use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use engine_bridge_protocol::ErrorCode;
use engine_bridge_protocol::JobResult;
use engine_bridge_protocol::JobState;
use engine_bridge_protocol::JobTransition;
use engine_bridge_protocol::ProgressEvent;
use futures::future::join_all;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::process::ChildStdout;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::sleep_until;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::command::EngineCommand;
use crate::config::BridgeConfig;
use crate::error::BridgeErr;
use crate::error::Result;
use crate::jsonl::JsonlDecoder;
use crate::reconcile::ExitEvidence;
use crate::reconcile::read_manifest;
use crate::reconcile::reconcile;
use crate::request::JobRequest;
use crate::sink::EventSink;
use crate::terminator::Terminator;

const READ_CHUNK_BYTES: usize = 8192;

/// Runs engine jobs and reports their lifecycle to an [`EventSink`].
///
/// Cheap to clone; clones share the same set of active jobs.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    config: BridgeConfig,
    sink: Arc<dyn EventSink>,
    terminator: Terminator,
    jobs: Mutex<HashMap<String, ActiveJob>>,
}

/// Entry in the active set. Only the job's own task settles it, once, and
/// removes the entry after the terminal event.
struct ActiveJob {
    commands: mpsc::UnboundedSender<JobCommand>,
    settled: watch::Receiver<bool>,
}

#[derive(Debug, Clone, Copy)]
enum JobCommand {
    Cancel,
}

/// Run state owned by the job's supervision task.
#[derive(Debug)]
struct JobRun {
    job_id: String,
    output_dir: PathBuf,
    timeout: Option<Duration>,
    started_at: Instant,
    deadline: Option<Instant>,
    cancel_requested: bool,
    timed_out: bool,
    running_emitted: bool,
}

impl JobRun {
    fn new(job_id: String, output_dir: PathBuf, timeout: Option<Duration>) -> Self {
        Self {
            job_id,
            output_dir,
            timeout,
            started_at: Instant::now(),
            deadline: None,
            cancel_requested: false,
            timed_out: false,
            running_emitted: false,
        }
    }

    /// Restarts the clock at spawn. The timeout watcher fires `grace` after
    /// the requested timeout.
    fn mark_spawned(&mut self, grace: Duration) {
        self.started_at = Instant::now();
        self.deadline = self
            .timeout
            .map(|timeout| self.started_at + timeout + grace);
    }
}

/// Termination in flight for one job: a terminator task when the pid is known,
/// otherwise the instant at which the child handle is force-killed.
#[derive(Debug, Default)]
struct Termination {
    task: Option<JoinHandle<()>>,
    force_at: Option<Instant>,
}

impl Termination {
    fn in_flight(&self) -> bool {
        self.force_at.is_some() || self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// How the engine process itself ended, before any reconciliation.
#[derive(Debug, Clone, Copy)]
struct ProcessExit {
    exit_code: Option<i32>,
    process_error: bool,
}

impl ProcessExit {
    fn error() -> Self {
        Self {
            exit_code: None,
            process_error: true,
        }
    }
}

/// A started job: its id and the future that resolves once it settles.
#[derive(Debug)]
pub struct JobHandle {
    pub job_id: String,
    pub completion: JobCompletion,
}

impl JobHandle {
    pub async fn wait(self) -> Result<JobResult> {
        self.completion.await
    }
}

/// Resolves exactly once with the job's [`JobResult`].
#[derive(Debug)]
pub struct JobCompletion {
    job_id: String,
    rx: oneshot::Receiver<JobResult>,
}

impl Future for JobCompletion {
    type Output = Result<JobResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(Ok(result)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(BridgeErr::SupervisionAborted {
                job_id: this.job_id.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Supervisor {
    pub fn new(config: BridgeConfig, sink: Arc<dyn EventSink>) -> Self {
        let terminator = Terminator::platform(config.kill_grace());
        Self::with_terminator(config, sink, terminator)
    }

    pub fn with_terminator(
        config: BridgeConfig,
        sink: Arc<dyn EventSink>,
        terminator: Terminator,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                sink,
                terminator,
                jobs: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Starts a job and returns immediately.
    ///
    /// `queued` is delivered to the sink before this returns. A failure to
    /// spawn the engine is not an error here; the job settles as `failed`.
    ///
    /// Must be called from within a tokio runtime. The engine is spawned by
    /// the job's runtime task, never on the calling thread, so the caller's
    /// thread may exit while the job runs.
    pub fn run(&self, request: JobRequest) -> Result<JobHandle> {
        request.validate()?;
        let job_id = request
            .job_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let command = EngineCommand::build(&self.inner.config, &job_id, &request);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (settled_tx, settled_rx) = watch::channel(false);
        let (result_tx, result_rx) = oneshot::channel();
        {
            let mut jobs = self.inner.lock_jobs();
            if jobs.contains_key(&job_id) {
                return Err(BridgeErr::DuplicateJob { job_id });
            }
            jobs.insert(
                job_id.clone(),
                ActiveJob {
                    commands: commands_tx,
                    settled: settled_rx,
                },
            );
        }
        self.inner
            .emit(JobTransition::state(job_id.as_str(), JobState::Queued));

        let run = JobRun::new(job_id.clone(), request.output_dir, request.timeout);
        tokio::spawn(Arc::clone(&self.inner).supervise(
            run,
            command,
            commands_rx,
            result_tx,
            settled_tx,
        ));

        Ok(JobHandle {
            job_id: job_id.clone(),
            completion: JobCompletion {
                job_id,
                rx: result_rx,
            },
        })
    }

    /// Requests cancellation. Returns false when the job is unknown or has
    /// already settled. The job settles only once the engine has exited.
    pub fn cancel(&self, job_id: &str) -> bool {
        let jobs = self.inner.lock_jobs();
        jobs.get(job_id)
            .is_some_and(|job| job.commands.send(JobCommand::Cancel).is_ok())
    }

    /// Ids of jobs that have not settled yet, sorted.
    pub fn active_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock_jobs().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        self.inner.lock_jobs().contains_key(job_id)
    }

    /// Cancels every active job and waits until all of them have settled.
    pub async fn shutdown(&self) {
        let pending: Vec<(String, watch::Receiver<bool>)> = {
            let jobs = self.inner.lock_jobs();
            jobs.iter()
                .map(|(job_id, job)| {
                    let _ = job.commands.send(JobCommand::Cancel);
                    (job_id.clone(), job.settled.clone())
                })
                .collect()
        };
        if !pending.is_empty() {
            info!(jobs = pending.len(), "shutting down active engine jobs");
        }
        join_all(pending.into_iter().map(|(job_id, mut settled)| async move {
            if settled.wait_for(|settled| *settled).await.is_err() {
                warn!(job_id = %job_id, "job task ended without settling");
            }
        }))
        .await;
    }
}

impl SupervisorInner {
    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<String, ActiveJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, transition: JobTransition) {
        self.sink.on_transition(transition);
    }

    async fn supervise(
        self: Arc<Self>,
        mut run: JobRun,
        command: EngineCommand,
        mut commands: mpsc::UnboundedReceiver<JobCommand>,
        result_tx: oneshot::Sender<JobResult>,
        settled_tx: watch::Sender<bool>,
    ) {
        debug!(
            job_id = %run.job_id,
            program = ?command.program(),
            args = ?command.args(),
            "spawning engine"
        );
        // The parent-death signal is tied to the forking thread, so the fork
        // has to happen on a runtime worker rather than in `run`.
        let spawned = command.spawn(&self.config);
        run.mark_spawned(self.terminator.grace());
        let exit = match spawned {
            Ok(child) => {
                let pid = child.id();
                self.drive(&mut run, child, pid, &mut commands).await
            }
            Err(err) => {
                warn!(job_id = %run.job_id, error = %err, "failed to spawn engine");
                ProcessExit::error()
            }
        };
        self.settle(run, exit, commands, result_tx, settled_tx)
            .await;
    }

    /// Pumps stdout and commands until the engine exits. `pid` is `None` when
    /// the child can only be reached through its handle.
    async fn drive(
        &self,
        run: &mut JobRun,
        mut child: Child,
        pid: Option<u32>,
        commands: &mut mpsc::UnboundedReceiver<JobCommand>,
    ) -> ProcessExit {
        let mut stdout = child.stdout.take();
        let mut decoder = JsonlDecoder::new();
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        let mut termination = Termination::default();
        let timeout = sleep_until(run.deadline.unwrap_or_else(Instant::now));
        tokio::pin!(timeout);

        let status = loop {
            tokio::select! {
                biased;
                Some(command) = commands.recv() => match command {
                    JobCommand::Cancel => {
                        if !run.cancel_requested {
                            info!(job_id = %run.job_id, "cancel requested");
                            run.cancel_requested = true;
                        }
                        self.request_termination(&run.job_id, pid, &mut termination);
                    }
                },
                () = &mut timeout, if run.deadline.is_some() && !run.timed_out => {
                    warn!(job_id = %run.job_id, "engine exceeded its timeout");
                    run.timed_out = true;
                    self.request_termination(&run.job_id, pid, &mut termination);
                }
                () = sleep_until(termination.force_at.unwrap_or_else(Instant::now)),
                    if termination.force_at.is_some() =>
                {
                    termination.force_at = None;
                    if matches!(child.try_wait(), Ok(None)) {
                        warn!(job_id = %run.job_id, "engine outlived the grace window; killing it");
                        if let Err(err) = child.start_kill() {
                            warn!(job_id = %run.job_id, error = %err, "failed to kill engine");
                        }
                    }
                }
                read = read_chunk(stdout.as_mut(), &mut buf), if stdout.is_some() => match read {
                    Ok(0) => stdout = None,
                    Ok(n) => self.on_stdout(run, &mut decoder, &buf[..n]),
                    Err(err) => {
                        warn!(job_id = %run.job_id, error = %err, "failed to read engine stdout");
                        stdout = None;
                    }
                },
                status = child.wait() => break status,
            }
        };

        if let Some(handle) = termination.task.take() {
            handle.abort();
        }
        // Kill anything the engine left behind before draining, so stray
        // grandchildren cannot hold the pipe open.
        if let Some(pid) = pid {
            self.terminator.sweep(pid);
        }
        if let Some(stdout) = stdout.as_mut() {
            let drain = async {
                loop {
                    match stdout.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => self.on_stdout(run, &mut decoder, &buf[..n]),
                        Err(err) => {
                            debug!(job_id = %run.job_id, error = %err, "stdout drain ended");
                            break;
                        }
                    }
                }
            };
            if tokio::time::timeout(self.config.drain_timeout(), drain)
                .await
                .is_err()
            {
                warn!(job_id = %run.job_id, "engine stdout stayed open after exit");
            }
        }
        if let Some(event) = decoder.finish() {
            self.on_progress(run, event);
        }

        match status {
            Ok(status) => ProcessExit {
                exit_code: status.code(),
                process_error: false,
            },
            Err(err) => {
                warn!(job_id = %run.job_id, error = %err, "failed to wait for engine");
                ProcessExit::error()
            }
        }
    }

    /// Starts the terminator unless a previous run of it is still in flight.
    ///
    /// Without a pid no signal can reach the engine, so the grace window is
    /// armed directly and the handle is force-killed once it elapses.
    fn request_termination(&self, job_id: &str, pid: Option<u32>, termination: &mut Termination) {
        if termination.in_flight() {
            debug!(job_id, "termination already in progress");
            return;
        }
        match pid {
            Some(pid) => {
                let terminator = self.terminator.clone();
                termination.task = Some(tokio::spawn(async move {
                    terminator.terminate(pid).await;
                }));
            }
            None => {
                debug!(job_id, "engine pid unknown; escalating through its handle");
                termination.force_at = Some(Instant::now() + self.terminator.grace());
            }
        }
    }

    fn on_stdout(&self, run: &mut JobRun, decoder: &mut JsonlDecoder, chunk: &[u8]) {
        if !run.running_emitted {
            run.running_emitted = true;
            self.emit(JobTransition::state(run.job_id.as_str(), JobState::Running));
        }
        for event in decoder.push(chunk) {
            self.on_progress(run, event);
        }
    }

    fn on_progress(&self, run: &JobRun, event: ProgressEvent) {
        self.emit(JobTransition::progress(run.job_id.as_str(), event));
    }

    async fn settle(
        &self,
        mut run: JobRun,
        exit: ProcessExit,
        mut commands: mpsc::UnboundedReceiver<JobCommand>,
        result_tx: oneshot::Sender<JobResult>,
        settled_tx: watch::Sender<bool>,
    ) {
        // From here on `cancel` reports the job as settled. Cancels accepted
        // before the close still count.
        commands.close();
        while let Ok(JobCommand::Cancel) = commands.try_recv() {
            run.cancel_requested = true;
        }

        // A stale manifest from an earlier run must not speak for an engine
        // that never started.
        let manifest = if exit.process_error && !run.running_emitted {
            None
        } else {
            read_manifest(&run.output_dir).await
        };
        let evidence = ExitEvidence {
            exit_code: exit.exit_code,
            process_error: exit.process_error,
            cancel_requested: run.cancel_requested,
            timed_out: run.timed_out,
        };
        let outcome = reconcile(&evidence, manifest.as_ref());
        let elapsed_ms = u64::try_from(run.started_at.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            job_id = %run.job_id,
            state = %outcome.state,
            exit_code = exit.exit_code,
            error_code = outcome.error_code.as_ref().map(ErrorCode::as_str),
            cancel_requested = run.cancel_requested,
            timed_out = run.timed_out,
            elapsed_ms,
            "engine job settled"
        );
        self.emit(JobTransition::terminal(
            run.job_id.as_str(),
            outcome.state,
            outcome.error_code.clone(),
        ));
        // Removed only after the terminal event, so a rerun of the same id
        // cannot deliver its `queued` ahead of it.
        self.lock_jobs().remove(&run.job_id);

        let result = JobResult {
            job_id: run.job_id,
            state: outcome.state,
            exit_code: exit.exit_code,
            error_code: outcome.error_code,
            manifest,
            cancel_requested: run.cancel_requested,
            timed_out: run.timed_out,
            elapsed_ms,
        };
        let _ = result_tx.send(result);
        let _ = settled_tx.send(true);
    }
}

async fn read_chunk(stdout: Option<&mut ChildStdout>, buf: &mut [u8]) -> io::Result<usize> {
    match stdout {
        Some(stdout) => stdout.read(buf).await,
        None => std::future::pending().await,
    }
}
