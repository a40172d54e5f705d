use engine_bridge_protocol::ErrorCode;
use engine_bridge_protocol::JobTransition;
use tokio::sync::mpsc;
use tracing::info;

/// Receives every transition of every job.
///
/// Called inline from the supervision task, so implementations must not
/// block. Per job, calls arrive in order: `queued`, `running`, progress,
/// then one terminal transition.
pub trait EventSink: Send + Sync {
    fn on_transition(&self, transition: JobTransition);
}

impl<F> EventSink for F
where
    F: Fn(JobTransition) + Send + Sync,
{
    fn on_transition(&self, transition: JobTransition) {
        self(transition);
    }
}

/// Forwards transitions into an unbounded channel. A dropped receiver is
/// ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<JobTransition>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<JobTransition>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<JobTransition>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn on_transition(&self, transition: JobTransition) {
        let _ = self.tx.send(transition);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn on_transition(&self, _transition: JobTransition) {}
}

/// Logs each transition through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_transition(&self, transition: JobTransition) {
        let JobTransition {
            job_id,
            state,
            progress,
            error_code,
        } = transition;
        match progress {
            Some(event) => info!(
                job_id = %job_id,
                %state,
                kind = %event.kind,
                stage = event.stage.as_deref(),
                progress = event.progress,
                message = event.message.as_deref(),
                "engine progress"
            ),
            None => info!(
                job_id = %job_id,
                %state,
                error_code = error_code.as_ref().map(ErrorCode::as_str),
                "job transition"
            ),
        }
    }
}
