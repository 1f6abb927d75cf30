//! Run deadline and stop requests for the orchestration loop.
//!
//! The deadline timer runs in its own task, independent of the loop. When
//! it fires it runs the deadline hook (stopping log capture) and, depending
//! on the [`DeadlinePolicy`], asks the loop to stop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chaos_core::config::DeadlinePolicy;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    /// Finish the step in flight, then exit.
    Drain,
    /// Cancel the step in flight and exit.
    Abort,
}

pub type StopReceiver = watch::Receiver<Option<StopRequest>>;

/// Sending half of the stop channel. Cloned into every task that may end
/// the run.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<Option<StopRequest>>>,
}

pub fn stop_channel() -> (StopHandle, StopReceiver) {
    let (tx, rx) = watch::channel(None);
    (StopHandle { tx: Arc::new(tx) }, rx)
}

impl StopHandle {
    /// Records a stop request. An abort is never downgraded to a drain.
    pub fn request(&self, request: StopRequest) {
        self.tx.send_if_modified(|current| match (*current, request) {
            (Some(StopRequest::Abort), _) => false,
            (Some(StopRequest::Drain), StopRequest::Drain) => false,
            _ => {
                *current = Some(request);
                true
            }
        });
    }
}

pub fn policy_request(policy: DeadlinePolicy) -> Option<StopRequest> {
    match policy {
        DeadlinePolicy::Detach => None,
        DeadlinePolicy::Drain => Some(StopRequest::Drain),
        DeadlinePolicy::Abort => Some(StopRequest::Abort),
    }
}

/// Spawns the deadline timer. `on_deadline` runs exactly once, when the
/// duration elapses.
pub fn spawn_deadline<F, Fut>(
    duration: Duration,
    policy: DeadlinePolicy,
    stop: StopHandle,
    on_deadline: F,
) -> JoinHandle<()>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        tracing::info!(policy = %policy, "Stopping execution");
        on_deadline().await;

        match policy_request(policy) {
            Some(request) => stop.request(request),
            None => tracing::info!("deadline reached; the test loop keeps running until interrupted"),
        }
    })
}

/// Aborts the run on Ctrl-C.
pub fn spawn_interrupt_listener(stop: StopHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("interrupt received; stopping");
                stop.request(StopRequest::Abort);
            }
            Err(err) => tracing::warn!(error = %err, "unable to listen for interrupts"),
        }
    })
}
