//! Liveness watchdog.
//!
//! Runs as its own task and never touches the connection. Each check either
//! asks the supervisor for a keep-alive probe (traffic was seen since the
//! last check) or reports a timeout once and stops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};

use crate::client::Control;

/// Set by the read path on every inbound line, cleared by each check.
#[derive(Debug, Default)]
pub(crate) struct Activity(AtomicBool);

impl Activity {
    pub(crate) fn touch(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub(crate) fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Handle on a running watchdog task. Dropping it cancels the task.
pub(crate) struct Watchdog {
    task: JoinHandle<()>,
}

impl Watchdog {
    /// Start checking every `period`, tagging signals with `generation` so
    /// the supervisor can ignore ones from a previous connection.
    pub(crate) fn arm(
        period: Duration,
        generation: u64,
        activity: Arc<Activity>,
        control: mpsc::Sender<Control>,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if activity.take() {
                    if control.send(Control::KeepAlive { generation }).await.is_err() {
                        break;
                    }
                } else {
                    tracing::warn!(generation, "No traffic since last liveness check");
                    let _ = control.send(Control::LivenessTimeout { generation }).await;
                    break;
                }
            }
        });
        tracing::debug!(generation, period_secs = period.as_secs_f64(), "Watchdog armed");
        Self { task }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arm(activity: &Arc<Activity>) -> (Watchdog, mpsc::Receiver<Control>) {
        let (tx, rx) = mpsc::channel(8);
        let dog = Watchdog::arm(Duration::from_secs(150), 7, Arc::clone(activity), tx);
        (dog, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn silence_times_out_once() {
        let activity = Arc::new(Activity::default());
        let (_dog, mut rx) = arm(&activity);

        let start = Instant::now();
        assert!(matches!(rx.recv().await, Some(Control::LivenessTimeout { generation: 7 })));
        assert!(start.elapsed() >= Duration::from_secs(150));
        // The task exits after reporting, closing the channel.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn traffic_requests_keepalive() {
        let activity = Arc::new(Activity::default());
        activity.touch();
        let (_dog, mut rx) = arm(&activity);

        assert!(matches!(rx.recv().await, Some(Control::KeepAlive { generation: 7 })));
        activity.touch();
        assert!(matches!(rx.recv().await, Some(Control::KeepAlive { .. })));
        assert!(matches!(rx.recv().await, Some(Control::LivenessTimeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_cancels() {
        let activity = Arc::new(Activity::default());
        let (dog, mut rx) = arm(&activity);
        drop(dog);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(rx.recv().await.is_none());
    }
}
