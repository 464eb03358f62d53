//! Progress reporter abstraction for the installer (§4.E).

use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Start { task_id: String, step: &'static str },
    Running { task_id: String, step: &'static str, percent: u8, message: String },
    Complete { task_id: String, step: &'static str },
    Failed { task_id: String, step: &'static str, error: String },
    Skipped { task_id: String, step: &'static str, reason: String },
}

#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, event: ProgressEvent);
}

/// Discards every event. Used when no external observer is attached.
pub struct NoopProgressReporter;

#[async_trait]
impl ProgressReporter for NoopProgressReporter {
    async fn report(&self, _event: ProgressEvent) {}
}

/// Forwards events onto an `mpsc` channel for an external observer (the
/// control plane's installer command handler, or a test harness).
pub struct ChannelProgressReporter {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelProgressReporter {
    #[must_use]
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ProgressReporter for ChannelProgressReporter {
    async fn report(&self, event: ProgressEvent) {
        // A full or closed channel means nobody is listening; dropping the
        // event here is preferable to blocking the installer on it.
        let _ = self.tx.try_send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_reporter_forwards_events() {
        let (tx, mut rx) = mpsc::channel(4);
        let reporter = ChannelProgressReporter::new(tx);
        reporter.report(ProgressEvent::Start { task_id: "t1".into(), step: "download" }).await;
        match rx.recv().await.unwrap() {
            ProgressEvent::Start { task_id, step } => {
                assert_eq!(task_id, "t1");
                assert_eq!(step, "download");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
