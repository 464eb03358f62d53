//! Event Reporter half of Component C (§4.C).
//!
//! Buffers `ProcessEvent`s while the connection is flagged disconnected
//! and flushes them in bounded batches on reconnect or explicit request.
//! Overflow policy is oldest-dropped FIFO eviction (§9 Design Notes).

use std::collections::VecDeque;
use std::sync::Arc;

use stfleet_events::ProcessEvent;
use tokio::sync::Mutex;

/// Sends a drained batch of events onward (to the command stream's write
/// side, in production; a `Vec`-collecting stub in tests).
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn send_batch(&self, events: Vec<ProcessEvent>);
}

struct State {
    buffer: VecDeque<ProcessEvent>,
    connected: bool,
    evicted: u64,
}

/// Buffers and flushes process events with bounded capacity and
/// oldest-dropped eviction.
pub struct EventReporter {
    state: Mutex<State>,
    capacity: usize,
    batch_size: usize,
    sink: Arc<dyn EventSink>,
}

impl EventReporter {
    #[must_use]
    pub fn new(capacity: usize, batch_size: usize, sink: Arc<dyn EventSink>) -> Self {
        Self {
            state: Mutex::new(State { buffer: VecDeque::new(), connected: true, evicted: 0 }),
            capacity,
            batch_size: batch_size.max(1),
            sink,
        }
    }

    /// Submits an event. When connected, flushes it immediately (as a
    /// single-item batch); when disconnected, buffers it, evicting the
    /// oldest entry first if at capacity.
    pub async fn submit(&self, event: ProcessEvent) {
        let mut guard = self.state.lock().await;
        if guard.connected {
            drop(guard);
            self.sink.send_batch(vec![event]).await;
            return;
        }

        if guard.buffer.len() >= self.capacity {
            guard.buffer.pop_front();
            guard.evicted += 1;
        }
        guard.buffer.push_back(event);
    }

    /// Flips the connected flag. A `false → true` edge triggers a flush of
    /// any buffered events.
    pub async fn set_connected(&self, connected: bool) {
        let was_connected = {
            let mut guard = self.state.lock().await;
            let was = guard.connected;
            guard.connected = connected;
            was
        };
        if connected && !was_connected {
            self.flush().await;
        }
    }

    /// Drains the buffer in `batch_size` chunks, in submission order,
    /// until empty.
    pub async fn flush(&self) {
        loop {
            let batch = {
                let mut guard = self.state.lock().await;
                if guard.buffer.is_empty() {
                    return;
                }
                let take = self.batch_size.min(guard.buffer.len());
                guard.buffer.drain(..take).collect::<Vec<_>>()
            };
            self.sink.send_batch(batch).await;
        }
    }

    #[must_use]
    pub async fn buffered_count(&self) -> usize {
        self.state.lock().await.buffer.len()
    }

    #[must_use]
    pub async fn evicted_count(&self) -> u64 {
        self.state.lock().await.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stfleet_events::ProcessEventType;
    use tokio::sync::Mutex as TokioMutex;

    struct CollectingSink {
        batches: TokioMutex<Vec<Vec<ProcessEvent>>>,
    }

    impl CollectingSink {
        fn new() -> Self {
            Self { batches: TokioMutex::new(Vec::new()) }
        }

        async fn flat(&self) -> Vec<ProcessEvent> {
            self.batches.lock().await.iter().flatten().cloned().collect()
        }
    }

    #[async_trait::async_trait]
    impl EventSink for CollectingSink {
        async fn send_batch(&self, events: Vec<ProcessEvent>) {
            self.batches.lock().await.push(events);
        }
    }

    fn event(name: &str) -> ProcessEvent {
        ProcessEvent::new(ProcessEventType::Started, name, Some(1))
    }

    #[tokio::test]
    async fn connected_submit_flushes_immediately() {
        let sink = Arc::new(CollectingSink::new());
        let reporter = EventReporter::new(10, 5, sink.clone());
        reporter.submit(event("a")).await;
        assert_eq!(sink.flat().await.len(), 1);
        assert_eq!(reporter.buffered_count().await, 0);
    }

    #[tokio::test]
    async fn disconnected_submit_buffers_until_reconnect_flush() {
        let sink = Arc::new(CollectingSink::new());
        let reporter = EventReporter::new(10, 5, sink.clone());
        reporter.set_connected(false).await;

        reporter.submit(event("a")).await;
        reporter.submit(event("b")).await;
        assert_eq!(sink.flat().await.len(), 0);
        assert_eq!(reporter.buffered_count().await, 2);

        reporter.set_connected(true).await;
        assert_eq!(sink.flat().await.len(), 2);
        assert_eq!(reporter.buffered_count().await, 0);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_first() {
        let sink = Arc::new(CollectingSink::new());
        let reporter = EventReporter::new(2, 5, sink.clone());
        reporter.set_connected(false).await;

        reporter.submit(event("a")).await;
        reporter.submit(event("b")).await;
        reporter.submit(event("c")).await;

        assert_eq!(reporter.buffered_count().await, 2);
        assert_eq!(reporter.evicted_count().await, 1);

        reporter.flush().await;
        let names: Vec<_> = sink.flat().await.iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn flush_respects_batch_size_and_drains_fully() {
        let sink = Arc::new(CollectingSink::new());
        let reporter = EventReporter::new(10, 2, sink.clone());
        reporter.set_connected(false).await;
        for name in ["a", "b", "c", "d", "e"] {
            reporter.submit(event(name)).await;
        }

        reporter.flush().await;
        assert_eq!(reporter.buffered_count().await, 0);
        let batches = sink.batches.lock().await;
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[2].len(), 1);
    }

    #[tokio::test]
    async fn explicit_flush_is_a_noop_on_empty_buffer() {
        let sink = Arc::new(CollectingSink::new());
        let reporter = EventReporter::new(10, 5, sink.clone());
        reporter.flush().await;
        assert!(sink.batches.lock().await.is_empty());
    }
}
