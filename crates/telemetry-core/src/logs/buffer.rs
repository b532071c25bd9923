//! Double-buffered, capped log event buffer.
//!
//! Same swap discipline as the metric aggregator: recording locks the
//! active buffer only, the harvest drain retires it. Retention on
//! overflow is oldest-kept: once a cycle's cap is reached new events
//! are dropped and counted, never surfaced to the caller.

use crate::logs::LogEvent;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Events drained from the buffer in one swap, plus the number of
/// events dropped on overflow during the window.
#[derive(Debug, Default)]
pub struct LogSnapshot {
    pub events: Vec<LogEvent>,
    pub dropped: u64,
}

impl LogSnapshot {
    pub fn merge(&mut self, other: LogSnapshot) {
        self.events.extend(other.events);
        self.dropped += other.dropped;
    }
}

#[derive(Debug)]
struct LogStore {
    events: Vec<LogEvent>,
    max_events: usize,
    dropped: u64,
}

impl LogStore {
    fn new(max_events: usize) -> Self {
        Self {
            events: Vec::new(),
            max_events,
            dropped: 0,
        }
    }

    fn record(&mut self, event: LogEvent) {
        if self.events.len() >= self.max_events {
            self.dropped += 1;
            return;
        }
        self.events.push(event);
    }

    fn consume(&mut self) -> LogSnapshot {
        LogSnapshot {
            events: std::mem::take(&mut self.events),
            dropped: std::mem::take(&mut self.dropped),
        }
    }
}

pub struct LogEventBuffer {
    buffers: [Arc<Mutex<LogStore>>; 2],
    active_index: AtomicUsize,
}

impl LogEventBuffer {
    pub fn new(max_events: usize) -> Self {
        Self {
            buffers: [
                Arc::new(Mutex::new(LogStore::new(max_events))),
                Arc::new(Mutex::new(LogStore::new(max_events))),
            ],
            active_index: AtomicUsize::new(0),
        }
    }

    pub fn record(&self, event: LogEvent) {
        let index = self.active_index.load(Ordering::Acquire);

        #[allow(clippy::expect_used)]
        let mut store = self.buffers[index].lock().expect("lock poisoned");
        store.record(event);
    }

    /// Move a finished transaction's buffered events in under a single
    /// lock acquisition, carrying its transaction-scope drop count.
    pub fn extend(&self, events: impl IntoIterator<Item = LogEvent>, already_dropped: u64) {
        let index = self.active_index.load(Ordering::Acquire);

        #[allow(clippy::expect_used)]
        let mut store = self.buffers[index].lock().expect("lock poisoned");
        store.dropped += already_dropped;
        for event in events {
            store.record(event);
        }
    }

    pub fn flush(&self) -> LogSnapshot {
        let old_index = self.active_index.load(Ordering::Acquire);
        let new_index = 1 - old_index;

        self.active_index.store(new_index, Ordering::Release);

        std::thread::yield_now();

        #[allow(clippy::expect_used)]
        let mut store = self.buffers[old_index].lock().expect("lock poisoned");
        let snapshot = store.consume();
        if snapshot.dropped > 0 {
            debug!(
                "log buffer dropped {} events over the harvest cap this cycle",
                snapshot.dropped
            );
        }
        snapshot
    }
}
