//! Double-buffered front for the metric store.
//!
//! Recording locks only the active buffer for the duration of one
//! hash-map update; a harvest drain swaps the active index and
//! consumes the retired buffer. A recorder that raced the swap lands
//! in exactly one of the two buffers and is drained in exactly one
//! cycle.

use crate::errors;
use crate::metrics::{MetricData, MetricId, MetricSnapshot, MetricStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub struct DoubleBufferedAggregator {
    buffers: [Arc<Mutex<MetricStore>>; 2],
    active_index: AtomicUsize,
}

impl DoubleBufferedAggregator {
    pub fn new(max_entries: usize) -> Result<Self, errors::Creation> {
        Ok(Self {
            buffers: [
                Arc::new(Mutex::new(MetricStore::new(max_entries)?)),
                Arc::new(Mutex::new(MetricStore::new(max_entries)?)),
            ],
            active_index: AtomicUsize::new(0),
        })
    }

    pub fn insert(&self, id: MetricId, data: MetricData) -> Result<(), errors::Insert> {
        let index = self.active_index.load(Ordering::Acquire);
        let buffer = &self.buffers[index];

        #[allow(clippy::expect_used)]
        let mut store = buffer.lock().expect("lock poisoned");
        store.insert(id, data)
    }

    /// Merge a batch of partial aggregates under a single lock
    /// acquisition, so a finished transaction's table lands in one
    /// buffer as a unit.
    pub fn merge_entries(&self, entries: impl IntoIterator<Item = (MetricId, MetricData)>) {
        let index = self.active_index.load(Ordering::Acquire);
        let buffer = &self.buffers[index];

        #[allow(clippy::expect_used)]
        let mut store = buffer.lock().expect("lock poisoned");
        store.merge_entries(entries);
    }

    pub fn note_dropped(&self, count: u64) {
        if count == 0 {
            return;
        }
        let index = self.active_index.load(Ordering::Acquire);

        #[allow(clippy::expect_used)]
        let mut store = self.buffers[index].lock().expect("lock poisoned");
        store.note_dropped(count);
    }

    pub fn flush(&self) -> MetricSnapshot {
        let old_index = self.active_index.load(Ordering::Acquire);
        let new_index = 1 - old_index;

        self.active_index.store(new_index, Ordering::Release);

        std::thread::yield_now();

        let flush_buffer = &self.buffers[old_index];

        #[allow(clippy::expect_used)]
        let mut store = flush_buffer.lock().expect("lock poisoned");
        store.consume()
    }

    #[cfg(test)]
    pub fn active_len(&self) -> usize {
        let index = self.active_index.load(Ordering::Acquire);
        self.buffers[index].lock().unwrap().len()
    }

    #[cfg(test)]
    pub fn inactive_len(&self) -> usize {
        let index = self.active_index.load(Ordering::Acquire);
        self.buffers[1 - index].lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(ms: u64) -> MetricData {
        MetricData::from_sample(Duration::from_millis(ms), Duration::from_millis(ms))
    }

    #[test]
    fn test_double_buffer_switching() {
        let aggregator = DoubleBufferedAggregator::new(100).unwrap();

        aggregator.insert(MetricId::rollup("test1"), sample(1)).unwrap();
        assert_eq!(aggregator.active_len(), 1);

        let snapshot = aggregator.flush();
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(aggregator.inactive_len(), 0);

        aggregator.insert(MetricId::rollup("test2"), sample(2)).unwrap();
        assert_eq!(aggregator.active_len(), 1);
    }

    #[test]
    fn test_concurrent_insert_and_flush_conserves_samples() {
        use std::thread;
        use std::time::Duration as StdDuration;

        let aggregator = Arc::new(DoubleBufferedAggregator::new(1000).unwrap());

        let insert_aggregator = Arc::clone(&aggregator);
        let insert_handle = thread::spawn(move || {
            for i in 0..200 {
                insert_aggregator
                    .insert(MetricId::rollup(format!("metric{i}")), sample(1))
                    .expect("insert failed");
                thread::sleep(StdDuration::from_micros(10));
            }
        });

        let flush_aggregator = Arc::clone(&aggregator);
        let flush_handle = thread::spawn(move || {
            let mut total_flushed = 0;
            for _ in 0..5 {
                thread::sleep(StdDuration::from_millis(2));
                total_flushed += flush_aggregator.flush().entries.len();
            }
            total_flushed
        });

        insert_handle.join().unwrap();
        let total_flushed = flush_handle.join().unwrap();

        let final_count = aggregator.flush().entries.len();
        assert_eq!(total_flushed + final_count, 200);
    }

    #[test]
    fn test_concurrent_same_key_counts_every_call() {
        use std::thread;

        let aggregator = Arc::new(DoubleBufferedAggregator::new(10).unwrap());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let aggregator = Arc::clone(&aggregator);
            handles.push(thread::spawn(move || {
                for _ in 0..250 {
                    aggregator
                        .insert(MetricId::rollup("shared"), sample(1))
                        .expect("insert failed");
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = aggregator.flush();
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].1.call_count, 1000);
        assert_eq!(snapshot.entries[0].1.total_time, Duration::from_secs(1));
    }
}
