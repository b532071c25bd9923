//! Bounded (name, scope) -> statistics table for one harvest window.

use crate::errors;
use crate::metrics::{MetricData, MetricId};
use fnv::FnvHashMap;

/// Everything drained from a [`MetricStore`] in one swap: the
/// accumulated entries plus the number of samples dropped on overflow
/// during the window.
#[derive(Debug, Default)]
pub struct MetricSnapshot {
    pub entries: Vec<(MetricId, MetricData)>,
    pub dropped: u64,
}

impl MetricSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.dropped == 0
    }

    /// Fold another snapshot into this one, merging duplicate keys.
    pub fn merge(&mut self, other: MetricSnapshot) {
        if self.entries.is_empty() {
            self.entries = other.entries;
        } else {
            let mut table: FnvHashMap<MetricId, MetricData> =
                self.entries.drain(..).collect();
            for (id, data) in other.entries {
                table.entry(id).or_default().merge(&data);
            }
            self.entries = table.into_iter().collect();
        }
        self.dropped += other.dropped;
    }
}

/// Mutable accumulation table, bounded by the configured per-cycle
/// `metric_data` limit. Existing keys always accept new samples; only
/// brand-new keys past the limit are dropped (and counted).
#[derive(Debug)]
pub struct MetricStore {
    entries: FnvHashMap<MetricId, MetricData>,
    max_entries: usize,
    dropped: u64,
}

impl MetricStore {
    pub fn new(max_entries: usize) -> Result<Self, errors::Creation> {
        if max_entries == 0 {
            return Err(errors::Creation::ZeroCapacity);
        }
        Ok(Self {
            entries: FnvHashMap::default(),
            max_entries,
            dropped: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record one sample under the given identity.
    pub fn insert(
        &mut self,
        id: MetricId,
        data: MetricData,
    ) -> Result<(), errors::Insert> {
        if id.name.is_empty() {
            return Err(errors::Insert::EmptyName);
        }
        if !self.entries.contains_key(&id) && self.entries.len() >= self.max_entries {
            self.dropped += 1;
            return Err(errors::Insert::Overflow(self.max_entries));
        }
        self.entries.entry(id).or_default().merge(&data);
        Ok(())
    }

    /// Merge a batch of partial aggregates, e.g. a finished
    /// transaction's scoped table. Overflow is counted, not surfaced.
    pub fn merge_entries(&mut self, entries: impl IntoIterator<Item = (MetricId, MetricData)>) {
        for (id, data) in entries {
            let _ = self.insert(id, data);
        }
    }

    /// Account for samples dropped elsewhere (e.g. inside a finished
    /// transaction's own table) so they surface at the next drain.
    pub fn note_dropped(&mut self, count: u64) {
        self.dropped += count;
    }

    /// Drain the table, leaving it empty for the next window.
    pub fn consume(&mut self) -> MetricSnapshot {
        MetricSnapshot {
            entries: self.entries.drain().collect(),
            dropped: std::mem::take(&mut self.dropped),
        }
    }

    pub fn get(&self, id: &MetricId) -> Option<&MetricData> {
        self.entries.get(id)
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
    fn test_insert_and_consume() {
        let mut store = MetricStore::new(10).unwrap();
        store.insert(MetricId::rollup("a"), sample(10)).unwrap();
        store.insert(MetricId::rollup("a"), sample(20)).unwrap();
        store.insert(MetricId::rollup("b"), sample(5)).unwrap();

        let snapshot = store.consume();
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.dropped, 0);
        assert!(store.is_empty());

        let a = snapshot
            .entries
            .iter()
            .find(|(id, _)| id.name == "a")
            .map(|(_, data)| data)
            .unwrap();
        assert_eq!(a.call_count, 2);
        assert_eq!(a.total_time, Duration::from_millis(30));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(
            MetricStore::new(0).unwrap_err(),
            crate::errors::Creation::ZeroCapacity
        );
    }

    #[test]
    fn test_overflow_counts_drops_but_keeps_existing_keys() {
        let mut store = MetricStore::new(2).unwrap();
        store.insert(MetricId::rollup("a"), sample(1)).unwrap();
        store.insert(MetricId::rollup("b"), sample(1)).unwrap();

        // New key past the limit is dropped.
        assert!(store.insert(MetricId::rollup("c"), sample(1)).is_err());
        // Existing key still accumulates.
        store.insert(MetricId::rollup("a"), sample(1)).unwrap();

        let snapshot = store.consume();
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.dropped, 1);
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut store = MetricStore::new(2).unwrap();
        assert_eq!(
            store.insert(MetricId::rollup(""), sample(1)).unwrap_err(),
            crate::errors::Insert::EmptyName
        );
    }

    #[test]
    fn test_consume_resets_drop_counter() {
        let mut store = MetricStore::new(1).unwrap();
        store.insert(MetricId::rollup("a"), sample(1)).unwrap();
        let _ = store.insert(MetricId::rollup("b"), sample(1));
        assert_eq!(store.consume().dropped, 1);
        assert_eq!(store.consume().dropped, 0);
    }

    #[test]
    fn test_snapshot_merge_combines_duplicates() {
        let mut first = MetricStore::new(10).unwrap();
        first.insert(MetricId::rollup("a"), sample(10)).unwrap();
        let mut second = MetricStore::new(10).unwrap();
        second.insert(MetricId::rollup("a"), sample(30)).unwrap();
        second.insert(MetricId::rollup("b"), sample(1)).unwrap();

        let mut snapshot = first.consume();
        snapshot.merge(second.consume());

        assert_eq!(snapshot.entries.len(), 2);
        let a = snapshot
            .entries
            .iter()
            .find(|(id, _)| id.name == "a")
            .map(|(_, data)| data)
            .unwrap();
        assert_eq!(a.call_count, 2);
        assert_eq!(a.total_time, Duration::from_millis(40));
    }
}
