//! Transaction lifecycle: one monitored unit of work, owning its span
//! stack and scoped telemetry buffers until harvest.

use crate::config::AgentConfig;
use crate::logs::LogEvent;
use crate::metrics::{MetricData, MetricId, MetricStore};
use crate::span::{Outcome, SpanCategory, SpanNode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Pending,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Web,
    Background,
}

impl TransactionKind {
    pub fn metric_prefix(&self) -> &'static str {
        match self {
            Self::Web => "WebTransaction",
            Self::Background => "OtherTransaction",
        }
    }
}

/// A span that has been pushed but not yet popped. The parent link is
/// captured at push time so concurrent siblings may complete in any
/// order.
#[derive(Debug)]
struct OpenSpan {
    id: u64,
    parent: Option<u64>,
    name: String,
    category: SpanCategory,
    start: Duration,
    children: Vec<SpanNode>,
}

#[derive(Debug)]
struct TxnInner {
    name: String,
    state: TransactionState,
    open: Vec<OpenSpan>,
    roots: Vec<SpanNode>,
    metrics: MetricStore,
    log_events: Vec<LogEvent>,
    dropped_log_events: u64,
    custom_attributes: HashMap<String, String>,
}

/// One monitored unit of work. Immutable identity lives outside the
/// mutex; everything the unit mutates while running sits behind one
/// short-lived lock.
#[derive(Debug)]
pub struct Transaction {
    trace_id: String,
    priority: f32,
    kind: TransactionKind,
    started: Instant,
    start_timestamp_millis: i64,
    settings: Arc<AgentConfig>,
    inner: Mutex<TxnInner>,
}

/// The unit of work a transaction finalizes into when stopped. The
/// top-level spans form the transaction's trace; sequential
/// same-level operations yield one root each, so nesting is never
/// invented between spans that did not overlap. Scoped telemetry is
/// drained by the agent when the transaction is merged into the
/// application aggregates.
#[derive(Debug)]
pub struct FinishedTransaction {
    pub name: String,
    pub kind: TransactionKind,
    pub trace_id: String,
    pub priority: f32,
    pub duration: Duration,
    pub outcome: Outcome,
    pub roots: Vec<SpanNode>,
    pub(crate) metrics: Vec<(String, MetricData)>,
    pub(crate) dropped_metrics: u64,
    pub(crate) log_events: Vec<LogEvent>,
    pub(crate) dropped_log_events: u64,
}

impl FinishedTransaction {
    /// Metric name of the transaction itself, e.g.
    /// `WebTransaction/checkout`.
    pub fn transaction_metric_name(&self) -> String {
        format!("{}/{}", self.kind.metric_prefix(), self.name)
    }
}

fn random_nonzero_id() -> u64 {
    loop {
        let id: u64 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

#[derive(Clone, Debug)]
pub struct TransactionHandle {
    inner: Arc<Transaction>,
}

impl TransactionHandle {
    pub(crate) fn new(
        name: impl Into<String>,
        kind: TransactionKind,
        settings: Arc<AgentConfig>,
    ) -> Self {
        let metric_limit = settings.event_harvest_config.harvest_limits.metric_data;
        #[allow(clippy::expect_used)]
        let metrics = MetricStore::new(metric_limit.max(1)).expect("non-zero metric limit");
        Self {
            inner: Arc::new(Transaction {
                trace_id: format!(
                    "{:016x}{:016x}",
                    rand::random::<u64>(),
                    rand::random::<u64>()
                ),
                priority: rand::random::<f32>(),
                kind,
                started: Instant::now(),
                start_timestamp_millis: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0),
                settings,
                inner: Mutex::new(TxnInner {
                    name: name.into(),
                    state: TransactionState::Pending,
                    open: Vec::new(),
                    roots: Vec::new(),
                    metrics,
                    log_events: Vec::new(),
                    dropped_log_events: 0,
                    custom_attributes: HashMap::new(),
                }),
            }),
        }
    }

    pub(crate) fn start(&self) {
        let mut inner = self.lock();
        if inner.state == TransactionState::Pending {
            inner.state = TransactionState::Running;
        }
    }

    pub(crate) fn same_transaction(&self, other: &TransactionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, TxnInner> {
        self.inner.inner.lock().expect("lock poisoned")
    }

    pub fn trace_id(&self) -> &str {
        &self.inner.trace_id
    }

    pub fn priority(&self) -> f32 {
        self.inner.priority
    }

    pub fn kind(&self) -> TransactionKind {
        self.inner.kind
    }

    pub fn settings(&self) -> &Arc<AgentConfig> {
        &self.inner.settings
    }

    pub fn start_timestamp_millis(&self) -> i64 {
        self.inner.start_timestamp_millis
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn state(&self) -> TransactionState {
        self.lock().state
    }

    /// Rename the transaction. Frozen once stopped.
    pub fn set_name(&self, name: impl Into<String>) {
        let mut inner = self.lock();
        if inner.state == TransactionState::Stopped {
            return;
        }
        inner.name = name.into();
    }

    /// Attach a custom attribute. Frozen once stopped.
    pub fn add_custom_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut inner = self.lock();
        if inner.state == TransactionState::Stopped {
            return;
        }
        inner.custom_attributes.insert(key.into(), value.into());
    }

    pub fn custom_attributes(&self) -> HashMap<String, String> {
        self.lock().custom_attributes.clone()
    }

    /// Open a span under the current innermost open span. Returns the
    /// new span id, or `None` when the transaction is not running.
    pub(crate) fn start_span(&self, name: &str, category: SpanCategory) -> Option<u64> {
        let start = self.inner.started.elapsed();
        let mut inner = self.lock();
        if inner.state != TransactionState::Running {
            return None;
        }
        let id = random_nonzero_id();
        let parent = inner.open.last().map(|span| span.id);
        inner.open.push(OpenSpan {
            id,
            parent,
            name: name.to_string(),
            category,
            start,
            children: Vec::new(),
        });
        Some(id)
    }

    /// Finalize an open span wherever it sits in the stack. Unknown
    /// ids (already finalized by `stop`) are a no-op.
    pub(crate) fn finish_span(&self, span_id: u64, outcome: Outcome) {
        let end = self.inner.started.elapsed();
        let mut inner = self.lock();
        if inner.state == TransactionState::Stopped {
            return;
        }
        let Some(index) = inner.open.iter().position(|span| span.id == span_id) else {
            return;
        };
        let TxnInner { open, roots, .. } = &mut *inner;
        finalize_open_span(open, roots, index, end, outcome);
    }

    /// Hex id of the innermost open span, for linking metadata.
    pub(crate) fn current_span_hex(&self) -> Option<String> {
        self.lock()
            .open
            .last()
            .map(|span| format!("{:016x}", span.id))
    }

    /// Accumulate a scoped metric sample. The scope itself is applied
    /// when the transaction stops, because the name may still change.
    pub(crate) fn record_metric(&self, name: &str, duration: Duration, exclusive: Duration) {
        let mut inner = self.lock();
        if inner.state == TransactionState::Stopped {
            return;
        }
        let _ = inner.metrics.insert(
            MetricId::rollup(name),
            MetricData::from_sample(duration, exclusive),
        );
    }

    /// Buffer a log event against this transaction's share of the
    /// per-cycle cap. Overflow is dropped and counted.
    pub(crate) fn record_log_event(&self, event: LogEvent) {
        let cap = self.inner.settings.transaction_log_cap();
        let mut inner = self.lock();
        if inner.state == TransactionState::Stopped {
            return;
        }
        if inner.log_events.len() >= cap {
            inner.dropped_log_events += 1;
            return;
        }
        inner.log_events.push(event);
    }

    /// Stop the transaction: finalize any spans still open (best-effort
    /// durations up to this point), freeze all state, and hand back the
    /// finished unit of work. Returns `None` when already stopped.
    pub(crate) fn stop(&self, outcome: Outcome) -> Option<FinishedTransaction> {
        let end = self.inner.started.elapsed();
        let mut inner = self.lock();
        if inner.state == TransactionState::Stopped {
            return None;
        }

        // Innermost spans first, so children attach before parents
        // finalize and nesting invariants hold on the cancel path.
        while !inner.open.is_empty() {
            let index = inner.open.len() - 1;
            let TxnInner { open, roots, .. } = &mut *inner;
            finalize_open_span(open, roots, index, end, Outcome::Cancelled);
        }

        inner.state = TransactionState::Stopped;

        let snapshot = inner.metrics.consume();
        let metrics = snapshot
            .entries
            .into_iter()
            .map(|(id, data)| (id.name, data))
            .collect();

        debug!(
            transaction = %inner.name,
            trace_id = %self.inner.trace_id,
            "transaction stopped"
        );

        Some(FinishedTransaction {
            name: std::mem::take(&mut inner.name),
            kind: self.inner.kind,
            trace_id: self.inner.trace_id.clone(),
            priority: self.inner.priority,
            duration: end,
            outcome,
            roots: std::mem::take(&mut inner.roots),
            metrics,
            dropped_metrics: snapshot.dropped,
            log_events: std::mem::take(&mut inner.log_events),
            dropped_log_events: std::mem::take(&mut inner.dropped_log_events),
        })
    }
}

/// Remove `open[index]`, compute its duration and exclusive time, and
/// attach the finished node to its parent. A node with no live parent
/// becomes a top-level span; later top-level spans get their own root
/// slot rather than nesting under an earlier, already-ended one.
fn finalize_open_span(
    open: &mut Vec<OpenSpan>,
    roots: &mut Vec<SpanNode>,
    index: usize,
    end: Duration,
    outcome: Outcome,
) {
    let span = open.remove(index);

    // A sibling or child may still be open when this span finishes
    // (fan-out completing in any order). Reparent those spans so they
    // attach to this span's parent instead of dangling.
    for open_span in open.iter_mut() {
        if open_span.parent == Some(span.id) {
            open_span.parent = span.parent;
        }
    }

    let duration = end.saturating_sub(span.start);
    let child_sum: Duration = span.children.iter().map(SpanNode::duration).sum();
    let node = SpanNode {
        name: span.name,
        category: span.category,
        start: span.start,
        end,
        exclusive: duration.saturating_sub(child_sum),
        outcome,
        children: span.children,
    };

    if let Some(parent) = span
        .parent
        .and_then(|pid| open.iter_mut().find(|open_span| open_span.id == pid))
    {
        parent.children.push(node);
    } else {
        roots.push(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn handle() -> TransactionHandle {
        let txn = TransactionHandle::new(
            "checkout",
            TransactionKind::Web,
            Arc::new(AgentConfig::default()),
        );
        txn.start();
        txn
    }

    #[test]
    fn test_lifecycle_states() {
        let txn = TransactionHandle::new(
            "t",
            TransactionKind::Background,
            Arc::new(AgentConfig::default()),
        );
        assert_eq!(txn.state(), TransactionState::Pending);
        txn.start();
        assert_eq!(txn.state(), TransactionState::Running);
        assert!(txn.stop(Outcome::Success).is_some());
        assert_eq!(txn.state(), TransactionState::Stopped);
        // Second stop yields nothing.
        assert!(txn.stop(Outcome::Success).is_none());
    }

    #[test]
    fn test_trace_id_format() {
        let txn = handle();
        assert_eq!(txn.trace_id().len(), 32);
        assert!(txn.trace_id().chars().all(|c| c.is_ascii_hexdigit()));
        let priority = txn.priority();
        assert!((0.0..1.0).contains(&priority));
    }

    #[test]
    fn test_name_frozen_after_stop() {
        let txn = handle();
        txn.set_name("renamed");
        assert_eq!(txn.name(), "renamed");
        let finished = txn.stop(Outcome::Success).unwrap();
        assert_eq!(finished.name, "renamed");
        txn.set_name("too-late");
        assert_eq!(txn.name(), "");
    }

    #[test]
    fn test_nested_spans_build_tree() {
        let txn = handle();

        let a = txn.start_span("A", SpanCategory::Function).unwrap();
        let b = txn.start_span("B", SpanCategory::Datastore).unwrap();
        thread::sleep(Duration::from_millis(10));
        txn.finish_span(b, Outcome::Success);
        thread::sleep(Duration::from_millis(20));
        txn.finish_span(a, Outcome::Success);

        let finished = txn.stop(Outcome::Success).unwrap();
        assert_eq!(finished.roots.len(), 1);
        let root = &finished.roots[0];
        assert_eq!(root.name, "A");
        assert_eq!(root.children.len(), 1);

        let child = &root.children[0];
        assert_eq!(child.name, "B");
        assert!(child.end <= root.end);
        assert!(child.duration() >= Duration::from_millis(10));
        // A's exclusive time excludes B entirely.
        assert!(root.exclusive >= Duration::from_millis(20));
        assert!(root.exclusive <= root.duration().saturating_sub(child.duration()));
    }

    #[test]
    fn test_exclusive_time_clamped_at_zero() {
        let txn = handle();
        let a = txn.start_span("A", SpanCategory::Function).unwrap();
        let b = txn.start_span("B", SpanCategory::Function).unwrap();
        txn.finish_span(b, Outcome::Success);
        txn.finish_span(a, Outcome::Success);

        let finished = txn.stop(Outcome::Success).unwrap();
        let root = &finished.roots[0];
        // Near-zero parent duration; exclusive must never go negative.
        assert!(root.exclusive <= root.duration());
    }

    #[test]
    fn test_concurrent_siblings_any_completion_order() {
        let txn = handle();
        let parent = txn.start_span("parent", SpanCategory::Function).unwrap();
        let fan_a = txn.start_span("fan-a", SpanCategory::External).unwrap();
        let fan_b = txn.start_span("fan-b", SpanCategory::External).unwrap();

        // fan-a finishes while fan-b is still open; fan-b is
        // reparented so both end up as children of "parent".
        txn.finish_span(fan_a, Outcome::Success);
        txn.finish_span(fan_b, Outcome::Success);
        txn.finish_span(parent, Outcome::Success);

        let finished = txn.stop(Outcome::Success).unwrap();
        assert_eq!(finished.roots.len(), 1);
        let root = &finished.roots[0];
        assert_eq!(root.name, "parent");
        let mut names: Vec<&str> = root.children.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, ["fan-a", "fan-b"]);
    }

    #[test]
    fn test_fan_b_parent_is_fan_a_when_nested() {
        // Without an intervening pop, the second push nests under the
        // first: the stack tracks the innermost open span.
        let txn = handle();
        let a = txn.start_span("a", SpanCategory::Function).unwrap();
        let b = txn.start_span("b", SpanCategory::Function).unwrap();
        txn.finish_span(b, Outcome::Success);
        txn.finish_span(a, Outcome::Success);

        let finished = txn.stop(Outcome::Success).unwrap();
        let root = &finished.roots[0];
        assert_eq!(root.name, "a");
        assert_eq!(root.children[0].name, "b");
    }

    #[test]
    fn test_sequential_top_level_spans_become_separate_roots() {
        let txn = handle();
        let a = txn.start_span("A", SpanCategory::Function).unwrap();
        txn.finish_span(a, Outcome::Success);
        thread::sleep(Duration::from_millis(5));
        let b = txn.start_span("B", SpanCategory::External).unwrap();
        thread::sleep(Duration::from_millis(5));
        txn.finish_span(b, Outcome::Success);

        let finished = txn.stop(Outcome::Success).unwrap();
        // B ran after A ended; it must not be nested under A.
        assert_eq!(finished.roots.len(), 2);
        assert_eq!(finished.roots[0].name, "A");
        assert_eq!(finished.roots[1].name, "B");
        assert!(finished.roots[0].children.is_empty());
        assert!(finished.roots[1].children.is_empty());
        assert!(finished.roots[1].start >= finished.roots[0].end);
    }

    #[test]
    fn test_stop_finalizes_open_spans() {
        let txn = handle();
        let _a = txn.start_span("A", SpanCategory::Function).unwrap();
        let _b = txn.start_span("B", SpanCategory::Function).unwrap();

        // Cancellation: stop with spans still open.
        let finished = txn.stop(Outcome::Cancelled).unwrap();
        assert_eq!(finished.roots.len(), 1);
        let root = &finished.roots[0];
        assert_eq!(root.name, "A");
        assert_eq!(root.outcome, Outcome::Cancelled);
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].name, "B");
        assert!(root.children[0].end <= root.end);
    }

    #[test]
    fn test_finish_span_after_stop_is_noop() {
        let txn = handle();
        let a = txn.start_span("A", SpanCategory::Function).unwrap();
        let _ = txn.stop(Outcome::Success).unwrap();
        // The handle's deferred drop must not panic or resurrect state.
        txn.finish_span(a, Outcome::Success);
    }

    #[test]
    fn test_scoped_metrics_survive_rename() {
        let txn = handle();
        txn.record_metric(
            "Datastore/select",
            Duration::from_millis(5),
            Duration::from_millis(5),
        );
        txn.set_name("WebTransaction/renamed");
        let finished = txn.stop(Outcome::Success).unwrap();
        assert_eq!(finished.metrics.len(), 1);
        assert_eq!(finished.metrics[0].0, "Datastore/select");
        assert_eq!(finished.name, "WebTransaction/renamed");
    }

    #[test]
    fn test_log_events_capped_per_transaction() {
        let mut config = AgentConfig::default();
        config.event_harvest_config.harvest_limits.log_event_data = 24; // cap/12 = 2
        let txn = TransactionHandle::new("t", TransactionKind::Web, Arc::new(config));
        txn.start();

        for i in 0..5 {
            txn.record_log_event(crate::logs::LogEvent::new(
                &format!("line {i}"),
                crate::logs::LogLevel::Info,
                0,
                crate::linking::LinkingMetadata::service("svc", "", "host"),
            ));
        }

        let finished = txn.stop(Outcome::Success).unwrap();
        assert_eq!(finished.log_events.len(), 2);
        assert_eq!(finished.dropped_log_events, 3);
        // Oldest-kept retention.
        assert_eq!(finished.log_events[0].message, "line 0");
    }

    #[test]
    fn test_current_span_hex_tracks_stack_top() {
        let txn = handle();
        assert!(txn.current_span_hex().is_none());
        let a = txn.start_span("A", SpanCategory::Function).unwrap();
        assert_eq!(txn.current_span_hex().unwrap(), format!("{a:016x}"));
        let b = txn.start_span("B", SpanCategory::Function).unwrap();
        assert_eq!(txn.current_span_hex().unwrap(), format!("{b:016x}"));
        txn.finish_span(b, Outcome::Success);
        assert_eq!(txn.current_span_hex().unwrap(), format!("{a:016x}"));
    }
}
