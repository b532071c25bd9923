//! The agent facade: the entry points framework adapters call into.
//!
//! Every operation here follows the degrade-to-no-op rule: a
//! bookkeeping failure (missing context, table overflow, stopped
//! transaction) never alters the outcome of the instrumented call and
//! never panics. Drops are counted and surfaced as supportability
//! metrics at harvest, nothing more.

use crate::config::AgentConfig;
use crate::context::{ContextRegistry, ContextToken, UnitId};
use crate::errors;
use crate::linking::{LinkingMetadata, LinkingMetadataProvider};
use crate::logs::{LogEvent, LogEventBuffer, LogLevel, LogSnapshot};
use crate::metrics::{
    DoubleBufferedAggregator, MetricData, MetricId, MetricSnapshot, ROLLUP_SCOPE,
};
use crate::span::{Outcome, SpanCategory, SpanHandle, SpanNode};
use crate::transaction::{FinishedTransaction, TransactionHandle, TransactionKind};
use fnv::FnvHashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct Agent {
    config: Arc<AgentConfig>,
    registry: ContextRegistry,
    metrics: DoubleBufferedAggregator,
    logs: LogEventBuffer,
    linking: LinkingMetadataProvider,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Self, errors::Creation> {
        let limits = config.event_harvest_config.harvest_limits;
        let linking = LinkingMetadataProvider::from_config(&config);
        Ok(Self {
            config: Arc::new(config),
            registry: ContextRegistry::new(),
            metrics: DoubleBufferedAggregator::new(limits.metric_data)?,
            logs: LogEventBuffer::new(limits.log_event_data),
            linking,
        })
    }

    pub fn config(&self) -> &Arc<AgentConfig> {
        &self.config
    }

    /// Start a transaction and bind it as `unit`'s current one.
    pub fn begin_transaction(
        &self,
        unit: UnitId,
        name: &str,
        kind: TransactionKind,
    ) -> TransactionHandle {
        let txn = TransactionHandle::new(name, kind, Arc::clone(&self.config));
        txn.start();
        self.registry.bind(unit, txn.clone());
        debug!(transaction = name, trace_id = %txn.trace_id(), "transaction started");
        txn
    }

    /// Stop a transaction, merge its telemetry into the application
    /// aggregates, and return the finished unit of work. Stopping an
    /// already-stopped transaction returns `None`.
    pub fn end_transaction(
        &self,
        unit: UnitId,
        handle: &TransactionHandle,
        outcome: Outcome,
    ) -> Option<FinishedTransaction> {
        if let Some(current) = self.registry.current(unit) {
            if current.same_transaction(handle) {
                self.registry.unbind(unit);
            }
        }

        let mut finished = handle.stop(outcome)?;
        self.merge_finished(&mut finished);
        Some(finished)
    }

    pub fn current_transaction(&self, unit: UnitId) -> Option<TransactionHandle> {
        self.registry.current(unit)
    }

    /// Capture `unit`'s context for a later [`restore_context`] on a
    /// possibly different unit (thread handoff, task resumption).
    ///
    /// [`restore_context`]: Agent::restore_context
    pub fn capture_context(&self, unit: UnitId) -> Option<ContextToken> {
        self.registry.capture(unit)
    }

    pub fn restore_context(&self, token: ContextToken, unit: UnitId) -> TransactionHandle {
        self.registry.restore(token, unit)
    }

    pub fn unbind_context(&self, unit: UnitId) -> Option<TransactionHandle> {
        self.registry.unbind(unit)
    }

    /// Open a span under `unit`'s current transaction. Without an
    /// active transaction this returns an unarmed no-op handle.
    pub fn push_trace(&self, unit: UnitId, name: &str, category: SpanCategory) -> SpanHandle {
        match self.registry.current(unit) {
            Some(txn) => match txn.start_span(name, category) {
                Some(span_id) => SpanHandle::new(txn, span_id),
                None => SpanHandle::noop(),
            },
            None => SpanHandle::noop(),
        }
    }

    /// Finalize a span with an explicit outcome. Dropping the handle
    /// without calling this finalizes it as `Cancelled` instead.
    pub fn pop_trace(&self, handle: SpanHandle, outcome: Outcome) {
        handle.finish(outcome);
    }

    /// Record one timed sample. With an active transaction the sample
    /// accumulates there and is emitted as a scoped + rollup pair when
    /// the transaction stops; without one the rollup entry lands in
    /// the shared aggregator immediately. Each sample reaches the
    /// rollup table exactly once.
    pub fn record_metric(
        &self,
        unit: UnitId,
        name: &str,
        duration: Duration,
        exclusive: Option<Duration>,
    ) {
        let exclusive = exclusive.unwrap_or(duration);
        match self.registry.current(unit) {
            Some(txn) => txn.record_metric(name, duration, exclusive),
            None => {
                let _ = self.metrics.insert(
                    MetricId::rollup(name),
                    MetricData::from_sample(duration, exclusive),
                );
            }
        }
    }

    /// Capture one log event, valid inside or outside a transaction.
    pub fn record_log_event(&self, unit: UnitId, message: &str, level: &str, timestamp: i64) {
        if message.is_empty() {
            return;
        }
        let level = LogLevel::normalize(level);

        if self.config.log_metrics_enabled() {
            self.count_log_line(level);
        }
        if !self.config.log_forwarding_enabled() {
            return;
        }

        match self.registry.current(unit) {
            Some(txn) => {
                let attributes = self
                    .linking
                    .with_trace(txn.trace_id().to_string(), txn.current_span_hex());
                txn.record_log_event(LogEvent::new(message, level, timestamp, attributes));
            }
            None => {
                let attributes = self.linking.service_metadata();
                self.logs
                    .record(LogEvent::new(message, level, timestamp, attributes));
            }
        }
    }

    /// Resolve linking metadata for `unit`: service-level fields
    /// always, trace/span ids only under an active transaction.
    pub fn linking_metadata(&self, unit: UnitId) -> LinkingMetadata {
        match self.registry.current(unit) {
            Some(txn) => self
                .linking
                .with_trace(txn.trace_id().to_string(), txn.current_span_hex()),
            None => self.linking.service_metadata(),
        }
    }

    /// Append the linking-metadata blob to a log line for local
    /// decoration. Returns the line unchanged when decoration is
    /// disabled or high-security mode is on.
    pub fn decorate_log_line(&self, unit: UnitId, line: &str) -> String {
        if !self.config.local_decorating_enabled() {
            return line.to_string();
        }
        let mut decorated = line.to_string();
        decorated.push_str(&self.linking_metadata(unit).decoration_blob());
        decorated
    }

    fn count_log_line(&self, level: LogLevel) {
        let sample = MetricData::from_sample(Duration::ZERO, Duration::ZERO);
        let _ = self.metrics.insert(MetricId::rollup("Logging/lines"), sample);
        let _ = self.metrics.insert(
            MetricId::rollup(format!("Logging/lines/{}", level.as_str())),
            sample,
        );
    }

    /// Fold a stopped transaction's telemetry into the shared
    /// aggregates: per-span time metrics, the transaction's own
    /// duration metric, buffered scoped metrics (now that the final
    /// name is known), and buffered log events.
    fn merge_finished(&self, finished: &mut FinishedTransaction) {
        let scope = finished.transaction_metric_name();

        let mut table: FnvHashMap<String, MetricData> = FnvHashMap::default();
        for (name, data) in finished.metrics.drain(..) {
            table.entry(name).or_default().merge(&data);
        }
        for root in &finished.roots {
            collect_span_metrics(root, &mut table);
        }

        let entries = table.into_iter().flat_map(|(name, data)| {
            [
                (MetricId::scoped(name.clone(), scope.clone()), data),
                (MetricId::scoped(name, ROLLUP_SCOPE), data),
            ]
        });
        self.metrics.merge_entries(entries);

        // The transaction's own duration metric and the per-kind
        // rollup live in the unscoped table only.
        let spans_duration: Duration = finished.roots.iter().map(SpanNode::duration).sum();
        let txn_data = MetricData::from_sample(
            finished.duration,
            finished.duration.saturating_sub(spans_duration),
        );
        let kind_data = MetricData::from_sample(finished.duration, finished.duration);
        self.metrics.merge_entries([
            (MetricId::rollup(scope), txn_data),
            (MetricId::rollup(finished.kind.metric_prefix()), kind_data),
        ]);
        self.metrics.note_dropped(finished.dropped_metrics);

        self.logs.extend(
            std::mem::take(&mut finished.log_events),
            finished.dropped_log_events,
        );
    }

    pub(crate) fn flush_metrics(&self) -> MetricSnapshot {
        self.metrics.flush()
    }

    pub(crate) fn flush_logs(&self) -> LogSnapshot {
        self.logs.flush()
    }
}

/// Walk a finished span tree, folding each node's duration and
/// exclusive time into the per-name table.
fn collect_span_metrics(node: &SpanNode, table: &mut FnvHashMap<String, MetricData>) {
    table
        .entry(node.name.clone())
        .or_default()
        .record(node.duration(), node.exclusive);
    for child in &node.children {
        collect_span_metrics(child, table);
    }
}
