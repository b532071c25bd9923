//! Finished span tree nodes and the guard handle returned by
//! `push_trace`.

use crate::transaction::TransactionHandle;
use serde::Serialize;
use std::time::Duration;

/// Category of a timed sub-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanCategory {
    Function,
    Datastore,
    External,
    Other,
}

/// How a span or transaction exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Error,
    Cancelled,
}

/// One finalized node in a transaction's span tree. Children are
/// owned by their parent; start/end are offsets from the transaction
/// start.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SpanNode {
    pub name: String,
    pub category: SpanCategory,
    pub start: Duration,
    pub end: Duration,
    /// `duration - Σ(children durations)`, clamped at zero.
    pub exclusive: Duration,
    pub outcome: Outcome,
    pub children: Vec<SpanNode>,
}

impl SpanNode {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// Guard handle for an open span.
///
/// Finishing through [`SpanHandle::finish`] records the supplied
/// outcome; a handle abandoned on any other exit path (panic, task
/// cancellation) finalizes the span as `Cancelled` from its `Drop`
/// impl, so a push is never left unmatched. Handles created outside
/// an active transaction are unarmed no-ops.
#[derive(Debug)]
pub struct SpanHandle {
    txn: Option<TransactionHandle>,
    span_id: u64,
}

impl SpanHandle {
    pub(crate) fn new(txn: TransactionHandle, span_id: u64) -> Self {
        Self {
            txn: Some(txn),
            span_id,
        }
    }

    pub fn noop() -> Self {
        Self {
            txn: None,
            span_id: 0,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.txn.is_none()
    }

    /// Hex span id, present only for armed handles.
    pub fn id(&self) -> Option<String> {
        self.txn.as_ref().map(|_| format!("{:016x}", self.span_id))
    }

    /// Finalize the span with an explicit outcome.
    pub fn finish(mut self, outcome: Outcome) {
        if let Some(txn) = self.txn.take() {
            txn.finish_span(self.span_id, outcome);
        }
    }
}

impl Drop for SpanHandle {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            txn.finish_span(self.span_id, Outcome::Cancelled);
        }
    }
}
