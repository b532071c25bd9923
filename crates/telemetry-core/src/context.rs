//! Context registry: maps an execution unit's identity to its
//! currently active transaction.
//!
//! The key tracks the scheduling unit (a thread or a cooperative
//! task), never the call stack: a suspended unit of work that resumes
//! on a different worker recovers the same transaction through an
//! explicit [`ContextToken`] rather than thread-local state.

use crate::transaction::TransactionHandle;
use fnv::FnvHashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

/// Identity of one execution unit. Adapters supply their own ids for
/// cooperative tasks; thread-based adapters can derive one from the
/// current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(pub u64);

impl UnitId {
    /// Derive a unit id from the calling thread.
    pub fn from_thread() -> Self {
        let mut hasher = fnv::FnvHasher::default();
        std::thread::current().id().hash(&mut hasher);
        Self(hasher.finish())
    }
}

/// A captured context binding, safe to carry across a suspension
/// point or a worker-thread handoff. The token keeps the transaction
/// alive while the unit is detached from any scheduler.
#[derive(Debug, Clone)]
pub struct ContextToken {
    txn: TransactionHandle,
}

impl ContextToken {
    pub fn transaction(&self) -> &TransactionHandle {
        &self.txn
    }
}

#[derive(Debug, Default)]
pub struct ContextRegistry {
    slots: Mutex<FnvHashMap<UnitId, TransactionHandle>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, FnvHashMap<UnitId, TransactionHandle>> {
        self.slots.lock().expect("lock poisoned")
    }

    /// Bind `txn` as the current transaction for `unit`, replacing
    /// any previous binding.
    pub fn bind(&self, unit: UnitId, txn: TransactionHandle) {
        self.lock().insert(unit, txn);
    }

    pub fn current(&self, unit: UnitId) -> Option<TransactionHandle> {
        self.lock().get(&unit).cloned()
    }

    pub fn unbind(&self, unit: UnitId) -> Option<TransactionHandle> {
        self.lock().remove(&unit)
    }

    /// Capture the current binding for a later [`restore`] on a
    /// possibly different unit. The binding stays in place; callers
    /// that suspend should `unbind` after capturing.
    ///
    /// [`restore`]: ContextRegistry::restore
    pub fn capture(&self, unit: UnitId) -> Option<ContextToken> {
        self.current(unit).map(|txn| ContextToken { txn })
    }

    /// Re-establish a captured binding on `unit`, typically after a
    /// resumption on a different worker.
    pub fn restore(&self, token: ContextToken, unit: UnitId) -> TransactionHandle {
        self.bind(unit, token.txn.clone());
        token.txn
    }
}
