use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

/// Named locks serializing work on one dynamic table.
///
/// Names are compared case-insensitively, matching how the engine resolves table
/// names. Different tables never wait on each other.
#[derive(Default)]
pub struct TableLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, table: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(table.to_lowercase()).or_default().clone()
    }

    /// Runs `f` while holding the lock of `table`.
    ///
    /// A lock poisoned by a panicking holder is taken over.
    pub fn with_table_lock<T, F>(&self, table: &str, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let lock = self.lock_for(table);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}
