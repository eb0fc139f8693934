//! Per-project critical sections.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One mutex per project key, created on first use.
///
/// Operations on different projects never contend; operations on the same
/// project run one at a time. Guards are held only for the duration of a
/// synchronous database round-trip, never across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct ProjectLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, project: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("project lock table poisoned");
        locks
            .entry(project.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` inside the project's critical section.
    pub fn with<T>(&self, project: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(project);
        // A panic inside a previous section leaves no partial state behind
        // the unit mutex, so poisoning is ignored.
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        f()
    }
}
