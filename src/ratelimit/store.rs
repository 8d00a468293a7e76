//! Per-identifier state shared between the request path and background workers.

use parking_lot::Mutex;
use std::collections::HashMap;

/// A map from client identifier to algorithm-specific state.
///
/// All access goes through one exclusive lock, so any closure passed in runs
/// as a single critical section with respect to every other caller,
/// including a background worker traversing the whole map.
#[derive(Debug)]
pub struct StateStore<S> {
    entries: Mutex<HashMap<String, S>>,
}

impl<S> StateStore<S> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` against the state for `id`, inserting `init()` first if absent.
    pub fn with_entry<R>(
        &self,
        id: &str,
        init: impl FnOnce() -> S,
        f: impl FnOnce(&mut S) -> R,
    ) -> R {
        let mut entries = self.entries.lock();
        // Avoid allocating the key when the identifier is already tracked.
        if let Some(state) = entries.get_mut(id) {
            return f(state);
        }
        let state = entries.entry(id.to_owned()).or_insert_with(init);
        f(state)
    }

    /// Visit every tracked identifier while holding the lock.
    pub fn for_each_mut(&self, mut f: impl FnMut(&str, &mut S)) {
        let mut entries = self.entries.lock();
        for (id, state) in entries.iter_mut() {
            f(id, state);
        }
    }

    /// Keep only the identifiers for which `f` returns true.
    ///
    /// Returns the number of identifiers removed.
    pub fn retain(&self, mut f: impl FnMut(&str, &mut S) -> bool) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|id, state| f(id, state));
        before - entries.len()
    }

    /// Forget every identifier. Returns how many were tracked.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        removed
    }

    /// Number of tracked identifiers.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no identifier is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<S: Clone> StateStore<S> {
    /// Snapshot of the state for `id`.
    pub fn get(&self, id: &str) -> Option<S> {
        self.entries.lock().get(id).cloned()
    }
}

impl<S> Default for StateStore<S> {
    fn default() -> Self {
        Self::new()
    }
}
