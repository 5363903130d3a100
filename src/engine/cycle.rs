//! Set-evaluation cycle guard (spec §4.9 "merged sets evaluation").
//!
//! Before evaluating a selected entry's set value, the orchestrator
//! inserts `{tableId}.{key}` into `set_evaluation_in_progress`; if the
//! key is already present the value's pattern transitively references
//! itself, so evaluation emits the raw unevaluated string instead of
//! recursing forever. The key is always removed on exit, success or
//! not — modeled here as an RAII guard rather than a manual insert/
//! remove pair, the same "always clean up on drop" shape as a stash
//! entry in `astorion::engine::dedup` being keyed for correctness
//! rather than left to the caller to remember.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

pub(crate) struct CycleGuard {
    key: String,
    set: Rc<RefCell<HashSet<String>>>,
}

impl CycleGuard {
    /// Attempt to enter evaluation of `key`. Returns `None` if `key` is
    /// already being evaluated higher up the call stack (a cycle).
    pub(crate) fn enter(set: &Rc<RefCell<HashSet<String>>>, key: String) -> Option<Self> {
        if !set.borrow_mut().insert(key.clone()) {
            return None;
        }
        Some(CycleGuard { key, set: Rc::clone(set) })
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.set.borrow_mut().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentrant_key_is_rejected_while_guard_is_held() {
        let set = Rc::new(RefCell::new(HashSet::new()));
        let guard = CycleGuard::enter(&set, "t.k".to_string()).unwrap();
        assert!(CycleGuard::enter(&set, "t.k".to_string()).is_none());
        drop(guard);
        assert!(CycleGuard::enter(&set, "t.k".to_string()).is_some());
    }
}
