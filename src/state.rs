use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::rows::{RowSet, RowWindow};
use crate::types::Pt;
use crate::value::Value;

/// Identity of a stateful definition node, unique within one definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Identity of one render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionHandle(u64);

impl ExecutionHandle {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Per-node, per-execution working data.
#[derive(Debug, Default)]
pub struct WorkState {
    pub data: Option<Arc<RowSet>>,
    /// Current entry range per grouping level, outer first.
    pub current: Vec<Option<(usize, isize)>>,
    pub calc_height: Option<Pt>,
    pub last_value: Option<(usize, Value)>,
}

impl WorkState {
    pub(crate) fn window(&self, level: Option<usize>) -> Option<RowWindow> {
        let rows = self.data.as_ref()?;
        let range = match level {
            Some(level) => self.current.get(level).copied().flatten()?,
            None => return Some(RowWindow::all(Arc::clone(rows))),
        };
        Some(RowWindow {
            rows: Arc::clone(rows),
            start: range.0,
            end: range.1,
        })
    }

    /// Innermost window that is currently set.
    pub(crate) fn innermost_window(&self) -> Option<RowWindow> {
        let level = self.current.iter().rposition(Option::is_some);
        self.window(level)
    }
}

type StateKey = (NodeId, ExecutionHandle);

/// Render state keyed by `(node, execution)`, shared by concurrent renders.
#[derive(Default)]
pub struct StateStore {
    entries: Mutex<HashMap<StateKey, WorkState>>,
    next_handle: AtomicU64,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_execution(&self) -> ExecutionHandle {
        ExecutionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StateKey, WorkState>> {
        // A panic while holding the lock leaves plain data behind; keep using it.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` on the node's state, creating it on first use.
    pub fn with_state<R>(
        &self,
        node: NodeId,
        handle: ExecutionHandle,
        f: impl FnOnce(&mut WorkState) -> R,
    ) -> R {
        let mut entries = self.lock();
        f(entries.entry((node, handle)).or_default())
    }

    /// Reads the node's state without creating it.
    pub fn inspect<R>(
        &self,
        node: NodeId,
        handle: ExecutionHandle,
        f: impl FnOnce(&WorkState) -> R,
    ) -> Option<R> {
        let entries = self.lock();
        entries.get(&(node, handle)).map(f)
    }

    pub fn remove(&self, node: NodeId, handle: ExecutionHandle) {
        self.lock().remove(&(node, handle));
    }

    /// Drops every record of `handle`; returns how many were left.
    pub fn release_execution(&self, handle: ExecutionHandle) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(_, owner), _| *owner != handle);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn scope(&self, node: NodeId, handle: ExecutionHandle) -> WorkScope<'_> {
        WorkScope {
            store: self,
            node,
            handle,
        }
    }
}

/// Removes a node's state when its render scope ends.
pub(crate) struct WorkScope<'a> {
    store: &'a StateStore,
    node: NodeId,
    handle: ExecutionHandle,
}

impl WorkScope<'_> {
    pub fn with<R>(&self, f: impl FnOnce(&mut WorkState) -> R) -> R {
        self.store.with_state(self.node, self.handle, f)
    }
}

impl Drop for WorkScope<'_> {
    fn drop(&mut self) {
        self.store.remove(self.node, self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executions_do_not_share_state() {
        let store = StateStore::new();
        let a = store.begin_execution();
        let b = store.begin_execution();
        assert_ne!(a, b);
        let node = NodeId(7);
        store.with_state(node, a, |state| state.calc_height = Some(Pt::from_i32(12)));
        assert_eq!(store.inspect(node, b, |state| state.calc_height), None);
        assert_eq!(
            store.inspect(node, a, |state| state.calc_height),
            Some(Some(Pt::from_i32(12)))
        );
        assert_eq!(store.release_execution(a), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn scope_guard_removes_on_drop_and_unwind() {
        let store = StateStore::new();
        let handle = store.begin_execution();
        {
            let scope = store.scope(NodeId(1), handle);
            scope.with(|state| state.current.push(Some((0, 3))));
            assert_eq!(store.len(), 1);
        }
        assert!(store.is_empty());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let scope = store.scope(NodeId(2), handle);
            scope.with(|state| state.calc_height = Some(Pt::ZERO));
            panic!("render failed");
        }));
        assert!(result.is_err());
        assert!(store.is_empty());
    }
}
