//! Per-request reconciliation state.

use std::collections::{HashMap, HashSet};

use crate::storage::{EntityId, Handle};

/// What one reconciliation pass has seen so far.
///
/// An id merged once in a session is a read-only back-reference for the
/// rest of it, which is what stops `A -> B -> A` payloads from recursing.
#[derive(Debug, Default)]
pub struct Session {
    touched: HashMap<String, HashSet<EntityId>>,
    selected: HashMap<Handle, bool>,
}

impl Session {
    /// Create an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `entity#id` is being merged. Returns false if it was
    /// already merged in this session.
    pub fn touch(&mut self, entity: &str, id: EntityId) -> bool {
        self.touched.entry(entity.to_string()).or_default().insert(id)
    }

    /// Forget `entity#id` again, so a later node for it is merged.
    pub fn untouch(&mut self, entity: &str, id: EntityId) {
        if let Some(ids) = self.touched.get_mut(entity) {
            ids.remove(&id);
        }
    }

    /// Check if `entity#id` was merged in this session.
    pub fn is_touched(&self, entity: &str, id: EntityId) -> bool {
        self.touched.get(entity).is_some_and(|ids| ids.contains(&id))
    }

    /// Set the volatile selection marker of a linked object.
    pub fn mark_selected(&mut self, handle: Handle, selected: bool) {
        self.selected.insert(handle, selected);
    }

    /// Selection marker of an object, if the payload carried one.
    pub fn selected(&self, handle: Handle) -> Option<bool> {
        self.selected.get(&handle).copied()
    }

    /// Number of distinct objects merged.
    pub fn touched_count(&self) -> usize {
        self.touched.values().map(HashSet::len).sum()
    }
}
