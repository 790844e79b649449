//! The selection-set registry.
//!
//! Every selection set the planner touches gets a stable integer id. Identity
//! is positional: a set is registered at the [`SelectionPath`] where it
//! appears, and all structural variants produced for that position (the
//! resolvable part kept by one source schema, the unresolvable remainder
//! handed to another) share the position while carrying their own ids, linked
//! back through the cloned-to-original table. This is the two-level identity
//! scheme the rewriters rely on: a logical id names a position, structural
//! equality is irrelevant.

use crate::operation::SelectionPath;
use apollo_compiler::Name;
use indexmap::IndexMap;
use std::sync::Arc;

/// Stable id of a logical selection set.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::Display,
    serde::Serialize,
)]
pub struct SelectionSetId(pub u64);

/// What the index knows about a registered id.
#[derive(Debug, Clone)]
pub struct SelectionSetInfo {
    pub path: SelectionPath,
    /// The parent type of the selection set.
    pub ty: Name,
}

#[derive(Debug, Clone, Default)]
struct IndexState {
    next_id: u64,
    /// The original id registered for each position.
    by_path: IndexMap<SelectionPath, SelectionSetId>,
    info: IndexMap<SelectionSetId, SelectionSetInfo>,
    cloned_to_original: IndexMap<SelectionSetId, SelectionSetId>,
}

impl IndexState {
    fn fresh_id(&mut self) -> SelectionSetId {
        self.next_id += 1;
        SelectionSetId(self.next_id)
    }
}

/// The immutable form embedded in plan nodes. Cheap to clone; diverging
/// branches call [`SelectionSetIndex::to_builder`] and seal their own copy.
#[derive(Debug, Clone, Default)]
pub struct SelectionSetIndex {
    state: Arc<IndexState>,
}

impl SelectionSetIndex {
    pub fn to_builder(&self) -> SelectionSetIndexBuilder {
        SelectionSetIndexBuilder {
            state: (*self.state).clone(),
        }
    }

    pub fn get_by_path(&self, path: &SelectionPath) -> Option<SelectionSetId> {
        self.state.by_path.get(path).copied()
    }

    pub fn is_registered(&self, path: &SelectionPath) -> bool {
        self.state.by_path.contains_key(path)
    }

    pub fn info(&self, id: SelectionSetId) -> Option<&SelectionSetInfo> {
        self.state.info.get(&id)
    }

    /// The original id a cloned id was derived from, one hop.
    pub fn try_get_original_id(&self, cloned: SelectionSetId) -> Option<SelectionSetId> {
        self.state.cloned_to_original.get(&cloned).copied()
    }

    /// Follows the cloned-to-original chain to the originally registered id.
    pub fn resolve_original(&self, id: SelectionSetId) -> SelectionSetId {
        let mut current = id;
        while let Some(original) = self.state.cloned_to_original.get(&current) {
            current = *original;
        }
        current
    }
}

/// The mutable form. Sealable back into [`SelectionSetIndex`] for embedding
/// in a plan node; never shared between plan nodes that may both be expanded.
#[derive(Debug, Clone, Default)]
pub struct SelectionSetIndexBuilder {
    state: IndexState,
}

impl SelectionSetIndexBuilder {
    /// Registers the selection set at `path`, returning the existing id if the
    /// position is already known.
    pub fn register(&mut self, path: SelectionPath, ty: Name) -> SelectionSetId {
        if let Some(id) = self.state.by_path.get(&path) {
            return *id;
        }
        let id = self.state.fresh_id();
        self.state.by_path.insert(path.clone(), id);
        self.state.info.insert(id, SelectionSetInfo { path, ty });
        id
    }

    /// Registers a structural variant of `original` (an unresolvable
    /// remainder, a per-branch slice) under a fresh id linked back to it.
    pub fn register_clone(
        &mut self,
        original: SelectionSetId,
        path: SelectionPath,
        ty: Name,
    ) -> SelectionSetId {
        let id = self.state.fresh_id();
        self.state.info.insert(id, SelectionSetInfo { path, ty });
        self.state.cloned_to_original.insert(id, original);
        id
    }

    pub fn get_by_path(&self, path: &SelectionPath) -> Option<SelectionSetId> {
        self.state.by_path.get(path).copied()
    }

    pub fn is_registered(&self, path: &SelectionPath) -> bool {
        self.state.by_path.contains_key(path)
    }

    pub fn info(&self, id: SelectionSetId) -> Option<&SelectionSetInfo> {
        self.state.info.get(&id)
    }

    pub fn try_get_original_id(&self, cloned: SelectionSetId) -> Option<SelectionSetId> {
        self.state.cloned_to_original.get(&cloned).copied()
    }

    pub fn resolve_original(&self, id: SelectionSetId) -> SelectionSetId {
        let mut current = id;
        while let Some(original) = self.state.cloned_to_original.get(&current) {
            current = *original;
        }
        current
    }

    pub fn seal(self) -> SelectionSetIndex {
        SelectionSetIndex {
            state: Arc::new(self.state),
        }
    }
}
