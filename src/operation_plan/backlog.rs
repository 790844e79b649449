//! The backlog: a persistent LIFO of work items.
//!
//! Plan nodes branch constantly, so the backlog is an `Arc`-linked list:
//! push and pop produce new handles in O(1) and share the tail. The
//! aggregate [`BacklogCost`] is carried alongside and kept in sync on every
//! push and pop.

use crate::operation::FieldSelection;
use crate::operation::RegisteredSelectionSet;
use crate::operation_plan::cost::BacklogCost;
use crate::operation_plan::work_item::OperationWorkItem;
use crate::operation_plan::work_item::OperationWorkItemKind;
use crate::operation_plan::work_item::WorkItem;
use crate::operation_plan::StepId;
use crate::schema::SourceSchemaName;
use indexmap::IndexSet;
use std::sync::Arc;

#[derive(Debug)]
struct BacklogEntry {
    item: WorkItem,
    next: Option<Arc<BacklogEntry>>,
}

#[derive(Debug, Clone, Default)]
pub struct Backlog {
    head: Option<Arc<BacklogEntry>>,
    len: usize,
    cost: BacklogCost,
}

impl Backlog {
    pub fn empty() -> Self {
        Backlog::default()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn cost(&self) -> &BacklogCost {
        &self.cost
    }

    pub fn peek(&self) -> Option<&WorkItem> {
        self.head.as_ref().map(|entry| &entry.item)
    }

    pub fn push(&self, item: WorkItem) -> Backlog {
        let cost = self.cost.add(&item);
        Backlog {
            head: Some(Arc::new(BacklogEntry {
                item,
                next: self.head.clone(),
            })),
            len: self.len + 1,
            cost,
        }
    }

    pub fn pop(&self) -> Option<(Backlog, WorkItem)> {
        let entry = self.head.as_ref()?;
        let item = entry.item.clone();
        let backlog = Backlog {
            head: entry.next.clone(),
            len: self.len - 1,
            cost: self.cost.remove(&item),
        };
        Some((backlog, item))
    }

    /// Pushes unresolvable selection sets as lookup work items, in reverse
    /// order so the first set is the next item popped.
    pub fn push_unresolvable(
        &self,
        selection_sets: Vec<RegisteredSelectionSet>,
        from_schema: Option<SourceSchemaName>,
        parent_depth: u32,
    ) -> Backlog {
        let mut backlog = self.clone();
        for selection_set in selection_sets.into_iter().rev() {
            backlog = backlog.push(WorkItem::Operation(OperationWorkItem {
                kind: OperationWorkItemKind::Lookup,
                selection_set,
                lookup: None,
                from_schema: from_schema.clone(),
                target_schema: None,
                dependents: IndexSet::new(),
                parent_depth,
                estimated_depth: parent_depth + 1,
            }));
        }
        backlog
    }

    /// Pushes requirement-gated fields of a step, in reverse order so the
    /// first field is the next item popped.
    pub fn push_requirements(
        &self,
        fields: Vec<FieldSelection>,
        step_id: StepId,
        parent_depth: u32,
    ) -> Backlog {
        let mut backlog = self.clone();
        for field in fields.into_iter().rev() {
            backlog = backlog.push(WorkItem::FieldRequirement(
                crate::operation_plan::work_item::FieldRequirementWorkItem {
                    field,
                    step_id,
                    lookup: None,
                    dependents: IndexSet::new(),
                    parent_depth,
                    estimated_depth: parent_depth + 1,
                },
            ));
        }
        backlog
    }
}
