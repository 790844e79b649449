//! Work items: the unresolved obligations a plan node still has to discharge.

use crate::operation::Condition;
use crate::operation::FieldSelection;
use crate::operation::RegisteredSelectionSet;
use crate::operation_plan::StepId;
use crate::schema::Lookup;
use crate::schema::SourceSchemaName;
use apollo_compiler::ast::Value;
use apollo_compiler::executable::Field;
use apollo_compiler::Name;
use apollo_compiler::Node;
use indexmap::IndexSet;
use std::sync::Arc;

/// What an operation work item plans: the seed selections of the operation,
/// or an entity selection reached through a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationWorkItemKind {
    Root,
    Lookup,
}

/// Plan a selection set on some source schema, possibly entered through a
/// lookup.
#[derive(Debug, Clone)]
pub struct OperationWorkItem {
    pub kind: OperationWorkItemKind,
    pub selection_set: RegisteredSelectionSet,
    /// The lookup to enter through; bound by the queue when branching.
    pub lookup: Option<Arc<Lookup>>,
    /// The schema that spilled this selection, never a candidate again.
    pub from_schema: Option<SourceSchemaName>,
    /// The schema chosen for this branch; root items leave this unset and
    /// use the plan node's current schema.
    pub target_schema: Option<SourceSchemaName>,
    pub dependents: IndexSet<StepId>,
    pub parent_depth: u32,
    pub estimated_depth: u32,
}

/// Satisfy one requirement-gated field of an existing step, either by
/// inlining its `requires` data into sibling steps (`lookup` unset) or by
/// refetching the field through a lookup elsewhere.
#[derive(Debug, Clone)]
pub struct FieldRequirementWorkItem {
    pub field: FieldSelection,
    /// The step whose schema owns the field.
    pub step_id: StepId,
    pub lookup: Option<Arc<Lookup>>,
    pub dependents: IndexSet<StepId>,
    pub parent_depth: u32,
    pub estimated_depth: u32,
}

/// Plan a Relay `node(id:)` selection: split it by concrete type and emit
/// the dispatcher step.
#[derive(Debug, Clone)]
pub struct NodeFieldWorkItem {
    pub field: Node<Field>,
    pub selection_set: RegisteredSelectionSet,
    pub id_value: Node<Value>,
    pub conditions: Vec<Condition>,
    pub dependents: IndexSet<StepId>,
    pub parent_depth: u32,
    pub estimated_depth: u32,
}

/// Plan one concrete type's selections under a previously planned `node`
/// field, via a by-id lookup bound by the queue.
#[derive(Debug, Clone)]
pub struct NodeLookupWorkItem {
    pub response_name: Name,
    pub type_name: Name,
    pub selection_set: RegisteredSelectionSet,
    pub id_value: Node<Value>,
    pub lookup: Option<Arc<Lookup>>,
    pub dependents: IndexSet<StepId>,
    pub parent_depth: u32,
    pub estimated_depth: u32,
}

#[derive(Debug, Clone)]
pub enum WorkItem {
    Operation(OperationWorkItem),
    FieldRequirement(FieldRequirementWorkItem),
    NodeField(NodeFieldWorkItem),
    NodeLookup(NodeLookupWorkItem),
}

impl WorkItem {
    pub fn estimated_depth(&self) -> u32 {
        match self {
            WorkItem::Operation(item) => item.estimated_depth,
            WorkItem::FieldRequirement(item) => item.estimated_depth,
            WorkItem::NodeField(item) => item.estimated_depth,
            WorkItem::NodeLookup(item) => item.estimated_depth,
        }
    }

    pub fn dependents(&self) -> &IndexSet<StepId> {
        match self {
            WorkItem::Operation(item) => &item.dependents,
            WorkItem::FieldRequirement(item) => &item.dependents,
            WorkItem::NodeField(item) => &item.dependents,
            WorkItem::NodeLookup(item) => &item.dependents,
        }
    }

    /// Label reported through the event sink.
    pub fn label(&self) -> &'static str {
        match self {
            WorkItem::Operation(item) => match item.kind {
                OperationWorkItemKind::Root => "root",
                OperationWorkItemKind::Lookup => "lookup",
            },
            WorkItem::FieldRequirement(item) => {
                if item.lookup.is_some() {
                    "field-requirement-lookup"
                } else {
                    "field-requirement-inline"
                }
            }
            WorkItem::NodeField(_) => "node-field",
            WorkItem::NodeLookup(_) => "node-lookup",
        }
    }
}

impl OperationWorkItem {
    /// A seed item for (part of) the operation's root selections.
    pub fn root(selection_set: RegisteredSelectionSet) -> Self {
        OperationWorkItem {
            kind: OperationWorkItemKind::Root,
            selection_set,
            lookup: None,
            from_schema: None,
            target_schema: None,
            dependents: IndexSet::new(),
            parent_depth: 0,
            estimated_depth: 1,
        }
    }
}
