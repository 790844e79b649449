//! Operation plans and their steps.
//!
//! A completed plan is an ordered list of steps with stable, dense ids.
//! Operation steps each target a single source schema (or none, for the
//! fallback node query) and carry the rewritten operation document to send
//! there; node-field steps dispatch a Relay `node(id:)` selection to one of
//! several per-type operation steps at runtime.

use crate::operation::selection_set_index::SelectionSetId;
use crate::operation::Condition;
use crate::operation::SelectionPath;
use crate::schema::Lookup;
use crate::schema::SourceSchemaName;
use apollo_compiler::ast::Type;
use apollo_compiler::ast::Value;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::OperationType;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::Name;
use apollo_compiler::Node;
use indexmap::IndexMap;
use indexmap::IndexSet;
use std::sync::Arc;

pub mod backlog;
pub mod cost;
pub mod plan_node;
pub mod planner;
pub mod queue;
pub(crate) mod requirements;
pub mod work_item;

/// Stable id of a plan step. Ids are assigned monotonically starting at 1.
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
pub struct StepId(pub u32);

/// A named variable requirement of an operation step: the executor gathers
/// the selected data at `path` from earlier results and passes it as the
/// variable named by `key`.
#[derive(Debug, Clone)]
pub struct OperationRequirement {
    /// `__fusion_<n>_<argName>`; unique within a plan.
    pub key: String,
    /// Declared type of the variable.
    pub ty: Node<Type>,
    /// Where in the client operation the data is gathered.
    pub path: SelectionPath,
    /// What to read out of the partial result at `path`.
    pub selection_map: SelectionSet,
}

/// A step rooted in one source schema.
#[derive(Debug, Clone)]
pub struct OperationPlanStep {
    pub id: StepId,
    /// The operation document to send to the source schema.
    pub definition: Node<Operation>,
    /// The entity type the step's selection resolves on.
    pub entity_type: Name,
    /// The logical selection set the step is rooted at.
    pub root_selection_set_id: SelectionSetId,
    /// Every logical selection set the definition spans.
    pub selection_set_ids: IndexSet<SelectionSetId>,
    /// Ids of steps that consume this step's data and therefore execute
    /// after it.
    pub dependents: IndexSet<StepId>,
    /// Variable requirements, keyed by requirement key.
    pub requirements: IndexMap<String, OperationRequirement>,
    /// Where the step's entity selection sits inside `definition`.
    pub source_path: SelectionPath,
    /// Where in the client operation the step's data merges.
    pub target_path: SelectionPath,
    /// The lookup the step enters through, if any.
    pub lookup: Option<Arc<Lookup>>,
    /// `None` only for the fallback node query step; the executor decides
    /// where to send that one.
    pub schema_name: Option<SourceSchemaName>,
}

/// The Relay `node(id:)` dispatcher: one operation-step branch per known
/// concrete type, plus a fallback used when the runtime type is not known
/// upfront.
#[derive(Debug, Clone)]
pub struct NodeFieldPlanStep {
    pub id: StepId,
    pub response_name: Name,
    /// The client-supplied `id` argument value.
    pub id_value: Node<Value>,
    /// `@skip`/`@include` conditions guarding the node selection.
    pub conditions: Vec<Condition>,
    /// Concrete type name to the step resolving that type.
    pub branches: IndexMap<Name, Arc<OperationPlanStep>>,
    pub fallback: Arc<OperationPlanStep>,
}

#[derive(Debug, Clone)]
pub enum PlanStep {
    Operation(Arc<OperationPlanStep>),
    NodeField(Arc<NodeFieldPlanStep>),
}

impl PlanStep {
    pub fn id(&self) -> StepId {
        match self {
            PlanStep::Operation(step) => step.id,
            PlanStep::NodeField(step) => step.id,
        }
    }

    pub fn as_operation(&self) -> Option<&Arc<OperationPlanStep>> {
        match self {
            PlanStep::Operation(step) => Some(step),
            PlanStep::NodeField(_) => None,
        }
    }
}

/// The planner's output: the rewritten operation plus the ordered steps.
#[derive(Debug, Clone)]
pub struct OperationPlan {
    pub id: String,
    pub document_hash: String,
    pub short_document_hash: String,
    pub operation_type: OperationType,
    /// The client operation as received.
    pub operation: Node<Operation>,
    /// The executor-facing operation: requirement data and `__typename`
    /// discriminators injected, marked with `@fusion__requirement`.
    pub internal_operation: Node<Operation>,
    pub steps: Vec<PlanStep>,
    pub operation_step_count: u32,
    pub max_depth: u32,
    /// Peak queue length observed during the search.
    pub search_space: usize,
    /// Plan nodes expanded during the search.
    pub expanded_nodes: usize,
}

impl OperationPlan {
    pub fn find_step(&self, id: StepId) -> Option<&PlanStep> {
        self.steps.iter().find(|step| step.id() == id)
    }

    /// A serializable digest of the plan for logs and tests.
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            id: self.id.clone(),
            operation_step_count: self.operation_step_count,
            max_depth: self.max_depth,
            steps: self.steps.iter().map(step_summary).collect(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PlanSummary {
    pub id: String,
    pub operation_step_count: u32,
    pub max_depth: u32,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StepSummary {
    pub id: StepId,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependents: Vec<StepId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<(String, StepId)>,
}

fn step_summary(step: &PlanStep) -> StepSummary {
    match step {
        PlanStep::Operation(step) => StepSummary {
            id: step.id,
            kind: "operation",
            schema: step.schema_name.as_ref().map(|name| name.to_string()),
            dependents: step.dependents.iter().copied().collect(),
            requirements: step.requirements.keys().cloned().collect(),
            document: Some(step.definition.to_string()),
            branches: Vec::new(),
        },
        PlanStep::NodeField(step) => StepSummary {
            id: step.id,
            kind: "node-field",
            schema: None,
            dependents: Vec::new(),
            requirements: Vec::new(),
            document: None,
            branches: step
                .branches
                .iter()
                .map(|(type_name, branch)| (type_name.to_string(), branch.id))
                .collect(),
        },
    }
}
