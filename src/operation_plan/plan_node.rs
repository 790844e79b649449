//! The immutable search state.
//!
//! A plan node is one vertex in the search graph: the work still to do, the
//! steps already committed, and the cost counters that price both. Branching
//! clones the node; every container inside is `Arc`-shared so clones are
//! cheap and updates copy only the container they touch.

use crate::error::PlanError;
use crate::operation::selection_set_index::SelectionSetIndex;
use crate::operation_plan::backlog::Backlog;
use crate::operation_plan::cost::estimate_remaining_cost;
use crate::operation_plan::planner::OperationPlannerOptions;
use crate::operation_plan::NodeFieldPlanStep;
use crate::operation_plan::OperationPlanStep;
use crate::operation_plan::PlanStep;
use crate::operation_plan::StepId;
use crate::schema::SourceSchemaName;
use apollo_compiler::executable::Operation;
use apollo_compiler::Node;
use indexmap::IndexMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PlanNode {
    /// The client operation as received; never mutated by the search.
    pub operation_definition: Node<Operation>,
    /// The requirement-annotated operation; grows as requirements inline.
    pub internal_operation_definition: Node<Operation>,
    pub short_document_hash: String,
    /// The source schema of the most recently planned step; `None` until
    /// seeding picks one.
    pub source_schema: Option<SourceSchemaName>,
    pub options: Arc<OperationPlannerOptions>,
    pub index: SelectionSetIndex,
    pub backlog: Backlog,
    /// Admissible estimate for completing the backlog.
    pub remaining_cost: f64,
    pub steps: Arc<Vec<PlanStep>>,
    pub operation_step_count: u32,
    pub max_depth: u32,
    /// Accumulated units of fan-out beyond the penalty threshold.
    pub excess_fanout: u32,
    pub ops_per_level: Arc<IndexMap<u32, u32>>,
    pub operation_step_depths: Arc<IndexMap<StepId, u32>>,
    /// Monotonic counter embedded in requirement keys.
    pub last_requirement_id: u32,
    /// Committed cost of the steps built so far.
    pub path_cost: f64,
    /// Search-ordering tweak set per branch (e.g. schema-fit cost); not part
    /// of the committed cost.
    pub resolution_cost: f64,
}

impl PlanNode {
    /// Step ids are dense and monotonic: one past the current maximum.
    pub fn next_step_id(&self) -> StepId {
        StepId(
            self.steps
                .iter()
                .map(|step| step.id().0)
                .max()
                .unwrap_or(0)
                + 1,
        )
    }

    /// A plan is complete when nothing is left on the backlog.
    pub fn is_complete(&self) -> bool {
        self.backlog.is_empty()
    }

    pub fn best_case_cost(&self) -> f64 {
        self.path_cost + self.remaining_cost
    }

    pub fn total_cost(&self) -> f64 {
        self.path_cost + self.remaining_cost + self.resolution_cost
    }

    pub fn step_depth(&self, id: StepId) -> u32 {
        self.operation_step_depths.get(&id).copied().unwrap_or(1)
    }

    pub fn find_operation_step(&self, id: StepId) -> Option<Arc<OperationPlanStep>> {
        self.steps.iter().find_map(|step| match step {
            PlanStep::Operation(step) if step.id == id => Some(step.clone()),
            _ => None,
        })
    }

    pub(crate) fn recompute_path_cost(&mut self) {
        self.path_cost = self.max_depth as f64 * self.options.depth_weight
            + self.operation_step_count as f64 * self.options.operation_weight
            + self.excess_fanout as f64 * self.options.excess_fanout_weight;
    }

    pub(crate) fn refresh_remaining_cost(&mut self) {
        self.remaining_cost = estimate_remaining_cost(
            &self.options,
            self.max_depth,
            &self.ops_per_level,
            self.backlog.cost(),
        );
    }

    pub(crate) fn with_backlog(mut self, backlog: Backlog) -> Self {
        self.backlog = backlog;
        self.refresh_remaining_cost();
        self
    }

    /// Commits an operation step at the given depth, updating every counter
    /// the cost model reads.
    pub(crate) fn with_operation_step(mut self, step: OperationPlanStep, depth: u32) -> Self {
        let id = step.id;
        let mut steps = (*self.steps).clone();
        steps.push(PlanStep::Operation(Arc::new(step)));
        self.steps = Arc::new(steps);

        let mut depths = (*self.operation_step_depths).clone();
        depths.insert(id, depth);
        self.operation_step_depths = Arc::new(depths);

        let mut ops_per_level = (*self.ops_per_level).clone();
        let at_level = ops_per_level.entry(depth).or_insert(0);
        *at_level += 1;
        if *at_level > self.options.fanout_penalty_threshold {
            self.excess_fanout += 1;
        }
        self.ops_per_level = Arc::new(ops_per_level);

        self.operation_step_count += 1;
        self.max_depth = self.max_depth.max(depth);
        self.recompute_path_cost();
        self.refresh_remaining_cost();
        self
    }

    pub(crate) fn with_node_field_step(mut self, step: NodeFieldPlanStep) -> Self {
        let mut steps = (*self.steps).clone();
        steps.push(PlanStep::NodeField(Arc::new(step)));
        self.steps = Arc::new(steps);
        self
    }

    /// Replaces an operation step in place (same id), keeping node-field
    /// branches and fallbacks that reference it consistent.
    pub(crate) fn replace_operation_step(
        mut self,
        updated: OperationPlanStep,
    ) -> Result<Self, PlanError> {
        let id = updated.id;
        let updated = Arc::new(updated);
        let mut steps = (*self.steps).clone();
        let mut found = false;
        for step in steps.iter_mut() {
            match step {
                PlanStep::Operation(existing) if existing.id == id => {
                    *existing = updated.clone();
                    found = true;
                }
                PlanStep::NodeField(node_step) => {
                    let references = node_step.fallback.id == id
                        || node_step.branches.values().any(|branch| branch.id == id);
                    if references {
                        let mut new_node_step = (**node_step).clone();
                        if new_node_step.fallback.id == id {
                            new_node_step.fallback = updated.clone();
                        }
                        for branch in new_node_step.branches.values_mut() {
                            if branch.id == id {
                                *branch = updated.clone();
                            }
                        }
                        *node_step = Arc::new(new_node_step);
                    }
                }
                _ => {}
            }
        }
        if !found {
            return Err(PlanError::internal(format!(
                "operation step {id} not found for replacement"
            )));
        }
        self.steps = Arc::new(steps);
        Ok(self)
    }

    /// Replaces a node-field step in place (same id).
    pub(crate) fn replace_node_field_step(
        mut self,
        updated: NodeFieldPlanStep,
    ) -> Result<Self, PlanError> {
        let id = updated.id;
        let mut steps = (*self.steps).clone();
        let position = steps
            .iter()
            .position(|step| matches!(step, PlanStep::NodeField(existing) if existing.id == id))
            .ok_or_else(|| {
                PlanError::internal(format!("node-field step {id} not found for replacement"))
            })?;
        steps[position] = PlanStep::NodeField(Arc::new(updated));
        self.steps = Arc::new(steps);
        Ok(self)
    }

    /// Draws the next requirement id; keys embed this monotonic counter.
    pub(crate) fn next_requirement_id(&mut self) -> u32 {
        self.last_requirement_id += 1;
        self.last_requirement_id
    }
}
