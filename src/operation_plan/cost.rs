//! The cost model.
//!
//! Two families of numbers drive the search. *Committed* cost (path cost)
//! lives on the plan node and reflects the steps already built. *Projected*
//! cost lives here: an admissible lower bound on completing whatever is still
//! on the backlog, maintained incrementally as items are pushed and popped,
//! plus a dequeue-time tweak that looks one work item ahead. The bound never
//! overestimates, so pruning against the best complete plan is safe.

use crate::operation_plan::plan_node::PlanNode;
use crate::operation_plan::planner::OperationPlannerOptions;
use crate::operation_plan::work_item::WorkItem;
use crate::schema::CompositeSchema;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use indexmap::IndexMap;
use indexmap::IndexSet;

/// Cheapest conceivable cost of one additional operation step.
pub(crate) const OPERATION_STEP_COST: f64 = 10.0;
/// Cheapest conceivable cost of satisfying a requirement through a lookup.
pub(crate) const REQUIREMENT_LOOKUP_COST: f64 = 12.0;
/// Optimistic cost of inlining a requirement into an existing step.
pub(crate) const INLINE_LIKELY_COST: f64 = 1.0;
/// Sentinel counted into the spillover set when the current schema owns a
/// field but only behind requirements.
pub(crate) const REQUIREMENT_SPILLOVER_MARKER: &str = "$requirement$";

/// Aggregate cost of a backlog: the minimum cost of completing every item,
/// the deepest level any item can introduce a step at, and how many steps
/// could land on each level.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BacklogCost {
    pub min_cost: f64,
    pub max_projected_depth: u32,
    pub projected_ops_per_level: IndexMap<u32, u32>,
}

impl BacklogCost {
    pub fn empty() -> Self {
        BacklogCost::default()
    }

    /// Cost after pushing `item`; O(1).
    pub(crate) fn add(&self, item: &WorkItem) -> Self {
        let mut next = self.clone();
        next.min_cost += work_item_min_cost(item);
        if produces_operation_step(item) {
            let depth = item.estimated_depth();
            *next.projected_ops_per_level.entry(depth).or_insert(0) += 1;
            next.max_projected_depth = next.max_projected_depth.max(depth);
        }
        next
    }

    /// Cost after popping `item`; clamps at zero and drops empty levels.
    pub(crate) fn remove(&self, item: &WorkItem) -> Self {
        let mut next = self.clone();
        next.min_cost = (next.min_cost - work_item_min_cost(item)).max(0.0);
        if produces_operation_step(item) {
            let depth = item.estimated_depth();
            if let Some(count) = next.projected_ops_per_level.get_mut(&depth) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    next.projected_ops_per_level.shift_remove(&depth);
                    if depth == next.max_projected_depth {
                        next.max_projected_depth = next
                            .projected_ops_per_level
                            .keys()
                            .copied()
                            .max()
                            .unwrap_or(0);
                    }
                }
            }
        }
        next
    }
}

/// The cheapest way each kind of work item can possibly complete.
fn work_item_min_cost(item: &WorkItem) -> f64 {
    match item {
        WorkItem::Operation(_) => OPERATION_STEP_COST,
        WorkItem::FieldRequirement(requirement) => {
            if requirement.lookup.is_some() {
                REQUIREMENT_LOOKUP_COST
            } else {
                INLINE_LIKELY_COST
            }
        }
        WorkItem::NodeField(node_field) => {
            let branches = distinct_type_conditions(&node_field.selection_set.set);
            OPERATION_STEP_COST + branches as f64 * OPERATION_STEP_COST
        }
        WorkItem::NodeLookup(_) => OPERATION_STEP_COST,
    }
}

/// Whether completing the item is guaranteed to add an operation step.
/// Inline field requirements are the one kind that may resolve for free.
fn produces_operation_step(item: &WorkItem) -> bool {
    !matches!(
        item,
        WorkItem::FieldRequirement(requirement) if requirement.lookup.is_none()
    )
}

fn distinct_type_conditions(selection_set: &SelectionSet) -> usize {
    let mut conditions = IndexSet::new();
    collect_type_conditions(selection_set, &mut conditions);
    conditions.len()
}

fn collect_type_conditions(selection_set: &SelectionSet, into: &mut IndexSet<apollo_compiler::Name>) {
    for selection in &selection_set.selections {
        match selection {
            Selection::InlineFragment(inline) => {
                if let Some(condition) = &inline.type_condition {
                    into.insert(condition.clone());
                }
                collect_type_conditions(&inline.selection_set, into);
            }
            Selection::Field(field) => collect_type_conditions(&field.selection_set, into),
            Selection::FragmentSpread(_) => {}
        }
    }
}

/// Admissible lower bound for completing the backlog: its minimum item
/// costs, plus the depth the backlog must still reach beyond the current
/// maximum, plus only the *additional* excess fan-out backlog items can
/// introduce at each level.
pub(crate) fn estimate_remaining_cost(
    options: &OperationPlannerOptions,
    current_max_depth: u32,
    current_ops_per_level: &IndexMap<u32, u32>,
    backlog_cost: &BacklogCost,
) -> f64 {
    let mut total = backlog_cost.min_cost;

    total += backlog_cost.max_projected_depth.saturating_sub(current_max_depth) as f64
        * options.depth_weight;

    let threshold = options.fanout_penalty_threshold;
    for (depth, projected) in &backlog_cost.projected_ops_per_level {
        let current = current_ops_per_level.get(depth).copied().unwrap_or(0);
        let combined_excess = (current + projected).saturating_sub(threshold);
        let current_excess = current.saturating_sub(threshold);
        total += (combined_excess - current_excess) as f64 * options.excess_fanout_weight;
    }

    total
}

/// Priority of a plan node in the queue: its total cost plus a one-item
/// lookahead on the backlog head.
pub(crate) fn score_node(node: &PlanNode, schema: &CompositeSchema) -> f64 {
    node.total_cost() + peek_tweak(node, schema)
}

fn peek_tweak(node: &PlanNode, schema: &CompositeSchema) -> f64 {
    match node.backlog.peek() {
        Some(WorkItem::Operation(item)) => {
            let schema_name = item
                .target_schema
                .as_deref()
                .or(node.source_schema.as_deref());
            match schema_name {
                Some(schema_name) => {
                    schema.spillover_schema_count(
                        &item.selection_set.set,
                        schema_name,
                        REQUIREMENT_SPILLOVER_MARKER,
                    ) as f64
                        * OPERATION_STEP_COST
                }
                None => 0.0,
            }
        }
        Some(WorkItem::FieldRequirement(item)) if item.lookup.is_none() => {
            let target = node.index.resolve_original(item.field.selection_set_id);
            let covered_elsewhere = node.steps.iter().any(|step| {
                step.as_operation().is_some_and(|step| {
                    step.id != item.step_id && step.selection_set_ids.contains(&target)
                })
            });
            if covered_elsewhere {
                0.0
            } else {
                OPERATION_STEP_COST - INLINE_LIKELY_COST
            }
        }
        _ => 0.0,
    }
}
