//! Requirement inlining.
//!
//! A lookup or a requirement-gated field needs data (key fields, `requires`
//! selections) gathered *before* its own step runs. Whenever an existing step
//! already covers the position that data lives at, the selections are merged
//! into that step's document instead of spawning a new fetch; the providing
//! step then gains the consumer in its `dependents`. Whatever no existing
//! step can absorb goes back onto the backlog. The original requirement
//! selections are always mirrored into the internal operation definition,
//! marked `@fusion__requirement`, so the executor can separate requirement
//! data from client data.

use crate::error::PlanError;
use crate::operation::partition::SelectionSetPartitioner;
use crate::operation::rewrite::inline_selections_at;
use crate::operation::rewrite::InlineMode;
use crate::operation::RegisteredSelectionSet;
use crate::operation_plan::plan_node::PlanNode;
use crate::operation_plan::work_item::OperationWorkItem;
use crate::operation_plan::work_item::OperationWorkItemKind;
use crate::operation_plan::work_item::WorkItem;
use crate::operation_plan::PlanStep;
use crate::operation_plan::StepId;
use crate::schema::CompositeSchema;
use crate::schema::Lookup;
use apollo_compiler::executable::SelectionSet;
use indexmap::IndexMap;
use indexmap::IndexSet;
use petgraph::algo::has_path_connecting;
use petgraph::graph::DiGraph;
use petgraph::graph::NodeIndex;

/// Whether `to` (transitively) consumes data produced by `from`, i.e. `to`
/// is reachable from `from` over the `dependents` edges.
pub(crate) fn depends_on(steps: &[PlanStep], from: StepId, to: StepId) -> bool {
    if from == to {
        return true;
    }
    let mut graph: DiGraph<StepId, ()> = DiGraph::new();
    let mut nodes: IndexMap<StepId, NodeIndex> = IndexMap::new();
    for step in steps {
        nodes.insert(step.id(), graph.add_node(step.id()));
    }
    for step in steps {
        let Some(operation) = step.as_operation() else {
            continue;
        };
        let Some(&head) = nodes.get(&operation.id) else {
            continue;
        };
        for dependent in &operation.dependents {
            if let Some(&tail) = nodes.get(dependent) {
                graph.add_edge(head, tail, ());
            }
        }
    }
    match (nodes.get(&from), nodes.get(&to)) {
        (Some(&from), Some(&to)) => has_path_connecting(&graph, from, to, None),
        _ => false,
    }
}

/// Outcome of one inlining attempt.
pub(crate) struct InlineOutcome {
    pub node: PlanNode,
    /// Selections no existing step could absorb, still at the target
    /// position.
    pub residual: Option<SelectionSet>,
}

/// Inlines all of a lookup's requirement selection maps ahead of the step
/// `consumer` being built. Residuals become new lookup work items depending
/// on the consumer.
pub(crate) fn inline_lookup_requirements(
    schema: &CompositeSchema,
    mut node: PlanNode,
    lookup: &Lookup,
    target: &RegisteredSelectionSet,
    consumer: StepId,
    consumer_depth: u32,
) -> Result<PlanNode, PlanError> {
    for requirement in &lookup.requirements {
        let outcome = inline_requirement_selections(
            schema,
            node,
            requirement,
            target,
            consumer,
            &lookup.schema_name,
            None,
        )?;
        node = outcome.node;

        if let Some(residual) = outcome.residual {
            let mut index = node.index.to_builder();
            let residual_id = index.register_clone(
                index.resolve_original(target.id),
                target.path.clone(),
                target.set.ty.clone(),
            );
            node.index = index.seal();

            let backlog = node.backlog.push(WorkItem::Operation(OperationWorkItem {
                kind: OperationWorkItemKind::Lookup,
                selection_set: RegisteredSelectionSet {
                    id: residual_id,
                    set: residual,
                    path: target.path.clone(),
                },
                lookup: None,
                from_schema: Some(lookup.schema_name.clone()),
                target_schema: None,
                dependents: IndexSet::from_iter([consumer]),
                parent_depth: consumer_depth,
                estimated_depth: consumer_depth + 1,
            }));
            node = node.with_backlog(backlog);
        }
    }
    Ok(node)
}

/// Inlines one field's `requires` selections into steps other than the
/// owning step. Returns `None` when the requirement cannot be fully
/// absorbed, in which case the caller abandons the branch.
pub(crate) fn try_inline_field_requirements(
    schema: &CompositeSchema,
    node: PlanNode,
    requirement: &SelectionSet,
    target: &RegisteredSelectionSet,
    owning_step: StepId,
    owning_schema: &str,
) -> Result<Option<PlanNode>, PlanError> {
    let outcome = inline_requirement_selections(
        schema,
        node,
        requirement,
        target,
        owning_step,
        owning_schema,
        Some(owning_step),
    )?;
    if outcome.residual.is_some() {
        return Ok(None);
    }
    Ok(Some(outcome.node))
}

/// The shared candidate walk. Merges as much of `requirement` as possible
/// into existing operation steps covering the target position, wiring
/// `consumer` into each provider's `dependents`, and mirrors the original
/// requirement selections into the internal operation definition.
fn inline_requirement_selections(
    schema: &CompositeSchema,
    mut node: PlanNode,
    requirement: &SelectionSet,
    target: &RegisteredSelectionSet,
    consumer: StepId,
    consumer_schema: &str,
    avoid_depending_on: Option<StepId>,
) -> Result<InlineOutcome, PlanError> {
    let target_original = node.index.resolve_original(target.id);
    let mut remaining = Some(requirement.clone());

    let candidate_ids: Vec<StepId> = node
        .steps
        .iter()
        .filter_map(|step| step.as_operation())
        .filter(|step| step.schema_name.is_some())
        .map(|step| step.id)
        .collect();

    for candidate_id in candidate_ids {
        let Some(rest) = remaining.take() else {
            break;
        };
        let candidate = node
            .find_operation_step(candidate_id)
            .ok_or_else(|| PlanError::internal("candidate step vanished during inlining"))?;

        let eligible = candidate.schema_name.as_deref() != Some(consumer_schema)
            && candidate.selection_set_ids.contains(&target_original)
            && avoid_depending_on
                .map_or(true, |owner| !depends_on(&node.steps, owner, candidate_id));
        if !eligible {
            remaining = Some(rest);
            continue;
        }

        let Some(relative) = target.path.relative_to(&candidate.target_path) else {
            remaining = Some(rest);
            continue;
        };

        let mut index = node.index.to_builder();
        let partitioner = SelectionSetPartitioner::new(schema);
        let candidate_schema = candidate
            .schema_name
            .clone()
            .expect("filtered to schema-bearing steps");
        let partition = partitioner.partition(
            &candidate_schema,
            &RegisteredSelectionSet {
                id: target_original,
                set: rest.clone(),
                path: target.path.clone(),
            },
            &mut index,
        )?;
        let Some(resolvable) = partition.resolvable else {
            node.index = index.seal();
            remaining = Some(rest);
            continue;
        };

        let in_definition_path = candidate.source_path.join(relative);
        let definition = inline_selections_at(
            &candidate.definition,
            &in_definition_path,
            &resolvable.selections,
            InlineMode::Merge,
            &mut index,
        )?;

        let mut updated = (*candidate).clone();
        updated.definition = definition;
        updated.selection_set_ids.extend(partition.covered_ids);
        updated.dependents.insert(consumer);
        let candidate_depth = node.step_depth(candidate_id);
        node.index = index.seal();
        node = node.replace_operation_step(updated)?;

        // Parts of the requirement this candidate's schema could not serve
        // become their own obligations, anchored at the candidate's depth.
        let top_level: Vec<_> = partition
            .unresolvable
            .iter()
            .filter(|unresolved| unresolved.path == target.path)
            .collect();
        remaining = top_level.first().map(|unresolved| unresolved.set.clone());
        let nested: Vec<RegisteredSelectionSet> = partition
            .unresolvable
            .into_iter()
            .filter(|unresolved| unresolved.path != target.path)
            .collect();
        if !nested.is_empty() {
            let mut backlog = node.backlog.clone();
            for selection_set in nested.into_iter().rev() {
                backlog = backlog.push(WorkItem::Operation(OperationWorkItem {
                    kind: OperationWorkItemKind::Lookup,
                    selection_set,
                    lookup: None,
                    from_schema: Some(candidate_schema.clone()),
                    target_schema: None,
                    dependents: IndexSet::from_iter([consumer]),
                    parent_depth: candidate_depth,
                    estimated_depth: candidate_depth + 1,
                }));
            }
            node = node.with_backlog(backlog);
        }
        if !partition.fields_with_requirements.is_empty() {
            let backlog = node.backlog.push_requirements(
                partition.fields_with_requirements,
                candidate_id,
                candidate_depth,
            );
            node = node.with_backlog(backlog);
        }
    }

    // The executor needs to see the requirement data marked apart from the
    // client's own selections.
    let mut index = node.index.to_builder();
    node.internal_operation_definition = inline_selections_at(
        &node.internal_operation_definition,
        &target.path,
        &requirement.selections,
        InlineMode::Internal,
        &mut index,
    )?;
    node.index = index.seal();

    Ok(InlineOutcome {
        node,
        residual: remaining.filter(|set| !set.selections.is_empty()),
    })
}
