//! The plan-node priority queue and per-kind branch expansion.
//!
//! The queue is a stable min-heap over [`score_node`]: equal scores pop in
//! insertion order, which the deterministic tie-break relies on. Branching
//! happens at enqueue time: [`PlanQueue::enqueue_branches`] looks at the next
//! backlog item and enqueues one plan node per viable way of resolving it
//! (candidate schema, candidate lookup, inline-vs-lookup), leaving the heavy
//! lifting of actually building steps to the planner's handlers.

use crate::error::PlanError;
use crate::operation::RegisteredSelectionSet;
use crate::operation::SelectionPath;
use crate::operation::SelectionPathSegment;
use crate::operation_plan::cost::score_node;
use crate::operation_plan::plan_node::PlanNode;
use crate::operation_plan::work_item::NodeLookupWorkItem;
use crate::operation_plan::work_item::OperationWorkItem;
use crate::operation_plan::work_item::OperationWorkItemKind;
use crate::operation_plan::work_item::WorkItem;
use crate::schema::CompositeSchema;
use crate::schema::SourceSchemaName;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::Node;
use indexmap::IndexSet;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

struct QueueEntry {
    score: f64,
    seq: u64,
    node: Box<PlanNode>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // Reversed on both keys: `BinaryHeap` is a max-heap, we want the lowest
    // score first and, on ties, the earliest insertion.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub(crate) struct PlanQueue {
    schema: Arc<CompositeSchema>,
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

impl PlanQueue {
    pub(crate) fn new(schema: Arc<CompositeSchema>) -> Self {
        PlanQueue {
            schema,
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }

    pub(crate) fn enqueue(&mut self, node: PlanNode) {
        let score = score_node(&node, &self.schema);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueueEntry {
            score,
            seq,
            node: Box::new(node),
        });
    }

    pub(crate) fn try_dequeue(&mut self) -> Option<(PlanNode, f64)> {
        let entry = self.heap.pop()?;
        Some((*entry.node, entry.score))
    }

    pub(crate) fn try_peek(&self) -> Option<(&PlanNode, f64)> {
        let entry = self.heap.peek()?;
        Some((&entry.node, entry.score))
    }

    /// Drops everything but the cheapest entry (greedy pre-run).
    pub(crate) fn keep_best(&mut self) {
        if let Some(best) = self.heap.pop() {
            self.heap.clear();
            self.heap.push(best);
        }
    }

    /// Expands the template into one enqueued node per way of resolving the
    /// next backlog item. Producing no branch at all is how hopeless search
    /// directions die.
    pub(crate) fn enqueue_branches(&mut self, mut template: PlanNode) -> Result<(), PlanError> {
        template.resolution_cost = 0.0;

        let Some(item) = template.backlog.peek() else {
            self.enqueue(template);
            return Ok(());
        };

        match item {
            // Node-field branching happens in the planner driver.
            WorkItem::NodeField(_) => self.enqueue(template),
            WorkItem::Operation(operation_item) => match operation_item.kind {
                OperationWorkItemKind::Root => self.enqueue_root_branches(template),
                OperationWorkItemKind::Lookup => {
                    if operation_item.lookup.is_some() || operation_item.target_schema.is_some() {
                        self.enqueue(template);
                    } else {
                        let item = operation_item.clone();
                        self.enqueue_lookup_branches(template, item)?;
                    }
                }
            },
            WorkItem::FieldRequirement(requirement_item) => {
                if requirement_item.lookup.is_some() {
                    self.enqueue(template);
                } else {
                    let item = requirement_item.clone();
                    self.enqueue_field_requirement_branches(template, item);
                }
            }
            WorkItem::NodeLookup(node_lookup_item) => {
                if node_lookup_item.lookup.is_some() {
                    self.enqueue(template);
                } else {
                    let item = node_lookup_item.clone();
                    self.enqueue_node_lookup_branches(template, item);
                }
            }
        }
        Ok(())
    }

    /// One branch per candidate source schema for the root selections, cost
    /// seeded with the schema's fit. No candidate at all (pure introspection)
    /// enqueues the template untouched.
    fn enqueue_root_branches(&mut self, template: PlanNode) {
        let WorkItem::Operation(item) = template.backlog.peek().expect("peeked above") else {
            unreachable!("root branching dispatched on an operation item");
        };
        let candidates = self.schema.possible_schemas(&item.selection_set.set);
        if candidates.is_empty() {
            self.enqueue(template);
            return;
        }
        for fit in candidates {
            let mut branch = template.clone();
            branch.source_schema = Some(fit.schema_name.clone());
            branch.resolution_cost = fit.cost;
            self.enqueue(branch);
        }
    }

    fn enqueue_lookup_branches(
        &mut self,
        template: PlanNode,
        item: OperationWorkItem,
    ) -> Result<(), PlanError> {
        let (popped_backlog, _) = template.backlog.pop().expect("peeked above");
        let popped = template.with_backlog(popped_backlog);

        let candidates: Vec<_> = self
            .schema
            .possible_schemas(&item.selection_set.set)
            .into_iter()
            .filter(|fit| item.from_schema.as_deref() != Some(fit.schema_name.as_ref()))
            .collect();

        // A remainder at the operation root needs no entity lookup; any
        // candidate schema serves it from its own root.
        if item.selection_set.path.is_root() {
            for fit in candidates {
                let mut rebound = item.clone();
                rebound.target_schema = Some(fit.schema_name.clone());
                self.push_rebound(&popped, WorkItem::Operation(rebound));
            }
            return Ok(());
        }

        let entity = item.selection_set.set.ty.clone();
        let candidate_names: IndexSet<SourceSchemaName> = candidates
            .iter()
            .map(|fit| fit.schema_name.clone())
            .collect();

        let mut produced = false;
        for fit in &candidates {
            let viable_elsewhere: IndexSet<SourceSchemaName> = candidate_names
                .iter()
                .filter(|name| **name != fit.schema_name)
                .cloned()
                .collect();
            let lookups = match self.schema.try_get_best_direct_lookup(
                &entity,
                &viable_elsewhere,
                &fit.schema_name,
            ) {
                Some(best) => vec![best],
                None => self
                    .schema
                    .possible_lookups_ordered(&entity, Some(fit.schema_name.as_ref())),
            };
            for lookup in lookups {
                produced = true;
                let mut rebound = item.clone();
                rebound.target_schema = Some(lookup.schema_name.clone());
                rebound.lookup = Some(lookup);
                self.push_rebound(&popped, WorkItem::Operation(rebound));
            }
        }

        if !produced {
            produced = self.enqueue_path_walk_branches(&popped, &item)?;
        }
        if !produced {
            tracing::trace!(
                path = %item.selection_set.path,
                entity = %entity,
                "no lookup found for unresolved selection; abandoning direction"
            );
        }
        Ok(())
    }

    /// Walks the operation path upward looking for an ancestor entity some
    /// schema declares a lookup on, and re-plans the unresolved selections as
    /// a field chain hanging off that ancestor.
    fn enqueue_path_walk_branches(
        &mut self,
        popped: &PlanNode,
        item: &OperationWorkItem,
    ) -> Result<bool, PlanError> {
        let mut produced = false;
        let mut ancestor = item.selection_set.path.parent();

        while let Some(path) = ancestor {
            if path.is_root() {
                break;
            }
            let Some(ancestor_id) = popped.index.get_by_path(&path) else {
                ancestor = path.parent();
                continue;
            };
            let ancestor_type = popped
                .index
                .info(ancestor_id)
                .ok_or_else(|| PlanError::internal("registered id without info"))?
                .ty
                .clone();

            for lookup in self.schema.possible_lookups_ordered(&ancestor_type, None) {
                if item.from_schema.as_deref() == Some(lookup.schema_name.as_ref()) {
                    continue;
                }
                let Some(chain) = build_selection_chain(
                    &popped.internal_operation_definition,
                    &path,
                    &item.selection_set.path,
                    &item.selection_set.set,
                ) else {
                    continue;
                };

                let mut index = popped.index.to_builder();
                let clone_id = index.register_clone(
                    index.resolve_original(ancestor_id),
                    path.clone(),
                    ancestor_type.clone(),
                );
                let mut branch = popped.clone();
                branch.index = index.seal();

                let mut rebound = item.clone();
                rebound.target_schema = Some(lookup.schema_name.clone());
                rebound.lookup = Some(lookup);
                rebound.selection_set = RegisteredSelectionSet {
                    id: clone_id,
                    set: chain,
                    path: path.clone(),
                };

                let backlog = branch.backlog.push(WorkItem::Operation(rebound));
                self.enqueue(branch.with_backlog(backlog));
                produced = true;
            }

            // The nearest ancestor that offers any lookup wins.
            if produced {
                break;
            }
            ancestor = path.parent();
        }
        Ok(produced)
    }

    /// Branch (a): leave the item unbound and let the handler inline the
    /// requirement into sibling steps. Branches (b): refetch the field on
    /// another owning schema through a lookup on the declaring type.
    fn enqueue_field_requirement_branches(
        &mut self,
        template: PlanNode,
        item: crate::operation_plan::work_item::FieldRequirementWorkItem,
    ) {
        self.enqueue(template.clone());

        let owning_schema = template
            .find_operation_step(item.step_id)
            .and_then(|step| step.schema_name.clone());
        let Some(resolution) = self
            .schema
            .try_get_field_resolution(&item.field.declaring_type, &item.field.field.name)
        else {
            return;
        };

        let (popped_backlog, _) = template.backlog.pop().expect("peeked above");
        let popped = template.with_backlog(popped_backlog);

        for schema_name in &resolution.schemas {
            if owning_schema.as_ref() == Some(schema_name) {
                continue;
            }
            let lookups = match self.schema.try_get_best_direct_lookup(
                &item.field.declaring_type,
                &IndexSet::new(),
                schema_name,
            ) {
                Some(best) => vec![best],
                None => self
                    .schema
                    .possible_lookups_ordered(&item.field.declaring_type, Some(schema_name.as_ref())),
            };
            for lookup in lookups {
                let mut rebound = item.clone();
                rebound.lookup = Some(lookup);
                self.push_rebound(&popped, WorkItem::FieldRequirement(rebound));
            }
        }
    }

    /// Binds a by-id lookup for one concrete type under a `node` field: per
    /// candidate schema first, otherwise the globally best by-id lookup.
    fn enqueue_node_lookup_branches(&mut self, template: PlanNode, item: NodeLookupWorkItem) {
        let (popped_backlog, _) = template.backlog.pop().expect("peeked above");
        let popped = template.with_backlog(popped_backlog);

        let mut produced = false;
        for fit in self.schema.possible_schemas(&item.selection_set.set) {
            if let Some(lookup) = self
                .schema
                .best_by_id_lookup(&item.type_name, Some(fit.schema_name.as_ref()))
            {
                produced = true;
                let mut rebound = item.clone();
                rebound.lookup = Some(lookup);
                self.push_rebound(&popped, WorkItem::NodeLookup(rebound));
            }
        }
        if !produced {
            if let Some(lookup) = self.schema.best_by_id_lookup(&item.type_name, None) {
                let mut rebound = item.clone();
                rebound.lookup = Some(lookup);
                self.push_rebound(&popped, WorkItem::NodeLookup(rebound));
            }
        }
    }

    fn push_rebound(&mut self, popped: &PlanNode, item: WorkItem) {
        let backlog = popped.backlog.push(item);
        let branch = popped.clone().with_backlog(backlog);
        self.enqueue(branch);
    }
}

/// Rebuilds the field chain from `ancestor_path` down to `target_path` out of
/// the operation document, with `target_set` as the innermost selections.
fn build_selection_chain(
    operation: &Node<Operation>,
    ancestor_path: &SelectionPath,
    target_path: &SelectionPath,
    target_set: &SelectionSet,
) -> Option<SelectionSet> {
    let relative = target_path.relative_to(ancestor_path)?;
    if relative.is_empty() {
        return Some(target_set.clone());
    }

    // Collect the selection nodes along the full path from the root.
    let full = target_path.relative_to(&SelectionPath::root())?;
    let mut sets = Vec::new();
    let mut current = &operation.selection_set;
    for segment in full {
        let selection = current.selections.iter().find(|selection| match (segment, selection) {
            (SelectionPathSegment::Field(response_name), Selection::Field(field)) => {
                field.response_key() == response_name
            }
            (
                SelectionPathSegment::InlineFragment(condition),
                Selection::InlineFragment(inline),
            ) => inline.type_condition.as_ref() == Some(condition),
            _ => false,
        })?;
        sets.push((current.ty.clone(), selection.clone()));
        current = match selection {
            Selection::Field(field) => &field.selection_set,
            Selection::InlineFragment(inline) => &inline.selection_set,
            Selection::FragmentSpread(_) => return None,
        };
    }

    // Rebuild innermost-first over the segments below the ancestor.
    let below = &sets[sets.len() - relative.len()..];
    let mut inner = target_set.clone();
    for (parent_ty, selection) in below.iter().rev() {
        let wrapped = match selection {
            Selection::Field(field) => {
                let mut field = field.as_ref().clone();
                field.selection_set = inner;
                Selection::Field(Node::new(field))
            }
            Selection::InlineFragment(inline) => {
                let mut inline = inline.as_ref().clone();
                inline.selection_set = inner;
                Selection::InlineFragment(Node::new(inline))
            }
            Selection::FragmentSpread(_) => return None,
        };
        inner = SelectionSet {
            ty: parent_ty.clone(),
            selections: vec![wrapped],
        };
    }
    Some(inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation_plan::backlog::Backlog;
    use crate::operation_plan::planner::OperationPlannerOptions;
    use crate::operation::selection_set_index::SelectionSetIndex;
    use apollo_compiler::executable::Operation;
    use apollo_compiler::executable::OperationType;
    use apollo_compiler::name;
    use indexmap::IndexMap;

    fn schema() -> Arc<CompositeSchema> {
        Arc::new(
            CompositeSchema::parse(
                r#"
                directive @fusion__field(schema: String!, requires: String) repeatable on FIELD_DEFINITION
                type Query { ping: String @fusion__field(schema: "S1") }
                "#,
            )
            .unwrap(),
        )
    }

    fn node(resolution_cost: f64, hash: &str) -> PlanNode {
        let operation = Node::new(Operation {
            operation_type: OperationType::Query,
            name: None,
            variables: Vec::new(),
            directives: Default::default(),
            selection_set: SelectionSet {
                ty: name!("Query"),
                selections: Vec::new(),
            },
        });
        PlanNode {
            operation_definition: operation.clone(),
            internal_operation_definition: operation,
            short_document_hash: hash.to_owned(),
            source_schema: None,
            options: Arc::new(OperationPlannerOptions::default()),
            index: SelectionSetIndex::default(),
            backlog: Backlog::empty(),
            remaining_cost: 0.0,
            steps: Arc::new(Vec::new()),
            operation_step_count: 0,
            max_depth: 0,
            excess_fanout: 0,
            ops_per_level: Arc::new(IndexMap::new()),
            operation_step_depths: Arc::new(IndexMap::new()),
            last_requirement_id: 0,
            path_cost: 0.0,
            resolution_cost,
        }
    }

    #[test]
    fn equal_scores_dequeue_in_insertion_order() {
        let mut queue = PlanQueue::new(schema());
        queue.enqueue(node(1.0, "first"));
        queue.enqueue(node(1.0, "second"));
        queue.enqueue(node(0.5, "cheapest"));

        let (top, _) = queue.try_peek().unwrap();
        assert_eq!(top.short_document_hash, "cheapest");

        let order: Vec<String> = std::iter::from_fn(|| {
            queue
                .try_dequeue()
                .map(|(node, _)| node.short_document_hash)
        })
        .collect();
        assert_eq!(order, vec!["cheapest", "first", "second"]);
    }

    #[test]
    fn keep_best_retains_only_the_cheapest() {
        let mut queue = PlanQueue::new(schema());
        queue.enqueue(node(3.0, "worse"));
        queue.enqueue(node(2.0, "best"));
        queue.keep_best();

        assert_eq!(queue.len(), 1);
        let (only, score) = queue.try_dequeue().unwrap();
        assert_eq!(only.short_document_hash, "best");
        assert_eq!(score, 2.0);
        assert!(queue.is_empty());
    }
}
