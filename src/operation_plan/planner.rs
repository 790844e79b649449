//! The planner driver.
//!
//! Planning is a best-first search over immutable plan nodes. Seeding turns
//! the client operation into an initial backlog, a greedy pre-run buys an
//! upper bound for branch-and-bound pruning, and the main loop repeatedly
//! expands the cheapest node until the queue runs dry, keeping the cheapest
//! complete plan it saw. Ties between equally priced plans are broken by a
//! deterministic comparator so identical inputs always produce identical
//! output.

use crate::error::PlanError;
use crate::events::NoopEventSink;
use crate::events::PlanEventSink;
use crate::operation::definition_builder::LookupBinding;
use crate::operation::definition_builder::OperationDefinitionBuilder;
use crate::operation::has_unaliased_typename;
use crate::operation::partition::partition_by_type;
use crate::operation::partition::partition_root_fields;
use crate::operation::partition::SelectionSetPartitioner;
use crate::operation::rewrite::inject_typename;
use crate::operation::rewrite::inline_selections_at;
use crate::operation::rewrite::InlineMode;
use crate::operation::selection_set_index::SelectionSetIndexBuilder;
use crate::operation::typename_selection;
use crate::operation::RegisteredSelectionSet;
use crate::operation::SelectionPath;
use crate::operation_plan::backlog::Backlog;
use crate::operation_plan::plan_node::PlanNode;
use crate::operation_plan::queue::PlanQueue;
use crate::operation_plan::requirements::inline_lookup_requirements;
use crate::operation_plan::requirements::try_inline_field_requirements;
use crate::operation_plan::work_item::FieldRequirementWorkItem;
use crate::operation_plan::work_item::NodeFieldWorkItem;
use crate::operation_plan::work_item::NodeLookupWorkItem;
use crate::operation_plan::work_item::OperationWorkItem;
use crate::operation_plan::work_item::OperationWorkItemKind;
use crate::operation_plan::work_item::WorkItem;
use crate::operation_plan::NodeFieldPlanStep;
use crate::operation_plan::OperationPlan;
use crate::operation_plan::OperationPlanStep;
use crate::operation_plan::OperationRequirement;
use crate::operation_plan::PlanStep;
use crate::schema::CompositeSchema;
use crate::schema::Lookup;
use apollo_compiler::ast::Argument;
use apollo_compiler::ast::Value;
use apollo_compiler::ast::VariableDefinition;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::OperationType;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::Name;
use apollo_compiler::Node;
use indexmap::IndexMap;
use indexmap::IndexSet;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Weights of the cost model. The defaults make depth by far the most
/// expensive resource, keep per-step cost mild, and only start charging for
/// parallel fan-out beyond eight steps on one level.
#[derive(Debug, Clone)]
pub struct OperationPlannerOptions {
    pub depth_weight: f64,
    pub operation_weight: f64,
    pub excess_fanout_weight: f64,
    pub fanout_penalty_threshold: u32,
}

impl Default for OperationPlannerOptions {
    fn default() -> Self {
        OperationPlannerOptions {
            depth_weight: 15.0,
            operation_weight: 1.5,
            excess_fanout_weight: 3.0,
            fanout_penalty_threshold: 8,
        }
    }
}

/// Safety valve for the greedy pre-run only; the main search is bounded by
/// pruning, the greedy run by this.
const GREEDY_CYCLE_LIMIT: usize = 256;

pub struct OperationPlanner {
    schema: Arc<CompositeSchema>,
    options: Arc<OperationPlannerOptions>,
    events: Arc<dyn PlanEventSink>,
}

impl OperationPlanner {
    pub fn new(schema: Arc<CompositeSchema>) -> Self {
        OperationPlanner {
            schema,
            options: Arc::new(OperationPlannerOptions::default()),
            events: Arc::new(NoopEventSink),
        }
    }

    pub fn with_options(mut self, options: OperationPlannerOptions) -> Self {
        self.options = Arc::new(options);
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn PlanEventSink>) -> Self {
        self.events = events;
        self
    }

    /// Plans a validated client operation. Fails with
    /// [`PlanError::NoPlanFound`] when every search direction dies, and with
    /// [`PlanError::InvalidArgument`] for empty ids/hashes or an operation
    /// without selections.
    pub fn create_plan(
        &self,
        id: &str,
        hash: &str,
        short_hash: &str,
        operation_definition: Node<Operation>,
    ) -> Result<OperationPlan, PlanError> {
        let started = Instant::now();
        let operation_type = operation_definition.operation_type;

        let result =
            self.create_plan_inner(id, hash, short_hash, operation_definition, started);
        match &result {
            Ok(plan) => self.events.plan_stop(
                id,
                started.elapsed(),
                plan.search_space,
                plan.expanded_nodes,
                plan.steps.len(),
            ),
            Err(error) => self.events.plan_error(
                id,
                operation_type,
                error.kind().into(),
                started.elapsed(),
            ),
        }
        result
    }

    fn create_plan_inner(
        &self,
        id: &str,
        hash: &str,
        short_hash: &str,
        operation_definition: Node<Operation>,
        _started: Instant,
    ) -> Result<OperationPlan, PlanError> {
        if id.trim().is_empty() {
            return Err(PlanError::invalid_argument("operation id must be non-empty"));
        }
        if hash.trim().is_empty() || short_hash.trim().is_empty() {
            return Err(PlanError::invalid_argument(
                "operation hashes must be non-empty",
            ));
        }
        if operation_definition.selection_set.selections.is_empty() {
            return Err(PlanError::invalid_argument(
                "operation definition has no selections",
            ));
        }

        let seed = self.seed(short_hash, &operation_definition)?;
        self.events.plan_start(
            id,
            operation_definition.operation_type,
            seed.backlog.len(),
        );

        // Greedy pre-run: one completion, expanded cheapest-first, to arm
        // branch-and-bound pruning in the main search.
        let mut best = self.greedy_completion(seed.clone())?;
        let mut best_cost = best
            .as_ref()
            .map(|node| node.path_cost)
            .unwrap_or(f64::INFINITY);

        let mut queue = PlanQueue::new(self.schema.clone());
        queue.enqueue_branches(seed)?;

        let mut search_space = queue.len();
        let mut expanded_nodes = 0usize;
        let mut cycle = 0usize;

        while let Some((current, _)) = queue.try_dequeue() {
            cycle += 1;
            expanded_nodes += 1;
            search_space = search_space.max(queue.len() + 1);

            self.events.plan_dequeue(
                id,
                cycle,
                queue.len(),
                current
                    .backlog
                    .peek()
                    .map(WorkItem::label)
                    .unwrap_or("complete"),
                current.source_schema.as_deref(),
            );

            if current.is_complete() {
                // Equal-cost complete plans still get to the tie-break;
                // everything costlier is pruned.
                if current.best_case_cost() > best_cost {
                    continue;
                }
                let better = match &best {
                    None => true,
                    Some(incumbent) => {
                        current.path_cost < incumbent.path_cost
                            || current.path_cost == incumbent.path_cost
                                && compare_complete_plans(&current, incumbent) == Ordering::Less
                    }
                };
                if better {
                    best_cost = current.path_cost;
                    best = Some(current);
                }
                continue;
            }

            if current.best_case_cost() >= best_cost {
                continue;
            }

            let (backlog, item) = current
                .backlog
                .pop()
                .expect("incomplete plan node has a backlog item");
            self.dispatch(&mut queue, current.with_backlog(backlog), item)?;
        }

        let best = best.ok_or(PlanError::NoPlanFound)?;
        let internal_operation =
            inject_typename(&best.internal_operation_definition, &self.schema);

        Ok(OperationPlan {
            id: id.to_owned(),
            document_hash: hash.to_owned(),
            short_document_hash: short_hash.to_owned(),
            operation_type: best.operation_definition.operation_type,
            operation: best.operation_definition.clone(),
            internal_operation,
            steps: (*best.steps).clone(),
            operation_step_count: best.operation_step_count,
            max_depth: best.max_depth,
            search_space,
            expanded_nodes,
        })
    }

    /// Builds the seed plan node: root selections become root work items
    /// (one per root field for mutations, which the executor runs in step-id
    /// order), Relay `node` selections become node-field work items, and
    /// introspection selections are left for the gateway itself.
    fn seed(
        &self,
        short_hash: &str,
        operation_definition: &Node<Operation>,
    ) -> Result<PlanNode, PlanError> {
        let mut index = SelectionSetIndexBuilder::default();
        let root_path = SelectionPath::root();
        let root_id = index.register(
            root_path.clone(),
            operation_definition.selection_set.ty.clone(),
        );

        let root_partition = partition_root_fields(&operation_definition.selection_set)?;

        let mut backlog = Backlog::empty();

        for node_field in root_partition.node_fields.iter().rev() {
            let field = &node_field.field;
            let child_path = root_path.append_field(field.response_key().clone());
            let child_id = index.register(child_path.clone(), field.selection_set.ty.clone());
            let id_value = field
                .arguments
                .iter()
                .find(|argument| argument.name == "id")
                .map(|argument| argument.value.clone())
                .ok_or_else(|| {
                    PlanError::invalid_argument("node field is missing its id argument")
                })?;
            backlog = backlog.push(WorkItem::NodeField(NodeFieldWorkItem {
                field: field.clone(),
                selection_set: RegisteredSelectionSet {
                    id: child_id,
                    set: field.selection_set.clone(),
                    path: child_path,
                },
                id_value,
                conditions: node_field.conditions.clone(),
                dependents: IndexSet::new(),
                parent_depth: 0,
                estimated_depth: 1,
            }));
        }

        if let Some(plannable) = root_partition.selection_set {
            if operation_definition.operation_type == OperationType::Mutation {
                // One work item per root mutation field, first field on top;
                // the resulting steps get ascending ids in document order.
                for selection in plannable.selections.iter().rev() {
                    let slice_id = index.register_clone(
                        root_id,
                        root_path.clone(),
                        plannable.ty.clone(),
                    );
                    backlog = backlog.push(WorkItem::Operation(OperationWorkItem::root(
                        RegisteredSelectionSet {
                            id: slice_id,
                            set: SelectionSet {
                                ty: plannable.ty.clone(),
                                selections: vec![selection.clone()],
                            },
                            path: root_path.clone(),
                        },
                    )));
                }
            } else {
                backlog = backlog.push(WorkItem::Operation(OperationWorkItem::root(
                    RegisteredSelectionSet {
                        id: root_id,
                        set: plannable,
                        path: root_path.clone(),
                    },
                )));
            }
        }

        let mut seed = PlanNode {
            operation_definition: operation_definition.clone(),
            internal_operation_definition: operation_definition.clone(),
            short_document_hash: short_hash.to_owned(),
            source_schema: None,
            options: self.options.clone(),
            index: index.seal(),
            backlog,
            remaining_cost: 0.0,
            steps: Arc::new(Vec::new()),
            operation_step_count: 0,
            max_depth: 0,
            excess_fanout: 0,
            ops_per_level: Arc::new(IndexMap::new()),
            operation_step_depths: Arc::new(IndexMap::new()),
            last_requirement_id: 0,
            path_cost: 0.0,
            resolution_cost: 0.0,
        };
        seed.recompute_path_cost();
        seed.refresh_remaining_cost();
        Ok(seed)
    }

    /// Runs the work-item handlers over a one-element candidate queue,
    /// always following the cheapest branch. A completion becomes the
    /// initial pruning bound; a dead end leaves the main search unbounded.
    fn greedy_completion(&self, seed: PlanNode) -> Result<Option<PlanNode>, PlanError> {
        let mut queue = PlanQueue::new(self.schema.clone());
        queue.enqueue_branches(seed)?;

        for _ in 0..GREEDY_CYCLE_LIMIT {
            let Some((current, _)) = queue.try_dequeue() else {
                return Ok(None);
            };
            if current.is_complete() {
                return Ok(Some(current));
            }
            let (backlog, item) = current
                .backlog
                .pop()
                .expect("incomplete plan node has a backlog item");
            self.dispatch(&mut queue, current.with_backlog(backlog), item)?;
            queue.keep_best();
        }
        Ok(None)
    }

    fn dispatch(
        &self,
        queue: &mut PlanQueue,
        node: PlanNode,
        item: WorkItem,
    ) -> Result<(), PlanError> {
        match item {
            WorkItem::Operation(item) => self.plan_operation_item(queue, node, item),
            WorkItem::FieldRequirement(item) => {
                if item.lookup.is_none() {
                    self.plan_field_requirement_inline(queue, node, item)
                } else {
                    self.plan_field_requirement_lookup(queue, node, item)
                }
            }
            WorkItem::NodeField(item) => self.plan_node_field(queue, node, item),
            WorkItem::NodeLookup(item) => self.plan_node_lookup(queue, node, item),
        }
    }

    /// Handler for root and lookup selections: partition against the chosen
    /// schema, spill the rest back onto the backlog, and commit one
    /// operation step.
    fn plan_operation_item(
        &self,
        queue: &mut PlanQueue,
        mut node: PlanNode,
        item: OperationWorkItem,
    ) -> Result<(), PlanError> {
        let Some(schema_name) = item
            .lookup
            .as_ref()
            .map(|lookup| lookup.schema_name.clone())
            .or_else(|| item.target_schema.clone())
            .or_else(|| node.source_schema.clone())
        else {
            // No candidate schema was ever chosen (pure introspection seeds
            // never get here; this is a dead search direction).
            return Ok(());
        };

        let step_id = node.next_step_id();

        if let Some(lookup) = &item.lookup {
            node = inline_lookup_requirements(
                &self.schema,
                node,
                lookup,
                &item.selection_set,
                step_id,
                item.estimated_depth,
            )?;
        }

        let mut index = node.index.to_builder();
        let partitioner = SelectionSetPartitioner::new(&self.schema);
        let partition = partitioner.partition(&schema_name, &item.selection_set, &mut index)?;
        let Some(resolvable) = partition.resolvable else {
            return Ok(());
        };
        node.index = index.seal();

        let backlog = node.backlog.push_unresolvable(
            partition.unresolvable,
            Some(schema_name.clone()),
            item.estimated_depth,
        );
        let backlog = backlog.push_requirements(
            partition.fields_with_requirements,
            step_id,
            item.estimated_depth,
        );
        node = node.with_backlog(backlog);

        let operation_type = match item.kind {
            OperationWorkItemKind::Root => node.operation_definition.operation_type,
            // Entity lookups always go through the query root.
            OperationWorkItemKind::Lookup => OperationType::Query,
        };

        let mut builder = OperationDefinitionBuilder::new(&self.schema)
            .operation_type(operation_type)
            .selection_set(resolvable);

        let mut requirements = IndexMap::new();
        if let Some(lookup) = &item.lookup {
            let bound =
                self.bind_lookup_arguments(&mut node, lookup, &item.selection_set.path)?;
            for (variable, requirement) in &bound.requirements {
                builder = builder.variable(variable.clone());
                requirements.insert(requirement.key.clone(), requirement.clone());
            }
            builder = builder.lookup(LookupBinding {
                lookup: lookup.clone(),
                arguments: bound.arguments,
                response_name: None,
            });
        }

        let (definition, source_path) =
            builder.build(&node.operation_definition.variables)?;

        let step = OperationPlanStep {
            id: step_id,
            definition,
            entity_type: item.selection_set.set.ty.clone(),
            root_selection_set_id: node.index.resolve_original(item.selection_set.id),
            selection_set_ids: partition.covered_ids,
            dependents: item.dependents.clone(),
            requirements,
            source_path,
            target_path: item.selection_set.path.clone(),
            lookup: item.lookup.clone(),
            schema_name: Some(schema_name.clone()),
        };

        node.source_schema = Some(schema_name);
        let node = node.with_operation_step(step, item.estimated_depth);
        queue.enqueue_branches(node)
    }

    /// Handler for a requirement-gated field with no bound lookup: absorb its
    /// `requires` data into sibling steps and inline the field into its
    /// owning step.
    fn plan_field_requirement_inline(
        &self,
        queue: &mut PlanQueue,
        node: PlanNode,
        item: FieldRequirementWorkItem,
    ) -> Result<(), PlanError> {
        let owning = node
            .find_operation_step(item.step_id)
            .ok_or_else(|| PlanError::internal("owning step of a field requirement vanished"))?;
        let owning_schema = owning
            .schema_name
            .clone()
            .ok_or_else(|| PlanError::internal("field requirement owned by a schema-less step"))?;

        let requires = self
            .schema
            .try_get_field_resolution(&item.field.declaring_type, &item.field.field.name)
            .and_then(|resolution| resolution.requirements_for(&owning_schema).cloned())
            .unwrap_or_else(|| SelectionSet {
                ty: item.field.declaring_type.clone(),
                selections: Vec::new(),
            });

        let target = RegisteredSelectionSet {
            id: item.field.selection_set_id,
            set: SelectionSet {
                ty: item.field.declaring_type.clone(),
                selections: Vec::new(),
            },
            path: item.field.path.clone(),
        };

        let Some(mut node) = try_inline_field_requirements(
            &self.schema,
            node,
            &requires,
            &target,
            item.step_id,
            &owning_schema,
        )?
        else {
            // Nothing can provide the requirement data without a cycle;
            // the lookup branches of this item may still succeed.
            return Ok(());
        };

        // Map the field's unfilled arguments to requirement variables.
        let mut field_node = item.field.field.as_ref().clone();
        let mut new_requirements: Vec<OperationRequirement> = Vec::new();
        let unfilled: Vec<_> = item
            .field
            .field
            .definition
            .arguments
            .iter()
            .filter(|argument| {
                !field_node
                    .arguments
                    .iter()
                    .any(|supplied| supplied.name == argument.name)
            })
            .cloned()
            .collect();
        for argument in unfilled {
            let requirement_id = node.next_requirement_id();
            let key = format!("__fusion_{requirement_id}_{}", argument.name);
            let variable_name = Name::new(&key).map_err(PlanError::internal)?;
            field_node.arguments.push(Node::new(Argument {
                name: argument.name.clone(),
                value: Node::new(Value::Variable(variable_name)),
            }));
            new_requirements.push(OperationRequirement {
                key,
                ty: argument.ty.clone(),
                path: item.field.path.clone(),
                selection_map: requires.clone(),
            });
        }

        // Partition the field's own child selections; the owning schema may
        // not serve all of them.
        let mut index = node.index.to_builder();
        if !field_node.selection_set.is_empty() {
            let child_path = item
                .field
                .path
                .append_field(field_node.response_key().clone());
            let child_id = index.register(child_path.clone(), field_node.selection_set.ty.clone());
            let partitioner = SelectionSetPartitioner::new(&self.schema);
            let child_partition = partitioner.partition(
                &owning_schema,
                &RegisteredSelectionSet {
                    id: child_id,
                    set: field_node.selection_set.clone(),
                    path: child_path,
                },
                &mut index,
            )?;
            let Some(child_resolvable) = child_partition.resolvable else {
                return Ok(());
            };
            field_node.selection_set = child_resolvable;
            node.index = index.seal();
            let backlog = node.backlog.push_unresolvable(
                child_partition.unresolvable,
                Some(owning_schema.clone()),
                node.step_depth(item.step_id),
            );
            let backlog = backlog.push_requirements(
                child_partition.fields_with_requirements,
                item.step_id,
                node.step_depth(item.step_id),
            );
            node = node.with_backlog(backlog);
            index = node.index.to_builder();
        }

        // Inline the rewritten field into the owning step's document.
        let relative = item
            .field
            .path
            .relative_to(&owning.target_path)
            .ok_or_else(|| PlanError::internal("field requirement outside its owning step"))?;
        let in_definition_path = owning.source_path.join(relative);
        let definition = inline_selections_at(
            &owning.definition,
            &in_definition_path,
            &[Selection::Field(Node::new(field_node))],
            InlineMode::Merge,
            &mut index,
        )?;
        node.index = index.seal();

        let mut updated = (*owning).clone();
        updated.definition = definition;
        if !new_requirements.is_empty() {
            let mut document = updated.definition.as_ref().clone();
            for requirement in &new_requirements {
                let variable_name = Name::new(&requirement.key).map_err(PlanError::internal)?;
                document.variables.push(Node::new(VariableDefinition {
                    name: variable_name,
                    ty: requirement.ty.clone(),
                    default_value: None,
                    directives: Default::default(),
                }));
                updated
                    .requirements
                    .insert(requirement.key.clone(), requirement.clone());
            }
            updated.definition = Node::new(document);
        }
        let node = node.replace_operation_step(updated)?;
        queue.enqueue_branches(node)
    }

    /// Handler for a requirement-gated field bound to a lookup: gather the
    /// lookup's key data, then refetch the field on the lookup's schema as a
    /// new step.
    fn plan_field_requirement_lookup(
        &self,
        queue: &mut PlanQueue,
        mut node: PlanNode,
        item: FieldRequirementWorkItem,
    ) -> Result<(), PlanError> {
        let lookup = item
            .lookup
            .clone()
            .ok_or_else(|| PlanError::internal("lookup branch without a bound lookup"))?;

        let step_id = node.next_step_id();
        let target = RegisteredSelectionSet {
            id: item.field.selection_set_id,
            set: SelectionSet {
                ty: item.field.declaring_type.clone(),
                selections: Vec::new(),
            },
            path: item.field.path.clone(),
        };
        node = inline_lookup_requirements(
            &self.schema,
            node,
            &lookup,
            &target,
            step_id,
            item.estimated_depth,
        )?;

        // The field's own `requires` on the lookup schema, if any, need
        // gathering as well.
        let field_requires = self
            .schema
            .try_get_field_resolution(&item.field.declaring_type, &item.field.field.name)
            .and_then(|resolution| {
                resolution
                    .requirements_for(&lookup.schema_name)
                    .cloned()
            });

        let mut field_node = item.field.field.as_ref().clone();
        let mut requirements: IndexMap<String, OperationRequirement> = IndexMap::new();

        if let Some(requires) = &field_requires {
            let Some(inlined) = try_inline_field_requirements(
                &self.schema,
                node,
                requires,
                &target,
                step_id,
                &lookup.schema_name,
            )?
            else {
                return Ok(());
            };
            node = inlined;

            let unfilled: Vec<_> = item
                .field
                .field
                .definition
                .arguments
                .iter()
                .filter(|argument| {
                    !field_node
                        .arguments
                        .iter()
                        .any(|supplied| supplied.name == argument.name)
                })
                .cloned()
                .collect();
            for argument in unfilled {
                let requirement_id = node.next_requirement_id();
                let key = format!("__fusion_{requirement_id}_{}", argument.name);
                let variable_name = Name::new(&key).map_err(PlanError::internal)?;
                field_node.arguments.push(Node::new(Argument {
                    name: argument.name.clone(),
                    value: Node::new(Value::Variable(variable_name)),
                }));
                requirements.insert(
                    key.clone(),
                    OperationRequirement {
                        key,
                        ty: argument.ty.clone(),
                        path: item.field.path.clone(),
                        selection_map: requires.clone(),
                    },
                );
            }
        }

        // Partition the field's child selections against the lookup schema.
        let mut index = node.index.to_builder();
        let mut covered_ids = IndexSet::new();
        covered_ids.insert(index.resolve_original(item.field.selection_set_id));
        if !field_node.selection_set.is_empty() {
            let child_path = item
                .field
                .path
                .append_field(field_node.response_key().clone());
            let child_id = index.register(child_path.clone(), field_node.selection_set.ty.clone());
            let partitioner = SelectionSetPartitioner::new(&self.schema);
            let child_partition = partitioner.partition(
                &lookup.schema_name,
                &RegisteredSelectionSet {
                    id: child_id,
                    set: field_node.selection_set.clone(),
                    path: child_path,
                },
                &mut index,
            )?;
            let Some(child_resolvable) = child_partition.resolvable else {
                return Ok(());
            };
            field_node.selection_set = child_resolvable;
            covered_ids.extend(child_partition.covered_ids);
            node.index = index.seal();
            let backlog = node.backlog.push_unresolvable(
                child_partition.unresolvable,
                Some(lookup.schema_name.clone()),
                item.estimated_depth,
            );
            let backlog = backlog.push_requirements(
                child_partition.fields_with_requirements,
                step_id,
                item.estimated_depth,
            );
            node = node.with_backlog(backlog);
        } else {
            node.index = index.seal();
        }

        let entity_set = SelectionSet {
            ty: item.field.declaring_type.clone(),
            selections: vec![Selection::Field(Node::new(field_node))],
        };

        let mut builder = OperationDefinitionBuilder::new(&self.schema)
            .operation_type(OperationType::Query)
            .selection_set(entity_set);

        let bound = self.bind_lookup_arguments(&mut node, &lookup, &item.field.path)?;
        for (variable, requirement) in &bound.requirements {
            builder = builder.variable(variable.clone());
            requirements.insert(requirement.key.clone(), requirement.clone());
        }
        builder = builder.lookup(LookupBinding {
            lookup: lookup.clone(),
            arguments: bound.arguments,
            response_name: None,
        });

        let (definition, source_path) =
            builder.build(&node.operation_definition.variables)?;

        let step = OperationPlanStep {
            id: step_id,
            definition,
            entity_type: item.field.declaring_type.clone(),
            root_selection_set_id: node.index.resolve_original(item.field.selection_set_id),
            selection_set_ids: covered_ids,
            dependents: item.dependents.clone(),
            requirements,
            source_path,
            target_path: item.field.path.clone(),
            lookup: Some(lookup.clone()),
            schema_name: Some(lookup.schema_name.clone()),
        };

        node.source_schema = Some(lookup.schema_name.clone());
        let node = node.with_operation_step(step, item.estimated_depth);
        queue.enqueue_branches(node)
    }

    /// Handler for a Relay `node(id:)` selection: build the fallback query
    /// step and the dispatcher, then queue one node-lookup item per concrete
    /// type.
    fn plan_node_field(
        &self,
        queue: &mut PlanQueue,
        mut node: PlanNode,
        item: NodeFieldWorkItem,
    ) -> Result<(), PlanError> {
        let mut index = node.index.to_builder();
        let partition = partition_by_type(&self.schema, &item.selection_set, &mut index)?;
        node.index = index.seal();

        let mut shared = partition.shared;
        if !has_unaliased_typename(&shared) {
            shared.selections.push(typename_selection(false));
        }

        // The fallback fetches the shared part through the public `node`
        // field; the executor sends it wherever it pleases.
        let query_type = self.schema.query_type_name()?;
        let node_definition = self
            .schema
            .field_definition(&query_type, &apollo_compiler::name!("node"))
            .ok_or_else(|| PlanError::schema("composite schema declares no `node` field"))?;
        let entity_type = node_definition.ty.inner_named_type().clone();
        let fallback_field = Field {
            definition: node_definition,
            alias: item.field.alias.clone(),
            name: apollo_compiler::name!("node"),
            arguments: item.field.arguments.clone(),
            directives: Default::default(),
            selection_set: SelectionSet {
                ty: entity_type.clone(),
                selections: shared.selections,
            },
        };
        let response_name = item.field.response_key().clone();
        let (fallback_definition, fallback_source_path) =
            OperationDefinitionBuilder::new(&self.schema)
                .operation_type(OperationType::Query)
                .selection_set(SelectionSet {
                    ty: query_type,
                    selections: vec![Selection::Field(Node::new(fallback_field))],
                })
                .build(&node.operation_definition.variables)?;

        let fallback_id = node.next_step_id();
        let root_selection_set_id = node.index.resolve_original(item.selection_set.id);
        let fallback = OperationPlanStep {
            id: fallback_id,
            definition: fallback_definition,
            entity_type,
            root_selection_set_id,
            selection_set_ids: IndexSet::from_iter([root_selection_set_id]),
            dependents: IndexSet::new(),
            requirements: IndexMap::new(),
            source_path: fallback_source_path,
            target_path: item.selection_set.path.clone(),
            lookup: None,
            schema_name: None,
        };
        node = node.with_operation_step(fallback, item.estimated_depth);
        let fallback = node
            .find_operation_step(fallback_id)
            .expect("fallback step was just added");

        let dispatcher = NodeFieldPlanStep {
            id: node.next_step_id(),
            response_name,
            id_value: item.id_value.clone(),
            conditions: item.conditions.clone(),
            branches: IndexMap::new(),
            fallback,
        };
        node = node.with_node_field_step(dispatcher);

        let mut backlog = node.backlog.clone();
        for (type_name, per_type) in partition.by_type.iter().rev() {
            backlog = backlog.push(WorkItem::NodeLookup(NodeLookupWorkItem {
                response_name: item.field.response_key().clone(),
                type_name: type_name.clone(),
                selection_set: per_type.clone(),
                id_value: item.id_value.clone(),
                lookup: None,
                dependents: IndexSet::new(),
                parent_depth: item.estimated_depth,
                estimated_depth: item.estimated_depth + 1,
            }));
        }
        let node = node.with_backlog(backlog);
        queue.enqueue_branches(node)
    }

    /// Handler for one concrete type under a planned `node` field: build the
    /// by-id branch step and register it on the dispatcher.
    fn plan_node_lookup(
        &self,
        queue: &mut PlanQueue,
        mut node: PlanNode,
        item: NodeLookupWorkItem,
    ) -> Result<(), PlanError> {
        let lookup = item.lookup.clone().ok_or_else(|| {
            PlanError::internal("node-lookup item dispatched without a bound lookup")
        })?;
        if lookup.argument_count() != 1 {
            return Err(PlanError::internal(format!(
                "node lookup `{}` must take exactly one argument, found {}",
                lookup.field_name,
                lookup.argument_count()
            )));
        }

        let step_id = node.next_step_id();
        let mut index = node.index.to_builder();
        let partitioner = SelectionSetPartitioner::new(&self.schema);
        let partition = partitioner.partition(&lookup.schema_name, &item.selection_set, &mut index)?;
        let Some(mut resolvable) = partition.resolvable else {
            return Ok(());
        };
        node.index = index.seal();
        if !has_unaliased_typename(&resolvable) {
            resolvable.selections.push(typename_selection(false));
        }

        let backlog = node.backlog.push_unresolvable(
            partition.unresolvable,
            Some(lookup.schema_name.clone()),
            item.estimated_depth,
        );
        let backlog = backlog.push_requirements(
            partition.fields_with_requirements,
            step_id,
            item.estimated_depth,
        );
        node = node.with_backlog(backlog);

        let argument_definition = &lookup.arguments()[0];
        let argument = Node::new(Argument {
            name: argument_definition.name.clone(),
            value: item.id_value.clone(),
        });

        let (definition, source_path) = OperationDefinitionBuilder::new(&self.schema)
            .operation_type(OperationType::Query)
            .selection_set(resolvable)
            .lookup(LookupBinding {
                lookup: lookup.clone(),
                arguments: vec![argument],
                response_name: None,
            })
            .build(&node.operation_definition.variables)?;

        let step = OperationPlanStep {
            id: step_id,
            definition,
            entity_type: item.type_name.clone(),
            root_selection_set_id: node.index.resolve_original(item.selection_set.id),
            selection_set_ids: partition.covered_ids,
            dependents: item.dependents.clone(),
            requirements: IndexMap::new(),
            source_path,
            target_path: item.selection_set.path.clone(),
            lookup: Some(lookup.clone()),
            schema_name: Some(lookup.schema_name.clone()),
        };
        node.source_schema = Some(lookup.schema_name.clone());
        node = node.with_operation_step(step, item.estimated_depth);
        let branch = node
            .find_operation_step(step_id)
            .expect("branch step was just added");

        let dispatcher = node
            .steps
            .iter()
            .rev()
            .find_map(|step| match step {
                PlanStep::NodeField(dispatcher)
                    if dispatcher.response_name == item.response_name =>
                {
                    Some(dispatcher.clone())
                }
                _ => None,
            })
            .ok_or_else(|| {
                PlanError::internal("node-lookup planned without its node-field step")
            })?;
        let mut updated = (*dispatcher).clone();
        updated.branches.insert(item.type_name.clone(), branch);
        let node = node.replace_node_field_step(updated)?;

        queue.enqueue_branches(node)
    }

    /// Draws requirement ids for every argument of a lookup and produces the
    /// argument nodes, variable definitions and requirement records.
    fn bind_lookup_arguments(
        &self,
        node: &mut PlanNode,
        lookup: &Lookup,
        gather_path: &SelectionPath,
    ) -> Result<BoundLookupArguments, PlanError> {
        let mut bound = BoundLookupArguments {
            arguments: Vec::new(),
            requirements: Vec::new(),
        };
        for (argument, selection_map) in lookup.arguments().iter().zip(&lookup.requirements) {
            let requirement_id = node.next_requirement_id();
            let key = format!("__fusion_{requirement_id}_{}", argument.name);
            let variable_name = Name::new(&key).map_err(PlanError::internal)?;
            bound.arguments.push(Node::new(Argument {
                name: argument.name.clone(),
                value: Node::new(Value::Variable(variable_name.clone())),
            }));
            bound.requirements.push((
                Node::new(VariableDefinition {
                    name: variable_name,
                    ty: argument.ty.clone(),
                    default_value: None,
                    directives: Default::default(),
                }),
                OperationRequirement {
                    key,
                    ty: argument.ty.clone(),
                    path: gather_path.clone(),
                    selection_map: selection_map.clone(),
                },
            ));
        }
        Ok(bound)
    }
}

struct BoundLookupArguments {
    arguments: Vec<Node<Argument>>,
    requirements: Vec<(Node<VariableDefinition>, OperationRequirement)>,
}

/// The deterministic tie-break between complete plans of equal path cost.
/// Lexicographic: fewer operation steps, fewer steps overall, then the
/// step-by-step key, then the current schema name.
pub(crate) fn compare_complete_plans(a: &PlanNode, b: &PlanNode) -> Ordering {
    a.operation_step_count
        .cmp(&b.operation_step_count)
        .then_with(|| a.steps.len().cmp(&b.steps.len()))
        .then_with(|| {
            for (step_a, step_b) in a.steps.iter().zip(b.steps.iter()) {
                let ordering = compare_steps(step_a, step_b);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        })
        .then_with(|| a.source_schema.cmp(&b.source_schema))
}

fn compare_steps(a: &PlanStep, b: &PlanStep) -> Ordering {
    let rank = |step: &PlanStep| match step {
        // Operation steps rank before node-field steps at equal position.
        PlanStep::Operation(_) => 0u8,
        PlanStep::NodeField(_) => 1u8,
    };
    a.id()
        .cmp(&b.id())
        .then_with(|| rank(a).cmp(&rank(b)))
        .then_with(|| match (a, b) {
            (PlanStep::Operation(a), PlanStep::Operation(b)) => {
                let schema = |step: &OperationPlanStep| {
                    step.schema_name
                        .as_ref()
                        .map(|name| name.to_string())
                        .unwrap_or_default()
                };
                schema(a)
                    .cmp(&schema(b))
                    .then_with(|| a.root_selection_set_id.cmp(&b.root_selection_set_id))
                    .then_with(|| {
                        a.definition
                            .selection_set
                            .selections
                            .len()
                            .cmp(&b.definition.selection_set.selections.len())
                    })
                    .then_with(|| {
                        let name = |step: &OperationPlanStep| {
                            step.definition
                                .name
                                .as_ref()
                                .map(|name| name.to_string())
                                .unwrap_or_default()
                        };
                        name(a).cmp(&name(b))
                    })
            }
            _ => Ordering::Equal,
        })
}
