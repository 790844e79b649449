//! Selection-set partitioning.
//!
//! The main partitioner splits a selection set into the part one source
//! schema can serve, the per-position remainders other schemas must serve,
//! and the fields the schema serves only once their `requires` data is
//! available. The two auxiliary partitioners slice Relay `node` selections:
//! one separates `node` fields from the rest of the root, the other splits a
//! `node` child set by concrete type condition.

use crate::error::PlanError;
use crate::operation::extract_conditions;
use crate::operation::selection_set_index::SelectionSetId;
use crate::operation::selection_set_index::SelectionSetIndexBuilder;
use crate::operation::Condition;
use crate::operation::FieldSelection;
use crate::operation::RegisteredSelectionSet;
use crate::operation::SelectionPath;
use crate::operation::NODE_FIELD_NAME;
use crate::schema::CompositeSchema;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::Name;
use apollo_compiler::Node;
use indexmap::IndexMap;
use indexmap::IndexSet;

/// Output of [`SelectionSetPartitioner::partition`].
#[derive(Debug)]
pub struct PartitionResult {
    /// What the schema can serve at the target position, `None` when it can
    /// serve nothing there. The set may be empty when everything the schema
    /// owns at this position is requirement-gated, or when the position's
    /// whole content spilled into a remainder and a lookup on its type will
    /// inject key fields here.
    pub resolvable: Option<SelectionSet>,
    /// Remainders other schemas must serve, outermost first. Each is a clone
    /// of the logical set it was carved out of.
    pub unresolvable: Vec<RegisteredSelectionSet>,
    /// Fields the schema owns but cannot resolve until their `requires` data
    /// is available.
    pub fields_with_requirements: Vec<FieldSelection>,
    /// Original ids of every logical selection set the resolvable part spans.
    pub covered_ids: IndexSet<SelectionSetId>,
}

pub struct SelectionSetPartitioner<'a> {
    schema: &'a CompositeSchema,
}

impl<'a> SelectionSetPartitioner<'a> {
    pub fn new(schema: &'a CompositeSchema) -> Self {
        SelectionSetPartitioner { schema }
    }

    pub fn partition(
        &self,
        schema_name: &str,
        target: &RegisteredSelectionSet,
        index: &mut SelectionSetIndexBuilder,
    ) -> Result<PartitionResult, PlanError> {
        let mut out = PartitionOutput::default();
        out.covered_ids.insert(index.resolve_original(target.id));
        let resolvable = self.partition_set(
            schema_name,
            &target.set,
            target.id,
            &target.path,
            index,
            &mut out,
        )?;
        // Nested sets survive empty as anchors for descendant lookups, but a
        // schema that keeps nothing at the target position itself serves
        // nothing here at all.
        let resolvable = resolvable.filter(|set| {
            !set.selections.is_empty()
                || out
                    .fields_with_requirements
                    .iter()
                    .any(|field| field.path == target.path)
        });
        if resolvable.is_none() {
            out.covered_ids.clear();
        }
        Ok(PartitionResult {
            resolvable,
            unresolvable: out.unresolvable,
            fields_with_requirements: out.fields_with_requirements,
            covered_ids: out.covered_ids,
        })
    }

    fn partition_set(
        &self,
        schema_name: &str,
        set: &SelectionSet,
        set_id: SelectionSetId,
        path: &SelectionPath,
        index: &mut SelectionSetIndexBuilder,
        out: &mut PartitionOutput,
    ) -> Result<Option<SelectionSet>, PlanError> {
        let parent_type = &set.ty;
        let mut kept: Vec<Selection> = Vec::new();
        let mut remainder: Vec<Selection> = Vec::new();
        let mut requirements_here = false;

        for selection in &set.selections {
            match selection {
                Selection::Field(field) => {
                    if field.name.as_str().starts_with("__") {
                        // Meta fields are served by the gateway on any schema.
                        kept.push(selection.clone());
                        continue;
                    }
                    let Some(resolution) =
                        self.schema.try_get_field_resolution(parent_type, &field.name)
                    else {
                        remainder.push(selection.clone());
                        continue;
                    };
                    if !resolution.contains_schema(schema_name) {
                        remainder.push(selection.clone());
                        continue;
                    }
                    if resolution.has_requirements(schema_name) {
                        out.fields_with_requirements.push(FieldSelection {
                            field: field.clone(),
                            declaring_type: parent_type.clone(),
                            field_type: field.definition.ty.inner_named_type().clone(),
                            selection_set_id: index.resolve_original(set_id),
                            path: path.clone(),
                        });
                        requirements_here = true;
                        continue;
                    }
                    if field.selection_set.is_empty() {
                        kept.push(selection.clone());
                        continue;
                    }
                    let child_path = path.append_field(field.response_key().clone());
                    let child_id =
                        index.register(child_path.clone(), field.selection_set.ty.clone());
                    let child_kept = self.partition_set(
                        schema_name,
                        &field.selection_set,
                        child_id,
                        &child_path,
                        index,
                        out,
                    )?;
                    match child_kept {
                        Some(child_set) => {
                            out.covered_ids.insert(index.resolve_original(child_id));
                            let mut new_field = field.as_ref().clone();
                            new_field.selection_set = child_set;
                            kept.push(Selection::Field(Node::new(new_field)));
                        }
                        // The schema serves nothing below this field; some
                        // other schema refetches the whole subtree.
                        None => remainder.push(selection.clone()),
                    }
                }
                Selection::InlineFragment(inline) => {
                    let condition = inline
                        .type_condition
                        .clone()
                        .unwrap_or_else(|| parent_type.clone());
                    let fragment_path = path.append_inline_fragment(condition);
                    let fragment_id =
                        index.register(fragment_path.clone(), inline.selection_set.ty.clone());
                    let fragment_kept = self.partition_set(
                        schema_name,
                        &inline.selection_set,
                        fragment_id,
                        &fragment_path,
                        index,
                        out,
                    )?;
                    match fragment_kept {
                        Some(fragment_set) => {
                            out.covered_ids.insert(index.resolve_original(fragment_id));
                            let mut new_inline = inline.as_ref().clone();
                            new_inline.selection_set = fragment_set;
                            kept.push(Selection::InlineFragment(Node::new(new_inline)));
                        }
                        None => remainder.push(selection.clone()),
                    }
                }
                Selection::FragmentSpread(_) => {
                    return Err(PlanError::internal(
                        "fragment spreads must be expanded before planning",
                    ));
                }
            }
        }

        if kept.is_empty() && !requirements_here {
            // A set that keeps nothing can only stand as an anchor when a
            // lookup on its type can later inject key fields at this
            // position. Otherwise returning `None` makes the caller carve
            // out the whole enclosing field, so no empty sub-selection is
            // ever committed to a step document.
            if remainder.is_empty() || !self.schema.has_lookups(parent_type) {
                return Ok(None);
            }
        }

        if !remainder.is_empty() {
            let original = index.resolve_original(set_id);
            let clone_id = index.register_clone(original, path.clone(), parent_type.clone());
            out.unresolvable.push(RegisteredSelectionSet {
                id: clone_id,
                set: SelectionSet {
                    ty: parent_type.clone(),
                    selections: remainder,
                },
                path: path.clone(),
            });
        }

        Ok(Some(SelectionSet {
            ty: parent_type.clone(),
            selections: kept,
        }))
    }
}

#[derive(Debug, Default)]
struct PartitionOutput {
    unresolvable: Vec<RegisteredSelectionSet>,
    fields_with_requirements: Vec<FieldSelection>,
    covered_ids: IndexSet<SelectionSetId>,
}

/// Output of [`partition_by_type`]: the type-agnostic part of a `node` child
/// set plus one selection set per concrete type condition.
#[derive(Debug)]
pub struct TypePartitionResult {
    pub shared: SelectionSet,
    pub by_type: IndexMap<Name, RegisteredSelectionSet>,
}

/// Splits a Relay `node` child set into shared selections and per-concrete-
/// type selection sets. Fragments on abstract types are distributed over
/// their possible concrete types.
pub fn partition_by_type(
    schema: &CompositeSchema,
    target: &RegisteredSelectionSet,
    index: &mut SelectionSetIndexBuilder,
) -> Result<TypePartitionResult, PlanError> {
    let mut shared = Vec::new();
    let mut buckets: IndexMap<Name, Vec<Selection>> = IndexMap::new();

    for selection in &target.set.selections {
        match selection {
            Selection::Field(_) => shared.push(selection.clone()),
            Selection::InlineFragment(inline) => {
                let Some(condition) = inline.type_condition.clone() else {
                    shared.extend(inline.selection_set.selections.iter().cloned());
                    continue;
                };
                if schema.is_object_type(&condition) {
                    buckets
                        .entry(condition)
                        .or_default()
                        .extend(inline.selection_set.selections.iter().cloned());
                } else {
                    for concrete in schema.possible_types(&condition) {
                        buckets
                            .entry(concrete)
                            .or_default()
                            .extend(inline.selection_set.selections.iter().cloned());
                    }
                }
            }
            Selection::FragmentSpread(_) => {
                return Err(PlanError::internal(
                    "fragment spreads must be expanded before planning",
                ));
            }
        }
    }

    let mut by_type = IndexMap::new();
    for (type_name, selections) in buckets {
        let fragment_path = target.path.append_inline_fragment(type_name.clone());
        let id = index.register(fragment_path.clone(), type_name.clone());
        by_type.insert(
            type_name.clone(),
            RegisteredSelectionSet {
                id,
                set: SelectionSet {
                    ty: type_name,
                    selections,
                },
                path: fragment_path,
            },
        );
    }

    Ok(TypePartitionResult {
        shared: SelectionSet {
            ty: target.set.ty.clone(),
            selections: shared,
        },
        by_type,
    })
}

/// A Relay `node` selection found at the root, with the `@skip`/`@include`
/// conditions inherited from enclosing fragments.
#[derive(Debug, Clone)]
pub struct NodeRootField {
    pub field: Node<Field>,
    pub conditions: Vec<Condition>,
}

/// Output of [`partition_root_fields`].
#[derive(Debug)]
pub struct RootPartitionResult {
    /// The plannable non-node remainder of the root selection set.
    pub selection_set: Option<SelectionSet>,
    pub node_fields: Vec<NodeRootField>,
    /// Root introspection selections (`__schema`, `__type`, `__typename`);
    /// the gateway answers these itself.
    pub introspection: Vec<Selection>,
}

/// Separates Relay `node(id:)` fields and root introspection from the rest
/// of a root selection set.
pub fn partition_root_fields(
    selection_set: &SelectionSet,
) -> Result<RootPartitionResult, PlanError> {
    let mut out = RootPartitionResult {
        selection_set: None,
        node_fields: Vec::new(),
        introspection: Vec::new(),
    };
    let plannable = walk_root(selection_set, &[], &mut out)?;
    if !plannable.selections.is_empty() {
        out.selection_set = Some(plannable);
    }
    Ok(out)
}

fn walk_root(
    selection_set: &SelectionSet,
    inherited: &[Condition],
    out: &mut RootPartitionResult,
) -> Result<SelectionSet, PlanError> {
    let mut plannable = Vec::new();
    for selection in &selection_set.selections {
        match selection {
            Selection::Field(field) => {
                if field.name == NODE_FIELD_NAME {
                    let mut conditions = inherited.to_vec();
                    conditions.extend(extract_conditions(&field.directives));
                    out.node_fields.push(NodeRootField {
                        field: field.clone(),
                        conditions,
                    });
                } else if field.name.as_str().starts_with("__") {
                    out.introspection.push(selection.clone());
                } else {
                    plannable.push(selection.clone());
                }
            }
            Selection::InlineFragment(inline) => {
                let mut conditions = inherited.to_vec();
                conditions.extend(extract_conditions(&inline.directives));
                let inner = walk_root(&inline.selection_set, &conditions, out)?;
                if !inner.selections.is_empty() {
                    let mut new_inline = inline.as_ref().clone();
                    new_inline.selection_set = inner;
                    plannable.push(Selection::InlineFragment(Node::new(new_inline)));
                }
            }
            Selection::FragmentSpread(_) => {
                return Err(PlanError::internal(
                    "fragment spreads must be expanded before planning",
                ));
            }
        }
    }
    Ok(SelectionSet {
        ty: selection_set.ty.clone(),
        selections: plannable,
    })
}
