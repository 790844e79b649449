//! Operation-tree rewriting.
//!
//! All rewrites are non-destructive: they rebuild the spine from the root to
//! the touched selection set and share every untouched subtree. Positions are
//! addressed with [`SelectionPath`] segments, which is how the index names
//! logical selection sets.

use crate::error::PlanError;
use crate::operation::has_unaliased_typename;
use crate::operation::selection_set_index::SelectionSetIndexBuilder;
use crate::operation::typename_selection;
use crate::operation::SelectionPath;
use crate::operation::SelectionPathSegment;
use crate::operation::REQUIREMENT_DIRECTIVE;
use crate::schema::CompositeSchema;
use apollo_compiler::ast::Directive;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::Node;

/// How [`inline_selections_at`] combines the new selections with the target
/// selection set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InlineMode {
    /// Union by response name / type condition, recursively.
    Merge,
    /// Append verbatim, marking each injected selection with
    /// `@fusion__requirement` and registering its sub-selection sets.
    Internal,
}

/// Unions two selection sets: fields merge by response name, inline fragments
/// by type condition, recursively; everything else appends in order.
pub(crate) fn merge_selection_sets(base: &SelectionSet, addition: &SelectionSet) -> SelectionSet {
    let mut selections = base.selections.clone();
    for incoming in &addition.selections {
        let position = match incoming {
            Selection::Field(new_field) => selections.iter().position(|candidate| {
                matches!(
                    candidate,
                    Selection::Field(field) if field.response_key() == new_field.response_key()
                )
            }),
            Selection::InlineFragment(new_inline) => selections.iter().position(|candidate| {
                matches!(
                    candidate,
                    Selection::InlineFragment(inline)
                        if inline.type_condition == new_inline.type_condition
                )
            }),
            Selection::FragmentSpread(_) => None,
        };
        let Some(position) = position else {
            selections.push(incoming.clone());
            continue;
        };
        match (&mut selections[position], incoming) {
            (Selection::Field(field), Selection::Field(new_field)) => {
                let merged = merge_selection_sets(&field.selection_set, &new_field.selection_set);
                field.make_mut().selection_set = merged;
            }
            (Selection::InlineFragment(inline), Selection::InlineFragment(new_inline)) => {
                let merged =
                    merge_selection_sets(&inline.selection_set, &new_inline.selection_set);
                inline.make_mut().selection_set = merged;
            }
            _ => unreachable!("position matched on the same selection kind"),
        }
    }
    SelectionSet {
        ty: base.ty.clone(),
        selections,
    }
}

/// Rebuilds the operation with `rewrite` applied to the selection set at the
/// given path (relative segments below the root set). Fails when the path
/// does not lead to a selection set in this operation.
pub(crate) fn rewrite_at_path(
    operation: &Node<Operation>,
    relative: &[SelectionPathSegment],
    rewrite: impl FnOnce(&SelectionSet) -> SelectionSet,
) -> Result<Node<Operation>, PlanError> {
    let new_root = rewrite_set_at_path(&operation.selection_set, relative, rewrite)?;
    let mut new_operation = operation.as_ref().clone();
    new_operation.selection_set = new_root;
    Ok(Node::new(new_operation))
}

fn matches_segment(segment: &SelectionPathSegment, selection: &Selection) -> bool {
    match (segment, selection) {
        (SelectionPathSegment::Field(response_name), Selection::Field(field)) => {
            field.response_key() == response_name
        }
        (SelectionPathSegment::InlineFragment(condition), Selection::InlineFragment(inline)) => {
            inline.type_condition.as_ref() == Some(condition)
                || inline.type_condition.is_none() && inline.selection_set.ty == *condition
        }
        _ => false,
    }
}

fn rewrite_set_at_path(
    set: &SelectionSet,
    relative: &[SelectionPathSegment],
    rewrite: impl FnOnce(&SelectionSet) -> SelectionSet,
) -> Result<SelectionSet, PlanError> {
    let Some((segment, rest)) = relative.split_first() else {
        return Ok(rewrite(set));
    };

    let position = set
        .selections
        .iter()
        .position(|selection| matches_segment(segment, selection))
        .ok_or_else(|| {
            PlanError::internal(format!(
                "selection set at segment {segment:?} not found while inlining"
            ))
        })?;

    let mut selections = set.selections.clone();
    match &mut selections[position] {
        Selection::Field(field) => {
            let rewritten = rewrite_set_at_path(&field.selection_set, rest, rewrite)?;
            field.make_mut().selection_set = rewritten;
        }
        Selection::InlineFragment(inline) => {
            let rewritten = rewrite_set_at_path(&inline.selection_set, rest, rewrite)?;
            inline.make_mut().selection_set = rewritten;
        }
        Selection::FragmentSpread(_) => {
            return Err(PlanError::internal(
                "fragment spreads must be expanded before planning",
            ));
        }
    }
    Ok(SelectionSet {
        ty: set.ty.clone(),
        selections,
    })
}

/// Inlines selections into the selection set at `target_path` (an absolute
/// path whose first segment is the root).
pub(crate) fn inline_selections_at(
    operation: &Node<Operation>,
    target_path: &SelectionPath,
    to_inline: &[Selection],
    mode: InlineMode,
    index: &mut SelectionSetIndexBuilder,
) -> Result<Node<Operation>, PlanError> {
    let relative = target_path
        .relative_to(&SelectionPath::root())
        .ok_or_else(|| PlanError::internal("inline target path does not start at the root"))?;

    let rewritten = rewrite_at_path(operation, relative, |set| match mode {
        InlineMode::Merge => merge_selection_sets(
            set,
            &SelectionSet {
                ty: set.ty.clone(),
                selections: to_inline.to_vec(),
            },
        ),
        InlineMode::Internal => {
            let mut selections = set.selections.clone();
            selections.extend(to_inline.iter().map(mark_requirement));
            SelectionSet {
                ty: set.ty.clone(),
                selections,
            }
        }
    })?;

    if mode == InlineMode::Internal {
        for selection in to_inline {
            register_sub_selection_sets(selection, target_path, index);
        }
    }
    Ok(rewritten)
}

/// Marks an injected selection with `@fusion__requirement` so the executor
/// can tell requirement data apart from client-requested data.
pub(crate) fn mark_requirement(selection: &Selection) -> Selection {
    let marker = || {
        Node::new(Directive {
            name: REQUIREMENT_DIRECTIVE.clone(),
            arguments: Vec::new(),
        })
    };
    match selection {
        Selection::Field(field) => {
            let mut field = field.as_ref().clone();
            field.directives.0.push(marker());
            Selection::Field(Node::new(field))
        }
        Selection::InlineFragment(inline) => {
            let mut inline = inline.as_ref().clone();
            inline.directives.0.push(marker());
            Selection::InlineFragment(Node::new(inline))
        }
        Selection::FragmentSpread(_) => selection.clone(),
    }
}

fn register_sub_selection_sets(
    selection: &Selection,
    parent_path: &SelectionPath,
    index: &mut SelectionSetIndexBuilder,
) {
    match selection {
        Selection::Field(field) => {
            if field.selection_set.is_empty() {
                return;
            }
            let path = parent_path.append_field(field.response_key().clone());
            index.register(path.clone(), field.selection_set.ty.clone());
            for sub in &field.selection_set.selections {
                register_sub_selection_sets(sub, &path, index);
            }
        }
        Selection::InlineFragment(inline) => {
            let condition = inline
                .type_condition
                .clone()
                .unwrap_or_else(|| inline.selection_set.ty.clone());
            let path = parent_path.append_inline_fragment(condition);
            index.register(path.clone(), inline.selection_set.ty.clone());
            for sub in &inline.selection_set.selections {
                register_sub_selection_sets(sub, &path, index);
            }
        }
        Selection::FragmentSpread(_) => {}
    }
}

/// Walks the final operation definition and injects a `__typename` selection
/// (marked `@fusion__requirement`) into every abstractly-typed field selection
/// that lacks one. The gateway uses it to discriminate runtime types.
pub(crate) fn inject_typename(
    operation: &Node<Operation>,
    schema: &CompositeSchema,
) -> Node<Operation> {
    let new_root = inject_typename_in_set(&operation.selection_set, schema);
    let mut new_operation = operation.as_ref().clone();
    new_operation.selection_set = new_root;
    Node::new(new_operation)
}

fn inject_typename_in_set(set: &SelectionSet, schema: &CompositeSchema) -> SelectionSet {
    let selections = set
        .selections
        .iter()
        .map(|selection| match selection {
            Selection::Field(field) => {
                if field.selection_set.is_empty() {
                    return selection.clone();
                }
                let mut child = inject_typename_in_set(&field.selection_set, schema);
                if schema.is_abstract_type(&child.ty) && !has_unaliased_typename(&child) {
                    child.selections.push(typename_selection(true));
                }
                let mut field = field.as_ref().clone();
                field.selection_set = child;
                Selection::Field(Node::new(field))
            }
            Selection::InlineFragment(inline) => {
                let child = inject_typename_in_set(&inline.selection_set, schema);
                let mut inline = inline.as_ref().clone();
                inline.selection_set = child;
                Selection::InlineFragment(Node::new(inline))
            }
            Selection::FragmentSpread(_) => selection.clone(),
        })
        .collect();
    SelectionSet {
        ty: set.ty.clone(),
        selections,
    }
}
