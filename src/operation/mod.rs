//! Selection-level building blocks shared by the partitioners, the rewriters
//! and the planner: positions in the operation tree, field selections with
//! their resolution context, and `@skip`/`@include` conditions.

use apollo_compiler::ast::Type;
use apollo_compiler::ast::Value;
use apollo_compiler::executable::DirectiveList;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::name;
use apollo_compiler::schema::FieldDefinition;
use apollo_compiler::Name;
use apollo_compiler::Node;
use indexmap::IndexSet;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

pub mod definition_builder;
pub mod partition;
pub mod rewrite;
pub mod selection_set_index;

use selection_set_index::SelectionSetId;

/// Directive marking selections the planner injected for its own needs
/// (requirement data, `__typename` discriminators). The executor strips them
/// from the client-facing response.
pub(crate) const REQUIREMENT_DIRECTIVE_NAME: &str = "fusion__requirement";

pub(crate) const TYPENAME_FIELD_NAME: &str = "__typename";
pub(crate) const NODE_FIELD_NAME: &str = "node";

lazy_static::lazy_static! {
    pub(crate) static ref TYPENAME_NAME: Name = name!("__typename");
    pub(crate) static ref REQUIREMENT_DIRECTIVE: Name = name!("fusion__requirement");
    /// Shared definition for injected `__typename` selections.
    pub(crate) static ref TYPENAME_DEFINITION: Node<FieldDefinition> = Node::new(FieldDefinition {
        description: None,
        name: name!("__typename"),
        arguments: Vec::new(),
        ty: Type::NonNullNamed(name!("String")),
        directives: Default::default(),
    });
}

/// One segment of a position in the operation tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SelectionPathSegment {
    Root,
    /// A field, identified by its response name.
    Field(Name),
    /// An inline fragment, identified by its type condition.
    InlineFragment(Name),
}

impl SelectionPathSegment {
    fn rank(&self) -> u8 {
        match self {
            SelectionPathSegment::Root => 0,
            SelectionPathSegment::Field(_) => 1,
            SelectionPathSegment::InlineFragment(_) => 2,
        }
    }
}

impl PartialOrd for SelectionPathSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SelectionPathSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SelectionPathSegment::Field(a), SelectionPathSegment::Field(b))
            | (SelectionPathSegment::InlineFragment(a), SelectionPathSegment::InlineFragment(b)) => {
                a.as_str().cmp(b.as_str())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// A position in the operation tree, compared segment-wise like a tuple.
///
/// Paths identify selection *sets*: the root set has the path `[Root]`, the
/// child set of field `a` has `[Root, a]`, and so on. Sharing is cheap; paths
/// are short and cloned freely during the search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SelectionPath {
    segments: Arc<Vec<SelectionPathSegment>>,
}

impl SelectionPath {
    pub fn root() -> Self {
        SelectionPath {
            segments: Arc::new(vec![SelectionPathSegment::Root]),
        }
    }

    pub fn segments(&self) -> &[SelectionPathSegment] {
        &self.segments
    }

    pub fn append(&self, segment: SelectionPathSegment) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend(self.segments.iter().cloned());
        segments.push(segment);
        SelectionPath {
            segments: Arc::new(segments),
        }
    }

    pub fn append_field(&self, response_name: Name) -> Self {
        self.append(SelectionPathSegment::Field(response_name))
    }

    pub fn append_inline_fragment(&self, type_condition: Name) -> Self {
        self.append(SelectionPathSegment::InlineFragment(type_condition))
    }

    /// The path of the enclosing selection set, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(SelectionPath {
            segments: Arc::new(self.segments[..self.segments.len() - 1].to_vec()),
        })
    }

    pub fn is_root(&self) -> bool {
        self.segments.len() == 1
    }

    pub fn starts_with(&self, prefix: &SelectionPath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// The segments of `self` below `prefix`, if `prefix` is in fact a prefix.
    pub fn relative_to(&self, prefix: &SelectionPath) -> Option<&[SelectionPathSegment]> {
        if self.starts_with(prefix) {
            Some(&self.segments[prefix.segments.len()..])
        } else {
            None
        }
    }

    /// Extends this path with segments taken from another path's tail.
    pub fn join(&self, tail: &[SelectionPathSegment]) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + tail.len());
        segments.extend(self.segments.iter().cloned());
        segments.extend(tail.iter().cloned());
        SelectionPath {
            segments: Arc::new(segments),
        }
    }
}

impl fmt::Display for SelectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                SelectionPathSegment::Root => f.write_str("$root")?,
                SelectionPathSegment::Field(name) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(name.as_str())?;
                }
                SelectionPathSegment::InlineFragment(ty) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    write!(f, "<{ty}>")?;
                }
            }
        }
        Ok(())
    }
}

/// A selection set as the planner tracks it: the set itself, the logical id
/// assigned by the index, and the position at which it appears.
#[derive(Debug, Clone)]
pub struct RegisteredSelectionSet {
    pub id: SelectionSetId,
    pub set: SelectionSet,
    pub path: SelectionPath,
}

/// A field selection together with its resolution context.
#[derive(Debug, Clone)]
pub struct FieldSelection {
    pub field: Node<Field>,
    /// The composite type declaring the field.
    pub declaring_type: Name,
    /// The named type of the field's result.
    pub field_type: Name,
    /// Id of the selection set the field appears in.
    pub selection_set_id: SelectionSetId,
    /// Path of the selection set the field appears in.
    pub path: SelectionPath,
}

impl FieldSelection {
    pub fn response_name(&self) -> &Name {
        self.field.response_key()
    }
}

/// An extracted `@skip`/`@include` application. `passing_value` is the value
/// of the condition variable for which the guarded selection is included.
#[derive(Debug, Clone)]
pub struct Condition {
    pub variable: Name,
    pub passing_value: bool,
    pub directive: Node<apollo_compiler::ast::Directive>,
}

/// Pulls variable-driven `@skip`/`@include` applications out of a directive
/// list. Constant conditions are resolved upstream by document normalization
/// and are not expected here.
pub(crate) fn extract_conditions(directives: &DirectiveList) -> Vec<Condition> {
    let mut conditions = Vec::new();
    for directive in directives.iter() {
        let passing_value = match directive.name.as_str() {
            "skip" => false,
            "include" => true,
            _ => continue,
        };
        let Some(argument) = directive.specified_argument_by_name("if") else {
            continue;
        };
        if let Value::Variable(variable) = argument.as_ref() {
            conditions.push(Condition {
                variable: variable.clone(),
                passing_value,
                directive: directive.clone(),
            });
        }
    }
    conditions
}

/// Whether the selection set directly contains an unaliased `__typename`.
pub(crate) fn has_unaliased_typename(selection_set: &SelectionSet) -> bool {
    selection_set.selections.iter().any(|selection| {
        matches!(
            selection,
            Selection::Field(field)
                if field.alias.is_none() && field.name == TYPENAME_FIELD_NAME
        )
    })
}

/// A fresh `__typename` selection, optionally marked as planner-injected.
pub(crate) fn typename_selection(marked_internal: bool) -> Selection {
    let mut field = Field::new(TYPENAME_NAME.clone(), TYPENAME_DEFINITION.clone());
    if marked_internal {
        field.directives = DirectiveList(vec![Node::new(apollo_compiler::ast::Directive {
            name: REQUIREMENT_DIRECTIVE.clone(),
            arguments: Vec::new(),
        })]);
    }
    Selection::Field(Node::new(field))
}

/// Collects the names of all variables referenced by arguments and directives
/// anywhere below the given selection set.
pub(crate) fn collect_variable_usages(selection_set: &SelectionSet, into: &mut IndexSet<Name>) {
    for selection in &selection_set.selections {
        match selection {
            Selection::Field(field) => {
                for argument in &field.arguments {
                    collect_value_variables(&argument.value, into);
                }
                collect_directive_variables(&field.directives, into);
                collect_variable_usages(&field.selection_set, into);
            }
            Selection::InlineFragment(inline) => {
                collect_directive_variables(&inline.directives, into);
                collect_variable_usages(&inline.selection_set, into);
            }
            Selection::FragmentSpread(spread) => {
                collect_directive_variables(&spread.directives, into);
            }
        }
    }
}

fn collect_directive_variables(directives: &DirectiveList, into: &mut IndexSet<Name>) {
    for directive in directives.iter() {
        for argument in &directive.arguments {
            collect_value_variables(&argument.value, into);
        }
    }
}

fn collect_value_variables(value: &Node<Value>, into: &mut IndexSet<Name>) {
    match value.as_ref() {
        Value::Variable(name) => {
            into.insert(name.clone());
        }
        Value::List(items) => {
            for item in items {
                collect_value_variables(item, into);
            }
        }
        Value::Object(fields) => {
            for (_, item) in fields {
                collect_value_variables(item, into);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_compare_like_tuples() {
        let root = SelectionPath::root();
        let a = root.append_field(name!("a"));
        let b = root.append_field(name!("b"));
        let a_child = a.append_field(name!("x"));

        assert!(root < a);
        assert!(a < b);
        assert!(a < a_child);
        assert!(a_child < b);
    }

    #[test]
    fn relative_paths() {
        let root = SelectionPath::root();
        let a = root.append_field(name!("a"));
        let deep = a.append_field(name!("b")).append_field(name!("c"));

        let tail = deep.relative_to(&a).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(a.join(tail), deep);
        assert!(deep.relative_to(&root.append_field(name!("z"))).is_none());
    }

    #[test]
    fn parent_of_root_is_none() {
        assert!(SelectionPath::root().parent().is_none());
        let a = SelectionPath::root().append_field(name!("a"));
        assert_eq!(a.parent().unwrap(), SelectionPath::root());
    }
}
