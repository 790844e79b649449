//! Assembles the per-step operation definitions.

use crate::error::PlanError;
use crate::operation::collect_variable_usages;
use crate::operation::SelectionPath;
use crate::schema::CompositeSchema;
use crate::schema::Lookup;
use apollo_compiler::ast::Argument;
use apollo_compiler::ast::VariableDefinition;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::OperationType;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::Name;
use apollo_compiler::Node;
use indexmap::IndexSet;
use std::sync::Arc;

/// Binds a step's selection set under a lookup field with prepared argument
/// nodes.
pub(crate) struct LookupBinding {
    pub lookup: Arc<Lookup>,
    pub arguments: Vec<Node<Argument>>,
    pub response_name: Option<Name>,
}

/// Fluent builder for a step's `Node<Operation>`. Produces the definition and
/// the source path at which the step's entity selection sits inside it.
pub(crate) struct OperationDefinitionBuilder<'a> {
    schema: &'a CompositeSchema,
    operation_type: OperationType,
    name: Option<Name>,
    selection_set: Option<SelectionSet>,
    lookup: Option<LookupBinding>,
    variables: Vec<Node<VariableDefinition>>,
}

impl<'a> OperationDefinitionBuilder<'a> {
    pub(crate) fn new(schema: &'a CompositeSchema) -> Self {
        OperationDefinitionBuilder {
            schema,
            operation_type: OperationType::Query,
            name: None,
            selection_set: None,
            lookup: None,
            variables: Vec::new(),
        }
    }

    pub(crate) fn operation_type(mut self, operation_type: OperationType) -> Self {
        self.operation_type = operation_type;
        self
    }

    pub(crate) fn selection_set(mut self, selection_set: SelectionSet) -> Self {
        self.selection_set = Some(selection_set);
        self
    }

    pub(crate) fn lookup(mut self, binding: LookupBinding) -> Self {
        self.lookup = Some(binding);
        self
    }

    pub(crate) fn variable(mut self, variable: Node<VariableDefinition>) -> Self {
        self.variables.push(variable);
        self
    }

    pub(crate) fn build(
        self,
        client_variables: &[Node<VariableDefinition>],
    ) -> Result<(Node<Operation>, SelectionPath), PlanError> {
        let OperationDefinitionBuilder {
            schema,
            operation_type,
            name,
            selection_set,
            lookup,
            variables,
        } = self;
        let selection_set = selection_set
            .ok_or_else(|| PlanError::internal("operation definition built without selections"))?;

        let (root_set, source_path) = match lookup {
            Some(binding) => wrap_in_lookup(schema, binding, selection_set)?,
            None => {
                let root_type = schema.operation_type_name(operation_type)?;
                (
                    SelectionSet {
                        ty: root_type,
                        selections: selection_set.selections,
                    },
                    SelectionPath::root(),
                )
            }
        };

        let mut variables = variables;
        let mut used = IndexSet::new();
        collect_variable_usages(&root_set, &mut used);
        for client_variable in client_variables {
            if used.contains(&client_variable.name)
                && !variables
                    .iter()
                    .any(|variable| variable.name == client_variable.name)
            {
                variables.push(client_variable.clone());
            }
        }

        let operation = Operation {
            operation_type,
            name,
            variables,
            directives: Default::default(),
            selection_set: root_set,
        };
        Ok((Node::new(operation), source_path))
    }
}

fn wrap_in_lookup(
    schema: &CompositeSchema,
    binding: LookupBinding,
    selection_set: SelectionSet,
) -> Result<(SelectionSet, SelectionPath), PlanError> {
    let lookup = &binding.lookup;
    let mut field = Field {
        definition: lookup.field_definition.clone(),
        alias: binding.response_name.clone(),
        name: lookup.field_name.clone(),
        arguments: binding.arguments,
        directives: Default::default(),
        selection_set,
    };

    // Walk the lookup path from the root to learn the field definition of
    // every intermediate segment, then fold the lookup field into them
    // innermost-first.
    let query_type = schema.query_type_name()?;
    let mut segments = Vec::new();
    let mut parent = query_type.clone();
    for segment in &lookup.path {
        let definition = schema.field_definition(&parent, segment).ok_or_else(|| {
            PlanError::schema(format!(
                "lookup path segment `{segment}` not found on `{parent}`"
            ))
        })?;
        parent = definition.ty.inner_named_type().clone();
        segments.push((segment.clone(), definition));
    }

    let mut source_path = SelectionPath::root();
    for (segment, _) in &segments {
        source_path = source_path.append_field(segment.clone());
    }
    source_path = source_path.append_field(
        binding
            .response_name
            .clone()
            .unwrap_or_else(|| lookup.field_name.clone()),
    );

    for (segment, definition) in segments.into_iter().rev() {
        let child_type = definition.ty.inner_named_type().clone();
        field = Field {
            definition,
            alias: None,
            name: segment,
            arguments: Vec::new(),
            directives: Default::default(),
            selection_set: SelectionSet {
                ty: child_type,
                selections: vec![Selection::Field(Node::new(field))],
            },
        };
    }

    Ok((
        SelectionSet {
            ty: query_type,
            selections: vec![Selection::Field(Node::new(field))],
        },
        source_path,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use apollo_compiler::ast::Value;
    use apollo_compiler::name;

    const SCHEMA: &str = r#"
        directive @fusion__type(schema: String!) repeatable on OBJECT | INTERFACE | UNION
        directive @fusion__field(schema: String!, requires: String) repeatable on FIELD_DEFINITION
        directive @fusion__lookup(
            schema: String!
            field: String!
            map: [String!]!
            path: String
            internal: Boolean
        ) repeatable on OBJECT | INTERFACE | UNION

        type Query {
            a: A @fusion__field(schema: "S1")
            lookups: LookupRoot @fusion__field(schema: "S2")
        }

        type LookupRoot @fusion__type(schema: "S2") {
            aById(id: ID!): A @fusion__field(schema: "S2")
        }

        type A
            @fusion__type(schema: "S1")
            @fusion__type(schema: "S2")
            @fusion__lookup(schema: "S2", field: "aById", map: ["id"], path: "lookups")
        {
            id: ID!
            y: Int @fusion__field(schema: "S2")
        }
    "#;

    #[test]
    fn wraps_the_selection_under_a_pathed_lookup() {
        let schema = CompositeSchema::parse(SCHEMA).unwrap();
        let lookup = schema
            .possible_lookups_ordered(&name!("A"), Some("S2"))
            .into_iter()
            .next()
            .unwrap();

        let entity_set = SelectionSet {
            ty: name!("A"),
            selections: Vec::new(),
        };
        let argument = Node::new(Argument {
            name: name!("id"),
            value: Node::new(Value::Variable(name!("__fusion_1_id"))),
        });

        let (definition, source_path) = OperationDefinitionBuilder::new(&schema)
            .operation_type(OperationType::Query)
            .selection_set(entity_set)
            .lookup(LookupBinding {
                lookup,
                arguments: vec![argument],
                response_name: None,
            })
            .build(&[])
            .unwrap();

        assert_eq!(
            source_path,
            SelectionPath::root()
                .append_field(name!("lookups"))
                .append_field(name!("aById"))
        );
        let outer = definition.selection_set.fields().next().unwrap();
        assert_eq!(outer.name, "lookups");
        let inner = outer.selection_set.fields().next().unwrap();
        assert_eq!(inner.name, "aById");
        assert_eq!(inner.arguments.len(), 1);
    }

    #[test]
    fn forwards_only_referenced_client_variables() {
        let schema = CompositeSchema::parse(SCHEMA).unwrap();
        let document = apollo_compiler::ExecutableDocument::parse_and_validate(
            schema.schema(),
            "query ($skipA: Boolean!, $unused: Int) { a @skip(if: $skipA) { id } }",
            "op.graphql",
        )
        .unwrap();
        let operation = document.operations.iter().next().unwrap();

        let (definition, _) = OperationDefinitionBuilder::new(&schema)
            .operation_type(OperationType::Query)
            .selection_set(operation.selection_set.clone())
            .build(&operation.variables)
            .unwrap();

        let names: Vec<&str> = definition
            .variables
            .iter()
            .map(|variable| variable.name.as_str())
            .collect();
        assert_eq!(names, vec!["skipA"]);
    }
}
