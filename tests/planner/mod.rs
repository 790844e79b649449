use apollo_compiler::executable::Field;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;
use fusion_planner::schema::CompositeSchema;
use fusion_planner::OperationPlan;
use fusion_planner::OperationPlanStep;
use fusion_planner::OperationPlanner;
use fusion_planner::PlanStep;
use std::sync::Arc;

mod boundaries;
mod lookups;
mod operations;
mod scenarios;

pub const FUSION_DIRECTIVES: &str = r#"
directive @fusion__type(schema: String!) repeatable on OBJECT | INTERFACE | UNION

directive @fusion__field(schema: String!, requires: String) repeatable on FIELD_DEFINITION

directive @fusion__lookup(
    schema: String!
    field: String!
    map: [String!]!
    path: String
    internal: Boolean
) repeatable on OBJECT | INTERFACE | UNION
"#;

pub fn composite(sdl: &str) -> Arc<CompositeSchema> {
    Arc::new(
        CompositeSchema::parse(&format!("{FUSION_DIRECTIVES}\n{sdl}"))
            .expect("test schema should be valid"),
    )
}

pub fn plan(schema: &Arc<CompositeSchema>, source: &str) -> OperationPlan {
    try_plan(schema, source).expect("operation should be plannable")
}

pub fn try_plan(
    schema: &Arc<CompositeSchema>,
    source: &str,
) -> Result<OperationPlan, fusion_planner::PlanError> {
    let document = ExecutableDocument::parse_and_validate(schema.schema(), source, "op.graphql")
        .expect("test operation should be valid");
    let operation = document
        .operations
        .iter()
        .next()
        .expect("one operation")
        .clone();
    OperationPlanner::new(schema.clone()).create_plan("op-1", "hash-1", "h1", operation)
}

pub fn operation_steps(plan: &OperationPlan) -> Vec<&Arc<OperationPlanStep>> {
    plan.steps
        .iter()
        .filter_map(|step| match step {
            PlanStep::Operation(step) => Some(step),
            PlanStep::NodeField(_) => None,
        })
        .collect()
}

pub fn step_on_schema<'a>(
    plan: &'a OperationPlan,
    schema_name: &str,
) -> &'a Arc<OperationPlanStep> {
    operation_steps(plan)
        .into_iter()
        .find(|step| step.schema_name.as_deref() == Some(schema_name))
        .unwrap_or_else(|| panic!("expected a step on {schema_name}"))
}

/// Response keys selected anywhere below the given path of response keys,
/// fragments flattened.
pub fn field_names_at(selection_set: &SelectionSet, path: &[&str]) -> Vec<String> {
    fn flatten<'a>(selection_set: &'a SelectionSet, into: &mut Vec<&'a Node<Field>>) {
        for selection in &selection_set.selections {
            match selection {
                Selection::Field(field) => into.push(field),
                Selection::InlineFragment(inline) => flatten(&inline.selection_set, into),
                Selection::FragmentSpread(_) => {}
            }
        }
    }

    let mut current = selection_set;
    for segment in path {
        let mut fields = Vec::new();
        flatten(current, &mut fields);
        current = &fields
            .into_iter()
            .find(|field| field.response_key().as_str() == *segment)
            .unwrap_or_else(|| panic!("no field `{segment}` along the path"))
            .selection_set;
    }
    let mut fields = Vec::new();
    flatten(current, &mut fields);
    let mut names: Vec<String> = fields
        .into_iter()
        .map(|field| field.response_key().to_string())
        .collect();
    names.sort();
    names
}

/// Asserts that no composite-typed field anywhere in the document carries an
/// empty sub-selection; step documents must stay valid GraphQL.
pub fn assert_no_empty_composite_selections(schema: &CompositeSchema, selection_set: &SelectionSet) {
    for selection in &selection_set.selections {
        match selection {
            Selection::Field(field) => {
                let inner = field.definition.ty.inner_named_type();
                if schema.is_object_type(inner) || schema.is_abstract_type(inner) {
                    assert!(
                        !field.selection_set.selections.is_empty(),
                        "field `{}` committed without sub-selections",
                        field.name
                    );
                }
                assert_no_empty_composite_selections(schema, &field.selection_set);
            }
            Selection::InlineFragment(inline) => {
                assert_no_empty_composite_selections(schema, &inline.selection_set);
            }
            Selection::FragmentSpread(_) => {}
        }
    }
}
