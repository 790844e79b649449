use super::*;
use apollo_compiler::executable::OperationType;

#[test]
fn subscriptions_seed_like_queries() {
    let schema = composite(
        r#"
        type Query {
            ping: String @fusion__field(schema: "S1")
        }

        type Subscription {
            events: Event @fusion__field(schema: "S1")
        }

        type Event @fusion__type(schema: "S1") {
            payload: String
        }
        "#,
    );
    let plan = plan(&schema, "subscription { events { payload } }");

    assert_eq!(plan.operation_type, OperationType::Subscription);
    assert_eq!(plan.operation_step_count, 1);

    let step = step_on_schema(&plan, "S1");
    assert_eq!(step.definition.operation_type, OperationType::Subscription);
    assert_eq!(
        field_names_at(&step.definition.selection_set, &["events"]),
        vec!["payload"]
    );
}

#[test]
fn node_conditions_are_extracted_onto_the_dispatcher() {
    let schema = composite(
        r#"
        type Query {
            node(id: ID!): Node
            aById(id: ID!): A @fusion__field(schema: "S1")
        }

        interface Node {
            id: ID!
        }

        type A implements Node
            @fusion__type(schema: "S1")
            @fusion__lookup(schema: "S1", field: "aById", map: ["id"])
        {
            id: ID!
            x: Int
        }
        "#,
    );
    let plan = plan(
        &schema,
        r#"query ($hide: Boolean!) { node(id: "X") @skip(if: $hide) { ... on A { x } } }"#,
    );

    let dispatcher = plan
        .steps
        .iter()
        .find_map(|step| match step {
            fusion_planner::PlanStep::NodeField(step) => Some(step),
            _ => None,
        })
        .expect("a node-field step");

    assert_eq!(dispatcher.conditions.len(), 1);
    let condition = &dispatcher.conditions[0];
    assert_eq!(condition.variable, "hide");
    // @skip passes when the variable is false.
    assert!(!condition.passing_value);

    // The branch and fallback documents are free of the condition; the
    // executor evaluates it once through the dispatcher.
    for step in operation_steps(&plan) {
        assert!(!step.definition.to_string().contains("@skip"));
    }
}

#[test]
fn client_variables_are_forwarded_to_the_steps_that_use_them() {
    let schema = composite(
        r#"
        type Query {
            a(filter: String): A @fusion__field(schema: "S1")
            aById(id: ID!): A @fusion__field(schema: "S2")
        }

        type A
            @fusion__type(schema: "S1")
            @fusion__type(schema: "S2")
            @fusion__lookup(schema: "S2", field: "aById", map: ["id"])
        {
            id: ID!
            x: Int @fusion__field(schema: "S1")
            y: Int @fusion__field(schema: "S2")
        }
        "#,
    );
    let plan = plan(
        &schema,
        "query ($f: String) { a(filter: $f) { x y } }",
    );

    let first = step_on_schema(&plan, "S1");
    let first_variables: Vec<&str> = first
        .definition
        .variables
        .iter()
        .map(|variable| variable.name.as_str())
        .collect();
    assert_eq!(first_variables, vec!["f"]);

    // The lookup step never references `$f`; it only declares its own
    // requirement variable.
    let second = step_on_schema(&plan, "S2");
    let second_variables: Vec<&str> = second
        .definition
        .variables
        .iter()
        .map(|variable| variable.name.as_str())
        .collect();
    assert_eq!(second_variables, vec!["__fusion_1_id"]);
}

#[test]
fn abstract_selections_gain_a_typename_discriminator() {
    let schema = composite(
        r#"
        type Query {
            pets: Pet @fusion__field(schema: "S1")
        }

        interface Pet @fusion__type(schema: "S1") {
            name: String
        }

        type Dog implements Pet @fusion__type(schema: "S1") {
            name: String
        }
        "#,
    );
    let plan = plan(&schema, "{ pets { name } }");

    assert_eq!(
        field_names_at(&plan.internal_operation.selection_set, &["pets"]),
        vec!["__typename", "name"]
    );
    // The discriminator is planner-injected, so it carries the marker.
    assert!(plan
        .internal_operation
        .to_string()
        .contains("fusion__requirement"));

    // The client-facing operation is untouched.
    assert_eq!(
        field_names_at(&plan.operation.selection_set, &["pets"]),
        vec!["name"]
    );
}

#[test]
fn plan_summaries_render_steps_and_documents() {
    let schema = composite(
        r#"
        type Query {
            a: A @fusion__field(schema: "S1")
        }

        type A @fusion__type(schema: "S1") {
            x: Int
        }
        "#,
    );
    let plan = plan(&schema, "{ a { x } }");
    let summary = serde_json::to_value(plan.summary()).unwrap();

    assert_eq!(summary["id"], "op-1");
    assert_eq!(summary["operation_step_count"], 1);
    assert_eq!(summary["max_depth"], 1);

    let steps = summary["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0]["id"], 1);
    assert_eq!(steps[0]["kind"], "operation");
    assert_eq!(steps[0]["schema"], "S1");
    let document = steps[0]["document"].as_str().unwrap();
    assert!(document.contains('a') && document.contains('x'));
}
