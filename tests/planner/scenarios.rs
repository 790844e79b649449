use super::*;
use apollo_compiler::executable::OperationType;
use fusion_planner::StepId;

const TWO_SCHEMA_ENTITY: &str = r#"
type Query {
    a: A @fusion__field(schema: "S1")
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
"#;

#[test]
fn single_schema_query_produces_one_step() {
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

    assert_eq!(plan.operation_step_count, 1);
    assert_eq!(plan.max_depth, 1);

    let steps = operation_steps(&plan);
    assert_eq!(steps.len(), 1);
    let step = steps[0];
    assert_eq!(step.id, StepId(1));
    assert_eq!(step.schema_name.as_deref(), Some("S1"));
    assert!(step.requirements.is_empty());
    assert!(step.dependents.is_empty());
    assert_eq!(
        field_names_at(&step.definition.selection_set, &["a"]),
        vec!["x"]
    );
}

#[test]
fn cross_schema_field_goes_through_a_lookup() {
    let schema = composite(TWO_SCHEMA_ENTITY);
    let plan = plan(&schema, "{ a { x y } }");

    assert_eq!(plan.operation_step_count, 2);
    assert_eq!(plan.max_depth, 2);

    let first = step_on_schema(&plan, "S1");
    let second = step_on_schema(&plan, "S2");
    assert_eq!(first.id, StepId(1));
    assert_eq!(second.id, StepId(2));

    // The first step gained the lookup key alongside its own field.
    assert_eq!(
        field_names_at(&first.definition.selection_set, &["a"]),
        vec!["id", "x"]
    );
    assert!(first.dependents.contains(&StepId(2)));
    assert!(second.dependents.is_empty());

    // The second step enters through the lookup and carries the keyed
    // requirement.
    assert_eq!(second.lookup.as_ref().unwrap().field_name, "aById");
    let requirement_keys: Vec<&String> = second.requirements.keys().collect();
    assert_eq!(requirement_keys, vec!["__fusion_1_id"]);
    assert_eq!(
        field_names_at(&second.definition.selection_set, &["aById"]),
        vec!["y"]
    );
    let variable_names: Vec<&str> = second
        .definition
        .variables
        .iter()
        .map(|variable| variable.name.as_str())
        .collect();
    assert_eq!(variable_names, vec!["__fusion_1_id"]);

    // The internal operation carries the injected key, marked as
    // requirement data.
    let internal = plan.internal_operation.to_string();
    assert!(internal.contains("fusion__requirement"));
    assert_eq!(
        field_names_at(&plan.internal_operation.selection_set, &["a"]),
        vec!["id", "x", "y"]
    );
}

#[test]
fn relay_node_dispatches_per_concrete_type() {
    let schema = composite(
        r#"
        type Query {
            node(id: ID!): Node
            aById(id: ID!): A @fusion__field(schema: "S1")
            bById(id: ID!): B @fusion__field(schema: "S2")
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

        type B implements Node
            @fusion__type(schema: "S2")
            @fusion__lookup(schema: "S2", field: "bById", map: ["id"])
        {
            id: ID!
            y: Int
        }
        "#,
    );
    let plan = plan(
        &schema,
        r#"{ node(id: "X") { ... on A { x } ... on B { y } } }"#,
    );

    let dispatcher = plan
        .steps
        .iter()
        .find_map(|step| match step {
            fusion_planner::PlanStep::NodeField(step) => Some(step),
            _ => None,
        })
        .expect("a node-field step");

    // Fallback: schema-less `node` query fetching only the discriminator.
    assert!(dispatcher.fallback.schema_name.is_none());
    assert_eq!(
        field_names_at(&dispatcher.fallback.definition.selection_set, &["node"]),
        vec!["__typename"]
    );

    // One branch per concrete type, each with the discriminator plus its
    // type-specific selections.
    assert_eq!(dispatcher.branches.len(), 2);
    let a_branch = &dispatcher.branches["A"];
    assert_eq!(a_branch.schema_name.as_deref(), Some("S1"));
    assert_eq!(
        field_names_at(&a_branch.definition.selection_set, &["aById"]),
        vec!["__typename", "x"]
    );
    let b_branch = &dispatcher.branches["B"];
    assert_eq!(b_branch.schema_name.as_deref(), Some("S2"));
    assert_eq!(
        field_names_at(&b_branch.definition.selection_set, &["bById"]),
        vec!["__typename", "y"]
    );

    // Fallback and both branches are operation steps.
    assert_eq!(plan.operation_step_count, 3);
}

#[test]
fn requirement_inlines_into_the_providing_step() {
    let schema = composite(
        r#"
        type Query {
            aById(id: ID!): A
                @fusion__field(schema: "S1")
                @fusion__field(schema: "S2")
        }

        type A
            @fusion__type(schema: "S1")
            @fusion__type(schema: "S2")
            @fusion__lookup(schema: "S2", field: "aById", map: ["id"])
        {
            id: ID!
            x: Int @fusion__field(schema: "S1")
            y: Int @fusion__field(schema: "S1")
            z: Int @fusion__field(schema: "S2", requires: "y")
        }
        "#,
    );
    let plan = plan(&schema, "{ aById(id: 1) { x z } }");

    let first = step_on_schema(&plan, "S1");
    let second = step_on_schema(&plan, "S2");

    // The providing step fetches the key and the required sibling data.
    assert_eq!(
        field_names_at(&first.definition.selection_set, &["aById"]),
        vec!["id", "x", "y"]
    );
    // The consuming step refetches the entity and resolves the gated field.
    assert_eq!(
        field_names_at(&second.definition.selection_set, &["aById"]),
        vec!["z"]
    );
    assert!(first.dependents.contains(&second.id));

    // The internal operation marks the injected requirement data.
    assert_eq!(
        field_names_at(&plan.internal_operation.selection_set, &["aById"]),
        vec!["id", "x", "y", "z"]
    );
    assert!(plan.internal_operation.to_string().contains("fusion__requirement"));
}

#[test]
fn mutation_steps_follow_document_order() {
    let schema = composite(
        r#"
        type Query {
            ping: String @fusion__field(schema: "S1")
        }

        type Mutation {
            m1: Int @fusion__field(schema: "S1")
            m2: Int @fusion__field(schema: "S2")
            m3: Int @fusion__field(schema: "S1")
        }
        "#,
    );
    let plan = plan(&schema, "mutation { m1 m2 m3 }");

    assert_eq!(plan.operation_step_count, 3);
    assert_eq!(plan.operation_type, OperationType::Mutation);

    let steps = operation_steps(&plan);
    let rooted: Vec<(StepId, Vec<String>)> = steps
        .iter()
        .map(|step| {
            (
                step.id,
                field_names_at(&step.definition.selection_set, &[]),
            )
        })
        .collect();
    assert_eq!(
        rooted,
        vec![
            (StepId(1), vec!["m1".to_string()]),
            (StepId(2), vec!["m2".to_string()]),
            (StepId(3), vec!["m3".to_string()]),
        ]
    );
    for step in steps {
        assert_eq!(
            step.definition.operation_type,
            OperationType::Mutation
        );
    }
}

#[test]
fn equal_fit_breaks_ties_toward_the_ordinal_smaller_schema() {
    let schema = composite(
        r#"
        type Query {
            a: A @fusion__field(schema: "S1") @fusion__field(schema: "S2")
        }

        type A @fusion__type(schema: "S1") @fusion__type(schema: "S2") {
            x: Int
        }
        "#,
    );
    let plan = plan(&schema, "{ a { x } }");

    let steps = operation_steps(&plan);
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].schema_name.as_deref(), Some("S1"));
}
