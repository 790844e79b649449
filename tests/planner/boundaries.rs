use super::*;
use fusion_planner::PlanError;

#[test]
fn pure_introspection_plans_zero_steps() {
    let schema = composite(
        r#"
        type Query {
            ping: String @fusion__field(schema: "S1")
        }
        "#,
    );
    let plan = plan(&schema, "{ __schema { types { name } } __typename }");

    assert!(plan.steps.is_empty());
    assert_eq!(plan.operation_step_count, 0);
    assert_eq!(plan.max_depth, 0);
}

#[test]
fn node_field_with_one_concrete_branch() {
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
    let plan = plan(&schema, r#"{ node(id: "X") { ... on A { x } } }"#);

    // One fallback query step plus one branch step.
    assert_eq!(plan.operation_step_count, 2);
    let dispatcher = plan
        .steps
        .iter()
        .find_map(|step| match step {
            fusion_planner::PlanStep::NodeField(step) => Some(step),
            _ => None,
        })
        .expect("a node-field step");
    assert_eq!(dispatcher.branches.len(), 1);
    assert!(dispatcher.fallback.schema_name.is_none());
}

#[test]
fn inlinable_requirement_adds_no_step() {
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

    // Two steps total: the gated field rides on the lookup step instead of
    // spawning a third.
    assert_eq!(plan.operation_step_count, 2);
}

#[test]
fn non_inlinable_requirement_falls_back_to_another_owner() {
    let schema = composite(
        r#"
        type Query {
            a: A @fusion__field(schema: "S1")
            aById(id: ID!): A @fusion__field(schema: "S3")
        }

        type A
            @fusion__type(schema: "S1")
            @fusion__type(schema: "S2")
            @fusion__type(schema: "S3")
            @fusion__lookup(schema: "S3", field: "aById", map: ["id"])
        {
            id: ID!
            x: Int @fusion__field(schema: "S1")
            y: Int @fusion__field(schema: "S2")
            z: Int
                @fusion__field(schema: "S2", requires: "y")
                @fusion__field(schema: "S3")
        }
        "#,
    );
    let plan = plan(&schema, "{ a { x z } }");

    // `z` on S2 needs `y`, which no other step can provide; the plan instead
    // refetches `z` through the S3 lookup, dependent on the S1 step's key.
    assert_eq!(plan.operation_step_count, 2);
    let first = step_on_schema(&plan, "S1");
    let second = step_on_schema(&plan, "S3");
    assert!(first.dependents.contains(&second.id));
    assert_eq!(
        field_names_at(&second.definition.selection_set, &["aById"]),
        vec!["z"]
    );
}

#[test]
fn unreachable_selection_yields_no_plan() {
    let schema = composite(
        r#"
        type Query {
            a: A @fusion__field(schema: "S1")
        }

        type A @fusion__type(schema: "S1") @fusion__type(schema: "S2") {
            x: Int @fusion__field(schema: "S1")
            w: Int @fusion__field(schema: "S2")
        }
        "#,
    );
    // S2 owns `w` but declares no lookup for `A`, so the spilled selection
    // can never be planned.
    let error = try_plan(&schema, "{ a { x w } }").unwrap_err();
    assert_eq!(error, PlanError::NoPlanFound);
}

#[test]
fn empty_identifiers_are_rejected() {
    let schema = composite(
        r#"
        type Query {
            ping: String @fusion__field(schema: "S1")
        }
        "#,
    );
    let document = apollo_compiler::ExecutableDocument::parse_and_validate(
        schema.schema(),
        "{ ping }",
        "op.graphql",
    )
    .unwrap();
    let operation = document.operations.iter().next().unwrap().clone();
    let planner = OperationPlanner::new(schema.clone());

    let error = planner
        .create_plan("", "hash", "h", operation.clone())
        .unwrap_err();
    assert!(matches!(error, PlanError::InvalidArgument { .. }));

    let error = planner
        .create_plan("op", "", "h", operation)
        .unwrap_err();
    assert!(matches!(error, PlanError::InvalidArgument { .. }));
}

#[test]
fn planning_twice_is_byte_identical() {
    let schema = composite(
        r#"
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
        "#,
    );
    let first = plan(&schema, "{ a { x y } }");
    let second = plan(&schema, "{ a { x y } }");

    let first_json = serde_json::to_string(&first.summary()).unwrap();
    let second_json = serde_json::to_string(&second.summary()).unwrap();
    assert_eq!(first_json, second_json);
}

#[test]
fn step_ids_are_dense_and_dependencies_acyclic() {
    let schema = composite(
        r#"
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
            z: Int @fusion__field(schema: "S2")
        }
        "#,
    );
    let plan = plan(&schema, "{ a { x y z } }");

    // Dense ids 1..N in insertion order.
    let ids: Vec<u32> = plan.steps.iter().map(|step| step.id().0).collect();
    let expected: Vec<u32> = (1..=ids.len() as u32).collect();
    assert_eq!(ids, expected);

    // No step reaches itself over `dependents` edges.
    for step in operation_steps(&plan) {
        assert!(!step.dependents.contains(&step.id));
        for dependent in &step.dependents {
            let target = plan.find_step(*dependent).expect("dependent exists");
            if let fusion_planner::PlanStep::Operation(target) = target {
                assert!(!target.dependents.contains(&step.id));
            }
        }
    }

    // Requirement keys are unique and well-formed across the plan.
    let mut seen = std::collections::HashSet::new();
    for step in operation_steps(&plan) {
        for key in step.requirements.keys() {
            assert!(key.starts_with("__fusion_"), "bad key {key}");
            assert!(seen.insert(key.clone()), "duplicate key {key}");
        }
    }
}
