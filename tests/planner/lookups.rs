use super::*;
use fusion_planner::StepId;

#[test]
fn path_walk_reaches_an_ancestor_lookup() {
    // `B` has no lookup of its own; the spilled `B.z` selection is re-planned
    // through the lookup on its ancestor `A`.
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
            b: B @fusion__field(schema: "S1") @fusion__field(schema: "S2")
        }

        type B @fusion__type(schema: "S1") @fusion__type(schema: "S2") {
            w: Int @fusion__field(schema: "S1")
            z: Int @fusion__field(schema: "S2")
        }
        "#,
    );
    let plan = plan(&schema, "{ a { x b { w z } } }");

    assert_eq!(plan.operation_step_count, 2);

    let first = step_on_schema(&plan, "S1");
    // The first step keeps its own selections plus the injected lookup key.
    assert_eq!(
        field_names_at(&first.definition.selection_set, &["a"]),
        vec!["b", "id", "x"]
    );
    assert_eq!(
        field_names_at(&first.definition.selection_set, &["a", "b"]),
        vec!["w"]
    );

    // The second step walks in through `aById` and refetches only the
    // spilled part of the subtree.
    let second = step_on_schema(&plan, "S2");
    assert_eq!(second.lookup.as_ref().unwrap().field_name, "aById");
    assert_eq!(
        field_names_at(&second.definition.selection_set, &["aById"]),
        vec!["b"]
    );
    assert_eq!(
        field_names_at(&second.definition.selection_set, &["aById", "b"]),
        vec!["z"]
    );
    assert!(first.dependents.contains(&second.id));
}

#[test]
fn fully_foreign_subtrees_replan_through_the_entity_lookup() {
    // Everything below `b` lives on S2 and `B` has no lookup of its own; the
    // whole `b` subtree is refetched through the lookup on `A`, and the S1
    // step shrinks to the entity key instead of keeping a dangling empty
    // `b` selection.
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
            b: B @fusion__field(schema: "S1") @fusion__field(schema: "S2")
        }

        type B @fusion__type(schema: "S1") @fusion__type(schema: "S2") {
            z: Int @fusion__field(schema: "S2")
        }
        "#,
    );
    let plan = plan(&schema, "{ a { b { z } } }");

    assert_eq!(plan.operation_step_count, 2);

    let first = step_on_schema(&plan, "S1");
    assert_eq!(
        field_names_at(&first.definition.selection_set, &["a"]),
        vec!["id"]
    );

    let second = step_on_schema(&plan, "S2");
    assert_eq!(
        field_names_at(&second.definition.selection_set, &["aById"]),
        vec!["b"]
    );
    assert_eq!(
        field_names_at(&second.definition.selection_set, &["aById", "b"]),
        vec!["z"]
    );
    assert!(first.dependents.contains(&second.id));

    for step in operation_steps(&plan) {
        assert_no_empty_composite_selections(&schema, &step.definition.selection_set);
    }
}

#[test]
fn foreign_subtrees_behind_an_unreachable_owner_yield_no_plan() {
    // Only S1 can navigate `A.b`, only S2 can resolve `B.z`, and `B` is not
    // lookupable: no step combination covers the subtree, and no partially
    // planned document leaks out.
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
            b: B @fusion__field(schema: "S1")
        }

        type B @fusion__type(schema: "S1") @fusion__type(schema: "S2") {
            z: Int @fusion__field(schema: "S2")
        }
        "#,
    );
    let error = try_plan(&schema, "{ a { b { z } } }").unwrap_err();
    assert_eq!(error, fusion_planner::PlanError::NoPlanFound);
}

#[test]
fn multi_argument_lookups_draw_one_requirement_per_argument() {
    let schema = composite(
        r#"
        type Query {
            a: A @fusion__field(schema: "S1")
            lookup(id: ID!, key: String!): A @fusion__field(schema: "S2")
        }

        type A
            @fusion__type(schema: "S1")
            @fusion__type(schema: "S2")
            @fusion__lookup(schema: "S2", field: "lookup", map: ["id", "key"])
        {
            id: ID!
            key: String!
            x: Int @fusion__field(schema: "S1")
            y: Int @fusion__field(schema: "S2")
        }
        "#,
    );
    let plan = plan(&schema, "{ a { x y } }");

    let first = step_on_schema(&plan, "S1");
    let second = step_on_schema(&plan, "S2");

    // Both key fields were gathered by the providing step.
    assert_eq!(
        field_names_at(&first.definition.selection_set, &["a"]),
        vec!["id", "key", "x"]
    );

    let keys: Vec<&String> = second.requirements.keys().collect();
    assert_eq!(keys, vec!["__fusion_1_id", "__fusion_2_key"]);

    let variables: Vec<&str> = second
        .definition
        .variables
        .iter()
        .map(|variable| variable.name.as_str())
        .collect();
    assert_eq!(variables, vec!["__fusion_1_id", "__fusion_2_key"]);

    // Requirement records point back at the gathering position and carry the
    // per-argument selection maps.
    let id_requirement = &second.requirements["__fusion_1_id"];
    assert!(id_requirement
        .selection_map
        .fields()
        .any(|field| field.name == "id"));
    let key_requirement = &second.requirements["__fusion_2_key"];
    assert!(key_requirement
        .selection_map
        .fields()
        .any(|field| field.name == "key"));
}

#[test]
fn the_best_direct_lookup_wins_over_ordinal_later_ones() {
    // Two public, direct, single-argument lookups on the same schema; the
    // deterministic key (field name) decides.
    let schema = composite(
        r#"
        type Query {
            a: A @fusion__field(schema: "S1")
            aById(id: ID!): A @fusion__field(schema: "S2")
            aByKey(key: String!): A @fusion__field(schema: "S2")
        }

        type A
            @fusion__type(schema: "S1")
            @fusion__type(schema: "S2")
            @fusion__lookup(schema: "S2", field: "aByKey", map: ["key"])
            @fusion__lookup(schema: "S2", field: "aById", map: ["id"])
        {
            id: ID!
            key: String!
            x: Int @fusion__field(schema: "S1")
            y: Int @fusion__field(schema: "S2")
        }
        "#,
    );
    let plan = plan(&schema, "{ a { x y } }");

    let second = step_on_schema(&plan, "S2");
    assert_eq!(second.lookup.as_ref().unwrap().field_name, "aById");
}

#[test]
fn internal_lookups_are_not_direct_candidates() {
    let schema = composite(
        r#"
        type Query {
            a: A @fusion__field(schema: "S1")
            aInternal(id: ID!): A @fusion__field(schema: "S2")
            aPublic(id: ID!): A @fusion__field(schema: "S2")
        }

        type A
            @fusion__type(schema: "S1")
            @fusion__type(schema: "S2")
            @fusion__lookup(schema: "S2", field: "aInternal", map: ["id"], internal: true)
            @fusion__lookup(schema: "S2", field: "aPublic", map: ["id"])
        {
            id: ID!
            x: Int @fusion__field(schema: "S1")
            y: Int @fusion__field(schema: "S2")
        }
        "#,
    );
    let plan = plan(&schema, "{ a { x y } }");

    let second = step_on_schema(&plan, "S2");
    assert_eq!(second.lookup.as_ref().unwrap().field_name, "aPublic");
    assert_eq!(second.id, StepId(2));
}
