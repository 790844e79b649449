use crate::schema::SourceSchemaName;
use apollo_compiler::ast::InputValueDefinition;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::schema::FieldDefinition;
use apollo_compiler::Name;
use apollo_compiler::Node;

/// A schema-declared way to resolve an entity type by key on one source
/// schema: a field (usually on the query type, possibly nested under `path`)
/// whose arguments are fed from data gathered elsewhere.
#[derive(Debug, Clone)]
pub struct Lookup {
    /// The source schema that can resolve the entity.
    pub schema_name: SourceSchemaName,
    /// The entity type this lookup resolves.
    pub target_type: Name,
    /// The lookup field on the source schema.
    pub field_name: Name,
    /// The composite-schema definition of the lookup field.
    pub field_definition: Node<FieldDefinition>,
    /// One selection map per argument: argument `i` takes its value from the
    /// data selected by `requirements[i]` on the entity.
    pub requirements: Vec<SelectionSet>,
    /// Field path from the query root to the lookup field; empty for a
    /// root-level (direct) lookup.
    pub path: Vec<Name>,
    /// Internal lookups are planner-only and never exposed to clients.
    pub internal: bool,
}

impl Lookup {
    pub fn arguments(&self) -> &[Node<InputValueDefinition>] {
        &self.field_definition.arguments
    }

    pub fn argument_count(&self) -> usize {
        self.field_definition.arguments.len()
    }

    /// Whether the lookup sits directly on the root type.
    pub fn is_direct(&self) -> bool {
        self.path.is_empty()
    }

    /// The named type the lookup field returns.
    pub fn return_type(&self) -> &Name {
        self.field_definition.ty.inner_named_type()
    }

    /// Whether this is a plain by-id lookup: public, a single argument fed
    /// from the entity's `id` field alone.
    pub fn is_by_id(&self) -> bool {
        if self.internal || self.argument_count() != 1 {
            return false;
        }
        let Some(requirement) = self.requirements.first() else {
            return false;
        };
        requirement.selections.len() == 1
            && requirement.fields().any(|field| {
                field.alias.is_none() && field.name == "id" && field.selection_set.is_empty()
            })
    }

    /// Key for deterministic ordering of otherwise equivalent lookups,
    /// compared by ordinal.
    pub fn determinism_key(&self) -> String {
        let requirement_field_count: usize = self
            .requirements
            .iter()
            .map(|selection_set| selection_set.selections.len())
            .sum();
        format!(
            "{}|{}|{}|{}|{}",
            self.schema_name,
            self.field_name,
            self.path
                .iter()
                .map(Name::to_string)
                .collect::<Vec<_>>()
                .join("."),
            self.argument_count(),
            requirement_field_count,
        )
    }
}
