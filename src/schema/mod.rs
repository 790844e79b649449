//! The composite schema and its planner-facing metadata.
//!
//! A composite schema is a validated GraphQL schema whose types carry
//! `fusion__*` directives describing which source schemas contribute which
//! types, fields and lookups:
//!
//! - `@fusion__type(schema:)` marks a type as present in a source schema.
//! - `@fusion__field(schema:, requires:)` marks a field as resolvable by a
//!   source schema, optionally naming sibling data the resolver needs first.
//!   Fields without any application fall back to the type-level memberships.
//! - `@fusion__lookup(schema:, field:, map:, path:, internal:)` declares on an
//!   entity type that a source schema can resolve it by key through the named
//!   field; `map[i]` is the field set feeding argument `i`.
//!
//! All metadata is extracted once at construction; the resulting tables are
//! read-only and may be shared across plans and threads.

use crate::error::PlanError;
use apollo_compiler::ast::Value;
use apollo_compiler::executable::FieldSet;
use apollo_compiler::executable::OperationType;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;
use apollo_compiler::validation::Valid;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use indexmap::IndexMap;
use indexmap::IndexSet;
use itertools::Itertools;
use multimap::MultiMap;
use std::sync::Arc;

pub mod lookup;

pub use lookup::Lookup;

/// Name of one contributing source schema (subgraph).
pub type SourceSchemaName = Arc<str>;

pub(crate) const TYPE_DIRECTIVE_NAME: &str = "fusion__type";
pub(crate) const FIELD_DIRECTIVE_NAME: &str = "fusion__field";
pub(crate) const LOOKUP_DIRECTIVE_NAME: &str = "fusion__lookup";

/// Which source schemas can resolve one field, and at what price.
#[derive(Debug, Clone)]
pub struct FieldResolution {
    pub field_name: Name,
    /// Source schemas able to resolve the field, ordinal-ordered.
    pub schemas: IndexSet<SourceSchemaName>,
    /// Per-schema `requires` selections; a schema present here can resolve
    /// the field only once the selected sibling data is available.
    pub requirements: IndexMap<SourceSchemaName, SelectionSet>,
}

impl FieldResolution {
    pub fn contains_schema(&self, schema_name: &str) -> bool {
        self.schemas.contains(schema_name)
    }

    pub fn has_requirements(&self, schema_name: &str) -> bool {
        self.requirements.contains_key(schema_name)
    }

    pub fn requirements_for(&self, schema_name: &str) -> Option<&SelectionSet> {
        self.requirements.get(schema_name)
    }
}

/// How well one source schema covers a selection set; candidate ranking for
/// root planning.
#[derive(Debug, Clone)]
pub struct SchemaFit {
    pub schema_name: SourceSchemaName,
    pub cost: f64,
}

/// A validated composite schema plus the extracted fusion metadata.
#[derive(Debug)]
pub struct CompositeSchema {
    schema: Valid<Schema>,
    /// All contributing source schemas, ordinal-ordered.
    source_schemas: Vec<SourceSchemaName>,
    field_resolutions: IndexMap<(Name, Name), Arc<FieldResolution>>,
    lookups_by_type: MultiMap<Name, Arc<Lookup>>,
}

impl CompositeSchema {
    pub fn parse(sdl: &str) -> Result<Self, PlanError> {
        let schema =
            Schema::parse_and_validate(sdl, "composite.graphql").map_err(PlanError::schema)?;
        Self::new(schema)
    }

    pub fn new(schema: Valid<Schema>) -> Result<Self, PlanError> {
        let mut source_schemas: IndexSet<SourceSchemaName> = IndexSet::new();
        let mut field_resolutions: IndexMap<(Name, Name), Arc<FieldResolution>> = IndexMap::new();
        let mut lookups_by_type: MultiMap<Name, Arc<Lookup>> = MultiMap::new();

        for (type_name, ty) in &schema.types {
            if ty.is_built_in() {
                continue;
            }

            let type_schemas: IndexSet<SourceSchemaName> = ty
                .directives()
                .get_all(TYPE_DIRECTIVE_NAME)
                .filter_map(|directive| directive.specified_argument_by_name("schema"))
                .filter_map(|value| value.as_str())
                .map(SourceSchemaName::from)
                .collect();
            source_schemas.extend(type_schemas.iter().cloned());

            let fields = match ty {
                ExtendedType::Object(object) => Some(&object.fields),
                ExtendedType::Interface(interface) => Some(&interface.fields),
                _ => None,
            };
            if let Some(fields) = fields {
                for (field_name, field) in fields {
                    let resolution = extract_field_resolution(
                        &schema,
                        type_name,
                        field_name,
                        field,
                        &type_schemas,
                    )?;
                    source_schemas.extend(resolution.schemas.iter().cloned());
                    field_resolutions.insert(
                        (type_name.clone(), field_name.clone()),
                        Arc::new(resolution),
                    );
                }
            }

            for directive in ty.directives().get_all(LOOKUP_DIRECTIVE_NAME) {
                let lookup = extract_lookup(&schema, type_name, directive)?;
                source_schemas.insert(lookup.schema_name.clone());
                lookups_by_type.insert(type_name.clone(), Arc::new(lookup));
            }
        }

        let source_schemas = source_schemas
            .into_iter()
            .sorted_unstable()
            .collect::<Vec<_>>();

        Ok(CompositeSchema {
            schema,
            source_schemas,
            field_resolutions,
            lookups_by_type,
        })
    }

    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    pub fn source_schemas(&self) -> &[SourceSchemaName] {
        &self.source_schemas
    }

    /// The root type name for the given operation type.
    pub fn operation_type_name(&self, operation_type: OperationType) -> Result<Name, PlanError> {
        self.schema
            .root_operation(operation_type)
            .cloned()
            .ok_or_else(|| {
                PlanError::schema(format!(
                    "composite schema declares no {operation_type} root type"
                ))
            })
    }

    pub fn query_type_name(&self) -> Result<Name, PlanError> {
        self.operation_type_name(OperationType::Query)
    }

    pub fn is_abstract_type(&self, name: &str) -> bool {
        matches!(
            self.schema.types.get(name),
            Some(ExtendedType::Interface(_)) | Some(ExtendedType::Union(_))
        )
    }

    pub fn is_object_type(&self, name: &str) -> bool {
        matches!(self.schema.types.get(name), Some(ExtendedType::Object(_)))
    }

    /// Concrete object types that can occur where the given type is expected.
    pub fn possible_types(&self, name: &Name) -> Vec<Name> {
        match self.schema.types.get(name.as_str()) {
            Some(ExtendedType::Object(_)) => vec![name.clone()],
            Some(ExtendedType::Union(union_)) => union_
                .members
                .iter()
                .map(|member| member.name.clone())
                .collect(),
            Some(ExtendedType::Interface(_)) => self
                .schema
                .types
                .iter()
                .filter_map(|(candidate, ty)| match ty {
                    ExtendedType::Object(object)
                        if object
                            .implements_interfaces
                            .iter()
                            .any(|interface| interface.name == *name) =>
                    {
                        Some(candidate.clone())
                    }
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn field_definition(&self, type_name: &Name, field_name: &Name) -> Option<Node<FieldDefinition>> {
        self.schema
            .type_field(type_name, field_name)
            .ok()
            .map(|component| component.node.clone())
    }

    /// Resolution metadata for a field, or `None` for meta fields
    /// (`__typename`, introspection) and unknown coordinates.
    pub fn try_get_field_resolution(
        &self,
        type_name: &Name,
        field_name: &Name,
    ) -> Option<Arc<FieldResolution>> {
        if field_name.as_str().starts_with("__") {
            return None;
        }
        self.field_resolutions
            .get(&(type_name.clone(), field_name.clone()))
            .cloned()
    }

    /// Ranks the source schemas able to serve a selection set, ascending by
    /// fit cost, then by ordinal schema name.
    pub fn possible_schemas(&self, selection_set: &SelectionSet) -> Vec<SchemaFit> {
        let mut resolutions = Vec::new();
        self.collect_resolutions(selection_set, &selection_set.ty, &mut resolutions);
        let total_fields = resolutions.len();
        if total_fields == 0 {
            return Vec::new();
        }

        let candidates: IndexSet<SourceSchemaName> = resolutions
            .iter()
            .flat_map(|resolution| resolution.schemas.iter().cloned())
            .collect();

        let mut fits = Vec::new();
        for schema_name in candidates {
            let mut resolvable = 0usize;
            let mut with_requirements = 0usize;
            let mut spillover: IndexSet<&SourceSchemaName> = IndexSet::new();
            for resolution in &resolutions {
                if resolution.contains_schema(&schema_name) {
                    resolvable += 1;
                    if resolution.has_requirements(&schema_name) {
                        with_requirements += 1;
                    }
                } else {
                    spillover.extend(
                        resolution
                            .schemas
                            .iter()
                            .filter(|other| **other != schema_name),
                    );
                }
            }
            let coverage = resolvable as f64 / total_fields as f64;
            let cost = (1.0 - coverage).powi(2) * 20.0
                + spillover.len() as f64 * 5.0
                + with_requirements as f64 * 2.0;
            fits.push(SchemaFit { schema_name, cost });
        }

        fits.sort_by(|a, b| {
            a.cost
                .total_cmp(&b.cost)
                .then_with(|| a.schema_name.cmp(&b.schema_name))
        });
        fits
    }

    /// Counts the distinct *other* source schemas that own fields of the
    /// selection set the given schema cannot serve. A field the schema owns
    /// only with requirements contributes a sentinel entry instead.
    pub fn spillover_schema_count(
        &self,
        selection_set: &SelectionSet,
        schema_name: &str,
        requirement_marker: &str,
    ) -> usize {
        let mut resolutions = Vec::new();
        self.collect_resolutions(selection_set, &selection_set.ty, &mut resolutions);

        let mut spillover: IndexSet<&str> = IndexSet::new();
        for resolution in &resolutions {
            if resolution.contains_schema(schema_name) {
                if resolution.has_requirements(schema_name) {
                    spillover.insert(requirement_marker);
                }
            } else {
                spillover.extend(
                    resolution
                        .schemas
                        .iter()
                        .map(|other| other.as_ref())
                        .filter(|other| *other != schema_name),
                );
            }
        }
        spillover.len()
    }

    fn collect_resolutions(
        &self,
        selection_set: &SelectionSet,
        parent_type: &Name,
        into: &mut Vec<Arc<FieldResolution>>,
    ) {
        for selection in &selection_set.selections {
            match selection {
                Selection::Field(field) => {
                    if field.name == crate::operation::NODE_FIELD_NAME {
                        continue;
                    }
                    if let Some(resolution) = self.try_get_field_resolution(parent_type, &field.name)
                    {
                        into.push(resolution);
                    }
                }
                Selection::InlineFragment(inline) => {
                    let ty = inline.type_condition.as_ref().unwrap_or(parent_type);
                    self.collect_resolutions(&inline.selection_set, ty, into);
                }
                Selection::FragmentSpread(_) => {}
            }
        }
    }

    /// Whether any source schema declares a lookup for the given type.
    pub fn has_lookups(&self, type_name: &Name) -> bool {
        self.lookups_by_type
            .get_vec(type_name)
            .map_or(false, |lookups| !lookups.is_empty())
    }

    /// The preferred direct lookup for an entity on the target schema:
    /// public, root-level, fewest arguments, determinism key as tie-break.
    pub fn try_get_best_direct_lookup(
        &self,
        type_name: &Name,
        exclude_schemas: &IndexSet<SourceSchemaName>,
        target_schema: &str,
    ) -> Option<Arc<Lookup>> {
        self.lookups_by_type
            .get_vec(type_name)?
            .iter()
            .filter(|lookup| lookup.schema_name.as_ref() == target_schema)
            .filter(|lookup| !exclude_schemas.contains(lookup.schema_name.as_ref()))
            .filter(|lookup| !lookup.internal && lookup.is_direct())
            .min_by(|a, b| {
                a.argument_count()
                    .cmp(&b.argument_count())
                    .then_with(|| a.determinism_key().cmp(&b.determinism_key()))
            })
            .cloned()
    }

    /// All lookups for an entity (optionally restricted to one source
    /// schema), ordered by the deterministic lookup key.
    pub fn possible_lookups_ordered(
        &self,
        type_name: &Name,
        schema_name: Option<&str>,
    ) -> Vec<Arc<Lookup>> {
        let Some(lookups) = self.lookups_by_type.get_vec(type_name) else {
            return Vec::new();
        };
        lookups
            .iter()
            .filter(|lookup| {
                schema_name.map_or(true, |schema_name| lookup.schema_name.as_ref() == schema_name)
            })
            .sorted_by_cached_key(|lookup| lookup.determinism_key())
            .cloned()
            .collect()
    }

    /// The best public by-id lookup for an entity, preferring lookups whose
    /// return type is concrete.
    pub fn best_by_id_lookup(
        &self,
        type_name: &Name,
        schema_name: Option<&str>,
    ) -> Option<Arc<Lookup>> {
        self.lookups_by_type
            .get_vec(type_name)?
            .iter()
            .filter(|lookup| lookup.is_by_id())
            .filter(|lookup| {
                schema_name.map_or(true, |schema_name| lookup.schema_name.as_ref() == schema_name)
            })
            .min_by_key(|lookup| {
                (
                    self.is_abstract_type(lookup.return_type()),
                    lookup.determinism_key(),
                )
            })
            .cloned()
    }
}

fn extract_field_resolution(
    schema: &Valid<Schema>,
    type_name: &Name,
    field_name: &Name,
    field: &FieldDefinition,
    type_schemas: &IndexSet<SourceSchemaName>,
) -> Result<FieldResolution, PlanError> {
    let mut schemas: IndexSet<SourceSchemaName> = IndexSet::new();
    let mut requirements: IndexMap<SourceSchemaName, SelectionSet> = IndexMap::new();

    for directive in field.directives.get_all(FIELD_DIRECTIVE_NAME) {
        let schema_name: SourceSchemaName = directive
            .specified_argument_by_name("schema")
            .and_then(|value| value.as_str())
            .map(SourceSchemaName::from)
            .ok_or_else(|| {
                PlanError::schema(format!(
                    "@{FIELD_DIRECTIVE_NAME} on {type_name}.{field_name} is missing `schema`"
                ))
            })?;
        schemas.insert(schema_name.clone());

        if let Some(requires) = directive
            .specified_argument_by_name("requires")
            .and_then(|value| value.as_str())
        {
            let field_set = FieldSet::parse(schema, type_name.clone(), requires, "requires.graphql")
                .map_err(|err| {
                    PlanError::schema(format!(
                        "invalid `requires` on {type_name}.{field_name}: {err}"
                    ))
                })?;
            requirements.insert(schema_name, field_set.selection_set);
        }
    }

    if schemas.is_empty() {
        schemas = type_schemas.clone();
    }
    schemas.sort_unstable();

    Ok(FieldResolution {
        field_name: field_name.clone(),
        schemas,
        requirements,
    })
}

fn extract_lookup(
    schema: &Valid<Schema>,
    type_name: &Name,
    directive: &apollo_compiler::ast::Directive,
) -> Result<Lookup, PlanError> {
    let describe = || format!("@{LOOKUP_DIRECTIVE_NAME} on {type_name}");

    let schema_name: SourceSchemaName = directive
        .specified_argument_by_name("schema")
        .and_then(|value| value.as_str())
        .map(SourceSchemaName::from)
        .ok_or_else(|| PlanError::schema(format!("{} is missing `schema`", describe())))?;

    let field_name = directive
        .specified_argument_by_name("field")
        .and_then(|value| value.as_str())
        .ok_or_else(|| PlanError::schema(format!("{} is missing `field`", describe())))
        .and_then(|raw| {
            Name::new(raw)
                .map_err(|err| PlanError::schema(format!("{}: bad field name: {err}", describe())))
        })?;

    let path: Vec<Name> = match directive
        .specified_argument_by_name("path")
        .and_then(|value| value.as_str())
    {
        Some(raw) if !raw.is_empty() => raw
            .split('.')
            .map(|segment| {
                Name::new(segment).map_err(|err| {
                    PlanError::schema(format!("{}: bad path segment: {err}", describe()))
                })
            })
            .collect::<Result<_, _>>()?,
        _ => Vec::new(),
    };

    let internal = directive
        .specified_argument_by_name("internal")
        .is_some_and(|value| **value == Value::Boolean(true));

    // Resolve the lookup field definition by walking `path` from the root.
    let query_type = schema
        .root_operation(OperationType::Query)
        .ok_or_else(|| PlanError::schema("composite schema declares no query root type"))?;
    let mut parent = query_type.clone();
    for segment in &path {
        let field = schema.type_field(&parent, segment).map_err(|_| {
            PlanError::schema(format!(
                "{}: path segment `{segment}` not found on `{parent}`",
                describe()
            ))
        })?;
        parent = field.ty.inner_named_type().clone();
    }
    let field_definition = schema
        .type_field(&parent, &field_name)
        .map_err(|_| {
            PlanError::schema(format!(
                "{}: lookup field `{field_name}` not found on `{parent}`",
                describe()
            ))
        })?
        .node
        .clone();

    let map_values = directive
        .specified_argument_by_name("map")
        .ok_or_else(|| PlanError::schema(format!("{} is missing `map`", describe())))?;
    let map_entries: Vec<&str> = match map_values.as_ref() {
        Value::List(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| PlanError::schema(format!("{}: `map` must be strings", describe())))
            })
            .collect::<Result<_, _>>()?,
        Value::String(single) => vec![single.as_str()],
        _ => {
            return Err(PlanError::schema(format!(
                "{}: `map` must be a list of strings",
                describe()
            )))
        }
    };
    if map_entries.len() != field_definition.arguments.len() {
        return Err(PlanError::schema(format!(
            "{}: `map` has {} entries but `{field_name}` takes {} arguments",
            describe(),
            map_entries.len(),
            field_definition.arguments.len(),
        )));
    }

    let requirements = map_entries
        .iter()
        .map(|&entry| {
            FieldSet::parse(schema, type_name.clone(), entry, "lookup-map.graphql")
                .map(|field_set| field_set.selection_set)
                .map_err(|err| {
                    PlanError::schema(format!("{}: invalid `map` entry: {err}", describe()))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Lookup {
        schema_name,
        target_type: type_name.clone(),
        field_name,
        field_definition,
        requirements,
        path,
        internal,
    })
}
