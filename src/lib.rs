//! Operation planning for GraphQL composite schemas.
//!
//! Given a validated client operation and a composite schema annotated with
//! `fusion__*` source-schema metadata, the planner partitions the operation
//! across source schemas and searches, best-first with branch-and-bound
//! pruning, for the cheapest set of per-schema operation steps that covers
//! it. The output is an [`OperationPlan`]: ordered steps with dependency and
//! requirement wiring, plus the rewritten operation the executor works from.
//!
//! ```no_run
//! use fusion_planner::schema::CompositeSchema;
//! use fusion_planner::OperationPlanner;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = Arc::new(CompositeSchema::parse("type Query { ping: String }")?);
//! let document = apollo_compiler::ExecutableDocument::parse_and_validate(
//!     schema.schema(),
//!     "{ ping }",
//!     "op.graphql",
//! )?;
//! let operation = document.operations.iter().next().expect("one operation").clone();
//!
//! let planner = OperationPlanner::new(schema);
//! let plan = planner.create_plan("op-1", "deadbeef", "dead", operation)?;
//! println!("{}", serde_json::to_string_pretty(&plan.summary())?);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod events;
pub mod operation;
pub mod operation_plan;
pub mod schema;

pub use crate::error::PlanError;
pub use crate::error::PlanErrorKind;
pub use crate::events::NoopEventSink;
pub use crate::events::PlanEventSink;
pub use crate::events::TracingEventSink;
pub use crate::operation_plan::planner::OperationPlanner;
pub use crate::operation_plan::planner::OperationPlannerOptions;
pub use crate::operation_plan::OperationPlan;
pub use crate::operation_plan::OperationPlanStep;
pub use crate::operation_plan::NodeFieldPlanStep;
pub use crate::operation_plan::PlanStep;
pub use crate::operation_plan::StepId;
