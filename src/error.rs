use std::fmt::Display;

/// The error surface of [`crate::OperationPlanner::create_plan`].
///
/// `InvariantViolation` and `InvalidArgument` indicate bugs (in the caller or
/// in schema metadata), not conditions a gateway should retry; `NoPlanFound`
/// is the one outcome a correct caller can reasonably observe on bad luck:
/// the composite schema offers no combination of source schemas that covers
/// the operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
    #[error("no operation plan could be found for the operation")]
    NoPlanFound,
    #[error("planner invariant violated: {message}")]
    InvariantViolation { message: String },
    #[error("composite schema metadata error: {message}")]
    SchemaMetadata { message: String },
}

impl PlanError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        PlanError::InvalidArgument {
            message: message.into(),
        }
    }

    /// An invariant violation: schema metadata or a partitioner broke its
    /// contract mid-search. The message should name the broken expectation.
    pub(crate) fn internal(message: impl Display) -> Self {
        PlanError::InvariantViolation {
            message: message.to_string(),
        }
    }

    pub(crate) fn schema(message: impl Display) -> Self {
        PlanError::SchemaMetadata {
            message: message.to_string(),
        }
    }

    /// Stable label for event-sink reporting.
    pub fn kind(&self) -> PlanErrorKind {
        match self {
            PlanError::InvalidArgument { .. } => PlanErrorKind::InvalidArgument,
            PlanError::NoPlanFound => PlanErrorKind::NoPlanFound,
            PlanError::InvariantViolation { .. } => PlanErrorKind::InvariantViolation,
            PlanError::SchemaMetadata { .. } => PlanErrorKind::SchemaMetadata,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::IntoStaticStr)]
pub enum PlanErrorKind {
    #[strum(to_string = "invalid-argument")]
    InvalidArgument,
    #[strum(to_string = "no-plan-found")]
    NoPlanFound,
    #[strum(to_string = "invariant-violation")]
    InvariantViolation,
    #[strum(to_string = "schema-metadata")]
    SchemaMetadata,
}
