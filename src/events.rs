//! Structured planning events.
//!
//! The planner reports its lifecycle through a sink so hosts can wire
//! diagnostics without the planner knowing about their telemetry stack. Sinks
//! must be best-effort and non-blocking; the planner never waits on them.

use apollo_compiler::executable::OperationType;
use std::time::Duration;

/// Receiver for planner lifecycle events. All methods default to no-ops, so
/// implementations override only what they care about.
pub trait PlanEventSink: Send + Sync {
    /// Planning started for an operation with `root_count` seeded work items.
    fn plan_start(&self, id: &str, operation_type: OperationType, root_count: usize) {
        let _ = (id, operation_type, root_count);
    }

    /// Planning finished successfully.
    fn plan_stop(
        &self,
        id: &str,
        elapsed: Duration,
        search_space: usize,
        expanded_nodes: usize,
        step_count: usize,
    ) {
        let _ = (id, elapsed, search_space, expanded_nodes, step_count);
    }

    /// Planning failed; `error_kind` is a stable label of the error category.
    fn plan_error(
        &self,
        id: &str,
        operation_type: OperationType,
        error_kind: &'static str,
        elapsed: Duration,
    ) {
        let _ = (id, operation_type, error_kind, elapsed);
    }

    /// One search cycle dequeued a plan node.
    fn plan_dequeue(
        &self,
        id: &str,
        cycle: usize,
        queue_length: usize,
        work_item: &'static str,
        schema_name: Option<&str>,
    ) {
        let _ = (id, cycle, queue_length, work_item, schema_name);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl PlanEventSink for NoopEventSink {}

/// Emits events as `tracing` records under the `fusion_planner` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl PlanEventSink for TracingEventSink {
    fn plan_start(&self, id: &str, operation_type: OperationType, root_count: usize) {
        tracing::debug!(
            operation.id = id,
            operation.r#type = ?operation_type,
            root_count,
            "operation planning started"
        );
    }

    fn plan_stop(
        &self,
        id: &str,
        elapsed: Duration,
        search_space: usize,
        expanded_nodes: usize,
        step_count: usize,
    ) {
        tracing::debug!(
            operation.id = id,
            elapsed_ms = elapsed.as_millis() as u64,
            search_space,
            expanded_nodes,
            step_count,
            "operation planning finished"
        );
    }

    fn plan_error(
        &self,
        id: &str,
        operation_type: OperationType,
        error_kind: &'static str,
        elapsed: Duration,
    ) {
        tracing::debug!(
            operation.id = id,
            operation.r#type = ?operation_type,
            error.kind = error_kind,
            elapsed_ms = elapsed.as_millis() as u64,
            "operation planning failed"
        );
    }

    fn plan_dequeue(
        &self,
        id: &str,
        cycle: usize,
        queue_length: usize,
        work_item: &'static str,
        schema_name: Option<&str>,
    ) {
        tracing::trace!(
            operation.id = id,
            cycle,
            queue_length,
            work_item,
            schema = schema_name,
            "dequeued plan node"
        );
    }
}
