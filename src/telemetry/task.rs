//! Task operation span helpers.

use opentelemetry::KeyValue;
use tracing::Span;

use super::metrics;
use crate::model::{Status, TaskId};

/// Start a span for one task operation (`claim`, `complete`, ...).
///
/// `task.outcome` is declared empty; fill it with [`record_outcome`].
pub fn start_task_span(operation: &'static str, task_id: TaskId) -> Span {
    tracing::info_span!(
        "task.operation",
        "task.operation" = operation,
        "task.id" = %task_id,
        "task.outcome" = tracing::field::Empty,
    )
}

pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("task.outcome", outcome);
}

/// Log a transition inside `span` and count it.
pub fn record_state_transition(span: &Span, from: Status, to: Status) {
    span.in_scope(|| {
        tracing::info!(from = %from, to = %to, "state_transition");
    });
    metrics::task_state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.as_str()),
            KeyValue::new("to", to.as_str()),
        ],
    );
}
