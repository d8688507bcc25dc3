//! Metric instruments.
//!
//! Created from the `"cosmos-tasks"` meter on the globally registered
//! `MeterProvider`; without one they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("cosmos-tasks")
}

/// Counter: claim attempts.
/// Labels: `result` ("ok" | "conflict" | "not_found" | "limit_exceeded" | "rate_limited" | "error").
pub fn task_claims() -> Counter<u64> {
    meter()
        .u64_counter("cosmos.task.claims")
        .with_description("Number of task claim attempts")
        .build()
}

/// Counter: completion attempts.
/// Labels: `result` ("ok" | "precondition_failed" | "error").
pub fn task_completions() -> Counter<u64> {
    meter()
        .u64_counter("cosmos.task.completions")
        .with_description("Number of task completion attempts")
        .build()
}

/// Counter: task state transitions.
/// Labels: `from`, `to`.
pub fn task_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("cosmos.task.state_transitions")
        .with_description("Number of task state transitions")
        .build()
}

/// Counter: sweeper ticks.
/// Labels: `result` ("ok" | "error").
pub fn sweep_ticks() -> Counter<u64> {
    meter()
        .u64_counter("cosmos.sweep.ticks")
        .with_description("Number of lifecycle sweep ticks")
        .build()
}

/// Histogram: sweep tick duration in milliseconds.
pub fn sweep_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("cosmos.sweep.duration_ms")
        .with_description("Lifecycle sweep tick duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: audit entries that could not be written.
/// Labels: `action`.
pub fn audit_write_failures() -> Counter<u64> {
    meter()
        .u64_counter("cosmos.audit.write_failures")
        .with_description("Audit entries dropped after a failed write")
        .build()
}
