//! Telemetry for the refresh queue.
//!
//! Events are named (`bg.sync.succeeded`, `bg.sync.failed`, ...) and carry a JSON object payload
//! plus an optional correlation id taken from the replayed request's `x-request-id` header.
//! They flow through `TelemetrySink` implementations, which are `tower::Service`s so they can
//! be wrapped and composed like any other service.
//!
//! Emission is fire-and-forget: `emit_best_effort` drops the event if the sink is not ready or
//! fails, so telemetry can never change the outcome of a drain.

pub mod events;
pub mod sinks;

pub use events::{names, TelemetryEvent};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NonBlockingSink, NullSink, TelemetrySink};
