//! Best-effort observability hooks for drain cycles.
//!
//! Hooks return nothing, so an observer cannot fail a drain.

use std::time::Instant;

/// Key/value pairs attached to spans and metrics
pub type Attributes<'a> = &'a [(&'a str, String)];

/// A unit of work being traced
pub trait ObservedSpan: Send {
    fn record_error(&mut self, error: &str);

    fn end(self: Box<Self>);
}

/// Receives spans and metrics emitted by the orchestrator
pub trait Observer: Send + Sync {
    fn start_span(&self, name: &str, attributes: Attributes<'_>) -> Box<dyn ObservedSpan>;

    fn track_metric(&self, name: &str, value: f64, attributes: Attributes<'_>);
}

/// Default observer that reports through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

struct TracingSpan {
    span: tracing::Span,
    started: Instant,
    failed: bool,
}

impl ObservedSpan for TracingSpan {
    fn record_error(&mut self, error: &str) {
        self.failed = true;
        self.span.in_scope(|| tracing::warn!(error, "span recorded error"));
    }

    fn end(self: Box<Self>) {
        let elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let failed = self.failed;
        self.span
            .in_scope(|| tracing::debug!(elapsed_ms, failed, "span ended"));
    }
}

fn render(attributes: Attributes<'_>) -> String {
    attributes
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

impl Observer for TracingObserver {
    fn start_span(&self, name: &str, attributes: Attributes<'_>) -> Box<dyn ObservedSpan> {
        let span = tracing::debug_span!("ferry", op = name, attrs = %render(attributes));
        Box::new(TracingSpan {
            span,
            started: Instant::now(),
            failed: false,
        })
    }

    fn track_metric(&self, name: &str, value: f64, attributes: Attributes<'_>) {
        tracing::info!(metric = name, value, attrs = %render(attributes), "metric");
    }
}
