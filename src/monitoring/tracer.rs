/*!
 * Structured Tracing
 * Subscriber setup and tick spans using the tracing crate
 *
 * Features:
 * - EnvFilter driven levels (RUST_LOG)
 * - JSON-formatted logs for structured parsing
 * - One span per unit tick with the report recorded on close
 * - Slow tick warnings
 */

use crate::core::limits::SLOW_TICK_THRESHOLD;
use crate::core::types::Context;
use crate::scheduler::TickReport;
use std::time::Instant;
use tracing::{debug, info, span, warn, Level, Span};
use tracing_subscriber::{
    fmt::format::FmtSpan,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - TICKFLOW_TRACE_JSON: Enable JSON output (default: false)
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("TICKFLOW_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        // JSON output for production/parsing
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        // Human-readable output for development
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        info!(json = use_json, "Structured tracing initialized");
    }
}

/// Span covering one tick of one execution unit
pub struct TickSpan {
    span: Span,
    start: Instant,
    context: Context,
}

impl TickSpan {
    pub fn new(context: Context, frame: u64) -> Self {
        let span = span!(
            Level::TRACE,
            "tick",
            context = context.name(),
            frame = frame,
            added = tracing::field::Empty,
            removed = tracing::field::Empty,
            polled = tracing::field::Empty,
            budget_exhausted = tracing::field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
            context,
        }
    }

    /// Record the tick's outcome on the span
    pub fn record(&self, report: &TickReport) {
        self.span.record("added", report.added);
        self.span.record("removed", report.removed);
        self.span.record("polled", report.polled);
        self.span.record("budget_exhausted", report.budget_exhausted);
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for TickSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        if duration > SLOW_TICK_THRESHOLD && !self.context.is_time_sliced() {
            let _entered = self.span.enter();
            warn!(
                context = %self.context,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow tick detected"
            );
        } else if duration > SLOW_TICK_THRESHOLD {
            debug!(
                context = %self.context,
                duration_us = duration.as_micros() as u64,
                "time-sliced tick ran past the slow threshold"
            );
        }
    }
}

/// Helper to create a tick span
#[inline]
pub fn span_tick(context: Context, frame: u64) -> TickSpan {
    TickSpan::new(context, frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing();
        init_tracing();
    }

    #[test]
    fn test_tick_span_records_report() {
        let span = span_tick(Context::Update, 3);
        let report = TickReport {
            added: 2,
            polled: 5,
            ..TickReport::default()
        };
        let _entered = span.enter();
        span.record(&report);
    }
}
