/*!
 * Structured Tracing
 * Subscriber setup and timed spans for host-side worker requests
 *
 * Environment variables:
 * - RUST_LOG: log level filter (default: info)
 * - SCHED_TRACE_JSON: JSON output when "1" or "true"
 */

use crate::core::Pid;
use std::time::{Duration, Instant};
use tracing::{debug, field, span, warn, Level, Span};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

pub const TRACE_JSON_ENV: &str = "SCHED_TRACE_JSON";

/// Requests slower than this are reported at warn level
const SLOW_REQUEST: Duration = Duration::from_millis(50);

fn json_requested() -> bool {
    std::env::var(TRACE_JSON_ENV)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false)
}

/// Install the global subscriber; false if one was already installed
///
/// `log` records are bridged into the subscriber as well.
pub fn try_init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if json_requested() {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_line_number(true)
                    .with_file(true)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_line_number(true)
                    .with_file(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };
    if installed {
        debug!(json = json_requested(), "structured tracing initialized");
    }
    installed
}

/// Install the global subscriber (idempotent)
pub fn init_tracing() {
    if !try_init_tracing() {
        debug!("tracing subscriber already installed");
    }
}

// ============================================================================
// Request Spans
// ============================================================================

/// Timed span around one host-side request into a worker
pub struct RequestSpan {
    span: Span,
    start: Instant,
    request: &'static str,
}

impl RequestSpan {
    pub fn new(request: &'static str, pid: Pid) -> Self {
        let span = span!(
            Level::DEBUG,
            "host_request",
            request,
            pid = pid.raw(),
            duration_us = field::Empty,
            result = field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
            request,
        }
    }

    pub fn record_result(&self, success: bool) {
        self.span.record("result", if success { "success" } else { "error" });
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for RequestSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_us", duration.as_micros() as u64);
        if duration > SLOW_REQUEST {
            warn!(
                request = self.request,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow host request"
            );
        }
    }
}

#[inline]
pub fn span_request(request: &'static str, pid: Pid) -> RequestSpan {
    RequestSpan::new(request, pid)
}
