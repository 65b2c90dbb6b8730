/*!
 * Tracing
 * Structured logging setup and work-item spans built on the tracing crate
 *
 * Features:
 * - EnvFilter driven levels (RUST_LOG)
 * - Optional JSON output for machine parsing
 * - Per-work-item spans with slow item detection
 */

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level, Span};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - KERNEL_SYNC_TRACE_JSON: Enable JSON output (default: false)
///
/// Calling this more than once is harmless; only the first call installs a
/// subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("KERNEL_SYNC_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
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
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = use_json, "Structured tracing initialized");
    }
}

static NEXT_WORK_ITEM: AtomicU64 = AtomicU64::new(1);

/// Span around the execution of one pool work item
///
/// Logs completion at debug level on drop, or a warning if the item ran
/// longer than the slow threshold.
pub struct WorkItemSpan {
    span: Span,
    start: Instant,
    item_id: u64,
    slow_threshold: Duration,
    panicked: bool,
}

impl WorkItemSpan {
    pub fn new(slow_threshold: Duration) -> Self {
        let item_id = NEXT_WORK_ITEM.fetch_add(1, Ordering::Relaxed);
        let span = span!(
            Level::TRACE,
            "work_item",
            item_id = item_id,
            duration_us = tracing::field::Empty,
            result = tracing::field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            item_id,
            slow_threshold,
            panicked: false,
        }
    }

    #[inline]
    pub fn item_id(&self) -> u64 {
        self.item_id
    }

    /// Mark the item as having panicked
    pub fn record_panic(&mut self, message: &str) {
        self.panicked = true;
        self.span.record("result", "panicked");
        warn!(parent: &self.span, item_id = self.item_id, panic = message, "work item panicked");
    }

    /// Enter the span for the duration of the item
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for WorkItemSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.span.record("duration_us", duration.as_micros() as u64);
        if !self.panicked {
            self.span.record("result", "ok");
        }

        if duration > self.slow_threshold {
            warn!(
                parent: &self.span,
                item_id = self.item_id,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow work item detected"
            );
        } else {
            debug!(
                parent: &self.span,
                item_id = self.item_id,
                duration_us = duration.as_micros() as u64,
                "work item completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test_tracing() {
        let _ = tracing_subscriber::registry()
            .with(EnvFilter::new("debug"))
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init();
    }

    #[test]
    fn test_work_item_ids_increase() {
        init_test_tracing();

        let first = WorkItemSpan::new(Duration::from_secs(1));
        let second = WorkItemSpan::new(Duration::from_secs(1));
        assert!(second.item_id() > first.item_id());
    }

    #[test]
    fn test_slow_work_item_detection() {
        init_test_tracing();

        let span = WorkItemSpan::new(Duration::from_millis(1));
        let _entered = span.enter();
        std::thread::sleep(Duration::from_millis(5));
        drop(_entered);
        // Dropping logs a slow item warning
        drop(span);
    }

    #[test]
    fn test_panicked_item_is_recorded() {
        init_test_tracing();

        let mut span = WorkItemSpan::new(Duration::from_secs(1));
        span.record_panic("boom");
    }

    #[test]
    fn test_init_tracing_twice() {
        init_tracing();
        init_tracing();
    }
}
