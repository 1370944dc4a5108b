//! Send metrics
//!
//! # Metrics
//!
//! - `chat_sends_total`: Counter of sends that passed the quota check
//! - `chat_sends_blocked_total`: Counter of sends refused before streaming, by reason
//! - `chat_completion_failures_total`: Counter of failed completions
//! - `chat_persist_failures_total`: Counter of failed writes after a completion, by target
//! - `chat_send_duration_seconds`: Histogram of send duration, by status
//! - `chat_sends_in_flight`: Gauge of sends currently streaming

use metrics::{decrement_gauge, histogram, increment_counter, increment_gauge};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Records a refused send
pub fn record_blocked(reason: &'static str) {
    increment_counter!("chat_sends_blocked_total", "reason" => reason);
}

/// Metrics for one send, from quota check to final write
///
/// Finishing twice is a no-op.
#[derive(Debug)]
pub struct SendMetrics {
    book: String,
    start: Instant,
    finished: AtomicBool,
}

impl SendMetrics {
    /// Starts timing a send
    pub fn start(book: Option<&str>) -> Self {
        let book = book.unwrap_or("none").to_string();
        increment_counter!("chat_sends_total", "book" => book.clone());
        increment_gauge!("chat_sends_in_flight", 1.0);

        Self {
            book,
            start: Instant::now(),
            finished: AtomicBool::new(false),
        }
    }

    /// A write after a successful completion failed
    ///
    /// `target` is `"session"` or `"ledger"`.
    pub fn record_persist_failure(&self, target: &'static str) {
        increment_counter!("chat_persist_failures_total", "target" => target);
    }

    /// The send ended; `status` is `"completed"`, `"failed"` or `"superseded"`
    pub fn finish(&self, status: &'static str) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }

        if status == "failed" {
            increment_counter!("chat_completion_failures_total", "book" => self.book.clone());
        }
        histogram!(
            "chat_send_duration_seconds",
            self.start.elapsed().as_secs_f64(),
            "status" => status
        );
        decrement_gauge!("chat_sends_in_flight", 1.0);
    }
}

impl Drop for SendMetrics {
    fn drop(&mut self) {
        self.finish("superseded");
    }
}

/// Installs the Prometheus exporter when built with the `prometheus` feature
///
/// A no-op otherwise, so callers need no feature gate of their own.
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        if let Err(e) = PrometheusBuilder::new().install() {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_is_idempotent() {
        let metrics = SendMetrics::start(Some("rute"));
        metrics.finish("completed");
        metrics.finish("failed");
        assert!(metrics.finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drop_without_finish_records_superseded() {
        let metrics = SendMetrics::start(None);
        assert_eq!(metrics.book, "none");
        drop(metrics);
    }
}
