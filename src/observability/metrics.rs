//! # Metrics Collection
//!
//! Translation metrics recorded through the `metrics` facade.

use metrics::{counter, histogram};

/// Final state of a translation pass, used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Published,
    Unchanged,
    Translated,
    Failed,
}

impl PassOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassOutcome::Published => "published",
            PassOutcome::Unchanged => "unchanged",
            PassOutcome::Translated => "translated",
            PassOutcome::Failed => "failed",
        }
    }
}

/// Metrics recorder for translation passes
#[derive(Debug, Clone, Default)]
pub struct TranslationMetrics;

impl TranslationMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Record a finished pass and its wall-clock duration in seconds
    pub fn record_pass(&self, outcome: PassOutcome, duration: f64) {
        let labels = [("outcome", outcome.as_str().to_string())];
        counter!("gateplane_translation_passes_total", &labels).increment(1);
        histogram!("gateplane_translation_duration_seconds").record(duration);
    }

    /// Record a resource dropped from the output
    pub fn record_resource_error(&self, kind: &str) {
        let labels = [("kind", kind.to_string())];
        counter!("gateplane_resource_errors_total", &labels).increment(1);
    }

    /// Record warnings accumulated during a pass
    pub fn record_warnings(&self, count: usize) {
        if count > 0 {
            counter!("gateplane_translation_warnings_total").increment(count as u64);
        }
    }

    /// Record a snapshot cache publication attempt
    pub fn record_publish(&self, changed: bool) {
        let result = if changed { "published" } else { "unchanged" };
        let labels = [("result", result.to_string())];
        counter!("gateplane_snapshot_publishes_total", &labels).increment(1);
    }
}
