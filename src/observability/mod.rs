//! # Observability Infrastructure
//!
//! Structured logging and translation metrics. The library only records
//! through the `tracing` and `metrics` facades; installing exporters is left
//! to the embedding process.

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{PassOutcome, TranslationMetrics};
