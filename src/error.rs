//! Error types for flowsim.
//!
//! All fallible operations return `Result<T, SimError>` instead of panicking.
//! Replication-scoped aborts (`NumericSample`, `SafetyLimit`) terminate one
//! replication; every other variant is a defect in the model description or
//! in the kernel itself.

use thiserror::Error;

use crate::engine::SimTime;

/// Result type alias for flowsim operations.
pub type SimResult<T> = Result<T, SimError>;

/// Unified error type for all flowsim operations.
#[derive(Debug, Error)]
pub enum SimError {
    // ===== Configuration Errors =====
    /// Invalid system description.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// Field-level validation error.
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Replication Aborts =====
    /// A sampled variate was not a usable duration (NaN, infinite, or
    /// negative). The sample is never clamped; the replication that drew
    /// it terminates and is excluded from aggregation.
    #[error("Numeric sample error: stream '{stream}' drew {value} from {distribution}")]
    NumericSample {
        /// Named sampler stream that produced the value.
        stream: String,
        /// Distribution the value was drawn from.
        distribution: String,
        /// The offending value.
        value: f64,
    },

    /// Event budget exhausted before the event list drained.
    #[error("Run safety limit: {processed} events processed, cap is {cap}")]
    SafetyLimit {
        /// Events processed when the cap was hit.
        processed: u64,
        /// Configured event cap.
        cap: u64,
    },

    // ===== Kernel Defects =====
    /// An event was scheduled or popped behind the simulation clock.
    #[error("Causality violation: event at {event_time} is behind clock {clock}")]
    CausalityViolation {
        /// Timestamp of the offending event.
        event_time: SimTime,
        /// Clock value when the violation was detected.
        clock: SimTime,
    },

    /// A reported statistic failed its physicality check.
    #[error("Invalid result: {metric} is {value}")]
    InvalidResult {
        /// Name of the offending metric.
        metric: String,
        /// The offending value.
        value: f64,
    },
}

impl SimError {
    /// Create a configuration error with a message.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a numeric sample error for a named stream.
    #[must_use]
    pub fn numeric_sample(stream: impl Into<String>, distribution: impl Into<String>, value: f64) -> Self {
        Self::NumericSample {
            stream: stream.into(),
            distribution: distribution.into(),
            value,
        }
    }

    /// Create an invalid result error for a named metric.
    #[must_use]
    pub fn invalid_result(metric: impl Into<String>, value: f64) -> Self {
        Self::InvalidResult {
            metric: metric.into(),
            value,
        }
    }

    /// Check if this error terminates a single replication rather than the
    /// whole run. Aborted replications are logged and excluded from
    /// cross-replication aggregation.
    #[must_use]
    pub const fn is_replication_abort(&self) -> bool {
        matches!(self, Self::NumericSample { .. } | Self::SafetyLimit { .. })
    }
}
