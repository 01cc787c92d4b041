//! Run safety guard: stop-the-line checks on budgets and results.
//!
//! The guard sits between the kernel and the numbers it reports. An
//! event budget bounds runaway event loops (a self-scheduling cycle
//! would otherwise spin forever inside one replication), and result
//! checks refuse to report statistics that are not physically
//! meaningful.
//!
//! Budget and sample aborts kill one replication; result checks fail
//! the whole run, since a non-finite aggregate means the kernel itself
//! misbehaved.

use bitflags::bitflags;

use crate::error::{SimError, SimResult};

bitflags! {
    /// Conditions that trigger an abort.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AbortConditions: u32 {
        /// Abort when the event budget is exhausted.
        const EVENT_BUDGET = 0b0001;
        /// Abort when a reported metric is NaN or infinite.
        const NON_FINITE = 0b0010;
        /// Abort when a reported metric is negative.
        const NEGATIVE_VALUE = 0b0100;
    }
}

impl Default for AbortConditions {
    fn default() -> Self {
        Self::all()
    }
}

/// Per-replication safety guard.
#[derive(Debug, Clone)]
pub struct SafetyGuard {
    abort_on: AbortConditions,
    max_events: u64,
    violations: u64,
}

impl SafetyGuard {
    /// Create a guard with all conditions armed.
    #[must_use]
    pub const fn new(max_events: u64) -> Self {
        Self {
            abort_on: AbortConditions::all(),
            max_events,
            violations: 0,
        }
    }

    /// Replace the armed conditions.
    #[must_use]
    pub const fn with_abort_conditions(mut self, conditions: AbortConditions) -> Self {
        self.abort_on = conditions;
        self
    }

    /// Event budget for one replication.
    #[must_use]
    pub const fn max_events(&self) -> u64 {
        self.max_events
    }

    /// Violations recorded so far.
    #[must_use]
    pub const fn violation_count(&self) -> u64 {
        self.violations
    }

    /// Check the event budget.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SafetyLimit`] once `processed` exceeds the
    /// budget, if [`AbortConditions::EVENT_BUDGET`] is armed.
    pub fn check_event_budget(&mut self, processed: u64) -> SimResult<()> {
        if self.abort_on.contains(AbortConditions::EVENT_BUDGET) && processed > self.max_events {
            self.violations += 1;
            return Err(SimError::SafetyLimit {
                processed,
                cap: self.max_events,
            });
        }
        Ok(())
    }

    /// Check a reported metric for physicality.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidResult`] when the value is non-finite
    /// or negative and the matching condition is armed.
    pub fn check_metric(&mut self, metric: &str, value: f64) -> SimResult<()> {
        if self.abort_on.contains(AbortConditions::NON_FINITE) && !value.is_finite() {
            self.violations += 1;
            return Err(SimError::invalid_result(metric, value));
        }
        if self.abort_on.contains(AbortConditions::NEGATIVE_VALUE) && value < 0.0 {
            self.violations += 1;
            return Err(SimError::invalid_result(metric, value));
        }
        Ok(())
    }

    /// Check a utilization value.
    ///
    /// Utilization above one is legal (capacity shrinks leave units held
    /// beyond the new capacity) but worth a warning.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidResult`] when the value is non-finite
    /// or negative and the matching condition is armed.
    pub fn check_utilization(&mut self, resource: &str, value: f64) -> SimResult<()> {
        self.check_metric(&format!("utilization[{resource}]"), value)?;
        if value > 1.0 {
            tracing::warn!(resource, utilization = value, "utilization exceeds capacity");
        }
        Ok(())
    }
}

impl Default for SafetyGuard {
    fn default() -> Self {
        Self::new(10_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_budget_allows_up_to_cap() {
        let mut guard = SafetyGuard::new(100);
        assert!(guard.check_event_budget(99).is_ok());
        assert!(guard.check_event_budget(100).is_ok());
        assert_eq!(guard.violation_count(), 0);
    }

    #[test]
    fn test_event_budget_aborts_past_cap() {
        let mut guard = SafetyGuard::new(100);
        let err = guard.check_event_budget(101);
        assert!(matches!(
            err,
            Err(SimError::SafetyLimit {
                processed: 101,
                cap: 100
            })
        ));
        assert_eq!(guard.violation_count(), 1);
    }

    #[test]
    fn test_budget_abort_is_replication_scoped() {
        let mut guard = SafetyGuard::new(10);
        let err = match guard.check_event_budget(11) {
            Err(e) => e,
            Ok(()) => return,
        };
        assert!(err.is_replication_abort());
    }

    #[test]
    fn test_disarmed_budget_never_aborts() {
        let mut guard = SafetyGuard::new(10)
            .with_abort_conditions(AbortConditions::NON_FINITE | AbortConditions::NEGATIVE_VALUE);
        assert!(guard.check_event_budget(1_000_000).is_ok());
        assert_eq!(guard.violation_count(), 0);
    }

    #[test]
    fn test_metric_rejects_nan() {
        let mut guard = SafetyGuard::new(100);
        let err = guard.check_metric("throughput", f64::NAN);
        assert!(matches!(err, Err(SimError::InvalidResult { .. })));
        assert_eq!(guard.violation_count(), 1);
    }

    #[test]
    fn test_metric_rejects_infinity() {
        let mut guard = SafetyGuard::new(100);
        assert!(guard.check_metric("cycle_time", f64::INFINITY).is_err());
    }

    #[test]
    fn test_metric_rejects_negative() {
        let mut guard = SafetyGuard::new(100);
        let err = guard.check_metric("wait_time", -0.5);
        assert!(matches!(err, Err(SimError::InvalidResult { .. })));
    }

    #[test]
    fn test_metric_accepts_finite_nonnegative() {
        let mut guard = SafetyGuard::new(100);
        assert!(guard.check_metric("throughput", 0.0).is_ok());
        assert!(guard.check_metric("throughput", 12.5).is_ok());
        assert_eq!(guard.violation_count(), 0);
    }

    #[test]
    fn test_disarmed_negative_check_passes_negatives() {
        let mut guard = SafetyGuard::new(100)
            .with_abort_conditions(AbortConditions::EVENT_BUDGET | AbortConditions::NON_FINITE);
        assert!(guard.check_metric("drift", -1.0).is_ok());
        assert!(guard.check_metric("drift", f64::NAN).is_err());
    }

    #[test]
    fn test_utilization_above_one_is_allowed() {
        let mut guard = SafetyGuard::new(100);
        assert!(guard.check_utilization("mill", 1.33).is_ok());
        assert_eq!(guard.violation_count(), 0);
    }

    #[test]
    fn test_utilization_rejects_nan() {
        let mut guard = SafetyGuard::new(100);
        assert!(guard.check_utilization("mill", f64::NAN).is_err());
    }

    #[test]
    fn test_violations_accumulate() {
        let mut guard = SafetyGuard::new(0);
        let _ = guard.check_event_budget(1);
        let _ = guard.check_metric("a", f64::NAN);
        let _ = guard.check_metric("b", -1.0);
        assert_eq!(guard.violation_count(), 3);
    }

    #[test]
    fn test_default_arms_everything() {
        assert_eq!(AbortConditions::default(), AbortConditions::all());
        let guard = SafetyGuard::default();
        assert_eq!(guard.max_events(), 10_000_000);
    }
}
