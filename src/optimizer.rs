//! Guided repair of system descriptions.
//!
//! The optimizer takes a description the stability analysis complains
//! about and produces a repaired copy plus a log of what it changed.
//! Repairs come in two layers: safe defaults replace parameters that
//! make a description unrunnable (zero capacities, arrival patterns
//! that generate nothing), then bounded sizing passes raise saturated
//! capacities into a target utilization band, optionally trimming idle
//! capacity down into the same band.
//!
//! The input description is never mutated. Convergence means the
//! optimizer reached a fixed point; defects it cannot repair (such as a
//! missing service time) stay in the final report.

use serde::{Deserialize, Serialize};

use crate::config::{ArrivalSpec, SystemDescription};
use crate::stability::{validate_configuration, StabilityClass, ValidationReport};

/// Tuning knobs for the repair passes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// Utilization below this counts as idle when balancing.
    pub target_low: f64,
    /// Utilization above this is avoided when sizing.
    pub target_high: f64,
    /// Sizing passes before giving up.
    pub max_passes: u32,
    /// Also trim idle capacity down into the target band.
    pub balance_line: bool,
}

impl OptimizerSettings {
    /// Default band of 70% to 80% utilization, eight passes, no trimming.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            target_low: 0.70,
            target_high: 0.80,
            max_passes: 8,
            balance_line: false,
        }
    }

    /// Set the utilization band sizing aims for.
    #[must_use]
    pub const fn with_target_band(mut self, low: f64, high: f64) -> Self {
        self.target_low = low;
        self.target_high = high;
        self
    }

    /// Bound the number of sizing passes.
    #[must_use]
    pub const fn with_max_passes(mut self, passes: u32) -> Self {
        self.max_passes = passes;
        self
    }

    /// Enable trimming of idle capacity.
    #[must_use]
    pub const fn with_balance_line(mut self, enabled: bool) -> Self {
        self.balance_line = enabled;
        self
    }

    /// Design utilization sizing aims at, the middle of the band.
    #[must_use]
    pub fn design_utilization(&self) -> f64 {
        (self.target_low + self.target_high) / 2.0
    }
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// One recorded repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedFix {
    /// Pass the fix was applied in. Safe defaults are pass zero.
    pub pass: u32,
    /// Class or resource that was changed.
    pub target: String,
    /// Field that was changed.
    pub field: String,
    /// Value before the fix.
    pub before: f64,
    /// Value after the fix.
    pub after: f64,
    /// Why the fix was applied.
    pub rationale: String,
}

/// Outcome of a repair run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    /// Every fix, in application order.
    pub fixes: Vec<AppliedFix>,
    /// Sizing passes executed.
    pub passes: u32,
    /// Whether a fixed point was reached within the pass budget.
    pub converged: bool,
    /// Stability report of the repaired description.
    pub final_report: ValidationReport,
}

/// Repairs system descriptions toward a target utilization band.
#[derive(Debug, Clone, Default)]
pub struct ConfigOptimizer {
    settings: OptimizerSettings,
}

impl ConfigOptimizer {
    /// Create an optimizer with the given settings.
    #[must_use]
    pub const fn new(settings: OptimizerSettings) -> Self {
        Self { settings }
    }

    /// Repair a description, returning the repaired copy and the log.
    #[must_use]
    pub fn repair(&self, description: &SystemDescription) -> (SystemDescription, OptimizationReport) {
        let mut candidate = description.clone();
        let mut fixes = self.apply_safe_defaults(&mut candidate);

        let mut passes = 0;
        let mut converged = false;
        while passes < self.settings.max_passes {
            passes += 1;
            let report = validate_configuration(&candidate);
            let applied = self.apply_sizing_pass(&mut candidate, &report, passes);
            if applied.is_empty() {
                converged = true;
                break;
            }
            fixes.extend(applied);
        }

        for fix in &fixes {
            tracing::info!(
                resource = %fix.target,
                field = %fix.field,
                before = fix.before,
                after = fix.after,
                "applied configuration repair"
            );
        }

        let final_report = validate_configuration(&candidate);
        (
            candidate,
            OptimizationReport {
                fixes,
                passes,
                converged,
                final_report,
            },
        )
    }

    /// Replace parameters that make a description unrunnable.
    fn apply_safe_defaults(&self, candidate: &mut SystemDescription) -> Vec<AppliedFix> {
        let mut fixes = Vec::new();

        for resource in &mut candidate.resources {
            if resource.capacity == 0 {
                fixes.push(AppliedFix {
                    pass: 0,
                    target: resource.name.clone(),
                    field: "capacity".into(),
                    before: 0.0,
                    after: 1.0,
                    rationale: "zero capacity starves every seize".into(),
                });
                resource.capacity = 1;
            }
        }

        for class in &mut candidate.entity_classes {
            match &mut class.arrival {
                ArrivalSpec::Poisson { rate_per_hour } if *rate_per_hour <= 0.0 => {
                    fixes.push(AppliedFix {
                        pass: 0,
                        target: class.name.clone(),
                        field: "rate_per_hour".into(),
                        before: *rate_per_hour,
                        after: 1.0,
                        rationale: "a non-positive rate generates no arrivals".into(),
                    });
                    *rate_per_hour = 1.0;
                }
                ArrivalSpec::Deterministic {
                    interval_minutes, ..
                } if *interval_minutes <= 0.0 => {
                    fixes.push(AppliedFix {
                        pass: 0,
                        target: class.name.clone(),
                        field: "interval_minutes".into(),
                        before: *interval_minutes,
                        after: 1.0,
                        rationale: "a non-positive interval generates no arrivals".into(),
                    });
                    *interval_minutes = 1.0;
                }
                ArrivalSpec::Batch {
                    size,
                    interval_minutes,
                    ..
                } => {
                    if *interval_minutes <= 0.0 {
                        fixes.push(AppliedFix {
                            pass: 0,
                            target: class.name.clone(),
                            field: "interval_minutes".into(),
                            before: *interval_minutes,
                            after: 1.0,
                            rationale: "a non-positive interval generates no arrivals".into(),
                        });
                        *interval_minutes = 1.0;
                    }
                    if *size == 0 {
                        fixes.push(AppliedFix {
                            pass: 0,
                            target: class.name.clone(),
                            field: "size".into(),
                            before: 0.0,
                            after: 1.0,
                            rationale: "an empty batch generates no arrivals".into(),
                        });
                        *size = 1;
                    }
                }
                _ => {}
            }
        }
        fixes
    }

    /// Resize capacities toward the target band. Returns the fixes applied.
    fn apply_sizing_pass(
        &self,
        candidate: &mut SystemDescription,
        report: &ValidationReport,
        pass: u32,
    ) -> Vec<AppliedFix> {
        let design = self.design_target();
        let mut fixes = Vec::new();

        for stability in &report.resources {
            let Some(mean) = stability.mean_service_minutes else {
                continue;
            };
            if stability.offered_rate_per_minute <= 0.0 {
                continue;
            }
            let Some(spec) = candidate
                .resources
                .iter_mut()
                .find(|r| r.name == stability.name)
            else {
                continue;
            };
            let required = required_capacity(stability.offered_rate_per_minute, mean, design);

            match stability.classification {
                StabilityClass::Critical => {
                    let after = required.max(spec.capacity + 1);
                    fixes.push(AppliedFix {
                        pass,
                        target: spec.name.clone(),
                        field: "capacity".into(),
                        before: f64::from(spec.capacity),
                        after: f64::from(after),
                        rationale: format!(
                            "sizing a saturated resource for {:.0}% utilization",
                            design * 100.0
                        ),
                    });
                    spec.capacity = after;
                }
                StabilityClass::Ok | StabilityClass::Warning => {
                    let idle = self.settings.balance_line
                        && stability
                            .utilization
                            .is_some_and(|u| u < self.settings.target_low)
                        && required < spec.capacity;
                    if idle {
                        fixes.push(AppliedFix {
                            pass,
                            target: spec.name.clone(),
                            field: "capacity".into(),
                            before: f64::from(spec.capacity),
                            after: f64::from(required),
                            rationale: "idle capacity above the target band".into(),
                        });
                        spec.capacity = required;
                    }
                }
            }
        }
        fixes
    }

    fn design_target(&self) -> f64 {
        let design = self.settings.design_utilization();
        if design > 0.0 && design.is_finite() {
            design
        } else {
            0.75
        }
    }
}

/// Smallest capacity keeping utilization at or below `design`.
fn required_capacity(offered: f64, mean_service: f64, design: f64) -> u32 {
    let raw = (offered * mean_service / design).ceil();
    if raw.is_finite() && raw >= 1.0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let capacity = raw as u32;
        capacity.max(1)
    } else {
        1
    }
}
