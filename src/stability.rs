//! Steady-state stability analysis of a system description.
//!
//! Before any replication runs, the offered load on every resource can
//! be estimated from the arrival rates and the process routing. The
//! analysis walks each process with a flow-propagation worklist,
//! splitting flow at probabilistic branches and accumulating visit
//! rates on seized resources, then applies Erlang-C waiting formulas.
//!
//! Numbers here are M/M/c approximations of steady state. They flag a
//! saturated or near-saturated design before simulation time is spent
//! on it; the replications measure what actually happens.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::{ArrivalSpec, BranchingSpec, ProcessSpec, StepAction, SystemDescription};

/// Utilization above this is reported as a warning.
const UTILIZATION_WARNING: f64 = 0.85;
/// Service-time coefficient of variation above this is a defect.
const VARIABILITY_THRESHOLD: f64 = 2.0;
/// Worklist steps before the flow propagation gives up.
const ANALYSIS_BUDGET: u32 = 10_000;
/// Flows below this are dropped from propagation.
const FLOW_EPSILON: f64 = 1e-9;

/// Stability classification of one resource or a whole description.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum StabilityClass {
    /// Utilization comfortably below capacity.
    #[default]
    Ok,
    /// Utilization close enough to capacity that queues grow sharply.
    Warning,
    /// Offered load at or above capacity; queues grow without bound.
    Critical,
}

/// A repairable description defect.
///
/// None of these are schema errors: a description carrying them loads,
/// validates, and (except for degenerate arrival patterns) simulates.
/// They are reported here so they can be fixed before simulation time
/// is spent on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum ConfigDefect {
    /// An arrival pattern that generates no entities.
    NonPositiveRate {
        /// Class with the degenerate pattern.
        class: String,
    },
    /// A resource that can never grant a unit.
    ZeroCapacity {
        /// The starved resource.
        resource: String,
    },
    /// A seized resource with no nominal service time to analyze.
    MissingServiceTime {
        /// The unanalyzable resource.
        resource: String,
    },
    /// A service time so variable that mean-based sizing misleads.
    HighVariability {
        /// Resource carrying the distribution.
        location: String,
        /// Coefficient of variation found.
        cv: f64,
        /// Threshold it exceeded.
        threshold: f64,
    },
}

/// Steady-state estimate for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStability {
    /// Resource name.
    pub name: String,
    /// Estimated arrival rate of seize attempts, per minute.
    pub offered_rate_per_minute: f64,
    /// Configured capacity.
    pub capacity: u32,
    /// Nominal mean service time in minutes, when configured.
    pub mean_service_minutes: Option<f64>,
    /// Offered load per unit of capacity. `None` when it cannot be
    /// computed (zero capacity or no service time).
    pub utilization: Option<f64>,
    /// Expected steady-state queue length. `None` when unstable or
    /// uncomputable.
    pub expected_queue_length: Option<f64>,
    /// Expected steady-state wait in minutes. `None` when unstable or
    /// uncomputable.
    pub expected_wait_minutes: Option<f64>,
    /// Classification of this resource.
    pub classification: StabilityClass,
}

/// Full stability report for a system description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Per-resource estimates, in description order.
    pub resources: Vec<ResourceStability>,
    /// Repairable defects found.
    pub defects: Vec<ConfigDefect>,
    /// Worst classification across all resources.
    pub worst: StabilityClass,
}

impl ValidationReport {
    /// Whether the description is free of defects and saturation risks.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.worst == StabilityClass::Ok && self.defects.is_empty()
    }

    /// Resources classified [`StabilityClass::Critical`].
    pub fn critical_resources(&self) -> impl Iterator<Item = &ResourceStability> {
        self.resources
            .iter()
            .filter(|r| r.classification == StabilityClass::Critical)
    }
}

/// Analyze a description for saturation and repairable defects.
#[must_use]
pub fn validate_configuration(description: &SystemDescription) -> ValidationReport {
    let visits = resource_visit_rates(description);
    let mut defects = Vec::new();

    for class in &description.entity_classes {
        if has_degenerate_pattern(&class.arrival) {
            defects.push(ConfigDefect::NonPositiveRate {
                class: class.name.clone(),
            });
        }
    }

    let mut resources = Vec::with_capacity(description.resources.len());
    let mut worst = StabilityClass::Ok;
    for spec in &description.resources {
        let offered = visits.get(spec.name.as_str()).copied().unwrap_or(0.0);
        let mean_service = spec.service_time.as_ref().map(|s| s.mean_minutes());

        if spec.capacity == 0 {
            defects.push(ConfigDefect::ZeroCapacity {
                resource: spec.name.clone(),
            });
        }
        if offered > 0.0 && mean_service.is_none() {
            defects.push(ConfigDefect::MissingServiceTime {
                resource: spec.name.clone(),
            });
        }
        if let Some(service) = spec.service_time.as_ref() {
            let cv = service.cv();
            if cv > VARIABILITY_THRESHOLD {
                defects.push(ConfigDefect::HighVariability {
                    location: spec.name.clone(),
                    cv,
                    threshold: VARIABILITY_THRESHOLD,
                });
            }
        }

        let stability = classify_resource(spec.name.as_str(), offered, spec.capacity, mean_service);
        worst = worst.max(stability.classification);
        resources.push(stability);
    }

    ValidationReport {
        resources,
        defects,
        worst,
    }
}

fn has_degenerate_pattern(arrival: &ArrivalSpec) -> bool {
    match arrival {
        ArrivalSpec::Poisson { rate_per_hour } => *rate_per_hour <= 0.0,
        ArrivalSpec::Deterministic {
            interval_minutes, ..
        } => *interval_minutes <= 0.0,
        ArrivalSpec::Batch {
            size,
            interval_minutes,
            ..
        } => *size == 0 || *interval_minutes <= 0.0,
        // A short or even single schedule is a legitimate pattern
        ArrivalSpec::Scheduled { .. } => false,
    }
}

fn classify_resource(
    name: &str,
    offered: f64,
    capacity: u32,
    mean_service: Option<f64>,
) -> ResourceStability {
    let mut stability = ResourceStability {
        name: name.to_string(),
        offered_rate_per_minute: offered,
        capacity,
        mean_service_minutes: mean_service,
        utilization: None,
        expected_queue_length: None,
        expected_wait_minutes: None,
        classification: StabilityClass::Ok,
    };

    if capacity == 0 {
        if offered > 0.0 {
            stability.classification = StabilityClass::Critical;
            tracing::warn!(resource = name, "demand offered to a zero-capacity resource");
        }
        return stability;
    }
    let Some(mean) = mean_service else {
        return stability;
    };

    let erlangs = offered * mean;
    let rho = erlangs / f64::from(capacity);
    stability.utilization = Some(rho);

    if rho >= 1.0 {
        stability.classification = StabilityClass::Critical;
        tracing::warn!(
            resource = name,
            utilization = rho,
            "offered load saturates this resource"
        );
        return stability;
    }

    let p_wait = erlang_c(capacity, erlangs);
    let slack = f64::from(capacity) / mean - offered;
    let wait = if slack > 0.0 { p_wait / slack } else { 0.0 };
    stability.expected_wait_minutes = Some(wait);
    stability.expected_queue_length = Some(offered * wait);
    stability.classification = if rho >= UTILIZATION_WARNING {
        StabilityClass::Warning
    } else {
        StabilityClass::Ok
    };
    stability
}

/// Erlang-C waiting probability for `servers` units under `offered_load`
/// erlangs, via the numerically stable Erlang-B recursion.
fn erlang_c(servers: u32, offered_load: f64) -> f64 {
    let mut blocking = 1.0;
    for k in 1..=servers {
        blocking = offered_load * blocking / (f64::from(k) + offered_load * blocking);
    }
    let rho = offered_load / f64::from(servers);
    blocking / (1.0 - rho * (1.0 - blocking))
}

/// Propagate class arrival rates through process routing and sum the
/// seize rate offered to each resource.
///
/// Probabilistic branches split flow by probability; conditional
/// branches split it uniformly across arms and fallback, since attribute
/// values are not known statically. Rework loops converge geometrically
/// and are cut off below [`FLOW_EPSILON`]. Dangling branch targets
/// contribute no flow; schema validation reports them separately.
fn resource_visit_rates(description: &SystemDescription) -> HashMap<String, f64> {
    let processes: HashMap<&str, (&ProcessSpec, HashMap<&str, usize>)> = description
        .processes
        .iter()
        .map(|p| (p.name.as_str(), (p, label_indices(p))))
        .collect();

    let mut visits: HashMap<String, f64> = HashMap::new();
    let mut work: Vec<(&str, usize, f64)> = description
        .entity_classes
        .iter()
        .map(|class| (class.process.as_str(), 0, class.arrival.rate_per_minute()))
        .collect();

    let mut budget = ANALYSIS_BUDGET;
    while let Some((process, step, flow)) = work.pop() {
        if budget == 0 {
            break;
        }
        budget -= 1;
        if flow < FLOW_EPSILON {
            continue;
        }
        let Some((spec, labels)) = processes.get(process) else {
            continue;
        };
        let Some(step_spec) = spec.steps.get(step) else {
            continue;
        };
        match &step_spec.action {
            StepAction::Seize { resource } => {
                *visits.entry(resource.clone()).or_default() += flow;
                work.push((process, step + 1, flow));
            }
            StepAction::Delay { .. } | StepAction::Release { .. } => {
                work.push((process, step + 1, flow));
            }
            StepAction::Decision { branching } => match branching {
                BranchingSpec::ByProbability(branches) => {
                    for branch in branches {
                        if let Some(&target) = labels.get(branch.to.as_str()) {
                            work.push((process, target, flow * branch.probability));
                        }
                    }
                }
                BranchingSpec::ByCondition { arms, fallback } => {
                    let share = flow / (arms.len() + 1) as f64;
                    for arm in arms {
                        if let Some(&target) = labels.get(arm.to.as_str()) {
                            work.push((process, target, share));
                        }
                    }
                    if let Some(&target) = labels.get(fallback.as_str()) {
                        work.push((process, target, share));
                    }
                }
            },
            StepAction::Exit => {}
        }
    }
    visits
}

fn label_indices(process: &ProcessSpec) -> HashMap<&str, usize> {
    process
        .steps
        .iter()
        .enumerate()
        .filter_map(|(index, step)| step.label.as_deref().map(|label| (label, index)))
        .collect()
}
