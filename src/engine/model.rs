//! Compiled model: name-resolved, index-addressed system description.
//!
//! [`CompiledModel::compile`] turns a validated [`SystemDescription`]
//! into flat vectors addressed by typed handles, so the hot path never
//! touches a string. Compilation re-checks the references it resolves
//! and rejects descriptions whose processes cannot run to completion,
//! independently of schema validation.

use std::collections::HashMap;

use crate::config::{
    ArrivalSpec, AttributeValue, BranchingSpec, ComparisonOp, ConditionSpec, ProcessSpec,
    StepAction, SystemDescription,
};
use crate::engine::resources::QueueDiscipline;
use crate::engine::sampler::{Distribution, TimedDistribution};
use crate::engine::SimTime;
use crate::error::{SimError, SimResult};

// ===== Typed Handles =====

/// Handle of an entity class within a [`CompiledModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(u32);

impl ClassId {
    /// Create a handle from a raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Raw index into the model's class table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of a resource within a [`CompiledModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(u32);

impl ResourceId {
    /// Create a handle from a raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Raw index into the model's resource table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of a process within a [`CompiledModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Create a handle from a raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Raw index into the model's process table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

// ===== Compiled Tables =====

/// Arrival pattern with times in simulation units.
#[derive(Debug, Clone)]
pub enum CompiledArrivals {
    /// Random arrivals drawn from an interarrival distribution.
    Poisson {
        /// Interarrival distribution in minutes.
        interarrival: Distribution,
    },
    /// Evenly spaced batches. Single arrivals compile as batches of one.
    Every {
        /// Spacing between batches.
        interval: SimTime,
        /// Instant of the first batch.
        first_at: SimTime,
        /// Entities per batch.
        batch: u32,
    },
    /// Arrivals at explicit instants, sorted ascending.
    Scheduled {
        /// Arrival instants.
        times: Vec<SimTime>,
    },
}

/// One compiled entity class.
#[derive(Debug, Clone)]
pub struct CompiledClass {
    /// Class name.
    pub name: String,
    /// Process its entities follow.
    pub process: ProcessId,
    /// Arrival pattern.
    pub arrivals: CompiledArrivals,
    /// Initial attributes copied onto each entity.
    pub attributes: HashMap<String, AttributeValue>,
}

/// One compiled capacity phase.
#[derive(Debug, Clone, Copy)]
pub struct CompiledPhase {
    /// Instant the phase takes effect.
    pub at: SimTime,
    /// Capacity from that instant on.
    pub capacity: u32,
}

/// One compiled resource.
#[derive(Debug, Clone)]
pub struct CompiledResource {
    /// Resource name.
    pub name: String,
    /// Initial capacity.
    pub capacity: u32,
    /// Queue ordering.
    pub discipline: QueueDiscipline,
    /// Nominal service time, used for queue ordering hints.
    pub service_time: Option<TimedDistribution>,
    /// Capacity phases, sorted by instant.
    pub calendar: Vec<CompiledPhase>,
}

/// One compiled process.
#[derive(Debug, Clone)]
pub struct CompiledProcess {
    /// Process name.
    pub name: String,
    /// Steps, executed from index zero.
    pub steps: Vec<CompiledStep>,
}

/// One resolved step.
#[derive(Debug, Clone)]
pub enum CompiledStep {
    /// Wait for and hold one unit of a resource.
    Seize {
        /// Resource to seize.
        resource: ResourceId,
    },
    /// Hold for a sampled duration.
    Delay {
        /// Duration distribution.
        duration: TimedDistribution,
    },
    /// Return one unit of a resource.
    Release {
        /// Resource to release.
        resource: ResourceId,
    },
    /// Jump to another step.
    Decision {
        /// Resolved branching rule.
        branching: CompiledBranching,
    },
    /// Leave the system.
    Exit,
}

/// Branching with targets resolved to step indices.
#[derive(Debug, Clone)]
pub enum CompiledBranching {
    /// Random split. Probabilities sum to one.
    ByProbability {
        /// `(probability, target step)` pairs.
        branches: Vec<(f64, usize)>,
    },
    /// First matching condition wins.
    ByCondition {
        /// `(condition, target step)` pairs, checked in order.
        arms: Vec<(CompiledCondition, usize)>,
        /// Target step when no arm matches.
        fallback: usize,
    },
}

/// One attribute comparison.
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    /// Attribute key to look up.
    pub key: String,
    /// Comparison operator.
    pub op: ComparisonOp,
    /// Value to compare against.
    pub value: AttributeValue,
}

impl CompiledCondition {
    /// Evaluate against an entity's attributes.
    ///
    /// A missing key never matches, whatever the operator.
    #[must_use]
    pub fn matches(&self, attributes: &HashMap<String, AttributeValue>) -> bool {
        let Some(actual) = attributes.get(&self.key) else {
            return false;
        };
        match self.op {
            ComparisonOp::Eq => Self::equal(actual, &self.value),
            ComparisonOp::Ne => !Self::equal(actual, &self.value),
            ComparisonOp::Gt | ComparisonOp::Ge | ComparisonOp::Lt | ComparisonOp::Le => {
                let (Some(a), Some(b)) = (actual.as_number(), self.value.as_number()) else {
                    return false;
                };
                match self.op {
                    ComparisonOp::Gt => a > b,
                    ComparisonOp::Ge => a >= b,
                    ComparisonOp::Lt => a < b,
                    _ => a <= b,
                }
            }
        }
    }

    fn equal(a: &AttributeValue, b: &AttributeValue) -> bool {
        match (a, b) {
            (AttributeValue::Number(x), AttributeValue::Number(y)) => {
                (x - y).abs() < f64::EPSILON
            }
            (AttributeValue::Text(x), AttributeValue::Text(y)) => x == y,
            (AttributeValue::Flag(x), AttributeValue::Flag(y)) => x == y,
            _ => false,
        }
    }
}

// ===== Model =====

/// Fully resolved model, shared read-only across replications.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    /// Model name.
    pub name: String,
    /// Entity classes, addressed by [`ClassId`].
    pub classes: Vec<CompiledClass>,
    /// Resources, addressed by [`ResourceId`].
    pub resources: Vec<CompiledResource>,
    /// Processes, addressed by [`ProcessId`].
    pub processes: Vec<CompiledProcess>,
}

impl CompiledModel {
    /// Compile a system description into an executable model.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] for unresolvable references, service or
    /// delay distributions with invalid parameters, arrival patterns that
    /// cannot generate entities (non-positive rates or intervals, empty
    /// batches), and processes that run past their final step or cannot
    /// reach an exit.
    pub fn compile(description: &SystemDescription) -> SimResult<Self> {
        let resource_ids: HashMap<&str, ResourceId> = description
            .resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.as_str(), ResourceId::new(i as u32)))
            .collect();
        let process_ids: HashMap<&str, ProcessId> = description
            .processes
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.as_str(), ProcessId::new(i as u32)))
            .collect();

        let resources = description
            .resources
            .iter()
            .map(|spec| {
                let mut service_time = spec.service_time.clone();
                if let Some(service) = service_time.as_mut() {
                    service.validate_parameters()?;
                    service.distribution.normalize();
                }
                let mut calendar: Vec<CompiledPhase> = spec
                    .calendar
                    .iter()
                    .flatten()
                    .map(|phase| CompiledPhase {
                        at: SimTime::from_minutes(phase.at_minutes),
                        capacity: phase.capacity,
                    })
                    .collect();
                calendar.sort_by_key(|phase| phase.at);
                Ok(CompiledResource {
                    name: spec.name.clone(),
                    capacity: spec.capacity,
                    discipline: spec.discipline,
                    service_time,
                    calendar,
                })
            })
            .collect::<SimResult<Vec<_>>>()?;

        let processes = description
            .processes
            .iter()
            .map(|spec| compile_process(spec, &resource_ids))
            .collect::<SimResult<Vec<_>>>()?;

        let classes = description
            .entity_classes
            .iter()
            .map(|spec| {
                let process = *process_ids.get(spec.process.as_str()).ok_or_else(|| {
                    SimError::config(format!(
                        "class '{}' references unknown process '{}'",
                        spec.name, spec.process
                    ))
                })?;
                let arrivals = compile_arrivals(&spec.name, &spec.arrival)?;
                Ok(CompiledClass {
                    name: spec.name.clone(),
                    process,
                    arrivals,
                    attributes: spec.attributes.clone(),
                })
            })
            .collect::<SimResult<Vec<_>>>()?;

        Ok(Self {
            name: description.name.clone(),
            classes,
            resources,
            processes,
        })
    }

    /// Look up a resource handle by name.
    #[must_use]
    pub fn resource_by_name(&self, name: &str) -> Option<ResourceId> {
        self.resources
            .iter()
            .position(|r| r.name == name)
            .map(|i| ResourceId::new(i as u32))
    }

    /// Nominal service time of a resource in minutes, zero when unset.
    #[must_use]
    pub fn nominal_service_minutes(&self, resource: ResourceId) -> f64 {
        self.resources[resource.index()]
            .service_time
            .as_ref()
            .map_or(0.0, TimedDistribution::mean_minutes)
    }
}

fn compile_arrivals(class: &str, spec: &ArrivalSpec) -> SimResult<CompiledArrivals> {
    match spec {
        ArrivalSpec::Poisson { rate_per_hour } => {
            if *rate_per_hour <= 0.0 {
                return Err(SimError::config(format!(
                    "class '{class}' needs a positive arrival rate, got {rate_per_hour}"
                )));
            }
            Ok(CompiledArrivals::Poisson {
                interarrival: Distribution::Exponential {
                    mean: 60.0 / rate_per_hour,
                },
            })
        }
        ArrivalSpec::Deterministic {
            interval_minutes,
            first_at_minutes,
        } => compile_every(class, *interval_minutes, *first_at_minutes, 1),
        ArrivalSpec::Batch {
            size,
            interval_minutes,
            first_at_minutes,
        } => compile_every(class, *interval_minutes, *first_at_minutes, *size),
        ArrivalSpec::Scheduled { times_minutes } => {
            let mut times: Vec<SimTime> = times_minutes
                .iter()
                .map(|&m| SimTime::from_minutes(m))
                .collect();
            times.sort_unstable();
            Ok(CompiledArrivals::Scheduled { times })
        }
    }
}

fn compile_every(
    class: &str,
    interval_minutes: f64,
    first_at_minutes: f64,
    batch: u32,
) -> SimResult<CompiledArrivals> {
    if interval_minutes <= 0.0 {
        return Err(SimError::config(format!(
            "class '{class}' needs a positive arrival interval, got {interval_minutes}"
        )));
    }
    if batch == 0 {
        return Err(SimError::config(format!(
            "class '{class}' needs a batch size of at least one"
        )));
    }
    Ok(CompiledArrivals::Every {
        interval: SimTime::from_minutes(interval_minutes),
        first_at: SimTime::from_minutes(first_at_minutes),
        batch,
    })
}

fn compile_process(
    spec: &ProcessSpec,
    resource_ids: &HashMap<&str, ResourceId>,
) -> SimResult<CompiledProcess> {
    let mut labels: HashMap<&str, usize> = HashMap::new();
    for (index, step) in spec.steps.iter().enumerate() {
        if let Some(label) = step.label.as_deref() {
            if labels.insert(label, index).is_some() {
                return Err(SimError::config(format!(
                    "process '{}' labels two steps '{label}'",
                    spec.name
                )));
            }
        }
    }

    let resolve_resource = |name: &str| {
        resource_ids.get(name).copied().ok_or_else(|| {
            SimError::config(format!(
                "process '{}' references unknown resource '{name}'",
                spec.name
            ))
        })
    };
    let resolve_target = |to: &str| {
        labels.get(to).copied().ok_or_else(|| {
            SimError::config(format!(
                "process '{}': branch target '{to}' does not name a labeled step",
                spec.name
            ))
        })
    };

    let steps = spec
        .steps
        .iter()
        .map(|step| match &step.action {
            StepAction::Seize { resource } => Ok(CompiledStep::Seize {
                resource: resolve_resource(resource)?,
            }),
            StepAction::Release { resource } => Ok(CompiledStep::Release {
                resource: resolve_resource(resource)?,
            }),
            StepAction::Delay { duration } => {
                duration.validate_parameters()?;
                let mut duration = duration.clone();
                duration.distribution.normalize();
                Ok(CompiledStep::Delay { duration })
            }
            StepAction::Decision { branching } => Ok(CompiledStep::Decision {
                branching: compile_branching(&spec.name, branching, &resolve_target)?,
            }),
            StepAction::Exit => Ok(CompiledStep::Exit),
        })
        .collect::<SimResult<Vec<_>>>()?;

    match steps.last() {
        Some(CompiledStep::Exit | CompiledStep::Decision { .. }) => {}
        _ => {
            return Err(SimError::config(format!(
                "process '{}' runs past its final step",
                spec.name
            )));
        }
    }
    check_exit_reachable(&spec.name, &steps)?;

    Ok(CompiledProcess {
        name: spec.name.clone(),
        steps,
    })
}

fn compile_branching(
    process: &str,
    spec: &BranchingSpec,
    resolve_target: &impl Fn(&str) -> SimResult<usize>,
) -> SimResult<CompiledBranching> {
    match spec {
        BranchingSpec::ByProbability(branches) => {
            let branches = branches
                .iter()
                .map(|branch| Ok((branch.probability, resolve_target(&branch.to)?)))
                .collect::<SimResult<Vec<_>>>()?;
            Ok(CompiledBranching::ByProbability { branches })
        }
        BranchingSpec::ByCondition { arms, fallback } => {
            let arms = arms
                .iter()
                .map(|arm| {
                    check_orderable(process, &arm.when)?;
                    let condition = CompiledCondition {
                        key: arm.when.key.clone(),
                        op: arm.when.op,
                        value: arm.when.value.clone(),
                    };
                    Ok((condition, resolve_target(&arm.to)?))
                })
                .collect::<SimResult<Vec<_>>>()?;
            let fallback = resolve_target(fallback)?;
            Ok(CompiledBranching::ByCondition { arms, fallback })
        }
    }
}

fn check_orderable(process: &str, condition: &ConditionSpec) -> SimResult<()> {
    let ordering = matches!(
        condition.op,
        ComparisonOp::Gt | ComparisonOp::Ge | ComparisonOp::Lt | ComparisonOp::Le
    );
    if ordering && condition.value.as_number().is_none() {
        return Err(SimError::config(format!(
            "process '{process}': condition on '{}' orders a non-numeric value",
            condition.key
        )));
    }
    Ok(())
}

/// Depth-first walk from step zero; every process must reach an exit.
fn check_exit_reachable(process: &str, steps: &[CompiledStep]) -> SimResult<()> {
    let mut visited = vec![false; steps.len()];
    let mut frontier = vec![0usize];
    while let Some(index) = frontier.pop() {
        if index >= steps.len() || visited[index] {
            continue;
        }
        visited[index] = true;
        match &steps[index] {
            CompiledStep::Exit => return Ok(()),
            CompiledStep::Seize { .. } | CompiledStep::Delay { .. } | CompiledStep::Release { .. } => {
                frontier.push(index + 1);
            }
            CompiledStep::Decision { branching } => match branching {
                CompiledBranching::ByProbability { branches } => {
                    frontier.extend(branches.iter().map(|&(_, target)| target));
                }
                CompiledBranching::ByCondition { arms, fallback } => {
                    frontier.extend(arms.iter().map(|&(_, target)| target));
                    frontier.push(*fallback);
                }
            },
        }
    }
    Err(SimError::config(format!(
        "process '{process}' has no reachable exit"
    )))
}
