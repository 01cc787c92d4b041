//! System description schema with YAML loading and validation.
//!
//! Mistake-proofing happens in three layers:
//! - Type-safe configuration structs
//! - Schema validation via serde and validator
//! - Runtime semantic validation (cross-references, probabilities, calendars)
//!
//! Performance problems (overloaded or idle resources, zero rates) are NOT
//! schema errors. They load fine here and are flagged by the stability
//! validator, so the optimizer can repair them.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use validator::Validate;

use crate::engine::resources::QueueDiscipline;
use crate::engine::sampler::TimedDistribution;
use crate::error::{SimError, SimResult};

/// Top-level description of a queueing network.
///
/// Loaded from YAML files with full schema validation.
///
/// # YAML Example
///
/// ```yaml
/// name: inbound-dock
/// entity_classes:
///   - name: pallets
///     process: receive
///     arrival:
///       poisson:
///         rate_per_hour: 12.0
/// resources:
///   - name: lift
///     capacity: 6
///     service_time:
///       constant:
///         value: 5.0
/// processes:
///   - name: receive
///     steps:
///       - action: seize
///         resource: lift
///       - action: delay
///         duration:
///           constant:
///             value: 5.0
///       - action: release
///         resource: lift
///       - action: exit
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SystemDescription {
    /// Model name for reports.
    #[serde(default)]
    pub name: String,

    /// Entity classes entering the system.
    #[validate(length(min = 1), nested)]
    pub entity_classes: Vec<EntityClassSpec>,

    /// Resources entities compete for.
    #[validate(nested)]
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,

    /// Process plans entities flow through.
    #[validate(length(min = 1), nested)]
    pub processes: Vec<ProcessSpec>,
}

impl SystemDescription {
    /// Load a system description from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - YAML parsing fails
    /// - Validation fails
    pub fn load<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a system description from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns error if parsing or validation fails.
    pub fn from_yaml(yaml: &str) -> SimResult<Self> {
        let description: Self = serde_yaml::from_str(yaml)?;

        description.validate()?;
        description.validate_semantic()?;

        Ok(description)
    }

    /// Create a builder for programmatic construction.
    #[must_use]
    pub fn builder() -> SystemDescriptionBuilder {
        SystemDescriptionBuilder::default()
    }

    /// Validate cross-references and structural constraints beyond schema.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Config` on dangling names, malformed branch
    /// probabilities, unordered calendars, or invalid distribution
    /// parameters.
    pub fn validate_semantic(&self) -> SimResult<()> {
        self.check_unique_names()?;
        self.check_class_references()?;

        let resource_names: HashSet<&str> =
            self.resources.iter().map(|r| r.name.as_str()).collect();

        for resource in &self.resources {
            if let Some(service) = &resource.service_time {
                service.validate_parameters()?;
            }
            if let Some(calendar) = &resource.calendar {
                check_calendar(&resource.name, calendar)?;
            }
        }

        for class in &self.entity_classes {
            check_arrival(&class.name, &class.arrival)?;
        }

        for process in &self.processes {
            check_process(process, &resource_names)?;
        }

        Ok(())
    }

    fn check_unique_names(&self) -> SimResult<()> {
        let mut seen = HashSet::new();
        for class in &self.entity_classes {
            if !seen.insert(class.name.as_str()) {
                return Err(SimError::config(format!(
                    "Duplicate entity class name '{}'",
                    class.name
                )));
            }
        }

        seen.clear();
        for resource in &self.resources {
            if !seen.insert(resource.name.as_str()) {
                return Err(SimError::config(format!(
                    "Duplicate resource name '{}'",
                    resource.name
                )));
            }
        }

        seen.clear();
        for process in &self.processes {
            if !seen.insert(process.name.as_str()) {
                return Err(SimError::config(format!(
                    "Duplicate process name '{}'",
                    process.name
                )));
            }
        }

        Ok(())
    }

    fn check_class_references(&self) -> SimResult<()> {
        let process_names: HashSet<&str> =
            self.processes.iter().map(|p| p.name.as_str()).collect();

        for class in &self.entity_classes {
            if !process_names.contains(class.process.as_str()) {
                return Err(SimError::config(format!(
                    "Entity class '{}' references unknown process '{}'",
                    class.name, class.process
                )));
            }
        }
        Ok(())
    }
}

fn check_arrival(class: &str, arrival: &ArrivalSpec) -> SimResult<()> {
    match arrival {
        ArrivalSpec::Poisson { rate_per_hour } => {
            if !rate_per_hour.is_finite() {
                return Err(SimError::config(format!(
                    "Entity class '{class}' has non-finite arrival rate"
                )));
            }
        }
        ArrivalSpec::Deterministic {
            interval_minutes,
            first_at_minutes,
        }
        | ArrivalSpec::Batch {
            interval_minutes,
            first_at_minutes,
            ..
        } => {
            if !interval_minutes.is_finite() || !first_at_minutes.is_finite() || *first_at_minutes < 0.0 {
                return Err(SimError::config(format!(
                    "Entity class '{class}' has non-finite or negative arrival timing"
                )));
            }
        }
        ArrivalSpec::Scheduled { times_minutes } => {
            if let Some(bad) = times_minutes.iter().find(|t| !t.is_finite() || **t < 0.0) {
                return Err(SimError::config(format!(
                    "Entity class '{class}' has invalid scheduled arrival time {bad}"
                )));
            }
        }
    }
    Ok(())
}

fn check_calendar(resource: &str, calendar: &[CapacityPhase]) -> SimResult<()> {
    let mut last: Option<f64> = None;
    for phase in calendar {
        if !phase.at_minutes.is_finite() || phase.at_minutes < 0.0 {
            return Err(SimError::config(format!(
                "Resource '{resource}' calendar has invalid phase time {}",
                phase.at_minutes
            )));
        }
        if let Some(prev) = last {
            if phase.at_minutes <= prev {
                return Err(SimError::config(format!(
                    "Resource '{resource}' calendar times must be strictly increasing, \
                     got {} after {prev}",
                    phase.at_minutes
                )));
            }
        }
        last = Some(phase.at_minutes);
    }
    Ok(())
}

fn check_process(process: &ProcessSpec, resource_names: &HashSet<&str>) -> SimResult<()> {
    let labels: HashSet<&str> = process
        .steps
        .iter()
        .filter_map(|s| s.label.as_deref())
        .collect();

    let check_target = |to: &str| -> SimResult<()> {
        if labels.contains(to) {
            Ok(())
        } else {
            Err(SimError::config(format!(
                "Process '{}' branches to unknown step label '{to}'",
                process.name
            )))
        }
    };

    for step in &process.steps {
        match &step.action {
            StepAction::Seize { resource } | StepAction::Release { resource } => {
                if !resource_names.contains(resource.as_str()) {
                    return Err(SimError::config(format!(
                        "Process '{}' references unknown resource '{resource}'",
                        process.name
                    )));
                }
            }
            StepAction::Delay { duration } => duration.validate_parameters()?,
            StepAction::Decision { branching } => match branching {
                BranchingSpec::ByProbability(branches) => {
                    let mut total = 0.0;
                    for branch in branches {
                        if !(0.0..=1.0).contains(&branch.probability) {
                            return Err(SimError::config(format!(
                                "Process '{}' has branch probability {} outside [0, 1]",
                                process.name, branch.probability
                            )));
                        }
                        total += branch.probability;
                        check_target(&branch.to)?;
                    }
                    if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
                        return Err(SimError::config(format!(
                            "Process '{}' branch probabilities sum to {total}, expected 1",
                            process.name
                        )));
                    }
                }
                BranchingSpec::ByCondition { arms, fallback } => {
                    for arm in arms {
                        check_target(&arm.to)?;
                    }
                    check_target(fallback)?;
                }
            },
            StepAction::Exit => {}
        }
    }
    Ok(())
}

/// Tolerance for branch probability sums.
const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Builder for programmatic model construction.
#[derive(Debug, Default)]
pub struct SystemDescriptionBuilder {
    name: String,
    entity_classes: Vec<EntityClassSpec>,
    resources: Vec<ResourceSpec>,
    processes: Vec<ProcessSpec>,
}

impl SystemDescriptionBuilder {
    /// Set the model name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add an entity class.
    #[must_use]
    pub fn entity_class(mut self, class: EntityClassSpec) -> Self {
        self.entity_classes.push(class);
        self
    }

    /// Add a resource.
    #[must_use]
    pub fn resource(mut self, resource: ResourceSpec) -> Self {
        self.resources.push(resource);
        self
    }

    /// Add a process plan.
    #[must_use]
    pub fn process(mut self, process: ProcessSpec) -> Self {
        self.processes.push(process);
        self
    }

    /// Assemble the description. Semantic validation happens at run or
    /// via [`SystemDescription::validate_semantic`].
    #[must_use]
    pub fn build(self) -> SystemDescription {
        SystemDescription {
            name: self.name,
            entity_classes: self.entity_classes,
            resources: self.resources,
            processes: self.processes,
        }
    }
}

/// One class of entities sharing an arrival pattern and process plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EntityClassSpec {
    /// Class name.
    #[validate(length(min = 1))]
    pub name: String,
    /// Name of the process this class flows through.
    #[validate(length(min = 1))]
    pub process: String,
    /// Arrival pattern.
    pub arrival: ArrivalSpec,
    /// Attributes stamped on every entity of this class at creation.
    #[serde(default)]
    pub attributes: HashMap<String, AttributeValue>,
}

impl EntityClassSpec {
    /// Class with Poisson arrivals at the given hourly rate.
    #[must_use]
    pub fn poisson(name: impl Into<String>, process: impl Into<String>, rate_per_hour: f64) -> Self {
        Self {
            name: name.into(),
            process: process.into(),
            arrival: ArrivalSpec::Poisson { rate_per_hour },
            attributes: HashMap::new(),
        }
    }

    /// Class with evenly spaced arrivals.
    #[must_use]
    pub fn deterministic(
        name: impl Into<String>,
        process: impl Into<String>,
        interval_minutes: f64,
    ) -> Self {
        Self {
            name: name.into(),
            process: process.into(),
            arrival: ArrivalSpec::Deterministic {
                interval_minutes,
                first_at_minutes: 0.0,
            },
            attributes: HashMap::new(),
        }
    }

    /// Attach an attribute to the class.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Arrival pattern for an entity class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArrivalSpec {
    /// Poisson process with exponential interarrival times.
    Poisson {
        /// Mean arrivals per hour.
        rate_per_hour: f64,
    },
    /// Evenly spaced single arrivals.
    Deterministic {
        /// Spacing between arrivals in minutes.
        interval_minutes: f64,
        /// Offset of the first arrival in minutes.
        #[serde(default)]
        first_at_minutes: f64,
    },
    /// Arrivals at explicit instants.
    Scheduled {
        /// Arrival times in minutes.
        times_minutes: Vec<f64>,
    },
    /// Evenly spaced batches of simultaneous arrivals.
    Batch {
        /// Entities per batch.
        size: u32,
        /// Spacing between batches in minutes.
        interval_minutes: f64,
        /// Offset of the first batch in minutes.
        #[serde(default)]
        first_at_minutes: f64,
    },
}

impl ArrivalSpec {
    /// Long-run arrival rate in entities per minute.
    ///
    /// Degenerate patterns (zero intervals, single scheduled arrival)
    /// report zero rather than a nonsense rate.
    #[must_use]
    pub fn rate_per_minute(&self) -> f64 {
        match self {
            Self::Poisson { rate_per_hour } => rate_per_hour / 60.0,
            Self::Deterministic {
                interval_minutes, ..
            } => {
                if *interval_minutes > 0.0 {
                    1.0 / interval_minutes
                } else {
                    0.0
                }
            }
            Self::Batch {
                size,
                interval_minutes,
                ..
            } => {
                if *interval_minutes > 0.0 {
                    f64::from(*size) / interval_minutes
                } else {
                    0.0
                }
            }
            Self::Scheduled { times_minutes } => {
                if times_minutes.len() < 2 {
                    return 0.0;
                }
                let first = times_minutes.iter().copied().fold(f64::INFINITY, f64::min);
                let last = times_minutes
                    .iter()
                    .copied()
                    .fold(f64::NEG_INFINITY, f64::max);
                let span = last - first;
                if span > 0.0 {
                    (times_minutes.len() - 1) as f64 / span
                } else {
                    0.0
                }
            }
        }
    }
}

/// A capacity-constrained resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ResourceSpec {
    /// Resource name.
    #[validate(length(min = 1))]
    pub name: String,
    /// Number of units that can be held simultaneously. Zero loads fine
    /// and is flagged as a defect by the stability validator.
    pub capacity: u32,
    /// Nominal service time, used by stability analysis and the
    /// shortest-processing queue discipline.
    #[serde(default)]
    pub service_time: Option<TimedDistribution>,
    /// Queue ordering when demand exceeds capacity.
    #[serde(default)]
    pub discipline: QueueDiscipline,
    /// Scheduled capacity changes over the run.
    #[serde(default)]
    pub calendar: Option<Vec<CapacityPhase>>,
}

impl ResourceSpec {
    /// Resource with the given capacity and FIFO queueing.
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: u32) -> Self {
        Self {
            name: name.into(),
            capacity,
            service_time: None,
            discipline: QueueDiscipline::default(),
            calendar: None,
        }
    }

    /// Attach a nominal service time.
    #[must_use]
    pub fn with_service_time(mut self, service_time: TimedDistribution) -> Self {
        self.service_time = Some(service_time);
        self
    }

    /// Set the queue discipline.
    #[must_use]
    pub fn with_discipline(mut self, discipline: QueueDiscipline) -> Self {
        self.discipline = discipline;
        self
    }

    /// Attach a capacity calendar.
    #[must_use]
    pub fn with_calendar(mut self, calendar: Vec<CapacityPhase>) -> Self {
        self.calendar = Some(calendar);
        self
    }
}

/// One phase of a capacity calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapacityPhase {
    /// Instant the phase takes effect, in minutes.
    pub at_minutes: f64,
    /// Capacity from that instant on.
    pub capacity: u32,
}

/// A process plan: the ordered steps one entity class works through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ProcessSpec {
    /// Process name.
    #[validate(length(min = 1))]
    pub name: String,
    /// Steps in plan order.
    #[validate(length(min = 1))]
    pub steps: Vec<StepSpec>,
}

impl ProcessSpec {
    /// Process plan from a list of steps.
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }
}

/// One step of a process plan, optionally labeled as a branch target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Label decisions can branch to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// What the step does.
    #[serde(flatten)]
    pub action: StepAction,
}

impl StepSpec {
    /// Seize one unit of a resource, queueing if none is free.
    #[must_use]
    pub fn seize(resource: impl Into<String>) -> Self {
        Self {
            label: None,
            action: StepAction::Seize {
                resource: resource.into(),
            },
        }
    }

    /// Hold for a sampled duration.
    #[must_use]
    pub const fn delay(duration: TimedDistribution) -> Self {
        Self {
            label: None,
            action: StepAction::Delay { duration },
        }
    }

    /// Return one unit of a resource.
    #[must_use]
    pub fn release(resource: impl Into<String>) -> Self {
        Self {
            label: None,
            action: StepAction::Release {
                resource: resource.into(),
            },
        }
    }

    /// Route to a labeled step.
    #[must_use]
    pub const fn decision(branching: BranchingSpec) -> Self {
        Self {
            label: None,
            action: StepAction::Decision { branching },
        }
    }

    /// Leave the system.
    #[must_use]
    pub const fn exit() -> Self {
        Self {
            label: None,
            action: StepAction::Exit,
        }
    }

    /// Attach a branch-target label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Step actions, tagged by `action:` in YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum StepAction {
    /// Acquire one unit of a resource or join its queue.
    Seize {
        /// Resource to acquire.
        resource: String,
    },
    /// Hold for a sampled duration.
    Delay {
        /// Duration distribution.
        duration: TimedDistribution,
    },
    /// Return one unit of a resource.
    Release {
        /// Resource to release.
        resource: String,
    },
    /// Route to a labeled step.
    Decision {
        /// How the branch is chosen.
        #[serde(flatten)]
        branching: BranchingSpec,
    },
    /// Leave the system.
    Exit,
}

/// Branch selection for decision steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BranchingSpec {
    /// Random routing; probabilities must sum to one.
    ByProbability(Vec<ProbabilityBranch>),
    /// Attribute-based routing; the first matching arm wins.
    ByCondition {
        /// Condition arms in evaluation order.
        arms: Vec<ConditionArm>,
        /// Target when no arm matches.
        fallback: String,
    },
}

/// One probabilistic branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbabilityBranch {
    /// Probability of taking this branch.
    pub probability: f64,
    /// Target step label.
    pub to: String,
}

/// One conditional branch arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionArm {
    /// Condition on entity attributes.
    pub when: ConditionSpec,
    /// Target step label.
    pub to: String,
}

/// An attribute comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionSpec {
    /// Attribute key to inspect.
    pub key: String,
    /// Comparison operator.
    pub op: ComparisonOp,
    /// Value to compare against.
    pub value: AttributeValue,
}

/// Comparison operators for conditional routing.
///
/// Ordering operators only apply to numeric attributes; text and flag
/// attributes support equality only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComparisonOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
}

/// Attribute values carried by entities.
///
/// Untagged: YAML booleans become flags, numbers become numeric, and
/// everything else is text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Boolean flag.
    Flag(bool),
    /// Numeric value.
    Number(f64),
    /// Free text.
    Text(String),
}

impl AttributeValue {
    /// Numeric view, if this is a number.
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Flag view, if this is a boolean.
    #[must_use]
    pub const fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            _ => None,
        }
    }

    /// Text view, if this is a string.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}
