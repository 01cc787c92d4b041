//! Replication control and cross-replication aggregation.
//!
//! A run executes N independent replications of one compiled model,
//! each with a seed derived from the base seed, then aggregates the
//! per-replication outputs into confidence-interval summaries. With
//! `parallel` enabled the replications fan out over the rayon pool;
//! results are identical to a sequential run because every replication
//! owns its derived generator.
//!
//! Replication-scoped aborts (a bad sample, a blown event budget) drop
//! that replication from aggregation and are reported in the metadata.
//! Every other error ends the whole run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::SystemDescription;
use crate::engine::rng::derive_replication_seed;
use crate::engine::{CompiledModel, ReplicationResult, SimTime, Simulation};
use crate::error::{SimError, SimResult};
use crate::stability::{validate_configuration, ValidationReport};
use crate::stats::CrossReplicationStatistic;

/// Event budget per replication unless overridden.
pub const DEFAULT_MAX_EVENTS: u64 = 10_000_000;

/// Largest acceptable Little's law discrepancy, in percent.
pub const LITTLES_LAW_TOLERANCE_PERCENT: f64 = 5.0;

// ===== Run settings =====

/// Settings for a replication run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Number of replications to execute.
    pub replications: u32,
    /// Run length of each replication, in minutes.
    pub horizon_minutes: f64,
    /// Warmup transient excluded from statistics, in minutes.
    pub warmup_minutes: f64,
    /// Base seed replication seeds are derived from.
    pub base_seed: u64,
    /// Event budget per replication.
    pub max_events: u64,
    /// Fan replications out over the rayon pool.
    pub parallel: bool,
}

impl RunSettings {
    /// Settings with no warmup, seed zero, sequential execution.
    #[must_use]
    pub const fn new(replications: u32, horizon_minutes: f64) -> Self {
        Self {
            replications,
            horizon_minutes,
            warmup_minutes: 0.0,
            base_seed: 0,
            max_events: DEFAULT_MAX_EVENTS,
            parallel: false,
        }
    }

    /// Set the warmup period.
    #[must_use]
    pub const fn with_warmup(mut self, minutes: f64) -> Self {
        self.warmup_minutes = minutes;
        self
    }

    /// Set the base seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.base_seed = seed;
        self
    }

    /// Set the per-replication event budget.
    #[must_use]
    pub const fn with_max_events(mut self, cap: u64) -> Self {
        self.max_events = cap;
        self
    }

    /// Enable or disable parallel execution.
    #[must_use]
    pub const fn with_parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    fn validate(&self) -> SimResult<()> {
        if self.replications == 0 {
            return Err(SimError::config("A run needs at least one replication"));
        }
        if !self.horizon_minutes.is_finite() || self.horizon_minutes <= 0.0 {
            return Err(SimError::config(format!(
                "A run needs a positive finite horizon, got {}",
                self.horizon_minutes
            )));
        }
        if !self.warmup_minutes.is_finite() || self.warmup_minutes < 0.0 {
            return Err(SimError::config(format!(
                "A run needs a non-negative finite warmup, got {}",
                self.warmup_minutes
            )));
        }
        if self.warmup_minutes >= self.horizon_minutes {
            return Err(SimError::config(format!(
                "Warmup {} leaves no observation window before the horizon {}",
                self.warmup_minutes, self.horizon_minutes
            )));
        }
        if self.max_events == 0 {
            return Err(SimError::config("A run needs a positive event budget"));
        }
        Ok(())
    }
}

// ===== Cancellation =====

/// Shared flag that stops a run between replications.
///
/// Replications already in flight finish; pending ones are skipped.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a flag in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ===== Aggregated outputs =====

/// A replication dropped from aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedReplication {
    /// Replication index.
    pub replication: u32,
    /// Seed the replication ran with.
    pub seed: u64,
    /// Abort it terminated with.
    pub reason: String,
}

/// Per-resource aggregates across replications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePerformance {
    /// Resource name.
    pub name: String,
    /// Nominal capacity before any calendar phase.
    pub capacity: u32,
    /// Utilization across replications.
    pub utilization: CrossReplicationStatistic,
    /// Time-average queue length across replications.
    pub mean_queue_length: CrossReplicationStatistic,
    /// Completed seizes across replications.
    pub seizes: CrossReplicationStatistic,
}

/// One entry in the bottleneck ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleneckEntry {
    /// Resource name.
    pub resource: String,
    /// Mean utilization across replications.
    pub utilization: f64,
    /// Mean queue length across replications.
    pub mean_queue_length: f64,
}

/// Consistency check of L = lambda W on the aggregated means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LittlesLawCheck {
    /// Mean work in process.
    pub mean_wip: f64,
    /// Mean throughput per minute.
    pub throughput_per_minute: f64,
    /// Mean cycle time in minutes.
    pub mean_cycle_time_minutes: f64,
    /// Relative gap between L and lambda W, in percent.
    pub discrepancy_percent: f64,
    /// Whether the gap is within tolerance.
    pub verified: bool,
}

/// Entity count balance summed over completed replications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConservationSummary {
    /// Entities created.
    pub created: u64,
    /// Entities that departed.
    pub departed: u64,
    /// Entities still in system at the end of each replication.
    pub in_system: u64,
    /// Whether created equals departed plus in-system.
    pub balanced: bool,
}

/// Provenance of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Base seed the replication seeds were derived from.
    pub base_seed: u64,
    /// Replications requested.
    pub replications_requested: u32,
    /// Replications that completed and were aggregated.
    pub replications_completed: u32,
    /// Replications dropped by a replication-scoped abort.
    pub excluded: Vec<ExcludedReplication>,
    /// Horizon in minutes.
    pub horizon_minutes: f64,
    /// Warmup in minutes.
    pub warmup_minutes: f64,
    /// Whether the run used the rayon pool.
    pub parallel: bool,
    /// Whether the run was cancelled before all replications launched.
    pub cancelled: bool,
}

/// Aggregated outputs of a replication run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveResults {
    /// Model name from the description.
    pub model_name: String,
    /// Throughput per minute across replications.
    pub throughput_per_minute: CrossReplicationStatistic,
    /// Mean cycle time in minutes across replications.
    pub cycle_time_minutes: CrossReplicationStatistic,
    /// Mean queue wait in minutes across replications.
    pub wait_time_minutes: CrossReplicationStatistic,
    /// Time-average work in process across replications.
    pub work_in_process: CrossReplicationStatistic,
    /// Per-resource aggregates, in model order.
    pub resources: Vec<ResourcePerformance>,
    /// Resources ranked by utilization, most loaded first.
    pub bottlenecks: Vec<BottleneckEntry>,
    /// Little's law consistency check.
    pub littles_law: LittlesLawCheck,
    /// Steady-state analysis of the description that was run.
    pub stability: ValidationReport,
    /// Entity balance over completed replications.
    pub conservation: ConservationSummary,
    /// Run provenance.
    pub metadata: RunMetadata,
    /// Raw per-replication outputs, in replication order.
    pub replications: Vec<ReplicationResult>,
}

// ===== Controller =====

enum RepOutcome {
    Completed(ReplicationResult),
    Excluded(ExcludedReplication),
    Skipped,
}

/// Runs replications of one compiled model and aggregates the outputs.
#[derive(Debug)]
pub struct ReplicationController {
    model: Arc<CompiledModel>,
    description: SystemDescription,
    settings: RunSettings,
}

impl ReplicationController {
    /// Validate the description and settings, then compile the model.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Config` on invalid settings or a description
    /// that fails semantic validation or compilation.
    pub fn new(description: &SystemDescription, settings: RunSettings) -> SimResult<Self> {
        settings.validate()?;
        description.validate_semantic()?;
        let model = Arc::new(CompiledModel::compile(description)?);
        Ok(Self {
            model,
            description: description.clone(),
            settings,
        })
    }

    /// Settings the controller was built with.
    #[must_use]
    pub const fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Execute the run to completion.
    ///
    /// # Errors
    ///
    /// Returns the first non-abort error from any replication, or
    /// `SimError::InvalidResult` when every replication was excluded.
    pub fn run(&self) -> SimResult<ComprehensiveResults> {
        self.run_with_cancel(&CancelFlag::new())
    }

    /// Execute the run, checking `cancel` before each replication starts.
    ///
    /// # Errors
    ///
    /// As [`Self::run`]; a run cancelled before any replication
    /// completed has nothing to aggregate and fails the same way as a
    /// fully excluded run.
    pub fn run_with_cancel(&self, cancel: &CancelFlag) -> SimResult<ComprehensiveResults> {
        tracing::info!(
            replications = self.settings.replications,
            horizon_minutes = self.settings.horizon_minutes,
            parallel = self.settings.parallel,
            "starting replication run"
        );

        let indices = 0..self.settings.replications;
        let outcomes: Vec<RepOutcome> = if self.settings.parallel {
            indices
                .into_par_iter()
                .map(|index| self.launch(index, cancel))
                .collect::<SimResult<_>>()?
        } else {
            indices
                .map(|index| self.launch(index, cancel))
                .collect::<SimResult<_>>()?
        };

        self.aggregate(outcomes, cancel.is_cancelled())
    }

    /// Run one replication, mapping replication-scoped aborts to exclusions.
    fn launch(&self, index: u32, cancel: &CancelFlag) -> SimResult<RepOutcome> {
        if cancel.is_cancelled() {
            return Ok(RepOutcome::Skipped);
        }
        let seed = derive_replication_seed(self.settings.base_seed, u64::from(index));
        let simulation = Simulation::new(
            Arc::clone(&self.model),
            SimTime::from_minutes(self.settings.horizon_minutes),
            SimTime::from_minutes(self.settings.warmup_minutes),
            seed,
            self.settings.max_events,
        );
        match simulation.run() {
            Ok(mut result) => {
                result.replication = index;
                tracing::debug!(replication = index, seed, "replication complete");
                Ok(RepOutcome::Completed(result))
            }
            Err(e) if e.is_replication_abort() => {
                tracing::warn!(replication = index, seed, error = %e, "replication excluded");
                Ok(RepOutcome::Excluded(ExcludedReplication {
                    replication: index,
                    seed,
                    reason: e.to_string(),
                }))
            }
            Err(e) => Err(e),
        }
    }

    fn aggregate(
        &self,
        outcomes: Vec<RepOutcome>,
        cancelled: bool,
    ) -> SimResult<ComprehensiveResults> {
        let mut completed = Vec::new();
        let mut excluded = Vec::new();
        for outcome in outcomes {
            match outcome {
                RepOutcome::Completed(result) => completed.push(result),
                RepOutcome::Excluded(record) => excluded.push(record),
                RepOutcome::Skipped => {}
            }
        }
        if completed.is_empty() {
            return Err(SimError::invalid_result("completed replications", 0.0));
        }

        let throughput = collect_stat(&completed, |r| r.throughput_per_minute);
        let cycle = collect_stat(&completed, |r| r.mean_cycle_time_minutes);
        let wait = collect_stat(&completed, |r| r.mean_wait_time_minutes);
        let wip = collect_stat(&completed, |r| r.mean_wip);

        let mut resources = Vec::with_capacity(self.model.resources.len());
        for (index, spec) in self.model.resources.iter().enumerate() {
            resources.push(ResourcePerformance {
                name: spec.name.clone(),
                capacity: spec.capacity,
                utilization: collect_stat(&completed, |r| r.resources[index].utilization),
                mean_queue_length: collect_stat(&completed, |r| {
                    r.resources[index].mean_queue_length
                }),
                seizes: collect_stat(&completed, |r| r.resources[index].seizes as f64),
            });
        }

        let mut bottlenecks: Vec<BottleneckEntry> = resources
            .iter()
            .map(|r| BottleneckEntry {
                resource: r.name.clone(),
                utilization: r.utilization.mean,
                mean_queue_length: r.mean_queue_length.mean,
            })
            .collect();
        bottlenecks.sort_by(|a, b| {
            b.utilization
                .total_cmp(&a.utilization)
                .then(b.mean_queue_length.total_cmp(&a.mean_queue_length))
        });

        let littles_law = check_littles_law(wip.mean, throughput.mean, cycle.mean);

        let created: u64 = completed.iter().map(|r| r.created).sum();
        let departed: u64 = completed.iter().map(|r| r.departed).sum();
        let in_system: u64 = completed.iter().map(|r| r.in_system).sum();
        let conservation = ConservationSummary {
            created,
            departed,
            in_system,
            balanced: created == departed + in_system,
        };

        let completed_count = u32::try_from(completed.len()).unwrap_or(u32::MAX);
        let metadata = RunMetadata {
            base_seed: self.settings.base_seed,
            replications_requested: self.settings.replications,
            replications_completed: completed_count,
            excluded,
            horizon_minutes: self.settings.horizon_minutes,
            warmup_minutes: self.settings.warmup_minutes,
            parallel: self.settings.parallel,
            cancelled,
        };

        Ok(ComprehensiveResults {
            model_name: self.description.name.clone(),
            throughput_per_minute: throughput,
            cycle_time_minutes: cycle,
            wait_time_minutes: wait,
            work_in_process: wip,
            resources,
            bottlenecks,
            littles_law,
            stability: validate_configuration(&self.description),
            conservation,
            metadata,
            replications: completed,
        })
    }
}

/// Compile a description and run it with default warmup and settings.
///
/// # Errors
///
/// As [`ReplicationController::new`] and [`ReplicationController::run`].
pub fn run_simulation(
    description: &SystemDescription,
    replications: u32,
    duration_minutes: f64,
    seed: u64,
) -> SimResult<ComprehensiveResults> {
    let settings = RunSettings::new(replications, duration_minutes).with_seed(seed);
    ReplicationController::new(description, settings)?.run()
}

fn collect_stat(
    completed: &[ReplicationResult],
    metric: impl Fn(&ReplicationResult) -> f64,
) -> CrossReplicationStatistic {
    let samples: Vec<f64> = completed.iter().map(metric).collect();
    CrossReplicationStatistic::from_samples(&samples)
}

fn check_littles_law(wip: f64, throughput: f64, cycle: f64) -> LittlesLawCheck {
    let expected = throughput * cycle;
    let discrepancy_percent = if wip.abs() < 1e-9 && expected.abs() < 1e-9 {
        0.0
    } else {
        (wip - expected).abs() / wip.abs().max(1e-9) * 100.0
    };
    LittlesLawCheck {
        mean_wip: wip,
        throughput_per_minute: throughput,
        mean_cycle_time_minutes: cycle,
        discrepancy_percent,
        verified: discrepancy_percent < LITTLES_LAW_TOLERANCE_PERCENT,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{EntityClassSpec, ProcessSpec, ResourceSpec, StepSpec};
    use crate::engine::sampler::TimedDistribution;

    fn single_queue(rate_per_hour: f64, mean_service: f64, capacity: u32) -> SystemDescription {
        SystemDescription::builder()
            .name("single-queue")
            .entity_class(EntityClassSpec::poisson("jobs", "serve", rate_per_hour))
            .resource(
                ResourceSpec::new("server", capacity)
                    .with_service_time(TimedDistribution::exponential_minutes(mean_service)),
            )
            .process(ProcessSpec::new(
                "serve",
                vec![
                    StepSpec::seize("server"),
                    StepSpec::delay(TimedDistribution::exponential_minutes(mean_service)),
                    StepSpec::release("server"),
                    StepSpec::exit(),
                ],
            ))
            .build()
    }

    fn two_station_chain() -> SystemDescription {
        SystemDescription::builder()
            .name("two-station-chain")
            .entity_class(EntityClassSpec::deterministic("parts", "flow", 2.0))
            .resource(
                ResourceSpec::new("busy", 1)
                    .with_service_time(TimedDistribution::constant_minutes(1.6)),
            )
            .resource(
                ResourceSpec::new("idle", 1)
                    .with_service_time(TimedDistribution::constant_minutes(0.2)),
            )
            .process(ProcessSpec::new(
                "flow",
                vec![
                    StepSpec::seize("busy"),
                    StepSpec::delay(TimedDistribution::constant_minutes(1.6)),
                    StepSpec::release("busy"),
                    StepSpec::seize("idle"),
                    StepSpec::delay(TimedDistribution::constant_minutes(0.2)),
                    StepSpec::release("idle"),
                    StepSpec::exit(),
                ],
            ))
            .build()
    }

    #[test]
    fn test_settings_validation() {
        let description = single_queue(30.0, 1.0, 1);

        let zero_reps = RunSettings::new(0, 100.0);
        assert!(ReplicationController::new(&description, zero_reps).is_err());

        let zero_horizon = RunSettings::new(4, 0.0);
        assert!(ReplicationController::new(&description, zero_horizon).is_err());

        let nan_horizon = RunSettings::new(4, f64::NAN);
        assert!(ReplicationController::new(&description, nan_horizon).is_err());

        let warmup_past_horizon = RunSettings::new(4, 100.0).with_warmup(100.0);
        assert!(ReplicationController::new(&description, warmup_past_horizon).is_err());

        let no_budget = RunSettings::new(4, 100.0).with_max_events(0);
        assert!(ReplicationController::new(&description, no_budget).is_err());

        let good = RunSettings::new(4, 100.0).with_warmup(10.0);
        assert!(ReplicationController::new(&description, good).is_ok());
    }

    #[test]
    fn test_run_completes_all_replications() {
        let description = single_queue(30.0, 1.0, 1);
        let settings = RunSettings::new(4, 200.0).with_seed(42);
        let controller = ReplicationController::new(&description, settings).unwrap();

        let results = controller.run().unwrap();
        assert_eq!(results.metadata.replications_requested, 4);
        assert_eq!(results.metadata.replications_completed, 4);
        assert!(results.metadata.excluded.is_empty());
        assert!(!results.metadata.cancelled);
        assert_eq!(results.replications.len(), 4);

        for (index, rep) in results.replications.iter().enumerate() {
            assert_eq!(rep.replication as usize, index);
            assert_eq!(rep.seed, derive_replication_seed(42, index as u64));
        }
        assert_eq!(results.model_name, "single-queue");
    }

    #[test]
    fn test_same_settings_reproduce_bitwise() {
        let description = single_queue(45.0, 1.0, 2);
        let settings = RunSettings::new(3, 300.0).with_seed(7).with_warmup(50.0);

        let a = ReplicationController::new(&description, settings)
            .unwrap()
            .run()
            .unwrap();
        let b = ReplicationController::new(&description, settings)
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let description = single_queue(45.0, 1.0, 2);
        let sequential = RunSettings::new(4, 300.0).with_seed(11);
        let parallel = sequential.with_parallel(true);

        let a = ReplicationController::new(&description, sequential)
            .unwrap()
            .run()
            .unwrap();
        let b = ReplicationController::new(&description, parallel)
            .unwrap()
            .run()
            .unwrap();

        // Everything except the parallel flag itself must agree
        assert_eq!(a.replications, b.replications);
        assert_eq!(a.throughput_per_minute, b.throughput_per_minute);
        assert_eq!(a.cycle_time_minutes, b.cycle_time_minutes);
        assert_eq!(a.resources, b.resources);
        assert_eq!(a.conservation, b.conservation);
        assert!(!a.metadata.parallel);
        assert!(b.metadata.parallel);
    }

    #[test]
    fn test_throughput_tracks_arrival_rate() {
        // lambda = 0.5/min at utilization 0.5, long run
        let description = single_queue(30.0, 1.0, 1);
        let settings = RunSettings::new(10, 2000.0).with_warmup(200.0).with_seed(3);
        let results = ReplicationController::new(&description, settings)
            .unwrap()
            .run()
            .unwrap();

        let throughput = results.throughput_per_minute.mean;
        assert!(
            (throughput - 0.5).abs() < 0.05,
            "throughput {throughput} should be near 0.5"
        );
    }

    #[test]
    fn test_littles_law_holds_on_stable_queue() {
        let description = single_queue(30.0, 1.0, 1);
        let settings = RunSettings::new(10, 2000.0).with_warmup(200.0).with_seed(5);
        let results = ReplicationController::new(&description, settings)
            .unwrap()
            .run()
            .unwrap();

        assert!(
            results.littles_law.verified,
            "discrepancy {}% exceeds tolerance",
            results.littles_law.discrepancy_percent
        );
    }

    #[test]
    fn test_bottleneck_ranking_orders_by_utilization() {
        let settings = RunSettings::new(3, 400.0).with_seed(2);
        let results = ReplicationController::new(&two_station_chain(), settings)
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(results.bottlenecks.len(), 2);
        assert_eq!(results.bottlenecks[0].resource, "busy");
        assert_eq!(results.bottlenecks[1].resource, "idle");
        assert!(results.bottlenecks[0].utilization > results.bottlenecks[1].utilization);

        // Uncontended constant-rate chain: utilization near work content / interval
        let busy = &results.resources[0];
        assert!((busy.utilization.mean - 0.8).abs() < 0.02);
    }

    #[test]
    fn test_conservation_summary_balances() {
        let description = single_queue(60.0, 0.5, 2);
        let settings = RunSettings::new(5, 300.0).with_seed(9);
        let results = ReplicationController::new(&description, settings)
            .unwrap()
            .run()
            .unwrap();

        let c = &results.conservation;
        assert!(c.balanced);
        assert_eq!(c.created, c.departed + c.in_system);
        assert!(c.created > 0);
    }

    #[test]
    fn test_resource_performance_shape() {
        let settings = RunSettings::new(3, 200.0).with_seed(4);
        let results = ReplicationController::new(&two_station_chain(), settings)
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(results.resources.len(), 2);
        assert_eq!(results.resources[0].name, "busy");
        assert_eq!(results.resources[0].capacity, 1);
        assert_eq!(results.resources[0].utilization.replications, 3);
        assert!(results.resources[0].seizes.mean > 0.0);
    }

    #[test]
    fn test_stability_report_rides_along() {
        let description = single_queue(30.0, 1.0, 1);
        let settings = RunSettings::new(2, 100.0).with_seed(1);
        let results = ReplicationController::new(&description, settings)
            .unwrap()
            .run()
            .unwrap();

        assert!(results.stability.is_healthy());
        assert_eq!(results.stability.resources.len(), 1);
    }

    #[test]
    fn test_blown_budget_excludes_every_replication() {
        let description = single_queue(60.0, 1.0, 1);
        let settings = RunSettings::new(3, 500.0).with_max_events(10);

        let err = ReplicationController::new(&description, settings)
            .unwrap()
            .run()
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidResult { .. }));
    }

    #[test]
    fn test_cancel_flag_semantics() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());

        let shared = flag.clone();
        shared.cancel();
        assert!(flag.is_cancelled(), "clones share cancellation state");
    }

    #[test]
    fn test_cancelled_before_start_has_nothing_to_aggregate() {
        let description = single_queue(30.0, 1.0, 1);
        let settings = RunSettings::new(4, 100.0);
        let controller = ReplicationController::new(&description, settings).unwrap();

        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = controller.run_with_cancel(&cancel).unwrap_err();
        assert!(matches!(err, SimError::InvalidResult { .. }));
    }

    #[test]
    fn test_run_simulation_convenience() {
        let description = single_queue(30.0, 1.0, 1);
        let results = run_simulation(&description, 3, 200.0, 17).unwrap();

        assert_eq!(results.metadata.replications_completed, 3);
        assert_eq!(results.metadata.base_seed, 17);
        assert!((results.metadata.horizon_minutes - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_results_serde_round_trip() {
        let description = single_queue(30.0, 1.0, 1);
        let results = run_simulation(&description, 2, 100.0, 8).unwrap();

        let json = serde_json::to_string(&results).unwrap();
        let back: ComprehensiveResults = serde_json::from_str(&json).unwrap();
        assert_eq!(results, back);
    }

    #[test]
    fn test_littles_law_check_arithmetic() {
        let exact = check_littles_law(2.0, 0.5, 4.0);
        assert!(exact.verified);
        assert!(exact.discrepancy_percent.abs() < f64::EPSILON);

        let off = check_littles_law(2.0, 0.5, 8.0);
        assert!(!off.verified);
        assert!((off.discrepancy_percent - 100.0).abs() < 1e-9);

        let empty = check_littles_law(0.0, 0.0, 0.0);
        assert!(empty.verified);
    }
}
