//! # flowsim
//!
//! Discrete-event simulation engine for queueing and manufacturing
//! networks.
//!
//! A system is described declaratively (YAML or builder) as entity
//! classes, capacity-constrained resources, and process plans. The
//! engine compiles the description, runs seeded replications over a
//! future event list, and aggregates throughput, cycle time, queue, and
//! utilization statistics with confidence intervals. A steady-state
//! queueing analysis validates descriptions before any event runs.
//!
//! ## Example
//!
//! ```rust
//! use flowsim::prelude::*;
//!
//! let description = SystemDescription::builder()
//!     .name("receiving-dock")
//!     .entity_class(EntityClassSpec::poisson("pallets", "inbound", 12.0))
//!     .resource(
//!         ResourceSpec::new("lift", 6)
//!             .with_service_time(TimedDistribution::constant_minutes(5.0)),
//!     )
//!     .process(ProcessSpec::new(
//!         "inbound",
//!         vec![
//!             StepSpec::seize("lift"),
//!             StepSpec::delay(TimedDistribution::constant_minutes(5.0)),
//!             StepSpec::release("lift"),
//!             StepSpec::exit(),
//!         ],
//!     ))
//!     .build();
//!
//! let results = run_simulation(&description, 4, 60.0, 7)?;
//! assert_eq!(results.metadata.replications_completed, 4);
//! assert!(results.conservation.balanced);
//! # Ok::<(), flowsim::SimError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::suspicious_operation_groupings,  // False positive for variance = E[X²] - E[X]²
    clippy::suboptimal_flops,  // Numerical code choices are intentional
    clippy::imprecise_flops,   // Numerical code choices are intentional
    clippy::no_effect_underscore_binding,
    clippy::too_many_lines,
    clippy::missing_const_for_fn,  // Many functions can't be const in stable Rust
    clippy::needless_range_loop,   // Sometimes range loops are clearer
    clippy::manual_midpoint,       // Manual midpoint is intentional in numerical code
)]

pub mod config;
pub mod engine;
pub mod error;
pub mod optimizer;
pub mod replication;
pub mod stability;
pub mod stats;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{
        ArrivalSpec, AttributeValue, BranchingSpec, CapacityPhase, EntityClassSpec, ProcessSpec,
        ResourceSpec, StepSpec, SystemDescription,
    };
    pub use crate::engine::sampler::{Distribution, TimeUnit, TimedDistribution};
    pub use crate::engine::{
        CompiledModel, QueueDiscipline, ReplicationResult, SimTime, Simulation,
    };
    pub use crate::error::{SimError, SimResult};
    pub use crate::optimizer::{ConfigOptimizer, OptimizationReport, OptimizerSettings};
    pub use crate::replication::{
        run_simulation, CancelFlag, ComprehensiveResults, ReplicationController, RunSettings,
    };
    pub use crate::stability::{validate_configuration, StabilityClass, ValidationReport};
}

/// Re-export for public API
pub use error::{SimError, SimResult};
pub use replication::run_simulation;
