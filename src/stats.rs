//! Streaming statistics for simulation outputs.
//!
//! Two accumulator shapes cover every metric the engine reports:
//! [`TallyStat`] for per-observation values (cycle times, waits) using
//! Welford's online algorithm, and [`TimeWeighted`] for state variables
//! (queue lengths, WIP, busy servers) integrated over time.
//!
//! Both respect an observation start so warmup transients stay out of
//! the reported numbers. Cross-replication aggregation adds Student-t
//! confidence half-widths.

use serde::{Deserialize, Serialize};

use crate::engine::SimTime;

// ===== Per-observation tally =====

/// Online mean/variance accumulator (Welford's algorithm).
///
/// Numerically stable for long runs; variance is the sample variance
/// (n - 1 divisor).
#[derive(Debug, Clone)]
pub struct TallyStat {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl TallyStat {
    /// Create an empty tally.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Record one observation.
    pub fn record(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Number of observations recorded.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Mean of the observations, zero when empty.
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance, zero with fewer than two observations.
    #[must_use]
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// Sample standard deviation.
    #[must_use]
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Smallest observation, if any.
    #[must_use]
    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    /// Largest observation, if any.
    #[must_use]
    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }
}

impl Default for TallyStat {
    fn default() -> Self {
        Self::new()
    }
}

// ===== Time-weighted state variable =====

/// Time-weighted average of a piecewise-constant state variable.
///
/// Accumulates area under the step function from the observation start
/// onward. Values set before the start contribute nothing until the
/// start instant passes.
#[derive(Debug, Clone)]
pub struct TimeWeighted {
    current: f64,
    area: f64,
    last_change: SimTime,
    start: SimTime,
}

impl TimeWeighted {
    /// Create an accumulator that starts observing at `start`.
    #[must_use]
    pub const fn new(start: SimTime) -> Self {
        Self {
            current: 0.0,
            area: 0.0,
            last_change: SimTime::ZERO,
            start,
        }
    }

    /// Record a new level taking effect at `now`.
    pub fn set(&mut self, value: f64, now: SimTime) {
        let from = self.last_change.max(self.start);
        if now > from {
            self.area += self.current * (now - from).as_minutes();
        }
        self.last_change = now;
        self.current = value;
    }

    /// Current level.
    #[must_use]
    pub const fn current(&self) -> f64 {
        self.current
    }

    /// Time average over [start, end], zero for an empty span.
    #[must_use]
    pub fn time_average(&self, end: SimTime) -> f64 {
        if end <= self.start {
            return 0.0;
        }
        let span = (end - self.start).as_minutes();
        let from = self.last_change.max(self.start);
        let tail = if end > from {
            self.current * (end - from).as_minutes()
        } else {
            0.0
        };
        (self.area + tail) / span
    }
}

// ===== Confidence intervals =====

/// Two-sided 95% Student-t critical value for the given degrees of freedom.
#[must_use]
pub fn student_t_975(df: u64) -> f64 {
    const TABLE: [f64; 30] = [
        12.706, 4.303, 3.182, 2.776, 2.571, 2.447, 2.365, 2.306, 2.262, 2.228, 2.201, 2.179,
        2.160, 2.145, 2.131, 2.120, 2.110, 2.101, 2.093, 2.086, 2.080, 2.074, 2.069, 2.064,
        2.060, 2.056, 2.052, 2.048, 2.045, 2.042,
    ];
    match df {
        0 => f64::INFINITY,
        1..=30 => TABLE[(df - 1) as usize],
        31..=40 => 2.021,
        41..=60 => 2.000,
        61..=120 => 1.980,
        _ => 1.960,
    }
}

/// Half-width of the 95% confidence interval for a mean.
///
/// Undefined below two replications, so `None` rather than a fake zero.
#[must_use]
pub fn confidence_half_width(n: u64, std_dev: f64) -> Option<f64> {
    if n < 2 {
        return None;
    }
    Some(student_t_975(n - 1) * std_dev / (n as f64).sqrt())
}

/// Summary of one metric across replications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossReplicationStatistic {
    /// Mean over completed replications.
    pub mean: f64,
    /// Sample standard deviation over replications.
    pub std_dev: f64,
    /// Smallest replication value.
    pub min: f64,
    /// Largest replication value.
    pub max: f64,
    /// 95% confidence half-width, absent below two replications.
    pub half_width: Option<f64>,
    /// Number of replications aggregated.
    pub replications: u64,
}

impl CrossReplicationStatistic {
    /// Aggregate one metric's per-replication values.
    #[must_use]
    pub fn from_samples(samples: &[f64]) -> Self {
        let mut tally = TallyStat::new();
        for &s in samples {
            tally.record(s);
        }
        Self {
            mean: tally.mean(),
            std_dev: tally.std_dev(),
            min: tally.min().unwrap_or(0.0),
            max: tally.max().unwrap_or(0.0),
            half_width: confidence_half_width(tally.count(), tally.std_dev()),
            replications: tally.count(),
        }
    }
}
