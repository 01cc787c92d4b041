//! Random-variate sampling for durations and routing.
//!
//! Distributions are closed data: every variant carries its parameters and
//! samples by an explicit formula (inverse CDF where one exists, Box-Muller
//! for normals, Marsaglia-Tsang for gamma). The sampler owns named streams
//! derived from one master seed, so arrival, service, and routing draws
//! never interleave.
//!
//! A drawn duration that is NaN, infinite, or negative is an error, never
//! clamped. Feeding a floored sample to the statistics layer would bias
//! every downstream estimate.

use serde::{Deserialize, Serialize};

use crate::engine::rng::SimRng;
use crate::error::{SimError, SimResult};

/// Rejection-loop bound for gamma sampling.
const GAMMA_REJECTION_LIMIT: usize = 1024;

/// Stochastic duration distribution.
///
/// Parameters are in the unit attached by [`TimedDistribution`]; the
/// variants themselves are unitless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Distribution {
    /// Degenerate distribution: always `value`. Consumes no randomness.
    Constant {
        /// The fixed value.
        value: f64,
    },
    /// Exponential with the given mean (rate = 1/mean).
    Exponential {
        /// Mean of the distribution.
        mean: f64,
    },
    /// Normal (Gaussian). Negative draws are sampling errors for durations.
    Normal {
        /// Mean.
        mean: f64,
        /// Standard deviation.
        std_dev: f64,
    },
    /// Uniform on [min, max).
    Uniform {
        /// Inclusive lower bound.
        min: f64,
        /// Exclusive upper bound.
        max: f64,
    },
    /// Triangular with the given support and mode.
    Triangular {
        /// Lower bound.
        min: f64,
        /// Most likely value.
        mode: f64,
        /// Upper bound.
        max: f64,
    },
    /// Lognormal: `exp(N(mu, sigma))` where mu/sigma parameterize the
    /// underlying normal.
    Lognormal {
        /// Location of the underlying normal.
        mu: f64,
        /// Scale of the underlying normal.
        sigma: f64,
    },
    /// Gamma with shape/scale parameterization.
    Gamma {
        /// Shape parameter (k).
        shape: f64,
        /// Scale parameter (theta).
        scale: f64,
    },
    /// Weibull with shape/scale parameterization.
    Weibull {
        /// Shape parameter (k).
        shape: f64,
        /// Scale parameter (lambda).
        scale: f64,
    },
    /// Empirical distribution over observed values, sampled by inverse
    /// transform with linear interpolation between order statistics.
    Empirical {
        /// Observed values. Order does not matter; sampling sorts as needed.
        values: Vec<f64>,
    },
}

impl Distribution {
    /// Analytic mean of the distribution.
    #[must_use]
    pub fn mean(&self) -> f64 {
        match self {
            Self::Constant { value } => *value,
            Self::Exponential { mean } | Self::Normal { mean, .. } => *mean,
            Self::Uniform { min, max } => 0.5 * (min + max),
            Self::Triangular { min, mode, max } => (min + mode + max) / 3.0,
            Self::Lognormal { mu, sigma } => (mu + 0.5 * sigma * sigma).exp(),
            Self::Gamma { shape, scale } => shape * scale,
            Self::Weibull { shape, scale } => scale * ln_gamma(1.0 + 1.0 / shape).exp(),
            Self::Empirical { values } => {
                if values.is_empty() {
                    0.0
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                }
            }
        }
    }

    /// Analytic variance of the distribution.
    #[must_use]
    pub fn variance(&self) -> f64 {
        match self {
            Self::Constant { .. } => 0.0,
            Self::Exponential { mean } => mean * mean,
            Self::Normal { std_dev, .. } => std_dev * std_dev,
            Self::Uniform { min, max } => {
                let width = max - min;
                width * width / 12.0
            }
            Self::Triangular { min, mode, max } => {
                (min * min + mode * mode + max * max - min * mode - min * max - mode * max) / 18.0
            }
            Self::Lognormal { mu, sigma } => {
                let s2 = sigma * sigma;
                (s2.exp() - 1.0) * (2.0 * mu + s2).exp()
            }
            Self::Gamma { shape, scale } => shape * scale * scale,
            Self::Weibull { shape, scale } => {
                let g1 = ln_gamma(1.0 + 1.0 / shape).exp();
                let g2 = ln_gamma(1.0 + 2.0 / shape).exp();
                scale * scale * (g2 - g1 * g1)
            }
            Self::Empirical { values } => sample_variance(values),
        }
    }

    /// Coefficient of variation (std dev over mean).
    ///
    /// Zero-mean distributions report zero rather than dividing by zero.
    #[must_use]
    pub fn cv(&self) -> f64 {
        let mean = self.mean();
        if mean.abs() < f64::EPSILON {
            0.0
        } else {
            self.variance().sqrt() / mean
        }
    }

    /// Check parameter validity.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Config` naming the offending parameter.
    pub fn validate_parameters(&self) -> SimResult<()> {
        let fail = |message: String| Err(SimError::config(message));
        match self {
            Self::Constant { value } => {
                if !value.is_finite() || *value < 0.0 {
                    return fail(format!("constant value must be finite and >= 0, got {value}"));
                }
            }
            Self::Exponential { mean } => {
                if !mean.is_finite() || *mean <= 0.0 {
                    return fail(format!("exponential mean must be positive, got {mean}"));
                }
            }
            Self::Normal { mean, std_dev } => {
                if !mean.is_finite() || !std_dev.is_finite() || *std_dev < 0.0 {
                    return fail(format!(
                        "normal parameters must be finite with std_dev >= 0, got mean {mean}, std_dev {std_dev}"
                    ));
                }
            }
            Self::Uniform { min, max } => {
                if !min.is_finite() || !max.is_finite() || min > max {
                    return fail(format!("uniform bounds must satisfy min <= max, got [{min}, {max}]"));
                }
            }
            Self::Triangular { min, mode, max } => {
                if !min.is_finite() || !mode.is_finite() || !max.is_finite() || min > mode || mode > max || min >= max {
                    return fail(format!(
                        "triangular parameters must satisfy min <= mode <= max with min < max, got [{min}, {mode}, {max}]"
                    ));
                }
            }
            Self::Lognormal { mu, sigma } => {
                if !mu.is_finite() || !sigma.is_finite() || *sigma < 0.0 {
                    return fail(format!(
                        "lognormal parameters must be finite with sigma >= 0, got mu {mu}, sigma {sigma}"
                    ));
                }
            }
            Self::Gamma { shape, scale } => {
                if !shape.is_finite() || !scale.is_finite() || *shape <= 0.0 || *scale <= 0.0 {
                    return fail(format!(
                        "gamma shape and scale must be positive, got shape {shape}, scale {scale}"
                    ));
                }
            }
            Self::Weibull { shape, scale } => {
                if !shape.is_finite() || !scale.is_finite() || *shape <= 0.0 || *scale <= 0.0 {
                    return fail(format!(
                        "weibull shape and scale must be positive, got shape {shape}, scale {scale}"
                    ));
                }
            }
            Self::Empirical { values } => {
                if values.is_empty() {
                    return fail("empirical distribution needs at least one value".to_string());
                }
                if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
                    return fail(format!("empirical values must be finite and >= 0, got {bad}"));
                }
            }
        }
        Ok(())
    }

    /// Sort empirical values in place so sampling never re-sorts.
    pub fn normalize(&mut self) {
        if let Self::Empirical { values } = self {
            values.sort_by(f64::total_cmp);
        }
    }
}

/// Time unit attached to a duration distribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeUnit {
    /// Seconds.
    Seconds,
    /// Minutes (the engine's internal unit).
    #[default]
    Minutes,
    /// Hours.
    Hours,
}

impl TimeUnit {
    /// Conversion factor from this unit to minutes.
    #[must_use]
    pub const fn minutes_factor(self) -> f64 {
        match self {
            Self::Seconds => 1.0 / 60.0,
            Self::Minutes => 1.0,
            Self::Hours => 60.0,
        }
    }
}

/// A distribution together with the unit its parameters are expressed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedDistribution {
    /// The distribution shape.
    #[serde(flatten)]
    pub distribution: Distribution,
    /// Unit of the distribution's parameters. Defaults to minutes.
    #[serde(default)]
    pub unit: TimeUnit,
}

impl TimedDistribution {
    /// Attach minutes to a distribution.
    #[must_use]
    pub const fn minutes(distribution: Distribution) -> Self {
        Self {
            distribution,
            unit: TimeUnit::Minutes,
        }
    }

    /// Attach seconds to a distribution.
    #[must_use]
    pub const fn seconds(distribution: Distribution) -> Self {
        Self {
            distribution,
            unit: TimeUnit::Seconds,
        }
    }

    /// Attach hours to a distribution.
    #[must_use]
    pub const fn hours(distribution: Distribution) -> Self {
        Self {
            distribution,
            unit: TimeUnit::Hours,
        }
    }

    /// Constant duration in minutes.
    #[must_use]
    pub const fn constant_minutes(value: f64) -> Self {
        Self::minutes(Distribution::Constant { value })
    }

    /// Exponential duration with the given mean in minutes.
    #[must_use]
    pub const fn exponential_minutes(mean: f64) -> Self {
        Self::minutes(Distribution::Exponential { mean })
    }

    /// Mean duration in minutes.
    #[must_use]
    pub fn mean_minutes(&self) -> f64 {
        self.distribution.mean() * self.unit.minutes_factor()
    }

    /// Coefficient of variation (unit-independent).
    #[must_use]
    pub fn cv(&self) -> f64 {
        self.distribution.cv()
    }

    /// Check parameter validity.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Config` naming the offending parameter.
    pub fn validate_parameters(&self) -> SimResult<()> {
        self.distribution.validate_parameters()
    }
}

/// Variate sampler with named streams.
///
/// Streams are lazily assigned monotonically increasing indices in first-use
/// order and derive their seeds from the master seed, so two models that
/// touch streams in the same order draw identical sequences.
///
/// # Example
///
/// ```rust
/// use flowsim::engine::sampler::{Distribution, VariateSampler};
///
/// let mut sampler = VariateSampler::new(42);
/// let d = Distribution::Exponential { mean: 2.0 };
/// let v = sampler.sample("service", &d)?;
/// assert!(v >= 0.0);
/// # Ok::<(), flowsim::SimError>(())
/// ```
#[derive(Debug, Clone)]
pub struct VariateSampler {
    /// Master seed streams derive from.
    master_seed: u64,
    /// Named streams in assignment order.
    streams: Vec<(String, SimRng)>,
}

impl VariateSampler {
    /// Create a sampler with no streams assigned yet.
    #[must_use]
    pub const fn new(master_seed: u64) -> Self {
        Self {
            master_seed,
            streams: Vec::new(),
        }
    }

    /// Get the master seed.
    #[must_use]
    pub const fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Number of streams assigned so far.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Get or lazily create the generator for a named stream.
    pub fn stream_mut(&mut self, name: &str) -> &mut SimRng {
        let pos = match self.streams.iter().position(|(n, _)| n == name) {
            Some(pos) => pos,
            None => {
                let index = self.streams.len() as u64;
                self.streams
                    .push((name.to_string(), SimRng::derive(self.master_seed, index)));
                self.streams.len() - 1
            }
        };
        &mut self.streams[pos].1
    }

    /// Draw one value from a distribution on a named stream.
    ///
    /// # Errors
    ///
    /// Returns `SimError::NumericSample` if the draw is NaN, infinite, or
    /// negative. The value is reported, not repaired.
    pub fn sample(&mut self, stream: &str, distribution: &Distribution) -> SimResult<f64> {
        let rng = self.stream_mut(stream);
        let drawn = match distribution {
            Distribution::Constant { value } => Some(*value),
            Distribution::Exponential { mean } => {
                let u = rng.gen_f64();
                Some(-(1.0 - u).ln() * mean)
            }
            Distribution::Normal { mean, std_dev } => Some(rng.gen_normal(*mean, *std_dev)),
            Distribution::Uniform { min, max } => Some(rng.gen_range_f64(*min, *max)),
            Distribution::Triangular { min, mode, max } => {
                Some(sample_triangular(rng, *min, *mode, *max))
            }
            Distribution::Lognormal { mu, sigma } => Some(rng.gen_normal(*mu, *sigma).exp()),
            Distribution::Gamma { shape, scale } => sample_gamma(rng, *shape, *scale),
            Distribution::Weibull { shape, scale } => {
                let u = rng.gen_f64();
                Some(scale * (-(1.0 - u).ln()).powf(1.0 / shape))
            }
            Distribution::Empirical { values } => sample_empirical(rng, values),
        };

        match drawn {
            Some(v) if v.is_finite() && v >= 0.0 => Ok(v),
            Some(v) => Err(SimError::numeric_sample(
                stream,
                format!("{distribution:?}"),
                v,
            )),
            None => Err(SimError::numeric_sample(
                stream,
                format!("{distribution:?}"),
                f64::NAN,
            )),
        }
    }

    /// Draw one duration in minutes, applying the distribution's unit.
    ///
    /// # Errors
    ///
    /// Returns `SimError::NumericSample` for unusable draws.
    pub fn sample_duration(&mut self, stream: &str, duration: &TimedDistribution) -> SimResult<f64> {
        let raw = self.sample(stream, &duration.distribution)?;
        Ok(raw * duration.unit.minutes_factor())
    }
}

/// Two-branch inverse CDF for the triangular distribution.
fn sample_triangular(rng: &mut SimRng, min: f64, mode: f64, max: f64) -> f64 {
    let u = rng.gen_f64();
    let cut = (mode - min) / (max - min);
    if u < cut {
        min + (u * (max - min) * (mode - min)).sqrt()
    } else {
        max - ((1.0 - u) * (max - min) * (max - mode)).sqrt()
    }
}

/// Marsaglia-Tsang gamma sampling.
///
/// Shape < 1 uses the boost `gamma(shape + 1) * U^(1/shape)`. The rejection
/// loop is bounded; exhaustion surfaces as a sampling error upstream.
fn sample_gamma(rng: &mut SimRng, shape: f64, scale: f64) -> Option<f64> {
    if shape < 1.0 {
        let boost = rng.gen_f64().powf(1.0 / shape);
        return sample_gamma(rng, shape + 1.0, scale).map(|g| g * boost);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    for _ in 0..GAMMA_REJECTION_LIMIT {
        let x = rng.gen_standard_normal();
        let v = (1.0 + c * x).powi(3);
        if v <= 0.0 {
            continue;
        }
        let u = rng.gen_f64();
        if u < 1.0 - 0.0331 * x.powi(4) {
            return Some(d * v * scale);
        }
        if u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
            return Some(d * v * scale);
        }
    }
    None
}

/// Inverse transform over the empirical CDF with linear interpolation.
///
/// An empty value set has no CDF to invert; the miss surfaces as a
/// sampling error upstream.
fn sample_empirical(rng: &mut SimRng, values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let u = rng.gen_f64();
    if is_non_decreasing(values) {
        Some(interpolate_sorted(values, u))
    } else {
        let mut scratch = values.to_vec();
        scratch.sort_by(f64::total_cmp);
        Some(interpolate_sorted(&scratch, u))
    }
}

fn is_non_decreasing(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] <= w[1])
}

fn interpolate_sorted(sorted: &[f64], u: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let position = u * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let fraction = position - lower as f64;
    sorted[lower] + fraction * (sorted[upper] - sorted[lower])
}

/// Natural log of the gamma function (Lanczos approximation, g = 7).
///
/// Used for Weibull moments; accurate to ~15 significant digits on the
/// positive reals.
#[must_use]
pub fn ln_gamma(x: f64) -> f64 {
    const LANCZOS: [f64; 8] = [
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let mut acc = 0.999_999_999_999_809_9;
    for (i, &c) in LANCZOS.iter().enumerate() {
        acc += c / (x + (i as f64) + 1.0);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}
