//! Deterministic random number generation.
//!
//! Implements PCG (Permuted Congruential Generator) with derived seeds for
//! reproducible replication runs.
//!
//! # Reproducibility Guarantee
//!
//! Given the same master seed, all random number sequences will be
//! bitwise-identical across:
//! - Different runs
//! - Different platforms
//! - Different thread counts (replications own derived streams)

use rand::prelude::*;
use rand_pcg::Pcg64;

/// Golden-ratio increment for stream seed derivation.
const STREAM_MULTIPLIER: u64 = 0x9E37_79B9_7F4A_7C15;

/// Deterministic, reproducible random number generator.
///
/// Based on PCG (Permuted Congruential Generator) which provides:
/// - Excellent statistical properties
/// - Fast generation
/// - Predictable sequences from seed
/// - Independent streams via seed derivation
#[derive(Debug, Clone)]
pub struct SimRng {
    /// Master seed for reproducibility.
    master_seed: u64,
    /// Stream index this generator was derived for.
    stream: u64,
    /// Internal PCG state.
    rng: Pcg64,
}

impl SimRng {
    /// Create a new RNG with the given master seed (stream 0).
    #[must_use]
    pub fn new(master_seed: u64) -> Self {
        Self::derive(master_seed, 0)
    }

    /// Derive an independent generator for a stream index.
    ///
    /// Stream seeds are spaced by a golden-ratio multiple of the index so
    /// that consecutive streams never share PCG state.
    ///
    /// # Example
    ///
    /// ```rust
    /// use flowsim::engine::rng::SimRng;
    ///
    /// let arrivals = SimRng::derive(42, 0);
    /// let service = SimRng::derive(42, 1);
    /// assert_eq!(arrivals.master_seed(), service.master_seed());
    /// assert_ne!(arrivals.stream(), service.stream());
    /// ```
    #[must_use]
    pub fn derive(master_seed: u64, stream: u64) -> Self {
        let seed = master_seed.wrapping_add(stream.wrapping_mul(STREAM_MULTIPLIER));
        Self {
            master_seed,
            stream,
            rng: Pcg64::seed_from_u64(seed),
        }
    }

    /// Get the master seed.
    #[must_use]
    pub const fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Get the stream index.
    #[must_use]
    pub const fn stream(&self) -> u64 {
        self.stream
    }

    /// Generate a random f64 in [0, 1).
    pub fn gen_f64(&mut self) -> f64 {
        self.rng.gen()
    }

    /// Generate a random f64 in the given range.
    ///
    /// # Panics
    ///
    /// Panics if `min > max`.
    pub fn gen_range_f64(&mut self, min: f64, max: f64) -> f64 {
        assert!(min <= max, "Invalid range: min > max");
        min + (max - min) * self.gen_f64()
    }

    /// Generate a random u64.
    pub fn gen_u64(&mut self) -> u64 {
        self.rng.gen()
    }

    /// Generate a standard normal sample using Box-Muller transform.
    pub fn gen_standard_normal(&mut self) -> f64 {
        // Box-Muller transform
        let u1 = self.gen_f64();
        let u2 = self.gen_f64();

        // Avoid log(0)
        let u1 = if u1 < f64::EPSILON { f64::EPSILON } else { u1 };

        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    /// Generate a normal sample with given mean and std.
    pub fn gen_normal(&mut self, mean: f64, std: f64) -> f64 {
        mean + std * self.gen_standard_normal()
    }
}

/// Derive the master seed for one replication.
///
/// Uses the `SplitMix64` finalizer over a golden-ratio offset so that
/// replication seeds stay uncorrelated with the per-stream derivation
/// applied inside each replication.
#[must_use]
pub fn derive_replication_seed(base_seed: u64, replication: u64) -> u64 {
    let mut z = base_seed.wrapping_add(replication.wrapping_mul(STREAM_MULTIPLIER));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Property: Same seed produces same sequence.
    #[test]
    fn test_reproducibility() {
        let mut rng1 = SimRng::new(42);
        let mut rng2 = SimRng::new(42);

        let seq1: Vec<f64> = (0..100).map(|_| rng1.gen_f64()).collect();
        let seq2: Vec<f64> = (0..100).map(|_| rng2.gen_f64()).collect();

        assert_eq!(seq1, seq2, "Same seed must produce identical sequences");
    }

    /// Property: Different seeds produce different sequences.
    #[test]
    fn test_different_seeds() {
        let mut rng1 = SimRng::new(42);
        let mut rng2 = SimRng::new(43);

        let seq1: Vec<f64> = (0..100).map(|_| rng1.gen_f64()).collect();
        let seq2: Vec<f64> = (0..100).map(|_| rng2.gen_f64()).collect();

        assert_ne!(
            seq1, seq2,
            "Different seeds must produce different sequences"
        );
    }

    /// Property: Derived streams are independent.
    #[test]
    fn test_stream_independence() {
        let mut streams: Vec<SimRng> = (0..4).map(|i| SimRng::derive(42, i)).collect();

        let seqs: Vec<Vec<f64>> = streams
            .iter_mut()
            .map(|s| (0..10).map(|_| s.gen_f64()).collect())
            .collect();

        for i in 0..seqs.len() {
            for j in (i + 1)..seqs.len() {
                assert_ne!(seqs[i], seqs[j], "Streams must be independent");
            }
        }
    }

    /// Property: Derived streams are reproducible.
    #[test]
    fn test_stream_reproducibility() {
        for stream in 0..4 {
            let mut a = SimRng::derive(42, stream);
            let mut b = SimRng::derive(42, stream);

            let seq1: Vec<f64> = (0..10).map(|_| a.gen_f64()).collect();
            let seq2: Vec<f64> = (0..10).map(|_| b.gen_f64()).collect();
            assert_eq!(seq1, seq2, "Stream sequences must be reproducible");
        }
    }

    /// Property: Range sampling stays in bounds.
    #[test]
    fn test_range_bounds() {
        let mut rng = SimRng::new(42);

        for _ in 0..1000 {
            let v = rng.gen_range_f64(-10.0, 10.0);
            assert!((-10.0..10.0).contains(&v), "Value out of range: {v}");
        }
    }

    /// Property: Normal distribution has correct moments.
    #[test]
    fn test_normal_distribution() {
        let mut rng = SimRng::new(42);
        let n = 10000;
        let samples: Vec<f64> = (0..n).map(|_| rng.gen_standard_normal()).collect();

        let mean: f64 = samples.iter().sum::<f64>() / n as f64;
        let variance: f64 = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;

        // Mean should be close to 0
        assert!(mean.abs() < 0.1, "Mean {mean} too far from 0");
        // Variance should be close to 1
        assert!(
            (variance - 1.0).abs() < 0.1,
            "Variance {variance} too far from 1"
        );
    }

    #[test]
    fn test_gen_u64() {
        let mut rng = SimRng::new(42);
        let v1 = rng.gen_u64();
        let v2 = rng.gen_u64();
        // Should generate different values
        assert_ne!(v1, v2);
    }

    #[test]
    fn test_sim_rng_clone() {
        let rng = SimRng::new(42);
        let cloned = rng.clone();
        assert_eq!(cloned.master_seed(), rng.master_seed());
    }

    #[test]
    fn test_sim_rng_debug() {
        let rng = SimRng::new(42);
        let debug = format!("{:?}", rng);
        assert!(debug.contains("SimRng"));
    }

    /// Mutation test: gen_normal must add mean correctly (catches + -> - mutation)
    #[test]
    fn test_gen_normal_mean_is_added() {
        let mut rng = SimRng::new(42);
        // Generate many samples with mean=100, std=0
        // If std=0, result must equal mean exactly
        for _ in 0..10 {
            let v = rng.gen_normal(100.0, 0.0);
            assert!(
                (v - 100.0).abs() < 1e-10,
                "gen_normal with std=0 must return mean exactly, got {v}"
            );
        }
    }

    /// Mutation test: gen_normal must multiply std correctly (catches * -> + mutation)
    #[test]
    fn test_gen_normal_std_is_multiplied() {
        let mut rng = SimRng::new(42);
        // With mean=0, std=10, variance should be 100
        let samples: Vec<f64> = (0..10000).map(|_| rng.gen_normal(0.0, 10.0)).collect();
        let mean: f64 = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance: f64 =
            samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / samples.len() as f64;
        // Variance should be close to 100 (std^2)
        assert!(
            (variance - 100.0).abs() < 15.0,
            "Variance {variance} not close to 100"
        );
    }

    /// Mutation test: derive must mix the stream index (catches wrapping_mul -> wrapping_add)
    #[test]
    fn test_derive_spacing() {
        // Adjacent streams must not collapse onto adjacent raw seeds
        let mut low = SimRng::derive(0, 1);
        let mut raw = SimRng::new(1);
        let a: Vec<u64> = (0..8).map(|_| low.gen_u64()).collect();
        let b: Vec<u64> = (0..8).map(|_| raw.gen_u64()).collect();
        assert_ne!(a, b, "Stream derivation must not reduce to seed + stream");
    }

    /// Mutation test: gen_standard_normal must handle near-zero u1 (catches < -> == mutation)
    #[test]
    fn test_standard_normal_epsilon_guard() {
        // The guard `if u1 < f64::EPSILON` protects against log(0)
        // If changed to ==, values just above 0 but < EPSILON would cause -Inf
        // We test by checking that no -Inf values appear
        let mut rng = SimRng::new(12345);
        for _ in 0..50000 {
            let v = rng.gen_standard_normal();
            assert!(
                v.is_finite(),
                "gen_standard_normal produced non-finite value: {v}"
            );
        }
    }

    /// Mutation test: Box-Muller 2*PI*u2 formula (catches second * -> / mutation)
    #[test]
    fn test_standard_normal_angle_formula() {
        // Box-Muller: cos(2 * PI * u2) where u2 is uniform [0,1)
        // If the second * were /, we'd get cos(2*PI/u2) which diverges as u2->0
        // This would produce extreme outliers. We verify statistical properties.
        let mut rng = SimRng::new(999);
        let samples: Vec<f64> = (0..50000).map(|_| rng.gen_standard_normal()).collect();

        // Calculate kurtosis - should be close to 3 for normal
        let mean: f64 = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance: f64 =
            samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / samples.len() as f64;
        let fourth_moment: f64 =
            samples.iter().map(|x| (x - mean).powi(4)).sum::<f64>() / samples.len() as f64;
        let kurtosis = fourth_moment / (variance * variance);

        // Normal distribution has kurtosis = 3. Allow some tolerance.
        // If * -> / mutation, kurtosis would be much higher due to outliers
        assert!(
            (kurtosis - 3.0).abs() < 0.5,
            "Kurtosis {kurtosis} far from expected 3.0, suggesting formula error"
        );
    }

    /// Mutation test: replication seeds must differ across indices (catches finalizer removal)
    #[test]
    fn test_replication_seed_distinct() {
        let seeds: Vec<u64> = (0..64).map(|r| derive_replication_seed(42, r)).collect();
        let unique: std::collections::HashSet<u64> = seeds.iter().copied().collect();
        assert_eq!(unique.len(), seeds.len(), "Replication seeds must be distinct");
    }

    /// Replication seed derivation must not alias the stream derivation.
    ///
    /// A linear derivation would make (replication 2, stream 1) collide with
    /// (replication 1, stream 2); the finalizer breaks the linearity.
    #[test]
    fn test_replication_seed_no_stream_alias() {
        let rep2 = derive_replication_seed(42, 2).wrapping_add(STREAM_MULTIPLIER);
        let rep1 = derive_replication_seed(42, 1).wrapping_add(2u64.wrapping_mul(STREAM_MULTIPLIER));
        assert_ne!(rep2, rep1, "Replication and stream offsets must not commute");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Falsification test: reproducibility holds for any seed.
        #[test]
        fn prop_reproducibility(seed in 0u64..u64::MAX) {
            let mut rng1 = SimRng::new(seed);
            let mut rng2 = SimRng::new(seed);

            let seq1: Vec<f64> = (0..100).map(|_| rng1.gen_f64()).collect();
            let seq2: Vec<f64> = (0..100).map(|_| rng2.gen_f64()).collect();

            prop_assert_eq!(seq1, seq2);
        }

        /// Falsification test: values in [0, 1) for any seed.
        #[test]
        fn prop_unit_interval(seed in 0u64..u64::MAX) {
            let mut rng = SimRng::new(seed);

            for _ in 0..100 {
                let v = rng.gen_f64();
                prop_assert!(v >= 0.0 && v < 1.0, "Value {} not in [0, 1)", v);
            }
        }

        /// Falsification test: replication seed derivation is deterministic.
        #[test]
        fn prop_replication_seed_deterministic(base in 0u64..u64::MAX, rep in 0u64..100_000) {
            prop_assert_eq!(
                derive_replication_seed(base, rep),
                derive_replication_seed(base, rep)
            );
        }
    }
}
