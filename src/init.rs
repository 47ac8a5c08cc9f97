//! Weight initialisation.
//!
//! The network asks a [`Sampler`] for one flat block of weights per target
//! layer and distributes it over the incoming edges itself. Keeping the
//! sampler behind a trait lets tests substitute fixed values.
//!
//! # Schemes
//!
//! | scheme   | uniform bound              | normal std                  |
//! |----------|----------------------------|-----------------------------|
//! | `He`     | `sqrt(6 / fan_in)`         | `sqrt(2 / fan_in)`          |
//! | `Xavier` | `sqrt(6 / (fan_in + fan_out))` | `sqrt(2 / (fan_in + fan_out))` |

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution as _, Normal};

use crate::error::{NetError, Result};

/// Variance scaling rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitScheme {
    /// For ReLU-style hidden layers.
    He,
    /// For the output layer and softmax layers.
    Xavier,
}

impl InitScheme {
    fn denominator(self, fan_in: usize, fan_out: usize) -> f64 {
        match self {
            Self::He => fan_in as f64,
            Self::Xavier => (fan_in + fan_out) as f64,
        }
    }

    /// Half-width of the uniform interval.
    #[must_use]
    pub fn uniform_bound(self, fan_in: usize, fan_out: usize) -> f64 {
        (6.0 / self.denominator(fan_in, fan_out)).sqrt()
    }

    /// Standard deviation of the zero-mean normal.
    #[must_use]
    pub fn std_dev(self, fan_in: usize, fan_out: usize) -> f64 {
        (2.0 / self.denominator(fan_in, fan_out)).sqrt()
    }
}

/// Shape of the sampled values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Distribution {
    #[default]
    Uniform,
    Normal,
}

/// Produces `fan_in * fan_out` initial weights.
pub trait Sampler {
    fn sample(
        &mut self,
        fan_in: usize,
        fan_out: usize,
        scheme: InitScheme,
        distribution: Distribution,
    ) -> Result<Vec<f64>>;
}

impl<F> Sampler for F
where
    F: FnMut(usize, usize, InitScheme, Distribution) -> Vec<f64>,
{
    fn sample(
        &mut self,
        fan_in: usize,
        fan_out: usize,
        scheme: InitScheme,
        distribution: Distribution,
    ) -> Result<Vec<f64>> {
        Ok(self(fan_in, fan_out, scheme, distribution))
    }
}

/// [`Sampler`] backed by a `rand` generator.
#[derive(Debug, Clone)]
pub struct RandomSampler<R = StdRng> {
    rng: R,
}

impl RandomSampler<StdRng> {
    /// Reproducible sampler.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    /// Sampler seeded from the operating system.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_os_rng())
    }
}

impl<R: Rng> RandomSampler<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> Sampler for RandomSampler<R> {
    fn sample(
        &mut self,
        fan_in: usize,
        fan_out: usize,
        scheme: InitScheme,
        distribution: Distribution,
    ) -> Result<Vec<f64>> {
        let count = fan_in * fan_out;
        if count == 0 {
            return Ok(Vec::new());
        }

        match distribution {
            Distribution::Uniform => {
                let bound = scheme.uniform_bound(fan_in, fan_out);
                Ok((0..count)
                    .map(|_| self.rng.random_range(-bound..=bound))
                    .collect())
            }
            Distribution::Normal => {
                let normal = Normal::new(0.0, scheme.std_dev(fan_in, fan_out)).map_err(|e| {
                    NetError::Sampler {
                        reason: e.to_string(),
                    }
                })?;
                Ok((0..count).map(|_| normal.sample(&mut self.rng)).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_samples_respect_the_he_bound() {
        let mut sampler = RandomSampler::seeded(7);
        let values = sampler
            .sample(6, 4, InitScheme::He, Distribution::Uniform)
            .unwrap();
        assert_eq!(values.len(), 24);
        assert!(values.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn xavier_is_narrower_than_he() {
        assert!(InitScheme::Xavier.uniform_bound(10, 10) < InitScheme::He.uniform_bound(10, 10));
        assert!((InitScheme::Xavier.std_dev(1, 1) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn seeded_samplers_repeat() {
        let a = RandomSampler::seeded(42)
            .sample(3, 3, InitScheme::Xavier, Distribution::Normal)
            .unwrap();
        let b = RandomSampler::seeded(42)
            .sample(3, 3, InitScheme::Xavier, Distribution::Normal)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn closures_are_samplers() {
        let mut fixed = |fan_in: usize, fan_out: usize, _: InitScheme, _: Distribution| {
            vec![0.5; fan_in * fan_out]
        };
        let values = fixed.sample(2, 3, InitScheme::He, Distribution::Uniform).unwrap();
        assert_eq!(values, vec![0.5; 6]);
    }
}
