//! Proposal generators for [`Mcmc`](super::Mcmc).

use rand::prelude::*;
use rand_distr::StandardNormal;

use crate::error::{FitError, Result};
use crate::parameters::ParameterDict;

/// Proposes the next point of a Markov chain.
pub trait McSampler: Send {
    /// Draws a candidate from q(x' | x).
    fn draw(&mut self, current: &ParameterDict) -> ParameterDict;

    /// `ln q(current | proposed) - ln q(proposed | current)`, added to the
    /// log acceptance ratio. Zero for symmetric proposals.
    fn correction(&self, _current: &ParameterDict, _proposed: &ParameterDict) -> f64 {
        0.0
    }

    /// Restarts the random stream from `seed`.
    fn reseed(&mut self, seed: u64);
}

/**
Random-walk Metropolis proposal: every parameter with a width gets an
independent Gaussian step, parameters without one stay where they are.

```rust
use binfit::mcmc::{McSampler, MetropolisSampler};
use binfit::parameters::ParameterDict;

let widths: ParameterDict = [("signal_norm".to_string(), 0.5)].into_iter().collect();
let mut sampler = MetropolisSampler::new(widths).unwrap().set_seed(42);

let current: ParameterDict = [
    ("signal_norm".to_string(), 10.0),
    ("shift".to_string(), 0.0),
]
.into_iter()
.collect();
let proposed = sampler.draw(&current);
assert_ne!(proposed["signal_norm"], 10.0);
assert_eq!(proposed["shift"], 0.0);
```
*/
#[derive(Debug, Clone)]
pub struct MetropolisSampler {
    sigmas: ParameterDict,
    seed: u64,
    rng: SmallRng,
}

impl MetropolisSampler {
    /// Creates a sampler with one step width per parameter.
    pub fn new(sigmas: ParameterDict) -> Result<Self> {
        if let Some((name, sigma)) = sigmas.iter().find(|(_, s)| !(**s > 0.0 && s.is_finite())) {
            return Err(FitError::Configuration(format!(
                "MetropolisSampler: width of '{name}' must be positive, got {sigma}"
            )));
        }
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            sigmas,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.reseed(seed);
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn sigmas(&self) -> &ParameterDict {
        &self.sigmas
    }
}

impl McSampler for MetropolisSampler {
    fn draw(&mut self, current: &ParameterDict) -> ParameterDict {
        current
            .iter()
            .map(|(name, &value)| {
                let step = match self.sigmas.get(name) {
                    Some(&sigma) => sigma * self.rng.sample::<f64, _>(StandardNormal),
                    None => 0.0,
                };
                (name.clone(), value + step)
            })
            .collect()
    }

    fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn point() -> ParameterDict {
        [("a".to_string(), 1.0)].into_iter().collect()
    }

    #[test]
    fn seeded_samplers_agree() {
        let sigmas: ParameterDict = [("a".to_string(), 2.0)].into_iter().collect();
        let mut s1 = MetropolisSampler::new(sigmas.clone()).unwrap().set_seed(7);
        let mut s2 = MetropolisSampler::new(sigmas).unwrap().set_seed(7);
        for _ in 0..10 {
            assert_eq!(s1.draw(&point()), s2.draw(&point()));
        }
        assert_eq!(s1.correction(&point(), &point()), 0.0);
    }

    #[test]
    fn step_width_matches_sigma() {
        let sigmas: ParameterDict = [("a".to_string(), 2.0)].into_iter().collect();
        let mut sampler = MetropolisSampler::new(sigmas).unwrap().set_seed(42);
        let n = 20_000;
        let steps: Vec<f64> = (0..n).map(|_| sampler.draw(&point())["a"] - 1.0).collect();
        let mean = steps.iter().sum::<f64>() / n as f64;
        let var = steps.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
        assert_abs_diff_eq!(mean, 0.0, epsilon = 0.1);
        assert_abs_diff_eq!(var.sqrt(), 2.0, epsilon = 0.1);
    }

    #[test]
    fn non_positive_width_rejected() {
        let sigmas: ParameterDict = [("a".to_string(), 0.0)].into_iter().collect();
        assert!(MetropolisSampler::new(sigmas).is_err());
    }
}
