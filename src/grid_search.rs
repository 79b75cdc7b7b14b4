//! Exhaustive scan of a regular grid, the simplest deterministic optimiser.

use crate::error::{FitError, Result};
use crate::fit_result::{FitResult, Optimiser, ParameterBounds};
use crate::parameters::ParameterDict;
use crate::teststat::TestStatistic;

/// Number of steps per parameter when no step size is given.
pub const DEFAULT_STEPS: usize = 10;

/**
Evaluates the test statistic at every point of a grid spanning the
parameter bounds and keeps the best one. Points where the evaluation fails
with a statistical error are skipped.

```rust
use binfit::fit_result::{Optimiser, ParameterBounds};
use binfit::grid_search::GridSearch;
use binfit::histogram::{AxisCollection, BinAxis, BinnedDistribution};
use binfit::templates::NormFittingStatus;
use binfit::teststat::BinnedNll;

let mut axes = AxisCollection::new();
axes.add_axis(BinAxis::new("energy", 0.0, 10.0, 10)).unwrap();
let mut signal = BinnedDistribution::new("signal", axes);
signal.set_contents(vec![10.0; 10]).unwrap();
let mut data = signal.clone();
data.scale(3.0);

let mut nll = BinnedNll::new();
nll.add_template(&signal, &[], NormFittingStatus::Direct).unwrap();
nll.set_data_dist(&data);

let bounds = ParameterBounds::new().with("signal_norm", 0.5, 5.0).unwrap();
let mut grid = GridSearch::new(bounds).set_step_size("signal_norm", 0.5);
let result = grid.optimise(&mut nll).unwrap();
assert!(result.valid);
assert!((result.best_fit["signal_norm"] - 3.0).abs() < 1e-9);
```
*/
#[derive(Debug, Clone)]
pub struct GridSearch {
    bounds: ParameterBounds,
    step_sizes: ParameterDict,
    maximising: bool,
}

impl GridSearch {
    pub fn new(bounds: ParameterBounds) -> Self {
        Self {
            bounds,
            step_sizes: ParameterDict::new(),
            maximising: false,
        }
    }

    pub fn set_step_size(mut self, name: &str, step: f64) -> Self {
        self.step_sizes.insert(name.to_string(), step);
        self
    }

    /// Look for the largest value instead of the smallest.
    pub fn set_maximising(mut self, maximising: bool) -> Self {
        self.maximising = maximising;
        self
    }

    /// Grid values of one parameter, always including the lower bound.
    fn axis_values(&self, name: &str) -> Result<Vec<f64>> {
        let (min, max) = match (self.bounds.min(name), self.bounds.max(name)) {
            (Some(min), Some(max)) => (min, max),
            _ => {
                return Err(FitError::Configuration(format!(
                    "GridSearch: no range for '{name}'"
                )))
            }
        };
        let step = self
            .step_sizes
            .get(name)
            .copied()
            .unwrap_or((max - min) / DEFAULT_STEPS as f64);
        if !(step > 0.0) {
            return Err(FitError::Configuration(format!(
                "GridSearch: step size of '{name}' must be positive, got {step}"
            )));
        }
        // tolerate rounding so that max itself is on the grid when it should be
        let n = ((max - min) / step + 1e-9).floor() as usize + 1;
        Ok((0..n).map(|k| min + k as f64 * step).collect())
    }

    fn is_better(&self, candidate: f64, best: f64) -> bool {
        if self.maximising {
            candidate > best
        } else {
            candidate < best
        }
    }
}

impl Optimiser for GridSearch {
    fn optimise(&mut self, stat: &mut dyn TestStatistic) -> Result<FitResult> {
        let names: Vec<String> = stat.parameter_names()?.into_iter().collect();
        let grids = names
            .iter()
            .map(|name| self.axis_values(name))
            .collect::<Result<Vec<_>>>()?;
        let total: usize = grids.iter().map(Vec::len).product();
        tracing::info!(n_parameters = names.len(), n_points = total, "grid search started");

        let mut counters = vec![0_usize; names.len()];
        let mut best: Option<(ParameterDict, f64)> = None;
        let mut n_evaluations = 0;
        let mut n_failed = 0;
        for _ in 0..total {
            let point: ParameterDict = names
                .iter()
                .zip(&grids)
                .zip(&counters)
                .map(|((name, grid), &k)| (name.clone(), grid[k]))
                .collect();

            n_evaluations += 1;
            match stat.evaluate_at(&point) {
                Ok(value) => {
                    if best.as_ref().map_or(true, |(_, b)| self.is_better(value, *b)) {
                        best = Some((point, value));
                    }
                }
                Err(e) if e.is_statistical() => {
                    n_failed += 1;
                    tracing::debug!(error = %e, "grid point skipped");
                }
                Err(e) => return Err(e),
            }

            // odometer increment, last parameter fastest
            for (counter, grid) in counters.iter_mut().zip(&grids).rev() {
                *counter += 1;
                if *counter < grid.len() {
                    break;
                }
                *counter = 0;
            }
        }

        if n_failed > 0 {
            tracing::warn!(n_failed, "grid points failed to evaluate");
        }
        match best {
            Some((best_fit, statistic)) => {
                stat.set_parameters(&best_fit)?;
                tracing::info!(statistic, n_evaluations, "grid search finished");
                Ok(FitResult::new(best_fit, statistic, true, n_evaluations))
            }
            None => Ok(FitResult::new(
                ParameterDict::new(),
                f64::NAN,
                false,
                n_evaluations,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    /// Paraboloid with a hole that fails statistically.
    struct Bowl {
        params: ParameterDict,
    }

    impl TestStatistic for Bowl {
        fn evaluate(&mut self) -> Result<f64> {
            let x = self.params["x"];
            let y = self.params["y"];
            if x == 1.0 && y == 2.0 {
                return Err(FitError::Statistical("hole".to_string()));
            }
            Ok((x - 1.0).powi(2) + (y - 2.5).powi(2))
        }

        fn register_fit_components(&mut self) -> Result<()> {
            Ok(())
        }

        fn set_parameters(&mut self, params: &ParameterDict) -> Result<()> {
            self.params.extend(params.clone());
            Ok(())
        }

        fn parameters(&self) -> Result<ParameterDict> {
            Ok(self.params.clone())
        }

        fn parameter_names(&self) -> Result<BTreeSet<String>> {
            Ok(self.params.keys().cloned().collect())
        }

        fn parameter_count(&self) -> Result<usize> {
            Ok(self.params.len())
        }
    }

    fn bowl() -> Bowl {
        Bowl {
            params: [("x".to_string(), 0.0), ("y".to_string(), 0.0)]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn finds_minimum_and_skips_failures() {
        let bounds = ParameterBounds::new()
            .with("x", -2.0, 2.0)
            .unwrap()
            .with("y", 0.0, 4.0)
            .unwrap();
        let mut grid = GridSearch::new(bounds)
            .set_step_size("x", 0.5)
            .set_step_size("y", 0.5);
        let mut stat = bowl();
        let result = grid.optimise(&mut stat).unwrap();

        assert!(result.valid);
        assert_eq!(result.n_evaluations, 9 * 9);
        assert_eq!(result.best_fit["x"], 1.0);
        assert_eq!(result.best_fit["y"], 2.5);
        assert_eq!(stat.parameters().unwrap()["y"], 2.5);
    }

    #[test]
    fn maximising_and_missing_range() {
        let bounds = ParameterBounds::new()
            .with("x", 0.0, 2.0)
            .unwrap()
            .with("y", 0.0, 1.0)
            .unwrap();
        let mut grid = GridSearch::new(bounds).set_maximising(true);
        let result = grid.optimise(&mut bowl()).unwrap();
        assert_eq!(result.best_fit["y"], 0.0);

        let partial = ParameterBounds::new().with("x", 0.0, 2.0).unwrap();
        assert!(GridSearch::new(partial).optimise(&mut bowl()).is_err());
    }
}
