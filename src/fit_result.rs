//! Outcome of an optimisation and the optimiser capability itself.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{FitError, Result};
use crate::histogram::BinnedDistribution;
use crate::parameters::ParameterDict;
use crate::teststat::TestStatistic;

/// Anything that explores a [`TestStatistic`]'s parameter space.
pub trait Optimiser {
    fn optimise(&mut self, stat: &mut dyn TestStatistic) -> Result<FitResult>;
}

/// Best point found by an optimiser, plus the marginal distributions an
/// MCMC run collects on the way.
#[derive(Debug, Clone, Default)]
pub struct FitResult {
    /// Parameter values at the best point.
    pub best_fit: ParameterDict,

    /// Test statistic at `best_fit`.
    pub statistic: f64,

    /// False when no point could be evaluated.
    pub valid: bool,

    /// Number of test-statistic evaluations.
    pub n_evaluations: usize,

    /// Per-parameter projections of the kept samples.
    pub projections_1d: BTreeMap<String, BinnedDistribution>,

    /// Per-pair projections, keyed `(x, y)` in histogram-axis order.
    pub projections_2d: BTreeMap<(String, String), BinnedDistribution>,
}

impl FitResult {
    pub fn new(best_fit: ParameterDict, statistic: f64, valid: bool, n_evaluations: usize) -> Self {
        Self {
            best_fit,
            statistic,
            valid,
            n_evaluations,
            ..Default::default()
        }
    }

    pub fn with_projections(
        mut self,
        projections_1d: BTreeMap<String, BinnedDistribution>,
        projections_2d: BTreeMap<(String, String), BinnedDistribution>,
    ) -> Self {
        self.projections_1d = projections_1d;
        self.projections_2d = projections_2d;
        self
    }
}

impl fmt::Display for FitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Fit {} after {} evaluations, statistic = {:.6}",
            if self.valid { "valid" } else { "INVALID" },
            self.n_evaluations,
            self.statistic
        )?;
        for (name, value) in &self.best_fit {
            writeln!(f, "  {name:<24} {value:>14.6}")?;
        }
        Ok(())
    }
}

/// Box limits per parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterBounds {
    minima: ParameterDict,
    maxima: ParameterDict,
}

impl ParameterBounds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `[min, max]` for `name`, builder style.
    pub fn with(mut self, name: &str, min: f64, max: f64) -> Result<Self> {
        self.set(name, min, max)?;
        Ok(self)
    }

    pub fn set(&mut self, name: &str, min: f64, max: f64) -> Result<()> {
        if !(min < max) {
            return Err(FitError::Configuration(format!(
                "range of '{name}' is empty: [{min}, {max}]"
            )));
        }
        self.minima.insert(name.to_string(), min);
        self.maxima.insert(name.to_string(), max);
        Ok(())
    }

    pub fn min(&self, name: &str) -> Option<f64> {
        self.minima.get(name).copied()
    }

    pub fn max(&self, name: &str) -> Option<f64> {
        self.maxima.get(name).copied()
    }

    pub fn minima(&self) -> &ParameterDict {
        &self.minima
    }

    pub fn maxima(&self) -> &ParameterDict {
        &self.maxima
    }

    /// True when every bounded parameter of `params` lies in its range.
    pub fn contains(&self, params: &ParameterDict) -> bool {
        params.iter().all(|(name, &value)| {
            match (self.minima.get(name), self.maxima.get(name)) {
                (Some(&min), Some(&max)) => value >= min && value <= max,
                _ => true,
            }
        })
    }

    /// Fails unless every name in `names` has limits.
    pub fn check_covers(&self, names: &BTreeSet<String>) -> Result<()> {
        let missing: Vec<&String> = names
            .iter()
            .filter(|n| !self.minima.contains_key(*n))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(FitError::Configuration(format!(
                "no range given for parameters {missing:?}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_contain_and_cover() {
        let bounds = ParameterBounds::new()
            .with("a", 0.0, 1.0)
            .unwrap()
            .with("b", -1.0, 1.0)
            .unwrap();
        let inside: ParameterDict = [("a".to_string(), 0.5), ("b".to_string(), 1.0)]
            .into_iter()
            .collect();
        let outside: ParameterDict = [("a".to_string(), 1.5)].into_iter().collect();
        assert!(bounds.contains(&inside));
        assert!(!bounds.contains(&outside));

        let names: BTreeSet<String> = ["a", "c"].iter().map(|s| s.to_string()).collect();
        assert!(bounds.check_covers(&names).is_err());
        assert!(ParameterBounds::new().with("a", 1.0, 1.0).is_err());
    }

    #[test]
    fn display_lists_parameters() {
        let best: ParameterDict = [("signal_norm".to_string(), 2.0)].into_iter().collect();
        let text = FitResult::new(best, 12.5, true, 30).to_string();
        assert!(text.contains("signal_norm"));
        assert!(text.contains("30 evaluations"));
    }
}
