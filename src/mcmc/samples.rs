use std::collections::BTreeMap;

use ndarray::Array2;

use super::autocorrelation::AutoCorrelationCalc;
use crate::error::{FitError, Result};
use crate::histogram::{AxisCollection, BinnedDistribution};
use crate::parameters::ParameterDict;

/// One entry of the full chain record.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStep {
    /// 1-based iteration index.
    pub step: usize,
    /// Parameter values in [`McmcSamples::parameter_names`] order.
    pub parameters: Vec<f64>,
    /// Test statistic at `parameters`.
    pub value: f64,
    pub accepted: bool,
}

/**
Chain state and the statistics collected from it.

Every iteration is passed to [`McmcSamples::fill`]. Iteration `k` (counted
from 1) is kept when `k > burn_in` and `(k - burn_in) % thin_factor == 0`;
kept iterations feed the projections, the raw sample matrix and the
autocorrelation of the test statistic. Burn-in and thinned-out iterations
still count towards the acceptance bookkeeping and the chain record.
*/
#[derive(Debug, Clone)]
pub struct McmcSamples {
    parameter_names: Vec<String>,
    axes: AxisCollection,
    burn_in: usize,
    thin_factor: usize,
    accepted_steps: usize,
    total_steps: usize,
    projections_1d: BTreeMap<String, BinnedDistribution>,
    projections_2d: BTreeMap<(String, String), BinnedDistribution>,
    full_histogram: Option<BinnedDistribution>,
    raw_samples: Vec<f64>,
    chain: Option<Vec<ChainStep>>,
    autocorrelator: AutoCorrelationCalc,
}

impl McmcSamples {
    /// `axes` name the parameters that are histogrammed; every axis name must
    /// be one of `parameter_names`.
    pub fn new(
        parameter_names: Vec<String>,
        axes: AxisCollection,
        burn_in: usize,
        thin_factor: usize,
        autocorrelation_window: usize,
    ) -> Result<Self> {
        if thin_factor == 0 {
            return Err(FitError::Configuration(
                "McmcSamples: thin factor must be at least 1".to_string(),
            ));
        }
        if let Some(unknown) = axes
            .names()
            .into_iter()
            .find(|n| !parameter_names.contains(n))
        {
            return Err(FitError::Configuration(format!(
                "McmcSamples: histogram axis '{unknown}' is not a fit parameter ({parameter_names:?})"
            )));
        }

        let mut projections_1d = BTreeMap::new();
        let mut projections_2d = BTreeMap::new();
        for (i, x) in axes.axes().iter().enumerate() {
            let mut one = AxisCollection::new();
            one.add_axis(x.clone())?;
            projections_1d.insert(x.name().to_string(), BinnedDistribution::new(x.name(), one));
            for y in &axes.axes()[i + 1..] {
                let mut two = AxisCollection::new();
                two.add_axis(x.clone())?;
                two.add_axis(y.clone())?;
                let name = format!("{}:{}", x.name(), y.name());
                projections_2d.insert(
                    (x.name().to_string(), y.name().to_string()),
                    BinnedDistribution::new(&name, two),
                );
            }
        }

        Ok(Self {
            parameter_names,
            axes,
            burn_in,
            thin_factor,
            accepted_steps: 0,
            total_steps: 0,
            projections_1d,
            projections_2d,
            full_histogram: None,
            raw_samples: Vec::new(),
            chain: None,
            autocorrelator: AutoCorrelationCalc::new(autocorrelation_window),
        })
    }

    /// Also fill the joint histogram over every axis.
    pub fn set_save_full_histogram(mut self, save: bool) -> Self {
        self.full_histogram = save.then(|| BinnedDistribution::new("posterior", self.axes.clone()));
        self
    }

    /// Record every iteration, kept or not.
    pub fn set_save_chain(mut self, save: bool) -> Self {
        self.chain = save.then(Vec::new);
        self
    }

    /// Records one iteration: the chain's current point after the
    /// accept/reject decision and its test statistic.
    pub fn fill(&mut self, params: &ParameterDict, value: f64, accepted: bool) -> Result<()> {
        self.total_steps += 1;
        if accepted {
            self.accepted_steps += 1;
        }

        let kept = self.total_steps > self.burn_in
            && (self.total_steps - self.burn_in) % self.thin_factor == 0;
        if self.chain.is_none() && !kept {
            return Ok(());
        }

        let row = self
            .parameter_names
            .iter()
            .map(|name| {
                params.get(name).copied().ok_or_else(|| {
                    FitError::Parameter(format!("McmcSamples: step has no value for '{name}'"))
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        if let Some(chain) = self.chain.as_mut() {
            chain.push(ChainStep {
                step: self.total_steps,
                parameters: row.clone(),
                value,
                accepted,
            });
        }
        if !kept {
            return Ok(());
        }

        let lookup = |name: &str| params.get(name).copied().unwrap_or(f64::NAN);
        for (name, hist) in self.projections_1d.iter_mut() {
            hist.fill(&[lookup(name.as_str())], 1.0)?;
        }
        for ((x, y), hist) in self.projections_2d.iter_mut() {
            hist.fill(&[lookup(x.as_str()), lookup(y.as_str())], 1.0)?;
        }
        if let Some(hist) = self.full_histogram.as_mut() {
            let point: Vec<f64> = self.axes.names().iter().map(|n| lookup(n.as_str())).collect();
            hist.fill(&point, 1.0)?;
        }
        self.raw_samples.extend_from_slice(&row);
        self.autocorrelator.fill(value);
        Ok(())
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    pub fn histogram_axes(&self) -> &AxisCollection {
        &self.axes
    }

    pub fn burn_in(&self) -> usize {
        self.burn_in
    }

    pub fn thin_factor(&self) -> usize {
        self.thin_factor
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn accepted_steps(&self) -> usize {
        self.accepted_steps
    }

    pub fn kept_samples(&self) -> usize {
        if self.parameter_names.is_empty() {
            self.autocorrelator.len()
        } else {
            self.raw_samples.len() / self.parameter_names.len()
        }
    }

    pub fn acceptance_rate(&self) -> f64 {
        if self.total_steps == 0 {
            0.0
        } else {
            self.accepted_steps as f64 / self.total_steps as f64
        }
    }

    pub fn rejection_rate(&self) -> f64 {
        if self.total_steps == 0 {
            0.0
        } else {
            1.0 - self.acceptance_rate()
        }
    }

    pub fn projections_1d(&self) -> &BTreeMap<String, BinnedDistribution> {
        &self.projections_1d
    }

    pub fn projections_2d(&self) -> &BTreeMap<(String, String), BinnedDistribution> {
        &self.projections_2d
    }

    pub fn full_histogram(&self) -> Option<&BinnedDistribution> {
        self.full_histogram.as_ref()
    }

    /// Kept samples, one row per sample, columns in parameter-name order.
    pub fn raw_samples(&self) -> Result<Array2<f64>> {
        Array2::from_shape_vec(
            (self.kept_samples(), self.parameter_names.len()),
            self.raw_samples.clone(),
        )
        .map_err(|e| FitError::Logic(format!("McmcSamples: raw sample buffer is malformed: {e}")))
    }

    pub fn chain(&self) -> Option<&[ChainStep]> {
        self.chain.as_deref()
    }

    pub fn autocorrelator(&self) -> &AutoCorrelationCalc {
        &self.autocorrelator
    }

    /// Autocorrelation of the kept test-statistic values, lag 0 first.
    pub fn autocorrelations(&self) -> Vec<f64> {
        self.autocorrelator.get()
    }

    /// Forgets every iteration, keeping the configuration.
    pub fn clear(&mut self) {
        self.accepted_steps = 0;
        self.total_steps = 0;
        self.projections_1d.values_mut().for_each(BinnedDistribution::empty);
        self.projections_2d.values_mut().for_each(BinnedDistribution::empty);
        if let Some(hist) = self.full_histogram.as_mut() {
            hist.empty();
        }
        self.raw_samples.clear();
        if let Some(chain) = self.chain.as_mut() {
            chain.clear();
        }
        self.autocorrelator.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::BinAxis;
    use approx::assert_abs_diff_eq;

    fn samples(burn_in: usize, thin: usize) -> McmcSamples {
        let mut axes = AxisCollection::new();
        axes.add_axis(BinAxis::new("a", 0.0, 10.0, 10)).unwrap();
        axes.add_axis(BinAxis::new("b", 0.0, 10.0, 5)).unwrap();
        McmcSamples::new(vec!["a".to_string(), "b".to_string()], axes, burn_in, thin, 100)
            .unwrap()
    }

    fn point(a: f64, b: f64) -> ParameterDict {
        [("a".to_string(), a), ("b".to_string(), b)]
            .into_iter()
            .collect()
    }

    #[test]
    fn kept_count_follows_burn_in_and_thinning() {
        for (n, burn_in, thin, expected) in [(100, 10, 3, 30), (100, 10, 1, 90), (5, 10, 2, 0), (10, 10, 1, 0)] {
            let mut s = samples(burn_in, thin);
            for i in 0..n {
                s.fill(&point(1.0, 1.0), i as f64, i % 2 == 0).unwrap();
            }
            assert_eq!(s.kept_samples(), expected);
            assert_eq!(s.total_steps(), n);
            assert_eq!(s.raw_samples().unwrap().nrows(), expected);
        }
    }

    #[test]
    fn projections_and_rates() {
        let mut s = samples(0, 1).set_save_full_histogram(true);
        s.fill(&point(1.5, 2.5), 0.0, true).unwrap();
        s.fill(&point(1.5, 7.5), 0.0, false).unwrap();
        s.fill(&point(8.5, 7.5), 0.0, true).unwrap();

        assert_abs_diff_eq!(s.acceptance_rate(), 2.0 / 3.0);
        assert_abs_diff_eq!(s.rejection_rate(), 1.0 / 3.0);
        assert_abs_diff_eq!(s.projections_1d()["a"].bin_content(1), 2.0);
        let ab = &s.projections_2d()[&("a".to_string(), "b".to_string())];
        assert_abs_diff_eq!(ab.integral(), 3.0);
        // bin (8, 3) with 5 bins on b
        assert_abs_diff_eq!(ab.bin_content(8 * 5 + 3), 1.0);
        assert_abs_diff_eq!(s.full_histogram().unwrap().integral(), 3.0);

        let raw = s.raw_samples().unwrap();
        assert_eq!(raw.shape(), &[3, 2]);
        assert_eq!(raw[[2, 0]], 8.5);
    }

    #[test]
    fn chain_record_includes_burn_in() {
        let mut s = samples(2, 1).set_save_chain(true);
        for i in 0..4 {
            s.fill(&point(i as f64, 0.0), -(i as f64), i != 1).unwrap();
        }
        let chain = s.chain().unwrap();
        assert_eq!(chain.len(), 4);
        assert_eq!(chain[1].step, 2);
        assert!(!chain[1].accepted);
        assert_eq!(s.kept_samples(), 2);

        s.clear();
        assert_eq!(s.total_steps(), 0);
        assert!(s.chain().unwrap().is_empty());
    }

    #[test]
    fn bad_configuration() {
        let mut axes = AxisCollection::new();
        axes.add_axis(BinAxis::new("c", 0.0, 1.0, 2)).unwrap();
        assert!(McmcSamples::new(vec!["a".to_string()], axes, 0, 1, 10).is_err());
        assert!(McmcSamples::new(vec![], AxisCollection::new(), 0, 0, 10).is_err());

        let mut s = samples(0, 1);
        let missing: ParameterDict = [("a".to_string(), 1.0)].into_iter().collect();
        assert!(matches!(
            s.fill(&missing, 0.0, true),
            Err(FitError::Parameter(_))
        ));
    }
}
