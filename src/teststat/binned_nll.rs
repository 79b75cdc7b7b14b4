use std::collections::BTreeSet;
use std::sync::Arc;

use super::{FitComponents, TestStatistic};
use crate::constraints::ConstraintSet;
use crate::data::{fill_dist, Cut, CutCollection, CutLog, DataSet};
use crate::error::{FitError, Result};
use crate::histogram::BinnedDistribution;
use crate::parameters::{ComponentRegistry, FitComponent, ParameterDict};
use crate::shrinker::Shrinker;
use crate::systematics::{Systematic, SystematicManager, GLOBAL_GROUP};
use crate::templates::{NormFittingStatus, TemplateManager};

/**
Extended binned negative log-likelihood.

Each evaluation rebuilds the expected spectrum from scratch: systematics are
constructed and applied to every template, the results are projected onto
the data observables and shrunk with the same bin map as the data, and the
per-bin terms `mu - n ln(mu)` are summed together with the constraint
penalties.

With Barlow-Beeston enabled every bin expectation is corrected for the
finite size of the simulated samples the templates were built from, which
requires the generated (pre-selection) event count of every template.

# Example

```rust
use binfit::histogram::{AxisCollection, BinAxis, BinnedDistribution};
use binfit::teststat::{BinnedNll, TestStatistic};
use binfit::templates::NormFittingStatus;

let mut axes = AxisCollection::new();
axes.add_axis(BinAxis::new("energy", 0.0, 10.0, 10)).unwrap();
let mut signal = BinnedDistribution::new("signal", axes);
signal.set_contents(vec![5.0; 10]).unwrap();
let mut data = signal.clone();
data.scale(2.0);

let mut nll = BinnedNll::new();
nll.add_template(&signal, &[], NormFittingStatus::Direct).unwrap();
nll.set_data_dist(&data);

let at = |nll: &mut BinnedNll, norm: f64| {
    let params = [("signal_norm".to_string(), norm)].into_iter().collect();
    nll.evaluate_at(&params).unwrap()
};
assert!(at(&mut nll, 2.0) < at(&mut nll, 1.0));
assert!(at(&mut nll, 2.0) < at(&mut nll, 5.0));
```
*/
#[derive(Default)]
pub struct BinnedNll {
    components: FitComponents,
    registry: ComponentRegistry,
    shrinker: Shrinker,
    constraints: ConstraintSet,
    generated_rates: Vec<u64>,
    use_barlow_beeston: bool,
    data_dist: Option<BinnedDistribution>,
    data_set: Option<Arc<dyn DataSet>>,
    cuts: CutCollection,
    cut_log: Option<CutLog>,
    already_shrunk: bool,
}

impl BinnedNll {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a template without a generated rate. Not allowed once
    /// Barlow-Beeston is enabled or rates have been given for earlier templates.
    pub fn add_template(
        &mut self,
        template: &BinnedDistribution,
        groups: &[&str],
        status: NormFittingStatus,
    ) -> Result<()> {
        if self.use_barlow_beeston {
            return Err(FitError::Configuration(format!(
                "BinnedNll: template '{}' needs a generated rate while Barlow-Beeston is enabled",
                template.name()
            )));
        }
        if !self.generated_rates.is_empty() {
            return Err(FitError::Dimension(format!(
                "BinnedNll: template '{}' has no generated rate but the {} templates before it do",
                template.name(),
                self.generated_rates.len()
            )));
        }
        self.push_template(template, groups, status)
    }

    /// Adds a template together with the number of simulated events it was
    /// generated from.
    pub fn add_template_with_rate(
        &mut self,
        template: &BinnedDistribution,
        groups: &[&str],
        generated_rate: u64,
        status: NormFittingStatus,
    ) -> Result<()> {
        if generated_rate == 0 {
            return Err(FitError::Configuration(format!(
                "BinnedNll: generated rate of template '{}' must be positive",
                template.name()
            )));
        }
        if self.generated_rates.len() != self.components.templates.n_templates() {
            return Err(FitError::Dimension(format!(
                "BinnedNll: {} generated rates for {} templates",
                self.generated_rates.len(),
                self.components.templates.n_templates()
            )));
        }
        self.push_template(template, groups, status)?;
        self.generated_rates.push(generated_rate);
        Ok(())
    }

    /// Bulk form of [`BinnedNll::add_template`]. `statuses` defaults to
    /// [`NormFittingStatus::Direct`] for every template.
    pub fn add_templates(
        &mut self,
        templates: &[BinnedDistribution],
        groups: &[&[&str]],
        statuses: Option<&[NormFittingStatus]>,
    ) -> Result<()> {
        check_lengths(templates.len(), groups.len(), "systematic group lists")?;
        if let Some(statuses) = statuses {
            check_lengths(templates.len(), statuses.len(), "fitting statuses")?;
        }
        for (i, template) in templates.iter().enumerate() {
            let status = statuses.map_or(NormFittingStatus::Direct, |s| s[i]);
            self.add_template(template, groups[i], status)?;
        }
        Ok(())
    }

    /// Bulk form of [`BinnedNll::add_template_with_rate`].
    pub fn add_templates_with_rates(
        &mut self,
        templates: &[BinnedDistribution],
        groups: &[&[&str]],
        generated_rates: &[u64],
        statuses: Option<&[NormFittingStatus]>,
    ) -> Result<()> {
        check_lengths(templates.len(), groups.len(), "systematic group lists")?;
        check_lengths(templates.len(), generated_rates.len(), "generated rates")?;
        if let Some(statuses) = statuses {
            check_lengths(templates.len(), statuses.len(), "fitting statuses")?;
        }
        for (i, template) in templates.iter().enumerate() {
            let status = statuses.map_or(NormFittingStatus::Direct, |s| s[i]);
            self.add_template_with_rate(template, groups[i], generated_rates[i], status)?;
        }
        Ok(())
    }

    fn push_template(
        &mut self,
        template: &BinnedDistribution,
        groups: &[&str],
        status: NormFittingStatus,
    ) -> Result<()> {
        self.components.templates.add_template(template, status)?;
        let groups: Vec<String> = groups.iter().map(|g| g.to_string()).collect();
        self.components.systematics.add_template(&groups);
        self.components.register_or_undo(&mut self.registry, |c| {
            c.templates.pop_template();
            c.systematics.pop_template();
        })
    }

    pub fn set_barlow_beeston(&mut self, enabled: bool) -> Result<()> {
        if enabled && self.generated_rates.len() != self.components.templates.n_templates() {
            return Err(FitError::Configuration(format!(
                "BinnedNll: Barlow-Beeston needs a generated rate for each of the {} templates, {} given",
                self.components.templates.n_templates(),
                self.generated_rates.len()
            )));
        }
        self.use_barlow_beeston = enabled;
        Ok(())
    }

    pub fn barlow_beeston(&self) -> bool {
        self.use_barlow_beeston
    }

    pub fn generated_rates(&self) -> &[u64] {
        &self.generated_rates
    }

    /// Adds a systematic acting on every template.
    pub fn add_systematic(&mut self, systematic: Box<dyn Systematic>) -> Result<()> {
        self.add_systematic_to_group(systematic, GLOBAL_GROUP)
    }

    pub fn add_systematic_to_group(&mut self, systematic: Box<dyn Systematic>, group: &str) -> Result<()> {
        let name = systematic.name().to_string();
        self.components.systematics.add_to_group(systematic, group)?;
        self.components.register_or_undo(&mut self.registry, |c| {
            c.systematics.remove(&name);
        })
    }

    pub fn add_systematics(&mut self, systematics: Vec<Box<dyn Systematic>>) -> Result<()> {
        for systematic in systematics {
            self.add_systematic(systematic)?;
        }
        Ok(())
    }

    pub fn add_systematics_to_groups(
        &mut self,
        systematics: Vec<Box<dyn Systematic>>,
        groups: &[&str],
    ) -> Result<()> {
        check_lengths(systematics.len(), groups.len(), "systematic groups")?;
        for (systematic, group) in systematics.into_iter().zip(groups) {
            self.add_systematic_to_group(systematic, group)?;
        }
        Ok(())
    }

    /// Puts an already added systematic into another group as well.
    pub fn assign_systematic_group(&mut self, name: &str, group: &str) -> Result<()> {
        self.components.systematics.assign_group(name, group)
    }

    pub fn templates(&self) -> &TemplateManager {
        &self.components.templates
    }

    pub fn systematics(&self) -> &SystematicManager {
        &self.components.systematics
    }

    pub fn set_normalisations(&mut self, norms: &[f64]) -> Result<()> {
        self.components.templates.set_normalisations(norms)
    }

    pub fn normalisations(&self) -> &[f64] {
        self.components.templates.normalisations()
    }

    pub fn set_buffer(&mut self, dim: &str, lower: usize, upper: usize) {
        self.shrinker.set_buffer(dim, lower, upper);
    }

    pub fn buffer(&self, dim: &str) -> (usize, usize) {
        self.shrinker.buffer(dim)
    }

    /// Fold buffer bins into the edge bins instead of dropping them.
    pub fn set_buffer_as_overflow(&mut self, overflow: bool) {
        self.shrinker.set_using_overflows(overflow);
    }

    pub fn buffer_as_overflow(&self) -> bool {
        self.shrinker.using_overflows()
    }

    /// Uses `dist` as the data directly. It is shrunk on the next evaluation.
    pub fn set_data_dist(&mut self, dist: &BinnedDistribution) {
        self.data_dist = Some(dist.clone());
        self.already_shrunk = false;
    }

    /// Data as used by the fit: shrunk once an evaluation has run.
    pub fn data_dist(&self) -> Option<&BinnedDistribution> {
        self.data_dist.as_ref()
    }

    /// Uses an event data set; it is binned like the first template on the
    /// next evaluation, after applying the cuts.
    pub fn set_data_set(&mut self, data: Arc<dyn DataSet>) {
        self.data_set = Some(data);
        self.data_dist = None;
        self.cut_log = None;
        self.already_shrunk = false;
    }

    pub fn data_set(&self) -> Option<&Arc<dyn DataSet>> {
        self.data_set.as_ref()
    }

    pub fn add_cut(&mut self, cut: Box<dyn Cut>) {
        self.cuts.add_cut(cut);
    }

    pub fn set_cuts(&mut self, cuts: CutCollection) {
        self.cuts = cuts;
    }

    /// Cut statistics of the last time the data set was binned.
    pub fn cut_log(&self) -> Option<&CutLog> {
        self.cut_log.as_ref()
    }

    pub fn set_constraint(&mut self, name: &str, mean: f64, sigma: f64) -> Result<()> {
        self.constraints.set_constraint(name, mean, sigma)
    }

    pub fn set_asymmetric_constraint(
        &mut self,
        name: &str,
        mean: f64,
        sigma_lo: f64,
        sigma_hi: f64,
    ) -> Result<()> {
        self.constraints
            .set_asymmetric_constraint(name, mean, sigma_lo, sigma_hi)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_correlated_constraint(
        &mut self,
        name_1: &str,
        mean_1: f64,
        sigma_1: f64,
        name_2: &str,
        mean_2: f64,
        sigma_2: f64,
        correlation: f64,
    ) -> Result<()> {
        self.constraints.set_correlated_constraint(
            name_1,
            mean_1,
            sigma_1,
            name_2,
            mean_2,
            sigma_2,
            correlation,
        )
    }

    pub fn set_ratio_constraint(
        &mut self,
        name_1: &str,
        name_2: &str,
        ratio_mean: f64,
        ratio_sigma: f64,
    ) -> Result<()> {
        self.constraints
            .set_ratio_constraint(name_1, name_2, ratio_mean, ratio_sigma)
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    fn bin_data(&mut self) -> Result<()> {
        let data = self.data_set.as_ref().ok_or_else(|| {
            FitError::Logic(
                "BinnedNll: evaluated with neither a data set nor a data distribution".to_string(),
            )
        })?;
        let first = self.components.templates.original(0).ok_or_else(|| {
            FitError::Logic("BinnedNll: cannot bin data before a template is added".to_string())
        })?;
        let mut dist = first.clone();
        dist.empty();
        dist.set_name("data");
        let mut log = CutLog::new(self.cuts.names());
        fill_dist(&mut dist, data.as_ref(), &self.cuts, &mut log)?;
        self.data_dist = Some(dist);
        self.cut_log = Some(log);
        Ok(())
    }

    /// Binds the shrinker to the data layout and shrinks the data, once.
    fn shrink_data(&mut self) -> Result<&BinnedDistribution> {
        let data = self.data_dist.as_mut().ok_or_else(|| {
            FitError::Logic("BinnedNll: no data distribution to shrink".to_string())
        })?;
        if !self.already_shrunk {
            self.shrinker.set_bin_map(data)?;
            *data = self.shrinker.shrink_dist(data)?;
            self.already_shrunk = true;
        }
        Ok(data)
    }
}

fn check_lengths(expected: usize, got: usize, what: &str) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(FitError::Dimension(format!(
            "BinnedNll: {got} {what} given for {expected} templates"
        )))
    }
}

/// Solves the per-bin Barlow-Beeston equation
/// `beta^2 + (mu sigma2 - 1) beta - n sigma2 = 0` for the larger root and
/// returns `(beta * mu, (beta - 1)^2 / (2 sigma2))`.
pub(crate) fn barlow_beeston(mu: f64, n: f64, sigma2: f64, bin: usize) -> Result<(f64, f64)> {
    if sigma2 == 0.0 {
        return Ok((mu, 0.0));
    }
    let b = mu * sigma2 - 1.0;
    let det = b * b + 4.0 * n * sigma2;
    if !det.is_finite() || det < 0.0 {
        return Err(FitError::Statistical(format!(
            "negative Barlow-Beeston discriminant {det} in bin {bin} (expected {mu}, observed {n})"
        )));
    }
    let sign = if b >= 0.0 { 1.0 } else { -1.0 };
    let q = -0.5 * (b + sign * det.sqrt());
    if q == 0.0 {
        return Err(FitError::Statistical(format!(
            "degenerate Barlow-Beeston root in bin {bin} (expected {mu}, observed {n})"
        )));
    }
    let beta = q.max(n * sigma2 / q);
    Ok((beta * mu, (beta - 1.0).powi(2) / (2.0 * sigma2)))
}

impl TestStatistic for BinnedNll {
    fn evaluate(&mut self) -> Result<f64> {
        if self.data_dist.is_none() {
            self.bin_data()?;
        }
        if self.components.templates.is_empty() {
            return Err(FitError::Logic(
                "BinnedNll: evaluated without any template".to_string(),
            ));
        }
        self.components.templates.reassert_norms();
        let observables = self.shrink_data()?.observables();

        self.components.systematics.construct()?;
        let FitComponents {
            templates,
            systematics,
        } = &mut self.components;
        templates.apply_systematics(systematics)?;
        templates.assert_dimensions(&observables)?;
        templates.apply_shrink(&self.shrinker)?;

        let data = self.data_dist.as_ref().ok_or_else(|| {
            FitError::Logic("BinnedNll: data distribution vanished".to_string())
        })?;
        for j in 0..templates.n_templates() {
            let n_bins = templates.working(j).map_or(0, BinnedDistribution::n_bins);
            if n_bins != data.n_bins() {
                return Err(FitError::Dimension(format!(
                    "BinnedNll: template {j} has {n_bins} bins after shrinking, data has {}",
                    data.n_bins()
                )));
            }
        }

        let norms = templates.normalisations();
        let mut nll = 0.0;
        for bin in 0..data.n_bins() {
            let prob = templates.bin_probability(bin);
            if !(prob > 0.0) {
                return Err(FitError::Statistical(format!(
                    "BinnedNll: expected content {prob} in bin {bin}, templates and data binning are inconsistent"
                )));
            }
            let observed = data.bin_content(bin);

            let (expected, penalty) = if self.use_barlow_beeston {
                let sigma2: f64 = norms
                    .iter()
                    .zip(&self.generated_rates)
                    .map(|(norm, &rate)| norm / (rate as f64 * prob * prob))
                    .sum();
                barlow_beeston(prob, observed, sigma2, bin)?
            } else {
                (prob, 0.0)
            };
            tracing::trace!(bin, prob, expected, observed, penalty, "bin term");

            if observed != 0.0 {
                nll -= observed * expected.ln();
            }
            nll += penalty + expected;
        }
        tracing::trace!(nll, "sum over bins");

        let params = self.registry.parameters(&self.components)?;
        nll += self.constraints.evaluate(&params)?;
        tracing::debug!(nll, "binned nll evaluated");
        Ok(nll)
    }

    fn register_fit_components(&mut self) -> Result<()> {
        self.components.register(&mut self.registry)
    }

    fn set_parameters(&mut self, params: &ParameterDict) -> Result<()> {
        self.registry
            .set_parameters(&mut self.components, params)
            .map_err(|e| e.context("BinnedNll: "))
    }

    fn parameters(&self) -> Result<ParameterDict> {
        self.registry.parameters(&self.components)
    }

    fn parameter_names(&self) -> Result<BTreeSet<String>> {
        self.registry.parameter_names(&self.components)
    }

    fn parameter(&self, name: &str) -> Result<f64> {
        self.registry.parameter(&self.components, name)
    }

    fn rename_parameter(&mut self, old: &str, new: &str) -> Result<()> {
        self.registry
            .rename_parameter(&mut self.components, old, new)
            .map_err(|e| e.context("BinnedNll: "))
    }

    fn parameter_count(&self) -> Result<usize> {
        self.registry.total_parameter_count(&self.components)
    }
}
