use std::collections::BTreeSet;
use std::sync::Arc;

use super::{FitComponents, TestStatistic};
use crate::data::{fill_dist, CutCollection, CutLog, DataSet};
use crate::error::{FitError, Result};
use crate::histogram::BinnedDistribution;
use crate::parameters::{ComponentRegistry, FitComponent, ParameterDict};
use crate::systematics::{Systematic, GLOBAL_GROUP};
use crate::templates::NormFittingStatus;

/// Pearson chi-square, `sum (n - mu)^2 / mu`, of the data against the
/// normalised sum of templates after systematics. No shrinking is applied.
#[derive(Default)]
pub struct ChiSquare {
    components: FitComponents,
    registry: ComponentRegistry,
    data_dist: Option<BinnedDistribution>,
    data_set: Option<Arc<dyn DataSet>>,
}

impl ChiSquare {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_template(
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

    pub fn set_normalisations(&mut self, norms: &[f64]) -> Result<()> {
        self.components.templates.set_normalisations(norms)
    }

    pub fn set_data_dist(&mut self, dist: &BinnedDistribution) {
        self.data_dist = Some(dist.clone());
    }

    pub fn set_data_set(&mut self, data: Arc<dyn DataSet>) {
        self.data_set = Some(data);
        self.data_dist = None;
    }

    pub fn data_dist(&self) -> Option<&BinnedDistribution> {
        self.data_dist.as_ref()
    }

    fn bin_data(&mut self) -> Result<()> {
        let data = self.data_set.as_ref().ok_or_else(|| {
            FitError::Logic(
                "ChiSquare: evaluated with neither a data set nor a data distribution".to_string(),
            )
        })?;
        let first = self.components.templates.original(0).ok_or_else(|| {
            FitError::Logic("ChiSquare: cannot bin data before a template is added".to_string())
        })?;
        let mut dist = first.clone();
        dist.empty();
        dist.set_name("data");
        let cuts = CutCollection::new();
        let mut log = CutLog::new(cuts.names());
        fill_dist(&mut dist, data.as_ref(), &cuts, &mut log)?;
        self.data_dist = Some(dist);
        Ok(())
    }
}

impl TestStatistic for ChiSquare {
    fn evaluate(&mut self) -> Result<f64> {
        if self.data_dist.is_none() {
            self.bin_data()?;
        }
        let data = self.data_dist.as_ref().ok_or_else(|| {
            FitError::Logic("ChiSquare: no data distribution".to_string())
        })?;
        let FitComponents {
            templates,
            systematics,
        } = &mut self.components;
        templates.reassert_norms();
        systematics.construct()?;
        templates.apply_systematics(systematics)?;
        templates.assert_dimensions(&data.observables())?;

        let mut chi2 = 0.0;
        for bin in 0..data.n_bins() {
            let expected = templates.bin_probability(bin);
            if !(expected > 0.0) {
                return Err(FitError::Statistical(format!(
                    "ChiSquare: expected content {expected} in bin {bin}"
                )));
            }
            let deviation = data.bin_content(bin) - expected;
            chi2 += deviation * deviation / expected;
        }
        tracing::debug!(chi2, "chi-square evaluated");
        Ok(chi2)
    }

    fn register_fit_components(&mut self) -> Result<()> {
        self.components.register(&mut self.registry)
    }

    fn set_parameters(&mut self, params: &ParameterDict) -> Result<()> {
        self.registry
            .set_parameters(&mut self.components, params)
            .map_err(|e| e.context("ChiSquare: "))
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
            .map_err(|e| e.context("ChiSquare: "))
    }

    fn parameter_count(&self) -> Result<usize> {
        self.registry.total_parameter_count(&self.components)
    }
}
