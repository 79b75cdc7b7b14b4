//! Templates and their normalisations.
//!
//! The manager keeps each template twice: the original as registered and a
//! working copy rebuilt on every evaluation (systematics, marginalisation,
//! shrinking). Bin probabilities are read from the working copies.

use crate::error::{FitError, Result};
use crate::histogram::BinnedDistribution;
use crate::parameters::FitComponent;
use crate::shrinker::Shrinker;
use crate::systematics::SystematicManager;

/// How a template's normalisation takes part in the fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormFittingStatus {
    /// The normalisation is a fit parameter, `<template>_norm`.
    #[default]
    Direct,
    /// Not a fit parameter; systematics may not change it either.
    Fixed,
    /// Not a fit parameter. A change in template integral caused by the
    /// systematics is moved into the normalisation and the shape keeps its
    /// original integral.
    Indirect,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateManager {
    originals: Vec<BinnedDistribution>,
    working: Vec<BinnedDistribution>,
    normalisations: Vec<f64>,
    working_normalisations: Vec<f64>,
    statuses: Vec<NormFittingStatus>,
    norm_names: Vec<String>,
}

impl TemplateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a template with normalisation 1. All templates must share
    /// the axes of the first one.
    pub fn add_template(&mut self, template: &BinnedDistribution, status: NormFittingStatus) -> Result<()> {
        if let Some(first) = self.originals.first() {
            if first.axes() != template.axes() {
                return Err(FitError::Dimension(format!(
                    "template '{}' has axes {:?}, expected the axes of '{}' ({:?})",
                    template.name(),
                    template.observables(),
                    first.name(),
                    first.observables()
                )));
            }
        }
        let norm_name = format!("{}_norm", template.name());
        if self.norm_names.contains(&norm_name) {
            return Err(FitError::Configuration(format!(
                "a template named '{}' is already registered",
                template.name()
            )));
        }
        self.originals.push(template.clone());
        self.working.push(template.clone());
        self.normalisations.push(1.0);
        self.working_normalisations.push(1.0);
        self.statuses.push(status);
        self.norm_names.push(norm_name);
        Ok(())
    }

    /// Removes the most recently added template.
    pub(crate) fn pop_template(&mut self) {
        self.originals.pop();
        self.working.pop();
        self.normalisations.pop();
        self.working_normalisations.pop();
        self.statuses.pop();
        self.norm_names.pop();
    }

    pub fn n_templates(&self) -> usize {
        self.originals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }

    pub fn original(&self, index: usize) -> Option<&BinnedDistribution> {
        self.originals.get(index)
    }

    pub fn working(&self, index: usize) -> Option<&BinnedDistribution> {
        self.working.get(index)
    }

    pub fn statuses(&self) -> &[NormFittingStatus] {
        &self.statuses
    }

    /// Normalisations as set by the fit.
    pub fn normalisations(&self) -> &[f64] {
        &self.normalisations
    }

    /// Normalisations after the last systematic pass.
    pub fn working_normalisations(&self) -> &[f64] {
        &self.working_normalisations
    }

    pub fn set_normalisations(&mut self, norms: &[f64]) -> Result<()> {
        if norms.len() != self.normalisations.len() {
            return Err(FitError::Dimension(format!(
                "{} normalisations given for {} templates",
                norms.len(),
                self.normalisations.len()
            )));
        }
        self.normalisations.copy_from_slice(norms);
        self.reassert_norms();
        Ok(())
    }

    /// Resets the working normalisations to the fitted values.
    pub fn reassert_norms(&mut self) {
        self.working_normalisations.clone_from(&self.normalisations);
    }

    /// Rebuilds every working template from its original through `systematics`.
    pub fn apply_systematics(&mut self, systematics: &SystematicManager) -> Result<()> {
        for (j, original) in self.originals.iter().enumerate() {
            let mut distorted = systematics.distort(j, original)?;
            if self.statuses[j] == NormFittingStatus::Indirect {
                let before = original.integral();
                let after = distorted.integral();
                if before > 0.0 && after > 0.0 {
                    self.working_normalisations[j] = self.normalisations[j] * after / before;
                    distorted.scale(before / after);
                }
            }
            self.working[j] = distorted;
        }
        Ok(())
    }

    /// Marginalises working templates onto `observables` where their axes differ.
    pub fn assert_dimensions(&mut self, observables: &[String]) -> Result<()> {
        for dist in self.working.iter_mut() {
            if dist.observables() == observables {
                continue;
            }
            *dist = dist.marginalise(observables).map_err(|e| {
                FitError::Dimension(format!(
                    "template '{}' ({:?}) cannot be projected onto the data observables {observables:?}: {e}",
                    dist.name(),
                    dist.observables()
                ))
            })?;
        }
        Ok(())
    }

    pub fn apply_shrink(&mut self, shrinker: &Shrinker) -> Result<()> {
        for dist in self.working.iter_mut() {
            *dist = shrinker.shrink_dist(dist)?;
        }
        Ok(())
    }

    /// Expected content of `bin`, summed over templates.
    pub fn bin_probability(&self, bin: usize) -> f64 {
        self.working
            .iter()
            .zip(&self.working_normalisations)
            .map(|(dist, norm)| norm * dist.bin_content(bin))
            .sum()
    }

    fn norm_index(&self, name: &str) -> Result<usize> {
        self.norm_names
            .iter()
            .zip(&self.statuses)
            .position(|(n, s)| n == name && *s == NormFittingStatus::Direct)
            .ok_or_else(|| {
                FitError::Parameter(format!(
                    "templates: no fitted normalisation named '{name}', has {:?}",
                    self.parameter_names()
                ))
            })
    }
}

impl FitComponent for TemplateManager {
    fn name(&self) -> &str {
        "templates"
    }

    fn parameter_names(&self) -> Vec<String> {
        self.norm_names
            .iter()
            .zip(&self.statuses)
            .filter(|(_, s)| **s == NormFittingStatus::Direct)
            .map(|(n, _)| n.clone())
            .collect()
    }

    fn parameter(&self, name: &str) -> Result<f64> {
        Ok(self.normalisations[self.norm_index(name)?])
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        let idx = self.norm_index(name)?;
        self.normalisations[idx] = value;
        Ok(())
    }

    fn rename_parameter(&mut self, old: &str, new: &str) -> Result<()> {
        let idx = self.norm_index(old)?;
        if old != new && self.norm_names.iter().any(|n| n == new) {
            return Err(FitError::Parameter(format!(
                "templates: cannot rename '{old}' to '{new}', name already in use"
            )));
        }
        self.norm_names[idx] = new.to_string();
        Ok(())
    }
}
