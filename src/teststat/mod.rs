/*!
Objective functions over a set of named fit parameters.

A [`TestStatistic`] owns everything it needs to produce one scalar: the
templates, the systematics, the data and any constraints. Optimisers and
samplers talk to it only through parameter dictionaries and `evaluate()`.

- [`BinnedNll`]: extended binned negative log-likelihood with optional
  Barlow-Beeston treatment of template statistics.
- [`ChiSquare`]: Pearson chi-square against the same template machinery.
*/

mod binned_nll;
mod chi_square;

pub use binned_nll::BinnedNll;
pub use chi_square::ChiSquare;

use std::collections::BTreeSet;

use crate::error::{FitError, Result};
use crate::parameters::{ComponentKey, ComponentRegistry, ComponentSource, FitComponent, ParameterDict};
use crate::systematics::SystematicManager;
use crate::templates::TemplateManager;

/// A scalar objective of named parameters.
///
/// Implementations are stateful and not reentrant: `set_parameters` followed
/// by `evaluate` mutates internal caches.
pub trait TestStatistic {
    /// Computes the statistic at the current parameter values.
    fn evaluate(&mut self) -> Result<f64>;

    /// Rebuilds the flat parameter namespace from the current components.
    fn register_fit_components(&mut self) -> Result<()>;

    fn set_parameters(&mut self, params: &ParameterDict) -> Result<()>;

    fn parameters(&self) -> Result<ParameterDict>;

    fn parameter_names(&self) -> Result<BTreeSet<String>>;

    fn parameter_count(&self) -> Result<usize>;

    /// Value of a single parameter.
    fn parameter(&self, name: &str) -> Result<f64> {
        self.parameters()?.get(name).copied().ok_or_else(|| {
            FitError::Parameter(format!("no parameter named '{name}'"))
        })
    }

    /// Renames a parameter. Statistics with a fixed namespace refuse.
    fn rename_parameter(&mut self, old: &str, new: &str) -> Result<()> {
        Err(FitError::Logic(format!(
            "cannot rename '{old}' to '{new}', this test statistic has fixed parameter names"
        )))
    }

    /// Sets `params` and evaluates.
    fn evaluate_at(&mut self, params: &ParameterDict) -> Result<f64> {
        self.set_parameters(params)?;
        self.evaluate()
    }
}

/// The components whose parameters a test statistic exposes.
#[derive(Debug, Default)]
pub struct FitComponents {
    pub templates: TemplateManager,
    pub systematics: SystematicManager,
}

impl FitComponents {
    /// Clears `registry` and adds the normalisations followed by every
    /// systematic, each once even when it sits in several groups.
    pub fn register(&self, registry: &mut ComponentRegistry) -> Result<()> {
        registry.clear();
        registry.add_component(ComponentKey::Normalisations, self)?;
        for members in self.systematics.groups().values() {
            for name in members {
                let key = ComponentKey::Systematic(name.clone());
                if !registry.is_registered(&key) {
                    registry.add_component(key, self)?;
                }
            }
        }
        tracing::debug!(
            n_components = registry.keys().len(),
            parameters = ?registry.parameter_names(self)?,
            "fit components registered"
        );
        Ok(())
    }

    /// Registers after a change made by the caller. If the new namespace does
    /// not register, `undo` reverts the change, the previous namespace is
    /// restored and the original error is returned.
    pub(crate) fn register_or_undo(
        &mut self,
        registry: &mut ComponentRegistry,
        undo: impl FnOnce(&mut Self),
    ) -> Result<()> {
        match self.register(registry) {
            Ok(()) => Ok(()),
            Err(e) => {
                undo(self);
                self.register(registry)?;
                tracing::warn!(error = %e, "component registration failed, change reverted");
                Err(e)
            }
        }
    }
}

impl ComponentSource for FitComponents {
    fn component(&self, key: &ComponentKey) -> Option<&dyn FitComponent> {
        match key {
            ComponentKey::Normalisations => Some(&self.templates),
            ComponentKey::Systematic(name) => self.systematics.get(name).map(|s| s.as_component()),
        }
    }

    fn component_mut(&mut self, key: &ComponentKey) -> Option<&mut dyn FitComponent> {
        match key {
            ComponentKey::Normalisations => Some(&mut self.templates),
            ComponentKey::Systematic(name) => self
                .systematics
                .get_mut(name)
                .map(|s| s.as_component_mut()),
        }
    }
}
