use ndarray::Array2;

use super::{apply_response, interval_response, Systematic};
use crate::error::{FitError, Result};
use crate::histogram::{BinAxis, BinnedDistribution};
use crate::parameters::{FitComponent, ParameterSet};

/// Multiplies the axis coordinate by `<name>_scale` (an energy-scale
/// systematic). Content is conserved except where it leaves the axis.
#[derive(Debug, Clone)]
pub struct Scale {
    axis: BinAxis,
    params: ParameterSet,
    response: Option<Array2<f64>>,
}

impl Scale {
    pub fn new(name: &str, axis: BinAxis) -> Self {
        Self {
            axis,
            params: ParameterSet::new(name).with(&format!("{name}_scale"), 1.0),
            response: None,
        }
    }
}

impl FitComponent for Scale {
    fn name(&self) -> &str {
        self.params.name()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.params.parameter_names()
    }

    fn parameter(&self, name: &str) -> Result<f64> {
        self.params.parameter(name)
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        self.params.set_parameter(name, value)
    }

    fn rename_parameter(&mut self, old: &str, new: &str) -> Result<()> {
        self.params.rename_parameter(old, new)
    }
}

impl Systematic for Scale {
    fn construct(&mut self) -> Result<()> {
        let factor = self.params.value(0);
        if !(factor > 0.0 && factor.is_finite()) {
            return Err(FitError::Parameter(format!(
                "{}: scale factor must be positive, got {factor}",
                self.name()
            )));
        }
        self.response = Some(interval_response(&self.axis, |lo, hi| {
            (lo * factor, hi * factor)
        }));
        Ok(())
    }

    fn apply(&self, dist: &BinnedDistribution) -> Result<BinnedDistribution> {
        let response = self.response.as_ref().ok_or_else(|| {
            FitError::Logic(format!("{}: apply called before construct", self.name()))
        })?;
        apply_response(self.name(), &self.axis, response, dist)
    }

    fn as_component(&self) -> &dyn FitComponent {
        self
    }

    fn as_component_mut(&mut self) -> &mut dyn FitComponent {
        self
    }
}
