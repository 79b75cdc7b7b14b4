use std::f64::consts::SQRT_2;

use ndarray::Array2;
use statrs::function::erf::erf;

use super::{apply_response, Systematic};
use crate::error::{FitError, Result};
use crate::histogram::{BinAxis, BinnedDistribution};
use crate::parameters::{FitComponent, ParameterSet};

/// Width model of a [`Convolution`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// Fixed offset and width, parameters `<name>_mean` and `<name>_sigma`.
    Gaussian,
    /// Detector-style resolution `sigma = grad * sqrt(|x|)` evaluated at the
    /// bin centre, parameter `<name>_grad`.
    SqrtEnergy,
}

/// Smears content along one axis with a Gaussian kernel.
#[derive(Debug, Clone)]
pub struct Convolution {
    axis: BinAxis,
    resolution: Resolution,
    params: ParameterSet,
    response: Option<Array2<f64>>,
}

impl Convolution {
    pub fn gaussian(name: &str, axis: BinAxis, mean: f64, sigma: f64) -> Self {
        Self {
            axis,
            resolution: Resolution::Gaussian,
            params: ParameterSet::new(name)
                .with(&format!("{name}_mean"), mean)
                .with(&format!("{name}_sigma"), sigma),
            response: None,
        }
    }

    pub fn sqrt_energy(name: &str, axis: BinAxis, grad: f64) -> Self {
        Self {
            axis,
            resolution: Resolution::SqrtEnergy,
            params: ParameterSet::new(name).with(&format!("{name}_grad"), grad),
            response: None,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Offset and width of the kernel for content centred at `x`.
    fn kernel_at(&self, x: f64) -> (f64, f64) {
        match self.resolution {
            Resolution::Gaussian => (self.params.value(0), self.params.value(1)),
            Resolution::SqrtEnergy => (0.0, self.params.value(0) * x.abs().sqrt()),
        }
    }
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / SQRT_2))
}

impl FitComponent for Convolution {
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

impl Systematic for Convolution {
    fn construct(&mut self) -> Result<()> {
        if self.params.values().iter().any(|v| !v.is_finite()) {
            return Err(FitError::Parameter(format!(
                "{}: non-finite kernel parameter in {:?}",
                self.name(),
                self.params.values()
            )));
        }
        let n = self.axis.n_bins();
        let mut kernel = Array2::<f64>::zeros((n, n));
        for from in 0..n {
            let centre = self.axis.centre(from);
            let (offset, sigma) = self.kernel_at(centre);
            let mean = centre + offset;
            if sigma <= 0.0 {
                // zero width: the content moves whole
                if let Some(to) = self.axis.find_bin(mean) {
                    kernel[[to, from]] = 1.0;
                }
                continue;
            }
            for to in 0..n {
                let hi = normal_cdf((self.axis.high_edge(to) - mean) / sigma);
                let lo = normal_cdf((self.axis.low_edge(to) - mean) / sigma);
                kernel[[to, from]] = hi - lo;
            }
        }
        self.response = Some(kernel);
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
