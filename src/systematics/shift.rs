use ndarray::Array2;

use super::{apply_response, interval_response, Systematic};
use crate::error::{FitError, Result};
use crate::histogram::{BinAxis, BinnedDistribution};
use crate::parameters::{FitComponent, ParameterSet};

/// Translates content along one axis by `<name>_shift`. Content moved past
/// either end of the axis is lost.
#[derive(Debug, Clone)]
pub struct Shift {
    axis: BinAxis,
    params: ParameterSet,
    response: Option<Array2<f64>>,
}

impl Shift {
    pub fn new(name: &str, axis: BinAxis) -> Self {
        Self {
            axis,
            params: ParameterSet::new(name).with(&format!("{name}_shift"), 0.0),
            response: None,
        }
    }
}

impl FitComponent for Shift {
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

impl Systematic for Shift {
    fn construct(&mut self) -> Result<()> {
        let shift = self.params.value(0);
        if !shift.is_finite() {
            return Err(FitError::Parameter(format!(
                "{}: shift must be finite, got {shift}",
                self.name()
            )));
        }
        self.response = Some(interval_response(&self.axis, |lo, hi| {
            (lo + shift, hi + shift)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::AxisCollection;
    use approx::assert_abs_diff_eq;

    fn flat() -> BinnedDistribution {
        let mut axes = AxisCollection::new();
        axes.add_axis(BinAxis::new("energy", 0.0, 10.0, 10)).unwrap();
        let mut dist = BinnedDistribution::new("flat", axes);
        dist.set_contents(vec![1.0; 10]).unwrap();
        dist
    }

    #[test]
    fn half_bin_shift_splits_content() {
        let mut shift = Shift::new("s", BinAxis::new("energy", 0.0, 10.0, 10));
        shift.set_parameter("s_shift", 0.5).unwrap();
        shift.construct().unwrap();
        let out = shift.apply(&flat()).unwrap();
        assert_abs_diff_eq!(out.bin_content(0), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(out.bin_content(5), 1.0, epsilon = 1e-12);
        // half of the last bin leaves the axis
        assert_abs_diff_eq!(out.integral(), 9.5, epsilon = 1e-12);
    }

    #[test]
    fn zero_shift_is_identity() {
        let mut shift = Shift::new("s", BinAxis::new("energy", 0.0, 10.0, 10));
        shift.construct().unwrap();
        assert_eq!(shift.apply(&flat()).unwrap().contents(), flat().contents());
    }

    #[test]
    fn apply_needs_construct_and_matching_axis() {
        let shift = Shift::new("s", BinAxis::new("energy", 0.0, 10.0, 10));
        assert!(matches!(shift.apply(&flat()), Err(FitError::Logic(_))));

        let mut other = Shift::new("s", BinAxis::new("energy", 0.0, 20.0, 10));
        other.construct().unwrap();
        assert!(matches!(other.apply(&flat()), Err(FitError::Dimension(_))));
    }
}
