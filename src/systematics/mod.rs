/*!
# Systematic transformations

A [`Systematic`] is a parameterised distortion applied to a template before
the bin probabilities are assembled. The transforms in this module all act
on a single named axis through a response matrix: `construct()` rebuilds the
matrix from the current parameter values and `apply()` redistributes every
bin's content along that axis.

Systematics are grouped. Those added without a group belong to the global
group and distort every template; a template additionally receives the
systematics of each group it names.
*/

mod convolution;
mod scale;
mod shift;

pub use convolution::{Convolution, Resolution};
pub use scale::Scale;
pub use shift::Shift;

use std::collections::BTreeMap;
use std::fmt::Debug;

use ndarray::Array2;

use crate::error::{FitError, Result};
use crate::histogram::{BinAxis, BinnedDistribution};
use crate::parameters::FitComponent;

/// Group applied to every template.
pub const GLOBAL_GROUP: &str = "";

pub trait Systematic: FitComponent + Send + Debug {
    /// Rebuilds the transformation from the current parameter values.
    fn construct(&mut self) -> Result<()>;

    /// Returns the distorted copy of `dist`.
    fn apply(&self, dist: &BinnedDistribution) -> Result<BinnedDistribution>;

    fn as_component(&self) -> &dyn FitComponent;

    fn as_component_mut(&mut self) -> &mut dyn FitComponent;
}

/// Applies a one-axis response `kernel[[to, from]]` along axis `axis` of `dist`.
pub(crate) fn apply_response(
    owner: &str,
    axis: &BinAxis,
    kernel: &Array2<f64>,
    dist: &BinnedDistribution,
) -> Result<BinnedDistribution> {
    let axes = dist.axes();
    let dim = axes.index_of(axis.name()).ok_or_else(|| {
        FitError::Dimension(format!(
            "{owner}: '{}' has no axis '{}'",
            dist.name(),
            axis.name()
        ))
    })?;
    if axes.axis(dim) != axis {
        return Err(FitError::Dimension(format!(
            "{owner}: binning of axis '{}' in '{}' differs from the binning the response was built for",
            axis.name(),
            dist.name()
        )));
    }

    let n = axis.n_bins();
    let stride: usize = axes.axes()[dim + 1..].iter().map(BinAxis::n_bins).product();
    let mut out = dist.clone();
    out.empty();
    for (bin, &content) in dist.contents().iter().enumerate() {
        if content == 0.0 {
            continue;
        }
        let from = (bin / stride) % n;
        let base = bin - from * stride;
        for to in 0..n {
            let weight = kernel[[to, from]];
            if weight != 0.0 {
                out.add_bin_content(base + to * stride, content * weight);
            }
        }
    }
    Ok(out)
}

/// Length of the intersection of `[a_lo, a_hi)` and `[b_lo, b_hi)`.
pub(crate) fn overlap(a_lo: f64, a_hi: f64, b_lo: f64, b_hi: f64) -> f64 {
    (a_hi.min(b_hi) - a_lo.max(b_lo)).max(0.0)
}

/// Response moving each bin's content, spread uniformly over the mapped
/// interval `(lo, hi)` returned by `map`, onto the axis bins.
pub(crate) fn interval_response(axis: &BinAxis, map: impl Fn(f64, f64) -> (f64, f64)) -> Array2<f64> {
    let n = axis.n_bins();
    let mut kernel = Array2::<f64>::zeros((n, n));
    for from in 0..n {
        let (lo, hi) = map(axis.low_edge(from), axis.high_edge(from));
        let width = hi - lo;
        for to in 0..n {
            kernel[[to, from]] = overlap(lo, hi, axis.low_edge(to), axis.high_edge(to)) / width;
        }
    }
    kernel
}

/// Owns every systematic of a fit and their group memberships.
#[derive(Debug, Default)]
pub struct SystematicManager {
    systematics: Vec<Box<dyn Systematic>>,
    groups: BTreeMap<String, Vec<String>>,
    template_groups: Vec<Vec<String>>,
}

impl SystematicManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a systematic to the global group.
    pub fn add(&mut self, systematic: Box<dyn Systematic>) -> Result<()> {
        self.add_to_group(systematic, GLOBAL_GROUP)
    }

    /// Adds a new systematic to `group`. Names must be unique; use
    /// [`SystematicManager::assign_group`] to put an existing one in more groups.
    pub fn add_to_group(&mut self, systematic: Box<dyn Systematic>, group: &str) -> Result<()> {
        let name = systematic.name().to_string();
        if self.get(&name).is_some() {
            return Err(FitError::Configuration(format!(
                "a systematic named '{name}' is already registered"
            )));
        }
        self.systematics.push(systematic);
        self.groups.entry(group.to_string()).or_default().push(name);
        Ok(())
    }

    pub fn assign_group(&mut self, name: &str, group: &str) -> Result<()> {
        if self.get(name).is_none() {
            return Err(FitError::Configuration(format!(
                "cannot assign unknown systematic '{name}' to group '{group}'"
            )));
        }
        let members = self.groups.entry(group.to_string()).or_default();
        if !members.iter().any(|m| m == name) {
            members.push(name.to_string());
        }
        Ok(())
    }

    /// Takes a systematic out of the manager and out of every group it sits
    /// in. Groups left empty are dropped.
    pub(crate) fn remove(&mut self, name: &str) -> Option<Box<dyn Systematic>> {
        let idx = self.systematics.iter().position(|s| s.name() == name)?;
        for members in self.groups.values_mut() {
            members.retain(|m| m != name);
        }
        self.groups.retain(|_, members| !members.is_empty());
        Some(self.systematics.remove(idx))
    }

    /// Records the groups of the next template, in template order.
    pub fn add_template(&mut self, groups: &[String]) {
        self.template_groups.push(groups.to_vec());
    }

    /// Forgets the groups of the most recently added template.
    pub(crate) fn pop_template(&mut self) {
        self.template_groups.pop();
    }

    pub fn n_templates(&self) -> usize {
        self.template_groups.len()
    }

    pub fn template_groups(&self, template: usize) -> &[String] {
        &self.template_groups[template]
    }

    /// Group name to member systematic names, in insertion order.
    pub fn groups(&self) -> &BTreeMap<String, Vec<String>> {
        &self.groups
    }

    pub fn get(&self, name: &str) -> Option<&dyn Systematic> {
        self.systematics
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn Systematic + 'static)> {
        self.systematics
            .iter_mut()
            .find(|s| s.name() == name)
            .map(|s| s.as_mut())
    }

    pub fn len(&self) -> usize {
        self.systematics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systematics.is_empty()
    }

    /// Rebuilds every systematic from its current parameters.
    pub fn construct(&mut self) -> Result<()> {
        for systematic in self.systematics.iter_mut() {
            systematic.construct()?;
        }
        Ok(())
    }

    /// Names of the systematics acting on `template`, each once, global group first.
    pub fn systematics_for(&self, template: usize) -> Result<Vec<String>> {
        let groups = self.template_groups.get(template).ok_or_else(|| {
            FitError::Dimension(format!(
                "no systematic groups recorded for template {template}"
            ))
        })?;
        let mut names: Vec<String> = Vec::new();
        let global = self.groups.get(GLOBAL_GROUP).into_iter().flatten();
        for group in groups.iter().filter(|g| g.as_str() != GLOBAL_GROUP) {
            if !self.groups.contains_key(group) {
                return Err(FitError::Configuration(format!(
                    "template {template} uses systematic group '{group}' which has no systematics"
                )));
            }
        }
        let grouped = groups
            .iter()
            .filter(|g| g.as_str() != GLOBAL_GROUP)
            .filter_map(|g| self.groups.get(g))
            .flatten();
        for name in global.chain(grouped) {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        Ok(names)
    }

    /// Applies every systematic acting on `template` to `dist`, in order.
    pub fn distort(&self, template: usize, dist: &BinnedDistribution) -> Result<BinnedDistribution> {
        let mut out = dist.clone();
        for name in self.systematics_for(template)? {
            let systematic = self.get(&name).ok_or_else(|| {
                FitError::Logic(format!("systematic '{name}' vanished from its group"))
            })?;
            out = systematic.apply(&out)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::AxisCollection;
    use crate::parameters::FitComponent;
    use approx::assert_abs_diff_eq;

    fn energy_axis() -> BinAxis {
        BinAxis::new("energy", 0.0, 10.0, 10)
    }

    fn spike(bin: usize) -> BinnedDistribution {
        let mut axes = AxisCollection::new();
        axes.add_axis(energy_axis()).unwrap();
        let mut dist = BinnedDistribution::new("spike", axes);
        dist.set_bin_content(bin, 1.0);
        dist
    }

    #[test]
    fn groups_are_applied_once_per_template() {
        let mut manager = SystematicManager::new();
        manager
            .add(Box::new(Shift::new("global", energy_axis())))
            .unwrap();
        manager
            .add_to_group(Box::new(Shift::new("grouped", energy_axis())), "g1")
            .unwrap();
        manager.assign_group("grouped", "g2").unwrap();
        manager.add_template(&[]);
        manager.add_template(&["g1".to_string(), "g2".to_string()]);

        assert_eq!(manager.systematics_for(0).unwrap(), vec!["global"]);
        assert_eq!(
            manager.systematics_for(1).unwrap(),
            vec!["global".to_string(), "grouped".to_string()]
        );
        assert!(manager
            .add(Box::new(Shift::new("global", energy_axis())))
            .is_err());
    }

    #[test]
    fn unknown_group_is_a_configuration_error() {
        let mut manager = SystematicManager::new();
        manager.add_template(&["missing".to_string()]);
        assert!(matches!(
            manager.systematics_for(0),
            Err(FitError::Configuration(_))
        ));
    }

    #[test]
    fn distort_chains_systematics() {
        let mut manager = SystematicManager::new();
        let mut a = Shift::new("a", energy_axis());
        a.set_parameter("a_shift", 1.0).unwrap();
        let mut b = Shift::new("b", energy_axis());
        b.set_parameter("b_shift", 2.0).unwrap();
        manager.add(Box::new(a)).unwrap();
        manager.add(Box::new(b)).unwrap();
        manager.add_template(&[]);
        manager.construct().unwrap();

        let out = manager.distort(0, &spike(3)).unwrap();
        assert_abs_diff_eq!(out.bin_content(6), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out.integral(), 1.0, epsilon = 1e-12);
    }
}
