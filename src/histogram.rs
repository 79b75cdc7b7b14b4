/*!
# Binned distributions

An n-dimensional histogram over named axes. Templates, the observed data and
the MCMC projections are all [`BinnedDistribution`]s.

Bins are addressed by a flat index. The flat index is row-major: the last
axis varies fastest.

```rust
use binfit::histogram::{AxisCollection, BinAxis, BinnedDistribution};

let mut axes = AxisCollection::new();
axes.add_axis(BinAxis::new("energy", 0.0, 10.0, 10)).unwrap();
let mut dist = BinnedDistribution::new("signal", axes);
dist.fill(&[2.5], 1.0).unwrap();
assert_eq!(dist.bin_content(2), 1.0);
assert_eq!(dist.integral(), 1.0);
```
*/

use crate::error::{FitError, Result};

/// Binning of one named dimension, stored as `n_bins + 1` ascending edges.
#[derive(Debug, Clone)]
pub struct BinAxis {
    name: String,
    edges: Vec<f64>,
}

impl BinAxis {
    /// Creates `n_bins` equal-width bins covering `[min, max)`.
    pub fn new(name: &str, min: f64, max: f64, n_bins: usize) -> Self {
        let width = (max - min) / n_bins as f64;
        let mut edges: Vec<f64> = (0..n_bins).map(|i| min + i as f64 * width).collect();
        edges.push(max);
        Self {
            name: name.to_string(),
            edges,
        }
    }

    /// Creates an axis from explicit bin edges. Requires at least two strictly
    /// increasing edges.
    pub fn from_edges(name: &str, edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(FitError::Dimension(format!(
                "BinAxis '{name}' needs at least two edges, got {}",
                edges.len()
            )));
        }
        if edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(FitError::Dimension(format!(
                "BinAxis '{name}' edges must be strictly increasing"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            edges,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    pub fn min(&self) -> f64 {
        self.edges[0]
    }

    pub fn max(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn low_edge(&self, bin: usize) -> f64 {
        self.edges[bin]
    }

    pub fn high_edge(&self, bin: usize) -> f64 {
        self.edges[bin + 1]
    }

    pub fn centre(&self, bin: usize) -> f64 {
        0.5 * (self.edges[bin] + self.edges[bin + 1])
    }

    pub fn width(&self, bin: usize) -> f64 {
        self.edges[bin + 1] - self.edges[bin]
    }

    /// Bin containing `x`, or `None` outside `[min, max)`.
    pub fn find_bin(&self, x: f64) -> Option<usize> {
        if !(x >= self.min() && x < self.max()) {
            return None;
        }
        // first edge strictly greater than x, minus one
        let upper = self.edges.partition_point(|&e| e <= x);
        Some(upper - 1)
    }

    /// New axis keeping only bins `[first, first + count)`.
    pub(crate) fn slice(&self, first: usize, count: usize) -> Self {
        Self {
            name: self.name.clone(),
            edges: self.edges[first..=first + count].to_vec(),
        }
    }
}

/// Two axes are equal when their bin edges are identical.
impl PartialEq for BinAxis {
    fn eq(&self, other: &Self) -> bool {
        self.edges == other.edges
    }
}

/// An ordered set of uniquely named axes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AxisCollection {
    axes: Vec<BinAxis>,
}

impl AxisCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an axis. Axis names must be unique.
    pub fn add_axis(&mut self, axis: BinAxis) -> Result<()> {
        if self.index_of(axis.name()).is_some() {
            return Err(FitError::Dimension(format!(
                "AxisCollection already has an axis named '{}'",
                axis.name()
            )));
        }
        self.axes.push(axis);
        Ok(())
    }

    pub fn n_dims(&self) -> usize {
        self.axes.len()
    }

    /// Total number of bins, the product of the per-axis bin counts.
    pub fn n_bins(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.axes.iter().map(BinAxis::n_bins).product()
    }

    pub fn axis(&self, dim: usize) -> &BinAxis {
        &self.axes[dim]
    }

    pub fn axes(&self) -> &[BinAxis] {
        &self.axes
    }

    pub fn axis_by_name(&self, name: &str) -> Option<&BinAxis> {
        self.axes.iter().find(|a| a.name() == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.axes.iter().position(|a| a.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.axes.iter().map(|a| a.name().to_string()).collect()
    }

    /// Flat bin index from per-axis indices.
    pub fn flatten_indices(&self, indices: &[usize]) -> Result<usize> {
        if indices.len() != self.axes.len() {
            return Err(FitError::Dimension(format!(
                "expected {} indices, got {}",
                self.axes.len(),
                indices.len()
            )));
        }
        let mut flat = 0;
        for (axis, &idx) in self.axes.iter().zip(indices) {
            if idx >= axis.n_bins() {
                return Err(FitError::Dimension(format!(
                    "index {idx} out of range for axis '{}' with {} bins",
                    axis.name(),
                    axis.n_bins()
                )));
            }
            flat = flat * axis.n_bins() + idx;
        }
        Ok(flat)
    }

    /// Per-axis indices of a flat bin index.
    pub fn unpack_indices(&self, mut bin: usize) -> Vec<usize> {
        let mut indices = vec![0; self.axes.len()];
        for (dim, axis) in self.axes.iter().enumerate().rev() {
            indices[dim] = bin % axis.n_bins();
            bin /= axis.n_bins();
        }
        indices
    }

    /// Flat index of the bin containing `values` (one value per axis).
    pub fn find_bin(&self, values: &[f64]) -> Result<Option<usize>> {
        if values.len() != self.axes.len() {
            return Err(FitError::Dimension(format!(
                "expected {} values, got {}",
                self.axes.len(),
                values.len()
            )));
        }
        let mut flat = 0;
        for (axis, &x) in self.axes.iter().zip(values) {
            match axis.find_bin(x) {
                Some(idx) => flat = flat * axis.n_bins() + idx,
                None => return Ok(None),
            }
        }
        Ok(Some(flat))
    }
}

/// Bin contents over an [`AxisCollection`].
///
/// The contents vector always has exactly `axes.n_bins()` entries. Changing
/// the axes goes through [`BinnedDistribution::set_axes`], which resets the
/// contents.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedDistribution {
    name: String,
    axes: AxisCollection,
    contents: Vec<f64>,
}

impl BinnedDistribution {
    pub fn new(name: &str, axes: AxisCollection) -> Self {
        let n_bins = axes.n_bins();
        Self {
            name: name.to_string(),
            axes,
            contents: vec![0.0; n_bins],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn axes(&self) -> &AxisCollection {
        &self.axes
    }

    /// Replaces the axes and zeroes every bin.
    pub fn set_axes(&mut self, axes: AxisCollection) {
        self.contents = vec![0.0; axes.n_bins()];
        self.axes = axes;
    }

    /// Names of the observables this distribution is binned in.
    pub fn observables(&self) -> Vec<String> {
        self.axes.names()
    }

    pub fn n_bins(&self) -> usize {
        self.contents.len()
    }

    pub fn n_dims(&self) -> usize {
        self.axes.n_dims()
    }

    pub fn bin_content(&self, bin: usize) -> f64 {
        self.contents[bin]
    }

    pub fn set_bin_content(&mut self, bin: usize, content: f64) {
        self.contents[bin] = content;
    }

    pub fn add_bin_content(&mut self, bin: usize, content: f64) {
        self.contents[bin] += content;
    }

    pub fn contents(&self) -> &[f64] {
        &self.contents
    }

    pub fn set_contents(&mut self, contents: Vec<f64>) -> Result<()> {
        if contents.len() != self.contents.len() {
            return Err(FitError::Dimension(format!(
                "'{}' has {} bins, tried to set {} contents",
                self.name,
                self.contents.len(),
                contents.len()
            )));
        }
        self.contents = contents;
        Ok(())
    }

    pub fn find_bin(&self, values: &[f64]) -> Result<Option<usize>> {
        self.axes.find_bin(values)
    }

    /// Adds `weight` to the bin containing `values`. Returns `false` (and
    /// changes nothing) when the point lies outside the axes.
    pub fn fill(&mut self, values: &[f64], weight: f64) -> Result<bool> {
        match self.axes.find_bin(values)? {
            Some(bin) => {
                self.contents[bin] += weight;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn integral(&self) -> f64 {
        self.contents.iter().sum()
    }

    /// Scales to unit integral. A distribution with zero integral is left as is.
    pub fn normalise(&mut self) {
        let integral = self.integral();
        if integral != 0.0 {
            self.scale(1.0 / integral);
        }
    }

    pub fn scale(&mut self, factor: f64) {
        self.contents.iter_mut().for_each(|c| *c *= factor);
    }

    /// Zeroes every bin.
    pub fn empty(&mut self) {
        self.contents.iter_mut().for_each(|c| *c = 0.0);
    }

    /// Bin-by-bin sum with a distribution of identical binning.
    pub fn add(&mut self, other: &BinnedDistribution) -> Result<()> {
        if self.axes != other.axes {
            return Err(FitError::Dimension(format!(
                "cannot add '{}' to '{}': binning differs",
                other.name, self.name
            )));
        }
        self.contents
            .iter_mut()
            .zip(&other.contents)
            .for_each(|(a, b)| *a += b);
        Ok(())
    }

    /// Projects onto the named axes (in the given order), summing over the rest.
    pub fn marginalise(&self, onto: &[String]) -> Result<BinnedDistribution> {
        let mut dims = Vec::with_capacity(onto.len());
        let mut axes = AxisCollection::new();
        for name in onto {
            let dim = self.axes.index_of(name).ok_or_else(|| {
                FitError::Dimension(format!(
                    "'{}' has no axis '{name}' to marginalise onto (axes: {:?})",
                    self.name,
                    self.axes.names()
                ))
            })?;
            dims.push(dim);
            axes.add_axis(self.axes.axis(dim).clone())?;
        }
        if dims.iter().copied().eq(0..self.n_dims()) {
            return Ok(self.clone());
        }

        let mut out = BinnedDistribution::new(&self.name, axes);
        for (bin, &content) in self.contents.iter().enumerate() {
            let indices = self.axes.unpack_indices(bin);
            let projected: Vec<usize> = dims.iter().map(|&d| indices[d]).collect();
            let target = out.axes.flatten_indices(&projected)?;
            out.contents[target] += content;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn two_d() -> BinnedDistribution {
        let mut axes = AxisCollection::new();
        axes.add_axis(BinAxis::new("x", 0.0, 3.0, 3)).unwrap();
        axes.add_axis(BinAxis::new("y", 0.0, 2.0, 2)).unwrap();
        let mut dist = BinnedDistribution::new("xy", axes);
        dist.set_contents((0..6).map(|i| i as f64).collect()).unwrap();
        dist
    }

    #[test]
    fn axis_find_bin_and_edges() {
        let axis = BinAxis::new("e", 0.0, 10.0, 10);
        assert_eq!(axis.n_bins(), 10);
        assert_eq!(axis.find_bin(0.0), Some(0));
        assert_eq!(axis.find_bin(9.99), Some(9));
        assert_eq!(axis.find_bin(10.0), None);
        assert_eq!(axis.find_bin(-0.1), None);
        assert_eq!(axis.find_bin(f64::NAN), None);
        assert_abs_diff_eq!(axis.centre(3), 3.5);
    }

    #[test]
    fn non_uniform_axis() {
        let axis = BinAxis::from_edges("e", vec![0.0, 1.0, 5.0, 6.0]).unwrap();
        assert_eq!(axis.find_bin(4.9), Some(1));
        assert_abs_diff_eq!(axis.width(1), 4.0);
        assert!(BinAxis::from_edges("bad", vec![0.0, 0.0]).is_err());
    }

    #[test]
    fn axis_equality_is_by_edges() {
        assert_eq!(BinAxis::new("a", 0.0, 1.0, 4), BinAxis::new("b", 0.0, 1.0, 4));
        assert_ne!(BinAxis::new("a", 0.0, 1.0, 4), BinAxis::new("a", 0.0, 1.0, 5));
    }

    #[test]
    fn flat_indices_last_axis_fastest() {
        let dist = two_d();
        let axes = dist.axes();
        assert_eq!(axes.flatten_indices(&[1, 0]).unwrap(), 2);
        assert_eq!(axes.unpack_indices(5), vec![2, 1]);
        assert_eq!(axes.find_bin(&[2.5, 0.5]).unwrap(), Some(4));
    }

    #[test]
    fn duplicate_axis_names_rejected() {
        let mut axes = AxisCollection::new();
        axes.add_axis(BinAxis::new("x", 0.0, 1.0, 1)).unwrap();
        assert!(matches!(
            axes.add_axis(BinAxis::new("x", 0.0, 1.0, 1)),
            Err(FitError::Dimension(_))
        ));
    }

    #[test]
    fn marginalise_sums_other_axes() {
        let dist = two_d();
        let x = dist.marginalise(&["x".to_string()]).unwrap();
        assert_eq!(x.contents(), &[1.0, 5.0, 9.0]);
        let y = dist.marginalise(&["y".to_string()]).unwrap();
        assert_eq!(y.contents(), &[6.0, 9.0]);
        assert!(dist.marginalise(&["z".to_string()]).is_err());
    }

    #[test]
    fn fill_scale_normalise_add() {
        let mut dist = two_d();
        dist.empty();
        assert!(dist.fill(&[0.5, 1.5], 2.0).unwrap());
        assert!(!dist.fill(&[3.5, 1.5], 2.0).unwrap());
        dist.scale(3.0);
        assert_abs_diff_eq!(dist.integral(), 6.0);
        dist.normalise();
        assert_abs_diff_eq!(dist.integral(), 1.0);

        let other = dist.clone();
        dist.add(&other).unwrap();
        assert_abs_diff_eq!(dist.bin_content(1), 2.0);
        assert!(dist.set_contents(vec![0.0; 5]).is_err());
    }
}
