//! Edge buffering of binned distributions.
//!
//! Systematics acting near the ends of an axis need a margin of bins to move
//! content into and out of. The [`Shrinker`] removes those margins before the
//! likelihood is computed, either dropping their content (truncation, the
//! default) or folding it into the first/last retained bin (overflow mode).

use std::collections::BTreeMap;

use crate::error::{FitError, Result};
use crate::histogram::{AxisCollection, BinAxis, BinnedDistribution};

#[derive(Debug, Clone, Default)]
pub struct Shrinker {
    /// (lower, upper) buffer sizes in bins, keyed by axis name.
    buffers: BTreeMap<String, (usize, usize)>,
    /// Destination flat index for every original bin.
    bin_map: Vec<usize>,
    /// Whether the original bin's content survives the shrink.
    use_content: Vec<bool>,
    using_overflows: bool,
    new_axes: Option<AxisCollection>,
}

impl Shrinker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Axis keeping bins `[lower, n_bins - upper)` of `axis`.
    pub fn shrink_axis(axis: &BinAxis, lower: usize, upper: usize) -> Result<BinAxis> {
        if lower + upper >= axis.n_bins() {
            return Err(FitError::Dimension(format!(
                "Shrinker: buffers ({lower}, {upper}) leave no bins on axis '{}' with {} bins",
                axis.name(),
                axis.n_bins()
            )));
        }
        Ok(axis.slice(lower, axis.n_bins() - lower - upper))
    }

    pub fn set_buffer(&mut self, dim: &str, lower: usize, upper: usize) {
        self.buffers.insert(dim.to_string(), (lower, upper));
    }

    /// Buffer for `dim`, `(0, 0)` if none was set.
    pub fn buffer(&self, dim: &str) -> (usize, usize) {
        self.buffers.get(dim).copied().unwrap_or((0, 0))
    }

    pub fn buffers(&self) -> &BTreeMap<String, (usize, usize)> {
        &self.buffers
    }

    pub fn set_using_overflows(&mut self, using_overflows: bool) {
        self.using_overflows = using_overflows;
    }

    pub fn using_overflows(&self) -> bool {
        self.using_overflows
    }

    /// Precomputes where every bin of `dist` lands after shrinking.
    ///
    /// The overflow switch is read here, not in [`Shrinker::shrink_dist`].
    /// The map is not invalidated automatically: call this again after
    /// changing buffers, the overflow switch or the axes.
    pub fn set_bin_map(&mut self, dist: &BinnedDistribution) -> Result<()> {
        let old_axes = dist.axes();
        let mut new_axes = AxisCollection::new();
        let mut limits = Vec::with_capacity(old_axes.n_dims());
        for axis in old_axes.axes() {
            let (lower, upper) = self.buffer(axis.name());
            new_axes.add_axis(Self::shrink_axis(axis, lower, upper)?)?;
            limits.push((lower, axis.n_bins() - upper));
        }

        let n_bins = old_axes.n_bins();
        self.bin_map = Vec::with_capacity(n_bins);
        self.use_content = Vec::with_capacity(n_bins);
        for bin in 0..n_bins {
            let old_indices = old_axes.unpack_indices(bin);
            let mut in_buffer = false;
            let new_indices: Vec<usize> = old_indices
                .iter()
                .zip(&limits)
                .map(|(&idx, &(first, end))| {
                    if idx < first {
                        in_buffer = true;
                        0
                    } else if idx >= end {
                        in_buffer = true;
                        end - first - 1
                    } else {
                        idx - first
                    }
                })
                .collect();
            self.bin_map.push(new_axes.flatten_indices(&new_indices)?);
            self.use_content.push(!in_buffer || self.using_overflows);
        }
        self.new_axes = Some(new_axes);
        Ok(())
    }

    /// Applies the precomputed bin map. Without any buffers this is a copy.
    pub fn shrink_dist(&self, dist: &BinnedDistribution) -> Result<BinnedDistribution> {
        if self.buffers.is_empty() {
            return Ok(dist.clone());
        }
        let new_axes = self.new_axes.as_ref().ok_or_else(|| {
            FitError::Logic("Shrinker: shrink_dist called before set_bin_map".to_string())
        })?;
        if dist.n_bins() != self.bin_map.len() {
            return Err(FitError::Dimension(format!(
                "Shrinker: '{}' has {} bins but the bin map was built for {}",
                dist.name(),
                dist.n_bins(),
                self.bin_map.len()
            )));
        }

        let mut shrunk = BinnedDistribution::new(dist.name(), new_axes.clone());
        for (bin, &content) in dist.contents().iter().enumerate() {
            if self.use_content[bin] {
                shrunk.add_bin_content(self.bin_map[bin], content);
            }
        }
        Ok(shrunk)
    }
}
