/*!
# Event data and selection cuts

Unbinned data enters the fit through the [`DataSet`] trait. Before the first
evaluation the likelihood bins it with [`fill_dist`], dropping events that
fail a [`CutCollection`] and recording which cut removed each of them in a
[`CutLog`].

```rust
use binfit::data::{fill_dist, BoxCut, CutCollection, CutLog, OwnedDataSet};
use binfit::histogram::{AxisCollection, BinAxis, BinnedDistribution};

let mut data = OwnedDataSet::new(&["energy"]);
for e in [0.5, 1.5, 2.5, 7.5] {
    data.add_entry(&[e]).unwrap();
}
let mut cuts = CutCollection::new();
cuts.add_cut(Box::new(BoxCut::new("window", "energy", 0.0, 5.0)));

let mut axes = AxisCollection::new();
axes.add_axis(BinAxis::new("energy", 0.0, 10.0, 10)).unwrap();
let mut dist = BinnedDistribution::new("data", axes);
let mut log = CutLog::new(cuts.names());
fill_dist(&mut dist, &data, &cuts, &mut log).unwrap();

assert_eq!(dist.integral(), 3.0);
assert_eq!(log.removed_by("window"), Some(1));
```
*/

use std::fmt;


use crate::error::{FitError, Result};
use crate::histogram::BinnedDistribution;

/// Read-only access to a table of events.
pub trait DataSet: Send + Sync {
    /// Column names, in entry order.
    fn observables(&self) -> &[String];

    fn n_entries(&self) -> usize;

    /// Values of event `index`, one per observable.
    fn entry(&self, index: usize) -> Result<Event<'_>>;
}

/// One event of a [`DataSet`], with values looked up by observable name.
#[derive(Debug, Clone, Copy)]
pub struct Event<'a> {
    observables: &'a [String],
    values: &'a [f64],
}

impl<'a> Event<'a> {
    pub fn new(observables: &'a [String], values: &'a [f64]) -> Self {
        Self {
            observables,
            values,
        }
    }

    pub fn values(&self) -> &[f64] {
        self.values
    }

    pub fn value(&self, observable: &str) -> Result<f64> {
        self.observables
            .iter()
            .position(|o| o == observable)
            .map(|i| self.values[i])
            .ok_or_else(|| {
                FitError::Dimension(format!(
                    "event has no observable '{observable}' (has {:?})",
                    self.observables
                ))
            })
    }
}

/// In-memory data set, entries stored row-major.
#[derive(Debug, Clone, Default)]
pub struct OwnedDataSet {
    observables: Vec<String>,
    values: Vec<f64>,
}

impl OwnedDataSet {
    pub fn new(observables: &[&str]) -> Self {
        Self {
            observables: observables.iter().map(|o| o.to_string()).collect(),
            values: Vec::new(),
        }
    }

    pub fn add_entry(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.observables.len() {
            return Err(FitError::Dimension(format!(
                "entry has {} values for {} observables",
                values.len(),
                self.observables.len()
            )));
        }
        self.values.extend_from_slice(values);
        Ok(())
    }
}

impl DataSet for OwnedDataSet {
    fn observables(&self) -> &[String] {
        &self.observables
    }

    fn n_entries(&self) -> usize {
        if self.observables.is_empty() {
            0
        } else {
            self.values.len() / self.observables.len()
        }
    }

    fn entry(&self, index: usize) -> Result<Event<'_>> {
        let width = self.observables.len();
        let row = self
            .values
            .get(index * width..(index + 1) * width)
            .ok_or_else(|| {
                FitError::Dimension(format!(
                    "entry {index} out of range, data set has {} entries",
                    self.n_entries()
                ))
            })?;
        Ok(Event::new(&self.observables, row))
    }
}

/// An event selection.
pub trait Cut: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn passes(&self, event: &Event<'_>) -> Result<bool>;
}

/// Keeps events with `lower <= value <= upper`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxCut {
    name: String,
    observable: String,
    lower: f64,
    upper: f64,
}

impl BoxCut {
    pub fn new(name: &str, observable: &str, lower: f64, upper: f64) -> Self {
        Self {
            name: name.to_string(),
            observable: observable.to_string(),
            lower,
            upper,
        }
    }
}

impl Cut for BoxCut {
    fn name(&self) -> &str {
        &self.name
    }

    fn passes(&self, event: &Event<'_>) -> Result<bool> {
        let x = event.value(&self.observable)?;
        Ok(x >= self.lower && x <= self.upper)
    }
}

/// Which side of a [`LineCut`] survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Above,
    Below,
}

/// Keeps events strictly above or strictly below a threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct LineCut {
    name: String,
    observable: String,
    threshold: f64,
    side: Side,
}

impl LineCut {
    pub fn new(name: &str, observable: &str, threshold: f64, side: Side) -> Self {
        Self {
            name: name.to_string(),
            observable: observable.to_string(),
            threshold,
            side,
        }
    }
}

impl Cut for LineCut {
    fn name(&self) -> &str {
        &self.name
    }

    fn passes(&self, event: &Event<'_>) -> Result<bool> {
        let x = event.value(&self.observable)?;
        Ok(match self.side {
            Side::Above => x > self.threshold,
            Side::Below => x < self.threshold,
        })
    }
}

/// Cuts applied in insertion order; an event is removed by the first it fails.
#[derive(Debug, Default)]
pub struct CutCollection {
    cuts: Vec<Box<dyn Cut>>,
}

impl CutCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cut(&mut self, cut: Box<dyn Cut>) {
        self.cuts.push(cut);
    }

    pub fn names(&self) -> Vec<String> {
        self.cuts.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.cuts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }

    /// Index of the first cut `event` fails, or `None` if it passes them all.
    pub fn first_failed(&self, event: &Event<'_>) -> Result<Option<usize>> {
        for (i, cut) in self.cuts.iter().enumerate() {
            if !cut.passes(event)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }
}

/// Per-cut tally of removed events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CutLog {
    names: Vec<String>,
    removed: Vec<usize>,
    total: usize,
}

impl CutLog {
    pub fn new(names: Vec<String>) -> Self {
        let removed = vec![0; names.len()];
        Self {
            names,
            removed,
            total: 0,
        }
    }

    pub fn record_pass(&mut self) {
        self.total += 1;
    }

    pub fn record_fail(&mut self, cut: usize) {
        self.total += 1;
        if let Some(count) = self.removed.get_mut(cut) {
            *count += 1;
        }
    }

    pub fn removed_by(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.removed[i])
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        self.total - self.removed.iter().sum::<usize>()
    }

    /// Fraction of events surviving every cut (1 for an empty log).
    pub fn efficiency(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.remaining() as f64 / self.total as f64
        }
    }
}

impl fmt::Display for CutLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<20} {:>10} {:>10}", "cut", "removed", "remaining")?;
        let mut remaining = self.total;
        for (name, removed) in self.names.iter().zip(&self.removed) {
            remaining -= removed;
            writeln!(f, "{name:<20} {removed:>10} {remaining:>10}")?;
        }
        Ok(())
    }
}

/// Bins every event of `data` passing `cuts` into `dist`, reading the
/// observables named by `dist`'s axes. Events outside the axes are ignored.
pub fn fill_dist(
    dist: &mut BinnedDistribution,
    data: &dyn DataSet,
    cuts: &CutCollection,
    log: &mut CutLog,
) -> Result<()> {
    let observables = dist.observables();
    let mut values = vec![0.0; observables.len()];
    for i in 0..data.n_entries() {
        let event = data.entry(i)?;
        if let Some(cut) = cuts.first_failed(&event)? {
            log.record_fail(cut);
            continue;
        }
        log.record_pass();
        for (v, name) in values.iter_mut().zip(&observables) {
            *v = event.value(name)?;
        }
        dist.fill(&values, 1.0)?;
    }
    tracing::info!(
        dist = dist.name(),
        kept = log.remaining(),
        total = log.total(),
        integral = dist.integral(),
        "data set binned"
    );
    Ok(())
}
