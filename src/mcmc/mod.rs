/*!
# Markov-chain Monte-Carlo over a test statistic

[`Mcmc`] explores the parameters of a [`TestStatistic`] with a pluggable
proposal ([`McSampler`]) and a Metropolis accept/reject rule inside box
bounds. Each run moves through three states: configuration
(`Initializing`), the propose/evaluate/record loop (`Sampling`) and the
finished chain (`Terminal`), whose results are read through
[`Mcmc::samples`] and [`Mcmc::fit_result`].

The test statistic is read as a log-likelihood by default (higher is
better). For a negative log-likelihood such as [`BinnedNll`](crate::teststat::BinnedNll)
enable [`Mcmc::set_flip_sign`].

Independent chains run in parallel with [`run_chains`], each with its own
test statistic built by a factory, since a test statistic is not reentrant.

# Example

```rust
use binfit::fit_result::{Optimiser, ParameterBounds};
use binfit::histogram::{AxisCollection, BinAxis, BinnedDistribution};
use binfit::mcmc::{Mcmc, MetropolisSampler};
use binfit::templates::NormFittingStatus;
use binfit::teststat::BinnedNll;

let mut axes = AxisCollection::new();
axes.add_axis(BinAxis::new("energy", 0.0, 10.0, 10)).unwrap();
let mut signal = BinnedDistribution::new("signal", axes);
signal.set_contents(vec![50.0; 10]).unwrap();
let mut data = signal.clone();
data.scale(2.0);

let mut nll = BinnedNll::new();
nll.add_template(&signal, &[], NormFittingStatus::Direct).unwrap();
nll.set_data_dist(&data);

let widths = [("signal_norm".to_string(), 0.05)].into_iter().collect();
let sampler = MetropolisSampler::new(widths).unwrap();
let mut mcmc = Mcmc::new(sampler)
    .set_max_iter(2_000)
    .set_burn_in(500)
    .set_flip_sign(true)
    .set_bounds(ParameterBounds::new().with("signal_norm", 0.0, 10.0).unwrap())
    .set_initial_trial([("signal_norm".to_string(), 1.0)].into_iter().collect())
    .set_seed(42);

let result = mcmc.optimise(&mut nll).unwrap();
assert!((result.best_fit["signal_norm"] - 2.0).abs() < 0.1);
assert_eq!(mcmc.samples().unwrap().kept_samples(), 1_500);
```
*/

mod autocorrelation;
mod samples;
mod sampler;

pub use autocorrelation::AutoCorrelationCalc;
pub use samples::{ChainStep, McmcSamples};
pub use sampler::{McSampler, MetropolisSampler};

use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rand::prelude::*;
use rayon::prelude::*;

use crate::error::{FitError, Result};
use crate::fit_result::{FitResult, Optimiser, ParameterBounds};
use crate::histogram::{AxisCollection, BinAxis};
use crate::parameters::ParameterDict;
use crate::teststat::TestStatistic;

/// Default number of iterations per chain.
pub const DEFAULT_MAX_ITER: usize = 100_000;
/// Default number of leading iterations not kept.
pub const DEFAULT_BURN_IN: usize = 1_000;
/// Default lag horizon of the autocorrelation tracker.
pub const DEFAULT_AUTOCORRELATION_WINDOW: usize = 1_000;
/// Bins per parameter of the automatic projection axes.
pub const DEFAULT_HISTOGRAM_BINS: usize = 100;

const UPDATE_INTERVAL: Duration = Duration::from_millis(500);

/// Lifecycle of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McmcState {
    Initializing,
    Sampling,
    Terminal,
}

#[derive(Debug, Clone)]
pub struct Mcmc<S: McSampler> {
    sampler: S,
    max_iter: usize,
    burn_in: usize,
    thin_factor: usize,
    autocorrelation_window: usize,
    flip_sign: bool,
    test_stat_logged: bool,
    save_full_histogram: bool,
    save_chain: bool,
    show_progress: bool,
    bounds: ParameterBounds,
    initial_trial: ParameterDict,
    histogram_axes: Option<AxisCollection>,
    seed: u64,
    rng: SmallRng,
    state: McmcState,
    samples: Option<McmcSamples>,
    fit_result: Option<FitResult>,
}

impl<S: McSampler> Mcmc<S> {
    pub fn new(sampler: S) -> Self {
        let seed = thread_rng().gen::<u64>();
        Self {
            sampler,
            max_iter: DEFAULT_MAX_ITER,
            burn_in: DEFAULT_BURN_IN,
            thin_factor: 1,
            autocorrelation_window: DEFAULT_AUTOCORRELATION_WINDOW,
            flip_sign: false,
            test_stat_logged: true,
            save_full_histogram: false,
            save_chain: false,
            show_progress: false,
            bounds: ParameterBounds::new(),
            initial_trial: ParameterDict::new(),
            histogram_axes: None,
            seed,
            rng: SmallRng::seed_from_u64(seed),
            state: McmcState::Initializing,
            samples: None,
            fit_result: None,
        }
    }

    pub fn set_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn set_burn_in(mut self, burn_in: usize) -> Self {
        self.burn_in = burn_in;
        self
    }

    /// Keep every `thin_factor`-th iteration after burn-in.
    pub fn set_thin_factor(mut self, thin_factor: usize) -> Self {
        self.thin_factor = thin_factor;
        self
    }

    pub fn set_autocorrelation_window(mut self, window: usize) -> Self {
        self.autocorrelation_window = window;
        self
    }

    /// Treat lower test-statistic values as better.
    pub fn set_flip_sign(mut self, flip_sign: bool) -> Self {
        self.flip_sign = flip_sign;
        self
    }

    /// Whether the test statistic is a log-likelihood (acceptance on the
    /// difference) or a likelihood (acceptance on the ratio).
    pub fn set_test_stat_logged(mut self, logged: bool) -> Self {
        self.test_stat_logged = logged;
        self
    }

    pub fn set_save_full_histogram(mut self, save: bool) -> Self {
        self.save_full_histogram = save;
        self
    }

    pub fn set_save_chain(mut self, save: bool) -> Self {
        self.save_chain = save;
        self
    }

    /// Show an `indicatif` progress bar while sampling.
    pub fn set_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Box limits; proposals outside are rejected without evaluation.
    pub fn set_bounds(mut self, bounds: ParameterBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn set_initial_trial(mut self, initial: ParameterDict) -> Self {
        self.initial_trial = initial;
        self
    }

    /// Axes of the projections. Defaults to 100 bins over each parameter's bounds.
    pub fn set_histogram_axes(mut self, axes: AxisCollection) -> Self {
        self.histogram_axes = Some(axes);
        self
    }

    /// Seeds the acceptance draws and the sampler.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self.sampler.reseed(seed.wrapping_add(0x9E37_79B9_7F4A_7C15));
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn state(&self) -> McmcState {
        self.state
    }

    pub fn test_stat_logged(&self) -> bool {
        self.test_stat_logged
    }

    pub fn max_iter(&self) -> usize {
        self.max_iter
    }

    pub fn burn_in(&self) -> usize {
        self.burn_in
    }

    pub fn thin_factor(&self) -> usize {
        self.thin_factor
    }

    /// Samples of the finished chain.
    pub fn samples(&self) -> Option<&McmcSamples> {
        self.samples.as_ref()
    }

    pub fn fit_result(&self) -> Option<&FitResult> {
        self.fit_result.as_ref()
    }

    pub fn acceptance_rate(&self) -> f64 {
        self.samples.as_ref().map_or(0.0, McmcSamples::acceptance_rate)
    }

    pub fn rejection_rate(&self) -> f64 {
        self.samples.as_ref().map_or(0.0, McmcSamples::rejection_rate)
    }

    fn histogram_axes_for(&self, names: &[String]) -> Result<AxisCollection> {
        if let Some(axes) = &self.histogram_axes {
            return Ok(axes.clone());
        }
        let mut axes = AxisCollection::new();
        for name in names {
            let (min, max) = match (self.bounds.min(name), self.bounds.max(name)) {
                (Some(min), Some(max)) => (min, max),
                _ => continue,
            };
            axes.add_axis(BinAxis::new(name, min, max, DEFAULT_HISTOGRAM_BINS))?;
        }
        Ok(axes)
    }

    /// Whether to move from a point with value `current` to one with `proposed`,
    /// both already sign-adjusted.
    fn step_accepted(&mut self, current: f64, proposed: f64, correction: f64) -> bool {
        let u: f64 = self.rng.gen();
        if self.test_stat_logged {
            let log_ratio = proposed - current + correction;
            log_ratio >= 0.0 || u.ln() < log_ratio
        } else {
            let ratio = proposed / current * correction.exp();
            ratio >= 1.0 || u < ratio
        }
    }

    fn prepare(&mut self, stat: &dyn TestStatistic) -> Result<Vec<String>> {
        if self.state != McmcState::Initializing {
            return Err(FitError::Logic(
                "Mcmc: chain has already been run, build a new one".to_string(),
            ));
        }
        let names: Vec<String> = stat.parameter_names()?.into_iter().collect();
        self.bounds.check_covers(&names.iter().cloned().collect())?;
        if let Some(missing) = names.iter().find(|n| !self.initial_trial.contains_key(*n)) {
            return Err(FitError::Configuration(format!(
                "Mcmc: no initial value for '{missing}'"
            )));
        }
        if let Some(unknown) = self.initial_trial.keys().find(|n| !names.contains(n)) {
            return Err(FitError::Configuration(format!(
                "Mcmc: initial value given for unknown parameter '{unknown}'"
            )));
        }
        if !self.bounds.contains(&self.initial_trial) {
            return Err(FitError::Configuration(format!(
                "Mcmc: initial trial {:?} lies outside the bounds",
                self.initial_trial
            )));
        }
        Ok(names)
    }

    fn run(&mut self, stat: &mut dyn TestStatistic, pb: Option<&ProgressBar>) -> Result<FitResult> {
        let names = self.prepare(stat)?;
        let axes = self.histogram_axes_for(&names)?;
        let mut samples = McmcSamples::new(
            names.clone(),
            axes,
            self.burn_in,
            self.thin_factor,
            self.autocorrelation_window,
        )?
        .set_save_full_histogram(self.save_full_histogram)
        .set_save_chain(self.save_chain);

        self.state = McmcState::Sampling;
        let result = self.sample(stat, &mut samples, pb);
        self.state = McmcState::Terminal;
        self.samples = Some(samples);
        let result = result?;
        self.fit_result = Some(result.clone());
        Ok(result)
    }

    fn sample(
        &mut self,
        stat: &mut dyn TestStatistic,
        samples: &mut McmcSamples,
        pb: Option<&ProgressBar>,
    ) -> Result<FitResult> {
        let sign = if self.flip_sign { -1.0 } else { 1.0 };
        let mut current = self.initial_trial.clone();
        let mut current_raw = stat.evaluate_at(&current)?;
        let mut n_evaluations = 1;
        let mut n_failed = 0_usize;
        let mut best = (current.clone(), current_raw);

        tracing::info!(
            max_iter = self.max_iter,
            burn_in = self.burn_in,
            thin_factor = self.thin_factor,
            n_parameters = current.len(),
            "mcmc chain started"
        );
        if let Some(pb) = pb {
            pb.set_length(self.max_iter as u64);
        }
        let mut last_update = Instant::now();

        for step in 0..self.max_iter {
            let proposed = self.sampler.draw(&current);
            let mut accepted = false;
            if self.bounds.contains(&proposed) {
                n_evaluations += 1;
                match stat.evaluate_at(&proposed) {
                    Ok(raw) => {
                        let correction = self.sampler.correction(&current, &proposed);
                        if self.step_accepted(sign * current_raw, sign * raw, correction) {
                            accepted = true;
                            if sign * raw > sign * best.1 {
                                best = (proposed.clone(), raw);
                            }
                            current = proposed;
                            current_raw = raw;
                        }
                    }
                    Err(e) if e.is_statistical() => {
                        n_failed += 1;
                        tracing::warn!(step, error = %e, "proposal rejected");
                    }
                    Err(e) => return Err(e),
                }
            }
            samples.fill(&current, current_raw, accepted)?;

            if let Some(pb) = pb {
                if last_update.elapsed() >= UPDATE_INTERVAL || step + 1 == self.max_iter {
                    pb.set_position(step as u64 + 1);
                    pb.set_message(format!("AcceptRate={:.3}", samples.acceptance_rate()));
                    last_update = Instant::now();
                }
            }
        }

        tracing::info!(
            acceptance_rate = samples.acceptance_rate(),
            kept = samples.kept_samples(),
            n_failed,
            best = best.1,
            "mcmc chain finished"
        );
        let (best_fit, statistic) = best;
        stat.set_parameters(&best_fit)?;
        Ok(
            FitResult::new(best_fit, statistic, true, n_evaluations).with_projections(
                samples.projections_1d().clone(),
                samples.projections_2d().clone(),
            ),
        )
    }
}

impl<S: McSampler> Optimiser for Mcmc<S> {
    fn optimise(&mut self, stat: &mut dyn TestStatistic) -> Result<FitResult> {
        if !self.show_progress {
            return self.run(stat, None);
        }
        let pb = ProgressBar::new(self.max_iter as u64);
        pb.set_style(progress_style());
        pb.set_prefix("Chain");
        let result = self.run(stat, Some(&pb));
        pb.finish_with_message("Done!");
        result
    }
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/**
Runs `n_chains` independent copies of `mcmc` in parallel.

Chain `i` is seeded with `mcmc.seed() + i` and gets its own test statistic
from `make_stat(i)`. The finished chains are returned in index order.
*/
pub fn run_chains<S, T, F>(mcmc: &Mcmc<S>, n_chains: usize, make_stat: F) -> Result<Vec<Mcmc<S>>>
where
    S: McSampler + Clone + Sync,
    T: TestStatistic,
    F: Fn(usize) -> Result<T> + Sync,
{
    let multi = mcmc.show_progress.then(MultiProgress::new);
    let style = progress_style();

    (0..n_chains)
        .into_par_iter()
        .map(|i| {
            let mut chain = mcmc.clone().set_seed(mcmc.seed.wrapping_add(i as u64));
            let mut stat = make_stat(i)?;
            match &multi {
                Some(multi) => {
                    let pb = multi.add(ProgressBar::new(chain.max_iter as u64));
                    pb.set_prefix(format!("Chain {i}"));
                    pb.set_style(style.clone());
                    let result = chain.run(&mut stat, Some(&pb));
                    pb.finish_with_message("Done!");
                    result?;
                }
                None => {
                    chain.run(&mut stat, None)?;
                }
            }
            Ok(chain)
        })
        .collect()
}
