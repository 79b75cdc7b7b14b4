//! Fits a toy energy spectrum (a Gaussian peak on a flat background, with an
//! uncertain energy scale) by MCMC and cross-checks the normalisations with a
//! grid search.
//!
//! Set `RUST_LOG=debug` for per-evaluation output.

use std::error::Error;

use binfit::fit_result::{Optimiser, ParameterBounds};
use binfit::grid_search::GridSearch;
use binfit::histogram::{AxisCollection, BinAxis, BinnedDistribution};
use binfit::mcmc::{run_chains, Mcmc, MetropolisSampler};
use binfit::parameters::ParameterDict;
use binfit::systematics::Scale;
use binfit::templates::NormFittingStatus;
use binfit::teststat::BinnedNll;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Poisson};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing_subscriber::EnvFilter;

const SEED: u64 = 42;
const N_BINS: usize = 40;
const N_CHAINS: usize = 4;
const TRUE_SIGNAL: f64 = 1_500.0;
const TRUE_BACKGROUND: f64 = 4_000.0;

fn energy_axis() -> BinAxis {
    BinAxis::new("energy", 0.0, 8.0, N_BINS)
}

/// Unit-integral templates: a peak at 3 MeV and a flat background.
fn templates() -> Result<(BinnedDistribution, BinnedDistribution), Box<dyn Error>> {
    let axis = energy_axis();
    let mut axes = AxisCollection::new();
    axes.add_axis(axis.clone())?;

    let peak = Normal::new(3.0, 0.4)?;
    let mut signal = BinnedDistribution::new("signal", axes.clone());
    signal.set_contents(
        (0..N_BINS)
            .map(|b| peak.cdf(axis.high_edge(b)) - peak.cdf(axis.low_edge(b)))
            .collect(),
    )?;
    signal.normalise();

    let mut background = BinnedDistribution::new("background", axes);
    background.set_contents(vec![1.0; N_BINS])?;
    background.normalise();
    Ok((signal, background))
}

fn pseudo_data(
    signal: &BinnedDistribution,
    background: &BinnedDistribution,
) -> Result<BinnedDistribution, Box<dyn Error>> {
    let mut rng = SmallRng::seed_from_u64(SEED);
    let mut data = signal.clone();
    data.set_name("data");
    let mut contents = Vec::with_capacity(N_BINS);
    for b in 0..N_BINS {
        let expected =
            TRUE_SIGNAL * signal.bin_content(b) + TRUE_BACKGROUND * background.bin_content(b);
        contents.push(Poisson::new(expected)?.sample(&mut rng));
    }
    data.set_contents(contents)?;
    Ok(data)
}

fn build_nll() -> binfit::Result<BinnedNll> {
    let (signal, background) = templates().map_err(|e| {
        binfit::FitError::Configuration(format!("spectral_fit: template construction failed: {e}"))
    })?;
    let data = pseudo_data(&signal, &background).map_err(|e| {
        binfit::FitError::Configuration(format!("spectral_fit: data generation failed: {e}"))
    })?;

    let mut nll = BinnedNll::new();
    nll.add_template(&signal, &["signal_only"], NormFittingStatus::Direct)?;
    nll.add_template(&background, &[], NormFittingStatus::Direct)?;
    nll.add_systematic_to_group(Box::new(Scale::new("escale", energy_axis())), "signal_only")?;
    nll.set_constraint("escale_scale", 1.0, 0.02)?;
    nll.set_buffer("energy", 2, 2);
    nll.set_data_dist(&data);
    Ok(nll)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let bounds = ParameterBounds::new()
        .with("signal_norm", 0.0, 4_000.0)?
        .with("background_norm", 0.0, 8_000.0)?
        .with("escale_scale", 0.9, 1.1)?;
    let widths: ParameterDict = [
        ("signal_norm".to_string(), 30.0),
        ("background_norm".to_string(), 50.0),
        ("escale_scale".to_string(), 0.005),
    ]
    .into_iter()
    .collect();
    let initial: ParameterDict = [
        ("signal_norm".to_string(), 1_000.0),
        ("background_norm".to_string(), 5_000.0),
        ("escale_scale".to_string(), 1.0),
    ]
    .into_iter()
    .collect();

    let mcmc = Mcmc::new(MetropolisSampler::new(widths)?)
        .set_max_iter(20_000)
        .set_burn_in(2_000)
        .set_thin_factor(5)
        .set_flip_sign(true)
        .set_bounds(bounds)
        .set_initial_trial(initial)
        .set_save_chain(true)
        .set_progress(true)
        .set_seed(SEED);

    let chains = run_chains(&mcmc, N_CHAINS, |_| build_nll())?;
    for (i, chain) in chains.iter().enumerate() {
        let samples = chain.samples().ok_or("chain produced no samples")?;
        let raw = samples.raw_samples()?;
        println!(
            "Chain {i}: kept {} samples, acceptance rate {:.3}",
            samples.kept_samples(),
            samples.acceptance_rate()
        );
        for (col, name) in samples.parameter_names().iter().enumerate() {
            let column = raw.column(col);
            let mean = column.mean().unwrap_or(f64::NAN);
            let sd = column.std(1.0);
            println!("  {name:<16} {mean:>10.3} +/- {sd:.3}");
        }
        if let Some(result) = chain.fit_result() {
            print!("{result}");
        }
    }

    #[cfg(feature = "csv")]
    {
        let all: Vec<_> = chains.iter().filter_map(|c| c.samples()).collect();
        binfit::io::save_samples_csv(&all, "spectral_fit_samples.csv")?;
        if let Some(first) = all.first() {
            binfit::io::save_chain_csv(first, "spectral_fit_chain.csv")?;
        }
        println!("Saved samples to spectral_fit_samples.csv");
    }

    // cross-check: coarse grid with the energy scale pinned near nominal
    let grid_bounds = ParameterBounds::new()
        .with("signal_norm", 1_000.0, 2_000.0)?
        .with("background_norm", 3_500.0, 4_500.0)?
        .with("escale_scale", 0.99, 1.01)?;
    let mut grid = GridSearch::new(grid_bounds)
        .set_step_size("signal_norm", 25.0)
        .set_step_size("background_norm", 25.0)
        .set_step_size("escale_scale", 0.01);
    let mut nll = build_nll()?;
    let result = grid.optimise(&mut nll)?;
    println!("Grid search:\n{result}");
    println!("Truth: signal_norm = {TRUE_SIGNAL}, background_norm = {TRUE_BACKGROUND}");
    Ok(())
}
