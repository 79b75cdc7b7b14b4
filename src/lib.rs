/*!
# binfit

Binned maximum-likelihood fitting of template histograms to data, with a
per-bin Barlow-Beeston treatment of finite template statistics,
parameterised systematic distortions, Gaussian constraints and a
Metropolis MCMC explorer over the resulting likelihood.

A typical fit builds a [`teststat::BinnedNll`] from templates
([`histogram::BinnedDistribution`]), systematics ([`systematics`]),
data ([`data`]) and constraints ([`constraints`]), then hands it to an
[`fit_result::Optimiser`]: [`mcmc::Mcmc`] or [`grid_search::GridSearch`].
*/

pub mod constraints;
pub mod data;
pub mod error;
pub mod fit_result;
pub mod grid_search;
pub mod histogram;
#[cfg(feature = "csv")]
pub mod io;
pub mod mcmc;
pub mod parameters;
pub mod shrinker;
pub mod systematics;
pub mod templates;
pub mod teststat;

pub use error::{FitError, Result};
