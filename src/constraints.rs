//! Gaussian penalty terms on fit parameters.

use std::collections::BTreeMap;

use crate::error::{FitError, Result};
use crate::parameters::ParameterDict;

/// One prior-knowledge penalty. Every variant evaluates to a negative
/// log-likelihood contribution (no normalisation constants).
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// `(x - mean)^2 / (2 sigma^2)`, with `sigma_lo` used below the mean
    /// and `sigma_hi` above it.
    Gaussian {
        name: String,
        mean: f64,
        sigma_lo: f64,
        sigma_hi: f64,
    },
    /// Bivariate Gaussian over two parameters with correlation coefficient.
    Correlated {
        name_1: String,
        mean_1: f64,
        sigma_1: f64,
        name_2: String,
        mean_2: f64,
        sigma_2: f64,
        correlation: f64,
    },
    /// Gaussian on the ratio `value(name_1) / value(name_2)`.
    Ratio {
        name_1: String,
        name_2: String,
        ratio_mean: f64,
        ratio_sigma: f64,
    },
}

impl Constraint {
    pub fn penalty(&self, params: &ParameterDict) -> Result<f64> {
        match self {
            Constraint::Gaussian {
                name,
                mean,
                sigma_lo,
                sigma_hi,
            } => {
                let x = lookup(params, name)?;
                let sigma = if x < *mean { sigma_lo } else { sigma_hi };
                Ok((x - mean).powi(2) / (2.0 * sigma * sigma))
            }
            Constraint::Correlated {
                name_1,
                mean_1,
                sigma_1,
                name_2,
                mean_2,
                sigma_2,
                correlation,
            } => {
                let z1 = (lookup(params, name_1)? - mean_1) / sigma_1;
                let z2 = (lookup(params, name_2)? - mean_2) / sigma_2;
                let rho = *correlation;
                Ok((z1 * z1 + z2 * z2 - 2.0 * rho * z1 * z2) / (2.0 * (1.0 - rho * rho)))
            }
            Constraint::Ratio {
                name_1,
                name_2,
                ratio_mean,
                ratio_sigma,
            } => {
                let denominator = lookup(params, name_2)?;
                if denominator == 0.0 {
                    return Err(FitError::Statistical(format!(
                        "ratio constraint {name_1}/{name_2}: '{name_2}' is zero"
                    )));
                }
                let ratio = lookup(params, name_1)? / denominator;
                Ok((ratio - ratio_mean).powi(2) / (2.0 * ratio_sigma * ratio_sigma))
            }
        }
    }
}

fn lookup(params: &ParameterDict, name: &str) -> Result<f64> {
    params.get(name).copied().ok_or_else(|| {
        FitError::Parameter(format!(
            "constraint on '{name}' but no such parameter is registered"
        ))
    })
}

/// A pair constraint is stored once per unordered pair of names.
fn pair_key(kind: Kind, a: &str, b: &str) -> (Kind, String, String) {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    (kind, lo.to_string(), hi.to_string())
}

fn check_sigma(sigma: f64, what: &str) -> Result<()> {
    if sigma > 0.0 && sigma.is_finite() {
        Ok(())
    } else {
        Err(FitError::Configuration(format!(
            "constraint width for {what} must be positive and finite, got {sigma}"
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Kind {
    Gaussian,
    Correlated,
    Ratio,
}

/// All constraints of a fit, keyed so that re-setting overwrites.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    constraints: BTreeMap<(Kind, String, String), Constraint>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Symmetric Gaussian constraint.
    pub fn set_constraint(&mut self, name: &str, mean: f64, sigma: f64) -> Result<()> {
        self.set_asymmetric_constraint(name, mean, sigma, sigma)
    }

    pub fn set_asymmetric_constraint(
        &mut self,
        name: &str,
        mean: f64,
        sigma_lo: f64,
        sigma_hi: f64,
    ) -> Result<()> {
        check_sigma(sigma_lo, name)?;
        check_sigma(sigma_hi, name)?;
        self.constraints.insert(
            (Kind::Gaussian, name.to_string(), String::new()),
            Constraint::Gaussian {
                name: name.to_string(),
                mean,
                sigma_lo,
                sigma_hi,
            },
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_correlated_constraint(
        &mut self,
        name_1: &str,
        mean_1: f64,
        sigma_1: f64,
        name_2: &str,
        mean_2: f64,
        sigma_2: f64,
        correlation: f64,
    ) -> Result<()> {
        check_sigma(sigma_1, name_1)?;
        check_sigma(sigma_2, name_2)?;
        if !(correlation > -1.0 && correlation < 1.0) {
            return Err(FitError::Configuration(format!(
                "correlation between '{name_1}' and '{name_2}' must lie in (-1, 1), got {correlation}"
            )));
        }
        self.constraints.insert(
            pair_key(Kind::Correlated, name_1, name_2),
            Constraint::Correlated {
                name_1: name_1.to_string(),
                mean_1,
                sigma_1,
                name_2: name_2.to_string(),
                mean_2,
                sigma_2,
                correlation,
            },
        );
        Ok(())
    }

    pub fn set_ratio_constraint(
        &mut self,
        name_1: &str,
        name_2: &str,
        ratio_mean: f64,
        ratio_sigma: f64,
    ) -> Result<()> {
        check_sigma(ratio_sigma, &format!("{name_1}/{name_2}"))?;
        self.constraints.insert(
            pair_key(Kind::Ratio, name_1, name_2),
            Constraint::Ratio {
                name_1: name_1.to_string(),
                name_2: name_2.to_string(),
                ratio_mean,
                ratio_sigma,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.values()
    }

    /// Sum of all penalties at `params`.
    pub fn evaluate(&self, params: &ParameterDict) -> Result<f64> {
        self.constraints
            .values()
            .map(|c| c.penalty(params))
            .sum()
    }
}
