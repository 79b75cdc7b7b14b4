//! Error types shared by every fitting component.

use thiserror::Error;

/// Failure of a registration, configuration or evaluation call.
///
/// None of these are retried internally. The caller (an optimiser or the
/// orchestration layer) decides whether a failure is fatal.
#[derive(Error, Debug)]
pub enum FitError {
    /// Mismatched sizes: axes, bin counts, or the parallel template registries.
    #[error("Dimension error: {0}")]
    Dimension(String),

    /// Inconsistent setup, e.g. Barlow-Beeston enabled without generated rates.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unknown, missing or colliding parameter name.
    #[error("Parameter error: {0}")]
    Parameter(String),

    /// Operation invoked in a state where it is not allowed.
    #[error("Logic error: {0}")]
    Logic(String),

    /// Irrecoverable numeric inconsistency between templates and data.
    #[error("Statistical failure: {0}")]
    Statistical(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialisation error
    #[cfg(feature = "csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl FitError {
    /// True for numeric failures of a single evaluation (zero-probability bin,
    /// bad Barlow-Beeston discriminant). Samplers may treat these as a
    /// rejected point rather than a broken setup.
    pub fn is_statistical(&self) -> bool {
        matches!(self, FitError::Statistical(_))
    }

    /// Returns the same error kind with `prefix` prepended to its message.
    pub fn context(self, prefix: &str) -> Self {
        match self {
            FitError::Dimension(m) => FitError::Dimension(format!("{prefix}{m}")),
            FitError::Configuration(m) => FitError::Configuration(format!("{prefix}{m}")),
            FitError::Parameter(m) => FitError::Parameter(format!("{prefix}{m}")),
            FitError::Logic(m) => FitError::Logic(format!("{prefix}{m}")),
            FitError::Statistical(m) => FitError::Statistical(format!("{prefix}{m}")),
            other => other,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, FitError>;
