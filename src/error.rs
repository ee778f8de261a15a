//! Error taxonomy shared by the fitters, prediction queries and segmentation

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CltvError {
    /// A customer record violates the feature-table invariants.
    #[error("invalid input for customer '{customer_id}': {reason}")]
    InvalidInput { customer_id: String, reason: String },

    /// A non-record argument (penalizer, tier count, discount rate, ...) is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(
        "optimizer did not converge after {iterations} iterations \
         (last objective {last_objective}): {reason}"
    )]
    ConvergenceFailure {
        iterations: u64,
        last_objective: f64,
        reason: String,
    },

    #[error(
        "{model} fit failed after {iterations} iterations \
         (last objective {last_objective}): {reason}"
    )]
    FitFailure {
        model: &'static str,
        iterations: u64,
        last_objective: f64,
        reason: String,
    },

    #[error("cannot form {tier_count} tiers from {distinct} distinct scores")]
    DegenerateDistribution { distinct: usize, tier_count: usize },

    #[error("non-finite value computed for {quantity}")]
    NonFinite { quantity: &'static str },

    #[error("data error: {0}")]
    Data(#[from] polars::error::PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("plotting error: {0}")]
    Plot(String),
}

impl CltvError {
    pub(crate) fn invalid_input(customer_id: &str, reason: impl Into<String>) -> Self {
        CltvError::InvalidInput {
            customer_id: customer_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Re-labels an optimizer failure as a failed fit of `model`.
    pub(crate) fn into_fit_failure(self, model: &'static str) -> Self {
        match self {
            CltvError::ConvergenceFailure {
                iterations,
                last_objective,
                reason,
            } => CltvError::FitFailure {
                model,
                iterations,
                last_objective,
                reason,
            },
            other => other,
        }
    }
}

/// Returns `value` when finite, `NonFinite` otherwise.
pub(crate) fn ensure_finite(value: f64, quantity: &'static str) -> crate::Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CltvError::NonFinite { quantity })
    }
}
