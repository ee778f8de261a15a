//! Discounted customer lifetime value from the two fitted models

use crate::bgnbd::BgNbdParams;
use crate::data::CustomerRecord;
use crate::error::{ensure_finite, CltvError};
use crate::gamma_gamma::GammaGammaParams;
use ndarray::Array1;
use serde::Deserialize;
use std::fmt;

const DAYS_PER_MONTH: f64 = 365.25 / 12.0;

/// Calendar unit of the feature table or of one CLTV sub-period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Days,
    Weeks,
    Months,
}

impl TimeUnit {
    pub fn days(self) -> f64 {
        match self {
            TimeUnit::Days => 1.0,
            TimeUnit::Weeks => 7.0,
            TimeUnit::Months => DAYS_PER_MONTH,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeUnit::Days => "days",
            TimeUnit::Weeks => "weeks",
            TimeUnit::Months => "months",
        };
        f.write_str(name)
    }
}

/// Horizon and discounting for [`customer_lifetime_value`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClvSettings {
    /// Number of sub-periods summed
    pub horizon_periods: i64,
    pub sub_period_unit: TimeUnit,
    /// Unit of `recency` and `T` in the feature table
    pub data_unit: TimeUnit,
    /// Discount rate per sub-period
    pub discount_rate: f64,
}

impl Default for ClvSettings {
    fn default() -> Self {
        Self {
            horizon_periods: 24,
            sub_period_unit: TimeUnit::Weeks,
            data_unit: TimeUnit::Weeks,
            discount_rate: 0.01,
        }
    }
}

impl ClvSettings {
    pub fn validate(&self) -> crate::Result<()> {
        if !(self.discount_rate.is_finite() && self.discount_rate > -1.0) {
            return Err(CltvError::InvalidArgument(format!(
                "discount rate must be finite and > -1, got {}",
                self.discount_rate
            )));
        }
        Ok(())
    }

    /// Length of one sub-period in the feature table's time unit.
    pub fn period_length(&self) -> f64 {
        self.sub_period_unit.days() / self.data_unit.days()
    }
}

/// Present value of a customer's expected purchases over the horizon.
///
/// Each sub-period contributes its marginal expected transactions times the
/// customer's expected average value, discounted by `(1 + rate)^-i`.
///
/// # Arguments
/// * `bgnbd` - Fitted purchase-frequency parameters
/// * `gamma_gamma` - Fitted spend parameters
/// * `record` - Customer to score, with `frequency >= 1`
/// * `settings` - Horizon, time units and per-sub-period discount rate
///
/// # Returns
/// * Discounted CLTV, `0.0` when the horizon is not positive
pub fn customer_lifetime_value(
    bgnbd: &BgNbdParams,
    gamma_gamma: &GammaGammaParams,
    record: &CustomerRecord,
    settings: &ClvSettings,
) -> crate::Result<f64> {
    settings.validate()?;
    record.validate()?;
    if settings.horizon_periods <= 0 {
        return Ok(0.0);
    }

    let value = gamma_gamma.conditional_expected_average_value(record)?;
    let step = settings.period_length();
    let growth = 1.0 + settings.discount_rate;

    let mut clv = 0.0;
    let mut previous = 0.0;
    let mut discount = 1.0;
    for i in 1..=settings.horizon_periods {
        let expected = bgnbd.conditional_expected_transactions(record, i as f64 * step)?;
        // round-off can make consecutive expectations dip
        let marginal = (expected - previous).max(0.0);
        discount /= growth;
        clv += marginal * value * discount;
        previous = expected;
    }

    ensure_finite(clv, "customer lifetime value")
}

/// [`customer_lifetime_value`] for every record, in order.
pub fn score_customers(
    bgnbd: &BgNbdParams,
    gamma_gamma: &GammaGammaParams,
    records: &[CustomerRecord],
    settings: &ClvSettings,
) -> crate::Result<Array1<f64>> {
    records
        .iter()
        .map(|record| customer_lifetime_value(bgnbd, gamma_gamma, record, settings))
        .collect::<crate::Result<Vec<f64>>>()
        .map(Array1::from)
}
