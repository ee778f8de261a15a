//! Gamma-Gamma model of average transaction value
//!
//! Individual spend per transaction is Gamma(p, ν) with ν ~ Gamma(q, v) across
//! customers. Only customers with at least one repeat purchase carry monetary
//! information, so every query here requires `frequency >= 1`.

use crate::data::{validate_records, CustomerRecord};
use crate::error::{ensure_finite, CltvError};
use crate::optimizer::{minimize, Objective, OptimizerOptions};
use crate::special::ln_gamma;
use ndarray::{Array1, Zip};
use tracing::{debug, info};

pub const MODEL_NAME: &str = "Gamma-Gamma";

/// Fitted Gamma-Gamma parameters, all strictly positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GammaGammaParams {
    /// Shape of per-transaction spend
    pub p: f64,
    /// Shape of the spend-rate mixing distribution
    pub q: f64,
    /// Rate of the spend-rate mixing distribution, in currency units
    pub v: f64,
}

impl GammaGammaParams {
    pub fn new(p: f64, q: f64, v: f64) -> crate::Result<Self> {
        for (name, value) in [("p", p), ("q", q), ("v", v)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(CltvError::InvalidArgument(format!(
                    "Gamma-Gamma parameter {name} must be finite and positive, got {value}"
                )));
            }
        }
        Ok(Self { p, q, v })
    }

    fn from_log(theta: &[f64], value_scale: f64) -> Self {
        Self {
            p: theta[0].exp(),
            q: theta[1].exp(),
            v: theta[2].exp() * value_scale,
        }
    }

    /// Mean spend across the population, `p·v / (q − 1)`.
    pub fn expected_population_average_value(&self) -> crate::Result<f64> {
        if self.q <= 1.0 {
            return Err(CltvError::NonFinite {
                quantity: "Gamma-Gamma population mean (q <= 1)",
            });
        }
        ensure_finite(
            self.p * self.v / (self.q - 1.0),
            "Gamma-Gamma population mean",
        )
    }

    /// Posterior mean spend for a customer: a credibility-weighted blend of
    /// the population mean and the customer's observed average.
    pub fn conditional_expected_average_value(&self, record: &CustomerRecord) -> crate::Result<f64> {
        check_monetary_record(record)?;
        let population_mean = self.expected_population_average_value()?;

        let px = self.p * record.frequency as f64;
        let weight = px / (px + self.q - 1.0);
        ensure_finite(
            (1.0 - weight) * population_mean + weight * record.monetary,
            "Gamma-Gamma conditional expected average value",
        )
    }

    /// Conditional expected average value for every record.
    pub fn predict(&self, records: &[CustomerRecord]) -> crate::Result<Array1<f64>> {
        records
            .iter()
            .map(|record| self.conditional_expected_average_value(record))
            .collect::<crate::Result<Vec<f64>>>()
            .map(Array1::from)
    }

    pub fn log_likelihood(&self, record: &CustomerRecord) -> crate::Result<f64> {
        check_monetary_record(record)?;
        let ll = log_likelihood_terms(self, record.frequency as f64, record.monetary);
        ensure_finite(ll, "Gamma-Gamma log-likelihood")
    }
}

/// Record validation plus the Gamma-Gamma domain: `frequency >= 1`, `monetary > 0`.
fn check_monetary_record(record: &CustomerRecord) -> crate::Result<()> {
    record.validate()?;
    if record.frequency == 0 {
        return Err(CltvError::invalid_input(
            &record.customer_id,
            "Gamma-Gamma requires frequency >= 1",
        ));
    }
    if record.monetary <= 0.0 {
        return Err(CltvError::invalid_input(
            &record.customer_id,
            format!(
                "Gamma-Gamma requires monetary > 0, got {}",
                record.monetary
            ),
        ));
    }
    Ok(())
}

fn log_likelihood_terms(params: &GammaGammaParams, x: f64, m: f64) -> f64 {
    let GammaGammaParams { p, q, v } = *params;
    let px = p * x;
    ln_gamma(px + q) - ln_gamma(px) - ln_gamma(q) + q * v.ln() + (px - 1.0) * m.ln()
        + px * x.ln()
        - (px + q) * (x * m + v).ln()
}

struct PenalizedNegLogLikelihood {
    frequency: Array1<f64>,
    monetary: Array1<f64>,
    penalizer_coef: f64,
}

impl Objective for PenalizedNegLogLikelihood {
    fn value(&self, theta: &[f64]) -> f64 {
        let params = GammaGammaParams::from_log(theta, 1.0);
        let total = Zip::from(&self.frequency)
            .and(&self.monetary)
            .fold(0.0, |acc, &x, &m| acc + log_likelihood_terms(&params, x, m));
        let penalty: f64 = theta.iter().map(|t| t * t).sum();
        -total / self.frequency.len() as f64 + self.penalizer_coef * penalty
    }
}

/// A fitted Gamma-Gamma model with its fit diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct GammaGammaModel {
    params: GammaGammaParams,
    n_customers: usize,
    objective: f64,
    iterations: u64,
}

impl GammaGammaModel {
    pub fn params(&self) -> &GammaGammaParams {
        &self.params
    }

    pub fn n_customers(&self) -> usize {
        self.n_customers
    }

    pub fn objective(&self) -> f64 {
        self.objective
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }
}

#[derive(Debug, Clone)]
pub struct GammaGammaFitter {
    penalizer_coef: f64,
    optimizer: OptimizerOptions,
}

impl GammaGammaFitter {
    pub fn new(penalizer_coef: f64) -> Self {
        Self {
            penalizer_coef,
            optimizer: OptimizerOptions::default(),
        }
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerOptions) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Fit `(p, q, v)` to the records' `(frequency, monetary)`.
    ///
    /// Every record must have `frequency >= 1` and `monetary > 0`; offending
    /// records are reported, not filtered.
    pub fn fit(&self, records: &[CustomerRecord]) -> crate::Result<GammaGammaModel> {
        if !(self.penalizer_coef.is_finite() && self.penalizer_coef >= 0.0) {
            return Err(CltvError::InvalidArgument(format!(
                "penalizer coefficient must be finite and >= 0, got {}",
                self.penalizer_coef
            )));
        }
        validate_records(records)?;
        records.iter().try_for_each(check_monetary_record)?;

        let value_scale = records.iter().map(|r| r.monetary).sum::<f64>() / records.len() as f64;
        let objective = PenalizedNegLogLikelihood {
            frequency: records.iter().map(|r| r.frequency as f64).collect(),
            monetary: records.iter().map(|r| r.monetary / value_scale).collect(),
            penalizer_coef: self.penalizer_coef,
        };
        debug!(customers = records.len(), value_scale, "fitting Gamma-Gamma");

        let minimum = minimize(&objective, &[0.0; 3], &self.optimizer)
            .map_err(|e| e.into_fit_failure(MODEL_NAME))?;

        let candidate = GammaGammaParams::from_log(&minimum.theta, value_scale);
        let params = GammaGammaParams::new(candidate.p, candidate.q, candidate.v).map_err(|e| {
            CltvError::FitFailure {
                model: MODEL_NAME,
                iterations: minimum.iterations,
                last_objective: minimum.objective,
                reason: e.to_string(),
            }
        })?;

        info!(
            p = params.p,
            q = params.q,
            v = params.v,
            iterations = minimum.iterations,
            objective = minimum.objective,
            "Gamma-Gamma fitted"
        );

        Ok(GammaGammaModel {
            params,
            n_customers: records.len(),
            objective: minimum.objective,
            iterations: minimum.iterations,
        })
    }
}

/// Pearson correlation between frequency and monetary value.
///
/// The model assumes the two are independent; values far from zero mean its
/// value estimates should be treated with care. Returns `None` for fewer than
/// two records or when either column is constant.
pub fn frequency_monetary_correlation(records: &[CustomerRecord]) -> Option<f64> {
    if records.len() < 2 {
        return None;
    }
    let frequency: Array1<f64> = records.iter().map(|r| r.frequency as f64).collect();
    let monetary: Array1<f64> = records.iter().map(|r| r.monetary).collect();

    let df = frequency.mean()?;
    let dm = monetary.mean()?;
    let fc = frequency.mapv(|f| f - df);
    let mc = monetary.mapv(|m| m - dm);

    let covariance = fc.dot(&mc);
    let scale = (fc.dot(&fc) * mc.dot(&mc)).sqrt();
    if scale == 0.0 || !scale.is_finite() {
        return None;
    }
    Some(covariance / scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Published CDNOW estimates.
    fn cdnow_params() -> GammaGammaParams {
        GammaGammaParams::new(6.25, 3.74, 15.44).unwrap()
    }

    fn record(frequency: u32, monetary: f64) -> CustomerRecord {
        let recency = if frequency == 0 { 0.0 } else { 10.0 };
        CustomerRecord::new("c", frequency, recency, 20.0, monetary)
    }

    #[test]
    fn test_population_mean() {
        let mean = cdnow_params().expected_population_average_value().unwrap();
        assert_relative_eq!(mean, 6.25 * 15.44 / 2.74, epsilon = 1e-12);
    }

    #[test]
    fn test_population_mean_requires_q_above_one() {
        let params = GammaGammaParams::new(2.0, 0.9, 10.0).unwrap();
        assert!(matches!(
            params.expected_population_average_value(),
            Err(CltvError::NonFinite { .. })
        ));
        assert!(params.conditional_expected_average_value(&record(3, 20.0)).is_err());
    }

    #[test]
    fn test_conditional_value_is_credibility_blend() {
        let params = cdnow_params();
        let mean = params.expected_population_average_value().unwrap();
        let value = params.conditional_expected_average_value(&record(2, 50.0)).unwrap();
        let w = 12.5 / (12.5 + 2.74);
        assert_relative_eq!(value, (1.0 - w) * mean + w * 50.0, epsilon = 1e-12);
        assert!(value > mean && value < 50.0);
    }

    #[test]
    fn test_conditional_value_moves_toward_observed_with_frequency() {
        let params = cdnow_params();
        let observed = 120.0;
        let mut previous_gap = f64::INFINITY;
        for frequency in [1, 2, 5, 20, 100, 10_000] {
            let value = params
                .conditional_expected_average_value(&record(frequency, observed))
                .unwrap();
            let gap = (value - observed).abs();
            assert!(gap < previous_gap);
            previous_gap = gap;
        }
        assert!(previous_gap < 0.1);
    }

    #[test]
    fn test_conditional_value_rejects_non_purchasers() {
        let params = cdnow_params();
        assert!(matches!(
            params.conditional_expected_average_value(&record(0, 0.0)),
            Err(CltvError::InvalidInput { .. })
        ));
        assert!(matches!(
            params.conditional_expected_average_value(&record(2, 0.0)),
            Err(CltvError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_log_likelihood_unit_parameters() {
        // lnΓ(2) − 2 lnΓ(1) − 2 ln 2
        let params = GammaGammaParams::new(1.0, 1.0, 1.0).unwrap();
        let ll = params.log_likelihood(&record(1, 1.0)).unwrap();
        assert_relative_eq!(ll, -2.0 * 2.0_f64.ln(), epsilon = 1e-10);
    }

    fn sample_records() -> Vec<CustomerRecord> {
        let rows = [
            (1, 24.5),
            (2, 31.0),
            (6, 18.2),
            (3, 45.7),
            (1, 12.0),
            (4, 27.3),
            (2, 19.9),
            (8, 22.1),
            (1, 60.0),
            (3, 33.3),
            (5, 25.0),
            (2, 16.4),
        ];
        rows.iter()
            .enumerate()
            .map(|(i, &(f, m))| CustomerRecord::new(format!("c{i}"), f, 5.0, 30.0, m))
            .collect()
    }

    #[test]
    fn test_fit_produces_positive_parameters() {
        let model = GammaGammaFitter::new(0.01).fit(&sample_records()).unwrap();
        let p = model.params();
        for value in [p.p, p.q, p.v] {
            assert!(value.is_finite() && value > 0.0);
        }
        assert_eq!(model.n_customers(), 12);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let first = GammaGammaFitter::new(0.01).fit(&sample_records()).unwrap();
        let second = GammaGammaFitter::new(0.01).fit(&sample_records()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_fit_is_invariant_to_currency_scale() {
        let records = sample_records();
        let scaled: Vec<CustomerRecord> = records
            .iter()
            .map(|r| CustomerRecord {
                monetary: r.monetary * 100.0,
                ..r.clone()
            })
            .collect();

        let base = GammaGammaFitter::new(0.01).fit(&records).unwrap();
        let cents = GammaGammaFitter::new(0.01).fit(&scaled).unwrap();
        assert_relative_eq!(base.params().p, cents.params().p, max_relative = 1e-3);
        assert_relative_eq!(base.params().q, cents.params().q, max_relative = 1e-3);
        assert_relative_eq!(
            base.params().v * 100.0,
            cents.params().v,
            max_relative = 1e-3
        );
    }

    #[test]
    fn test_fit_rejects_zero_frequency() {
        let mut records = sample_records();
        records.push(CustomerRecord::new("new", 0, 0.0, 30.0, 0.0));
        match GammaGammaFitter::new(0.01).fit(&records) {
            Err(CltvError::InvalidInput { customer_id, .. }) => assert_eq!(customer_id, "new"),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_correlation() {
        let records: Vec<CustomerRecord> = (1..=5)
            .map(|i| CustomerRecord::new(format!("c{i}"), i, 5.0, 30.0, 10.0 * i as f64))
            .collect();
        assert_relative_eq!(
            frequency_monetary_correlation(&records).unwrap(),
            1.0,
            epsilon = 1e-12
        );

        let constant: Vec<CustomerRecord> = (1..=5)
            .map(|i| CustomerRecord::new(format!("c{i}"), i, 5.0, 30.0, 10.0))
            .collect();
        assert!(frequency_monetary_correlation(&constant).is_none());
        assert!(frequency_monetary_correlation(&records[..1]).is_none());
    }
}
