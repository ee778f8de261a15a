//! BG/NBD purchase-frequency and dropout model
//!
//! Each customer buys according to a Poisson process with a Gamma(r, α)
//! distributed rate and, after every purchase, drops out with a
//! Beta(a, b) distributed probability. Parameters are fitted by penalized
//! maximum likelihood over log-parameters.

use crate::data::{validate_records, CustomerRecord};
use crate::error::{ensure_finite, CltvError};
use crate::optimizer::{minimize, Objective, OptimizerOptions};
use crate::special::{hyp2f1_minus_one, ln_beta, ln_gamma, log_sum_exp};
use ndarray::{Array1, Zip};
use tracing::{debug, info};

pub const MODEL_NAME: &str = "BG/NBD";

/// Recency and age are rescaled so that the oldest customer has this age
/// during fitting.
const FIT_AGE_SCALE: f64 = 10.0;

/// Distance from `a = 1` inside which the removable singularity of the
/// expectation formulas is stepped over.
const A_NEAR_ONE: f64 = 1e-10;

/// Fitted BG/NBD parameters, all strictly positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BgNbdParams {
    /// Shape of the purchase-rate Gamma distribution
    pub r: f64,
    /// Scale of the purchase-rate Gamma distribution, in the table's time unit
    pub alpha: f64,
    /// Dropout Beta shape `a`
    pub a: f64,
    /// Dropout Beta shape `b`
    pub b: f64,
}

impl BgNbdParams {
    pub fn new(r: f64, alpha: f64, a: f64, b: f64) -> crate::Result<Self> {
        for (name, value) in [("r", r), ("alpha", alpha), ("a", a), ("b", b)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(CltvError::InvalidArgument(format!(
                    "BG/NBD parameter {name} must be finite and positive, got {value}"
                )));
            }
        }
        Ok(Self { r, alpha, a, b })
    }

    /// Parameters from log-space `[ln r, ln α, ln a, ln b]`, with α divided by `age_scale`.
    fn from_log(theta: &[f64], age_scale: f64) -> Self {
        Self {
            r: theta[0].exp(),
            alpha: theta[1].exp() / age_scale,
            a: theta[2].exp(),
            b: theta[3].exp(),
        }
    }

    /// Log-likelihood of one customer's `(frequency, recency, T)`.
    pub fn log_likelihood(&self, record: &CustomerRecord) -> crate::Result<f64> {
        record.validate()?;
        let ll = log_likelihood_terms(
            self,
            record.frequency as f64,
            record.recency,
            record.age,
        );
        ensure_finite(ll, "BG/NBD log-likelihood")
    }

    /// Expected repeat transactions in `(0, t]` for a randomly chosen customer.
    pub fn expected_transactions(&self, t: f64) -> crate::Result<f64> {
        check_horizon(t)?;
        if t <= 0.0 {
            return Ok(0.0);
        }
        let expected = self.expected_given_history(0.0, 0.0, t)?;
        Ok(expected.max(0.0))
    }

    /// Expected repeat transactions in the next `t` periods for a customer
    /// with the observed `(frequency, recency, T)`.
    pub fn conditional_expected_transactions(
        &self,
        record: &CustomerRecord,
        t: f64,
    ) -> crate::Result<f64> {
        record.validate()?;
        check_horizon(t)?;
        if t <= 0.0 {
            return Ok(0.0);
        }

        let x = record.frequency as f64;
        let numerator = self.expected_given_history(x, record.age, t)?;
        let denominator = 1.0 + self.dropout_odds(x, record.recency, record.age);
        let expected = ensure_finite(
            numerator / denominator,
            "BG/NBD conditional expected transactions",
        )?;
        Ok(expected.max(0.0))
    }

    /// Probability that the customer has not dropped out by `T`.
    pub fn conditional_probability_alive(&self, record: &CustomerRecord) -> crate::Result<f64> {
        record.validate()?;
        let odds = self.dropout_odds(record.frequency as f64, record.recency, record.age);
        ensure_finite(1.0 / (1.0 + odds), "BG/NBD probability alive")
    }

    /// Conditional expected transactions for every record.
    pub fn predict(&self, records: &[CustomerRecord], t: f64) -> crate::Result<Array1<f64>> {
        records
            .iter()
            .map(|record| self.conditional_expected_transactions(record, t))
            .collect::<crate::Result<Vec<f64>>>()
            .map(Array1::from)
    }

    /// Sum of conditional expected transactions over `records`.
    pub fn total_conditional_expected_transactions(
        &self,
        records: &[CustomerRecord],
        t: f64,
    ) -> crate::Result<f64> {
        Ok(self.predict(records, t)?.sum())
    }

    /// `(a+b+x−1)/(a−1) · [1 − ((α+T)/(α+T+t))^(r+x) · ₂F₁(r+x, b+x; a+b+x−1; z)]`,
    /// evaluated through Euler's transformation as
    /// `(a+b+x−1)/(a−1) · [1 − (1−z)^(a−1) · ₂F₁(a+b−1−r, a−1; a+b+x−1; z)]`.
    fn expected_given_history(&self, x: f64, age: f64, t: f64) -> crate::Result<f64> {
        // removable singularity at a = 1
        let a = if (self.a - 1.0).abs() < A_NEAR_ONE {
            1.0 + A_NEAR_ONE
        } else {
            self.a
        };
        let c = a + self.b + x - 1.0;
        let z = t / (self.alpha + age + t);

        let series = hyp2f1_minus_one(a + self.b - 1.0 - self.r, a - 1.0, c, z)?;
        // ₂F₁ turns negative when c < 0 (x = 0 with a + b < 1); the log form
        // only holds for a positive factor.
        let bracket = if series > -1.0 {
            let log_tail = (a - 1.0) * (-z).ln_1p() + series.ln_1p();
            -log_tail.exp_m1()
        } else {
            1.0 - (1.0 - z).powf(a - 1.0) * (1.0 + series)
        };

        ensure_finite(c / (a - 1.0) * bracket, "BG/NBD expected transactions")
    }

    /// `a/(b+x−1) · ((α+T)/(α+t_x))^(r+x)` for `x > 0`, zero otherwise.
    fn dropout_odds(&self, x: f64, recency: f64, age: f64) -> f64 {
        if x == 0.0 {
            return 0.0;
        }
        let log_odds = self.a.ln() - (self.b + x - 1.0).ln()
            + (self.r + x) * ((self.alpha + age).ln() - (self.alpha + recency).ln());
        log_odds.exp()
    }
}

fn check_horizon(t: f64) -> crate::Result<()> {
    if t.is_nan() || t == f64::INFINITY {
        return Err(CltvError::InvalidArgument(format!(
            "prediction horizon must be finite, got {t}"
        )));
    }
    Ok(())
}

/// Per-customer log-likelihood, combining the purchase count term with the
/// alive-or-dropped-after-last-purchase mixture in log space.
fn log_likelihood_terms(params: &BgNbdParams, x: f64, recency: f64, age: f64) -> f64 {
    let BgNbdParams { r, alpha, a, b } = *params;

    let a1 = ln_gamma(r + x) - ln_gamma(r) + r * alpha.ln();
    let a2 = ln_beta(a, b + x) - ln_beta(a, b);
    let a3 = -(r + x) * (alpha + age).ln();

    if x > 0.0 {
        let a4 = a.ln() - (b + x - 1.0).ln() - (r + x) * (alpha + recency).ln();
        a1 + a2 + log_sum_exp(a3, a4)
    } else {
        a1 + a2 + a3
    }
}

/// Mean negative log-likelihood over the (rescaled) table plus the L2 penalty
/// on log-parameters.
struct PenalizedNegLogLikelihood {
    frequency: Array1<f64>,
    recency: Array1<f64>,
    age: Array1<f64>,
    penalizer_coef: f64,
}

impl Objective for PenalizedNegLogLikelihood {
    fn value(&self, theta: &[f64]) -> f64 {
        let params = BgNbdParams::from_log(theta, 1.0);
        let total = Zip::from(&self.frequency)
            .and(&self.recency)
            .and(&self.age)
            .fold(0.0, |acc, &x, &recency, &age| {
                acc + log_likelihood_terms(&params, x, recency, age)
            });
        let penalty: f64 = theta.iter().map(|t| t * t).sum();
        -total / self.frequency.len() as f64 + self.penalizer_coef * penalty
    }
}

/// A fitted BG/NBD model with its fit diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct BgNbdModel {
    params: BgNbdParams,
    n_customers: usize,
    objective: f64,
    iterations: u64,
}

impl BgNbdModel {
    pub fn params(&self) -> &BgNbdParams {
        &self.params
    }

    /// Number of customers the model was fitted on
    pub fn n_customers(&self) -> usize {
        self.n_customers
    }

    /// Penalized mean negative log-likelihood at the optimum, on the rescaled data
    pub fn objective(&self) -> f64 {
        self.objective
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Expected repeat transactions in `(0, t]` summed over a population the
    /// size of the fitted one.
    pub fn expected_population_transactions(&self, t: f64) -> crate::Result<f64> {
        Ok(self.n_customers as f64 * self.params.expected_transactions(t)?)
    }
}

/// Penalized maximum-likelihood fitter for [`BgNbdParams`].
#[derive(Debug, Clone)]
pub struct BgNbdFitter {
    penalizer_coef: f64,
    optimizer: OptimizerOptions,
}

impl BgNbdFitter {
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

    /// Fit `(r, α, a, b)` to the records' `(frequency, recency, T)`.
    ///
    /// Records are validated before any optimization; invalid input fails with
    /// `InvalidInput`, a non-converging optimizer with `FitFailure`.
    pub fn fit(&self, records: &[CustomerRecord]) -> crate::Result<BgNbdModel> {
        if !(self.penalizer_coef.is_finite() && self.penalizer_coef >= 0.0) {
            return Err(CltvError::InvalidArgument(format!(
                "penalizer coefficient must be finite and >= 0, got {}",
                self.penalizer_coef
            )));
        }
        validate_records(records)?;

        let max_age = records.iter().map(|r| r.age).fold(0.0, f64::max);
        let age_scale = if max_age > 0.0 {
            FIT_AGE_SCALE / max_age
        } else {
            1.0
        };

        let objective = PenalizedNegLogLikelihood {
            frequency: records.iter().map(|r| r.frequency as f64).collect(),
            recency: records.iter().map(|r| r.recency * age_scale).collect(),
            age: records.iter().map(|r| r.age * age_scale).collect(),
            penalizer_coef: self.penalizer_coef,
        };
        debug!(customers = records.len(), age_scale, "fitting BG/NBD");

        let minimum = minimize(&objective, &[0.0; 4], &self.optimizer)
            .map_err(|e| e.into_fit_failure(MODEL_NAME))?;

        let candidate = BgNbdParams::from_log(&minimum.theta, age_scale);
        let params = BgNbdParams::new(candidate.r, candidate.alpha, candidate.a, candidate.b)
            .map_err(|e| CltvError::FitFailure {
                model: MODEL_NAME,
                iterations: minimum.iterations,
                last_objective: minimum.objective,
                reason: e.to_string(),
            })?;

        info!(
            r = params.r,
            alpha = params.alpha,
            a = params.a,
            b = params.b,
            iterations = minimum.iterations,
            objective = minimum.objective,
            "BG/NBD fitted"
        );

        Ok(BgNbdModel {
            params,
            n_customers: records.len(),
            objective: minimum.objective,
            iterations: minimum.iterations,
        })
    }
}
