//! End-to-end CLTV analysis: fit both models once, score every customer,
//! segment by CLTV

use crate::bgnbd::{BgNbdFitter, BgNbdModel, BgNbdParams};
use crate::clv::{customer_lifetime_value, score_customers};
use crate::config::ClvConfig;
use crate::data::{
    expected_purchases_column, CustomerRecord, ScoredTable, CLV_COLUMN,
    EXPECTED_AVERAGE_VALUE_COLUMN, PROB_ALIVE_COLUMN, SEGMENT_COLUMN,
};
use crate::gamma_gamma::{frequency_monetary_correlation, GammaGammaFitter, GammaGammaModel, GammaGammaParams};
use crate::segment::{assign_segments, Segmentation};
use ndarray::Array1;
use tracing::{info, warn};

/// Above this absolute frequency/monetary correlation the Gamma-Gamma
/// independence assumption is reported as questionable.
pub const CORRELATION_WARNING_THRESHOLD: f64 = 0.3;

/// Expected repeat transactions summed over the analysed customers.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonTotal {
    pub horizon: f64,
    /// Sum of each customer's conditional expectation
    pub conditional: f64,
    /// Fitted population size times the unconditional expectation
    pub population: f64,
}

/// Everything produced by [`run_analysis`].
#[derive(Debug, Clone)]
pub struct Analysis {
    pub table: ScoredTable,
    pub bgnbd: BgNbdModel,
    pub gamma_gamma: GammaGammaModel,
    pub segmentation: Segmentation,
    pub horizon_totals: Vec<HorizonTotal>,
    /// Customers below `min_frequency`, left out of the analysis
    pub excluded_customers: usize,
    pub frequency_monetary_correlation: Option<f64>,
}

impl Analysis {
    /// Highest-CLTV customers first, at most `n`.
    pub fn top_customers(&self, n: usize) -> Vec<(&CustomerRecord, f64, &str)> {
        let (Some(clv), Some(segments)) = (
            self.table.values(CLV_COLUMN),
            self.table.labels(SEGMENT_COLUMN),
        ) else {
            return Vec::new();
        };

        let mut ranked: Vec<(&CustomerRecord, f64, &str)> = self
            .table
            .records()
            .iter()
            .zip(clv.iter().copied())
            .zip(segments.iter().map(String::as_str))
            .map(|((record, value), segment)| (record, value, segment))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(n);
        ranked
    }
}

/// Fit both models on `records` and score them.
///
/// Derived columns are `expected_purchases_<h>` per configured horizon,
/// `prob_alive`, `expected_average_value`, `clv` and `segment`.
///
/// # Arguments
/// * `records` - Feature table; customers below `min_frequency` are left out
/// * `config` - Penalizers, CLTV settings, tiers and prediction horizons
///
/// # Returns
/// * Scored table with both fitted models, segmentation and horizon totals
pub fn run_analysis(records: Vec<CustomerRecord>, config: &ClvConfig) -> crate::Result<Analysis> {
    config.validate()?;

    let total = records.len();
    let selected: Vec<CustomerRecord> = records
        .into_iter()
        .filter(|r| r.frequency >= config.min_frequency)
        .collect();
    let excluded_customers = total - selected.len();
    info!(
        customers = selected.len(),
        excluded = excluded_customers,
        min_frequency = config.min_frequency,
        "selected customers"
    );

    let mut table = ScoredTable::new(selected)?;

    let bgnbd = BgNbdFitter::new(config.penalizer_coefficient_bgnbd)
        .with_optimizer(config.optimizer.clone())
        .fit(table.records())?;

    let correlation = frequency_monetary_correlation(table.records());
    if let Some(rho) = correlation {
        if rho.abs() > CORRELATION_WARNING_THRESHOLD {
            warn!(
                correlation = rho,
                "frequency and monetary value are correlated; Gamma-Gamma estimates may be biased"
            );
        }
    }

    let gamma_gamma = GammaGammaFitter::new(config.penalizer_coefficient_gg)
        .with_optimizer(config.optimizer.clone())
        .fit(table.records())?;

    let mut horizon_totals = Vec::with_capacity(config.prediction_horizons.len());
    for &horizon in &config.prediction_horizons {
        let expected = bgnbd.params().predict(table.records(), horizon)?;
        let totals = HorizonTotal {
            horizon,
            conditional: expected.sum(),
            population: bgnbd.expected_population_transactions(horizon)?,
        };
        info!(
            horizon,
            conditional = totals.conditional,
            population = totals.population,
            "expected transactions"
        );
        horizon_totals.push(totals);
        table.add_values(expected_purchases_column(horizon), expected)?;
    }

    let prob_alive = table
        .records()
        .iter()
        .map(|r| bgnbd.params().conditional_probability_alive(r))
        .collect::<crate::Result<Vec<f64>>>()?;
    table.add_values(PROB_ALIVE_COLUMN, Array1::from(prob_alive))?;

    let average_value = gamma_gamma.params().predict(table.records())?;
    table.add_values(EXPECTED_AVERAGE_VALUE_COLUMN, average_value)?;

    let clv = score_customers(
        bgnbd.params(),
        gamma_gamma.params(),
        table.records(),
        &config.clv_settings(),
    )?;
    info!(
        total = clv.sum(),
        mean = clv.mean().unwrap_or(0.0),
        "customer lifetime values computed"
    );

    let segmentation = assign_segments(table.customer_ids(), &clv.to_vec(), config.tier_count)?;
    table.add_values(CLV_COLUMN, clv)?;
    table.add_labels(SEGMENT_COLUMN, segmentation.labels())?;

    Ok(Analysis {
        table,
        bgnbd,
        gamma_gamma,
        segmentation,
        horizon_totals,
        excluded_customers,
        frequency_monetary_correlation: correlation,
    })
}

/// Scores of one customer against already fitted models.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerPrediction {
    /// `(horizon, expected repeat transactions)` per configured horizon
    pub expected_purchases: Vec<(f64, f64)>,
    pub prob_alive: f64,
    pub expected_average_value: f64,
    pub clv: f64,
}

pub fn predict_customer(
    bgnbd: &BgNbdParams,
    gamma_gamma: &GammaGammaParams,
    record: &CustomerRecord,
    config: &ClvConfig,
) -> crate::Result<CustomerPrediction> {
    let expected_purchases = config
        .prediction_horizons
        .iter()
        .map(|&h| Ok((h, bgnbd.conditional_expected_transactions(record, h)?)))
        .collect::<crate::Result<Vec<(f64, f64)>>>()?;

    Ok(CustomerPrediction {
        expected_purchases,
        prob_alive: bgnbd.conditional_probability_alive(record)?,
        expected_average_value: gamma_gamma.conditional_expected_average_value(record)?,
        clv: customer_lifetime_value(bgnbd, gamma_gamma, record, &config.clv_settings())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CltvError;
    use crate::synthetic::{simulate_customers, SimulationSettings};

    fn simulated() -> Vec<CustomerRecord> {
        simulate_customers(&SimulationSettings {
            n_customers: 400,
            ..SimulationSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn test_run_analysis_adds_every_column() {
        let analysis = run_analysis(simulated(), &ClvConfig::default()).unwrap();
        let table = &analysis.table;

        assert_eq!(
            table.column_names(),
            vec![
                "expected_purchases_4",
                "expected_purchases_24",
                "expected_purchases_48",
                PROB_ALIVE_COLUMN,
                EXPECTED_AVERAGE_VALUE_COLUMN,
                CLV_COLUMN,
                SEGMENT_COLUMN,
            ]
        );
        assert!(table.records().iter().all(|r| r.frequency >= 1));
        assert_eq!(analysis.excluded_customers + table.len(), 400);
        assert!(table.values(CLV_COLUMN).unwrap().iter().all(|v| *v >= 0.0));
        assert_eq!(analysis.horizon_totals.len(), 3);
    }

    #[test]
    fn test_expected_purchases_grow_with_horizon() {
        let analysis = run_analysis(simulated(), &ClvConfig::default()).unwrap();
        let short = analysis.table.values("expected_purchases_4").unwrap();
        let long = analysis.table.values("expected_purchases_48").unwrap();
        assert!(short.iter().zip(long.iter()).all(|(s, l)| s <= l));

        let totals = &analysis.horizon_totals;
        assert!(totals[0].conditional < totals[2].conditional);
    }

    #[test]
    fn test_top_customers_sorted_by_clv() {
        let analysis = run_analysis(simulated(), &ClvConfig::default()).unwrap();
        let top = analysis.top_customers(5);
        assert_eq!(top.len(), 5);
        assert!(top.windows(2).all(|w| w[0].1 >= w[1].1));
        assert_eq!(top[0].2, "A");
    }

    #[test]
    fn test_run_analysis_with_u_shaped_dropout_fit() {
        let rows = [
            (2, 30.43, 38.86, 24.5),
            (1, 1.71, 38.86, 31.0),
            (7, 29.43, 38.86, 18.2),
            (1, 5.0, 38.86, 45.7),
            (2, 35.71, 38.71, 12.0),
            (5, 24.43, 38.71, 27.3),
            (10, 34.14, 38.57, 19.9),
            (1, 4.86, 38.57, 60.0),
            (3, 28.29, 38.43, 33.3),
        ];
        let records = rows
            .iter()
            .enumerate()
            .map(|(i, &(f, r, t, m))| CustomerRecord::new(format!("c{i}"), f, r, t, m))
            .collect();

        let analysis = run_analysis(records, &ClvConfig::default()).unwrap();
        let bg = analysis.bgnbd.params();
        assert!(bg.a + bg.b < 1.0, "a = {}, b = {}", bg.a, bg.b);

        for total in &analysis.horizon_totals {
            assert!(total.population.is_finite() && total.population > 0.0);
        }
        assert!(analysis.horizon_totals[0].population < analysis.horizon_totals[2].population);
        assert_eq!(analysis.table.labels(SEGMENT_COLUMN).unwrap().len(), 9);
    }

    #[test]
    fn test_zero_min_frequency_reaches_gamma_gamma_rejection() {
        let config = ClvConfig {
            min_frequency: 0,
            ..ClvConfig::default()
        };
        assert!(matches!(
            run_analysis(simulated(), &config),
            Err(CltvError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_predict_customer() {
        let bgnbd = BgNbdParams::new(0.243, 4.414, 0.793, 2.426).unwrap();
        let gamma_gamma = GammaGammaParams::new(6.25, 3.74, 15.44).unwrap();
        let record = CustomerRecord::new("new", 2, 30.43, 38.86, 35.0);

        let prediction =
            predict_customer(&bgnbd, &gamma_gamma, &record, &ClvConfig::default()).unwrap();
        assert_eq!(prediction.expected_purchases.len(), 3);
        assert!(prediction.expected_purchases[0].1 < prediction.expected_purchases[2].1);
        assert!(prediction.prob_alive > 0.0 && prediction.prob_alive <= 1.0);
        assert!(prediction.clv > 0.0);
    }
}
