//! Configuration for the CLTV analysis

use crate::clv::{ClvSettings, TimeUnit};
use crate::error::CltvError;
use crate::optimizer::OptimizerOptions;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Prefix of environment overrides, e.g. `CLVFORGE__DISCOUNT_RATE=0.02`
/// or `CLVFORGE__OPTIMIZER__MAX_ITERS=10000`.
pub const ENV_PREFIX: &str = "CLVFORGE";

/// Model, horizon and segmentation settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClvConfig {
    /// L2 strength on the BG/NBD log-parameters
    pub penalizer_coefficient_bgnbd: f64,
    /// L2 strength on the Gamma-Gamma log-parameters
    pub penalizer_coefficient_gg: f64,
    /// Number of CLTV sub-periods
    pub horizon_periods: i64,
    pub sub_period_unit: TimeUnit,
    /// Unit of `recency` and `T` in the feature table
    pub data_unit: TimeUnit,
    /// Discount rate per sub-period
    pub discount_rate: f64,
    pub tier_count: usize,
    /// Horizons, in `data_unit`, for the expected-purchases columns
    pub prediction_horizons: Vec<f64>,
    /// Customers with fewer repeat purchases are left out of the analysis
    pub min_frequency: u32,
    pub optimizer: OptimizerOptions,
}

impl Default for ClvConfig {
    fn default() -> Self {
        Self {
            penalizer_coefficient_bgnbd: 0.001,
            penalizer_coefficient_gg: 0.01,
            horizon_periods: 24,
            sub_period_unit: TimeUnit::Weeks,
            data_unit: TimeUnit::Weeks,
            discount_rate: 0.01,
            tier_count: 4,
            prediction_horizons: vec![4.0, 24.0, 48.0],
            min_frequency: 1,
            optimizer: OptimizerOptions::default(),
        }
    }
}

impl ClvConfig {
    /// Load from an optional TOML/YAML/JSON file, then `CLVFORGE__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let loaded: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        loaded.validate().context("Invalid configuration")?;
        Ok(loaded)
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load(Some(path.as_ref()))
    }

    pub fn validate(&self) -> crate::Result<()> {
        for (name, value) in [
            ("penalizer_coefficient_bgnbd", self.penalizer_coefficient_bgnbd),
            ("penalizer_coefficient_gg", self.penalizer_coefficient_gg),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(CltvError::InvalidArgument(format!(
                    "{name} must be finite and >= 0, got {value}"
                )));
            }
        }
        if self.tier_count == 0 {
            return Err(CltvError::InvalidArgument(
                "tier_count must be at least 1".to_string(),
            ));
        }
        if let Some(h) = self
            .prediction_horizons
            .iter()
            .find(|h| !(h.is_finite() && **h >= 0.0))
        {
            return Err(CltvError::InvalidArgument(format!(
                "prediction horizons must be finite and >= 0, got {h}"
            )));
        }
        self.clv_settings().validate()?;
        self.optimizer.validate()
    }

    pub fn clv_settings(&self) -> ClvSettings {
        ClvSettings {
            horizon_periods: self.horizon_periods,
            sub_period_unit: self.sub_period_unit,
            data_unit: self.data_unit,
            discount_rate: self.discount_rate,
        }
    }
}
