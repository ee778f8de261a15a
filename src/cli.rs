//! Command-line interface definitions and argument parsing

use crate::config::ClvConfig;
use crate::data::CustomerRecord;
use clap::Parser;
use std::path::PathBuf;

/// Customer lifetime value CLI using BG/NBD and Gamma-Gamma models
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the feature table CSV (customer_id, frequency, recency, T, monetary)
    #[arg(short, long, conflicts_with = "simulate")]
    pub input: Option<String>,

    /// Generate this many synthetic customers instead of reading a file
    #[arg(long)]
    pub simulate: Option<usize>,

    /// Configuration file (TOML, YAML or JSON); CLVFORGE__* variables override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write the scored table to this CSV
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output path for the CLTV scatter plot; the segment chart is written next to it
    #[arg(long, default_value = "clv_plot.svg")]
    pub plot: PathBuf,

    /// Number of CLTV sub-periods
    #[arg(long)]
    pub horizon: Option<i64>,

    /// Discount rate per sub-period
    #[arg(long)]
    pub discount_rate: Option<f64>,

    /// Number of segments
    #[arg(short = 'k', long)]
    pub tiers: Option<usize>,

    /// L2 penalizer for the BG/NBD fit
    #[arg(long)]
    pub penalizer_bgnbd: Option<f64>,

    /// L2 penalizer for the Gamma-Gamma fit
    #[arg(long)]
    pub penalizer_gg: Option<f64>,

    /// Prediction mode: provide frequency,recency,T,monetary as comma-separated string
    /// Example: --predict "3,20.5,38,45.0"
    #[arg(short, long)]
    pub predict: Option<String>,

    /// Seed for --simulate
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Number of top customers to list
    #[arg(long, default_value = "10")]
    pub top: usize,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Where the feature table comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    File(String),
    Simulated { customers: usize, seed: u64 },
}

impl Args {
    pub fn data_source(&self) -> DataSource {
        match (self.simulate, &self.input) {
            (Some(customers), _) => DataSource::Simulated {
                customers,
                seed: self.seed,
            },
            (None, Some(path)) => DataSource::File(path.clone()),
            (None, None) => DataSource::File("data.csv".to_string()),
        }
    }

    /// Command-line values take precedence over file and environment settings.
    pub fn apply_overrides(&self, config: &mut ClvConfig) {
        if let Some(horizon) = self.horizon {
            config.horizon_periods = horizon;
        }
        if let Some(rate) = self.discount_rate {
            config.discount_rate = rate;
        }
        if let Some(tiers) = self.tiers {
            config.tier_count = tiers;
        }
        if let Some(penalizer) = self.penalizer_bgnbd {
            config.penalizer_coefficient_bgnbd = penalizer;
        }
        if let Some(penalizer) = self.penalizer_gg {
            config.penalizer_coefficient_gg = penalizer;
        }
    }

    /// Parse the customer from the predict string
    /// Expected format: "frequency,recency,T,monetary"
    pub fn parse_predict_values(&self) -> anyhow::Result<Option<CustomerRecord>> {
        let Some(ref predict_str) = self.predict else {
            return Ok(None);
        };

        let parts: Vec<&str> = predict_str.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            anyhow::bail!("Predict values must be in format 'frequency,recency,T,monetary'");
        }

        let frequency: u32 = parts[0]
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid frequency value: {}", parts[0]))?;
        let recency: f64 = parts[1]
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid recency value: {}", parts[1]))?;
        let age: f64 = parts[2]
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid T value: {}", parts[2]))?;
        let monetary: f64 = parts[3]
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid monetary value: {}", parts[3]))?;

        let record = CustomerRecord::new("prediction", frequency, recency, age, monetary);
        record.validate()?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["clvforge"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_predict_values() {
        let mut args = args(&["--predict", "3, 20.5, 38, 45.0"]);

        let record = args.parse_predict_values().unwrap().unwrap();
        assert_eq!(record.frequency, 3);
        assert_eq!(record.recency, 20.5);
        assert_eq!(record.age, 38.0);
        assert_eq!(record.monetary, 45.0);

        args.predict = None;
        assert!(args.parse_predict_values().unwrap().is_none());

        args.predict = Some("invalid".to_string());
        assert!(args.parse_predict_values().is_err());

        args.predict = Some("2.5,1,2,3".to_string());
        assert!(args.parse_predict_values().is_err());

        // recency beyond T
        args.predict = Some("2,50,38,10".to_string());
        assert!(args.parse_predict_values().is_err());
    }

    #[test]
    fn test_data_source() {
        assert_eq!(args(&[]).data_source(), DataSource::File("data.csv".to_string()));
        assert_eq!(
            args(&["-i", "rfm.csv"]).data_source(),
            DataSource::File("rfm.csv".to_string())
        );
        assert_eq!(
            args(&["--simulate", "500", "--seed", "7"]).data_source(),
            DataSource::Simulated {
                customers: 500,
                seed: 7
            }
        );
        assert!(Args::try_parse_from(["clvforge", "-i", "a.csv", "--simulate", "5"]).is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let args = args(&["--horizon", "12", "--discount-rate", "0.05", "-k", "5"]);
        let mut config = ClvConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.horizon_periods, 12);
        assert_eq!(config.discount_rate, 0.05);
        assert_eq!(config.tier_count, 5);
        assert_eq!(config.penalizer_coefficient_bgnbd, 0.001);
    }
}
