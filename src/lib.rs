//! clvforge: customer lifetime value estimation with BG/NBD and Gamma-Gamma models
//!
//! Fits a purchase-frequency/dropout model and a monetary-value model to
//! per-customer transaction summaries, combines their conditional expectations
//! into a discounted CLTV score and segments customers by that score.

pub mod bgnbd;
pub mod cli;
pub mod clv;
pub mod config;
pub mod data;
pub mod error;
pub mod gamma_gamma;
pub mod optimizer;
pub mod pipeline;
pub mod segment;
pub mod special;
pub mod synthetic;
pub mod viz;

// Re-export public items for easier access
pub use bgnbd::{BgNbdFitter, BgNbdModel, BgNbdParams};
pub use cli::Args;
pub use clv::{customer_lifetime_value, ClvSettings, TimeUnit};
pub use config::ClvConfig;
pub use data::{load_feature_table, write_scored_table, CustomerRecord, ScoredTable};
pub use error::CltvError;
pub use gamma_gamma::{GammaGammaFitter, GammaGammaModel, GammaGammaParams};
pub use pipeline::{predict_customer, run_analysis, Analysis};
pub use segment::{assign_segments, Segmentation, Tier};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, CltvError>;
