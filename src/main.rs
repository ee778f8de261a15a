//! clvforge: customer lifetime value CLI
//!
//! This is the main entrypoint that orchestrates data loading, model fitting,
//! scoring, segmentation, visualization, and prediction.

use anyhow::{Context, Result};
use clap::Parser;
use clvforge::cli::DataSource;
use clvforge::data::{expected_purchases_column, CustomerRecord};
use clvforge::synthetic::{simulate_customers, SimulationSettings};
use clvforge::{
    load_feature_table, predict_customer, run_analysis, viz, write_scored_table, Args,
    BgNbdFitter, ClvConfig, GammaGammaFitter,
};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let default_level = if args.verbose {
        "clvforge=debug"
    } else {
        "clvforge=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.parse()?))
        .init();

    let mut config = ClvConfig::load(args.config.as_deref())?;
    args.apply_overrides(&mut config);
    config.validate().context("Invalid configuration")?;
    info!(
        horizon_periods = config.horizon_periods,
        sub_period_unit = %config.sub_period_unit,
        data_unit = %config.data_unit,
        discount_rate = config.discount_rate,
        tier_count = config.tier_count,
        "configuration loaded"
    );

    // Check if in prediction mode
    if let Some(record) = args.parse_predict_values()? {
        run_prediction_mode(&args, &config, record)?;
    } else {
        run_full_pipeline(&args, &config)?;
    }

    Ok(())
}

fn load_records(args: &Args) -> Result<Vec<CustomerRecord>> {
    match args.data_source() {
        DataSource::File(path) => {
            info!(path = %path, "loading feature table");
            load_feature_table(&path).with_context(|| format!("Failed to load {path}"))
        }
        DataSource::Simulated { customers, seed } => {
            info!(customers, seed, "simulating customers");
            let settings = SimulationSettings {
                n_customers: customers,
                seed,
                ..SimulationSettings::default()
            };
            Ok(simulate_customers(&settings)?)
        }
    }
}

/// Run prediction mode for a single customer
fn run_prediction_mode(args: &Args, config: &ClvConfig, record: CustomerRecord) -> Result<()> {
    println!("=== Prediction Mode ===");
    println!(
        "Input: frequency={}, recency={}, T={}, monetary={}",
        record.frequency, record.recency, record.age, record.monetary
    );

    let start_time = Instant::now();

    let training: Vec<CustomerRecord> = load_records(args)?
        .into_iter()
        .filter(|r| r.frequency >= config.min_frequency)
        .collect();
    info!(customers = training.len(), "fitting models");

    let bgnbd = BgNbdFitter::new(config.penalizer_coefficient_bgnbd)
        .with_optimizer(config.optimizer.clone())
        .fit(&training)?;
    let gamma_gamma = GammaGammaFitter::new(config.penalizer_coefficient_gg)
        .with_optimizer(config.optimizer.clone())
        .fit(&training)?;

    let prediction = predict_customer(bgnbd.params(), gamma_gamma.params(), &record, config)?;
    let elapsed = start_time.elapsed();

    println!();
    for (horizon, expected) in &prediction.expected_purchases {
        println!(
            "  {:<24} {:.3}",
            expected_purchases_column(*horizon),
            expected
        );
    }
    println!("  {:<24} {:.3}", "prob_alive", prediction.prob_alive);
    println!(
        "  {:<24} {:.2}",
        "expected_average_value", prediction.expected_average_value
    );
    println!("\n✓ Predicted CLTV: {:.2}", prediction.clv);
    println!("  Processing time: {:.2}s", elapsed.as_secs_f64());

    Ok(())
}

/// Run full CLTV pipeline
fn run_full_pipeline(args: &Args, config: &ClvConfig) -> Result<()> {
    println!("=== Full CLTV Pipeline ===\n");

    let start_time = Instant::now();

    let records = load_records(args)?;
    println!("✓ Data loaded: {} customers", records.len());

    let analysis = run_analysis(records, config)?;
    let fit_time = start_time.elapsed();

    let bg = analysis.bgnbd.params();
    let gg = analysis.gamma_gamma.params();
    println!(
        "✓ Models fitted on {} customers ({} below min frequency excluded)",
        analysis.table.len(),
        analysis.excluded_customers
    );
    println!(
        "  BG/NBD:      r={:.4}, alpha={:.4}, a={:.4}, b={:.4}",
        bg.r, bg.alpha, bg.a, bg.b
    );
    println!(
        "  Gamma-Gamma: p={:.4}, q={:.4}, v={:.4}",
        gg.p, gg.q, gg.v
    );
    if let Some(rho) = analysis.frequency_monetary_correlation {
        println!("  Frequency/monetary correlation: {rho:.3}");
    }

    println!("\n=== Expected Transactions ===");
    for total in &analysis.horizon_totals {
        println!(
            "  {:>6} {}: {:>10.1} (population model {:.1})",
            total.horizon, config.data_unit, total.conditional, total.population
        );
    }

    viz::print_segment_statistics(&analysis.segmentation.summarize());

    let top = analysis.top_customers(args.top);
    if !top.is_empty() {
        println!("\n=== Top {} Customers ===", top.len());
        for (record, clv, segment) in top {
            println!(
                "  {:<16} {:>10.2}  segment {}  (frequency {}, monetary {:.2})",
                record.customer_id, clv, segment, record.frequency, record.monetary
            );
        }
    }

    if let Some(output) = &args.output {
        write_scored_table(&analysis.table, output)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        println!("\nScored table saved to: {}", output.display());
    }

    viz::generate_visualization_report(&analysis, &args.plot)?;
    println!("Main plot saved to: {}", args.plot.display());
    println!(
        "Segment chart saved to: {}",
        viz::segment_chart_path(&args.plot).display()
    );

    let total_time = start_time.elapsed();
    info!(fit_secs = fit_time.as_secs_f64(), "analysis finished");
    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", total_time.as_secs_f64());

    Ok(())
}
