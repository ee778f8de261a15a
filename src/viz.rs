//! Visualization functions using Plotters for the CLTV segments

use crate::data::{CustomerRecord, CLV_COLUMN};
use crate::error::CltvError;
use crate::pipeline::Analysis;
use crate::segment::{SegmentSummary, Tier};
use plotters::prelude::*;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

/// Color palette for segments, highest tier first
const SEGMENT_COLORS: [RGBColor; 6] = [GREEN, BLUE, MAGENTA, RED, CYAN, BLACK];

fn segment_color(tier: Tier) -> RGBColor {
    let rank = tier.tier_count() - 1 - tier.index();
    SEGMENT_COLORS[rank % SEGMENT_COLORS.len()]
}

fn plot_error(e: impl std::fmt::Display) -> CltvError {
    CltvError::Plot(e.to_string())
}

/// Scatter plot of frequency against CLTV, colored by segment
pub fn create_clv_scatter(
    records: &[CustomerRecord],
    clv: &[f64],
    tiers: &[Tier],
    output_path: &Path,
) -> crate::Result<()> {
    if records.len() != clv.len() || records.len() != tiers.len() {
        return Err(CltvError::InvalidArgument(format!(
            "scatter needs one CLTV and one tier per record ({} records, {} values, {} tiers)",
            records.len(),
            clv.len(),
            tiers.len()
        )));
    }

    let max_frequency = records.iter().map(|r| r.frequency).max().unwrap_or(0) as f64;
    let max_clv = clv.iter().copied().fold(0.0, f64::max);
    let y_max = if max_clv > 0.0 { max_clv * 1.1 } else { 1.0 };

    let root = SVGBackend::new(output_path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Customer Lifetime Value by Frequency", ("sans-serif", 26))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(0f64..(max_frequency + 1.0), 0f64..y_max)
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .x_desc("Repeat purchases (frequency)")
        .y_desc("CLTV")
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(plot_error)?;

    let mut present: Vec<Tier> = tiers.to_vec();
    present.sort();
    present.dedup();

    // one series per segment, highest first, so the legend reads A, B, ...
    for &tier in present.iter().rev() {
        let color = segment_color(tier);
        let points = records
            .iter()
            .zip(clv)
            .zip(tiers)
            .filter(|(_, t)| **t == tier)
            .map(|((record, &value), _)| {
                Circle::new((record.frequency as f64, value), 3, color.filled())
            });

        chart
            .draw_series(points)
            .map_err(plot_error)?
            .label(format!("Segment {}", tier.label()))
            .legend(move |(x, y)| Circle::new((x + 5, y), 4, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_error)?;

    root.present().map_err(plot_error)?;
    info!(path = %output_path.display(), "CLTV scatter saved");

    Ok(())
}

/// Bar chart of total CLTV per segment
pub fn create_segment_value_chart(
    summaries: &[SegmentSummary],
    output_path: &Path,
) -> crate::Result<()> {
    if summaries.is_empty() {
        return Err(CltvError::InvalidArgument(
            "no segments to chart".to_string(),
        ));
    }
    let max_sum = summaries.iter().map(|s| s.sum).fold(0.0, f64::max);
    let y_max = if max_sum > 0.0 { max_sum * 1.1 } else { 1.0 };
    let labels: Vec<String> = summaries.iter().map(|s| s.tier.label()).collect();
    let n = summaries.len() as f64;

    let root = SVGBackend::new(output_path, (600, 400)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Total CLTV per Segment", ("sans-serif", 26))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(-0.5f64..(n - 0.5), 0f64..y_max)
        .map_err(plot_error)?;

    let label_at = |x: &f64| {
        let nearest = x.round();
        if (x - nearest).abs() < 1e-6 && nearest >= 0.0 {
            labels.get(nearest as usize).cloned().unwrap_or_default()
        } else {
            String::new()
        }
    };

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(summaries.len())
        .x_label_formatter(&label_at)
        .x_desc("Segment")
        .y_desc("Total CLTV")
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(plot_error)?;

    for (i, summary) in summaries.iter().enumerate() {
        let color = segment_color(summary.tier);
        let x = i as f64;
        chart
            .draw_series(std::iter::once(Rectangle::new(
                [(x - 0.4, 0.0), (x + 0.4, summary.sum)],
                color.filled(),
            )))
            .map_err(plot_error)?;
    }

    root.present().map_err(plot_error)?;
    info!(path = %output_path.display(), "segment value chart saved");

    Ok(())
}

/// Fixed-width table of the per-segment statistics
pub fn format_segment_statistics(summaries: &[SegmentSummary]) -> String {
    let total: usize = summaries.iter().map(|s| s.count).sum();
    let mut out = String::new();
    let _ = writeln!(out, "  Segment | Customers |  Share |     Mean CLTV |    Total CLTV");
    let _ = writeln!(out, "  --------|-----------|--------|---------------|--------------");
    for s in summaries {
        let share = if total > 0 {
            s.count as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let _ = writeln!(
            out,
            "  {:>7} | {:>9} | {:>5.1}% | {:>13.2} | {:>13.2}",
            s.tier.label(),
            s.count,
            share,
            s.mean,
            s.sum
        );
    }
    out
}

/// Print segment statistics to console
pub fn print_segment_statistics(summaries: &[SegmentSummary]) {
    println!("\n=== Segment Statistics ===");
    print!("{}", format_segment_statistics(summaries));
}

/// Path of the per-segment bar chart next to the main plot, e.g. `plot_segments.svg`.
pub fn segment_chart_path(base_output_path: &Path) -> PathBuf {
    let stem = base_output_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "clv_plot".to_string());
    base_output_path.with_file_name(format!("{stem}_segments.svg"))
}

/// Generate the scatter plot and the segment bar chart for an analysis
pub fn generate_visualization_report(
    analysis: &Analysis,
    base_output_path: &Path,
) -> crate::Result<()> {
    let clv = analysis
        .table
        .values(CLV_COLUMN)
        .ok_or_else(|| CltvError::Plot("analysis has no CLTV column".to_string()))?;

    create_clv_scatter(
        analysis.table.records(),
        &clv.to_vec(),
        analysis.segmentation.tiers(),
        base_output_path,
    )?;
    create_segment_value_chart(
        &analysis.segmentation.summarize(),
        &segment_chart_path(base_output_path),
    )?;

    Ok(())
}
