//! Quantile segmentation of customers into ordered tiers

use crate::error::CltvError;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// One of `tier_count` ordered tiers; index 0 holds the lowest scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tier {
    index: usize,
    tier_count: usize,
}

impl Tier {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn tier_count(&self) -> usize {
        self.tier_count
    }

    /// Letter label with the highest tier as `A`; `T1..Tn` (T1 highest)
    /// when there are more tiers than letters.
    pub fn label(&self) -> String {
        let rank = self.tier_count - 1 - self.index;
        if self.tier_count <= 26 {
            char::from(b'A' + rank as u8).to_string()
        } else {
            format!("T{}", rank + 1)
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Tier assignment of every customer, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    cut_points: Vec<f64>,
    customer_ids: Vec<String>,
    scores: Vec<f64>,
    tiers: Vec<Tier>,
}

/// Per-tier statistics of the segmented score.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSummary {
    pub tier: Tier,
    pub count: usize,
    pub mean: f64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl Segmentation {
    /// The `tier_count + 1` quantile edges, from minimum to maximum score.
    pub fn cut_points(&self) -> &[f64] {
        &self.cut_points
    }

    pub fn tier_count(&self) -> usize {
        self.cut_points.len() - 1
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn customer_ids(&self) -> &[String] {
        &self.customer_ids
    }

    /// Tier labels in input order.
    pub fn labels(&self) -> Vec<String> {
        self.tiers.iter().map(Tier::label).collect()
    }

    pub fn to_map(&self) -> HashMap<String, Tier> {
        self.customer_ids
            .iter()
            .cloned()
            .zip(self.tiers.iter().copied())
            .collect()
    }

    /// Count, mean, sum, min and max of the score per tier, highest tier first.
    /// Tiers without customers are omitted.
    pub fn summarize(&self) -> Vec<SegmentSummary> {
        let mut summaries: Vec<SegmentSummary> = (0..self.tier_count())
            .rev()
            .map(|index| SegmentSummary {
                tier: Tier {
                    index,
                    tier_count: self.tier_count(),
                },
                count: 0,
                mean: 0.0,
                sum: 0.0,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
            })
            .collect();

        let top = self.tier_count() - 1;
        for (tier, &score) in self.tiers.iter().zip(&self.scores) {
            let summary = &mut summaries[top - tier.index];
            summary.count += 1;
            summary.sum += score;
            summary.min = summary.min.min(score);
            summary.max = summary.max.max(score);
        }

        summaries.retain(|s| s.count > 0);
        for summary in &mut summaries {
            summary.mean = summary.sum / summary.count as f64;
        }
        summaries
    }
}

/// Split customers into `tier_count` tiers at the empirical quantiles of `scores`.
///
/// Edges are linearly interpolated order statistics at `k / tier_count`; bins
/// are right-closed and the lowest bin also holds the minimum.
///
/// # Arguments
/// * `customer_ids` - One id per score, in the same order
/// * `scores` - Finite scores, typically CLTV
/// * `tier_count` - Number of tiers, at least 1
///
/// # Returns
/// * Segmentation with cut points and one tier per customer, or
///   `DegenerateDistribution` when two cut points coincide
pub fn assign_segments<I, S>(
    customer_ids: I,
    scores: &[f64],
    tier_count: usize,
) -> crate::Result<Segmentation>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    if tier_count == 0 {
        return Err(CltvError::InvalidArgument(
            "tier count must be at least 1".to_string(),
        ));
    }
    let customer_ids: Vec<String> = customer_ids.into_iter().map(Into::into).collect();
    if customer_ids.len() != scores.len() {
        return Err(CltvError::InvalidArgument(format!(
            "{} customer ids for {} scores",
            customer_ids.len(),
            scores.len()
        )));
    }

    let mut seen = HashSet::with_capacity(customer_ids.len());
    for (id, score) in customer_ids.iter().zip(scores) {
        if !seen.insert(id.as_str()) {
            return Err(CltvError::invalid_input(id, "duplicate customer_id"));
        }
        if !score.is_finite() {
            return Err(CltvError::invalid_input(
                id,
                format!("score must be finite, got {score}"),
            ));
        }
    }

    let mut sorted = scores.to_vec();
    sorted.sort_by(f64::total_cmp);
    let distinct = sorted
        .iter()
        .map(|s| s.to_bits())
        .collect::<BTreeSet<_>>()
        .len();

    if sorted.is_empty() {
        return Err(CltvError::DegenerateDistribution {
            distinct,
            tier_count,
        });
    }

    let cut_points: Vec<f64> = (0..=tier_count)
        .map(|k| quantile(&sorted, k as f64 / tier_count as f64))
        .collect();
    if cut_points.windows(2).any(|w| w[0] == w[1]) {
        return Err(CltvError::DegenerateDistribution {
            distinct,
            tier_count,
        });
    }

    let upper_edges = &cut_points[1..];
    let tiers = scores
        .iter()
        .map(|&score| Tier {
            index: upper_edges
                .partition_point(|&edge| edge < score)
                .min(tier_count - 1),
            tier_count,
        })
        .collect();

    Ok(Segmentation {
        cut_points,
        customer_ids,
        scores: scores.to_vec(),
        tiers,
    })
}

/// Linear-interpolated quantile of an ascending, non-empty slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}
