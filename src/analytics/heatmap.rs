//! Time-of-day heatmap normalization.

use std::collections::BTreeMap;

/// Intensity shown for empty or unreadable buckets so every cell stays visible.
pub const MIN_CELL_INTENSITY: f64 = 0.1;

/// Cells whose count exceeds this share of the maximum get light text.
const LIGHT_TEXT_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapCell {
    pub bucket: String,
    pub count: f64,
    /// `count / max` clamped to 1; [`MIN_CELL_INTENSITY`] when that is zero.
    pub intensity: f64,
    pub light_text: bool,
}

/// Largest usable count, or 1 when there is none.
///
/// Non-finite and non-positive counts are ignored, so an empty or all-zero
/// mapping normalizes against 1 instead of dividing by zero.
pub fn normalization_max<'a>(counts: impl IntoIterator<Item = &'a f64>) -> f64 {
    counts
        .into_iter()
        .copied()
        .filter(|c| c.is_finite() && *c > 0.0)
        .fold(None, |max: Option<f64>, c| Some(max.map_or(c, |m| m.max(c))))
        .unwrap_or(1.0)
}

/// `min(count / max, 1)`.
///
/// Only a zero, negative or non-finite ratio is replaced by
/// [`MIN_CELL_INTENSITY`]; small real ratios are shown as they are.
pub fn intensity(count: f64, max: f64) -> f64 {
    if !count.is_finite() {
        return MIN_CELL_INTENSITY;
    }
    let max = if max.is_finite() && max > 0.0 { max } else { 1.0 };
    let raw = (count / max).min(1.0);
    if raw.is_finite() && raw > 0.0 {
        raw
    } else {
        MIN_CELL_INTENSITY
    }
}

pub fn cells(counts: &BTreeMap<String, f64>) -> Vec<HeatmapCell> {
    let max = normalization_max(counts.values());
    counts
        .iter()
        .map(|(bucket, &count)| HeatmapCell {
            bucket: bucket.clone(),
            count,
            intensity: intensity(count, max),
            light_text: count > max * LIGHT_TEXT_THRESHOLD,
        })
        .collect()
}
