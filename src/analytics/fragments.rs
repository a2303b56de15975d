//! Analytics view and the fragments it is assembled from.
//!
//! Fragment payloads come from the backend as either a list of records or
//! a map of records keyed by habit id (or country). Both decode to the same
//! record types; map keys fill in the record's key field when absent.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AnalyticsScope, Metric};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Streak {
    #[serde(default)]
    pub habit_id: String,
    #[serde(default)]
    pub habit_name: String,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub max_streak: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRate {
    #[serde(default)]
    pub habit_id: String,
    #[serde(default)]
    pub habit_name: String,
    #[serde(default)]
    pub completion_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    #[serde(default)]
    pub habit_a: String,
    #[serde(default)]
    pub habit_b: String,
    #[serde(default)]
    pub correlation: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HabitPopularity {
    #[serde(default)]
    pub habit_name: String,
    #[serde(default)]
    pub user_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DropOff {
    #[serde(default)]
    pub habit_id: String,
    #[serde(default)]
    pub habit_name: String,
    /// 1 when the habit was abandoned inside the backend's window.
    #[serde(default)]
    pub drop_off_rate: f64,
    #[serde(default)]
    pub days_active: i64,
}

impl DropOff {
    pub fn dropped(&self) -> bool {
        self.drop_off_rate > 0.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirstWeekSuccess {
    #[serde(default)]
    pub habit_id: String,
    #[serde(default)]
    pub habit_name: String,
    #[serde(default)]
    pub success_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveUsers {
    #[serde(default)]
    pub daily: u64,
    #[serde(default)]
    pub weekly: u64,
    #[serde(default)]
    pub monthly: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    #[serde(default)]
    pub active_users: ActiveUsers,
    #[serde(default)]
    pub avg_habits_per_user: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeographicTrend {
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub total_habits: u64,
    #[serde(default)]
    pub total_events: u64,
    #[serde(default)]
    pub active_users: u64,
}

/// One scope's analytics. Every fragment starts at its default and is
/// replaced only by a successfully decoded response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsView {
    pub scope: AnalyticsScope,
    /// Consistency score for a person, average consistency globally.
    pub consistency: Option<f64>,
    pub streaks: Vec<Streak>,
    pub completion_rates: Vec<CompletionRate>,
    pub distribution: BTreeMap<String, f64>,
    pub category_distribution: BTreeMap<String, f64>,
    pub time_heatmap: BTreeMap<String, f64>,
    pub correlations: Vec<Correlation>,
    pub habit_popularity: Vec<HabitPopularity>,
    pub drop_off_rates: Vec<DropOff>,
    pub first_week_success: Vec<FirstWeekSuccess>,
    pub engagement: Engagement,
    pub geographic_trends: Vec<GeographicTrend>,
    /// Fragments that failed and show defaults.
    pub failed: Vec<Metric>,
}

impl AnalyticsView {
    pub fn empty(scope: AnalyticsScope) -> Self {
        Self {
            scope,
            consistency: None,
            streaks: Vec::new(),
            completion_rates: Vec::new(),
            distribution: BTreeMap::new(),
            category_distribution: BTreeMap::new(),
            time_heatmap: BTreeMap::new(),
            correlations: Vec::new(),
            habit_popularity: Vec::new(),
            drop_off_rates: Vec::new(),
            first_week_success: Vec::new(),
            engagement: Engagement::default(),
            geographic_trends: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Decode one fragment response into the view. On error the fragment
    /// keeps its current value.
    pub fn apply(&mut self, metric: Metric, value: Value) -> Result<(), serde_json::Error> {
        match metric {
            Metric::Consistency => self.consistency = score(&value),
            Metric::Streaks => self.streaks = records(value, "habit_id")?,
            Metric::CompletionRates => self.completion_rates = records(value, "habit_id")?,
            Metric::Distribution => self.distribution = counts(value)?,
            Metric::CategoryDistribution => self.category_distribution = counts(value)?,
            Metric::TimeHeatmap => self.time_heatmap = counts(value)?,
            Metric::Correlations => self.correlations = records(value, "habit_a")?,
            Metric::HabitPopularity => self.habit_popularity = records(value, "habit_name")?,
            Metric::DropOffRates => self.drop_off_rates = records(value, "habit_id")?,
            Metric::FirstWeekSuccess => self.first_week_success = records(value, "habit_id")?,
            Metric::Engagement => {
                self.engagement = if value.is_null() {
                    Engagement::default()
                } else {
                    serde_json::from_value(value)?
                }
            }
            Metric::GeographicTrends => self.geographic_trends = records(value, "country")?,
        }
        Ok(())
    }
}

/// Accepts a bare number or an object carrying `consistency_score` or
/// `average_consistency`. Anything else, including NaN, is missing.
fn score(value: &Value) -> Option<f64> {
    let raw = match value {
        Value::Number(n) => n.as_f64(),
        Value::Object(map) => ["consistency_score", "average_consistency"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_f64)),
        _ => None,
    };
    raw.filter(|v| v.is_finite())
}

/// Decode a list of records, or a map of records whose keys become
/// `key_field` where the record lacks it. Null decodes as empty.
pub(crate) fn records<T: DeserializeOwned>(
    value: Value,
    key_field: &str,
) -> Result<Vec<T>, serde_json::Error> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.into_iter().map(serde_json::from_value).collect(),
        Value::Object(map) => map
            .into_iter()
            .map(|(key, mut record)| {
                if let Value::Object(fields) = &mut record {
                    fields
                        .entry(key_field.to_string())
                        .or_insert(Value::String(key));
                }
                serde_json::from_value(record)
            })
            .collect(),
        other => serde_json::from_value(other),
    }
}

/// Decode a `{key: count}` mapping. Null counts become 0.
fn counts(value: Value) -> Result<BTreeMap<String, f64>, serde_json::Error> {
    if value.is_null() {
        return Ok(BTreeMap::new());
    }
    let raw: BTreeMap<String, Option<f64>> = serde_json::from_value(value)?;
    Ok(raw
        .into_iter()
        .map(|(key, count)| (key, count.unwrap_or(0.0)))
        .collect())
}
