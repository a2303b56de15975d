//! Text rendering of an analytics view.
//!
//! Missing numbers render as 0 and empty collections as "No data", so a
//! partially loaded view always renders.

use std::fmt;

use super::heatmap;
use super::{AnalyticsScope, AnalyticsView};

pub const NO_DATA: &str = "No data";

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: &'static str,
    pub lines: Vec<String>,
}

impl Section {
    fn new(title: &'static str, lines: Vec<String>) -> Self {
        let lines = if lines.is_empty() {
            vec![NO_DATA.to_string()]
        } else {
            lines
        };
        Self { title, lines }
    }
}

/// `value` with `decimals` places and a `%` suffix; missing or non-finite
/// values render as zero.
pub fn format_percent(value: Option<f64>, decimals: usize) -> String {
    format!("{:.*}%", decimals, finite_or_zero(value))
}

pub fn format_number(value: Option<f64>, decimals: usize) -> String {
    format!("{:.*}", decimals, finite_or_zero(value))
}

fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn count_lines<'a>(
    entries: impl IntoIterator<Item = (&'a String, &'a f64)>,
    unit: &str,
) -> Vec<String> {
    entries
        .into_iter()
        .map(|(key, count)| format!("{}: {} {}", key, count, unit))
        .collect()
}

pub fn sections(view: &AnalyticsView) -> Vec<Section> {
    let heatmap_lines: Vec<String> = heatmap::cells(&view.time_heatmap)
        .into_iter()
        .map(|cell| {
            format!(
                "{}  {:>4}  {:.2}{}",
                cell.bucket,
                cell.count,
                cell.intensity,
                if cell.light_text { " *" } else { "" }
            )
        })
        .collect();

    match view.scope {
        AnalyticsScope::Person(_) => vec![
            Section::new("Consistency Score", vec![format_percent(view.consistency, 2)]),
            Section::new(
                "Current Streaks",
                view.streaks
                    .iter()
                    .map(|s| format!("{}: {} days", s.habit_name, s.current_streak))
                    .collect(),
            ),
            Section::new(
                "Completion Rates",
                view.completion_rates
                    .iter()
                    .map(|r| format!("{}: {}", r.habit_name, format_percent(r.completion_rate, 1)))
                    .collect(),
            ),
            Section::new("Habit Distribution", count_lines(&view.distribution, "habits")),
            Section::new("Time of Day", heatmap_lines),
            Section::new(
                "Correlations",
                view.correlations
                    .iter()
                    .map(|c| {
                        format!(
                            "{} / {}: {}",
                            c.habit_a,
                            c.habit_b,
                            format_number(c.correlation, 2)
                        )
                    })
                    .collect(),
            ),
        ],
        AnalyticsScope::Global => vec![
            Section::new("Average Consistency", vec![format_percent(view.consistency, 2)]),
            Section::new(
                "Habit Popularity",
                view.habit_popularity
                    .iter()
                    .map(|h| format!("{}: {} users", h.habit_name, h.user_count))
                    .collect(),
            ),
            Section::new("Habit Distribution", count_lines(&view.distribution, "habits")),
            Section::new(
                "Category Distribution",
                count_lines(&view.category_distribution, "habits"),
            ),
            Section::new(
                "Drop-off Rates",
                view.drop_off_rates
                    .iter()
                    .map(|d| {
                        format!(
                            "{}: {} ({} days)",
                            d.habit_name,
                            if d.dropped() { "Dropped" } else { "Active" },
                            d.days_active
                        )
                    })
                    .collect(),
            ),
            Section::new(
                "First Week Success",
                view.first_week_success
                    .iter()
                    .map(|f| format!("{}: {}", f.habit_name, format_percent(f.success_rate, 1)))
                    .collect(),
            ),
            Section::new(
                "Engagement Metrics",
                vec![
                    format!("Daily Active Users: {}", view.engagement.active_users.daily),
                    format!("Weekly Active Users: {}", view.engagement.active_users.weekly),
                    format!("Monthly Active Users: {}", view.engagement.active_users.monthly),
                    format!(
                        "Avg Habits/User: {}",
                        format_number(view.engagement.avg_habits_per_user, 2)
                    ),
                ],
            ),
            Section::new(
                "Geographic Trends",
                view.geographic_trends
                    .iter()
                    .map(|g| {
                        format!(
                            "{}: {} habits, {} events, {} active users",
                            g.country, g.total_habits, g.total_events, g.active_users
                        )
                    })
                    .collect(),
            ),
            Section::new("Time of Day", heatmap_lines),
        ],
    }
}

impl fmt::Display for AnalyticsView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Analytics ({})", self.scope)?;
        for section in sections(self) {
            writeln!(f, "  {}", section.title)?;
            for line in &section.lines {
                writeln!(f, "    {}", line)?;
            }
        }
        if !self.failed.is_empty() {
            let names: Vec<&str> = self.failed.iter().map(|m| m.path()).collect();
            writeln!(f, "  (unavailable: {})", names.join(", "))?;
        }
        Ok(())
    }
}
