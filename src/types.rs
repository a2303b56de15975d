//! Backend entity types and write payloads.
//!
//! Field names mirror the backend JSON (snake_case). Timestamps stay as the
//! strings the backend sends; the core never reinterprets them.

use chrono::Utc;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

/// Habit names offered by the random habit picker, grouped by category.
pub const HABIT_CATALOGUE: &[(&str, &[&str])] = &[
    (
        "Health",
        &["Exercise", "Hydration", "Sleep", "Meditation", "Healthy Eating"],
    ),
    (
        "Personal Development",
        &["Reading", "Learning a Skill", "Journaling", "Language Learning"],
    ),
    (
        "Productivity",
        &["Time Management", "Planning", "Organization"],
    ),
    (
        "Social",
        &["Connect with Friends", "Volunteering", "Networking"],
    ),
    ("Financial", &["Saving Money", "Budgeting", "Investing"]),
];

/// Goal assigned to habits created from the dashboard.
pub const DEFAULT_GOAL: &str = "Daily";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub person_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Person {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Habit {
    pub habit_id: String,
    pub person_id: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streak: Option<u32>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitEvent {
    pub event_id: String,
    pub habit_id: String,
    #[serde(default)]
    pub person_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Older backends tag events with a type instead of a status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
}

/// Body of `POST /api/habits`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHabit {
    pub person_id: String,
    pub name: String,
    pub category: String,
    pub goal: String,
}

impl NewHabit {
    /// Pick a random category and habit name from [`HABIT_CATALOGUE`].
    pub fn random(person_id: &str) -> Self {
        let mut rng = rand::rng();
        let (category, names) = HABIT_CATALOGUE
            .choose(&mut rng)
            .copied()
            .unwrap_or(HABIT_CATALOGUE[0]);
        let name = names.choose(&mut rng).copied().unwrap_or(names[0]);

        Self {
            person_id: person_id.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            goal: DEFAULT_GOAL.to_string(),
        }
    }
}

/// Body of `POST /api/habit_events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHabitEvent {
    pub habit_id: String,
    pub person_id: String,
    pub timestamp: String,
    pub notes: String,
    pub status: String,
}

impl NewHabitEvent {
    /// A "completed" event for `habit`, stamped now.
    pub fn completion(habit: &Habit) -> Self {
        Self {
            habit_id: habit.habit_id.clone(),
            person_id: habit.person_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            notes: "Completed habit".to_string(),
            status: "completed".to_string(),
        }
    }
}

/// One element of the `POST /api/persons` bulk body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPerson {
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Backend dependency health from `GET /api/system/status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    #[serde(default)]
    pub mongo: bool,
    #[serde(default)]
    pub kafka: bool,
    #[serde(default)]
    pub flask: bool,
}

impl ServiceStatus {
    /// Labelled rows in display order.
    pub fn rows(&self) -> [(&'static str, bool); 3] {
        [
            ("MongoDB", self.mongo),
            ("Kafka", self.kafka),
            ("Flask (API)", self.flask),
        ]
    }
}
