//! Backend REST boundary.
//!
//! [`HabitApi`] is the seam the sync layer talks to; [`HttpHabitApi`] is the
//! reqwest implementation. Every response is treated as a full snapshot:
//! no pagination, no ETags, no auth headers.

pub mod client;
pub mod retry;

use async_trait::async_trait;

use crate::analytics::{AnalyticsScope, Metric};
use crate::error::ApiError;
use crate::types::{Habit, HabitEvent, NewHabit, NewHabitEvent, NewPerson, Person, ServiceStatus};

pub use client::HttpHabitApi;
pub use retry::{send_with_retry, Idempotency, RetryPolicy};

#[async_trait]
pub trait HabitApi: Send + Sync {
    /// `GET /api/persons`
    async fn list_persons(&self) -> Result<Vec<Person>, ApiError>;

    /// `POST /api/persons` with a bulk body.
    async fn create_persons(&self, persons: &[NewPerson]) -> Result<(), ApiError>;

    /// `GET /api/persons/{person_id}/habits`
    async fn list_habits(&self, person_id: &str) -> Result<Vec<Habit>, ApiError>;

    /// `GET /api/habits/{habit_id}/events`
    async fn list_events(&self, habit_id: &str) -> Result<Vec<HabitEvent>, ApiError>;

    /// `POST /api/habits`
    async fn create_habit(&self, habit: &NewHabit) -> Result<Habit, ApiError>;

    /// `DELETE /api/habits/{habit_id}`
    async fn delete_habit(&self, habit_id: &str) -> Result<(), ApiError>;

    /// `POST /api/habit_events`
    async fn create_event(&self, event: &NewHabitEvent) -> Result<HabitEvent, ApiError>;

    /// `GET /api/analytics/{metric}`, with `?person_id=` for person scope.
    async fn fetch_metric(
        &self,
        scope: &AnalyticsScope,
        metric: Metric,
    ) -> Result<serde_json::Value, ApiError>;

    /// `GET /api/system/status`
    async fn service_status(&self) -> Result<ServiceStatus, ApiError>;
}
