//! reqwest client for the habit backend.
//!
//! Every request goes through [`send_with_retry`]. Reads repeat on transient
//! failures; writes repeat only when the connection could not be made.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use super::{send_with_retry, HabitApi, Idempotency, RetryPolicy};
use crate::analytics::{AnalyticsScope, Metric};
use crate::config::Config;
use crate::error::ApiError;
use crate::types::{Habit, HabitEvent, NewHabit, NewHabitEvent, NewPerson, Person, ServiceStatus};

pub struct HttpHabitApi {
    client: reqwest::Client,
    base: Url,
    retry: RetryPolicy,
}

impl HttpHabitApi {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let base = Url::parse(config.api_url.trim())
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", config.api_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(config.api_url.clone()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(ApiError::from)?;

        Ok(Self {
            client,
            base,
            retry: config.retry.clone(),
        })
    }

    /// `{base}/api/{segments...}`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    fn metric_url(&self, scope: &AnalyticsScope, metric: Metric) -> Result<Url, ApiError> {
        let mut url = self.endpoint(&["analytics", metric.path()])?;
        if let AnalyticsScope::Person(person_id) = scope {
            url.query_pairs_mut().append_pair("person_id", person_id);
        }
        Ok(url)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        kind: Idempotency,
    ) -> Result<reqwest::Response, ApiError> {
        let resp = send_with_retry(request, &self.retry, kind).await?;
        ensure_success(resp).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let resp = self.send(self.client.get(url), Idempotency::Read).await?;
        resp.json::<T>().await.map_err(ApiError::from)
    }

    async fn post_json<B, T>(&self, url: Url, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.client.post(url).json(body);
        let resp = self.send(request, Idempotency::Write).await?;
        resp.json::<T>().await.map_err(ApiError::from)
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        message: text,
    })
}

#[async_trait]
impl HabitApi for HttpHabitApi {
    async fn list_persons(&self) -> Result<Vec<Person>, ApiError> {
        self.get_json(self.endpoint(&["persons"])?).await
    }

    async fn create_persons(&self, persons: &[NewPerson]) -> Result<(), ApiError> {
        let request = self.client.post(self.endpoint(&["persons"])?).json(persons);
        self.send(request, Idempotency::Write).await.map(|_| ())
    }

    async fn list_habits(&self, person_id: &str) -> Result<Vec<Habit>, ApiError> {
        self.get_json(self.endpoint(&["persons", person_id, "habits"])?)
            .await
    }

    async fn list_events(&self, habit_id: &str) -> Result<Vec<HabitEvent>, ApiError> {
        self.get_json(self.endpoint(&["habits", habit_id, "events"])?)
            .await
    }

    async fn create_habit(&self, habit: &NewHabit) -> Result<Habit, ApiError> {
        self.post_json(self.endpoint(&["habits"])?, habit).await
    }

    async fn delete_habit(&self, habit_id: &str) -> Result<(), ApiError> {
        let request = self.client.delete(self.endpoint(&["habits", habit_id])?);
        self.send(request, Idempotency::Write).await.map(|_| ())
    }

    async fn create_event(&self, event: &NewHabitEvent) -> Result<HabitEvent, ApiError> {
        self.post_json(self.endpoint(&["habit_events"])?, event).await
    }

    async fn fetch_metric(
        &self,
        scope: &AnalyticsScope,
        metric: Metric,
    ) -> Result<serde_json::Value, ApiError> {
        self.get_json(self.metric_url(scope, metric)?).await
    }

    async fn service_status(&self) -> Result<ServiceStatus, ApiError> {
        self.get_json(self.endpoint(&["system", "status"])?).await
    }
}
