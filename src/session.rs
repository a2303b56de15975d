//! Session-wide wiring of cache, cascade, analytics and log.
//!
//! One `Session` per signed-in dashboard, shared as `Arc<Session>`.
//! `init()` loads the hierarchy, `clear()` drops everything cached.
//! Mutations go through the session so the analytics they affect are
//! refreshed before the call returns.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::analytics::{AnalyticsScope, AnalyticsView, AnalyticsViewModel};
use crate::api::{HabitApi, HttpHabitApi};
use crate::cache::ResourceCache;
use crate::cascade::{AlertSink, CascadeCoordinator, ChangeEvent, LogAlertSink, RefreshSummary};
use crate::config::Config;
use crate::error::SyncError;
use crate::log_sink::LogSink;
use crate::types::{Habit, HabitEvent, NewHabit, NewPerson, Person, ServiceStatus};

pub struct Session {
    config: Config,
    api: Arc<dyn HabitApi>,
    log: Arc<LogSink>,
    cache: Arc<ResourceCache>,
    cascade: CascadeCoordinator,
    analytics: Arc<AnalyticsViewModel>,
    /// Wakes the refresh poller early.
    pub refresh_wake: Notify,
}

impl Session {
    pub fn new(config: Config, api: Arc<dyn HabitApi>, alerts: Arc<dyn AlertSink>) -> Self {
        let log = Arc::new(LogSink::with_capacity(config.log_capacity));
        let cache = Arc::new(ResourceCache::new(
            Arc::clone(&api),
            Arc::clone(&log),
            config.coalesce_in_flight,
        ));
        let cascade = CascadeCoordinator::new(
            Arc::clone(&api),
            Arc::clone(&cache),
            Arc::clone(&log),
            alerts,
        );
        let analytics = Arc::new(AnalyticsViewModel::new(Arc::clone(&api), Arc::clone(&log)));

        let listener_target = Arc::clone(&analytics);
        cascade.subscribe(Arc::new(move |event: &ChangeEvent| {
            listener_target.mark_changed(event)
        }));

        Self {
            config,
            api,
            log,
            cache,
            cascade,
            analytics,
            refresh_wake: Notify::new(),
        }
    }

    /// Session against the HTTP backend named in `config`, alerting via the log.
    pub fn from_config(config: Config) -> Result<Self, SyncError> {
        let api = HttpHabitApi::new(&config)
            .map_err(|e| SyncError::Config(format!("Failed to create API client: {}", e)))?;
        Ok(Self::new(config, Arc::new(api), Arc::new(LogAlertSink)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn log(&self) -> &Arc<LogSink> {
        &self.log
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    pub fn analytics(&self) -> &Arc<AnalyticsViewModel> {
        &self.analytics
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Load persons and cascade down to events.
    pub async fn init(&self) -> Result<Arc<Vec<Person>>, SyncError> {
        log::info!("Session starting against {}", self.config.api_url);
        let persons = self.cascade.load_root().await?;
        log::info!("Session loaded {} persons", persons.len());
        Ok(persons)
    }

    /// Drop every cached collection and analytics view. The log is kept.
    pub fn clear(&self) {
        self.cache.clear();
        self.analytics.clear();
        log::info!("Session cleared");
    }

    /// Refresh every level and every visible analytics scope.
    pub async fn refresh(&self) -> RefreshSummary {
        let summary = self.cascade.refresh_all().await;
        for scope in self.analytics.visible_scopes() {
            self.analytics.refresh(&scope).await;
        }
        summary
    }

    /// Ask the refresh poller to run now.
    pub fn wake_refresh(&self) {
        self.refresh_wake.notify_one();
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    pub async fn create_habit(&self, new: NewHabit) -> Result<Habit, SyncError> {
        let created = self.cascade.create_habit(new).await?;
        self.analytics.refresh_dirty().await;
        Ok(created)
    }

    pub async fn create_random_habit(&self, person: &Person) -> Result<Habit, SyncError> {
        let created = self.cascade.create_random_habit(person).await?;
        self.analytics.refresh_dirty().await;
        Ok(created)
    }

    pub async fn delete_habit(&self, habit: &Habit) -> Result<(), SyncError> {
        self.cascade.delete_habit(habit).await?;
        self.analytics.refresh_dirty().await;
        Ok(())
    }

    pub async fn complete_habit(&self, habit: &Habit) -> Result<HabitEvent, SyncError> {
        let created = self.cascade.complete_habit(habit).await?;
        self.analytics.refresh_dirty().await;
        Ok(created)
    }

    pub async fn create_persons(&self, persons: &[NewPerson]) -> Result<usize, SyncError> {
        let added = self.cascade.create_persons(persons).await?;
        self.analytics.refresh_dirty().await;
        Ok(added)
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    pub async fn show_analytics(&self, scope: AnalyticsScope) -> Option<Arc<AnalyticsView>> {
        self.analytics.show(scope).await
    }

    pub fn hide_analytics(&self, scope: &AnalyticsScope) {
        self.analytics.hide(scope);
    }

    /// Backend dependency health. Any failure reads as everything down.
    pub async fn service_status(&self) -> ServiceStatus {
        match self.api.service_status().await {
            Ok(status) => status,
            Err(e) => {
                log::warn!("Error fetching service status: {}", e);
                ServiceStatus::default()
            }
        }
    }

    /// Persons with their cached habits and event counts, one line each.
    pub fn dashboard_lines(&self) -> Vec<String> {
        let Some(persons) = self.cache.persons() else {
            return vec!["No persons loaded".to_string()];
        };
        if persons.is_empty() {
            return vec!["No persons found".to_string()];
        }

        let mut lines = Vec::new();
        for person in persons.iter() {
            lines.push(format!("{} ({})", person.display_name(), person.person_id));
            match self.cache.habits(&person.person_id) {
                None => lines.push("  habits not loaded".to_string()),
                Some(habits) if habits.is_empty() => lines.push("  no habits".to_string()),
                Some(habits) => {
                    for habit in habits.iter() {
                        let events = self
                            .cache
                            .events(&habit.habit_id)
                            .map(|e| e.len().to_string())
                            .unwrap_or_else(|| "?".to_string());
                        lines.push(format!(
                            "  {} [{}] goal {}, streak {}, {} events",
                            habit.name,
                            habit.category,
                            habit.goal,
                            habit.streak.unwrap_or(0),
                            events
                        ));
                    }
                }
            }
        }
        lines
    }
}
