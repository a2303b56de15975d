//! Keeps the cache hierarchy consistent.
//!
//! Parent collections drive child fetches: every person gets a habit slot
//! and every habit gets an event slot. Mutations write to the backend, then
//! re-fetch exactly the slot they affect, leaving every other slot
//! reference-equal to what it was. The affected slot keeps its old list
//! until the re-fetch succeeds.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinSet;

use crate::analytics::AnalyticsScope;
use crate::api::HabitApi;
use crate::cache::{ResourceCache, SlotKey};
use crate::error::{ApiError, SyncError};
use crate::log_sink::LogSink;
use crate::types::{Habit, HabitEvent, NewHabit, NewHabitEvent, NewPerson, Person};

/// What a successful mutation changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    PersonsChanged,
    HabitsChanged { person_id: String },
    EventsChanged { person_id: String, habit_id: String },
}

impl ChangeEvent {
    /// Whether analytics for `scope` are derived from what changed.
    pub fn affects(&self, scope: &AnalyticsScope) -> bool {
        match (scope, self) {
            (AnalyticsScope::Global, _) => true,
            (AnalyticsScope::Person(_), ChangeEvent::PersonsChanged) => false,
            (AnalyticsScope::Person(id), ChangeEvent::HabitsChanged { person_id })
            | (AnalyticsScope::Person(id), ChangeEvent::EventsChanged { person_id, .. }) => {
                id == person_id
            }
        }
    }
}

pub type ChangeListener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// User-visible notification for failed writes.
pub trait AlertSink: Send + Sync {
    fn alert(&self, message: &str);
}

/// Default sink: alerts go to the `log` facade.
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, message: &str) {
        log::warn!("ALERT: {}", message);
    }
}

/// Counts from a full refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub persons: usize,
    pub habit_lists: usize,
    pub event_lists: usize,
    pub failures: usize,
}

pub struct CascadeCoordinator {
    api: Arc<dyn HabitApi>,
    cache: Arc<ResourceCache>,
    log: Arc<LogSink>,
    alerts: Arc<dyn AlertSink>,
    listeners: Mutex<Vec<ChangeListener>>,
}

impl CascadeCoordinator {
    pub fn new(
        api: Arc<dyn HabitApi>,
        cache: Arc<ResourceCache>,
        log: Arc<LogSink>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            api,
            cache,
            log,
            alerts,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    /// Register a callback invoked after every successful mutation.
    pub fn subscribe(&self, listener: ChangeListener) {
        self.listeners.lock().push(listener);
    }

    fn notify(&self, event: ChangeEvent) {
        log::debug!("change: {:?}", event);
        // Listeners run outside the lock so they may subscribe.
        let listeners: Vec<ChangeListener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(&event);
        }
    }

    // ------------------------------------------------------------------
    // Cascade
    // ------------------------------------------------------------------

    /// Fetch the root list and cascade to every level below it.
    pub async fn load_root(&self) -> Result<Arc<Vec<Person>>, SyncError> {
        let persons = self.cache.fetch_persons().await?;
        self.on_persons_changed(&persons).await;
        Ok(persons)
    }

    /// Fetch habits for every person without a habit slot, then events for
    /// the habits of those persons. Persons that already have a slot are
    /// left alone.
    pub async fn on_persons_changed(&self, persons: &[Person]) {
        let mut tasks = JoinSet::new();
        for person in persons {
            if self.cache.contains(&SlotKey::habits(&person.person_id)) {
                continue;
            }
            let cache = Arc::clone(&self.cache);
            let person_id = person.person_id.clone();
            tasks.spawn(async move {
                let Ok(habits) = cache.fetch_habits(&person_id).await else {
                    return;
                };
                fetch_missing_events(&cache, &habits).await;
            });
        }
        drain(&mut tasks).await;
    }

    /// Fetch events for every cached habit of `person_id` without an event slot.
    pub async fn on_habits_changed(&self, person_id: &str) {
        if let Some(habits) = self.cache.habits(person_id) {
            fetch_missing_events(&self.cache, &habits).await;
        }
    }

    /// Re-fetch everything, parents before children.
    ///
    /// Children are derived from the lists fetched in this pass. When a
    /// parent fetch fails, its last-known-good list stands in.
    pub async fn refresh_all(&self) -> RefreshSummary {
        let mut summary = RefreshSummary::default();

        let persons = match self.cache.fetch_persons().await {
            Ok(persons) => persons,
            Err(_) => {
                summary.failures += 1;
                self.cache.persons().unwrap_or_default()
            }
        };
        summary.persons = persons.len();

        let mut habit_tasks = JoinSet::new();
        for person in persons.iter() {
            let cache = Arc::clone(&self.cache);
            let person_id = person.person_id.clone();
            habit_tasks.spawn(async move {
                match cache.fetch_habits(&person_id).await {
                    Ok(habits) => (Some(habits), false),
                    Err(_) => (cache.habits(&person_id), true),
                }
            });
        }

        let mut habits: Vec<Habit> = Vec::new();
        while let Some(joined) = habit_tasks.join_next().await {
            match joined {
                Ok((list, failed)) => {
                    if failed {
                        summary.failures += 1;
                    } else {
                        summary.habit_lists += 1;
                    }
                    if let Some(list) = list {
                        habits.extend(list.iter().cloned());
                    }
                }
                Err(e) => {
                    log::error!("habit refresh task failed: {}", e);
                    summary.failures += 1;
                }
            }
        }

        let mut event_tasks = JoinSet::new();
        for habit in habits {
            let cache = Arc::clone(&self.cache);
            event_tasks.spawn(async move { cache.fetch_events(&habit.habit_id).await.is_ok() });
        }
        while let Some(joined) = event_tasks.join_next().await {
            match joined {
                Ok(true) => summary.event_lists += 1,
                Ok(false) => summary.failures += 1,
                Err(e) => {
                    log::error!("event refresh task failed: {}", e);
                    summary.failures += 1;
                }
            }
        }

        log::info!(
            "Refreshed {} persons, {} habit lists, {} event lists ({} failed)",
            summary.persons,
            summary.habit_lists,
            summary.event_lists,
            summary.failures
        );
        summary
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    fn mutation_failed(&self, action: &str, alert: &str, source: ApiError) -> SyncError {
        let err = SyncError::Mutation {
            action: action.to_string(),
            source,
        };
        self.log.append_error(&err);
        self.alerts.alert(alert);
        err
    }

    /// Re-fetch a person's habit slot and fetch event slots for new habits.
    /// A failed re-fetch leaves the previous list in place.
    async fn reload_habits(&self, person_id: &str) {
        self.cache.supersede(&SlotKey::habits(person_id));
        if self.cache.fetch_habits(person_id).await.is_ok() {
            self.on_habits_changed(person_id).await;
        }
    }

    fn first_name_of(&self, person_id: &str) -> String {
        self.cache
            .find_person(person_id)
            .map(|p| p.first_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("person with ID {}", person_id))
    }

    pub async fn create_habit(&self, new: NewHabit) -> Result<Habit, SyncError> {
        let created = self
            .api
            .create_habit(&new)
            .await
            .map_err(|e| self.mutation_failed("creating habit", "Failed to create habit.", e))?;

        self.log.append(format!(
            "Habit \"{}\" created for {}",
            created.name,
            self.first_name_of(&new.person_id)
        ));
        self.reload_habits(&new.person_id).await;
        self.notify(ChangeEvent::HabitsChanged {
            person_id: new.person_id,
        });
        Ok(created)
    }

    /// Create a habit picked from the built-in catalogue.
    pub async fn create_random_habit(&self, person: &Person) -> Result<Habit, SyncError> {
        self.create_habit(NewHabit::random(&person.person_id)).await
    }

    pub async fn delete_habit(&self, habit: &Habit) -> Result<(), SyncError> {
        self.api
            .delete_habit(&habit.habit_id)
            .await
            .map_err(|e| self.mutation_failed("deleting habit", "Failed to delete habit.", e))?;

        self.log.append(format!("Habit \"{}\" deleted", habit.name));
        // The events belong to a habit that no longer exists.
        self.cache.invalidate(&SlotKey::events(&habit.habit_id));
        self.reload_habits(&habit.person_id).await;
        self.notify(ChangeEvent::HabitsChanged {
            person_id: habit.person_id.clone(),
        });
        Ok(())
    }

    pub async fn create_event(&self, new: NewHabitEvent) -> Result<HabitEvent, SyncError> {
        let created = self.api.create_event(&new).await.map_err(|e| {
            self.mutation_failed("creating habit event", "Failed to create habit event.", e)
        })?;

        let label = self
            .cache
            .find_habit(&new.habit_id)
            .map(|h| format!("\"{}\"", h.name))
            .unwrap_or_else(|| format!("ID {}", new.habit_id));
        self.log.append(format!("Event created for habit {}", label));

        self.cache.supersede(&SlotKey::events(&new.habit_id));
        let _ = self.cache.fetch_events(&new.habit_id).await;
        self.notify(ChangeEvent::EventsChanged {
            person_id: new.person_id,
            habit_id: new.habit_id,
        });
        Ok(created)
    }

    /// Record a completion of `habit` stamped now.
    pub async fn complete_habit(&self, habit: &Habit) -> Result<HabitEvent, SyncError> {
        self.create_event(NewHabitEvent::completion(habit)).await
    }

    /// Bulk-create persons, then refresh the root and cascade to newcomers.
    pub async fn create_persons(&self, persons: &[NewPerson]) -> Result<usize, SyncError> {
        self.api.create_persons(persons).await.map_err(|e| {
            self.mutation_failed(
                "adding persons to the database",
                "Failed to add persons to the database.",
                e,
            )
        })?;

        self.log.append(format!(
            "{} Persons successfully added to the database!",
            persons.len()
        ));
        self.cache.supersede(&SlotKey::persons());
        if let Ok(all) = self.cache.fetch_persons().await {
            self.on_persons_changed(&all).await;
        }
        self.notify(ChangeEvent::PersonsChanged);
        Ok(persons.len())
    }
}

/// Fetch event slots, concurrently, for habits that have none yet.
async fn fetch_missing_events(cache: &Arc<ResourceCache>, habits: &[Habit]) {
    let mut seen = HashSet::new();
    let mut tasks = JoinSet::new();
    for habit in habits {
        let known = cache.contains(&SlotKey::events(&habit.habit_id));
        if known || !seen.insert(habit.habit_id.clone()) {
            continue;
        }
        let cache = Arc::clone(cache);
        let habit_id = habit.habit_id.clone();
        tasks.spawn(async move {
            let _ = cache.fetch_events(&habit_id).await;
        });
    }
    drain(&mut tasks).await;
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            log::error!("cascade task failed: {}", e);
        }
    }
}
