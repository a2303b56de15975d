//! In-memory backend for unit tests.
//!
//! Every call is counted under an operation key (`"persons"`,
//! `"habits:{person_id}"`, `"events:{habit_id}"`, `"create_habit"`,
//! `"delete_habit:{habit_id}"`, `"create_event"`, `"create_persons"`,
//! `"metric:{scope}:{path}"`, `"status"`). Responses are snapshotted when the
//! call arrives; a gate registered for the key then holds the response until
//! the test releases it, which lets tests force completion order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::analytics::{AnalyticsScope, Metric};
use crate::api::HabitApi;
use crate::cascade::AlertSink;
use crate::error::ApiError;
use crate::types::{Habit, HabitEvent, NewHabit, NewHabitEvent, NewPerson, Person, ServiceStatus};

pub(crate) fn person(id: &str, first_name: &str) -> Person {
    Person {
        person_id: id.to_string(),
        first_name: first_name.to_string(),
        last_name: String::new(),
        email: None,
        country: None,
    }
}

pub(crate) fn habit(id: &str, person_id: &str, name: &str) -> Habit {
    Habit {
        habit_id: id.to_string(),
        person_id: person_id.to_string(),
        name: name.to_string(),
        category: "Health".to_string(),
        goal: "Daily".to_string(),
        streak: None,
        created_at: "2024-01-01T00:00:00Z".to_string(),
        updated_at: None,
    }
}

pub(crate) fn event(id: &str, habit: &Habit) -> HabitEvent {
    HabitEvent {
        event_id: id.to_string(),
        habit_id: habit.habit_id.clone(),
        person_id: habit.person_id.clone(),
        timestamp: "2024-01-02T08:00:00Z".to_string(),
        status: "completed".to_string(),
        notes: None,
        event_type: None,
    }
}

pub(crate) fn metric_op(scope: &AnalyticsScope, metric: Metric) -> String {
    format!("metric:{}:{}", scope, metric.path())
}

#[derive(Default)]
struct FakeState {
    persons: Vec<Person>,
    habits: HashMap<String, Vec<Habit>>,
    events: HashMap<String, Vec<HabitEvent>>,
    metrics: HashMap<String, serde_json::Value>,
    status: ServiceStatus,
    failing: HashSet<String>,
    gates: HashMap<String, VecDeque<Arc<Notify>>>,
    calls: HashMap<String, usize>,
    created_persons: Vec<NewPerson>,
    next_id: u64,
}

#[derive(Default)]
pub(crate) struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_persons(&self, persons: Vec<Person>) {
        self.state.lock().persons = persons;
    }

    pub(crate) fn set_habits(&self, person_id: &str, habits: Vec<Habit>) {
        self.state.lock().habits.insert(person_id.to_string(), habits);
    }

    pub(crate) fn set_events(&self, habit_id: &str, events: Vec<HabitEvent>) {
        self.state.lock().events.insert(habit_id.to_string(), events);
    }

    pub(crate) fn set_metric(
        &self,
        scope: &AnalyticsScope,
        metric: Metric,
        value: serde_json::Value,
    ) {
        self.state.lock().metrics.insert(metric_op(scope, metric), value);
    }

    pub(crate) fn set_status(&self, status: ServiceStatus) {
        self.state.lock().status = status;
    }

    /// Make every call under `op` fail with a 500 until [`FakeApi::recover`].
    pub(crate) fn fail(&self, op: &str) {
        self.state.lock().failing.insert(op.to_string());
    }

    pub(crate) fn recover(&self, op: &str) {
        self.state.lock().failing.remove(op);
    }

    /// Hold the next not-yet-gated call under `op` until the returned
    /// `Notify` is signalled.
    pub(crate) fn gate(&self, op: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state
            .lock()
            .gates
            .entry(op.to_string())
            .or_default()
            .push_back(gate.clone());
        gate
    }

    pub(crate) fn calls(&self, op: &str) -> usize {
        self.state.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(op, _)| op.starts_with(prefix))
            .map(|(_, n)| n)
            .sum()
    }

    pub(crate) fn created_persons(&self) -> Vec<NewPerson> {
        self.state.lock().created_persons.clone()
    }

    /// Count the call and take its gate, if any.
    fn enter(&self, op: &str) -> (Option<Arc<Notify>>, bool) {
        let mut state = self.state.lock();
        *state.calls.entry(op.to_string()).or_default() += 1;
        let gate = state.gates.get_mut(op).and_then(VecDeque::pop_front);
        (gate, state.failing.contains(op))
    }

    async fn respond<T>(
        &self,
        op: &str,
        snapshot: impl FnOnce(&mut FakeState) -> T,
    ) -> Result<T, ApiError> {
        let (gate, failing) = self.enter(op);
        let result = if failing {
            Err(ApiError::Status {
                status: 500,
                message: format!("injected failure for {}", op),
            })
        } else {
            Ok(snapshot(&mut self.state.lock()))
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        result
    }
}

#[async_trait]
impl HabitApi for FakeApi {
    async fn list_persons(&self) -> Result<Vec<Person>, ApiError> {
        self.respond("persons", |s| s.persons.clone()).await
    }

    async fn create_persons(&self, persons: &[NewPerson]) -> Result<(), ApiError> {
        let persons = persons.to_vec();
        self.respond("create_persons", move |s| {
            for new in persons {
                s.next_id += 1;
                s.persons.push(Person {
                    person_id: format!("gen-{}", s.next_id),
                    first_name: new.first_name.clone(),
                    last_name: new.last_name.clone(),
                    email: new.email.clone(),
                    country: None,
                });
                s.created_persons.push(new);
            }
        })
        .await
    }

    async fn list_habits(&self, person_id: &str) -> Result<Vec<Habit>, ApiError> {
        self.respond(&format!("habits:{}", person_id), |s| {
            s.habits.get(person_id).cloned().unwrap_or_default()
        })
        .await
    }

    async fn list_events(&self, habit_id: &str) -> Result<Vec<HabitEvent>, ApiError> {
        self.respond(&format!("events:{}", habit_id), |s| {
            s.events.get(habit_id).cloned().unwrap_or_default()
        })
        .await
    }

    async fn create_habit(&self, new: &NewHabit) -> Result<Habit, ApiError> {
        self.respond("create_habit", |s| {
            s.next_id += 1;
            let created = Habit {
                habit_id: format!("h-new-{}", s.next_id),
                person_id: new.person_id.clone(),
                name: new.name.clone(),
                category: new.category.clone(),
                goal: new.goal.clone(),
                streak: Some(0),
                created_at: "2024-01-03T00:00:00Z".to_string(),
                updated_at: None,
            };
            s.habits
                .entry(new.person_id.clone())
                .or_default()
                .push(created.clone());
            created
        })
        .await
    }

    async fn delete_habit(&self, habit_id: &str) -> Result<(), ApiError> {
        self.respond(&format!("delete_habit:{}", habit_id), |s| {
            for habits in s.habits.values_mut() {
                habits.retain(|h| h.habit_id != habit_id);
            }
            s.events.remove(habit_id);
        })
        .await
    }

    async fn create_event(&self, new: &NewHabitEvent) -> Result<HabitEvent, ApiError> {
        self.respond("create_event", |s| {
            s.next_id += 1;
            let created = HabitEvent {
                event_id: format!("e-new-{}", s.next_id),
                habit_id: new.habit_id.clone(),
                person_id: new.person_id.clone(),
                timestamp: new.timestamp.clone(),
                status: new.status.clone(),
                notes: Some(new.notes.clone()),
                event_type: None,
            };
            s.events
                .entry(new.habit_id.clone())
                .or_default()
                .push(created.clone());
            created
        })
        .await
    }

    async fn fetch_metric(
        &self,
        scope: &AnalyticsScope,
        metric: Metric,
    ) -> Result<serde_json::Value, ApiError> {
        let op = metric_op(scope, metric);
        self.respond(&op, |s| {
            s.metrics.get(&op).cloned().unwrap_or(serde_json::Value::Null)
        })
        .await
    }

    async fn service_status(&self) -> Result<ServiceStatus, ApiError> {
        self.respond("status", |s| s.status).await
    }
}

/// Records alerts instead of showing them.
#[derive(Default)]
pub(crate) struct RecordingAlerts {
    raised: Mutex<Vec<String>>,
}

impl RecordingAlerts {
    pub(crate) fn raised(&self) -> Vec<String> {
        self.raised.lock().clone()
    }
}

impl AlertSink for RecordingAlerts {
    fn alert(&self, message: &str) {
        self.raised.lock().push(message.to_string());
    }
}

/// Yield until `op` has been called `n` times.
pub(crate) async fn wait_for_calls(api: &FakeApi, op: &str, n: usize) {
    for _ in 0..1_000 {
        if api.calls(op) >= n {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("{} was called {} times, expected {}", op, api.calls(op), n);
}
