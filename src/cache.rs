//! Resource cache for the person → habit → habit-event hierarchy.
//!
//! One slot table per level. A slot holds an `Arc<Vec<T>>` snapshot that is
//! swapped whole on fetch, so readers never see a partial update and slots
//! untouched by a refresh stay pointer-equal.
//!
//! Ordering: every fetch takes a sequence number when it is issued. On
//! completion the response is applied only if that number is still the
//! highest issued for the key, so an older request that finishes late can
//! never overwrite a newer one. `invalidate` issues a fresh number without
//! a request, which discards anything still in flight for that key.
//! `supersede` does the same but keeps the slot's data, for refetches after
//! a write where a failed refetch must leave last-known-good in place.
//!
//! With coalescing enabled, a fetch that finds a request already in flight
//! for its key waits for that request instead of issuing another.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::api::HabitApi;
use crate::error::{ApiError, SyncError};
use crate::log_sink::LogSink;
use crate::types::{Habit, HabitEvent, Person};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Persons,
    Habits,
    Events,
}

/// Storage location of one `(level, key)` pair. The root level has no key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub level: Level,
    pub key: Option<String>,
}

impl SlotKey {
    pub fn persons() -> Self {
        Self {
            level: Level::Persons,
            key: None,
        }
    }

    pub fn habits(person_id: &str) -> Self {
        Self {
            level: Level::Habits,
            key: Some(person_id.to_string()),
        }
    }

    pub fn events(habit_id: &str) -> Self {
        Self {
            level: Level::Events,
            key: Some(habit_id.to_string()),
        }
    }

    fn storage_key(&self) -> &str {
        self.key.as_deref().unwrap_or("")
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.level, self.key.as_deref()) {
            (Level::Persons, _) => write!(f, "persons"),
            (Level::Habits, Some(id)) => write!(f, "habits for person {}", id),
            (Level::Events, Some(id)) => write!(f, "events for habit {}", id),
            (Level::Habits, None) => write!(f, "habits"),
            (Level::Events, None) => write!(f, "events"),
        }
    }
}

/// A cached collection of any level.
#[derive(Debug, Clone)]
pub enum Collection {
    Persons(Arc<Vec<Person>>),
    Habits(Arc<Vec<Habit>>),
    Events(Arc<Vec<HabitEvent>>),
}

impl Collection {
    pub fn len(&self) -> usize {
        match self {
            Collection::Persons(items) => items.len(),
            Collection::Habits(items) => items.len(),
            Collection::Events(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type Shared<T> = Result<Arc<Vec<T>>, ApiError>;

enum Ticket<T> {
    Leader(u64),
    Follower(oneshot::Receiver<Shared<T>>),
}

struct SlotTable<T> {
    inner: Mutex<SlotTableInner<T>>,
}

struct SlotTableInner<T> {
    slots: HashMap<String, Arc<Vec<T>>>,
    /// Highest sequence number issued per key.
    issued: HashMap<String, u64>,
    /// Sequence number of the request currently shared for each key.
    in_flight: HashMap<String, u64>,
    /// Callers waiting on a shared request, by its sequence number.
    waiters: HashMap<u64, Vec<oneshot::Sender<Shared<T>>>>,
    next_seq: u64,
}

impl<T> SlotTableInner<T> {
    fn issue(&mut self, key: &str) -> u64 {
        self.next_seq += 1;
        self.issued.insert(key.to_string(), self.next_seq);
        self.next_seq
    }
}

impl<T> SlotTable<T> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(SlotTableInner {
                slots: HashMap::new(),
                issued: HashMap::new(),
                in_flight: HashMap::new(),
                waiters: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    fn get(&self, key: &str) -> Option<Arc<Vec<T>>> {
        self.inner.lock().slots.get(key).cloned()
    }

    fn contains(&self, key: &str) -> bool {
        self.inner.lock().slots.contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.lock().slots.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        inner.issue(key);
        inner.in_flight.remove(key);
        inner.slots.remove(key).is_some()
    }

    fn supersede(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.issue(key);
        inner.in_flight.remove(key);
    }

    fn clear(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        for seq in inner.issued.values_mut() {
            inner.next_seq += 1;
            *seq = inner.next_seq;
        }
        inner.in_flight.clear();
        inner.slots.clear();
    }
}

struct LeaderRelease<'a, T> {
    table: &'a SlotTable<T>,
    key: &'a str,
    seq: u64,
}

impl<T> Drop for LeaderRelease<'_, T> {
    fn drop(&mut self) {
        let mut inner = self.table.inner.lock();
        if inner.in_flight.get(self.key) == Some(&self.seq) {
            inner.in_flight.remove(self.key);
        }
        // Dropping the senders wakes followers with a cancellation.
        inner.waiters.remove(&self.seq);
    }
}

pub struct ResourceCache {
    api: Arc<dyn HabitApi>,
    log: Arc<LogSink>,
    coalesce: bool,
    persons: SlotTable<Person>,
    habits: SlotTable<Habit>,
    events: SlotTable<HabitEvent>,
}

impl ResourceCache {
    pub fn new(api: Arc<dyn HabitApi>, log: Arc<LogSink>, coalesce: bool) -> Self {
        Self {
            api,
            log,
            coalesce,
            persons: SlotTable::new(),
            habits: SlotTable::new(),
            events: SlotTable::new(),
        }
    }

    // ------------------------------------------------------------------
    // Fetch
    // ------------------------------------------------------------------

    /// Fetch the root person list and replace its slot.
    pub async fn fetch_persons(&self) -> Result<Arc<Vec<Person>>, SyncError> {
        self.fetch_slot(&self.persons, SlotKey::persons(), self.api.list_persons())
            .await
    }

    /// Fetch one person's habits and replace that slot.
    pub async fn fetch_habits(&self, person_id: &str) -> Result<Arc<Vec<Habit>>, SyncError> {
        self.fetch_slot(
            &self.habits,
            SlotKey::habits(person_id),
            self.api.list_habits(person_id),
        )
        .await
    }

    /// Fetch one habit's events and replace that slot.
    pub async fn fetch_events(&self, habit_id: &str) -> Result<Arc<Vec<HabitEvent>>, SyncError> {
        self.fetch_slot(
            &self.events,
            SlotKey::events(habit_id),
            self.api.list_events(habit_id),
        )
        .await
    }

    /// Level-generic fetch.
    pub async fn fetch(&self, slot: &SlotKey) -> Result<Collection, SyncError> {
        let key = slot.storage_key();
        Ok(match slot.level {
            Level::Persons => Collection::Persons(self.fetch_persons().await?),
            Level::Habits => Collection::Habits(self.fetch_habits(key).await?),
            Level::Events => Collection::Events(self.fetch_events(key).await?),
        })
    }

    async fn fetch_slot<T, F>(
        &self,
        table: &SlotTable<T>,
        slot: SlotKey,
        load: F,
    ) -> Result<Arc<Vec<T>>, SyncError>
    where
        F: Future<Output = Result<Vec<T>, ApiError>>,
    {
        let key = slot.storage_key().to_string();

        let ticket = {
            let mut inner = table.inner.lock();
            let leader = inner.in_flight.get(&key).copied();
            match leader {
                Some(leader) if self.coalesce => {
                    let (tx, rx) = oneshot::channel();
                    inner.waiters.entry(leader).or_default().push(tx);
                    Ticket::Follower(rx)
                }
                _ => {
                    let seq = inner.issue(&key);
                    if self.coalesce {
                        inner.in_flight.insert(key.clone(), seq);
                    }
                    Ticket::Leader(seq)
                }
            }
        };

        let seq = match ticket {
            Ticket::Leader(seq) => seq,
            Ticket::Follower(rx) => {
                log::debug!("{}: joined in-flight request", slot);
                let shared = rx.await.unwrap_or(Err(ApiError::Cancelled));
                return shared.map_err(|source| SyncError::Fetch { slot, source });
            }
        };

        // Releases followers if this future is dropped before completing.
        let _release = LeaderRelease {
            table,
            key: &key,
            seq,
        };

        let result: Shared<T> = load.await.map(Arc::new);

        let (applied, waiters) = {
            let mut inner = table.inner.lock();
            if inner.in_flight.get(&key) == Some(&seq) {
                inner.in_flight.remove(&key);
            }
            let waiters = inner.waiters.remove(&seq).unwrap_or_default();
            let latest = inner.issued.get(&key) == Some(&seq);
            let applied = match &result {
                Ok(items) if latest => {
                    inner.slots.insert(key.clone(), Arc::clone(items));
                    true
                }
                _ => false,
            };
            (applied, waiters)
        };

        for tx in waiters {
            let _ = tx.send(result.clone());
        }

        match result {
            Ok(items) => {
                if applied {
                    log::debug!("{}: cached {} items", slot, items.len());
                } else {
                    log::debug!("{}: discarded superseded response", slot);
                }
                Ok(items)
            }
            Err(source) => {
                let err = SyncError::Fetch { slot, source };
                self.log.append_error(&err);
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn persons(&self) -> Option<Arc<Vec<Person>>> {
        self.persons.get("")
    }

    pub fn habits(&self, person_id: &str) -> Option<Arc<Vec<Habit>>> {
        self.habits.get(person_id)
    }

    pub fn events(&self, habit_id: &str) -> Option<Arc<Vec<HabitEvent>>> {
        self.events.get(habit_id)
    }

    /// Level-generic read. `None` when the slot has never been filled or
    /// was invalidated.
    pub fn get(&self, slot: &SlotKey) -> Option<Collection> {
        let key = slot.storage_key();
        match slot.level {
            Level::Persons => self.persons.get(key).map(Collection::Persons),
            Level::Habits => self.habits.get(key).map(Collection::Habits),
            Level::Events => self.events.get(key).map(Collection::Events),
        }
    }

    pub fn contains(&self, slot: &SlotKey) -> bool {
        let key = slot.storage_key();
        match slot.level {
            Level::Persons => self.persons.contains(key),
            Level::Habits => self.habits.contains(key),
            Level::Events => self.events.contains(key),
        }
    }

    /// Keys with a filled slot at `level`, sorted.
    pub fn known_keys(&self, level: Level) -> Vec<String> {
        match level {
            Level::Persons => self.persons.keys(),
            Level::Habits => self.habits.keys(),
            Level::Events => self.events.keys(),
        }
    }

    /// Owner of a cached habit, searched across every habit slot.
    pub fn find_habit(&self, habit_id: &str) -> Option<Habit> {
        self.habits
            .inner
            .lock()
            .slots
            .values()
            .flat_map(|habits| habits.iter())
            .find(|h| h.habit_id == habit_id)
            .cloned()
    }

    pub fn find_person(&self, person_id: &str) -> Option<Person> {
        self.persons()?
            .iter()
            .find(|p| p.person_id == person_id)
            .cloned()
    }

    // ------------------------------------------------------------------
    // Invalidate
    // ------------------------------------------------------------------

    /// Drop a slot and discard any response still in flight for it.
    /// Returns whether the slot held data.
    pub fn invalidate(&self, slot: &SlotKey) -> bool {
        let key = slot.storage_key();
        let removed = match slot.level {
            Level::Persons => self.persons.invalidate(key),
            Level::Habits => self.habits.invalidate(key),
            Level::Events => self.events.invalidate(key),
        };
        log::debug!("{}: invalidated (had data: {})", slot, removed);
        removed
    }

    /// Discard any response still in flight for a slot but keep its data.
    ///
    /// The next fetch of the slot issues its own request instead of joining
    /// one sent before this call.
    pub fn supersede(&self, slot: &SlotKey) {
        let key = slot.storage_key();
        match slot.level {
            Level::Persons => self.persons.supersede(key),
            Level::Habits => self.habits.supersede(key),
            Level::Events => self.events.supersede(key),
        }
        log::debug!("{}: superseded in-flight requests", slot);
    }

    /// Drop every slot at every level.
    pub fn clear(&self) {
        self.persons.clear();
        self.habits.clear();
        self.events.clear();
        log::info!("Resource cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{habit, person, wait_for_calls, FakeApi};

    fn cache_with(api: &Arc<FakeApi>, coalesce: bool) -> Arc<ResourceCache> {
        Arc::new(ResourceCache::new(
            api.clone(),
            Arc::new(LogSink::new()),
            coalesce,
        ))
    }

    #[tokio::test]
    async fn test_fetch_replaces_slot_wholesale() {
        let api = Arc::new(FakeApi::new());
        api.set_habits("p1", vec![habit("h1", "p1", "Sleep"), habit("h2", "p1", "Reading")]);
        let cache = cache_with(&api, true);

        cache.fetch_habits("p1").await.unwrap();
        assert_eq!(cache.habits("p1").unwrap().len(), 2);

        api.set_habits("p1", vec![habit("h3", "p1", "Budgeting")]);
        let fetched = cache.fetch_habits("p1").await.unwrap();
        let cached = cache.habits("p1").unwrap();
        assert!(Arc::ptr_eq(&fetched, &cached));
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].habit_id, "h3");
    }

    #[tokio::test]
    async fn test_fetch_always_hits_network() {
        let api = Arc::new(FakeApi::new());
        let cache = cache_with(&api, true);

        cache.fetch_persons().await.unwrap();
        cache.fetch_persons().await.unwrap();
        assert_eq!(api.calls("persons"), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_last_known_good() {
        let api = Arc::new(FakeApi::new());
        api.set_persons(vec![person("p1", "Ann")]);
        let log = Arc::new(LogSink::new());
        let cache = ResourceCache::new(api.clone(), log.clone(), true);

        let before = cache.fetch_persons().await.unwrap();
        api.fail("persons");
        let err = cache.fetch_persons().await.unwrap_err();

        assert!(matches!(err, SyncError::Fetch { .. }));
        assert!(Arc::ptr_eq(&before, &cache.persons().unwrap()));
        assert_eq!(log.len(), 1);
        assert!(log.messages()[0].starts_with("Error fetching persons"));

        api.recover("persons");
        api.set_persons(vec![]);
        assert!(cache.fetch_persons().await.unwrap().is_empty());
        assert!(cache.persons().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_late_older_response_is_discarded() {
        let api = Arc::new(FakeApi::new());
        api.set_habits("p1", vec![habit("h-old", "p1", "Sleep")]);
        let cache = cache_with(&api, false);

        let first_gate = api.gate("habits:p1");
        let second_gate = api.gate("habits:p1");

        let c1 = cache.clone();
        let first = tokio::spawn(async move { c1.fetch_habits("p1").await });
        wait_for_calls(&api, "habits:p1", 1).await;

        api.set_habits("p1", vec![habit("h-new", "p1", "Reading")]);
        let c2 = cache.clone();
        let second = tokio::spawn(async move { c2.fetch_habits("p1").await });
        wait_for_calls(&api, "habits:p1", 2).await;

        second_gate.notify_one();
        second.await.unwrap().unwrap();
        assert_eq!(cache.habits("p1").unwrap()[0].habit_id, "h-new");

        first_gate.notify_one();
        let stale = first.await.unwrap().unwrap();
        assert_eq!(stale[0].habit_id, "h-old");
        assert_eq!(cache.habits("p1").unwrap()[0].habit_id, "h-new");
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_request() {
        let api = Arc::new(FakeApi::new());
        api.set_events("h1", vec![]);
        let cache = cache_with(&api, true);
        let gate = api.gate("events:h1");

        let c1 = cache.clone();
        let leader = tokio::spawn(async move { c1.fetch_events("h1").await });
        wait_for_calls(&api, "events:h1", 1).await;
        let c2 = cache.clone();
        let follower = tokio::spawn(async move { c2.fetch_events("h1").await });
        tokio::task::yield_now().await;

        gate.notify_one();
        let a = leader.await.unwrap().unwrap();
        let b = follower.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(api.calls("events:h1"), 1);
    }

    #[tokio::test]
    async fn test_shared_failure_reaches_every_caller_logged_once() {
        let api = Arc::new(FakeApi::new());
        api.fail("events:h1");
        let log = Arc::new(LogSink::new());
        let cache = Arc::new(ResourceCache::new(api.clone(), log.clone(), true));
        let gate = api.gate("events:h1");

        let c1 = cache.clone();
        let leader = tokio::spawn(async move { c1.fetch_events("h1").await });
        wait_for_calls(&api, "events:h1", 1).await;
        let c2 = cache.clone();
        let follower = tokio::spawn(async move { c2.fetch_events("h1").await });
        tokio::task::yield_now().await;

        gate.notify_one();
        assert!(leader.await.unwrap().is_err());
        assert!(follower.await.unwrap().is_err());
        assert_eq!(log.len(), 1);
        assert!(cache.events("h1").is_none());
    }

    #[tokio::test]
    async fn test_invalidate_discards_in_flight_response() {
        let api = Arc::new(FakeApi::new());
        api.set_habits("p1", vec![habit("h1", "p1", "Sleep")]);
        let cache = cache_with(&api, true);
        cache.fetch_habits("p1").await.unwrap();

        let gate = api.gate("habits:p1");
        let c1 = cache.clone();
        let pending = tokio::spawn(async move { c1.fetch_habits("p1").await });
        wait_for_calls(&api, "habits:p1", 2).await;

        assert!(cache.invalidate(&SlotKey::habits("p1")));
        assert!(cache.get(&SlotKey::habits("p1")).is_none());

        // A fetch issued after invalidation must not join the stale request.
        api.set_habits("p1", vec![]);
        let fresh = cache.fetch_habits("p1").await.unwrap();
        assert!(fresh.is_empty());

        gate.notify_one();
        pending.await.unwrap().unwrap();
        assert!(cache.habits("p1").unwrap().is_empty());
        assert_eq!(api.calls("habits:p1"), 3);
    }

    #[tokio::test]
    async fn test_supersede_discards_in_flight_but_keeps_data() {
        let api = Arc::new(FakeApi::new());
        api.set_habits("p1", vec![habit("h1", "p1", "Sleep")]);
        let cache = cache_with(&api, true);
        let before = cache.fetch_habits("p1").await.unwrap();

        let gate = api.gate("habits:p1");
        let c1 = cache.clone();
        let pending = tokio::spawn(async move { c1.fetch_habits("p1").await });
        wait_for_calls(&api, "habits:p1", 2).await;

        cache.supersede(&SlotKey::habits("p1"));
        assert!(Arc::ptr_eq(&before, &cache.habits("p1").unwrap()));

        // The refetch fails: the slot still holds what it had.
        api.fail("habits:p1");
        assert!(cache.fetch_habits("p1").await.is_err());
        assert_eq!(api.calls("habits:p1"), 3);
        assert!(Arc::ptr_eq(&before, &cache.habits("p1").unwrap()));

        // The request from before the supersede completes late and is ignored.
        api.recover("habits:p1");
        api.set_habits("p1", vec![]);
        gate.notify_one();
        pending.await.unwrap().unwrap();
        assert_eq!(cache.habits("p1").unwrap().len(), 1);

        let fresh = cache.fetch_habits("p1").await.unwrap();
        assert!(fresh.is_empty());
        assert!(cache.habits("p1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generic_get_and_known_keys() {
        let api = Arc::new(FakeApi::new());
        api.set_habits("p2", vec![]);
        api.set_habits("p1", vec![habit("h1", "p1", "Sleep")]);
        let cache = cache_with(&api, true);

        let fetched = cache.fetch(&SlotKey::habits("p2")).await.unwrap();
        assert!(fetched.is_empty());
        cache.fetch(&SlotKey::habits("p1")).await.unwrap();

        assert_eq!(cache.known_keys(Level::Habits), vec!["p1", "p2"]);
        assert!(matches!(
            cache.get(&SlotKey::habits("p1")),
            Some(Collection::Habits(h)) if h.len() == 1
        ));
        assert!(cache.get(&SlotKey::events("h1")).is_none());
        assert_eq!(cache.find_habit("h1").unwrap().person_id, "p1");
    }

    #[tokio::test]
    async fn test_clear_drops_everything_and_in_flight() {
        let api = Arc::new(FakeApi::new());
        api.set_persons(vec![person("p1", "Ann")]);
        let cache = cache_with(&api, true);
        cache.fetch_persons().await.unwrap();

        let gate = api.gate("persons");
        let c1 = cache.clone();
        let pending = tokio::spawn(async move { c1.fetch_persons().await });
        wait_for_calls(&api, "persons", 2).await;

        cache.clear();
        gate.notify_one();
        pending.await.unwrap().unwrap();
        assert!(cache.persons().is_none());
    }
}
