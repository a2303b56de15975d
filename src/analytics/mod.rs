//! Per-scope analytics assembled from independently fetched fragments.
//!
//! A refresh fans out one request per fragment and applies the combined
//! result once every request has settled. Failed fragments keep their
//! defaults and are logged; the rest still apply.
//!
//! Each visible scope carries a generation. A refresh captures it at start
//! and its result is dropped if the scope was hidden, cleared or refreshed
//! again in the meantime.

pub mod fragments;
pub mod heatmap;
pub mod render;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::api::HabitApi;
use crate::cascade::ChangeEvent;
use crate::error::{ApiError, SyncError};
use crate::log_sink::LogSink;

pub use fragments::AnalyticsView;
pub use heatmap::{HeatmapCell, MIN_CELL_INTENSITY};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "personId")]
pub enum AnalyticsScope {
    Global,
    Person(String),
}

impl fmt::Display for AnalyticsScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyticsScope::Global => write!(f, "global"),
            AnalyticsScope::Person(id) => write!(f, "person {}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    Consistency,
    Streaks,
    CompletionRates,
    Distribution,
    CategoryDistribution,
    TimeHeatmap,
    Correlations,
    HabitPopularity,
    DropOffRates,
    FirstWeekSuccess,
    Engagement,
    GeographicTrends,
}

const PERSON_METRICS: &[Metric] = &[
    Metric::Consistency,
    Metric::Streaks,
    Metric::CompletionRates,
    Metric::Distribution,
    Metric::TimeHeatmap,
    Metric::Correlations,
];

const GLOBAL_METRICS: &[Metric] = &[
    Metric::Consistency,
    Metric::Distribution,
    Metric::CategoryDistribution,
    Metric::HabitPopularity,
    Metric::DropOffRates,
    Metric::FirstWeekSuccess,
    Metric::Engagement,
    Metric::GeographicTrends,
    Metric::TimeHeatmap,
];

impl Metric {
    /// Path segment under `/api/analytics/`.
    pub fn path(self) -> &'static str {
        match self {
            Metric::Consistency => "consistency",
            Metric::Streaks => "streaks",
            Metric::CompletionRates => "completion-rates",
            Metric::Distribution => "distribution",
            Metric::CategoryDistribution => "category-distribution",
            Metric::TimeHeatmap => "time-heatmap",
            Metric::Correlations => "correlations",
            Metric::HabitPopularity => "habit-popularity",
            Metric::DropOffRates => "drop-off-rates",
            Metric::FirstWeekSuccess => "first-week-success",
            Metric::Engagement => "engagement",
            Metric::GeographicTrends => "geographic-trends",
        }
    }

    /// Fragments requested for `scope`.
    pub fn for_scope(scope: &AnalyticsScope) -> &'static [Metric] {
        match scope {
            AnalyticsScope::Global => GLOBAL_METRICS,
            AnalyticsScope::Person(_) => PERSON_METRICS,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

struct ScopeState {
    generation: u64,
    dirty: bool,
    view: Option<Arc<AnalyticsView>>,
}

#[derive(Default)]
struct Scopes {
    visible: HashMap<AnalyticsScope, ScopeState>,
    next_generation: u64,
}

impl Scopes {
    fn bump(&mut self, scope: &AnalyticsScope) -> Option<u64> {
        self.next_generation += 1;
        let generation = self.next_generation;
        let state = self.visible.get_mut(scope)?;
        state.generation = generation;
        Some(generation)
    }
}

pub struct AnalyticsViewModel {
    api: Arc<dyn HabitApi>,
    log: Arc<LogSink>,
    scopes: Mutex<Scopes>,
}

impl AnalyticsViewModel {
    pub fn new(api: Arc<dyn HabitApi>, log: Arc<LogSink>) -> Self {
        Self {
            api,
            log,
            scopes: Mutex::new(Scopes::default()),
        }
    }

    /// Make `scope` visible. The first time it is shown its view is fetched;
    /// afterwards the current view is returned as is.
    pub async fn show(&self, scope: AnalyticsScope) -> Option<Arc<AnalyticsView>> {
        {
            let mut scopes = self.scopes.lock();
            if let Some(state) = scopes.visible.get(&scope) {
                if state.view.is_some() {
                    return state.view.clone();
                }
            } else {
                scopes.visible.insert(
                    scope.clone(),
                    ScopeState {
                        generation: 0,
                        dirty: false,
                        view: None,
                    },
                );
            }
        }
        self.refresh(&scope).await
    }

    /// Stop tracking `scope`; any refresh still running for it is discarded.
    pub fn hide(&self, scope: &AnalyticsScope) {
        if self.scopes.lock().visible.remove(scope).is_some() {
            log::debug!("analytics {} hidden", scope);
        }
    }

    pub fn view(&self, scope: &AnalyticsScope) -> Option<Arc<AnalyticsView>> {
        self.scopes.lock().visible.get(scope)?.view.clone()
    }

    pub fn visible_scopes(&self) -> Vec<AnalyticsScope> {
        self.scopes.lock().visible.keys().cloned().collect()
    }

    /// Flag every visible scope `event` affects for the next
    /// [`AnalyticsViewModel::refresh_dirty`].
    pub fn mark_changed(&self, event: &ChangeEvent) {
        let mut scopes = self.scopes.lock();
        for (scope, state) in scopes.visible.iter_mut() {
            if event.affects(scope) {
                state.dirty = true;
            }
        }
    }

    /// Refresh every visible scope flagged by [`AnalyticsViewModel::mark_changed`].
    pub async fn refresh_dirty(&self) -> usize {
        let dirty: Vec<AnalyticsScope> = self
            .scopes
            .lock()
            .visible
            .iter()
            .filter(|(_, state)| state.dirty)
            .map(|(scope, _)| scope.clone())
            .collect();

        for scope in &dirty {
            self.refresh(scope).await;
        }
        dirty.len()
    }

    /// Re-fetch every fragment of a visible scope. Returns the new view, or
    /// None when the scope is not visible or the result was superseded.
    pub async fn refresh(&self, scope: &AnalyticsScope) -> Option<Arc<AnalyticsView>> {
        let Some(generation) = self.scopes.lock().bump(scope) else {
            log::debug!("analytics {} not visible, skipping refresh", scope);
            return None;
        };

        let metrics = Metric::for_scope(scope);
        let handles: Vec<_> = metrics
            .iter()
            .map(|&metric| {
                let api = Arc::clone(&self.api);
                let scope = scope.clone();
                (
                    metric,
                    tokio::spawn(async move { api.fetch_metric(&scope, metric).await }),
                )
            })
            .collect();

        let mut view = AnalyticsView::empty(scope.clone());
        let mut errors = Vec::new();
        for (metric, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(value)) => view.apply(metric, value).map_err(ApiError::from),
                Ok(Err(e)) => Err(e),
                Err(join) => Err(ApiError::Network(format!("fragment task failed: {}", join))),
            };
            if let Err(source) = outcome {
                view.failed.push(metric);
                errors.push(SyncError::PartialAnalytics {
                    scope: scope.clone(),
                    metric,
                    source,
                });
            }
        }

        // Failures are logged even when the view itself is superseded.
        for err in &errors {
            self.log.append_error(err);
        }

        let view = Arc::new(view);
        {
            let mut scopes = self.scopes.lock();
            match scopes.visible.get_mut(scope) {
                Some(state) if state.generation == generation => {
                    state.view = Some(Arc::clone(&view));
                    state.dirty = false;
                }
                _ => {
                    log::debug!("analytics {}: discarded superseded view", scope);
                    return None;
                }
            }
        }

        log::debug!(
            "analytics {}: applied {}/{} fragments",
            scope,
            metrics.len() - view.failed.len(),
            metrics.len()
        );
        Some(view)
    }

    /// Forget every scope.
    pub fn clear(&self) {
        let mut scopes = self.scopes.lock();
        scopes.visible.clear();
        scopes.next_generation += 1;
    }
}
