//! Concurrent fetching of registry pages and requirements files.
//!
//! Work is split into independent [`FetchUnit`]s run on a bounded worker
//! pool. Each unit is retried on its own through [`retry::retry`]; one unit's
//! failure never aborts the others. Results that touch the [`NodeStore`] are
//! applied by the single driver loop as units complete, one unit per lock
//! acquisition, so readers never observe a half-applied unit.

pub mod api;
pub mod retry;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{info, instrument, warn};

pub use api::{HttpRegistryApi, RegistryApi, RequirementsTarget};
pub use retry::{RetryError, RetryPolicy};

use crate::config::FetchSection;
use crate::error::FetchError;
use crate::parse::parse_requirements_text;
use crate::progress::{NoopReporter, ProgressReporter};
use crate::sources::{RegistryPage, RequirementsCache};
use crate::store::{LoadReport, NodeStore, SharedStore};
use crate::types::NodePatch;

/// One independently retried piece of work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchUnit {
    Page(u32),
    Node(String),
}

impl fmt::Display for FetchUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page(page) => write!(f, "page {page}"),
            Self::Node(id) => write!(f, "node {id}"),
        }
    }
}

/// A unit that did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub unit: FetchUnit,
    pub attempts: u32,
    pub reason: String,
    pub deadline_hit: bool,
}

impl FetchFailure {
    fn from_retry(unit: FetchUnit, err: &RetryError) -> Self {
        Self {
            unit,
            attempts: err.attempts,
            reason: err.last_error.to_string(),
            deadline_hit: err.deadline_hit,
        }
    }

    fn aborted(unit: FetchUnit, attempts: u32, err: JoinError) -> Self {
        let reason = if err.is_panic() {
            let payload = err.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            format!("task panicked: {message}")
        } else {
            format!("task cancelled: {err}")
        };
        Self {
            unit,
            attempts,
            reason,
            deadline_hit: false,
        }
    }

    fn skipped(unit: FetchUnit, reason: impl Into<String>) -> Self {
        Self {
            unit,
            attempts: 0,
            reason: reason.into(),
            deadline_hit: false,
        }
    }
}

/// Partial-success manifest of a fetch run. Every list is sorted by unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchOutcome<T> {
    pub succeeded: Vec<(FetchUnit, T)>,
    pub failures: Vec<FetchFailure>,
    /// Units that resolved cleanly to "nothing there" (no repository, or a
    /// repository without the file).
    pub missing: Vec<FetchUnit>,
}

impl<T> Default for FetchOutcome<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failures: Vec::new(),
            missing: Vec::new(),
        }
    }
}

impl<T> FetchOutcome<T> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.succeeded.iter().map(|(_, v)| v)
    }

    fn sort(&mut self) {
        self.succeeded.sort_by(|a, b| a.0.cmp(&b.0));
        self.failures.sort_by(|a, b| a.unit.cmp(&b.unit));
        self.missing.sort();
    }
}

/// Worker-pool and retry settings for a [`Fetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Whole-run deadline measured from the start of each fetch call.
    pub deadline: Option<Duration>,
}

impl FetchConfig {
    pub fn from_section(section: &FetchSection) -> Self {
        Self {
            workers: section.workers.max(1),
            retry: RetryPolicy::from_section(section),
            deadline: section.deadline(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from_section(&FetchSection::default())
    }
}

type UnitResult<T> = (FetchUnit, Result<T, RetryError>);

/// Spawned unit tasks. Each task id maps back to its unit and an attempt
/// counter so a task that panics is still reported.
struct UnitTasks<T> {
    set: JoinSet<UnitResult<T>>,
    units: HashMap<task::Id, (FetchUnit, Arc<AtomicU32>)>,
}

impl<T: 'static> UnitTasks<T> {
    /// Next finished unit, or the failure of a task that did not return.
    async fn next(&mut self) -> Option<Result<UnitResult<T>, FetchFailure>> {
        loop {
            match self.set.join_next().await? {
                Ok(done) => return Some(Ok(done)),
                Err(err) => {
                    let Some((unit, attempts)) = self.units.remove(&err.id()) else {
                        warn!(error = %err, "Untracked fetch task aborted");
                        continue;
                    };
                    warn!(%unit, error = %err, "Fetch task aborted");
                    let attempts = attempts.load(Ordering::SeqCst);
                    return Some(Err(FetchFailure::aborted(unit, attempts, err)));
                }
            }
        }
    }
}

/// Runs fetch units against a [`RegistryApi`].
pub struct Fetcher {
    api: Arc<dyn RegistryApi>,
    config: FetchConfig,
    progress: Arc<dyn ProgressReporter>,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    pub fn new(api: Arc<dyn RegistryApi>, config: FetchConfig) -> Self {
        Self {
            api,
            config,
            progress: Arc::new(NoopReporter),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    fn deadline(&self) -> Option<Instant> {
        self.config.deadline.map(|d| Instant::now() + d)
    }

    /// Spawn one retried task per unit, at most `workers` running at once.
    fn spawn_units<P, T, F, Fut>(
        &self,
        units: Vec<(FetchUnit, P)>,
        deadline: Option<Instant>,
        work: F,
    ) -> UnitTasks<T>
    where
        P: Clone + Send + Sync + 'static,
        T: Send + 'static,
        F: Fn(Arc<dyn RegistryApi>, P) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks = UnitTasks {
            set: JoinSet::new(),
            units: HashMap::with_capacity(units.len()),
        };

        for (unit, payload) in units {
            let semaphore = Arc::clone(&semaphore);
            let api = Arc::clone(&self.api);
            let progress = Arc::clone(&self.progress);
            let policy = self.config.retry.clone();
            let work = work.clone();
            let attempts = Arc::new(AtomicU32::new(0));
            let counter = Arc::clone(&attempts);
            let task_unit = unit.clone();

            let handle = tasks.set.spawn(async move {
                let unit = task_unit;
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    let closed = RetryError {
                        attempts: 0,
                        last_error: FetchError::Network("worker pool closed".into()),
                        deadline_hit: false,
                    };
                    return (unit, Err(closed));
                };
                let label = unit.to_string();
                let result = retry::retry(&policy, deadline, |attempt| {
                    counter.store(attempt, Ordering::SeqCst);
                    if attempt > 1 {
                        progress.retrying(&label, attempt);
                    }
                    work(Arc::clone(&api), payload.clone())
                })
                .await;
                (unit, result)
            });
            tasks.units.insert(handle.id(), (unit, attempts));
        }
        tasks
    }

    async fn collect_pages(
        &self,
        pages: Vec<u32>,
        deadline: Option<Instant>,
    ) -> FetchOutcome<RegistryPage> {
        let units = pages.into_iter().map(|p| (FetchUnit::Page(p), p)).collect();
        let mut tasks = self.spawn_units(units, deadline, |api: Arc<dyn RegistryApi>, page: u32| async move {
            api.fetch_page(page).await
        });

        let mut outcome = FetchOutcome::default();
        while let Some(joined) = tasks.next().await {
            match joined {
                Ok((unit, Ok(page))) => outcome.succeeded.push((unit, page)),
                Ok((unit, Err(err))) => {
                    warn!(%unit, attempts = err.attempts, error = %err.last_error, "Fetch unit failed");
                    outcome.failures.push(FetchFailure::from_retry(unit, &err));
                }
                Err(failure) => outcome.failures.push(failure),
            }
            self.progress.advance(1);
        }
        outcome.sort();
        outcome
    }

    /// Fetch the given registry pages concurrently. The outcome lists
    /// successful pages in page order regardless of completion order.
    #[instrument(skip_all)]
    pub async fn fetch_pages(&self, pages: impl IntoIterator<Item = u32>) -> FetchOutcome<RegistryPage> {
        let pages: Vec<u32> = pages.into_iter().collect();
        self.progress
            .start("Fetching registry pages", Some(pages.len() as u64));
        let outcome = self.collect_pages(pages, self.deadline()).await;
        self.progress.finish();
        info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failures.len(),
            "Registry pages fetched"
        );
        outcome
    }

    /// Fetch the whole registry listing. Page 1 fixes the page count for the
    /// run; if page 1 itself cannot be fetched there is nothing to report.
    #[instrument(skip_all)]
    pub async fn fetch_registry(&self) -> Result<FetchOutcome<RegistryPage>, FetchError> {
        let deadline = self.deadline();
        let api = Arc::clone(&self.api);
        let first = retry::retry(&self.config.retry, deadline, |attempt| {
            if attempt > 1 {
                self.progress.retrying("page 1", attempt);
            }
            let api = Arc::clone(&api);
            async move { api.fetch_page(1).await }
        })
        .await
        .map_err(|e| e.last_error)?;

        let total_pages = first.total_pages.max(1);
        info!(total_pages, total_nodes = first.total, "Registry listing sized");
        self.progress
            .start("Fetching registry pages", Some(u64::from(total_pages)));
        self.progress.advance(1);

        let mut outcome = self
            .collect_pages((2..=total_pages).collect(), deadline)
            .await;
        outcome.succeeded.insert(0, (FetchUnit::Page(1), first));
        self.progress.finish();

        info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failures.len(),
            "Registry fetched"
        );
        Ok(outcome)
    }

    /// Fetch `requirements.txt` for each node and replace its dependency
    /// lines as results arrive. Unknown ids are reported as failures without
    /// being attempted.
    #[instrument(skip_all, fields(nodes = ids.len()))]
    pub async fn fetch_requirements(&self, store: &SharedStore, ids: &[String]) -> FetchOutcome<String> {
        let mut outcome = FetchOutcome::default();
        let mut units = Vec::new();
        {
            let guard = store.lock().await;
            for id in ids {
                let unit = FetchUnit::Node(id.clone());
                match guard.get(id) {
                    None => outcome
                        .failures
                        .push(FetchFailure::skipped(unit, "node not in store")),
                    Some(node) => match &node.repository_url {
                        Some(url) => units.push((
                            unit,
                            RequirementsTarget {
                                node_id: id.clone(),
                                repository_url: url.clone(),
                            },
                        )),
                        None => outcome.missing.push(unit),
                    },
                }
            }
        }

        self.progress
            .start("Fetching requirements", Some(units.len() as u64));
        let mut tasks = self.spawn_units(
            units,
            self.deadline(),
            |api: Arc<dyn RegistryApi>, target: RequirementsTarget| async move {
                api.fetch_requirements(&target).await
            },
        );

        while let Some(joined) = tasks.next().await {
            match joined {
                Ok((unit, Ok(Some(text)))) => {
                    if let FetchUnit::Node(id) = &unit {
                        let lines = parse_requirements_text(&text);
                        store.lock().await.enrich(id, NodePatch::requirements(lines));
                    }
                    outcome.succeeded.push((unit, text));
                }
                Ok((unit, Ok(None))) => outcome.missing.push(unit),
                Ok((unit, Err(err))) => {
                    warn!(%unit, attempts = err.attempts, error = %err.last_error, "Fetch unit failed");
                    outcome.failures.push(FetchFailure::from_retry(unit, &err));
                }
                Err(failure) => outcome.failures.push(failure),
            }
            self.progress.advance(1);
        }
        self.progress.finish();
        outcome.sort();

        info!(
            replaced = outcome.succeeded.len(),
            missing = outcome.missing.len(),
            failed = outcome.failures.len(),
            "Requirements fetched"
        );
        outcome
    }
}

/// Fold a requirements run into the on-disk cache: fetched files replace
/// cached text, and nodes whose file is now missing lose their entry.
/// Failed units keep whatever was cached. Returns `(stored, dropped)`.
pub fn update_requirements_cache(
    cache: &mut RequirementsCache,
    outcome: &FetchOutcome<String>,
) -> (usize, usize) {
    let mut stored = 0;
    for (unit, text) in &outcome.succeeded {
        if let FetchUnit::Node(id) = unit {
            cache.insert(id.clone(), text.clone());
            stored += 1;
        }
    }
    let mut dropped = 0;
    for unit in &outcome.missing {
        if let FetchUnit::Node(id) = unit {
            if cache.remove(id).is_some() {
                dropped += 1;
            }
        }
    }
    (stored, dropped)
}

/// Load fetched pages into the store as primary records, in page order.
pub fn ingest_pages<'a>(
    store: &mut NodeStore,
    pages: impl IntoIterator<Item = &'a RegistryPage>,
) -> LoadReport {
    store.load_primary(pages.into_iter().flat_map(|page| page.nodes.iter().cloned()))
}
