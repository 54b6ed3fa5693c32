//! Request coordinator.
//!
//! Turns query state changes into at most one current request per view:
//!
//! ```text
//! snapshot ──▶ view mode only? ──yes──▶ (ignored, renderer re-draws)
//!                   │ no
//!                   ▼
//!             search text? ──yes──▶ arm debouncer ──(quiet for delay)──┐
//!                   │ no                                               │
//!                   ▼                                                  ▼
//!             issue(query): bump generation, cancel previous, cache.get ──hit──▶ Success
//!                   │ miss
//!                   ▼
//!             spawn fetch (shared per cache key) ──▶ outcome{generation}
//!                                                        │
//!                               generation current? ─no─▶ discarded
//!                                       │ yes
//!                                       ▼
//!                          Success / Error / (cancelled: restore)
//! ```
//!
//! All bookkeeping lives in one task per view, so no locks are needed for it.
//! Status is broadcast over a `watch` channel.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vitrine_core::{EngineConfig, FetchError, FetchResult, QueryState, Row};

use crate::cache::{CacheKey, CacheTarget, ResponseCache};
use crate::contract::{FetchArgs, FetchContract};
use crate::scheduler::{Debouncer, RequestGuard, Ticket};
use crate::session::SessionEvents;
use crate::store::QuerySnapshot;

// =============================================================================
// View Status
// =============================================================================

/// Per-view fetch state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchPhase {
    /// Nothing requested yet.
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

/// A result together with the query it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedPage {
    pub query: QueryState,
    pub result: Arc<FetchResult>,
}

/// What a view currently shows.
///
/// `page` keeps the last committed result while loading or in error, so
/// rows stay visible and pagination stays usable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewStatus {
    pub phase: FetchPhase,
    pub page: Option<Arc<CommittedPage>>,
    pub error: Option<FetchError>,
    /// Generation of the request this status belongs to.
    pub generation: u64,
}

impl ViewStatus {
    pub fn is_loading(&self) -> bool {
        self.phase == FetchPhase::Loading
    }

    /// Whether the error panel should offer a retry action.
    pub fn is_retryable(&self) -> bool {
        self.phase == FetchPhase::Error && self.error.as_ref().is_some_and(FetchError::is_retryable)
    }

    pub fn rows(&self) -> &[Row] {
        self.page
            .as_ref()
            .map(|page| page.result.rows.as_slice())
            .unwrap_or(&[])
    }

    pub fn total(&self) -> usize {
        self.page.as_ref().map(|page| page.result.total).unwrap_or(0)
    }
}

// =============================================================================
// Options
// =============================================================================

/// Per-view coordinator settings.
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Cache namespace shared by views of the same collection.
    pub key_prefix: String,

    /// Trailing debounce for search text.
    pub debounce: Duration,

    /// Where expired sessions are reported.
    pub session: Option<SessionEvents>,
}

impl CoordinatorOptions {
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self::from_config(key_prefix, &EngineConfig::default())
    }

    pub fn from_config(key_prefix: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            debounce: config.debounce(),
            session: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_session(mut self, session: SessionEvents) -> Self {
        self.session = Some(session);
        self
    }
}

// =============================================================================
// RequestCoordinator
// =============================================================================

enum Command {
    /// Re-issue the current query, bypassing the cache.
    Refetch,
    /// Abort the current request without replacing it.
    Cancel,
}

struct Outcome {
    generation: u64,
    query: QueryState,
    result: Result<Arc<FetchResult>, FetchError>,
}

/// Handle to one view's coordinator task.
///
/// Dropping the handle stops the task and cancels its in-flight request.
pub struct RequestCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    status: Arc<watch::Sender<ViewStatus>>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl RequestCoordinator {
    /// Mount: start the coordinator task and fetch the current snapshot.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        snapshots: watch::Receiver<Arc<QuerySnapshot>>,
        contract: Arc<dyn FetchContract>,
        cache: Arc<ResponseCache>,
        options: CoordinatorOptions,
    ) -> Self {
        let (status, _) = watch::channel(ViewStatus::default());
        let status = Arc::new(status);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let invalidations = cache.subscribe_invalidations();
        let shutdown = CancellationToken::new();

        tracing::info!("Mounting collection view '{}'", options.key_prefix);

        let task = CoordinatorTask {
            snapshots,
            contract,
            cache,
            key_prefix: options.key_prefix,
            session: options.session,
            debouncer: Debouncer::new(options.debounce),
            guard: RequestGuard::new(),
            status: status.clone(),
            outcomes: outcomes_tx,
            current_query: None,
            settled_phase: FetchPhase::Idle,
        };
        let handle = tokio::spawn(task.run(
            commands_rx,
            outcomes_rx,
            invalidations,
            shutdown.clone(),
        ));

        Self {
            commands: commands_tx,
            status,
            shutdown,
            task: handle,
        }
    }

    /// Subscribe to status changes.
    ///
    /// The receiver starts with the current status marked as seen.
    pub fn subscribe(&self) -> watch::Receiver<ViewStatus> {
        self.status.subscribe()
    }

    /// Get the current status.
    pub fn status(&self) -> ViewStatus {
        self.status.borrow().clone()
    }

    /// Retry after an error. Bypasses the cache.
    pub fn retry(&self) {
        let _ = self.commands.send(Command::Refetch);
    }

    /// Refetch the current query. Bypasses the cache.
    pub fn refresh(&self) {
        let _ = self.commands.send(Command::Refetch);
    }

    /// Abort the in-flight request. The view returns to its prior phase.
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel);
    }

    /// Stop the task and cancel in-flight work.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RequestCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Coordinator Task
// =============================================================================

struct CoordinatorTask {
    snapshots: watch::Receiver<Arc<QuerySnapshot>>,
    contract: Arc<dyn FetchContract>,
    cache: Arc<ResponseCache>,
    key_prefix: String,
    session: Option<SessionEvents>,
    debouncer: Debouncer,
    guard: RequestGuard,
    status: Arc<watch::Sender<ViewStatus>>,
    outcomes: mpsc::UnboundedSender<Outcome>,
    /// Query of the in-flight request or the committed page.
    current_query: Option<QueryState>,
    /// Terminal phase to restore if the current request is cancelled.
    settled_phase: FetchPhase,
}

impl CoordinatorTask {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut outcomes: mpsc::UnboundedReceiver<Outcome>,
        invalidations: broadcast::Receiver<CacheTarget>,
        shutdown: CancellationToken,
    ) {
        let mut invalidations = Some(invalidations);

        let initial = self.snapshots.borrow_and_update().query.clone();
        self.issue(initial, false);

        loop {
            let debounce = self.debouncer.tick();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = self.snapshots.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Query store dropped, stopping '{}'", self.key_prefix);
                        break;
                    }
                    let snapshot = self.snapshots.borrow_and_update().clone();
                    self.on_snapshot(&snapshot);
                }
                _ = debounce => {
                    self.debouncer.disarm();
                    let query = self.snapshots.borrow().query.clone();
                    self.issue(query, false);
                }
                Some(command) = commands.recv() => self.on_command(command),
                Some(outcome) = outcomes.recv() => self.commit(outcome),
                invalidated = next_invalidation(&mut invalidations) => match invalidated {
                    Ok(target) if target.touches_prefix(&self.key_prefix) => {
                        tracing::debug!("Cache invalidated, refetching '{}'", self.key_prefix);
                        let query = self.snapshots.borrow().query.clone();
                        self.issue(query, true);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        let query = self.snapshots.borrow().query.clone();
                        self.issue(query, true);
                    }
                    Err(broadcast::error::RecvError::Closed) => invalidations = None,
                },
            }
        }

        self.guard.cancel();
        tracing::debug!("Coordinator for '{}' stopped", self.key_prefix);
    }

    fn on_snapshot(&mut self, snapshot: &QuerySnapshot) {
        if !snapshot.change.affects_fetch() {
            return;
        }
        if snapshot.change.is_debounced() {
            self.debouncer.arm();
            return;
        }
        self.debouncer.disarm();
        self.issue(snapshot.query.clone(), false);
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Refetch => {
                self.debouncer.disarm();
                let query = self.snapshots.borrow().query.clone();
                self.issue(query, true);
            }
            Command::Cancel => {
                self.debouncer.disarm();
                self.guard.cancel();
            }
        }
    }

    /// Make `query` the current request. `force` skips dedup and the cache.
    fn issue(&mut self, query: QueryState, force: bool) {
        let phase = self.status.borrow().phase;
        if !force && phase != FetchPhase::Error && self.current_query.as_ref() == Some(&query) {
            tracing::debug!("Query unchanged, keeping current request");
            return;
        }

        let ticket = self.guard.begin();
        self.current_query = Some(query.clone());
        let key = CacheKey::new(&self.key_prefix, &query);

        if !force {
            if let Some(data) = self.cache.get(&key) {
                tracing::debug!("Cache hit for '{}'", self.key_prefix);
                self.guard.finish(ticket.generation);
                self.publish_success(ticket.generation, query, data);
                return;
            }
        }

        if phase != FetchPhase::Loading {
            self.settled_phase = phase;
        }
        self.status.send_modify(|status| {
            status.phase = FetchPhase::Loading;
            status.error = None;
            status.generation = ticket.generation;
        });
        tracing::debug!(
            "Issuing request {} for '{}' (page {})",
            ticket.generation,
            self.key_prefix,
            query.page_index
        );

        self.spawn_fetch(ticket, key, query, force);
    }

    fn spawn_fetch(&self, ticket: Ticket, key: CacheKey, query: QueryState, force: bool) {
        let contract = self.contract.clone();
        let cache = self.cache.clone();
        let outcomes = self.outcomes.clone();

        tokio::spawn(async move {
            let Ticket { generation, token } = ticket;
            let fetch_query = query.clone();

            let request = async move {
                // Another view may have filled the entry since `issue` looked.
                if !force {
                    if let Some(data) = cache.get(&key) {
                        return Ok(data);
                    }
                }
                let shared = cache.fetch_shared(key, move |signal| {
                    contract.fetch(FetchArgs {
                        query: fetch_query,
                        signal,
                    })
                });
                tokio::select! {
                    _ = token.cancelled() => Err(FetchError::Cancelled),
                    result = shared => result,
                }
            };

            // A panicking fetch still has to settle the view.
            let result = match AssertUnwindSafe(request).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("Request {} panicked", generation);
                    Err(FetchError::network("fetch task aborted"))
                }
            };
            let _ = outcomes.send(Outcome {
                generation,
                query,
                result,
            });
        });
    }

    fn commit(&mut self, outcome: Outcome) {
        if !self.guard.finish(outcome.generation) {
            tracing::debug!(
                "Discarding stale response {} (current {})",
                outcome.generation,
                self.guard.generation()
            );
            return;
        }

        match outcome.result {
            Ok(data) => self.publish_success(outcome.generation, outcome.query, data),
            Err(FetchError::Cancelled) => {
                let restored = self.settled_phase;
                tracing::debug!("Request {} cancelled, back to {:?}", outcome.generation, restored);
                self.status.send_modify(|status| status.phase = restored);
                self.current_query = self.status.borrow().page.as_ref().map(|p| p.query.clone());
            }
            Err(error) => {
                if error == FetchError::AuthExpired {
                    if let Some(session) = &self.session {
                        session.notify_expired();
                    }
                }
                tracing::debug!("Request {} failed: {}", outcome.generation, error);
                self.settled_phase = FetchPhase::Error;
                self.status.send_modify(|status| {
                    status.phase = FetchPhase::Error;
                    status.error = Some(error);
                    status.generation = outcome.generation;
                });
            }
        }
    }

    fn publish_success(&mut self, generation: u64, query: QueryState, data: Arc<FetchResult>) {
        self.settled_phase = FetchPhase::Success;
        self.status.send_replace(ViewStatus {
            phase: FetchPhase::Success,
            page: Some(Arc::new(CommittedPage {
                query,
                result: data,
            })),
            error: None,
            generation,
        });
    }
}

async fn next_invalidation(
    rx: &mut Option<broadcast::Receiver<CacheTarget>>,
) -> Result<CacheTarget, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
