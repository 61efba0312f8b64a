//! Session state engine.
//!
//! Ties the pieces together: the [`fsm::PhaseController`] decides
//! transitions, the [`cache::SessionCache`] answers every read and write
//! synchronously, the [`adapter::SyncAdapter`] mirrors sessions into the
//! knowledge graph in the background, and the [`retry::RetryQueue`] replays
//! whatever the graph refused. Callers talk to [`SessionEngine`]; graph
//! trouble never surfaces through it.
//!
//! ```rust,no_run
//! use baton_domain::config::Config;
//! use baton_engine::{AdvanceRequest, SessionEngine};
//!
//! # async fn demo() -> baton_domain::error::Result<()> {
//! let engine = SessionEngine::from_config(Config::from_env())?;
//! baton_engine::spawn_background_tasks(&engine);
//!
//! let response = engine
//!     .advance(AdvanceRequest {
//!         session_id: "feature-importer".into(),
//!         initial_objective: Some("add the csv importer".into()),
//!         ..Default::default()
//!     })
//!     .await?;
//! assert_eq!(response.current_phase.as_str(), "QUERY");
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod cache;
pub mod fsm;
pub mod retry;
mod session_lock;

pub use adapter::SyncAdapter;
pub use cache::SessionCache;
pub use fsm::{capabilities, PhaseController};
pub use retry::{
    classify, ErrorClass, RetryData, RetryEntry, RetryOperation, RetryQueue, RetryState,
};
pub use session_lock::SessionLockMap;

use baton_domain::config::{Config, ConfigSeverity};
use baton_domain::error::{Error, Result};
use baton_domain::session::{Phase, Session, SessionUpdate};
use baton_domain::trace::TraceEvent;
use baton_graph::GraphStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One `advance` call. Everything beyond the session id is optional:
/// without `phase_completed` the call reads (or, with an objective,
/// establishes) the session instead of advancing it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvanceRequest {
    pub session_id: String,
    #[serde(default)]
    pub phase_completed: Option<Phase>,
    #[serde(default)]
    pub initial_objective: Option<String>,
    #[serde(default)]
    pub payload: Option<Map<String, Value>>,
}

/// Coarse lifecycle marker so clients need not compare phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Done,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdvanceResponse {
    pub current_phase: Phase,
    pub status: SessionStatus,
    /// Operations the client is advised to allow in this phase.
    pub capability_set: Vec<&'static str>,
    pub session: Session,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine facade
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The public surface of the engine.
///
/// All session reads and writes complete against the in-process cache;
/// durable sync and hydration run as fire-and-forget tasks behind it,
/// falling back to the retry queue on failure.
pub struct SessionEngine {
    config: Config,
    cache: Arc<SessionCache>,
    adapter: Arc<SyncAdapter>,
    retries: Arc<RetryQueue>,
    controller: PhaseController,
    locks: SessionLockMap,
}

impl SessionEngine {
    /// Build an engine over an existing store. Fails when the configuration
    /// does not validate; warnings are logged and tolerated.
    pub fn new(config: Config, store: Arc<dyn GraphStore>) -> Result<Arc<Self>> {
        let issues = config.validate();
        let mut errors = 0;
        for issue in &issues {
            match issue.severity {
                ConfigSeverity::Error => {
                    errors += 1;
                    tracing::error!(%issue, "invalid configuration");
                }
                ConfigSeverity::Warning => tracing::warn!(%issue, "configuration warning"),
            }
        }
        if errors > 0 {
            return Err(Error::Config(format!(
                "configuration failed validation with {errors} error(s)"
            )));
        }

        let cache = Arc::new(SessionCache::new(&config.fsm, &config.cache));
        let adapter = Arc::new(SyncAdapter::new(store, &config.graph_store, &config.fsm));
        let retries = Arc::new(RetryQueue::new(config.retry.clone()));
        let controller = PhaseController::new(config.fsm.clone());

        tracing::info!(
            transport = ?config.graph_store.transport,
            ephemeral = config.graph_store.ephemeral,
            retention_hours = config.cache.retention_hours,
            "session engine ready"
        );

        Ok(Arc::new(Self {
            config,
            cache,
            adapter,
            retries,
            controller,
            locks: SessionLockMap::new(),
        }))
    }

    /// Build the graph store from config, then the engine on top of it.
    pub fn from_config(config: Config) -> Result<Arc<Self>> {
        let store = baton_graph::create_store(&config.graph_store)?;
        Self::new(config, store)
    }

    // ── interactive path ────────────────────────────────────────────

    /// Resolve the session, fold in the caller's report, and answer with
    /// the resulting phase and its capability set. Serialized per session.
    pub async fn advance(&self, req: AdvanceRequest) -> Result<AdvanceResponse> {
        if req.session_id.trim().is_empty() {
            return Err(Error::InvalidPayload("session_id must not be empty".into()));
        }
        let _permit = self.locks.acquire(&req.session_id).await?;

        let (session, ticket) = self.cache.resolve(&req.session_id);
        if let Some(revision) = ticket {
            self.schedule_hydration(&req.session_id, revision);
        }

        let payload = req.payload.unwrap_or_default();

        // A completed-phase report: the one path that moves the machine.
        if let Some(reported) = req.phase_completed {
            let objective = req.initial_objective;
            let (snapshot, _next) = self.cache.update_with(&req.session_id, |session| {
                if session.initial_objective.is_none() {
                    if let Some(ref objective) = objective {
                        session.initial_objective = Some(objective.clone());
                    }
                }
                self.controller.report(session, reported, &payload)
            })?;
            self.schedule_save(snapshot.clone());
            return Ok(respond(snapshot));
        }

        // Establishment: delivering an objective implicitly completes INIT.
        // On a session already past INIT the objective stays write-once and
        // the payload merges without a transition.
        if let Some(objective) = req.initial_objective {
            let (snapshot, ()) = self.cache.update_with(&req.session_id, |session| {
                if session.initial_objective.is_none() {
                    session.initial_objective = Some(objective.clone());
                }
                if session.current_phase == Phase::Init {
                    self.controller.report(session, Phase::Init, &payload)?;
                } else {
                    merge_payload(session, &payload)?;
                }
                Ok(())
            })?;
            self.schedule_save(snapshot.clone());
            return Ok(respond(snapshot));
        }

        // Payload without a report: stash it, no transition.
        if !payload.is_empty() {
            let (snapshot, ()) = self
                .cache
                .update_with(&req.session_id, |session| merge_payload(session, &payload))?;
            self.schedule_save(snapshot.clone());
            return Ok(respond(snapshot));
        }

        // Pure read.
        Ok(respond(session))
    }

    // ── synchronous helpers ─────────────────────────────────────────

    /// Current state of a session, creating it on first sight. Never
    /// blocks on the graph.
    pub fn snapshot(&self, session_id: &str) -> Session {
        let (session, ticket) = self.cache.resolve(session_id);
        if let Some(revision) = ticket {
            self.schedule_hydration(session_id, revision);
        }
        session
    }

    /// Apply a partial update outside the phase machine. Returns the state
    /// after the write and schedules a durable save for it. The ledger key
    /// is validated like any other payload boundary.
    pub fn update_session(&self, session_id: &str, update: &SessionUpdate) -> Result<Session> {
        fsm::decode_todos(&update.payload)?;
        let (_, ticket) = self.cache.resolve(session_id);
        if let Some(revision) = ticket {
            self.schedule_hydration(session_id, revision);
        }
        let snapshot = self.cache.update(session_id, update);
        self.schedule_save(snapshot.clone());
        Ok(snapshot)
    }

    // ── background path ─────────────────────────────────────────────

    fn schedule_save(&self, snapshot: Session) {
        if self.config.graph_store.ephemeral {
            return;
        }
        // Without a runtime the save cannot run now, but it must not be
        // lost either; queue it for the next drain.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            let error = Error::Other("no async runtime for durable save".into());
            let session_id = snapshot.session_id.clone();
            self.retries
                .mark_for_retry(&session_id, RetryData::Save { snapshot }, &error);
            return;
        };
        let adapter = Arc::clone(&self.adapter);
        let retries = Arc::clone(&self.retries);
        handle.spawn(async move {
            if let Err(error) = adapter.save(&snapshot).await {
                let session_id = snapshot.session_id.clone();
                TraceEvent::SyncFailed {
                    session_id: session_id.clone(),
                    operation: RetryOperation::Save.to_string(),
                    classification: classify(&error).to_string(),
                    error: error.to_string(),
                }
                .emit();
                retries.mark_for_retry(&session_id, RetryData::Save { snapshot }, &error);
            }
        });
    }

    fn schedule_hydration(&self, session_id: &str, expected_revision: u64) {
        if self.config.graph_store.ephemeral {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(session_id, "no async runtime, hydration not scheduled");
            return;
        };
        let adapter = Arc::clone(&self.adapter);
        let cache = Arc::clone(&self.cache);
        let retries = Arc::clone(&self.retries);
        let session_id = session_id.to_string();
        handle.spawn(async move {
            match adapter.load(&session_id).await {
                Ok(loaded) => {
                    cache.apply_hydration(&session_id, expected_revision, loaded);
                }
                Err(error) => {
                    TraceEvent::SyncFailed {
                        session_id: session_id.clone(),
                        operation: RetryOperation::Load.to_string(),
                        classification: classify(&error).to_string(),
                        error: error.to_string(),
                    }
                    .emit();
                    retries.mark_for_retry(
                        &session_id,
                        RetryData::Load { expected_revision },
                        &error,
                    );
                }
            }
        });
    }

    /// Replay every due retry entry once. Returns how many replays
    /// succeeded. Normally driven by [`spawn_background_tasks`]; exposed
    /// for callers that want to force a reconciliation pass.
    pub async fn drain_retries(&self) -> usize {
        let due = self.retries.due();
        let mut drained = 0;
        for entry in due {
            let outcome = match &entry.data {
                RetryData::Save { snapshot } => self.adapter.save(snapshot).await,
                RetryData::Load { expected_revision } => {
                    match self.adapter.load(&entry.session_id).await {
                        // A skipped apply still resolves the entry: the
                        // cache moved on, there is nothing left to load.
                        Ok(loaded) => {
                            self.cache
                                .apply_hydration(&entry.session_id, *expected_revision, loaded);
                            Ok(())
                        }
                        Err(error) => Err(error),
                    }
                }
            };
            match outcome {
                Ok(()) => {
                    self.retries.resolve_success(&entry.session_id, entry.operation());
                    drained += 1;
                }
                Err(error) => {
                    self.retries
                        .resolve_failure(&entry.session_id, entry.operation(), &error);
                }
            }
        }
        drained
    }

    /// Evict idle sessions from the cache, release their per-session state,
    /// and archive their durable records. Returns the eviction count.
    pub async fn cleanup(&self) -> usize {
        let evicted = self.cache.cleanup();
        for session_id in &evicted {
            self.adapter.forget(session_id);
        }
        self.locks.prune_idle();

        let retention = chrono::Duration::hours(self.config.cache.retention_hours as i64);
        let archived = match self.adapter.cleanup(retention).await {
            Ok(archived) => archived,
            Err(error) => {
                tracing::warn!(%error, "durable cleanup failed, retried next interval");
                0
            }
        };
        TraceEvent::CleanupCompleted {
            evicted: evicted.len(),
            archived,
        }
        .emit();
        evicted.len()
    }

    // ── introspection ───────────────────────────────────────────────

    pub fn retry_backlog(&self) -> usize {
        self.retries.len()
    }

    pub fn retries(&self) -> &RetryQueue {
        &self.retries
    }

    pub fn cached_sessions(&self) -> usize {
        self.cache.len()
    }
}

fn respond(session: Session) -> AdvanceResponse {
    let status = if session.current_phase.is_terminal() {
        SessionStatus::Done
    } else {
        SessionStatus::InProgress
    };
    AdvanceResponse {
        current_phase: session.current_phase,
        status,
        capability_set: capabilities(session.current_phase).to_vec(),
        session,
    }
}

/// Merge a payload map outside a phase report. The ledger key still has to
/// decode; everything else is opaque.
fn merge_payload(session: &mut Session, payload: &Map<String, Value>) -> Result<()> {
    fsm::decode_todos(payload)?;
    for (key, value) in payload {
        session.payload.insert(key.clone(), value.clone());
    }
    Ok(())
}

/// Spawn the retry drain and cleanup loops onto the current runtime. Call
/// once after building the engine.
pub fn spawn_background_tasks(engine: &Arc<SessionEngine>) {
    let drain = Arc::clone(engine);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            drain.config.retry.drain_interval_secs,
        ));
        loop {
            ticker.tick().await;
            let drained = drain.drain_retries().await;
            if drained > 0 {
                tracing::debug!(drained, "retry queue drained");
            }
        }
    });

    let cleaner = Arc::clone(engine);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            cleaner.config.cache.cleanup_interval_secs,
        ));
        loop {
            ticker.tick().await;
            cleaner.cleanup().await;
        }
    });

    tracing::info!("background tasks spawned");
}
