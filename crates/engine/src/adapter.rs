//! Durable sync adapter.
//!
//! Maps sessions onto the knowledge graph's entity-observation model: the
//! session itself is one entity (scalar fields and payload entries encoded
//! as `key: value` observation lines, appended so history accumulates and
//! the latest line wins on read), each ledger task is its own entity linked
//! by naming convention. Saves are ordered per session and skipped when a
//! newer snapshot has already been persisted.

use baton_domain::config::{FsmConfig, GraphStoreConfig};
use baton_domain::error::Result;
use baton_domain::session::{Phase, Role, Session, TaskItem, TaskPriority, TaskStatus, KEY_TODOS};
use baton_graph::{Entity, GraphStore};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

const ENTITY_SESSION: &str = "session";
const ENTITY_TASK: &str = "task";

/// Writes sessions to, and restores them from, a [`GraphStore`].
///
/// Holds a per-session async mutex so overlapping saves for one session
/// serialize, and a per-session high-water mark (`last_activity` of the
/// newest persisted snapshot) so a late retry cannot clobber fresher state.
pub struct SyncAdapter {
    store: Arc<dyn GraphStore>,
    ephemeral: bool,
    initial_effectiveness: f64,
    write_locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    high_water: parking_lot::Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SyncAdapter {
    pub fn new(store: Arc<dyn GraphStore>, graph: &GraphStoreConfig, fsm: &FsmConfig) -> Self {
        Self {
            store,
            ephemeral: graph.ephemeral,
            initial_effectiveness: fsm.initial_effectiveness,
            write_locks: parking_lot::Mutex::new(HashMap::new()),
            high_water: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Persist a snapshot. No-op in ephemeral mode; skipped when a snapshot
    /// at least as new has already been saved for this session.
    pub async fn save(&self, snapshot: &Session) -> Result<()> {
        if self.ephemeral {
            return Ok(());
        }
        let session_id = snapshot.session_id.as_str();

        let lock = {
            let mut locks = self.write_locks.lock();
            Arc::clone(
                locks
                    .entry(session_id.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        let _guard = lock.lock().await;

        let mark = { self.high_water.lock().get(session_id).copied() };
        if let Some(mark) = mark {
            if mark >= snapshot.last_activity {
                tracing::debug!(
                    session_id,
                    "snapshot not newer than persisted state, skipping save"
                );
                return Ok(());
            }
        }

        // First save this process has seen for the session. The create is
        // replay-safe, so a restart repeating it costs nothing.
        if mark.is_none() {
            self.store
                .upsert_entity(
                    session_id,
                    ENTITY_SESSION,
                    vec![format!("created_at: {}", Utc::now().to_rfc3339())],
                )
                .await?;
        }

        self.store
            .append_observations(session_id, encode_fields(snapshot))
            .await?;

        for (index, task) in snapshot.todos()?.iter().enumerate() {
            let entity_name = task_entity_name(session_id, &task.id);
            self.store
                .upsert_entity(
                    &entity_name,
                    ENTITY_TASK,
                    vec![
                        format!("session: {session_id}"),
                        format!("task_id: {}", task.id),
                        format!("content: {}", task.content),
                        format!("priority: {}", task.priority.as_str()),
                        format!("ledger_index: {index}"),
                    ],
                )
                .await?;
            self.store
                .append_observations(&entity_name, vec![format!("status: {}", task.status)])
                .await?;
        }

        self.high_water
            .lock()
            .insert(session_id.to_string(), snapshot.last_activity);
        Ok(())
    }

    /// Restore a session from the graph. Unknown sessions (and ephemeral
    /// mode) come back as a fresh record at INIT.
    pub async fn load(&self, session_id: &str) -> Result<Session> {
        if self.ephemeral {
            return Ok(Session::new(session_id, self.initial_effectiveness));
        }
        let Some(entity) = self.store.read_entity(session_id).await? else {
            return Ok(Session::new(session_id, self.initial_effectiveness));
        };

        let mut session = self.decode_session(session_id, &entity);
        let tasks = self.load_tasks(session_id).await?;
        if !tasks.is_empty() {
            session.set_todos(&tasks)?;
        }
        Ok(session)
    }

    /// Fold observation lines into a session, later lines winning. Lines
    /// that fail to decode are skipped so one bad write cannot poison the
    /// whole record.
    fn decode_session(&self, session_id: &str, entity: &Entity) -> Session {
        let mut session = Session::new(session_id, self.initial_effectiveness);
        for obs in &entity.observations {
            let Some((key, raw)) = obs.split_once(": ") else {
                continue;
            };
            match key {
                "current_phase" => {
                    if let Some(phase) = Phase::parse(raw) {
                        session.current_phase = phase;
                    }
                }
                "role" => {
                    if let Some(role) = Role::parse(raw) {
                        session.role = role;
                    }
                }
                "reasoning_effectiveness" => {
                    if let Ok(score) = raw.parse::<f64>() {
                        session.reasoning_effectiveness = score;
                    }
                }
                "initial_objective" => {
                    session.initial_objective = Some(raw.to_string());
                }
                "last_activity" => {
                    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
                        session.last_activity = ts.with_timezone(&Utc);
                    }
                }
                "created_at" | "archived_at" => {}
                _ => {
                    if let Some(payload_key) = key.strip_prefix("payload_") {
                        let value = serde_json::from_str(raw)
                            .unwrap_or_else(|_| Value::String(raw.to_string()));
                        session.payload.insert(payload_key.to_string(), value);
                    }
                }
            }
        }
        session
    }

    /// Collect the session's task entities and rebuild the ledger in its
    /// original order.
    async fn load_tasks(&self, session_id: &str) -> Result<Vec<TaskItem>> {
        let prefix = format!("{session_id}_task_");
        let entities = self.store.search_entities(&prefix).await?;

        let mut tasks: Vec<(usize, String, TaskItem)> = Vec::new();
        for entity in entities {
            if entity.entity_type != ENTITY_TASK || !entity.name.starts_with(&prefix) {
                continue;
            }
            let Some(content) = entity.observation("content") else {
                tracing::warn!(entity = %entity.name, "task entity without content, skipping");
                continue;
            };
            let id = entity
                .observation("task_id")
                .map(str::to_string)
                .unwrap_or_else(|| entity.name[prefix.len()..].to_string());
            let status = entity
                .observation("status")
                .and_then(TaskStatus::parse)
                .unwrap_or_default();
            let priority = entity
                .observation("priority")
                .and_then(TaskPriority::parse)
                .unwrap_or_default();
            let index = entity
                .observation("ledger_index")
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(usize::MAX);
            tasks.push((
                index,
                entity.name.clone(),
                TaskItem {
                    id,
                    content: content.to_string(),
                    status,
                    priority,
                },
            ));
        }
        tasks.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Ok(tasks.into_iter().map(|(_, _, task)| task).collect())
    }

    /// Mark durable sessions idle past `older_than` as archived. Returns
    /// how many were newly archived.
    pub async fn cleanup(&self, older_than: chrono::Duration) -> Result<usize> {
        if self.ephemeral {
            return Ok(0);
        }
        let cutoff = Utc::now() - older_than;
        let entities = self.store.search_entities(ENTITY_SESSION).await?;

        let mut archived = 0;
        for entity in entities {
            if entity.entity_type != ENTITY_SESSION || entity.observation("archived_at").is_some()
            {
                continue;
            }
            let stale = entity
                .observation("last_activity")
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|ts| ts.with_timezone(&Utc) < cutoff)
                .unwrap_or(false);
            if !stale {
                continue;
            }
            self.store
                .append_observations(
                    &entity.name,
                    vec![format!("archived_at: {}", Utc::now().to_rfc3339())],
                )
                .await?;
            archived += 1;
        }
        Ok(archived)
    }

    /// Release per-session bookkeeping once the cache evicts a session. A
    /// later revival re-reads the graph instead of trusting stale marks.
    pub fn forget(&self, session_id: &str) {
        self.write_locks.lock().remove(session_id);
        self.high_water.lock().remove(session_id);
    }
}

fn task_entity_name(session_id: &str, task_id: &str) -> String {
    format!("{session_id}_task_{task_id}")
}

/// One `key: value` line per scalar field plus one per payload entry. The
/// ledger is excluded here; tasks persist as their own entities.
fn encode_fields(session: &Session) -> Vec<String> {
    let mut fields = vec![
        format!("current_phase: {}", session.current_phase),
        format!("role: {}", session.role),
        format!("reasoning_effectiveness: {}", session.reasoning_effectiveness),
        format!("last_activity: {}", session.last_activity.to_rfc3339()),
    ];
    if let Some(ref objective) = session.initial_objective {
        fields.push(format!("initial_objective: {objective}"));
    }
    for (key, value) in &session.payload {
        if key == KEY_TODOS {
            continue;
        }
        fields.push(format!("payload_{key}: {value}"));
    }
    fields
}
