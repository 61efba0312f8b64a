//! The phase controller.
//!
//! Folds a "phase completed" report into the session: merges the delivered
//! payload, applies the effectiveness sample, advances the task ledger while
//! in EXECUTE, and moves `current_phase` along the workflow:
//!
//! ```text
//! INIT → QUERY → ENHANCE → KNOWLEDGE → PLAN → EXECUTE ⟲ → VERIFY → DONE
//!                                               ↑___________│ (failed)
//! ```
//!
//! EXECUTE repeats once per ledger task; VERIFY routes back to EXECUTE when
//! verification fails. All decisions here are synchronous and pure of I/O.

use baton_domain::config::FsmConfig;
use baton_domain::error::{Error, Result};
use baton_domain::session::{Phase, Role, Session, TaskItem, TaskStatus, KEY_TODOS};
use baton_domain::trace::TraceEvent;
use serde_json::{Map, Value};

/// Payload key reporting whether the completed phase's work succeeded.
/// Drives the effectiveness score and EXECUTE task marking.
pub const KEY_EXECUTION_SUCCESS: &str = "execution_success";
/// Payload key carrying the VERIFY outcome. Absent means failed.
pub const KEY_VERIFICATION_PASSED: &str = "verification_passed";
/// Payload key assigning the session role.
pub const KEY_ROLE: &str = "role";

/// Operations the orchestrating client is advised to allow per phase.
/// Advisory only; enforcement is the client's responsibility.
pub fn capabilities(phase: Phase) -> &'static [&'static str] {
    match phase {
        Phase::Init | Phase::Query | Phase::Enhance => &["advance"],
        Phase::Knowledge => &[
            "web_search",
            "web_fetch",
            "api_search",
            "knowledge_synthesize",
            "code_exec",
            "advance",
        ],
        Phase::Plan => &["todo_write", "advance"],
        Phase::Execute => &[
            "todo_read",
            "todo_write",
            "task_spawn",
            "shell",
            "file_read",
            "file_write",
            "file_edit",
            "browser",
            "code_exec",
            "advance",
        ],
        Phase::Verify => &["todo_read", "file_read", "code_exec", "advance"],
        Phase::Done => &[],
    }
}

/// Decides phase transitions. One per engine; holds the effectiveness
/// bounds from config.
pub struct PhaseController {
    config: FsmConfig,
}

impl PhaseController {
    pub fn new(config: FsmConfig) -> Self {
        Self { config }
    }

    /// Fold a completion report into `session` and return the next phase.
    ///
    /// Leaves the session untouched on any error: the phase mismatch check
    /// and payload validation both run before the first mutation. Callers
    /// running this inside a draft-commit (see `SessionCache::update_with`)
    /// get that guarantee end to end.
    pub fn report(
        &self,
        session: &mut Session,
        phase_completed: Phase,
        payload: &Map<String, Value>,
    ) -> Result<Phase> {
        if phase_completed != session.current_phase {
            TraceEvent::PhaseMismatch {
                session_id: session.session_id.clone(),
                current: session.current_phase.to_string(),
                reported: phase_completed.to_string(),
            }
            .emit();
            return Err(Error::PhaseMismatch {
                current: session.current_phase,
                reported: phase_completed,
            });
        }

        // Validate the delivered ledger before mutating anything.
        let delivered_todos = decode_todos(payload)?;

        // Shallow merge, incoming values win.
        for (key, value) in payload {
            session.payload.insert(key.clone(), value.clone());
        }
        if !delivered_todos.is_empty() {
            session.set_todos(&delivered_todos)?;
        }

        // Signals are read from this report, never from stored state.
        if let Some(role) = payload.get(KEY_ROLE).and_then(Value::as_str) {
            match Role::parse(role) {
                Some(role) => session.role = role,
                None => tracing::debug!(role, "unknown role in payload ignored"),
            }
        }
        let execution_success = payload.get(KEY_EXECUTION_SUCCESS).and_then(Value::as_bool);
        if let Some(success) = execution_success {
            session.adjust_effectiveness(
                success,
                self.config.min_effectiveness,
                self.config.max_effectiveness,
            );
        }

        let next = match session.current_phase {
            Phase::Init => Phase::Query,
            Phase::Query => Phase::Enhance,
            Phase::Enhance => Phase::Knowledge,
            Phase::Knowledge => Phase::Plan,
            Phase::Plan => {
                session.set_task_index(0);
                Phase::Execute
            }
            Phase::Execute => self.execute_step(session, execution_success)?,
            Phase::Verify => {
                let passed = payload
                    .get(KEY_VERIFICATION_PASSED)
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if passed {
                    Phase::Done
                } else {
                    self.reset_cursor_for_rework(session)?;
                    Phase::Execute
                }
            }
            Phase::Done => Phase::Done,
        };

        if next != session.current_phase {
            TraceEvent::PhaseAdvanced {
                session_id: session.session_id.clone(),
                from: session.current_phase.to_string(),
                to: next.to_string(),
                effectiveness: session.reasoning_effectiveness,
            }
            .emit();
            session.current_phase = next;
        }

        Ok(next)
    }

    /// One EXECUTE pass: mark the task under the cursor from the success
    /// signal, advance the cursor, and stay in EXECUTE while tasks remain.
    fn execute_step(
        &self,
        session: &mut Session,
        execution_success: Option<bool>,
    ) -> Result<Phase> {
        let mut todos = session.todos()?;
        let mut cursor = session.task_index() as usize;

        if let Some(task) = todos.get_mut(cursor) {
            task.status = match execution_success {
                Some(false) => TaskStatus::Failed,
                _ => TaskStatus::Completed,
            };
            TraceEvent::TaskMarked {
                session_id: session.session_id.clone(),
                task_id: task.id.clone(),
                status: task.status.to_string(),
                cursor: cursor as u64,
            }
            .emit();
            session.set_todos(&todos)?;

            cursor += 1;
            session.set_task_index(cursor as u64);
        }

        if cursor < todos.len() {
            Ok(Phase::Execute)
        } else {
            Ok(Phase::Verify)
        }
    }

    /// After a failed VERIFY, point the cursor at the first task that still
    /// needs work. All-completed ledgers park the cursor at the end; the
    /// client is expected to extend the ledger with remediation tasks.
    fn reset_cursor_for_rework(&self, session: &mut Session) -> Result<()> {
        let todos = session.todos()?;
        let cursor = todos
            .iter()
            .position(|t| t.status != TaskStatus::Completed)
            .unwrap_or(todos.len());
        session.set_task_index(cursor as u64);
        Ok(())
    }
}

pub(crate) fn decode_todos(payload: &Map<String, Value>) -> Result<Vec<TaskItem>> {
    match payload.get(KEY_TODOS) {
        None => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidPayload(format!("{KEY_TODOS}: {e}"))),
    }
}
