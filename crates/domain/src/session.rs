//! The session record and its phase machine vocabulary.
//!
//! A session is a small mutable document: where the workflow stands
//! (`current_phase`), what it is trying to do (`initial_objective`), how the
//! client wants it approached (`role`), a rolling success score, and an open
//! payload map carrying everything phase handlers produce. Two payload keys
//! are reserved and decoded here: `current_todos` (the task ledger) and
//! `current_task_index` (the execution cursor).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phases
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a session sits in the workflow.
///
/// Sessions move strictly forward except for the EXECUTE loop (one pass per
/// ledger task) and the VERIFY → EXECUTE remediation edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Init,
    Query,
    Enhance,
    Knowledge,
    Plan,
    Execute,
    Verify,
    Done,
}

impl Phase {
    /// The wire form (`"INIT"`, `"QUERY"`, …).
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "INIT",
            Phase::Query => "QUERY",
            Phase::Enhance => "ENHANCE",
            Phase::Knowledge => "KNOWLEDGE",
            Phase::Plan => "PLAN",
            Phase::Execute => "EXECUTE",
            Phase::Verify => "VERIFY",
            Phase::Done => "DONE",
        }
    }

    pub fn parse(s: &str) -> Option<Phase> {
        match s {
            "INIT" => Some(Phase::Init),
            "QUERY" => Some(Phase::Query),
            "ENHANCE" => Some(Phase::Enhance),
            "KNOWLEDGE" => Some(Phase::Knowledge),
            "PLAN" => Some(Phase::Plan),
            "EXECUTE" => Some(Phase::Execute),
            "VERIFY" => Some(Phase::Verify),
            "DONE" => Some(Phase::Done),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cognitive role the orchestrating client assigned to the session.
/// Stored verbatim; the engine never derives roles itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Planner,
    Coder,
    Critic,
    #[default]
    Researcher,
    Analyzer,
    Synthesizer,
    UiArchitect,
    UiImplementer,
    UiRefiner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Planner => "planner",
            Role::Coder => "coder",
            Role::Critic => "critic",
            Role::Researcher => "researcher",
            Role::Analyzer => "analyzer",
            Role::Synthesizer => "synthesizer",
            Role::UiArchitect => "ui_architect",
            Role::UiImplementer => "ui_implementer",
            Role::UiRefiner => "ui_refiner",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "planner" => Some(Role::Planner),
            "coder" => Some(Role::Coder),
            "critic" => Some(Role::Critic),
            "researcher" => Some(Role::Researcher),
            "analyzer" => Some(Role::Analyzer),
            "synthesizer" => Some(Role::Synthesizer),
            "ui_architect" => Some(Role::UiArchitect),
            "ui_implementer" => Some(Role::UiImplementer),
            "ui_refiner" => Some(Role::UiRefiner),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task ledger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed and failed tasks never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<TaskPriority> {
        match s {
            "low" => Some(TaskPriority::Low),
            "medium" => Some(TaskPriority::Medium),
            "high" => Some(TaskPriority::High),
            _ => None,
        }
    }
}

/// One entry in the session's task ledger (the `current_todos` payload key).
/// Entries are never deleted, only status-updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskItem {
    /// Stable id. Generated when the client omits one.
    #[serde(default = "d_task_id")]
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
}

fn d_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reserved payload key holding the task ledger.
pub const KEY_TODOS: &str = "current_todos";
/// Reserved payload key holding the execution cursor.
pub const KEY_TASK_INDEX: &str = "current_task_index";

/// Effectiveness delta applied per reported execution outcome.
pub const EFFECTIVENESS_STEP: f64 = 0.1;

/// A single workflow session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub current_phase: Phase,
    /// Set once when the session is established; later writes are ignored.
    #[serde(default)]
    pub initial_objective: Option<String>,
    #[serde(default)]
    pub role: Role,
    /// Rolling success score, kept within the configured bounds.
    pub reasoning_effectiveness: f64,
    /// Open extension map. Reserved keys are decoded on demand, everything
    /// else is opaque to the engine.
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// A fresh session at INIT with the configured starting effectiveness.
    pub fn new(session_id: impl Into<String>, initial_effectiveness: f64) -> Self {
        Self {
            session_id: session_id.into(),
            current_phase: Phase::Init,
            initial_objective: None,
            role: Role::default(),
            reasoning_effectiveness: initial_effectiveness,
            payload: Map::new(),
            last_activity: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Decode the task ledger. An absent key is an empty ledger; a present
    /// but undecodable value is a caller bug.
    pub fn todos(&self) -> Result<Vec<TaskItem>> {
        match self.payload.get(KEY_TODOS) {
            None => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| Error::InvalidPayload(format!("{KEY_TODOS}: {e}"))),
        }
    }

    pub fn set_todos(&mut self, todos: &[TaskItem]) -> Result<()> {
        let value = serde_json::to_value(todos)?;
        self.payload.insert(KEY_TODOS.into(), value);
        Ok(())
    }

    /// The execution cursor. Absent or non-numeric values read as 0.
    pub fn task_index(&self) -> u64 {
        self.payload
            .get(KEY_TASK_INDEX)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    pub fn set_task_index(&mut self, index: u64) {
        self.payload
            .insert(KEY_TASK_INDEX.into(), Value::from(index));
    }

    /// Fold one success/failure sample into the effectiveness score.
    pub fn adjust_effectiveness(&mut self, success: bool, min: f64, max: f64) {
        let delta = if success {
            EFFECTIVENESS_STEP
        } else {
            -EFFECTIVENESS_STEP
        };
        self.reasoning_effectiveness = (self.reasoning_effectiveness + delta).clamp(min, max);
    }

    pub fn clamp_effectiveness(&mut self, min: f64, max: f64) {
        self.reasoning_effectiveness = self.reasoning_effectiveness.clamp(min, max);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Partial updates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A partial update merged into a session under the cache lock.
///
/// `payload` is shallow-merged with incoming values winning. The objective
/// is write-once: an update never overwrites an objective already set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionUpdate {
    #[serde(default)]
    pub current_phase: Option<Phase>,
    #[serde(default)]
    pub initial_objective: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub reasoning_effectiveness: Option<f64>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl SessionUpdate {
    pub fn apply(&self, session: &mut Session) {
        if let Some(phase) = self.current_phase {
            session.current_phase = phase;
        }
        if session.initial_objective.is_none() {
            if let Some(ref objective) = self.initial_objective {
                session.initial_objective = Some(objective.clone());
            }
        }
        if let Some(role) = self.role {
            session.role = role;
        }
        if let Some(score) = self.reasoning_effectiveness {
            session.reasoning_effectiveness = score;
        }
        for (key, value) in &self.payload {
            session.payload.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn phase_wire_forms_roundtrip() {
        for phase in [
            Phase::Init,
            Phase::Query,
            Phase::Enhance,
            Phase::Knowledge,
            Phase::Plan,
            Phase::Execute,
            Phase::Verify,
            Phase::Done,
        ] {
            assert_eq!(Phase::parse(phase.as_str()), Some(phase));
            let encoded = serde_json::to_string(&phase).unwrap();
            assert_eq!(encoded, format!("\"{}\"", phase.as_str()));
        }
        assert_eq!(Phase::parse("init"), None);
    }

    #[test]
    fn only_done_is_terminal() {
        assert!(Phase::Done.is_terminal());
        assert!(!Phase::Verify.is_terminal());
    }

    #[test]
    fn default_role_is_researcher() {
        let session = Session::new("s1", 0.8);
        assert_eq!(session.role, Role::Researcher);
        assert_eq!(Role::parse("ui_architect"), Some(Role::UiArchitect));
    }

    #[test]
    fn effectiveness_clamps_at_bounds() {
        let mut session = Session::new("s1", 0.8);
        for _ in 0..10 {
            session.adjust_effectiveness(true, 0.3, 1.0);
        }
        assert!((session.reasoning_effectiveness - 1.0).abs() < f64::EPSILON);
        for _ in 0..20 {
            session.adjust_effectiveness(false, 0.3, 1.0);
        }
        assert!((session.reasoning_effectiveness - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_ledger_reads_empty() {
        let session = Session::new("s1", 0.8);
        assert!(session.todos().unwrap().is_empty());
        assert_eq!(session.task_index(), 0);
    }

    #[test]
    fn ledger_roundtrips_and_generates_missing_ids() {
        let mut session = Session::new("s1", 0.8);
        session.payload.insert(
            KEY_TODOS.into(),
            json!([
                { "id": "t1", "content": "first", "status": "completed", "priority": "high" },
                { "content": "second" }
            ]),
        );
        let todos = session.todos().unwrap();
        assert_eq!(todos.len(), 2);
        assert_eq!(todos[0].status, TaskStatus::Completed);
        assert_eq!(todos[1].status, TaskStatus::Pending);
        assert_eq!(todos[1].priority, TaskPriority::Medium);
        assert!(!todos[1].id.is_empty());

        session.set_todos(&todos).unwrap();
        assert_eq!(session.todos().unwrap().len(), 2);
    }

    #[test]
    fn malformed_ledger_is_invalid_payload() {
        let mut session = Session::new("s1", 0.8);
        session
            .payload
            .insert(KEY_TODOS.into(), json!("not a list"));
        assert!(matches!(
            session.todos(),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn objective_is_write_once() {
        let mut session = Session::new("s1", 0.8);
        let first = SessionUpdate {
            initial_objective: Some("build the thing".into()),
            ..Default::default()
        };
        first.apply(&mut session);
        let second = SessionUpdate {
            initial_objective: Some("do something else".into()),
            ..Default::default()
        };
        second.apply(&mut session);
        assert_eq!(session.initial_objective.as_deref(), Some("build the thing"));
    }

    #[test]
    fn payload_merge_is_shallow_and_incoming_wins() {
        let mut session = Session::new("s1", 0.8);
        session
            .payload
            .insert("interpreted_goal".into(), json!("old"));
        session.payload.insert("kept".into(), json!(1));

        let mut payload = Map::new();
        payload.insert("interpreted_goal".into(), json!("new"));
        payload.insert("enhanced_goal".into(), json!("refined"));
        let update = SessionUpdate {
            payload,
            ..Default::default()
        };
        update.apply(&mut session);

        assert_eq!(session.payload["interpreted_goal"], json!("new"));
        assert_eq!(session.payload["enhanced_goal"], json!("refined"));
        assert_eq!(session.payload["kept"], json!(1));
    }

    #[test]
    fn status_terminality() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
    }
}
