use serde::Serialize;

/// Structured trace events emitted across all Baton crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionResolved {
        session_id: String,
        phase: String,
        is_new: bool,
    },
    PhaseAdvanced {
        session_id: String,
        from: String,
        to: String,
        effectiveness: f64,
    },
    PhaseMismatch {
        session_id: String,
        current: String,
        reported: String,
    },
    TaskMarked {
        session_id: String,
        task_id: String,
        status: String,
        cursor: u64,
    },
    GraphCall {
        tool: String,
        duration_ms: u64,
        ok: bool,
    },
    SyncFailed {
        session_id: String,
        operation: String,
        classification: String,
        error: String,
    },
    RetryMarked {
        session_id: String,
        operation: String,
        attempts: u32,
        next_retry_in_ms: i64,
    },
    RetryDrained {
        session_id: String,
        operation: String,
        attempts: u32,
    },
    RetryExhausted {
        session_id: String,
        operation: String,
        attempts: u32,
    },
    HydrationApplied {
        session_id: String,
    },
    HydrationSkipped {
        session_id: String,
        reason: String,
    },
    SessionEvicted {
        session_id: String,
        idle_hours: i64,
    },
    CleanupCompleted {
        evicted: usize,
        archived: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "baton_event");
    }
}
