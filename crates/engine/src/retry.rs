//! Retry queue for failed durable syncs.
//!
//! Failed saves and loads are keyed by `(session, operation)` so repeated
//! failures collapse into one entry holding the newest snapshot. A
//! background drain picks up due entries, replays them, and either removes
//! them or reschedules with exponential backoff. Once the attempt counter
//! reaches the cap the entry moves to an exhausted state and keeps retrying
//! at the fixed capped interval; nothing is ever silently dropped.

use std::collections::HashMap;
use std::fmt;

use baton_domain::config::RetryConfig;
use baton_domain::error::Error;
use baton_domain::session::Session;
use baton_domain::trace::TraceEvent;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry vocabulary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryOperation {
    Load,
    Save,
}

impl RetryOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryOperation::Load => "load",
            RetryOperation::Save => "save",
        }
    }
}

impl fmt::Display for RetryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a sync error is expected to clear on its own.
///
/// Unknown errors count as retriable: wrongly retrying a hopeless save is
/// cheap, wrongly dropping a recoverable one loses data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retriable,
    Permanent,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Retriable => "retriable",
            ErrorClass::Permanent => "permanent",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Waiting for its `next_retry_at`.
    Scheduled,
    /// Handed to a drain pass; a new failure for the key re-schedules it.
    Draining,
    /// At the attempt cap. Still drained, at the fixed capped interval.
    Exhausted,
}

/// What to replay. Saves carry the snapshot that failed to persist; loads
/// carry the cache revision the hydration must still match.
#[derive(Debug, Clone)]
pub enum RetryData {
    Load { expected_revision: u64 },
    Save { snapshot: Session },
}

impl RetryData {
    pub fn operation(&self) -> RetryOperation {
        match self {
            RetryData::Load { .. } => RetryOperation::Load,
            RetryData::Save { .. } => RetryOperation::Save,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub session_id: String,
    pub data: RetryData,
    pub attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    pub classification: ErrorClass,
    pub state: RetryState,
    pub last_error: String,
}

impl RetryEntry {
    pub fn operation(&self) -> RetryOperation {
        self.data.operation()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const PERMANENT_MARKERS: &[&str] = &[
    "unauthorized",
    "forbidden",
    "permission denied",
    "invalid api key",
    "401",
    "403",
    "eacces",
    "eperm",
];

/// Sort a sync error into retriable or permanent, failing open to
/// retriable when the error gives nothing to go on.
pub fn classify(error: &Error) -> ErrorClass {
    match error {
        Error::Auth(_) => ErrorClass::Permanent,
        Error::Timeout(_) | Error::Io(_) => ErrorClass::Retriable,
        other => {
            let message = other.to_string().to_lowercase();
            if PERMANENT_MARKERS.iter().any(|m| message.contains(m)) {
                ErrorClass::Permanent
            } else {
                ErrorClass::Retriable
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deduplicating retry queue shared between the engine's failure paths
/// and the background drain.
pub struct RetryQueue {
    entries: Mutex<HashMap<(String, RetryOperation), RetryEntry>>,
    config: RetryConfig,
}

impl RetryQueue {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.min(20);
        let ms = self.config.backoff_base_ms.saturating_mul(1u64 << exp);
        Duration::milliseconds(ms.min(i64::MAX as u64) as i64)
    }

    fn state_for(&self, attempts: u32) -> RetryState {
        if attempts >= self.config.max_attempts {
            RetryState::Exhausted
        } else {
            RetryState::Scheduled
        }
    }

    /// Record a failed sync. An existing entry for the same session and
    /// operation absorbs the failure: attempts bump (capped), a newer save
    /// snapshot replaces the queued one, and the entry is rescheduled.
    pub fn mark_for_retry(&self, session_id: &str, data: RetryData, error: &Error) -> RetryEntry {
        let operation = data.operation();
        let classification = classify(error);
        let now = Utc::now();

        let mut entries = self.entries.lock();
        let key = (session_id.to_string(), operation);
        let previous_attempts = entries.get(&key).map(|e| e.attempts).unwrap_or(0);

        let entry = match entries.remove(&key) {
            Some(mut existing) => {
                existing.attempts = existing
                    .attempts
                    .saturating_add(1)
                    .min(self.config.max_attempts);
                if let (RetryData::Save { snapshot: queued }, RetryData::Save { snapshot: fresh }) =
                    (&mut existing.data, &data)
                {
                    if fresh.last_activity >= queued.last_activity {
                        *queued = fresh.clone();
                    }
                }
                existing.classification = classification;
                existing.last_error = error.to_string();
                existing.state = self.state_for(existing.attempts);
                existing.next_retry_at = now + self.backoff(existing.attempts);
                existing
            }
            None => RetryEntry {
                session_id: session_id.to_string(),
                data,
                attempts: 1,
                next_retry_at: now + self.backoff(1),
                classification,
                state: self.state_for(1),
                last_error: error.to_string(),
            },
        };

        self.note_escalations(&entry, previous_attempts);
        TraceEvent::RetryMarked {
            session_id: session_id.to_string(),
            operation: operation.to_string(),
            attempts: entry.attempts,
            next_retry_in_ms: (entry.next_retry_at - now).num_milliseconds(),
        }
        .emit();

        entries.insert(key, entry.clone());
        entry
    }

    /// Entries whose retry time has arrived. Marks them draining so a slow
    /// replay is not handed out twice.
    pub fn due(&self) -> Vec<RetryEntry> {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let mut due = Vec::new();
        for entry in entries.values_mut() {
            if entry.state != RetryState::Draining && entry.next_retry_at <= now {
                entry.state = RetryState::Draining;
                due.push(entry.clone());
            }
        }
        due
    }

    /// A drained replay succeeded. The entry is removed unless a newer
    /// failure re-scheduled it while the replay was in flight.
    pub fn resolve_success(&self, session_id: &str, operation: RetryOperation) {
        let mut entries = self.entries.lock();
        let key = (session_id.to_string(), operation);
        match entries.get(&key) {
            Some(entry) if entry.state == RetryState::Draining => {
                let attempts = entry.attempts;
                entries.remove(&key);
                TraceEvent::RetryDrained {
                    session_id: session_id.to_string(),
                    operation: operation.to_string(),
                    attempts,
                }
                .emit();
            }
            _ => {}
        }
    }

    /// A drained replay failed again. Reschedules with bumped backoff,
    /// unless a newer failure already did.
    pub fn resolve_failure(&self, session_id: &str, operation: RetryOperation, error: &Error) {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let key = (session_id.to_string(), operation);
        let Some(entry) = entries.get_mut(&key) else {
            return;
        };
        if entry.state != RetryState::Draining {
            return;
        }
        let previous_attempts = entry.attempts;
        entry.attempts = entry
            .attempts
            .saturating_add(1)
            .min(self.config.max_attempts);
        entry.classification = classify(error);
        entry.last_error = error.to_string();
        entry.state = self.state_for(entry.attempts);
        entry.next_retry_at = now + self.backoff(entry.attempts);

        let entry = entry.clone();
        drop(entries);
        self.note_escalations(&entry, previous_attempts);
        TraceEvent::RetryMarked {
            session_id: session_id.to_string(),
            operation: operation.to_string(),
            attempts: entry.attempts,
            next_retry_in_ms: (entry.next_retry_at - now).num_milliseconds(),
        }
        .emit();
    }

    /// Operator-facing noise for entries that just hit the attempt cap or
    /// carry a permanent error. Both keep retrying regardless.
    fn note_escalations(&self, entry: &RetryEntry, previous_attempts: u32) {
        if previous_attempts < self.config.max_attempts && entry.attempts >= self.config.max_attempts
        {
            TraceEvent::RetryExhausted {
                session_id: entry.session_id.clone(),
                operation: entry.operation().to_string(),
                attempts: entry.attempts,
            }
            .emit();
            tracing::error!(
                session_id = %entry.session_id,
                operation = %entry.operation(),
                attempts = entry.attempts,
                "retry attempts exhausted, continuing at capped interval"
            );
        }
        if entry.classification == ErrorClass::Permanent {
            tracing::error!(
                session_id = %entry.session_id,
                operation = %entry.operation(),
                error = %entry.last_error,
                "permanent sync failure queued, needs operator attention"
            );
        }
    }

    pub fn entry(&self, session_id: &str, operation: RetryOperation) -> Option<RetryEntry> {
        self.entries
            .lock()
            .get(&(session_id.to_string(), operation))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_domain::session::Session;

    fn queue(backoff_base_ms: u64) -> RetryQueue {
        RetryQueue::new(RetryConfig {
            max_attempts: 3,
            backoff_base_ms,
            drain_interval_secs: 5,
        })
    }

    fn save_data(last_activity_offset_secs: i64) -> RetryData {
        let mut snapshot = Session::new("s1", 0.8);
        snapshot.last_activity = Utc::now() + Duration::seconds(last_activity_offset_secs);
        RetryData::Save { snapshot }
    }

    fn http_error() -> Error {
        Error::Http("connection reset by peer".into())
    }

    #[test]
    fn repeated_failures_collapse_into_one_entry() {
        let queue = queue(1000);

        for _ in 0..5 {
            queue.mark_for_retry("s1", save_data(0), &http_error());
        }

        assert_eq!(queue.len(), 1);
        let entry = queue.entry("s1", RetryOperation::Save).unwrap();
        // Attempts saturate at the cap and the entry flips to exhausted.
        assert_eq!(entry.attempts, 3);
        assert_eq!(entry.state, RetryState::Exhausted);
    }

    #[test]
    fn newer_snapshot_replaces_queued_one() {
        let queue = queue(1000);

        queue.mark_for_retry("s1", save_data(0), &http_error());
        queue.mark_for_retry("s1", save_data(10), &http_error());

        let entry = queue.entry("s1", RetryOperation::Save).unwrap();
        let RetryData::Save { snapshot } = entry.data else {
            panic!("expected save data");
        };
        assert!(snapshot.last_activity > Utc::now() + Duration::seconds(5));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let queue = queue(1000);

        assert_eq!(queue.backoff(1), Duration::milliseconds(2000));
        assert_eq!(queue.backoff(2), Duration::milliseconds(4000));
        assert_eq!(queue.backoff(3), Duration::milliseconds(8000));
        // Attempts never exceed the cap, so in practice the interval stops
        // at base * 2^cap. Deep shifts stay finite regardless.
        assert!(queue.backoff(40) > Duration::zero());
    }

    #[test]
    fn classification_buckets() {
        assert_eq!(classify(&Error::Auth("bad key".into())), ErrorClass::Permanent);
        assert_eq!(
            classify(&Error::Timeout("deadline elapsed".into())),
            ErrorClass::Retriable
        );
        assert_eq!(
            classify(&Error::Graph("HTTP 403: forbidden".into())),
            ErrorClass::Permanent
        );
        assert_eq!(
            classify(&Error::Graph("connection refused".into())),
            ErrorClass::Retriable
        );
        // Nothing to go on: fail open to retriable.
        assert_eq!(classify(&Error::Other("???".into())), ErrorClass::Retriable);
    }

    #[test]
    fn permanent_failures_stay_queued() {
        let queue = queue(0);
        queue.mark_for_retry("s1", save_data(0), &Error::Auth("invalid api key".into()));

        let entry = queue.entry("s1", RetryOperation::Save).unwrap();
        assert_eq!(entry.classification, ErrorClass::Permanent);
        assert_eq!(queue.due().len(), 1);
    }

    #[test]
    fn due_hands_out_each_entry_once() {
        let queue = queue(0);
        queue.mark_for_retry("s1", save_data(0), &http_error());
        queue.mark_for_retry("s2", RetryData::Load { expected_revision: 0 }, &http_error());

        let due = queue.due();
        assert_eq!(due.len(), 2);
        // Draining entries are not handed out again.
        assert!(queue.due().is_empty());
    }

    #[test]
    fn resolve_success_removes_draining_entry() {
        let queue = queue(0);
        queue.mark_for_retry("s1", save_data(0), &http_error());

        let due = queue.due();
        assert_eq!(due.len(), 1);
        queue.resolve_success("s1", RetryOperation::Save);
        assert!(queue.is_empty());
    }

    #[test]
    fn exhausted_entries_keep_draining_at_the_capped_interval() {
        let queue = queue(0);
        for _ in 0..3 {
            queue.mark_for_retry("s1", save_data(0), &http_error());
        }
        assert_eq!(
            queue.entry("s1", RetryOperation::Save).unwrap().state,
            RetryState::Exhausted
        );

        // Still handed out, and a further failure keeps it exhausted
        // rather than dropping it.
        assert_eq!(queue.due().len(), 1);
        queue.resolve_failure("s1", RetryOperation::Save, &http_error());
        let entry = queue.entry("s1", RetryOperation::Save).unwrap();
        assert_eq!(entry.attempts, 3);
        assert_eq!(entry.state, RetryState::Exhausted);
        assert_eq!(queue.due().len(), 1);
    }

    #[test]
    fn resolve_failure_reschedules() {
        let queue = queue(0);
        queue.mark_for_retry("s1", save_data(0), &http_error());

        queue.due();
        queue.resolve_failure("s1", RetryOperation::Save, &http_error());

        let entry = queue.entry("s1", RetryOperation::Save).unwrap();
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.state, RetryState::Scheduled);
        assert_eq!(queue.due().len(), 1);
    }

    #[test]
    fn remark_during_drain_survives_drain_success() {
        let queue = queue(0);
        queue.mark_for_retry("s1", save_data(0), &http_error());
        queue.due();

        // A fresh failure lands while the drain replay is in flight.
        queue.mark_for_retry("s1", save_data(10), &http_error());
        queue.resolve_success("s1", RetryOperation::Save);

        // The newer failure is still queued.
        let entry = queue.entry("s1", RetryOperation::Save).unwrap();
        assert_eq!(entry.state, RetryState::Scheduled);
    }
}
