//! Synchronous session cache.
//!
//! Every read and write a caller sees goes through this map; the durable
//! store only ever feeds it from behind. Slots carry a revision counter so
//! a background hydration can tell whether the cached entry was touched by
//! an interactive write while the load was in flight. Cache wins ties.

use baton_domain::config::{CacheConfig, FsmConfig};
use baton_domain::error::Result;
use baton_domain::session::{Session, SessionUpdate};
use baton_domain::trace::TraceEvent;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

struct Slot {
    session: Session,
    /// Bumped on every interactive write, never on reads. Hydration applies
    /// only if the revision it captured at miss time is still current.
    revision: u64,
}

/// In-process store of live sessions.
///
/// Fast path is a read lock over the map plus a per-slot mutex, so two
/// sessions never contend with each other. Creation takes the map write
/// lock once.
pub struct SessionCache {
    slots: RwLock<HashMap<String, Arc<Mutex<Slot>>>>,
    initial_effectiveness: f64,
    min_effectiveness: f64,
    max_effectiveness: f64,
    retention: chrono::Duration,
}

impl SessionCache {
    pub fn new(fsm: &FsmConfig, cache: &CacheConfig) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            initial_effectiveness: fsm.initial_effectiveness,
            min_effectiveness: fsm.min_effectiveness,
            max_effectiveness: fsm.max_effectiveness,
            retention: chrono::Duration::hours(cache.retention_hours as i64),
        }
    }

    /// Fetch or create the slot for `session_id`. Returns whether this call
    /// created it.
    fn slot(&self, session_id: &str) -> (Arc<Mutex<Slot>>, bool) {
        if let Some(slot) = self.slots.read().get(session_id) {
            return (Arc::clone(slot), false);
        }
        let mut slots = self.slots.write();
        match slots.get(session_id) {
            // Lost the race to another creator.
            Some(slot) => (Arc::clone(slot), false),
            None => {
                let slot = Arc::new(Mutex::new(Slot {
                    session: Session::new(session_id, self.initial_effectiveness),
                    revision: 0,
                }));
                slots.insert(session_id.to_string(), Arc::clone(&slot));
                (slot, true)
            }
        }
    }

    /// Current state of the session, creating a fresh one at INIT on first
    /// sight. The second value is a hydration ticket: `Some(revision)` when
    /// this call created the slot and a durable load should be scheduled,
    /// `None` when the slot already existed.
    pub fn resolve(&self, session_id: &str) -> (Session, Option<u64>) {
        let (slot, created) = self.slot(session_id);
        let mut slot = slot.lock();
        if created {
            TraceEvent::SessionResolved {
                session_id: session_id.to_string(),
                phase: slot.session.current_phase.to_string(),
                is_new: true,
            }
            .emit();
            return (slot.session.clone(), Some(slot.revision));
        }
        // Reads keep the session warm for retention but are not writes:
        // the revision stays put so an in-flight hydration still applies.
        slot.session.touch();
        (slot.session.clone(), None)
    }

    /// Like `resolve` but without the hydration ticket.
    pub fn get(&self, session_id: &str) -> Session {
        self.resolve(session_id).0
    }

    /// Read without creating or touching. `None` if the session is not
    /// cached.
    pub fn peek(&self, session_id: &str) -> Option<Session> {
        let slot = {
            let slots = self.slots.read();
            slots.get(session_id).map(Arc::clone)
        }?;
        let slot = slot.lock();
        Some(slot.session.clone())
    }

    /// Apply a field-level update. Returns the state after the write.
    pub fn update(&self, session_id: &str, update: &SessionUpdate) -> Session {
        let (slot, _) = self.slot(session_id);
        let mut slot = slot.lock();
        update.apply(&mut slot.session);
        slot.session
            .clamp_effectiveness(self.min_effectiveness, self.max_effectiveness);
        slot.session.touch();
        slot.revision += 1;
        slot.session.clone()
    }

    /// Run a closure against a draft of the session and commit only on
    /// success. An `Err` from the closure leaves the cached state exactly
    /// as it was, revision included.
    pub fn update_with<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> Result<R>,
    ) -> Result<(Session, R)> {
        let (slot, _) = self.slot(session_id);
        let mut slot = slot.lock();
        let mut draft = slot.session.clone();
        let result = f(&mut draft)?;
        draft.touch();
        slot.session = draft;
        slot.revision += 1;
        Ok((slot.session.clone(), result))
    }

    /// Install a durably loaded session, unless an interactive write beat
    /// the load. `expected_revision` is the ticket handed out by `resolve`
    /// when the slot was created. Returns whether the load was applied.
    pub fn apply_hydration(
        &self,
        session_id: &str,
        expected_revision: u64,
        loaded: Session,
    ) -> bool {
        let slot = {
            let slots = self.slots.read();
            slots.get(session_id).map(Arc::clone)
        };
        let Some(slot) = slot else {
            TraceEvent::HydrationSkipped {
                session_id: session_id.to_string(),
                reason: "session evicted before load finished".to_string(),
            }
            .emit();
            return false;
        };
        let mut slot = slot.lock();
        if slot.revision != expected_revision {
            TraceEvent::HydrationSkipped {
                session_id: session_id.to_string(),
                reason: "superseded by interactive write".to_string(),
            }
            .emit();
            return false;
        }
        // Keep the warmer of the two timestamps: the cached one reflects
        // activity in this process, the loaded one activity before restart.
        let last_activity = slot.session.last_activity.max(loaded.last_activity);
        slot.session = loaded;
        slot.session.last_activity = last_activity;
        slot.revision += 1;
        TraceEvent::HydrationApplied {
            session_id: session_id.to_string(),
        }
        .emit();
        true
    }

    /// Drop sessions idle past the retention window. Returns the evicted
    /// ids so the caller can release per-session state held elsewhere.
    pub fn cleanup(&self) -> Vec<String> {
        let now = Utc::now();
        let mut evicted = Vec::new();
        let mut slots = self.slots.write();
        slots.retain(|session_id, slot| {
            let slot = slot.lock();
            let idle = now - slot.session.last_activity;
            if idle > self.retention {
                TraceEvent::SessionEvicted {
                    session_id: session_id.clone(),
                    idle_hours: idle.num_hours(),
                }
                .emit();
                evicted.push(session_id.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_domain::error::Error;
    use baton_domain::session::Phase;
    use serde_json::json;

    fn cache() -> SessionCache {
        SessionCache::new(&FsmConfig::default(), &CacheConfig::default())
    }

    fn backdate(cache: &SessionCache, session_id: &str, hours: i64) {
        let slots = cache.slots.read();
        let slot = slots.get(session_id).expect("slot exists");
        slot.lock().session.last_activity = Utc::now() - chrono::Duration::hours(hours);
    }

    #[test]
    fn resolve_creates_at_init_with_ticket() {
        let cache = cache();
        let (session, ticket) = cache.resolve("s1");
        assert_eq!(session.current_phase, Phase::Init);
        assert!((session.reasoning_effectiveness - 0.8).abs() < 1e-9);
        assert_eq!(ticket, Some(0));

        // Second resolve sees the same slot, no ticket.
        let (_, ticket) = cache.resolve("s1");
        assert_eq!(ticket, None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn update_bumps_revision_and_clamps() {
        let cache = cache();
        cache.resolve("s1");

        let update = SessionUpdate {
            reasoning_effectiveness: Some(7.5),
            ..Default::default()
        };
        let session = cache.update("s1", &update);
        assert!((session.reasoning_effectiveness - 1.0).abs() < 1e-9);

        // A creation ticket from before the write no longer applies.
        let applied = cache.apply_hydration("s1", 0, Session::new("s1", 0.8));
        assert!(!applied);
    }

    #[test]
    fn update_with_rolls_back_on_error() {
        let cache = cache();
        cache.resolve("s1");

        let err = cache
            .update_with("s1", |session| {
                session.payload.insert("half".into(), json!("written"));
                Err::<(), _>(Error::InvalidPayload("nope".into()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));

        let session = cache.get("s1");
        assert!(!session.payload.contains_key("half"));

        // The failed attempt did not consume the hydration ticket.
        let mut loaded = Session::new("s1", 0.8);
        loaded.current_phase = Phase::Plan;
        assert!(cache.apply_hydration("s1", 0, loaded));
        assert_eq!(cache.get("s1").current_phase, Phase::Plan);
    }

    #[test]
    fn reads_do_not_block_hydration() {
        let cache = cache();
        let (_, ticket) = cache.resolve("s1");
        let ticket = ticket.unwrap();

        // Plain reads in between must not count as writes.
        cache.get("s1");
        cache.peek("s1");

        let mut loaded = Session::new("s1", 0.8);
        loaded.current_phase = Phase::Execute;
        assert!(cache.apply_hydration("s1", ticket, loaded));
        assert_eq!(cache.get("s1").current_phase, Phase::Execute);
    }

    #[test]
    fn hydration_keeps_warmest_timestamp() {
        let cache = cache();
        let (cached, ticket) = cache.resolve("s1");

        let mut loaded = Session::new("s1", 0.8);
        loaded.current_phase = Phase::Verify;
        loaded.last_activity = Utc::now() - chrono::Duration::hours(5);
        cache.apply_hydration("s1", ticket.unwrap(), loaded);

        let session = cache.get("s1");
        assert_eq!(session.current_phase, Phase::Verify);
        assert!(session.last_activity >= cached.last_activity);
    }

    #[test]
    fn hydration_for_unknown_session_is_skipped() {
        let cache = cache();
        assert!(!cache.apply_hydration("ghost", 0, Session::new("ghost", 0.8)));
        assert!(cache.is_empty());
    }

    #[test]
    fn cleanup_evicts_only_idle_sessions() {
        let cache = cache();
        cache.resolve("old");
        cache.resolve("fresh");
        backdate(&cache, "old", 25);

        let evicted = cache.cleanup();
        assert_eq!(evicted, vec!["old".to_string()]);
        assert_eq!(cache.len(), 1);
        assert!(cache.peek("fresh").is_some());
        assert!(cache.peek("old").is_none());
    }
}
