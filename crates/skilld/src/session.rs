//! Session state: disclosure progress, delegation history, event record.
//!
//! A session accumulates disclosed skill bodies monotonically; nothing is
//! ever evicted within a session's lifetime. Each session is owned by one
//! control flow at a time, so the state itself needs no internal locking.
//! [`SessionStore`] hands out per-session handles and reaps expired
//! sessions wholesale.

use crate::loader::SkillBody;
use chrono::{DateTime, Duration, Utc};
use skilld_core::a2a::DelegationMessage;
use skilld_core::events::EventPayload;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// A recorded event with its emit time.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub at: DateTime<Utc>,
    pub payload: EventPayload,
}

/// Per-session conversational state.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    /// Skill names in first-disclosure order.
    disclosed: Vec<String>,
    /// Cached bodies keyed by skill name.
    bodies: HashMap<String, Arc<SkillBody>>,
    /// Cumulative characters charged against the context budget.
    disclosed_chars: usize,
    /// Delegations issued by this session, keyed by task id.
    delegations: HashMap<Uuid, DelegationMessage>,
    delegation_order: Vec<Uuid>,
    events: Vec<SessionEvent>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            created_at: now,
            updated_at: now,
            expires_at: None,
            disclosed: Vec::new(),
            bodies: HashMap::new(),
            disclosed_chars: 0,
            delegations: HashMap::new(),
            delegation_order: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Arm a time-to-live; the store reaps the session after it passes.
    pub fn set_ttl(&mut self, ttl: Duration) {
        self.expires_at = Some(Utc::now() + ttl);
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_disclosed(&self, name: &str) -> bool {
        self.bodies.contains_key(name)
    }

    /// Cached body for an already-disclosed skill.
    pub fn body(&self, name: &str) -> Option<Arc<SkillBody>> {
        self.bodies.get(name).map(Arc::clone)
    }

    /// Characters charged so far against the context budget.
    pub fn disclosed_chars(&self) -> usize {
        self.disclosed_chars
    }

    /// Skill names in first-disclosure order.
    pub fn disclosed_names(&self) -> &[String] {
        &self.disclosed
    }

    /// Disclosed bodies in first-disclosure order.
    pub fn disclosed_bodies(&self) -> Vec<Arc<SkillBody>> {
        self.disclosed
            .iter()
            .filter_map(|name| self.bodies.get(name).map(Arc::clone))
            .collect()
    }

    /// Record a newly disclosed body and charge its characters.
    ///
    /// Callers must have verified the budget first; this only mutates
    /// state for a skill not yet disclosed.
    pub fn record_disclosure(&mut self, body: Arc<SkillBody>) {
        if self.bodies.contains_key(&body.name) {
            return;
        }
        self.disclosed_chars += body.chars;
        self.disclosed.push(body.name.clone());
        self.bodies.insert(body.name.clone(), body);
        self.touch();
    }

    /// Track an outbound delegation. Later transitions mutate in place
    /// via [`Session::delegation_mut`].
    pub fn record_delegation(&mut self, message: DelegationMessage) {
        if !self.delegations.contains_key(&message.task_id) {
            self.delegation_order.push(message.task_id);
        }
        self.delegations.insert(message.task_id, message);
        self.touch();
    }

    pub fn delegation(&self, task_id: Uuid) -> Option<&DelegationMessage> {
        self.delegations.get(&task_id)
    }

    pub fn delegation_mut(&mut self, task_id: Uuid) -> Option<&mut DelegationMessage> {
        self.delegations.get_mut(&task_id)
    }

    /// Delegations in issue order.
    pub fn delegation_history(&self) -> Vec<&DelegationMessage> {
        self.delegation_order
            .iter()
            .filter_map(|id| self.delegations.get(id))
            .collect()
    }

    pub fn record_event(&mut self, payload: EventPayload) {
        self.events.push(SessionEvent {
            at: Utc::now(),
            payload,
        });
    }

    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to one session. The tokio mutex is held for the whole
/// turn, which serializes turns within a session while leaving other
/// sessions untouched.
pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

/// In-memory session store.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: Mutex<HashMap<Uuid, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch an existing session or create one under the given id.
    pub fn get_or_create(&self, id: Uuid) -> SessionHandle {
        let mut map = lock_unpoisoned(&self.inner);
        if let Some(handle) = map.get(&id) {
            return Arc::clone(handle);
        }
        let mut session = Session::new();
        session.id = id;
        let handle = Arc::new(tokio::sync::Mutex::new(session));
        map.insert(id, Arc::clone(&handle));
        handle
    }

    /// Create a session with a fresh id.
    pub fn create(&self) -> SessionHandle {
        let session = Session::new();
        let id = session.id;
        let handle = Arc::new(tokio::sync::Mutex::new(session));
        lock_unpoisoned(&self.inner).insert(id, Arc::clone(&handle));
        handle
    }

    pub fn get(&self, id: Uuid) -> Option<SessionHandle> {
        lock_unpoisoned(&self.inner).get(&id).map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired session; disclosure caches go with them.
    pub fn reap_expired(&self) -> usize {
        let mut map = lock_unpoisoned(&self.inner);
        let before = map.len();
        map.retain(|_, handle| match handle.try_lock() {
            Ok(session) => !session.is_expired(),
            // A session mid-turn is live by definition.
            Err(_) => true,
        });
        let reaped = before - map.len();
        if reaped > 0 {
            debug!(reaped, "reaped expired sessions");
        }
        reaped
    }
}

fn lock_unpoisoned<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
