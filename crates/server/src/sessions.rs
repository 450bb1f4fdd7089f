//! In-memory registry of upload sessions.
//!
//! A session is created by begin-upload, claimed by exactly one transfer,
//! and removed by whichever comes first: the idle-timeout watchdog (if
//! nobody claimed it within the grace period), the transfer on failure,
//! the progress poll that observes completion, or the retention timer.
//!
//! Locking: the map has one `RwLock` and every session its own. The
//! registry lock is always taken before a session lock, and no lock is
//! ever held across an `.await`.

use crate::metrics;
use depot_core::{Progress, SessionId};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;

/// Attempts at drawing an unused random id before giving up.
pub const MAX_ID_ATTEMPTS: usize = 16;

/// Session registry errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no such upload session: {0}")]
    NotFound(SessionId),

    #[error("upload session {0} already has a transfer in progress")]
    AlreadyStarted(SessionId),

    #[error("could not allocate an unused session id after {0} attempts")]
    IdSpaceExhausted(usize),
}

struct SessionState {
    progress: Progress,
    destroyed: bool,
}

/// A live upload session.
pub struct UploadSession {
    id: SessionId,
    created_at: Instant,
    state: RwLock<SessionState>,
    timer: Mutex<Option<AbortHandle>>,
}

impl UploadSession {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            state: RwLock::new(SessionState {
                progress: Progress::new(),
                destroyed: false,
            }),
            timer: Mutex::new(None),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Time since begin-upload.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Consistent copy of the progress record, or `None` once destroyed.
    pub fn snapshot(&self) -> Option<Progress> {
        let state = self.read_state();
        (!state.destroyed).then(|| state.progress.clone())
    }

    /// Whether the session has been removed from its registry.
    pub fn is_destroyed(&self) -> bool {
        self.read_state().destroyed
    }

    /// Account for bytes written by the claiming transfer.
    pub fn record_bytes(&self, bytes: u64) {
        self.write_state().progress.record(bytes);
    }

    /// Mark the transfer as having reached end of stream.
    pub fn mark_completed(&self) {
        self.write_state().progress.mark_completed();
    }

    /// Record the id assigned by a successful commit.
    pub fn set_file_id(&self, file_id: i64) {
        self.write_state().progress.file_id = Some(file_id);
    }

    fn read_state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(|poisoned| {
            tracing::warn!(upload_id = %self.id, "session state RwLock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(|poisoned| {
            tracing::warn!(upload_id = %self.id, "session state RwLock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn replace_timer(&self, handle: Option<AbortHandle>) -> Option<AbortHandle> {
        let mut timer = self.timer.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(upload_id = %self.id, "session timer Mutex was poisoned, recovering");
            poisoned.into_inner()
        });
        std::mem::replace(&mut *timer, handle)
    }

    fn cancel_timer(&self) {
        if let Some(handle) = self.replace_timer(None) {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSession")
            .field("id", &self.id)
            .field("age", &self.age())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug)]
enum TimerKind {
    /// Evict the session if no transfer has claimed it.
    Watchdog,
    /// Drop a finished session nobody polled.
    Retention,
}

type IdSource = Box<dyn Fn() -> u64 + Send + Sync>;

struct RegistryInner {
    sessions: RwLock<HashMap<SessionId, Arc<UploadSession>>>,
    grace: Duration,
    next_id: IdSource,
}

/// Registry of live upload sessions. Cheap to clone.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Create a registry whose unclaimed sessions expire after `grace`.
    pub fn new(grace: Duration) -> Self {
        Self::with_id_source(grace, Box::new(rand::random::<u64>))
    }

    /// Create a registry drawing ids from `next_id` instead of the RNG.
    pub fn with_id_source(grace: Duration, next_id: IdSource) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
                grace,
                next_id,
            }),
        }
    }

    /// Grace period for unclaimed sessions.
    pub fn grace(&self) -> Duration {
        self.inner.grace
    }

    /// Create a session and arm its idle-timeout watchdog.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create(&self) -> Result<SessionId, SessionError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let Some(id) = SessionId::new((self.inner.next_id)()) else {
                continue;
            };

            let session = {
                let mut sessions = self.write_sessions();
                match sessions.entry(id) {
                    Entry::Occupied(_) => continue,
                    Entry::Vacant(slot) => slot.insert(Arc::new(UploadSession::new(id))).clone(),
                }
            };

            self.arm_timer(&session, self.inner.grace, TimerKind::Watchdog);
            metrics::UPLOAD_SESSIONS_CREATED.inc();
            metrics::ACTIVE_UPLOAD_SESSIONS.inc();
            tracing::debug!(upload_id = %id, "Upload session created");
            return Ok(id);
        }

        Err(SessionError::IdSpaceExhausted(MAX_ID_ATTEMPTS))
    }

    /// Find a live session.
    pub fn lookup(&self, id: SessionId) -> Option<Arc<UploadSession>> {
        self.read_sessions().get(&id).cloned()
    }

    /// Remove a session. Returns whether it was present.
    pub fn delete(&self, id: SessionId) -> bool {
        match self.remove(id, None) {
            Some(session) => {
                session.cancel_timer();
                true
            }
            None => false,
        }
    }

    /// Claim a session for a transfer.
    ///
    /// Marks it started and records the declared length. Once claimed,
    /// the watchdog can no longer evict it.
    pub fn claim(
        &self,
        id: SessionId,
        declared_total: Option<u64>,
    ) -> Result<Arc<UploadSession>, SessionError> {
        let session = self.lookup(id).ok_or(SessionError::NotFound(id))?;
        {
            let mut state = session.write_state();
            if state.destroyed {
                return Err(SessionError::NotFound(id));
            }
            if state.progress.started {
                return Err(SessionError::AlreadyStarted(id));
            }
            state.progress.mark_started(declared_total);
        }
        session.cancel_timer();
        tracing::debug!(upload_id = %id, ?declared_total, "Upload session claimed");
        Ok(session)
    }

    /// Progress of a live session, without side effects.
    pub fn snapshot(&self, id: SessionId) -> Option<Progress> {
        self.lookup(id)?.snapshot()
    }

    /// Progress snapshot for a poll.
    ///
    /// A snapshot showing completion is the last one: the session is
    /// deleted after it is taken.
    pub fn poll(&self, id: SessionId) -> Option<Progress> {
        let session = self.lookup(id)?;
        let snapshot = session.snapshot()?;
        if snapshot.completed && self.remove(id, Some(&session)).is_some() {
            session.cancel_timer();
        }
        Some(snapshot)
    }

    /// Replace the session's timer with one that retires it after `delay`.
    pub fn retire_after(&self, id: SessionId, delay: Duration) {
        if let Some(session) = self.lookup(id) {
            self.arm_timer(&session, delay, TimerKind::Retention);
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.read_sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove `id`, optionally only if it still maps to `expected`.
    ///
    /// The session is marked destroyed before it leaves the map.
    fn remove(
        &self,
        id: SessionId,
        expected: Option<&Arc<UploadSession>>,
    ) -> Option<Arc<UploadSession>> {
        let mut sessions = self.write_sessions();
        let current = sessions.get(&id)?;
        if let Some(expected) = expected
            && !Arc::ptr_eq(current, expected)
        {
            return None;
        }
        current.write_state().destroyed = true;
        let session = sessions.remove(&id);
        metrics::ACTIVE_UPLOAD_SESSIONS.dec();
        session
    }

    /// Evict `session` if it is still registered and unclaimed.
    ///
    /// Check and removal happen under both locks, so this cannot race
    /// with [`claim`](Self::claim).
    fn expire_if_unclaimed(&self, session: &Arc<UploadSession>) -> bool {
        let mut sessions = self.write_sessions();
        match sessions.get(&session.id) {
            Some(current) if Arc::ptr_eq(current, session) => {}
            _ => return false,
        }

        {
            let mut state = session.write_state();
            if state.progress.started || state.destroyed {
                return false;
            }
            state.destroyed = true;
        }
        sessions.remove(&session.id);
        metrics::ACTIVE_UPLOAD_SESSIONS.dec();
        true
    }

    fn arm_timer(&self, session: &Arc<UploadSession>, delay: Duration, kind: TimerKind) {
        let registry = Arc::downgrade(&self.inner);
        let target = Arc::downgrade(session);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire_timer(registry, target, kind);
        });

        if let Some(previous) = session.replace_timer(Some(handle.abort_handle())) {
            previous.abort();
        }
    }

    fn read_sessions(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Arc<UploadSession>>> {
        self.inner.sessions.read().unwrap_or_else(|poisoned| {
            tracing::warn!("session registry RwLock was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        })
    }

    fn write_sessions(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Arc<UploadSession>>> {
        self.inner.sessions.write().unwrap_or_else(|poisoned| {
            tracing::warn!("session registry RwLock was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        })
    }
}

fn fire_timer(registry: Weak<RegistryInner>, target: Weak<UploadSession>, kind: TimerKind) {
    let (Some(inner), Some(session)) = (registry.upgrade(), target.upgrade()) else {
        return;
    };
    let registry = SessionRegistry { inner };

    match kind {
        TimerKind::Watchdog => {
            if registry.expire_if_unclaimed(&session) {
                metrics::UPLOAD_SESSIONS_EXPIRED.inc();
                tracing::info!(
                    upload_id = %session.id,
                    grace_secs = registry.grace().as_secs(),
                    "Upload session expired before a transfer claimed it"
                );
            }
        }
        TimerKind::Retention => {
            if registry.remove(session.id, Some(&session)).is_some() {
                tracing::debug!(upload_id = %session.id, "Retired completed upload session");
            }
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("live", &self.len())
            .field("grace", &self.inner.grace)
            .finish()
    }
}
