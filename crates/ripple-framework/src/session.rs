//! Session correlation.
//!
//! A handler configured with a [`SessionRule`] groups the events it receives
//! into [`Session`]s. Each handler owns one [`SessionRegistry`]; an incoming
//! event is compared against the latest event of every live session, and at most
//! one invocation of the handler may hold a given session at a time.
//!
//! # State machine
//!
//! ```text
//!               acquire                release (hold, no waiters)
//!   (created) ──────────▶ HELD ───────────────────────────────▶ FREE
//!                         │ ▲                                    │
//!                         │ └──────────── acquire ◀──────────────┘
//!                         │
//!                         ├── release, waiter queued ──▶ HELD (handed to oldest waiter)
//!                         └── release, !hold / expired ──▶ destroyed
//! ```
//!
//! Lookups and the held/free transition happen under the registry lock, so two
//! concurrently admitted events can never both observe a session as free.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use ripple_core::Event;

// ============================================================================
// Rules
// ============================================================================

/// Decides whether two events belong to the same session.
pub trait SessionRule: Send + Sync {
    /// Compares the session's latest event with an incoming one.
    fn compare(&self, stored: &Event, incoming: &Event) -> bool;
}

/// A rule backed by a closure.
pub struct FnRule<F>(pub F);

impl<F> SessionRule for FnRule<F>
where
    F: Fn(&Event, &Event) -> bool + Send + Sync,
{
    fn compare(&self, stored: &Event, incoming: &Event) -> bool {
        (self.0)(stored, incoming)
    }
}

/// Same session when the raw payloads agree on every key.
///
/// Keys are dotted paths into the payload (`"sender.user_id"`). A key absent
/// from both payloads agrees (the `group_id` of two private messages), one
/// absent from a single payload does not, and at least one key must be present.
#[derive(Debug, Clone)]
pub struct KeyRule {
    pointers: Vec<String>,
}

impl KeyRule {
    /// Creates a rule over the given keys.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pointers = keys
            .into_iter()
            .map(|k| format!("/{}", k.as_ref().replace('.', "/")))
            .collect();
        Self { pointers }
    }

    /// Same sender.
    pub fn sender() -> Self {
        Self::new(["user_id"])
    }

    /// Same sender in the same group (or the same private chat).
    pub fn sender_in_scene() -> Self {
        Self::new(["user_id", "message_type", "group_id"])
    }
}

impl SessionRule for KeyRule {
    fn compare(&self, stored: &Event, incoming: &Event) -> bool {
        let mut present = false;
        for ptr in &self.pointers {
            match (stored.raw().pointer(ptr), incoming.raw().pointer(ptr)) {
                (Some(a), Some(b)) if a == b => present = true,
                (None, None) => {}
                _ => return false,
            }
        }
        present
    }
}

// ============================================================================
// Session
// ============================================================================

/// What a queued waiter is told when the session is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handoff {
    /// The waiter now holds the session.
    Granted,
    /// The session went away; look it up again.
    Retry,
    /// The owner crashed.
    Aborted,
}

struct SessionState {
    held: bool,
    expired: bool,
    closed: bool,
    history: Vec<Arc<Event>>,
    waiters: VecDeque<oneshot::Sender<Handoff>>,
    suspended: Option<oneshot::Sender<Arc<Event>>>,
    store: HashMap<String, Value>,
}

/// One logical multi-event exchange.
pub struct Session {
    id: u64,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(id: u64, event: Arc<Event>) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState {
                held: true,
                expired: false,
                closed: false,
                history: vec![event],
                waiters: VecDeque::new(),
                suspended: None,
                store: HashMap::new(),
            }),
        }
    }

    /// Registry-unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The latest event of the session, used for correlation.
    pub fn event(&self) -> Option<Arc<Event>> {
        self.state.lock().history.last().cloned()
    }

    /// Every event admitted into the session, oldest first.
    pub fn history(&self) -> Vec<Arc<Event>> {
        self.state.lock().history.clone()
    }

    /// Whether an invocation currently holds the session.
    pub fn is_held(&self) -> bool {
        self.state.lock().held
    }

    /// Whether the session was expired.
    pub fn is_expired(&self) -> bool {
        self.state.lock().expired
    }

    /// Ends the session: it is destroyed on release whatever the hold setting,
    /// and later correlated events start a fresh one.
    pub fn expire(&self) {
        self.state.lock().expired = true;
    }

    /// Reads a stored value.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let state = self.state.lock();
        let value = state.store.get(key)?;
        T::deserialize(value).ok()
    }

    /// Stores a value, returning the serialization error if there is one.
    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: T) -> serde_json::Result<()> {
        let value = serde_json::to_value(value)?;
        self.state.lock().store.insert(key.into(), value);
        Ok(())
    }

    /// Removes a stored value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.state.lock().store.remove(key)
    }

    /// Clears the store.
    pub fn clear(&self) {
        self.state.lock().store.clear();
    }

    /// Parks the running invocation until the next correlated event arrives.
    ///
    /// Returns `None` on timeout, or if the session is expired.
    pub async fn suspend(&self, timeout: Option<Duration>) -> Option<Arc<Event>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if state.expired || state.closed {
                return None;
            }
            state.suspended = Some(tx);
        }
        trace!(session = self.id, "Session suspended");

        let woken = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx).await.ok().and_then(Result::ok),
            None => rx.await.ok(),
        };
        if woken.is_none() {
            self.state.lock().suspended = None;
            debug!(session = self.id, "Session suspension timed out");
        }
        woken
    }

    /// Hands an event to a suspended owner. Returns `false` if nobody was
    /// waiting anymore.
    pub(crate) fn wake(&self, event: Arc<Event>) -> bool {
        let mut state = self.state.lock();
        let Some(tx) = state.suspended.take() else {
            return false;
        };
        if tx.send(Arc::clone(&event)).is_err() {
            return false;
        }
        state.history.push(event);
        true
    }

    pub(crate) fn push(&self, event: Arc<Event>) {
        self.state.lock().history.push(event);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("held", &state.held)
            .field("expired", &state.expired)
            .field("events", &state.history.len())
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Result of looking an event up in a registry.
pub(crate) enum Acquire {
    /// No live session correlates.
    Vacant,
    /// A new session was created and is held by the caller.
    Created(SessionGuard),
    /// A free session correlates and is now held by the caller.
    Free(SessionGuard),
    /// A correlating session's owner is suspended waiting for an event.
    Suspended(Arc<Session>),
    /// A correlating session is held by another invocation.
    Busy(Arc<Session>),
}

struct RegistryInner {
    rule: Arc<dyn SessionRule>,
    hold: bool,
    sessions: Mutex<Vec<Arc<Session>>>,
    next_id: AtomicU64,
}

/// The sessions of one handler.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Creates an empty registry. With `hold`, sessions outlive the invocation
    /// that created them.
    pub fn new(rule: Arc<dyn SessionRule>, hold: bool) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                rule,
                hold,
                sessions: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Whether there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finds the session `event` belongs to and tries to take it.
    ///
    /// With `create`, a vacant lookup creates a held session seeded with the
    /// event instead of returning [`Acquire::Vacant`].
    pub(crate) fn acquire(&self, event: &Arc<Event>, create: bool) -> Acquire {
        let mut sessions = self.inner.sessions.lock();

        for session in sessions.iter() {
            let mut state = session.state.lock();
            if state.expired || state.closed {
                continue;
            }
            let Some(stored) = state.history.last() else {
                continue;
            };
            if !self.inner.rule.compare(stored, event) {
                continue;
            }

            if !state.held {
                state.held = true;
                return Acquire::Free(SessionGuard::new(self.clone(), Arc::clone(session)));
            }
            if state.suspended.is_some() {
                return Acquire::Suspended(Arc::clone(session));
            }
            return Acquire::Busy(Arc::clone(session));
        }

        if !create {
            return Acquire::Vacant;
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(id, Arc::clone(event)));
        sessions.push(Arc::clone(&session));
        debug!(session = id, "Session created");
        Acquire::Created(SessionGuard::new(self.clone(), session))
    }

    /// Queues for ownership of a held session. `None` if the session is no
    /// longer held.
    pub(crate) fn enqueue(&self, session: &Arc<Session>) -> Option<Waiter> {
        let mut state = session.state.lock();
        if !state.held || state.closed {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        Some(Waiter {
            rx,
            registry: self.clone(),
            session: Some(Arc::clone(session)),
        })
    }

    fn release(&self, session: &Arc<Session>, crashed: bool) {
        let mut sessions = self.inner.sessions.lock();
        let mut state = session.state.lock();
        state.suspended = None;

        if crashed {
            for waiter in state.waiters.drain(..) {
                let _ = waiter.send(Handoff::Aborted);
            }
        } else if state.expired {
            for waiter in state.waiters.drain(..) {
                let _ = waiter.send(Handoff::Retry);
            }
        } else {
            while let Some(waiter) = state.waiters.pop_front() {
                if waiter.send(Handoff::Granted).is_ok() {
                    trace!(session = session.id, "Session handed to next waiter");
                    return;
                }
            }
        }

        state.held = false;
        if state.expired || !self.inner.hold {
            state.closed = true;
            sessions.retain(|s| !Arc::ptr_eq(s, session));
            debug!(session = session.id, crashed, "Session destroyed");
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("hold", &self.inner.hold)
            .field("sessions", &self.len())
            .finish()
    }
}

/// Ownership of a held session.
///
/// Dropping the guard without [`release`](Self::release) counts as a crash:
/// the session is freed and every queued waiter is aborted.
#[derive(Debug)]
pub(crate) struct SessionGuard {
    registry: SessionRegistry,
    session: Option<Arc<Session>>,
}

impl SessionGuard {
    pub(crate) fn new(registry: SessionRegistry, session: Arc<Session>) -> Self {
        Self {
            registry,
            session: Some(session),
        }
    }

    pub(crate) fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// Releases normally.
    pub(crate) fn release(mut self) {
        if let Some(session) = self.session.take() {
            self.registry.release(&session, false);
        }
    }

    /// Releases after a failure of the owner.
    pub(crate) fn abort(mut self) {
        if let Some(session) = self.session.take() {
            self.registry.release(&session, true);
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.registry.release(&session, true);
        }
    }
}

/// A place in a session's waiter queue.
///
/// A handoff that lands after the waiter is dropped is released as a crash,
/// so a cancelled waiter never keeps the session held.
pub(crate) struct Waiter {
    rx: oneshot::Receiver<Handoff>,
    registry: SessionRegistry,
    session: Option<Arc<Session>>,
}

impl Waiter {
    /// Waits for the current owner to let go. `Ok` carries ownership; a
    /// vanished sender reads as [`Handoff::Retry`].
    pub(crate) async fn wait(mut self) -> Result<SessionGuard, Handoff> {
        let handoff = (&mut self.rx).await.unwrap_or(Handoff::Retry);
        match (handoff, self.session.take()) {
            (Handoff::Granted, Some(session)) => Ok(SessionGuard::new(self.registry.clone(), session)),
            (handoff, _) => Err(handoff),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.rx.close();
        if let Ok(Handoff::Granted) = self.rx.try_recv() {
            debug!(session = session.id, "Waiter dropped after handoff, releasing session");
            self.registry.release(&session, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{group_message, private_message};

    fn registry(hold: bool) -> SessionRegistry {
        SessionRegistry::new(Arc::new(KeyRule::sender()), hold)
    }

    #[test]
    fn test_key_rule() {
        let rule = KeyRule::sender_in_scene();
        let a = private_message(1, "x");
        let b = private_message(1, "y");
        let c = group_message(1, 5, "z");
        let d = private_message(2, "x");

        assert!(rule.compare(&a, &b));
        assert!(!rule.compare(&a, &c));
        assert!(!rule.compare(&a, &d));
        assert!(KeyRule::new(["sender.user_id"]).compare(&a, &b));
    }

    #[test]
    fn test_create_then_busy_then_free() {
        let reg = registry(true);
        let e1 = Arc::new(private_message(1, "a"));
        let e2 = Arc::new(private_message(1, "b"));

        assert!(matches!(reg.acquire(&e1, false), Acquire::Vacant));
        let Acquire::Created(guard) = reg.acquire(&e1, true) else {
            panic!("expected a new session");
        };
        assert!(matches!(reg.acquire(&e2, true), Acquire::Busy(_)));

        guard.release();
        assert_eq!(reg.len(), 1);
        let Acquire::Free(guard) = reg.acquire(&e2, false) else {
            panic!("expected the held session to be free");
        };
        guard.release();
    }

    #[test]
    fn test_release_without_hold_destroys() {
        let reg = registry(false);
        let e = Arc::new(private_message(1, "a"));
        let Acquire::Created(guard) = reg.acquire(&e, true) else {
            panic!("expected a new session");
        };
        guard.release();
        assert!(reg.is_empty());
    }

    #[test]
    fn test_expired_session_is_destroyed() {
        let reg = registry(true);
        let e = Arc::new(private_message(1, "a"));
        let Acquire::Created(guard) = reg.acquire(&e, true) else {
            panic!("expected a new session");
        };
        guard.session().unwrap().expire();
        assert!(matches!(reg.acquire(&e, false), Acquire::Vacant));
        guard.release();
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn test_waiters_fifo_handoff() {
        let reg = registry(false);
        let e = Arc::new(private_message(1, "a"));
        let Acquire::Created(guard) = reg.acquire(&e, true) else {
            panic!("expected a new session");
        };
        let session = Arc::clone(guard.session().unwrap());

        let first = reg.enqueue(&session).unwrap();
        let second = reg.enqueue(&session).unwrap();

        guard.release();
        let Ok(guard) = first.wait().await else {
            panic!("expected the first waiter to take over");
        };
        // Still held by the first waiter, so not destroyed.
        assert!(session.is_held());
        assert_eq!(reg.len(), 1);

        guard.release();
        let Ok(guard) = second.wait().await else {
            panic!("expected the second waiter to take over");
        };
        guard.release();
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_skipped() {
        let reg = registry(true);
        let e = Arc::new(private_message(1, "a"));
        let Acquire::Created(guard) = reg.acquire(&e, true) else {
            panic!("expected a new session");
        };
        let session = Arc::clone(guard.session().unwrap());

        drop(reg.enqueue(&session).unwrap());
        let live = reg.enqueue(&session).unwrap();

        guard.release();
        assert!(live.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_dropped_after_handoff_frees_session() {
        let reg = registry(false);
        let e = Arc::new(private_message(1, "a"));
        let Acquire::Created(guard) = reg.acquire(&e, true) else {
            panic!("expected a new session");
        };
        let session = Arc::clone(guard.session().unwrap());
        let waiter = reg.enqueue(&session).unwrap();
        let behind = reg.enqueue(&session).unwrap();

        // Ownership moves to `waiter`, which goes away before taking it.
        guard.release();
        assert!(session.is_held());
        drop(waiter);

        assert!(!session.is_held());
        assert!(reg.is_empty());
        assert_eq!(behind.wait().await.err(), Some(Handoff::Aborted));
        assert!(matches!(reg.acquire(&e, true), Acquire::Created(_)));
    }

    #[tokio::test]
    async fn test_cancelled_wait_after_handoff_frees_session() {
        let reg = registry(true);
        let e = Arc::new(private_message(1, "a"));
        let Acquire::Created(guard) = reg.acquire(&e, true) else {
            panic!("expected a new session");
        };
        let session = Arc::clone(guard.session().unwrap());
        let mut pending = tokio_test::task::spawn(reg.enqueue(&session).unwrap().wait());
        tokio_test::assert_pending!(pending.poll());

        guard.release();
        drop(pending);

        assert!(!session.is_held());
        assert!(matches!(reg.acquire(&e, false), Acquire::Free(_)));
    }

    #[tokio::test]
    async fn test_crash_aborts_waiters() {
        let reg = registry(true);
        let e = Arc::new(private_message(1, "a"));
        let Acquire::Created(guard) = reg.acquire(&e, true) else {
            panic!("expected a new session");
        };
        let session = Arc::clone(guard.session().unwrap());
        let waiter = reg.enqueue(&session).unwrap();

        drop(guard);
        assert_eq!(waiter.wait().await.err(), Some(Handoff::Aborted));
        // Hold keeps the session, now free.
        assert!(!session.is_held());
        assert!(matches!(reg.acquire(&e, false), Acquire::Free(_)));
    }

    #[tokio::test]
    async fn test_suspend_and_wake() {
        let reg = registry(true);
        let e1 = Arc::new(private_message(1, "a"));
        let e2 = Arc::new(private_message(1, "b"));
        let Acquire::Created(guard) = reg.acquire(&e1, true) else {
            panic!("expected a new session");
        };
        let session = Arc::clone(guard.session().unwrap());

        let parked = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.suspend(None).await })
        };
        while !matches!(reg.acquire(&e2, false), Acquire::Suspended(_)) {
            tokio::task::yield_now().await;
        }
        assert!(session.wake(Arc::clone(&e2)));

        let woken = parked.await.unwrap().unwrap();
        assert_eq!(woken.text(), "b");
        assert_eq!(session.history().len(), 2);
        guard.release();
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_timeout() {
        let reg = registry(true);
        let e = Arc::new(private_message(1, "a"));
        let Acquire::Created(guard) = reg.acquire(&e, true) else {
            panic!("expected a new session");
        };
        let session = Arc::clone(guard.session().unwrap());

        assert!(session.suspend(Some(Duration::from_secs(5))).await.is_none());
        assert!(!session.wake(e));
        guard.release();
    }

    #[test]
    fn test_store() {
        let reg = registry(true);
        let e = Arc::new(private_message(1, "a"));
        let Acquire::Created(guard) = reg.acquire(&e, true) else {
            panic!("expected a new session");
        };
        let session = guard.session().unwrap();

        session.set("count", 3).unwrap();
        assert_eq!(session.get::<i32>("count"), Some(3));
        assert_eq!(session.get::<String>("count"), None);
        assert!(session.remove("count").is_some());
        session.set("k", "v").unwrap();
        session.clear();
        assert_eq!(session.get::<String>("k"), None);
        guard.release();
    }
}
