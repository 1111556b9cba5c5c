//! Synchronous credential relay between the engine and the interactive side.
//!
//! The engine's auth callbacks are plain blocking functions called from inside
//! its scheduler. [`AuthRelay::request`] publishes an [`AuthRequest`] event and
//! parks the calling thread on a condvar until the paired [`AuthResponder`] is
//! used, dropped, the wait times out, or the relay is cancelled by `stop()`.
//!
//! At most one request may be pending per relay. A second concurrent request is
//! rejected with [`AuthError::AlreadyPending`] rather than queued.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{EventSender, WorkerEvent};
use crate::engine::AuthKind;

/// The user's reply. `None` means the prompt was cancelled.
pub type AuthAnswer = Option<String>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("a credential request is already pending")]
    AlreadyPending,

    #[error("credential relay was cancelled")]
    Cancelled,

    #[error("no answer within {0:?}")]
    TimedOut(Duration),

    #[error("interactive side is no longer listening")]
    Disconnected,
}

#[derive(Default)]
struct Slot {
    next_id: u64,
    pending: Option<u64>,
    answer: Option<(u64, AuthAnswer)>,
    cancelled: bool,
}

#[derive(Default)]
struct Shared {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Worker-side half of the credential handoff.
#[derive(Clone)]
pub struct AuthRelay {
    shared: Arc<Shared>,
    events: EventSender,
    timeout: Duration,
}

impl AuthRelay {
    pub fn new(events: EventSender, timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            events,
            timeout,
        }
    }

    /// Ask the interactive side for a credential and block until it answers.
    ///
    /// `Ok(None)` is the user declining. Errors mean no prompt result exists:
    /// another request was pending, the relay was cancelled, the wait timed
    /// out, or nobody is listening for events.
    pub fn request(
        &self,
        kind: AuthKind,
        payload: Option<String>,
    ) -> Result<AuthAnswer, AuthError> {
        let id = {
            let mut slot = self.shared.lock();
            if slot.cancelled {
                return Err(AuthError::Cancelled);
            }
            if slot.pending.is_some() {
                tracing::warn!("Rejected {kind} request: another request is pending");
                return Err(AuthError::AlreadyPending);
            }
            slot.next_id += 1;
            slot.pending = Some(slot.next_id);
            slot.answer = None;
            slot.next_id
        };

        let request = AuthRequest {
            kind,
            payload,
            responder: AuthResponder {
                shared: Arc::clone(&self.shared),
                id,
                resolved: false,
            },
        };
        if let Err(unsent) = self.events.send(WorkerEvent::AuthRequest(request)) {
            drop(unsent);
            self.shared.lock().pending = None;
            return Err(AuthError::Disconnected);
        }
        tracing::info!("Waiting for {kind} from the interactive side");

        let deadline = Instant::now() + self.timeout;
        let mut slot = self.shared.lock();
        loop {
            if matches!(slot.answer, Some((answered, _)) if answered == id) {
                slot.pending = None;
                return Ok(slot.answer.take().and_then(|(_, value)| value));
            }
            if slot.cancelled {
                slot.pending = None;
                return Err(AuthError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                slot.pending = None;
                tracing::warn!("No {kind} received within {:?}", self.timeout);
                return Err(AuthError::TimedOut(self.timeout));
            }
            slot = match self.shared.ready.wait_timeout(slot, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Like [`request`](Self::request) but folds every failure into "no answer",
    /// which is what the engine's callback contract expects.
    pub fn request_or_abandon(&self, kind: AuthKind, payload: Option<String>) -> AuthAnswer {
        self.request(kind, payload).unwrap_or_else(|e| {
            tracing::warn!("{kind} request abandoned: {e}");
            None
        })
    }

    /// Wake any pending request and refuse new ones. Irreversible.
    pub fn cancel(&self) {
        self.shared.lock().cancelled = true;
        self.shared.ready.notify_all();
    }

    pub fn is_pending(&self) -> bool {
        self.shared.lock().pending.is_some()
    }
}

impl fmt::Debug for AuthRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRelay")
            .field("pending", &self.is_pending())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Credential challenge delivered to the interactive side.
#[derive(Debug)]
pub struct AuthRequest {
    pub kind: AuthKind,
    /// Hint supplied by the transport, e.g. "2FA" for a second-factor code.
    pub payload: Option<String>,
    pub responder: AuthResponder,
}

/// Single-use handle that resolves one [`AuthRequest`].
///
/// Dropping it without answering resolves the request as cancelled, so the
/// worker can never be left waiting on a handle that no longer exists.
pub struct AuthResponder {
    shared: Arc<Shared>,
    id: u64,
    resolved: bool,
}

impl AuthResponder {
    pub fn answer(mut self, value: AuthAnswer) {
        self.resolve(value);
    }

    pub fn cancel(self) {
        self.answer(None);
    }

    fn resolve(&mut self, value: AuthAnswer) {
        if self.resolved {
            return;
        }
        self.resolved = true;
        {
            let mut slot = self.shared.lock();
            // A timed-out or superseded request no longer accepts answers.
            if slot.pending == Some(self.id) && slot.answer.is_none() {
                slot.answer = Some((self.id, value));
            }
        }
        self.shared.ready.notify_all();
    }
}

impl Drop for AuthResponder {
    fn drop(&mut self) {
        self.resolve(None);
    }
}

impl fmt::Debug for AuthResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResponder")
            .field("id", &self.id)
            .field("resolved", &self.resolved)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::worker::{event_channel, EventReceiver};

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn relay() -> (AuthRelay, EventReceiver) {
        let (tx, rx) = event_channel();
        (AuthRelay::new(tx, TEST_TIMEOUT), rx)
    }

    fn next_request(rx: &mut EventReceiver) -> AuthRequest {
        let deadline = Instant::now() + TEST_TIMEOUT;
        loop {
            match rx.try_recv() {
                Ok(WorkerEvent::AuthRequest(req)) => return req,
                Ok(other) => panic!("unexpected event {other:?}"),
                Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(2)),
                Err(e) => panic!("no auth request arrived: {e}"),
            }
        }
    }

    #[test]
    fn test_delayed_answer_is_returned() {
        let (relay, mut rx) = relay();
        let worker = {
            let relay = relay.clone();
            thread::spawn(move || relay.request(AuthKind::Code, Some("prompt".into())))
        };

        let req = next_request(&mut rx);
        assert_eq!(req.kind, AuthKind::Code);
        assert_eq!(req.payload.as_deref(), Some("prompt"));
        thread::sleep(Duration::from_millis(50));
        req.responder.answer(Some("000000".into()));

        let started = Instant::now();
        let answer = worker.join().unwrap();
        assert_eq!(answer, Ok(Some("000000".to_string())));
        assert!(started.elapsed() < TEST_TIMEOUT);
        assert!(!relay.is_pending());
    }

    #[test]
    fn test_cancelled_prompt_returns_no_answer() {
        let (relay, mut rx) = relay();
        let worker = {
            let relay = relay.clone();
            thread::spawn(move || relay.request(AuthKind::Password, None))
        };

        next_request(&mut rx).responder.cancel();
        assert_eq!(worker.join().unwrap(), Ok(None));
    }

    #[test]
    fn test_dropped_responder_counts_as_cancel() {
        let (relay, mut rx) = relay();
        let worker = {
            let relay = relay.clone();
            thread::spawn(move || relay.request(AuthKind::Phone, None))
        };

        drop(next_request(&mut rx));
        assert_eq!(worker.join().unwrap(), Ok(None));
    }

    #[test]
    fn test_second_concurrent_request_is_rejected() {
        let (relay, mut rx) = relay();
        let first = {
            let relay = relay.clone();
            thread::spawn(move || relay.request(AuthKind::Phone, None))
        };
        let req = next_request(&mut rx);
        assert!(relay.is_pending());

        assert_eq!(
            relay.request(AuthKind::Code, None),
            Err(AuthError::AlreadyPending)
        );
        assert!(rx.try_recv().is_err(), "rejected request must not be published");

        req.responder.answer(Some("+15550100".into()));
        assert_eq!(first.join().unwrap(), Ok(Some("+15550100".to_string())));
    }

    #[test]
    fn test_cancel_unblocks_pending_request() {
        let (relay, mut rx) = relay();
        let worker = {
            let relay = relay.clone();
            thread::spawn(move || relay.request(AuthKind::Code, None))
        };
        let _req = next_request(&mut rx);

        relay.cancel();
        assert_eq!(worker.join().unwrap(), Err(AuthError::Cancelled));
        assert_eq!(
            relay.request(AuthKind::Code, None),
            Err(AuthError::Cancelled)
        );
    }

    #[test]
    fn test_timeout_resolves_and_ignores_late_answer() {
        let (tx, mut rx) = event_channel();
        let relay = AuthRelay::new(tx, Duration::from_millis(30));
        let worker = {
            let relay = relay.clone();
            thread::spawn(move || relay.request(AuthKind::Code, None))
        };
        let req = next_request(&mut rx);

        assert_eq!(
            worker.join().unwrap(),
            Err(AuthError::TimedOut(Duration::from_millis(30)))
        );
        req.responder.answer(Some("late".into()));
        assert!(!relay.is_pending());
    }

    #[test]
    fn test_closed_event_channel_is_disconnected() {
        let (relay, rx) = relay();
        drop(rx);
        assert_eq!(
            relay.request(AuthKind::Phone, None),
            Err(AuthError::Disconnected)
        );
        assert!(!relay.is_pending());
    }

    #[test]
    fn test_request_or_abandon_folds_errors() {
        let (relay, _rx) = relay();
        relay.cancel();
        assert_eq!(relay.request_or_abandon(AuthKind::Phone, None), None);
    }
}
