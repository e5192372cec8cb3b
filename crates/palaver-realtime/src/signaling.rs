//! Call signaling state machine.
//!
//! Resolves a callee's current signaling address, relays opaque
//! session-description and network-candidate payloads between the two
//! parties, and enforces the call lifecycle:
//!
//! ```text
//! ringing ── accept ──▶ accepted ── first relay ──▶ active
//!    │                      │                          │
//!    └── reject/timeout ────┴────────── hang-up/error ─┴──▶ ended
//! ```
//!
//! State only moves forward. Every transition is validated under the
//! call's own lock, so the ringing timeout and an explicit accept can
//! never both win.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use palaver_core::{CallId, CallMode, EndReason, ServerEvent, SignalingAddress, UserId};

use crate::config::RealtimeConfig;
use crate::error::RealtimeError;
use crate::registry::ConnectionRegistry;

/// Lifecycle state of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Ringing,
    Accepted,
    Active,
    Ended,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Ringing => "ringing",
            CallState::Accepted => "accepted",
            CallState::Active => "active",
            CallState::Ended => "ended",
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only view of a call session.
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub call_id: CallId,
    pub caller_id: UserId,
    pub callee_id: UserId,
    pub mode: CallMode,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
}

/// Mutable session record, owned by the state machine for the call's
/// lifetime.
#[derive(Debug)]
struct CallSession {
    call_id: CallId,
    caller_id: UserId,
    callee_id: UserId,
    mode: CallMode,
    state: CallState,
    created_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    end_reason: Option<EndReason>,
}

impl CallSession {
    fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            call_id: self.call_id,
            caller_id: self.caller_id.clone(),
            callee_id: self.callee_id.clone(),
            mode: self.mode,
            state: self.state,
            created_at: self.created_at,
            accepted_at: self.accepted_at,
            ended_at: self.ended_at,
            end_reason: self.end_reason,
        }
    }

    fn other_party(&self, user_id: &UserId) -> Option<UserId> {
        if user_id == &self.caller_id {
            Some(self.callee_id.clone())
        } else if user_id == &self.callee_id {
            Some(self.caller_id.clone())
        } else {
            None
        }
    }
}

/// Unordered pair of call participants; at most one live call per pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CallPair(UserId, UserId);

impl CallPair {
    fn new(a: &UserId, b: &UserId) -> Self {
        if a <= b {
            Self(a.clone(), b.clone())
        } else {
            Self(b.clone(), a.clone())
        }
    }
}

struct CallCell {
    session: Mutex<CallSession>,
    ring_cancel: CancellationToken,
}

type CallTable = Arc<DashMap<CallId, Arc<CallCell>>>;
type PairTable = Arc<DashMap<CallPair, CallId>>;

/// The signaling state machine and address book.
pub struct CallSignaling {
    ring_timeout: Duration,
    registry: Arc<ConnectionRegistry>,
    addresses: DashMap<UserId, SignalingAddress>,
    /// Shared with the per-call ring timers, which must still be able to
    /// finish a call after `self` stopped being reachable from the task.
    calls: CallTable,
    pairs: PairTable,
}

impl CallSignaling {
    pub fn new(config: &RealtimeConfig, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            ring_timeout: config.ring_timeout,
            registry,
            addresses: DashMap::new(),
            calls: Arc::new(DashMap::new()),
            pairs: Arc::new(DashMap::new()),
        }
    }

    /// Upsert a user's signaling address. Last writer wins: a user may
    /// reconnect their media transport independently of the chat
    /// transport.
    #[instrument(skip(self, address), fields(user_id = %user_id))]
    pub fn register_address(&self, user_id: UserId, address: String) -> SignalingAddress {
        let record = SignalingAddress {
            user_id: user_id.clone(),
            address,
            registered_at: Utc::now(),
        };
        let replaced = self.addresses.insert(user_id, record.clone());
        debug!(replaced = replaced.is_some(), "Signaling address registered");
        record
    }

    /// Drop a user's signaling address (on disconnect).
    pub fn clear_address(&self, user_id: &UserId) {
        self.addresses.remove(user_id);
    }

    pub fn address_of(&self, user_id: &UserId) -> Option<SignalingAddress> {
        self.addresses.get(user_id).map(|entry| entry.value().clone())
    }

    /// Start a call. Rejected synchronously when the pair already has a
    /// live call or the callee has no registered signaling address.
    ///
    /// On success the session enters `ringing`, the callee's live
    /// connections receive one incoming-call event each, and the ringing
    /// timeout starts counting.
    #[instrument(skip(self), fields(caller_id = %caller_id, callee_id = %callee_id))]
    pub async fn initiate(
        &self,
        caller_id: UserId,
        callee_id: UserId,
        mode: CallMode,
    ) -> Result<CallId, RealtimeError> {
        if !self.addresses.contains_key(&callee_id) {
            return Err(RealtimeError::Unreachable { callee: callee_id });
        }

        let call_id = CallId::generate();
        match self.pairs.entry(CallPair::new(&caller_id, &callee_id)) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(RealtimeError::CallConflict {
                    caller: caller_id,
                    callee: callee_id,
                });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(call_id);
            }
        }

        let cell = Arc::new(CallCell {
            session: Mutex::new(CallSession {
                call_id,
                caller_id: caller_id.clone(),
                callee_id: callee_id.clone(),
                mode,
                state: CallState::Ringing,
                created_at: Utc::now(),
                accepted_at: None,
                ended_at: None,
                end_reason: None,
            }),
            ring_cancel: CancellationToken::new(),
        });
        self.calls.insert(call_id, cell.clone());

        self.registry.push_to_user(
            &callee_id,
            &ServerEvent::IncomingCall {
                call_id,
                caller_id: caller_id.clone(),
                mode,
            },
        );
        // All of the caller's devices learn the call id and that ringing
        // started.
        self.registry.push_to_user(
            &caller_id,
            &ServerEvent::CallRinging {
                call_id,
                callee_id: callee_id.clone(),
                mode,
            },
        );

        let timer = RingTimer {
            call_id,
            cell: cell.clone(),
            calls: self.calls.clone(),
            pairs: self.pairs.clone(),
            registry: self.registry.clone(),
        };
        tokio::spawn(timer.run(self.ring_timeout, cell.ring_cancel.clone()));

        info!(call = %call_id, "Call ringing");
        Ok(call_id)
    }

    /// Accept a ringing call. Only the callee may accept; a call that has
    /// already timed out or ended no longer exists.
    #[instrument(skip(self), fields(call_id = %call_id, acceptor_id = %acceptor_id))]
    pub async fn accept(&self, call_id: CallId, acceptor_id: &UserId) -> Result<(), RealtimeError> {
        let cell = self.cell(&call_id)?;
        let mut session = cell.session.lock().await;

        if &session.callee_id != acceptor_id {
            return Err(RealtimeError::CallNotFound);
        }
        match session.state {
            CallState::Ringing => {}
            CallState::Ended => return Err(RealtimeError::CallNotFound),
            state => {
                return Err(RealtimeError::InvalidTransition {
                    op: "accept",
                    state: state.as_str(),
                })
            }
        }

        session.state = CallState::Accepted;
        session.accepted_at = Some(Utc::now());
        cell.ring_cancel.cancel();
        let caller_id = session.caller_id.clone();
        let callee_id = session.callee_id.clone();
        drop(session);

        // The caller learns the call went through; the callee's other
        // devices stop ringing.
        let event = ServerEvent::CallAccepted { call_id };
        self.registry.push_to_user(&caller_id, &event);
        self.registry.push_to_user(&callee_id, &event);

        info!(call = %call_id, "Call accepted");
        Ok(())
    }

    /// Relay an opaque signaling payload to the other party. The payload
    /// is never inspected or mutated. The first relay after acceptance
    /// promotes the call to `active`.
    #[instrument(skip(self, payload), fields(call_id = %call_id, from_id = %from_id))]
    pub async fn relay_signal(
        &self,
        call_id: CallId,
        from_id: &UserId,
        payload: serde_json::Value,
    ) -> Result<(), RealtimeError> {
        let cell = self.cell(&call_id)?;
        let mut session = cell.session.lock().await;

        let Some(other) = session.other_party(from_id) else {
            return Err(RealtimeError::CallNotFound);
        };
        match session.state {
            CallState::Accepted => session.state = CallState::Active,
            CallState::Active => {}
            CallState::Ended => return Err(RealtimeError::CallNotFound),
            state => {
                return Err(RealtimeError::InvalidTransition {
                    op: "relay a signal for",
                    state: state.as_str(),
                })
            }
        }
        drop(session);

        self.registry
            .push_to_user(&other, &ServerEvent::CallSignal { call_id, payload });
        Ok(())
    }

    /// End a call from any non-terminal state. Both parties' connections
    /// are notified and the session is garbage-collected.
    #[instrument(skip(self), fields(call_id = %call_id, by_id = %by_id, reason = %reason))]
    pub async fn end(
        &self,
        call_id: CallId,
        by_id: &UserId,
        reason: EndReason,
    ) -> Result<(), RealtimeError> {
        let cell = self.cell(&call_id)?;
        {
            let session = cell.session.lock().await;
            if session.other_party(by_id).is_none() {
                return Err(RealtimeError::CallNotFound);
            }
            if session.state == CallState::Ended {
                return Err(RealtimeError::CallNotFound);
            }
        }

        // The timeout may still win the race between the check above and
        // here; finish_call re-checks under the lock.
        if finish_call(
            &self.registry,
            &self.calls,
            &self.pairs,
            &cell,
            call_id,
            reason,
            false,
        )
        .await
        {
            info!(call = %call_id, %reason, "Call ended");
            Ok(())
        } else {
            Err(RealtimeError::CallNotFound)
        }
    }

    /// End every call a user participates in, e.g. when their last
    /// connection drops.
    pub async fn end_calls_for(&self, user_id: &UserId, reason: EndReason) -> usize {
        let involved: Vec<CallId> = self
            .calls
            .iter()
            .filter_map(|entry| {
                // try_lock: a call busy in another transition will settle
                // on its own; skipping it here is safe.
                let session = entry.value().session.try_lock().ok()?;
                session.other_party(user_id).map(|_| *entry.key())
            })
            .collect();

        let mut ended = 0;
        for call_id in involved {
            if self.end(call_id, user_id, reason).await.is_ok() {
                ended += 1;
            }
        }
        ended
    }

    /// Read-only view of a live call, if it still exists.
    pub async fn snapshot(&self, call_id: CallId) -> Option<CallSnapshot> {
        let cell = self.calls.get(&call_id).map(|entry| entry.value().clone())?;
        let session = cell.session.lock().await;
        Some(session.snapshot())
    }

    /// Number of live (not yet garbage-collected) call sessions.
    pub fn active_call_count(&self) -> usize {
        self.calls.len()
    }

    fn cell(&self, call_id: &CallId) -> Result<Arc<CallCell>, RealtimeError> {
        self.calls
            .get(call_id)
            .map(|entry| entry.value().clone())
            .ok_or(RealtimeError::CallNotFound)
    }
}

/// Ring timer for one call; holds what it needs to finish the call even
/// if it fires long after the initiating request completed.
struct RingTimer {
    call_id: CallId,
    cell: Arc<CallCell>,
    calls: CallTable,
    pairs: PairTable,
    registry: Arc<ConnectionRegistry>,
}

impl RingTimer {
    async fn run(self, timeout: Duration, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                let fired = finish_call(
                    &self.registry,
                    &self.calls,
                    &self.pairs,
                    &self.cell,
                    self.call_id,
                    EndReason::Timeout,
                    true,
                )
                .await;
                if fired {
                    warn!(call = %self.call_id, "Call rang out");
                }
            }
        }
    }
}

/// Complete a call: transition to `ended`, cancel the ring timer, remove
/// the session from the tables, and notify both parties. Returns false
/// when another transition already won (`only_if_ringing` makes the
/// timeout concede to an accept).
async fn finish_call(
    registry: &ConnectionRegistry,
    calls: &DashMap<CallId, Arc<CallCell>>,
    pairs: &DashMap<CallPair, CallId>,
    cell: &CallCell,
    call_id: CallId,
    reason: EndReason,
    only_if_ringing: bool,
) -> bool {
    let (caller_id, callee_id) = {
        let mut session = cell.session.lock().await;
        if session.state == CallState::Ended {
            return false;
        }
        if only_if_ringing && session.state != CallState::Ringing {
            return false;
        }
        session.state = CallState::Ended;
        session.ended_at = Some(Utc::now());
        session.end_reason = Some(reason);
        cell.ring_cancel.cancel();
        (session.caller_id.clone(), session.callee_id.clone())
    };

    calls.remove(&call_id);
    pairs.remove_if(&CallPair::new(&caller_id, &callee_id), |_, id| {
        *id == call_id
    });

    let event = ServerEvent::CallEnded { call_id, reason };
    registry.push_to_user(&caller_id, &event);
    registry.push_to_user(&callee_id, &event);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_core::{ConnectionId, DeviceTag};
    use tokio::sync::mpsc;

    fn setup() -> (Arc<ConnectionRegistry>, CallSignaling) {
        let config = RealtimeConfig::default();
        let registry = Arc::new(ConnectionRegistry::new(&config));
        let signaling = CallSignaling::new(&config, registry.clone());
        (registry, signaling)
    }

    fn connect(registry: &ConnectionRegistry, user: &str) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(16);
        registry.admit(
            UserId::new(user),
            ConnectionId::generate(),
            DeviceTag::new("d"),
            tx,
        );
        rx
    }

    async fn ringing_call(signaling: &CallSignaling) -> CallId {
        signaling.register_address(UserId::new("bob"), "peer-b".to_string());
        signaling
            .initiate(UserId::new("alice"), UserId::new("bob"), CallMode::Video)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn initiate_requires_a_registered_address() {
        let (_registry, signaling) = setup();

        let result = signaling
            .initiate(UserId::new("alice"), UserId::new("bob"), CallMode::Audio)
            .await;
        assert!(matches!(result, Err(RealtimeError::Unreachable { .. })));
        assert_eq!(signaling.active_call_count(), 0);
    }

    #[tokio::test]
    async fn callee_connections_get_exactly_one_incoming_call_event() {
        let (registry, signaling) = setup();
        let mut rx1 = connect(&registry, "bob");
        let mut rx2 = connect(&registry, "bob");

        let call_id = ringing_call(&signaling).await;

        for rx in [&mut rx1, &mut rx2] {
            match rx.try_recv().unwrap() {
                ServerEvent::IncomingCall {
                    call_id: got,
                    caller_id,
                    mode,
                } => {
                    assert_eq!(got, call_id);
                    assert_eq!(caller_id, UserId::new("alice"));
                    assert_eq!(mode, CallMode::Video);
                }
                other => panic!("unexpected event: {other:?}"),
            }
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn second_initiate_for_the_pair_is_a_conflict() {
        let (_registry, signaling) = setup();
        let _call = ringing_call(&signaling).await;

        let second = signaling
            .initiate(UserId::new("alice"), UserId::new("bob"), CallMode::Audio)
            .await;
        assert!(matches!(second, Err(RealtimeError::CallConflict { .. })));

        // The pair is unordered: the reverse direction conflicts too.
        signaling.register_address(UserId::new("alice"), "peer-a".to_string());
        let reversed = signaling
            .initiate(UserId::new("bob"), UserId::new("alice"), CallMode::Audio)
            .await;
        assert!(matches!(reversed, Err(RealtimeError::CallConflict { .. })));

        assert_eq!(signaling.active_call_count(), 1);
    }

    #[tokio::test]
    async fn accept_transitions_to_accepted_and_notifies_the_caller() {
        let (registry, signaling) = setup();
        let mut alice_rx = connect(&registry, "alice");

        let call_id = ringing_call(&signaling).await;
        match alice_rx.try_recv().unwrap() {
            ServerEvent::CallRinging { call_id: got, .. } => assert_eq!(got, call_id),
            other => panic!("unexpected event: {other:?}"),
        }

        signaling.accept(call_id, &UserId::new("bob")).await.unwrap();

        let snapshot = signaling.snapshot(call_id).await.unwrap();
        assert_eq!(snapshot.state, CallState::Accepted);
        assert!(snapshot.accepted_at.is_some());

        match alice_rx.try_recv().unwrap() {
            ServerEvent::CallAccepted { call_id: got } => assert_eq!(got, call_id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn only_the_callee_may_accept() {
        let (_registry, signaling) = setup();
        let call_id = ringing_call(&signaling).await;

        let result = signaling.accept(call_id, &UserId::new("alice")).await;
        assert!(matches!(result, Err(RealtimeError::CallNotFound)));

        let snapshot = signaling.snapshot(call_id).await.unwrap();
        assert_eq!(snapshot.state, CallState::Ringing);
    }

    #[tokio::test]
    async fn relay_is_invalid_while_ringing_and_promotes_to_active() {
        let (registry, signaling) = setup();
        let mut alice_rx = connect(&registry, "alice");
        let _bob_rx = connect(&registry, "bob");
        let call_id = ringing_call(&signaling).await;

        let early = signaling
            .relay_signal(call_id, &UserId::new("bob"), serde_json::json!({"sdp": "x"}))
            .await;
        assert!(matches!(
            early,
            Err(RealtimeError::InvalidTransition { .. })
        ));

        signaling.accept(call_id, &UserId::new("bob")).await.unwrap();
        alice_rx.try_recv().unwrap(); // drain the ringing notification
        alice_rx.try_recv().unwrap(); // drain the accept notification

        let payload = serde_json::json!({"candidate": "udp 1 ..."});
        signaling
            .relay_signal(call_id, &UserId::new("bob"), payload.clone())
            .await
            .unwrap();

        match alice_rx.try_recv().unwrap() {
            ServerEvent::CallSignal { payload: got, .. } => assert_eq!(got, payload),
            other => panic!("unexpected event: {other:?}"),
        }

        let snapshot = signaling.snapshot(call_id).await.unwrap();
        assert_eq!(snapshot.state, CallState::Active);
    }

    #[tokio::test]
    async fn relay_from_a_non_participant_is_rejected() {
        let (_registry, signaling) = setup();
        let call_id = ringing_call(&signaling).await;
        signaling.accept(call_id, &UserId::new("bob")).await.unwrap();

        let result = signaling
            .relay_signal(call_id, &UserId::new("mallory"), serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(RealtimeError::CallNotFound)));
    }

    #[tokio::test]
    async fn end_notifies_both_parties_and_frees_the_pair() {
        let (registry, signaling) = setup();
        let mut alice_rx = connect(&registry, "alice");
        let mut bob_rx = connect(&registry, "bob");

        let call_id = ringing_call(&signaling).await;
        bob_rx.try_recv().unwrap(); // drain the incoming-call event
        alice_rx.try_recv().unwrap(); // drain the ringing notification

        signaling
            .end(call_id, &UserId::new("alice"), EndReason::Hangup)
            .await
            .unwrap();

        for rx in [&mut alice_rx, &mut bob_rx] {
            match rx.try_recv().unwrap() {
                ServerEvent::CallEnded { reason, .. } => assert_eq!(reason, EndReason::Hangup),
                other => panic!("unexpected event: {other:?}"),
            }
            assert!(rx.try_recv().is_err());
        }

        // Ended calls are garbage-collected; the pair can call again.
        assert_eq!(signaling.active_call_count(), 0);
        assert!(matches!(
            signaling
                .end(call_id, &UserId::new("alice"), EndReason::Hangup)
                .await,
            Err(RealtimeError::CallNotFound)
        ));
        let again = ringing_call(&signaling).await;
        assert_ne!(again, call_id);
    }

    #[tokio::test(start_paused = true)]
    async fn ringing_timeout_ends_the_call_and_notifies_both_parties_once() {
        let (registry, signaling) = setup();
        let mut alice_rx = connect(&registry, "alice");
        let mut bob_rx = connect(&registry, "bob");

        let call_id = ringing_call(&signaling).await;
        bob_rx.try_recv().unwrap(); // drain the incoming-call event
        alice_rx.try_recv().unwrap(); // drain the ringing notification

        tokio::time::advance(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;

        for rx in [&mut alice_rx, &mut bob_rx] {
            match rx.try_recv().unwrap() {
                ServerEvent::CallEnded { reason, .. } => assert_eq!(reason, EndReason::Timeout),
                other => panic!("unexpected event: {other:?}"),
            }
            assert!(rx.try_recv().is_err());
        }

        // A late accept finds no call.
        let late = signaling.accept(call_id, &UserId::new("bob")).await;
        assert!(matches!(late, Err(RealtimeError::CallNotFound)));
        assert_eq!(signaling.active_call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn accept_cancels_the_ringing_timeout() {
        let (registry, signaling) = setup();
        let mut alice_rx = connect(&registry, "alice");

        let call_id = ringing_call(&signaling).await;
        signaling.accept(call_id, &UserId::new("bob")).await.unwrap();
        alice_rx.try_recv().unwrap(); // drain the ringing notification
        alice_rx.try_recv().unwrap(); // drain the accept notification

        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;

        // No timeout fired: the call is still accepted and nothing else
        // was pushed.
        let snapshot = signaling.snapshot(call_id).await.unwrap();
        assert_eq!(snapshot.state, CallState::Accepted);
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn configured_ring_timeout_is_honored() {
        let config = RealtimeConfig::default().with_ring_timeout(Duration::from_secs(5));
        let registry = Arc::new(ConnectionRegistry::new(&config));
        let signaling = CallSignaling::new(&config, registry.clone());

        signaling.register_address(UserId::new("bob"), "peer-b".to_string());
        let call_id = signaling
            .initiate(UserId::new("alice"), UserId::new("bob"), CallMode::Audio)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        assert!(signaling.snapshot(call_id).await.is_none());
    }

    #[tokio::test]
    async fn address_registration_is_last_writer_wins() {
        let (_registry, signaling) = setup();
        let bob = UserId::new("bob");

        signaling.register_address(bob.clone(), "first".to_string());
        signaling.register_address(bob.clone(), "second".to_string());

        assert_eq!(signaling.address_of(&bob).unwrap().address, "second");

        signaling.clear_address(&bob);
        assert!(signaling.address_of(&bob).is_none());
    }

    #[tokio::test]
    async fn disconnect_hygiene_ends_a_users_calls() {
        let (registry, signaling) = setup();
        let mut alice_rx = connect(&registry, "alice");

        let call_id = ringing_call(&signaling).await;
        alice_rx.try_recv().unwrap(); // drain the ringing notification

        let ended = signaling
            .end_calls_for(&UserId::new("bob"), EndReason::Error)
            .await;

        assert_eq!(ended, 1);
        assert!(signaling.snapshot(call_id).await.is_none());
        match alice_rx.try_recv().unwrap() {
            ServerEvent::CallEnded { reason, .. } => assert_eq!(reason, EndReason::Error),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
