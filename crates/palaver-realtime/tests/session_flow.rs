//! End-to-end flows through the session layer: registry, presence,
//! fan-out, and signaling wired together the way the server wires them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use palaver_core::{
    CallMode, ConnectionId, ConversationId, DeviceTag, EndReason, GroupId, MessageId,
    PersistedMessage, PresenceStatus, Recipient, ServerEvent, UserId,
};
use palaver_realtime::{
    CallSignaling, ConnectionRegistry, FanoutPipeline, MembershipDirectory, PresenceService,
    RealtimeConfig, RealtimeError,
};

struct NoGroups;

#[async_trait::async_trait]
impl MembershipDirectory for NoGroups {
    async fn group_members(&self, _group: &GroupId) -> Result<Vec<UserId>, RealtimeError> {
        Ok(Vec::new())
    }

    async fn conversation_participants(
        &self,
        _conversation: &ConversationId,
    ) -> Result<Vec<UserId>, RealtimeError> {
        Ok(Vec::new())
    }
}

struct Harness {
    registry: Arc<ConnectionRegistry>,
    presence: PresenceService,
    fanout: FanoutPipeline,
    signaling: Arc<CallSignaling>,
}

impl Harness {
    fn new() -> Self {
        let config = RealtimeConfig::default();
        let registry = Arc::new(ConnectionRegistry::new(&config));
        let presence = PresenceService::new(registry.clone());
        let fanout = FanoutPipeline::new(registry.clone(), Arc::new(NoGroups));
        let signaling = Arc::new(CallSignaling::new(&config, registry.clone()));
        Self {
            registry,
            presence,
            fanout,
            signaling,
        }
    }

    fn connect(&self, user: &str) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let id = ConnectionId::generate();
        self.registry
            .admit(UserId::new(user), id, DeviceTag::new("device"), tx);
        (id, rx)
    }
}

fn message_to(id: &str, from: &str, to: &str) -> PersistedMessage {
    PersistedMessage {
        message_id: MessageId::new(id),
        sender_id: UserId::new(from),
        recipient: Recipient::User(UserId::new(to)),
        body: "hello".to_string(),
        attachment_ref: None,
        created_at: Utc::now(),
    }
}

/// User A has two connections, user B has none. A message to B is left
/// undelivered without any error surfacing on A's connections; once B
/// connects, delivery is not re-invoked by this layer.
#[tokio::test]
async fn message_to_offline_user_is_undelivered_and_not_retried() {
    let harness = Harness::new();
    let (_a1, mut a1_rx) = harness.connect("alice");
    let (_a2, mut a2_rx) = harness.connect("alice");

    let outcome = harness
        .fanout
        .deliver(&message_to("m1", "alice", "bob"))
        .await
        .unwrap();

    assert!(!outcome.fully_delivered());
    assert_eq!(outcome.undelivered, vec![UserId::new("bob")]);
    assert!(a1_rx.try_recv().is_err());
    assert!(a2_rx.try_recv().is_err());

    // B connects; nothing arrives until the external history fetch, which
    // is outside this layer.
    let (_b, mut b_rx) = harness.connect("bob");
    assert!(b_rx.try_recv().is_err());
}

#[tokio::test]
async fn read_receipt_round_trip() {
    let harness = Harness::new();
    let (_a, mut a_rx) = harness.connect("alice");
    let (_b, mut b_rx) = harness.connect("bob");

    harness
        .fanout
        .deliver(&message_to("m1", "alice", "bob"))
        .await
        .unwrap();

    match b_rx.try_recv().unwrap() {
        ServerEvent::MessageReceived { message } => {
            assert_eq!(message.message_id, MessageId::new("m1"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    harness
        .fanout
        .mark_read(&MessageId::new("m1"), &UserId::new("bob"))
        .unwrap();

    match a_rx.try_recv().unwrap() {
        ServerEvent::ReadReceipt { reader_id, .. } => {
            assert_eq!(reader_id, UserId::new("bob"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

/// Presence is online iff the user has at least one live connection, at
/// every point of an admit/remove interleaving across users.
#[tokio::test]
async fn presence_tracks_connection_transitions() {
    let harness = Harness::new();
    let alice = UserId::new("alice");
    let bob = UserId::new("bob");

    let (a1, _a1_rx) = harness.connect("alice");
    let (a2, _a2_rx) = harness.connect("alice");
    let (b1, _b1_rx) = harness.connect("bob");

    assert_eq!(harness.presence.current_status(&alice), PresenceStatus::Online);
    assert_eq!(harness.presence.current_status(&bob), PresenceStatus::Online);

    harness.registry.remove(a1);
    assert_eq!(harness.presence.current_status(&alice), PresenceStatus::Online);

    harness.registry.remove(a2);
    assert_eq!(harness.presence.current_status(&alice), PresenceStatus::Offline);

    harness.registry.remove(b1);
    assert_eq!(harness.presence.current_status(&bob), PresenceStatus::Offline);
    assert_eq!(harness.registry.connection_count(), 0);
}

/// A full call: register address, ring, accept, exchange signals, hang up.
#[tokio::test]
async fn call_lifecycle_happy_path() {
    let harness = Harness::new();
    let (_a, mut a_rx) = harness.connect("alice");
    let (_b, mut b_rx) = harness.connect("bob");

    harness
        .signaling
        .register_address(UserId::new("bob"), "peer-bob".to_string());
    let call_id = harness
        .signaling
        .initiate(UserId::new("alice"), UserId::new("bob"), CallMode::Video)
        .await
        .unwrap();

    assert!(matches!(
        b_rx.try_recv().unwrap(),
        ServerEvent::IncomingCall { .. }
    ));
    assert!(matches!(
        a_rx.try_recv().unwrap(),
        ServerEvent::CallRinging { .. }
    ));

    harness
        .signaling
        .accept(call_id, &UserId::new("bob"))
        .await
        .unwrap();
    assert!(matches!(
        a_rx.try_recv().unwrap(),
        ServerEvent::CallAccepted { .. }
    ));
    assert!(matches!(
        b_rx.try_recv().unwrap(),
        ServerEvent::CallAccepted { .. }
    ));

    let offer = serde_json::json!({"kind": "offer", "sdp": "v=0"});
    harness
        .signaling
        .relay_signal(call_id, &UserId::new("bob"), offer.clone())
        .await
        .unwrap();
    match a_rx.try_recv().unwrap() {
        ServerEvent::CallSignal { payload, .. } => assert_eq!(payload, offer),
        other => panic!("unexpected event: {other:?}"),
    }

    harness
        .signaling
        .end(call_id, &UserId::new("alice"), EndReason::Hangup)
        .await
        .unwrap();
    assert!(matches!(
        a_rx.try_recv().unwrap(),
        ServerEvent::CallEnded {
            reason: EndReason::Hangup,
            ..
        }
    ));
    assert!(matches!(
        b_rx.try_recv().unwrap(),
        ServerEvent::CallEnded {
            reason: EndReason::Hangup,
            ..
        }
    ));
    assert_eq!(harness.signaling.active_call_count(), 0);
}

/// A video call to a reachable callee rings, times out after the policy
/// default, and both parties hear about it exactly once. A second
/// initiate during ringing is a conflict and creates no session.
#[tokio::test(start_paused = true)]
async fn unanswered_call_times_out_and_conflicts_are_rejected() {
    let harness = Harness::new();
    let (_a, mut a_rx) = harness.connect("alice");
    let (_b, mut b_rx) = harness.connect("bob");

    harness
        .signaling
        .register_address(UserId::new("bob"), "peer-bob".to_string());
    let call_id = harness
        .signaling
        .initiate(UserId::new("alice"), UserId::new("bob"), CallMode::Video)
        .await
        .unwrap();
    assert!(matches!(
        b_rx.try_recv().unwrap(),
        ServerEvent::IncomingCall { .. }
    ));
    assert!(matches!(
        a_rx.try_recv().unwrap(),
        ServerEvent::CallRinging { .. }
    ));

    let second = harness
        .signaling
        .initiate(UserId::new("alice"), UserId::new("bob"), CallMode::Video)
        .await;
    assert!(matches!(second, Err(RealtimeError::CallConflict { .. })));
    assert_eq!(harness.signaling.active_call_count(), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    tokio::task::yield_now().await;

    for rx in [&mut a_rx, &mut b_rx] {
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::CallEnded {
                reason: EndReason::Timeout,
                ..
            }
        ));
        assert!(rx.try_recv().is_err());
    }

    let late_accept = harness.signaling.accept(call_id, &UserId::new("bob")).await;
    assert!(matches!(late_accept, Err(RealtimeError::CallNotFound)));
}

/// A failing connection only tears itself down; the user's other
/// connection and other users keep receiving events.
#[tokio::test]
async fn transport_failure_is_isolated_to_one_connection() {
    let harness = Harness::new();

    let (dead_tx, dead_rx) = mpsc::channel(4);
    let dead_id = ConnectionId::generate();
    harness.registry.admit(
        UserId::new("bob"),
        dead_id,
        DeviceTag::new("flaky"),
        dead_tx,
    );
    drop(dead_rx);
    let (_b2, mut b2_rx) = harness.connect("bob");

    let outcome = harness
        .fanout
        .deliver(&message_to("m1", "alice", "bob"))
        .await
        .unwrap();

    assert_eq!(outcome.connections_pushed, 1);
    assert!(b2_rx.try_recv().is_ok());
    assert_eq!(
        harness.registry.connections_of(&UserId::new("bob")).len(),
        1
    );
}
