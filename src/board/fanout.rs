//! Notification fan-out.
//!
//! Connections register with the [`FanoutHub`], join topics, and receive
//! JSON text frames through a bounded per-connection channel. Delivery is
//! best-effort per connection: a subscriber whose buffer is full is
//! disconnected (it resyncs with a full snapshot when it reconnects) and
//! never holds up delivery to anyone else.
//!
//! Clients order messages by board version: a `delta` whose version is not
//! above the last snapshot's version is already reflected in it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::authz::Authorizer;
use super::board_cache::BoardCache;
use super::coordinator::MutationEvent;
use super::counter::CounterCache;
use super::models::{BoardSnapshot, Column, Principal};
use crate::errors::BoardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Board snapshots and deltas. Shop members only.
    Workflow,
    /// Pending-work counters.
    Appointments,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::Appointments => "appointments",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workflow" => Ok(Self::Workflow),
            "appointments" => Ok(Self::Appointments),
            _ => Err(format!("Unknown topic: {}", s)),
        }
    }
}

pub type ConnectionId = Uuid;

// ── Wire messages ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    FullSnapshot {
        snapshot: BoardSnapshot,
    },
    Delta {
        item_id: i64,
        from_column: Column,
        to_column: Column,
        from_position: i64,
        to_position: i64,
        version: i64,
    },
    CountUpdate {
        key: String,
        count: i64,
    },
    Pong,
    Subscribed {
        topic: Topic,
    },
    Unsubscribed {
        topic: Topic,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Subscribe { topic: Topic },
    Unsubscribe { topic: Topic },
    Ping,
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("Unrecognized message: {}", e))
    }
}

// ── Hub ──────────────────────────────────────────────────────────────

struct Connection {
    principal: Principal,
    tx: mpsc::Sender<String>,
    topics: HashSet<Topic>,
}

pub struct FanoutHub {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    authorizer: Arc<dyn Authorizer>,
    board_cache: Arc<BoardCache>,
    counter: Arc<CounterCache>,
    buffer: usize,
}

impl FanoutHub {
    pub fn new(
        authorizer: Arc<dyn Authorizer>,
        board_cache: Arc<BoardCache>,
        counter: Arc<CounterCache>,
        buffer: usize,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            authorizer,
            board_cache,
            counter,
            buffer: buffer.max(1),
        }
    }

    /// Register a connection. Frames for it arrive on the returned receiver;
    /// the receiver closes when the hub drops the connection.
    pub async fn connect(&self, principal: Principal) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        tracing::debug!(connection = %id, principal = %principal, "connection registered");
        self.connections.write().await.insert(
            id,
            Connection {
                principal,
                tx,
                topics: HashSet::new(),
            },
        );
        (id, rx)
    }

    pub async fn disconnect(&self, id: ConnectionId) {
        if self.connections.write().await.remove(&id).is_some() {
            tracing::debug!(connection = %id, "connection removed");
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.topics.contains(&topic))
            .count()
    }

    /// Join `topic` after the authorization check.
    ///
    /// The first subscribe to a topic is followed by that topic's full
    /// current state so the subscriber starts consistent. The connection
    /// table stays write-locked from reading that state until the topic is
    /// joined, so a concurrent `publish` is queued behind the snapshot and
    /// cannot fall into the gap between them.
    pub async fn subscribe(&self, id: ConnectionId, topic: Topic) -> Result<(), BoardError> {
        let mut conns = self.connections.write().await;
        let (principal, already) = match conns.get(&id) {
            Some(conn) => (conn.principal.clone(), conn.topics.contains(&topic)),
            None => {
                return Err(BoardError::InvalidRequest(format!(
                    "unknown connection {}",
                    id
                )));
            }
        };
        if !self.authorizer.can_subscribe(&principal, topic) {
            return Err(BoardError::Forbidden {
                principal: principal.name,
                action: format!("subscribe to '{}'", topic),
            });
        }

        let mut messages = vec![OutboundMessage::Subscribed { topic }];
        if !already {
            messages.extend(self.initial_state(topic).await?);
        }

        let Some(conn) = conns.get_mut(&id) else {
            return Ok(());
        };
        conn.topics.insert(topic);
        let mut alive = true;
        for message in &messages {
            let Some(frame) = encode(message) else { continue };
            if !deliver(id, &conn.tx, frame) {
                alive = false;
                break;
            }
        }
        if !alive {
            conns.remove(&id);
        }
        tracing::debug!(connection = %id, topic = %topic, first = !already, "subscribed");
        Ok(())
    }

    pub async fn unsubscribe(&self, id: ConnectionId, topic: Topic) {
        if let Some(conn) = self.connections.write().await.get_mut(&id) {
            conn.topics.remove(&topic);
            tracing::debug!(connection = %id, topic = %topic, "unsubscribed");
        }
    }

    async fn initial_state(&self, topic: Topic) -> Result<Vec<OutboundMessage>, BoardError> {
        match topic {
            Topic::Workflow => {
                let snapshot = self.board_cache.get_snapshot().await?;
                Ok(vec![OutboundMessage::FullSnapshot { snapshot }])
            }
            Topic::Appointments => {
                let mut messages = Vec::new();
                for predicate in self.counter.tracked() {
                    let count = self.counter.get_count(*predicate).await?;
                    messages.push(OutboundMessage::CountUpdate {
                        key: predicate.cache_key(),
                        count,
                    });
                }
                Ok(messages)
            }
        }
    }

    /// Deliver `message` to every current subscriber of `topic`.
    /// Returns the number of connections it was queued for.
    pub async fn publish(&self, topic: Topic, message: &OutboundMessage) -> usize {
        let Some(frame) = encode(message) else {
            return 0;
        };
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let conns = self.connections.read().await;
            for (id, conn) in conns.iter().filter(|(_, c)| c.topics.contains(&topic)) {
                if deliver(*id, &conn.tx, frame.clone()) {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
        }
        self.evict(&dead).await;
        tracing::trace!(topic = %topic, delivered, "published");
        delivered
    }

    /// Send a message to one connection only.
    pub async fn send_to(&self, id: ConnectionId, message: &OutboundMessage) -> bool {
        let Some(frame) = encode(message) else {
            return false;
        };
        let ok = match self.connections.read().await.get(&id) {
            Some(conn) => deliver(id, &conn.tx, frame),
            None => return false,
        };
        if !ok {
            self.evict(&[id]).await;
        }
        ok
    }

    async fn evict(&self, ids: &[ConnectionId]) {
        if ids.is_empty() {
            return;
        }
        let mut conns = self.connections.write().await;
        for id in ids {
            conns.remove(id);
        }
    }

    /// Handle one inbound text frame from a connection.
    ///
    /// Malformed or unknown messages get an `error` reply; the connection
    /// stays open.
    pub async fn handle_inbound(&self, id: ConnectionId, text: &str) {
        let reply = match InboundMessage::parse(text) {
            Ok(InboundMessage::Ping) => Some(OutboundMessage::Pong),
            Ok(InboundMessage::Subscribe { topic }) => match self.subscribe(id, topic).await {
                Ok(()) => None,
                Err(e) => {
                    tracing::info!(connection = %id, topic = %topic, error = %e, "subscribe refused");
                    Some(OutboundMessage::Error {
                        message: e.to_string(),
                    })
                }
            },
            Ok(InboundMessage::Unsubscribe { topic }) => {
                self.unsubscribe(id, topic).await;
                Some(OutboundMessage::Unsubscribed { topic })
            }
            Err(message) => Some(OutboundMessage::Error { message }),
        };
        if let Some(reply) = reply {
            self.send_to(id, &reply).await;
        }
    }

    // ── Mutation-driven publishing ────────────────────────────────────

    pub async fn on_mutation(&self, event: &MutationEvent) {
        match event {
            MutationEvent::Moved {
                item_id,
                from_column,
                to_column,
                from_position,
                to_position,
                version,
            } => {
                let delta = OutboundMessage::Delta {
                    item_id: *item_id,
                    from_column: *from_column,
                    to_column: *to_column,
                    from_position: *from_position,
                    to_position: *to_position,
                    version: *version,
                };
                self.publish(Topic::Workflow, &delta).await;
            }
            MutationEvent::Created { .. } | MutationEvent::Deleted { .. } => {
                self.publish_snapshot().await;
            }
        }
        self.publish_counts().await;
    }

    /// Push a fresh full snapshot and counters to everyone.
    pub async fn resync(&self) {
        self.publish_snapshot().await;
        self.publish_counts().await;
    }

    async fn publish_snapshot(&self) {
        match self.board_cache.get_snapshot().await {
            Ok(snapshot) => {
                self.publish(Topic::Workflow, &OutboundMessage::FullSnapshot { snapshot })
                    .await;
            }
            Err(e) => tracing::warn!(error = %e, "could not load board snapshot for fan-out"),
        }
    }

    async fn publish_counts(&self) {
        for (predicate, count) in self.counter.refresh_all().await {
            let update = OutboundMessage::CountUpdate {
                key: predicate.cache_key(),
                count,
            };
            self.publish(Topic::Appointments, &update).await;
        }
    }
}

fn encode(message: &OutboundMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize outbound message");
            None
        }
    }
}

/// Queue a frame without waiting. Returns false if the connection should
/// be dropped.
fn deliver(id: ConnectionId, tx: &mpsc::Sender<String>, frame: String) -> bool {
    match tx.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!(connection = %id, "subscriber too slow, disconnecting");
            false
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(connection = %id, "subscriber channel closed");
            false
        }
    }
}

/// Forward committed mutations to subscribers.
///
/// If the pump falls behind the event channel it publishes a full resync
/// instead of the deltas it lost.
pub fn spawn_mutation_pump(
    hub: Arc<FanoutHub>,
    mut events: broadcast::Receiver<MutationEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => hub.on_mutation(&event).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "mutation pump lagged, resyncing subscribers");
                    hub.resync().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("mutation pump stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::authz::RoleAuthorizer;
    use crate::board::cache::testing::StallingCache;
    use crate::board::cache::{CacheBackend, MemoryCache};
    use crate::board::coordinator::MoveCoordinator;
    use crate::board::db::{BoardDb, DbHandle};
    use crate::board::models::Role;
    use anyhow::Result;
    use std::time::Duration;

    struct Fixture {
        hub: Arc<FanoutHub>,
        coordinator: Arc<MoveCoordinator>,
    }

    fn fixture(buffer: usize) -> Result<Fixture> {
        fixture_with(Arc::new(MemoryCache::new(16)), buffer)
    }

    fn fixture_with(backend: Arc<dyn CacheBackend>, buffer: usize) -> Result<Fixture> {
        let db = DbHandle::new(BoardDb::new_in_memory()?, Duration::from_secs(2));
        let board_cache = Arc::new(BoardCache::new(
            backend.clone(),
            db.clone(),
            Duration::from_secs(60),
        ));
        let counter = Arc::new(CounterCache::new(backend, db.clone(), Duration::from_secs(60)));
        let authorizer: Arc<dyn Authorizer> = Arc::new(RoleAuthorizer);
        let coordinator = Arc::new(MoveCoordinator::new(
            db,
            board_cache.clone(),
            authorizer.clone(),
            64,
        ));
        let hub = Arc::new(FanoutHub::new(authorizer, board_cache, counter, buffer));
        Ok(Fixture { hub, coordinator })
    }

    fn staff() -> Principal {
        Principal::new("sam", Role::Staff)
    }

    fn next(rx: &mut mpsc::Receiver<String>) -> OutboundMessage {
        let frame = rx.try_recv().expect("expected a queued frame");
        serde_json::from_str(&frame).expect("frame should decode")
    }

    async fn recv(rx: &mut mpsc::Receiver<String>) -> OutboundMessage {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed");
        serde_json::from_str(&frame).expect("frame should decode")
    }

    #[test]
    fn outbound_messages_carry_type_tag() {
        let delta = OutboundMessage::Delta {
            item_id: 5,
            from_column: Column::Estimates,
            to_column: Column::InProgress,
            from_position: 0,
            to_position: 2,
            version: 9,
        };
        let json = serde_json::to_string(&delta).unwrap();
        assert!(json.contains("\"type\":\"delta\""));
        assert!(json.contains("\"from_column\":\"estimates\""));
        assert!(json.contains("\"to_position\":2"));

        let json = serde_json::to_string(&OutboundMessage::Pong).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);

        let json = serde_json::to_string(&OutboundMessage::CountUpdate {
            key: "count:status:pending".into(),
            count: 3,
        })
        .unwrap();
        assert!(json.contains("\"type\":\"count_update\""));
    }

    #[test]
    fn inbound_messages_parse() {
        assert_eq!(
            InboundMessage::parse(r#"{"type":"subscribe","topic":"workflow"}"#).unwrap(),
            InboundMessage::Subscribe {
                topic: Topic::Workflow
            }
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type":"ping"}"#).unwrap(),
            InboundMessage::Ping
        );
        assert!(InboundMessage::parse(r#"{"type":"dance"}"#).is_err());
        assert!(InboundMessage::parse(r#"{"type":"subscribe","topic":"payroll"}"#).is_err());
        assert!(InboundMessage::parse("not json").is_err());
    }

    #[tokio::test]
    async fn first_subscribe_sends_full_snapshot() -> Result<()> {
        let f = fixture(8)?;
        let x = f.coordinator.create_item(&staff(), "X", "", None).await?;
        let (id, mut rx) = f.hub.connect(staff()).await;

        f.hub.subscribe(id, Topic::Workflow).await?;

        assert_eq!(next(&mut rx), OutboundMessage::Subscribed { topic: Topic::Workflow });
        match next(&mut rx) {
            OutboundMessage::FullSnapshot { snapshot } => {
                assert_eq!(snapshot.ids(Column::Estimates), vec![x.id]);
            }
            other => panic!("expected full snapshot, got {:?}", other),
        }

        // Re-subscribing only acknowledges.
        f.hub.subscribe(id, Topic::Workflow).await?;
        assert_eq!(next(&mut rx), OutboundMessage::Subscribed { topic: Topic::Workflow });
        assert!(rx.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn appointments_subscribe_sends_counts() -> Result<()> {
        let f = fixture(8)?;
        f.coordinator.create_item(&staff(), "X", "", None).await?;
        let (id, mut rx) = f.hub.connect(Principal::anonymous()).await;

        f.hub.subscribe(id, Topic::Appointments).await?;

        assert_eq!(
            next(&mut rx),
            OutboundMessage::Subscribed {
                topic: Topic::Appointments
            }
        );
        assert_eq!(
            next(&mut rx),
            OutboundMessage::CountUpdate {
                key: "count:status:pending".into(),
                count: 1
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn unauthorized_subscribe_is_refused() -> Result<()> {
        let f = fixture(8)?;
        let (id, mut rx) = f.hub.connect(Principal::anonymous()).await;

        let err = f.hub.subscribe(id, Topic::Workflow).await.unwrap_err();

        assert!(matches!(err, BoardError::Forbidden { .. }));
        assert_eq!(f.hub.subscriber_count(Topic::Workflow).await, 0);
        assert!(rx.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn publish_reaches_only_topic_members() -> Result<()> {
        let f = fixture(8)?;
        let (a, mut rx_a) = f.hub.connect(staff()).await;
        let (_b, mut rx_b) = f.hub.connect(staff()).await;
        f.hub.subscribe(a, Topic::Workflow).await?;
        while rx_a.try_recv().is_ok() {}

        let delivered = f.hub.publish(Topic::Workflow, &OutboundMessage::Pong).await;

        assert_eq!(delivered, 1);
        assert_eq!(next(&mut rx_a), OutboundMessage::Pong);
        assert!(rx_b.try_recv().is_err());

        f.hub.unsubscribe(a, Topic::Workflow).await;
        assert_eq!(f.hub.publish(Topic::Workflow, &OutboundMessage::Pong).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_without_blocking_others() -> Result<()> {
        let f = fixture(2)?;
        let (slow, mut rx_slow) = f.hub.connect(staff()).await;
        let (fast, mut rx_fast) = f.hub.connect(staff()).await;
        f.hub.subscribe(slow, Topic::Appointments).await?;
        f.hub.subscribe(fast, Topic::Appointments).await?;
        while rx_fast.try_recv().is_ok() {}

        let delivered = f
            .hub
            .publish(Topic::Appointments, &OutboundMessage::Pong)
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(next(&mut rx_fast), OutboundMessage::Pong);
        assert_eq!(f.hub.connection_count().await, 1);
        // The slow connection sees what was queued, then the channel closes.
        assert!(rx_slow.recv().await.is_some());
        assert!(rx_slow.recv().await.is_some());
        assert!(rx_slow.recv().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn closed_receivers_are_pruned() -> Result<()> {
        let f = fixture(8)?;
        let (id, rx) = f.hub.connect(staff()).await;
        f.hub.subscribe(id, Topic::Appointments).await?;
        drop(rx);

        assert_eq!(f.hub.publish(Topic::Appointments, &OutboundMessage::Pong).await, 0);
        assert_eq!(f.hub.connection_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn inbound_ping_and_garbage_get_replies() -> Result<()> {
        let f = fixture(8)?;
        let (id, mut rx) = f.hub.connect(staff()).await;

        f.hub.handle_inbound(id, r#"{"type":"ping"}"#).await;
        f.hub.handle_inbound(id, r#"{"type":"teleport"}"#).await;
        f.hub
            .handle_inbound(id, r#"{"type":"unsubscribe","topic":"workflow"}"#)
            .await;

        assert_eq!(next(&mut rx), OutboundMessage::Pong);
        assert!(matches!(next(&mut rx), OutboundMessage::Error { .. }));
        assert_eq!(
            next(&mut rx),
            OutboundMessage::Unsubscribed {
                topic: Topic::Workflow
            }
        );
        assert_eq!(f.hub.connection_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn inbound_forbidden_subscribe_replies_error() -> Result<()> {
        let f = fixture(8)?;
        let (id, mut rx) = f.hub.connect(Principal::anonymous()).await;

        f.hub
            .handle_inbound(id, r#"{"type":"subscribe","topic":"workflow"}"#)
            .await;

        match next(&mut rx) {
            OutboundMessage::Error { message } => assert!(message.contains("not allowed")),
            other => panic!("expected error, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn pump_publishes_deltas_snapshots_and_counts() -> Result<()> {
        let f = fixture(16)?;
        let pump = spawn_mutation_pump(f.hub.clone(), f.coordinator.subscribe());
        let (board, mut rx_board) = f.hub.connect(staff()).await;
        let (counts, mut rx_counts) = f.hub.connect(Principal::anonymous()).await;
        f.hub.subscribe(board, Topic::Workflow).await?;
        f.hub.subscribe(counts, Topic::Appointments).await?;
        while rx_board.try_recv().is_ok() {}
        while rx_counts.try_recv().is_ok() {}

        let x = f.coordinator.create_item(&staff(), "X", "", None).await?;
        match recv(&mut rx_board).await {
            OutboundMessage::FullSnapshot { snapshot } => {
                assert_eq!(snapshot.ids(Column::Estimates), vec![x.id]);
            }
            other => panic!("expected full snapshot, got {:?}", other),
        }
        assert_eq!(
            recv(&mut rx_counts).await,
            OutboundMessage::CountUpdate {
                key: "count:status:pending".into(),
                count: 1
            }
        );

        f.coordinator.move_item(&staff(), x.id, "in_progress", 0).await?;
        match recv(&mut rx_board).await {
            OutboundMessage::Delta {
                item_id,
                from_column,
                to_column,
                from_position,
                to_position,
                ..
            } => {
                assert_eq!(item_id, x.id);
                assert_eq!(from_column, Column::Estimates);
                assert_eq!(to_column, Column::InProgress);
                assert_eq!((from_position, to_position), (0, 0));
            }
            other => panic!("expected delta, got {:?}", other),
        }
        assert_eq!(
            recv(&mut rx_counts).await,
            OutboundMessage::CountUpdate {
                key: "count:status:pending".into(),
                count: 0
            }
        );

        pump.abort();
        Ok(())
    }

    #[tokio::test]
    async fn resync_sends_full_state() -> Result<()> {
        let f = fixture(8)?;
        let (id, mut rx) = f.hub.connect(staff()).await;
        f.hub.subscribe(id, Topic::Workflow).await?;
        while rx.try_recv().is_ok() {}

        f.hub.resync().await;

        assert!(matches!(next(&mut rx), OutboundMessage::FullSnapshot { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn subscriber_joining_during_a_move_still_learns_of_it() -> Result<()> {
        let backend = Arc::new(StallingCache::new(Duration::from_millis(200)));
        let f = fixture_with(backend.clone(), 16)?;
        let x = f.coordinator.create_item(&staff(), "X", "", None).await?;
        let pump = spawn_mutation_pump(f.hub.clone(), f.coordinator.subscribe());
        let (id, mut rx) = f.hub.connect(staff()).await;

        // The joiner reads the pre-move snapshot and stalls holding it.
        backend.stall_next_get();
        let hub = Arc::clone(&f.hub);
        let joining = tokio::spawn(async move { hub.subscribe(id, Topic::Workflow).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.coordinator.move_item(&staff(), x.id, "in_progress", 0).await?;
        joining.await??;

        assert_eq!(recv(&mut rx).await, OutboundMessage::Subscribed { topic: Topic::Workflow });
        let snapshot = match recv(&mut rx).await {
            OutboundMessage::FullSnapshot { snapshot } => snapshot,
            other => panic!("expected full snapshot, got {:?}", other),
        };
        if !snapshot.ids(Column::InProgress).contains(&x.id) {
            match recv(&mut rx).await {
                OutboundMessage::Delta {
                    item_id,
                    to_column,
                    version,
                    ..
                } => {
                    assert_eq!(item_id, x.id);
                    assert_eq!(to_column, Column::InProgress);
                    assert!(version > snapshot.version);
                }
                other => panic!("expected the move as a delta, got {:?}", other),
            }
        }

        pump.abort();
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_moves_reach_subscribers_in_version_order() -> Result<()> {
        let f = fixture(64)?;
        let mut ids = Vec::new();
        for i in 0..10 {
            ids.push(
                f.coordinator
                    .create_item(&staff(), &format!("job {}", i), "", None)
                    .await?
                    .id,
            );
        }
        let pump = spawn_mutation_pump(f.hub.clone(), f.coordinator.subscribe());
        let (id, mut rx) = f.hub.connect(staff()).await;
        f.hub.subscribe(id, Topic::Workflow).await?;
        next(&mut rx);
        let snapshot = match next(&mut rx) {
            OutboundMessage::FullSnapshot { snapshot } => snapshot,
            other => panic!("expected full snapshot, got {:?}", other),
        };

        let mut tasks = Vec::new();
        for (i, item) in ids.iter().copied().enumerate() {
            let c = Arc::clone(&f.coordinator);
            let column = if i % 2 == 0 { "in_progress" } else { "waiting_parts" };
            tasks.push(tokio::spawn(async move {
                c.move_item(&staff(), item, column, 0).await
            }));
        }
        for task in tasks {
            task.await??;
        }

        let mut last = snapshot.version;
        for _ in 0..ids.len() {
            match recv(&mut rx).await {
                OutboundMessage::Delta { version, .. } => {
                    assert!(version > last, "delta {} arrived after {}", version, last);
                    last = version;
                }
                other => panic!("expected delta, got {:?}", other),
            }
        }
        assert_eq!(last, snapshot.version + ids.len() as i64);

        pump.abort();
        Ok(())
    }
}
