//! WebSocket Connection Hub
//!
//! The session set is owned by a single dispatch task. Every other part of
//! the program talks to it through a [`Hub`] handle, which only enqueues
//! register, unregister and broadcast events. Nothing but the dispatch loop
//! ever touches the set, so membership needs no lock.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::messages::ChatMessage;

/// Unique identifier for a session, assigned by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sending side of a session's outbound mailbox
pub type Mailbox = mpsc::Sender<Arc<ChatMessage>>;

/// What to do when a session's mailbox is full during a broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlowConsumerPolicy {
    /// Skip the message for that session only
    #[default]
    Drop,
    /// Remove the session and close its mailbox
    Evict,
}

impl FromStr for SlowConsumerPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" => Ok(SlowConsumerPolicy::Drop),
            "evict" => Ok(SlowConsumerPolicy::Evict),
            other => Err(format!("unknown slow consumer policy '{}'", other)),
        }
    }
}

impl fmt::Display for SlowConsumerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlowConsumerPolicy::Drop => f.write_str("drop"),
            SlowConsumerPolicy::Evict => f.write_str("evict"),
        }
    }
}

/// Configuration for the connection hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the register intake channel
    pub register_capacity: usize,
    /// Capacity of the broadcast intake channel
    pub broadcast_capacity: usize,
    /// Full-mailbox handling
    pub slow_consumer: SlowConsumerPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            register_capacity: 64,
            broadcast_capacity: 256,
            slow_consumer: SlowConsumerPolicy::Drop,
        }
    }
}

/// Per-broadcast delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub dropped: usize,
    pub removed: usize,
}

/// The set of live sessions
///
/// A session is present iff its mailbox may still receive messages. Removing
/// a session drops the registry's mailbox sender, which closes the mailbox.
pub struct Registry {
    sessions: HashMap<SessionId, Mailbox>,
    policy: SlowConsumerPolicy,
    gauge: Arc<AtomicUsize>,
}

impl Registry {
    pub fn new(policy: SlowConsumerPolicy) -> Self {
        Self::with_gauge(policy, Arc::new(AtomicUsize::new(0)))
    }

    fn with_gauge(policy: SlowConsumerPolicy, gauge: Arc<AtomicUsize>) -> Self {
        Self {
            sessions: HashMap::new(),
            policy,
            gauge,
        }
    }

    pub fn register(&mut self, id: SessionId, mailbox: Mailbox) {
        self.sessions.insert(id, mailbox);
        self.sync_gauge();
        tracing::info!(session_id = %id, sessions = self.sessions.len(), "Session registered");
    }

    /// Remove a session and close its mailbox.
    ///
    /// Returns false if the session was not registered; duplicate and late
    /// requests are expected and harmless.
    pub fn unregister(&mut self, id: &SessionId) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            self.sync_gauge();
            tracing::info!(session_id = %id, sessions = self.sessions.len(), "Session unregistered");
        } else {
            tracing::trace!(session_id = %id, "Unregister for unknown session ignored");
        }
        removed
    }

    /// Offer `message` to every registered mailbox without waiting.
    pub fn broadcast(&mut self, message: Arc<ChatMessage>) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();
        let mut to_remove = Vec::new();

        for (id, mailbox) in &self.sessions {
            match mailbox.try_send(Arc::clone(&message)) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => match self.policy {
                    SlowConsumerPolicy::Drop => {
                        outcome.dropped += 1;
                        tracing::warn!(session_id = %id, "Mailbox full, message dropped");
                    }
                    SlowConsumerPolicy::Evict => {
                        tracing::warn!(session_id = %id, "Mailbox full, evicting slow consumer");
                        to_remove.push(*id);
                    }
                },
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(session_id = %id, "Mailbox receiver gone, removing session");
                    to_remove.push(*id);
                }
            }
        }

        for id in &to_remove {
            self.sessions.remove(id);
        }
        outcome.removed = to_remove.len();
        if outcome.removed > 0 {
            self.sync_gauge();
        }

        tracing::trace!(
            sender = %message.sender,
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            removed = outcome.removed,
            "Broadcast message"
        );
        outcome
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn sync_gauge(&self) {
        self.gauge.store(self.sessions.len(), Ordering::Relaxed);
    }
}

/// A register request; acknowledged once the session is in the set
struct Registration {
    id: SessionId,
    mailbox: Mailbox,
    ack: oneshot::Sender<()>,
}

/// Handle to the hub's dispatch loop
#[derive(Clone)]
pub struct Hub {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::UnboundedSender<SessionId>,
    broadcast_tx: mpsc::Sender<ChatMessage>,
    sessions: Arc<AtomicUsize>,
}

impl Hub {
    /// Start the dispatch loop.
    ///
    /// The loop runs until every `Hub` handle has been dropped, then closes
    /// all remaining mailboxes.
    pub fn spawn(config: HubConfig) -> (Self, JoinHandle<()>) {
        let (register_tx, register_rx) = mpsc::channel(config.register_capacity);
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_capacity);
        let gauge = Arc::new(AtomicUsize::new(0));

        let dispatcher = Dispatcher {
            registry: Registry::with_gauge(config.slow_consumer, Arc::clone(&gauge)),
            register_rx,
            unregister_rx,
            broadcast_rx,
        };
        let task = tokio::spawn(dispatcher.run());

        tracing::debug!(policy = %config.slow_consumer, "Hub dispatch loop started");

        let hub = Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            sessions: gauge,
        };
        (hub, task)
    }

    /// Add a session. Returns once the dispatch loop has inserted it, so
    /// anything the session broadcasts afterwards is echoed back to it.
    pub async fn register(&self, id: SessionId, mailbox: Mailbox) -> Result<(), HubError> {
        let (ack, acked) = oneshot::channel();
        self.register_tx
            .send(Registration { id, mailbox, ack })
            .await
            .map_err(|_| HubError::Closed)?;
        acked.await.map_err(|_| HubError::Closed)
    }

    /// Request removal of a session. Never waits.
    pub fn unregister(&self, id: SessionId) -> Result<(), HubError> {
        self.unregister_tx.send(id).map_err(|_| HubError::Closed)
    }

    /// Submit a message for fan-out. Waits only while the intake is full.
    pub async fn broadcast(&self, message: ChatMessage) -> Result<(), HubError> {
        self.broadcast_tx
            .send(message)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Number of registered sessions as last published by the dispatch loop
    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    /// Whether the dispatch loop is still accepting events
    pub fn is_running(&self) -> bool {
        !self.broadcast_tx.is_closed()
    }
}

struct Dispatcher {
    registry: Registry,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::UnboundedReceiver<SessionId>,
    broadcast_rx: mpsc::Receiver<ChatMessage>,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(registration) = self.register_rx.recv() => {
                    self.registry.register(registration.id, registration.mailbox);
                    // The registrant may have given up waiting
                    let _ = registration.ack.send(());
                }
                Some(id) = self.unregister_rx.recv() => {
                    self.registry.unregister(&id);
                }
                Some(message) = self.broadcast_rx.recv() => {
                    self.registry.broadcast(Arc::new(message));
                }
                else => break,
            }
        }

        tracing::debug!(
            remaining = self.registry.len(),
            "Hub dispatch loop stopped, closing remaining mailboxes"
        );
    }
}

/// Errors that can occur when talking to the hub
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Hub dispatch loop has stopped")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn message(sender: &str, body: &str) -> Arc<ChatMessage> {
        Arc::new(ChatMessage::new(sender, body))
    }

    async fn wait_for_count(hub: &Hub, expected: usize) {
        for _ in 0..200 {
            if hub.session_count() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} sessions, have {}", expected, hub.session_count());
    }

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.register_capacity, 64);
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.slow_consumer, SlowConsumerPolicy::Drop);
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 36);
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!("drop".parse::<SlowConsumerPolicy>(), Ok(SlowConsumerPolicy::Drop));
        assert_eq!("Evict".parse::<SlowConsumerPolicy>(), Ok(SlowConsumerPolicy::Evict));
        assert!("block".parse::<SlowConsumerPolicy>().is_err());
    }

    #[test]
    fn test_broadcast_reaches_every_session_once() {
        let mut registry = Registry::new(SlowConsumerPolicy::Drop);
        let mut receivers = Vec::new();
        for _ in 0..5 {
            let (tx, rx) = mpsc::channel(8);
            registry.register(SessionId::new(), tx);
            receivers.push(rx);
        }

        let outcome = registry.broadcast(message("a", "hello"));
        assert_eq!(outcome.delivered, 5);

        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap().body, "hello");
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_broadcast_preserves_order() {
        let mut registry = Registry::new(SlowConsumerPolicy::Drop);
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(SessionId::new(), tx);

        registry.broadcast(message("a", "m1"));
        registry.broadcast(message("a", "m2"));

        assert_eq!(rx.try_recv().unwrap().body, "m1");
        assert_eq!(rx.try_recv().unwrap().body, "m2");
    }

    #[test]
    fn test_unregister_twice_is_harmless() {
        let mut registry = Registry::new(SlowConsumerPolicy::Drop);
        let id = SessionId::new();
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(id, tx);

        assert!(registry.unregister(&id));
        assert!(!registry.unregister(&id));
        assert!(!registry.contains(&id));
        assert!(registry.is_empty());

        // Mailbox is closed once the registry lets go of it
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_no_broadcast_after_unregister() {
        let mut registry = Registry::new(SlowConsumerPolicy::Drop);
        let gone = SessionId::new();
        let (gone_tx, mut gone_rx) = mpsc::channel(8);
        let (stay_tx, mut stay_rx) = mpsc::channel(8);
        registry.register(gone, gone_tx);
        registry.register(SessionId::new(), stay_tx);

        registry.unregister(&gone);
        let outcome = registry.broadcast(message("a", "after"));

        assert_eq!(outcome.delivered, 1);
        assert!(gone_rx.try_recv().is_err());
        assert_eq!(stay_rx.try_recv().unwrap().body, "after");
    }

    #[test]
    fn test_drop_policy_skips_full_mailbox_only() {
        let mut registry = Registry::new(SlowConsumerPolicy::Drop);
        let slow = SessionId::new();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        registry.register(slow, slow_tx);
        registry.register(SessionId::new(), fast_tx);

        registry.broadcast(message("a", "m1"));
        let outcome = registry.broadcast(message("a", "m2"));

        assert_eq!(outcome, BroadcastOutcome { delivered: 1, dropped: 1, removed: 0 });
        assert!(registry.contains(&slow));
        assert_eq!(slow_rx.try_recv().unwrap().body, "m1");
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(fast_rx.try_recv().unwrap().body, "m1");
        assert_eq!(fast_rx.try_recv().unwrap().body, "m2");
    }

    #[test]
    fn test_evict_policy_removes_slow_consumer() {
        let mut registry = Registry::new(SlowConsumerPolicy::Evict);
        let slow = SessionId::new();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, _fast_rx) = mpsc::channel(8);
        registry.register(slow, slow_tx);
        registry.register(SessionId::new(), fast_tx);

        registry.broadcast(message("a", "m1"));
        let outcome = registry.broadcast(message("a", "m2"));

        assert_eq!(outcome, BroadcastOutcome { delivered: 1, dropped: 0, removed: 1 });
        assert!(!registry.contains(&slow));
        assert_eq!(registry.len(), 1);

        // The queued message is still readable, then the mailbox reports closed
        assert_eq!(slow_rx.try_recv().unwrap().body, "m1");
        assert!(matches!(
            slow_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_dead_mailbox_is_removed() {
        let mut registry = Registry::new(SlowConsumerPolicy::Drop);
        let (tx, rx) = mpsc::channel(8);
        registry.register(SessionId::new(), tx);
        drop(rx);

        let outcome = registry.broadcast(message("a", "x"));
        assert_eq!(outcome.removed, 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let id = SessionId::new();
        let (tx, mut rx) = mpsc::channel(8);

        assert!(hub.is_running());
        hub.register(id, tx).await.unwrap();
        assert_eq!(hub.session_count(), 1);

        hub.unregister(id).unwrap();
        hub.unregister(id).unwrap();
        wait_for_count(&hub, 0).await;

        // Mailbox closes when the dispatch loop removes the session
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_through_dispatch_loop() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        hub.register(SessionId::new(), tx1).await.unwrap();
        hub.register(SessionId::new(), tx2).await.unwrap();

        hub.broadcast(ChatMessage::new("a", "m1")).await.unwrap();
        hub.broadcast(ChatMessage::new("a", "m2")).await.unwrap();

        for rx in [&mut rx1, &mut rx2] {
            assert_eq!(rx.recv().await.unwrap().body, "m1");
            assert_eq!(rx.recv().await.unwrap().body, "m2");
        }
    }

    #[tokio::test]
    async fn test_dispatch_loop_stops_when_handles_dropped() {
        let (hub, task) = Hub::spawn(HubConfig::default());
        let (tx, mut rx) = mpsc::channel(8);
        hub.register(SessionId::new(), tx).await.unwrap();

        drop(hub);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("dispatch loop should stop")
            .unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_calls_fail_after_loop_stops() {
        let (hub, task) = Hub::spawn(HubConfig::default());
        task.abort();
        let _ = task.await;

        assert!(!hub.is_running());
        let (tx, _rx) = mpsc::channel(8);
        assert!(matches!(
            hub.register(SessionId::new(), tx).await,
            Err(HubError::Closed)
        ));
        assert!(hub.broadcast(ChatMessage::new("a", "b")).await.is_err());
        assert!(hub.unregister(SessionId::new()).is_err());
    }
}
