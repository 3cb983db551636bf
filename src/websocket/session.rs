//! Client Sessions
//!
//! A session pairs one transport with one outbound mailbox and runs two
//! tasks over it:
//!
//! - the **read pump** is the only reader of the transport. It turns chat
//!   input into [`ChatMessage`]s for the hub and enforces the read deadline.
//! - the **write pump** is the only writer. It drains the mailbox into
//!   frames and sends heartbeat pings.
//!
//! Whichever pump stops first tells the other through a [`PumpLink`], and
//! the read pump always asks the hub to unregister the session on its way
//! out. The hub may also close the mailbox first, which stops the write pump.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::hub::{Hub, HubError, SessionId};
use super::messages::{ChatInput, ChatMessage};
use super::render::OutboundFormat;
use super::transport::{Frame, Transport, TransportError, TransportReader, TransportWriter};

/// Per-session tunables
///
/// [`accept`] rejects a config that fails [`SessionConfig::validate`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for any single transport write
    pub write_wait: Duration,
    /// How long the read side waits for a pong before giving up
    pub pong_wait: Duration,
    /// Heartbeat period, shorter than `pong_wait`
    pub ping_period: Duration,
    /// Largest inbound message accepted, in bytes
    pub max_message_size: usize,
    /// Capacity of the outbound mailbox
    pub mailbox_capacity: usize,
    /// Encoding used for outbound messages
    pub outbound_format: OutboundFormat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            max_message_size: 512,
            mailbox_capacity: 256,
            outbound_format: OutboundFormat::Json,
        }
    }
}

impl SessionConfig {
    /// Check that the durations and capacities can drive a session.
    pub fn validate(&self) -> Result<(), String> {
        if self.ping_period.is_zero() {
            return Err("ping period must be greater than zero".to_string());
        }
        if self.ping_period >= self.pong_wait {
            return Err(format!(
                "ping period ({:?}) must be shorter than pong wait ({:?})",
                self.ping_period, self.pong_wait
            ));
        }
        if self.write_wait.is_zero() {
            return Err("write wait must be greater than zero".to_string());
        }
        if self.max_message_size == 0 {
            return Err("max message size must be greater than zero".to_string());
        }
        if self.mailbox_capacity == 0 {
            return Err("mailbox_capacity must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Errors that prevent a session from starting
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Hub(#[from] HubError),
}

/// Join handles for a running session's pumps
pub struct SessionHandle {
    pub id: SessionId,
    read: JoinHandle<()>,
    write: JoinHandle<()>,
}

impl SessionHandle {
    /// Wait for both pumps to finish.
    pub async fn join(self) {
        let _ = self.read.await;
        let _ = self.write.await;
    }

    pub fn is_finished(&self) -> bool {
        self.read.is_finished() && self.write.is_finished()
    }
}

/// Accept a connection: register a new session with the hub and start its
/// pumps. Returns as soon as both pumps are spawned.
///
/// If the config is unusable or the hub is gone, the transport is dropped
/// and no session exists.
pub async fn accept<T: Transport>(
    transport: T,
    hub: Hub,
    config: Arc<SessionConfig>,
) -> Result<SessionHandle, SessionError> {
    config.validate().map_err(SessionError::InvalidConfig)?;

    let id = SessionId::new();
    let (mailbox, outbox) = mpsc::channel(config.mailbox_capacity);
    hub.register(id, mailbox).await?;

    tracing::info!(session_id = %id, "WebSocket connected");
    Ok(spawn_pumps(id, transport, outbox, hub, config))
}

/// Start the read and write pumps for an already registered session.
pub(crate) fn spawn_pumps<T: Transport>(
    id: SessionId,
    transport: T,
    outbox: mpsc::Receiver<Arc<ChatMessage>>,
    hub: Hub,
    config: Arc<SessionConfig>,
) -> SessionHandle {
    let (reader, writer) = transport.split();
    let (read_link, write_link) = PumpLink::pair();

    let write_pump = WritePump {
        id,
        viewer: id.to_string(),
        writer,
        outbox,
        link: write_link,
        config: Arc::clone(&config),
    };
    let read_pump = ReadPump {
        id,
        reader,
        hub,
        link: read_link,
        config,
    };

    SessionHandle {
        id,
        write: tokio::spawn(write_pump.run()),
        read: tokio::spawn(read_pump.run()),
    }
}

/// Couples the two pumps of a session: dropping one side wakes the other.
struct PumpLink {
    _alive: oneshot::Sender<()>,
    peer_gone: oneshot::Receiver<()>,
}

impl PumpLink {
    fn pair() -> (Self, Self) {
        let (a_alive, a_gone) = oneshot::channel();
        let (b_alive, b_gone) = oneshot::channel();
        (
            Self {
                _alive: a_alive,
                peer_gone: b_gone,
            },
            Self {
                _alive: b_alive,
                peer_gone: a_gone,
            },
        )
    }
}

/// Why a pump stopped
#[derive(Debug)]
enum PumpExit {
    /// The paired pump stopped first
    PeerStopped,
    /// Peer sent a close frame or the stream ended
    Disconnected,
    /// No pong within the read deadline
    ReadTimeout,
    /// Hub closed the mailbox
    MailboxClosed,
    /// Hub is gone
    HubClosed,
    Transport(TransportError),
}

struct ReadPump<R> {
    id: SessionId,
    reader: R,
    hub: Hub,
    link: PumpLink,
    config: Arc<SessionConfig>,
}

impl<R: TransportReader> ReadPump<R> {
    async fn run(mut self) {
        let exit = self.pump().await;
        match &exit {
            PumpExit::Transport(e) => {
                tracing::debug!(session_id = %self.id, error = %e, "WebSocket receive error");
            }
            other => {
                tracing::debug!(session_id = %self.id, reason = ?other, "Read pump stopped");
            }
        }

        if self.hub.unregister(self.id).is_err() {
            tracing::debug!(session_id = %self.id, "Hub already stopped, nothing to unregister");
        }
        tracing::info!(session_id = %self.id, "WebSocket disconnected");
    }

    async fn pump(&mut self) -> PumpExit {
        let mut deadline = Instant::now() + self.config.pong_wait;

        loop {
            let frame = tokio::select! {
                _ = &mut self.link.peer_gone => return PumpExit::PeerStopped,
                read = tokio::time::timeout_at(deadline, self.reader.recv()) => match read {
                    Err(_) => return PumpExit::ReadTimeout,
                    Ok(None) => return PumpExit::Disconnected,
                    Ok(Some(Err(e))) => return PumpExit::Transport(e),
                    Ok(Some(Ok(frame))) => frame,
                },
            };

            match frame {
                Frame::Pong(_) => {
                    deadline = Instant::now() + self.config.pong_wait;
                }
                Frame::Text(text) => {
                    if let Some(message) = self.decode(&text) {
                        if self.hub.broadcast(message).await.is_err() {
                            return PumpExit::HubClosed;
                        }
                    }
                }
                Frame::Close => return PumpExit::Disconnected,
                Frame::Binary(_) | Frame::Ping(_) => {}
            }
        }
    }

    /// Parse-or-drop: a bad frame never ends the session.
    fn decode(&self, text: &str) -> Option<ChatMessage> {
        if text.len() > self.config.max_message_size {
            tracing::debug!(session_id = %self.id, size = text.len(), "Dropped oversized frame");
            return None;
        }
        match ChatInput::parse(text) {
            Some(input) => Some(ChatMessage::new(self.id.to_string(), input.chatinput)),
            None => {
                tracing::debug!(session_id = %self.id, "Dropped malformed frame");
                None
            }
        }
    }
}

struct WritePump<W> {
    id: SessionId,
    viewer: String,
    writer: W,
    outbox: mpsc::Receiver<Arc<ChatMessage>>,
    link: PumpLink,
    config: Arc<SessionConfig>,
}

impl<W: TransportWriter> WritePump<W> {
    async fn run(mut self) {
        let exit = self.pump().await;
        match &exit {
            PumpExit::Transport(e) => {
                tracing::debug!(session_id = %self.id, error = %e, "WebSocket send failed");
            }
            other => {
                tracing::debug!(session_id = %self.id, reason = ?other, "Write pump stopped");
            }
        }

        let wait = self.config.write_wait;
        match tokio::time::timeout(wait, self.writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::trace!(session_id = %self.id, error = %e, "Transport close failed");
            }
            Err(_) => {
                tracing::trace!(session_id = %self.id, "Transport close timed out");
            }
        }
    }

    async fn pump(&mut self) -> PumpExit {
        let period = self.config.ping_period;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut self.link.peer_gone => return PumpExit::PeerStopped,
                next = self.outbox.recv() => {
                    let Some(first) = next else {
                        // Best effort; the session is over either way
                        let _ = self.write(Frame::Close).await;
                        return PumpExit::MailboxClosed;
                    };
                    if let Some(frame) = self.coalesce(&first) {
                        if let Err(e) = self.write(frame).await {
                            return PumpExit::Transport(e);
                        }
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.write(Frame::Ping(Vec::new())).await {
                        return PumpExit::Transport(e);
                    }
                }
            }
        }
    }

    /// Build one text frame from `first` plus whatever is already queued.
    fn coalesce(&mut self, first: &ChatMessage) -> Option<Frame> {
        let format = self.config.outbound_format;
        let mut parts: Vec<String> = format.encode(first, &self.viewer).into_iter().collect();

        let mut taken = 1;
        while taken < self.config.mailbox_capacity {
            match self.outbox.try_recv() {
                Ok(next) => {
                    taken += 1;
                    parts.extend(format.encode(&next, &self.viewer));
                }
                Err(_) => break,
            }
        }

        if taken > 1 {
            tracing::trace!(session_id = %self.id, batched = taken, "Coalesced queued messages");
        }
        if parts.is_empty() {
            None
        } else {
            Some(Frame::Text(parts.join("\n")))
        }
    }

    async fn write(&mut self, frame: Frame) -> Result<(), TransportError> {
        let wait = self.config.write_wait;
        tokio::time::timeout(wait, self.writer.send(frame))
            .await
            .unwrap_or(Err(TransportError::Timeout(wait)))
    }
}
