//! Connection Transport
//!
//! A transport is split exactly once into a reader and a writer. The read
//! pump takes sole ownership of the reader and the write pump of the writer,
//! so concurrent reads or writes on one connection cannot be expressed.
//!
//! Two transports are provided: axum's [`WebSocket`] and an in-process
//! channel pair ([`memory_transport`]) for embedding and tests.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// A single protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Errors raised by a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] axum::Error),
}

/// Exclusive read half of a connection
#[async_trait]
pub trait TransportReader: Send + 'static {
    /// Receive the next frame, or `None` once the peer has gone away.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// Exclusive write half of a connection
#[async_trait]
pub trait TransportWriter: Send + 'static {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Flush and release the underlying connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A full-duplex, message-framed connection
pub trait Transport: Send + 'static {
    type Reader: TransportReader;
    type Writer: TransportWriter;

    fn split(self) -> (Self::Reader, Self::Writer);
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::Text(text),
            Message::Binary(data) => Frame::Binary(data),
            Message::Ping(data) => Frame::Ping(data),
            Message::Pong(data) => Frame::Pong(data),
            Message::Close(_) => Frame::Close,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
            Frame::Close => Message::Close(None),
        }
    }
}

/// Read half of an axum WebSocket
pub struct WsReader(SplitStream<WebSocket>);

/// Write half of an axum WebSocket
pub struct WsWriter(SplitSink<WebSocket, Message>);

impl Transport for WebSocket {
    type Reader = WsReader;
    type Writer = WsWriter;

    fn split(self) -> (WsReader, WsWriter) {
        let (sink, stream) = StreamExt::split(self);
        (WsReader(stream), WsWriter(sink))
    }
}

#[async_trait]
impl TransportReader for WsReader {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        self.0
            .next()
            .await
            .map(|result| result.map(Frame::from).map_err(TransportError::from))
    }
}

#[async_trait]
impl TransportWriter for WsWriter {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.0.send(Message::from(frame)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.0.close().await?;
        Ok(())
    }
}

/// In-process transport backed by unbounded channels
pub struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<Frame>,
}

/// The remote end of a [`MemoryTransport`]
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Frame>>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

/// Create a connected transport/peer pair.
pub fn memory_transport() -> (MemoryTransport, MemoryPeer) {
    let (to_server, inbound) = mpsc::unbounded_channel();
    let (outbound, from_server) = mpsc::unbounded_channel();
    (
        MemoryTransport { inbound, outbound },
        MemoryPeer {
            tx: Some(to_server),
            rx: from_server,
        },
    )
}

pub struct MemoryReader(mpsc::UnboundedReceiver<Frame>);

pub struct MemoryWriter(Option<mpsc::UnboundedSender<Frame>>);

impl Transport for MemoryTransport {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn split(self) -> (MemoryReader, MemoryWriter) {
        (MemoryReader(self.inbound), MemoryWriter(Some(self.outbound)))
    }
}

#[async_trait]
impl TransportReader for MemoryReader {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        self.0.recv().await.map(Ok)
    }
}

#[async_trait]
impl TransportWriter for MemoryWriter {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let tx = self.0.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.0.take();
        Ok(())
    }
}

impl MemoryPeer {
    /// Send a frame to the server side. Returns false once disconnected.
    pub fn send(&self, frame: Frame) -> bool {
        match &self.tx {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(text.into()))
    }

    /// Next frame from the server, or `None` once the server released the
    /// connection.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Next text frame, skipping heartbeats.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await? {
                Frame::Text(text) => return Some(text),
                Frame::Ping(_) | Frame::Pong(_) | Frame::Binary(_) => continue,
                Frame::Close => return None,
            }
        }
    }

    /// Refuse further frames from the server; its writes start failing.
    pub fn stop_reading(&mut self) {
        self.rx.close();
    }

    /// Stop sending; the server's reader sees end of stream.
    pub fn hang_up(&mut self) {
        self.tx.take();
    }
}
