//! WebSocket transport
//!
//! Owns exactly one socket, split into independent halves:
//!
//! - [`TransportSender`] writes text frames and pings
//! - [`TransportReceiver`] yields inbound frames until the socket closes
//!
//! There is no retry logic here; the connection controller decides what
//! happens after a failure.
//!
//! The sender half is shared between caller tasks and the background task
//! through [`Outbound`], a mutex-guarded slot that is emptied while the
//! connection is down and refilled with a new sender (and a new epoch) after
//! every successful connect.

use evmux_core::{codec, Error, JsonRpcRequest, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a socket to `url`
///
/// # Errors
///
/// `Error::Connection` if the URL is invalid or the handshake fails.
#[tracing::instrument(skip(url), fields(url = %url))]
pub async fn connect(url: &str) -> Result<(TransportSender, TransportReceiver)> {
    let (ws_stream, _response) = connect_async(url)
        .await
        .map_err(|e| Error::Connection(e.to_string()))?;

    let (sink, stream) = ws_stream.split();
    Ok((TransportSender { sink }, TransportReceiver { stream }))
}

/// An inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Text payload (binary frames holding UTF-8 are reported as text)
    Text(String),
    /// Reply to one of our pings
    Pong,
    /// Anything else; ignored by the dispatcher
    Other,
}

/// Write half of the socket
pub struct TransportSender {
    sink: SplitSink<WsStream, Message>,
}

impl TransportSender {
    /// Send a text frame
    pub async fn send_text(&mut self, text: String) -> Result<()> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))
    }

    /// Send a ping frame
    pub async fn ping(&mut self) -> Result<()> {
        self.sink
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))
    }

    /// Close the socket
    ///
    /// Errors are ignored: the socket is released either way.
    pub async fn close(mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

/// Read half of the socket
pub struct TransportReceiver {
    stream: SplitStream<WsStream>,
}

impl TransportReceiver {
    /// Wait for the next frame
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` on a close frame or end of stream,
    /// `Error::WebSocket` on a transport error. Either way the socket is
    /// finished.
    pub async fn receive(&mut self) -> Result<Frame> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => Ok(Frame::Text(text)),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => Ok(Frame::Text(text)),
                Err(_) => Ok(Frame::Other),
            },
            Some(Ok(Message::Pong(_))) => Ok(Frame::Pong),
            Some(Ok(Message::Close(_))) | None => Err(Error::ConnectionClosed),
            Some(Ok(_)) => Ok(Frame::Other),
            Some(Err(e)) => Err(Error::WebSocket(e.to_string())),
        }
    }
}

/// Shared, swappable sender half
///
/// `epoch` increments on every [`OutboundSlot::install`], so a request
/// tagged with an epoch can be tied to the physical connection it went out
/// on.
#[derive(Clone, Default)]
pub(crate) struct Outbound {
    slot: Arc<Mutex<OutboundSlot>>,
}

#[derive(Default)]
pub(crate) struct OutboundSlot {
    sender: Option<TransportSender>,
    epoch: u64,
}

impl Outbound {
    pub(crate) async fn lock(&self) -> MutexGuard<'_, OutboundSlot> {
        self.slot.lock().await
    }
}

impl OutboundSlot {
    /// Epoch of the live connection, `None` while disconnected
    pub(crate) fn epoch(&self) -> Option<u64> {
        self.sender.as_ref().map(|_| self.epoch)
    }

    /// Put a fresh sender in place and return its epoch
    pub(crate) fn install(&mut self, sender: TransportSender) -> u64 {
        self.epoch += 1;
        self.sender = Some(sender);
        self.epoch
    }

    /// Take the sender out, leaving the slot disconnected
    pub(crate) fn detach(&mut self) -> Option<TransportSender> {
        self.sender.take()
    }

    /// Encode and send one request
    ///
    /// A send failure is returned but does not detach the sender; the
    /// dispatcher notices the broken socket on its read side.
    pub(crate) async fn send_request(&mut self, request: &JsonRpcRequest) -> Result<()> {
        let sender = self.sender.as_mut().ok_or(Error::ConnectionClosed)?;
        let text = codec::encode_request(request)?;
        tracing::debug!(method = %request.method, id = %request.id, "Sending request");
        sender.send_text(text).await
    }

    /// Send requests in order, logging failures
    pub(crate) async fn send_all(&mut self, requests: &[JsonRpcRequest]) {
        for request in requests {
            if let Err(e) = self.send_request(request).await {
                tracing::warn!(method = %request.method, id = %request.id, error = %e, "Failed to send request");
            }
        }
    }

    pub(crate) async fn ping(&mut self) -> Result<()> {
        match self.sender.as_mut() {
            Some(sender) => sender.ping().await,
            None => Err(Error::ConnectionClosed),
        }
    }
}
