//! Axum `WebSocket` as a broker [`FrameTransport`].

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use bytes::Bytes;
use rac_broker::{BrokerError, FrameTransport, TransportEvent};
use rac_core::Frame;
use tracing::{debug, trace};

/// One upgraded connection.
///
/// Text and binary messages map one-to-one onto [`Frame`]s, so message
/// boundaries survive the relay. Pings from the peer are answered by axum.
pub struct WsTransport {
    socket: WebSocket,
    closed: bool,
}

impl WsTransport {
    /// Wrap an upgraded socket.
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            closed: false,
        }
    }
}

pub(crate) fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(Utf8Bytes::from(text)),
        Frame::Binary(data) => Message::Binary(data),
    }
}

pub(crate) fn message_to_event(message: Message) -> Option<TransportEvent> {
    match message {
        Message::Text(text) => Some(TransportEvent::Frame(Frame::Text(text.as_str().to_owned()))),
        Message::Binary(data) => Some(TransportEvent::Frame(Frame::Binary(data))),
        Message::Pong(_) => Some(TransportEvent::Pong),
        Message::Ping(_) | Message::Close(_) => None,
    }
}

#[async_trait]
impl FrameTransport for WsTransport {
    async fn recv(&mut self) -> Option<TransportEvent> {
        if self.closed {
            return None;
        }
        loop {
            match self.socket.recv().await? {
                Ok(Message::Close(frame)) => {
                    debug!(code = frame.as_ref().map(|f| f.code), "peer closed");
                    self.closed = true;
                    return None;
                }
                Ok(Message::Ping(_)) => trace!("ping"),
                Ok(message) => return message_to_event(message),
                Err(e) => {
                    debug!(error = %e, "websocket read failed");
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::TransportClosed);
        }
        self.socket
            .send(frame_to_message(frame))
            .await
            .map_err(|_| BrokerError::TransportClosed)
    }

    async fn ping(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::TransportClosed);
        }
        self.socket
            .send(Message::Ping(Bytes::new()))
            .await
            .map_err(|_| BrokerError::TransportClosed)
    }

    async fn close(&mut self, code: u16, reason: &str) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        let frame = CloseFrame {
            code,
            reason: Utf8Bytes::from(reason.to_owned()),
        };
        if let Err(e) = self.socket.send(Message::Close(Some(frame))).await {
            debug!(error = %e, "close frame not sent");
        }
    }
}
