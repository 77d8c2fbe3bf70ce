//! In-process transport and fixtures for session tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rac_core::{DisplayHints, FabricMessage, Frame, Protocol, SessionParams};
use rac_fabric::{ChannelLayer, Subscription};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::context::{BrokerContext, SessionConfig};
use crate::directory::InMemoryDirectory;
use crate::errors::BrokerError;
use crate::tokens::TokenStore;
use crate::transport::{FrameTransport, TransportEvent};

/// What the broker wrote to a fake peer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Sent {
    Frame(Frame),
    Ping,
    Close(u16, String),
}

/// Broker-side half.
pub(crate) struct FakeTransport {
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    outbound: mpsc::UnboundedSender<Sent>,
}

/// Test-side half. Drop `tx` to simulate the peer disconnecting.
pub(crate) struct FakePeer {
    pub tx: mpsc::UnboundedSender<TransportEvent>,
    pub rx: mpsc::UnboundedReceiver<Sent>,
}

impl FakePeer {
    pub fn send(&self, frame: Frame) {
        self.tx.send(TransportEvent::Frame(frame)).unwrap();
    }

    /// Next frame, skipping pings.
    pub async fn next(&mut self) -> Sent {
        loop {
            match tokio::time::timeout(Duration::from_secs(600), self.rx.recv()).await {
                Ok(Some(Sent::Ping)) => {}
                Ok(Some(sent)) => return sent,
                Ok(None) => panic!("transport dropped"),
                Err(_) => panic!("nothing sent"),
            }
        }
    }
}

pub(crate) fn fake_transport() -> (FakeTransport, FakePeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    (
        FakeTransport {
            inbound: in_rx,
            outbound: out_tx,
        },
        FakePeer {
            tx: in_tx,
            rx: out_rx,
        },
    )
}

#[async_trait]
impl FrameTransport for FakeTransport {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }

    async fn send(&mut self, frame: Frame) -> Result<(), BrokerError> {
        self.outbound
            .send(Sent::Frame(frame))
            .map_err(|_| BrokerError::TransportClosed)
    }

    async fn ping(&mut self) -> Result<(), BrokerError> {
        self.outbound
            .send(Sent::Ping)
            .map_err(|_| BrokerError::TransportClosed)
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let _ = self.outbound.send(Sent::Close(code, reason.to_owned()));
    }
}

pub(crate) fn params(session: &str) -> SessionParams {
    SessionParams {
        provider: "p".into(),
        endpoint: "e".into(),
        endpoint_name: "win".into(),
        protocol: Protocol::Rdp,
        session: session.into(),
        settings: serde_json::json!({"hostname": "10.0.0.5"})
            .as_object()
            .cloned()
            .unwrap(),
        hints: DisplayHints::default(),
    }
}

/// A context over a fresh layer and a directory with outpost `op` serving
/// provider `p`.
pub(crate) fn context(config: SessionConfig) -> (BrokerContext, Arc<InMemoryDirectory>) {
    let directory = Arc::new(InMemoryDirectory::new());
    directory.assign("op".into(), ["p".into()]);
    let ctx = BrokerContext::new(
        ChannelLayer::new(16),
        Arc::new(TokenStore::new()),
        directory.clone(),
        config,
        CancellationToken::new(),
    );
    (ctx, directory)
}

pub(crate) async fn next_message(sub: &mut Subscription) -> FabricMessage {
    tokio::time::timeout(Duration::from_secs(600), sub.recv())
        .await
        .expect("no fabric message")
        .expect("layer gone")
}
