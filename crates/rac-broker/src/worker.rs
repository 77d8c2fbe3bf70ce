//! Broker-side halves of a worker instance's connections.
//!
//! A worker keeps one long-lived control connection per instance, over which
//! it receives pair offers and reports its load, and opens one relay
//! connection per session it claims.

use metrics::gauge;
use rac_core::{ChannelName, FabricMessage, Frame, InstanceUid, OutpostId};
use rac_fabric::{GroupName, Subscription};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::actor::{forward, notify_peer};
use crate::context::BrokerContext;
use crate::heartbeat::{Heartbeat, HeartbeatVerdict};
use crate::metrics::RAC_WORKER_INSTANCES_ACTIVE;
use crate::transport::{FrameTransport, TransportEvent, close_code};

/// Prefix of worker relay channel names.
pub const WORKER_CHANNEL_PREFIX: &str = "rac_worker";

/// Prefix of control channel names.
pub const CONTROL_CHANNEL_PREFIX: &str = "rac_outpost_ctl";

/// How a worker connection ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The worker disconnected.
    WorkerClosed,
    /// The client side sent a disconnect.
    Disconnected {
        /// Reason carried by the disconnect.
        reason: Option<String>,
    },
    /// The claimed client channel no longer exists.
    ClientGone,
    /// The connection was refused before it started.
    Rejected,
    /// The worker stopped answering pings.
    HeartbeatTimeout,
    /// The process is shutting down.
    Shutdown,
    /// Writing to the worker failed.
    Failed,
}

/// Messages a worker sends on its control connection.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Current load of the instance.
    State {
        /// Connections the instance is serving.
        #[serde(rename = "activeConnections")]
        active_connections: u64,
    },
}

/// Serve a worker instance's control connection.
///
/// Joins the instance's offer group, then registers the instance, so it is
/// never selectable before it can hear offers. Forwards every pair offer as
/// JSON text and applies load reports until the connection ends.
#[instrument(skip_all, fields(outpost = %outpost, instance = %instance))]
pub async fn run_outpost_control<T: FrameTransport>(
    ctx: &BrokerContext,
    outpost: OutpostId,
    instance: InstanceUid,
    transport: &mut T,
) -> WorkerOutcome {
    let mut sub = match ctx.layer.new_channel(CONTROL_CHANNEL_PREFIX) {
        Ok(sub) => sub,
        Err(e) => {
            warn!(error = %e, "failed to allocate control channel");
            transport.close(close_code::INTERNAL_ERROR, "internal error").await;
            return WorkerOutcome::Failed;
        }
    };
    let group = GroupName::outpost_instance(&outpost, &instance);
    if let Err(e) = ctx.layer.group_add(&group, sub.name()) {
        warn!(%group, error = %e, "failed to join instance group");
        transport.close(close_code::INTERNAL_ERROR, "internal error").await;
        return WorkerOutcome::Failed;
    }
    if let Err(e) = ctx.directory.register(&outpost, &instance).await {
        warn!(error = %e, "instance registration refused");
        transport.close(close_code::POLICY_VIOLATION, "unknown outpost").await;
        return WorkerOutcome::Rejected;
    }

    gauge!(RAC_WORKER_INSTANCES_ACTIVE).increment(1.0);
    let outcome = control_loop(ctx, &outpost, &instance, &mut sub, transport).await;
    let _ = ctx.directory.deregister(&outpost, &instance).await;
    drop(sub);
    gauge!(RAC_WORKER_INSTANCES_ACTIVE).decrement(1.0);
    info!(?outcome, "control connection ended");
    outcome
}

async fn control_loop<T: FrameTransport>(
    ctx: &BrokerContext,
    outpost: &OutpostId,
    instance: &InstanceUid,
    sub: &mut Subscription,
    transport: &mut T,
) -> WorkerOutcome {
    let mut heartbeat = Heartbeat::new(ctx.config.heartbeat_interval, ctx.config.heartbeat_timeout);
    let mut ticks = heartbeat.ticker();
    loop {
        tokio::select! {
            message = sub.recv() => match message {
                Some(offer @ FabricMessage::PairOffer(_)) => {
                    let json = match serde_json::to_string(&offer) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "offer not serialisable");
                            continue;
                        }
                    };
                    if transport.send(Frame::Text(json)).await.is_err() {
                        return WorkerOutcome::Failed;
                    }
                }
                Some(other) => debug!(kind = other.kind(), "ignoring control message"),
                None => return WorkerOutcome::Shutdown,
            },
            event = transport.recv() => match event {
                Some(TransportEvent::Frame(Frame::Text(text))) => {
                    heartbeat.on_activity();
                    match serde_json::from_str::<ControlMessage>(&text) {
                        Ok(ControlMessage::State { active_connections }) => {
                            let known = ctx
                                .directory
                                .update_load(outpost, instance, active_connections)
                                .await;
                            debug!(active_connections, known, "instance load updated");
                        }
                        Err(e) => debug!(error = %e, "unrecognised control message"),
                    }
                }
                Some(TransportEvent::Frame(Frame::Binary(_)) | TransportEvent::Pong) => {
                    heartbeat.on_activity();
                }
                None => return WorkerOutcome::WorkerClosed,
            },
            _ = ticks.tick() => match heartbeat.on_tick() {
                HeartbeatVerdict::Ping => {
                    if transport.ping().await.is_err() {
                        return WorkerOutcome::Failed;
                    }
                }
                HeartbeatVerdict::TimedOut => {
                    transport.close(close_code::GOING_AWAY, "heartbeat timeout").await;
                    return WorkerOutcome::HeartbeatTimeout;
                }
            },
            () = ctx.shutdown.cancelled() => {
                transport.close(close_code::GOING_AWAY, "server shutting down").await;
                return WorkerOutcome::Shutdown;
            },
        }
    }
}

/// Serve a worker's relay connection for the client on `client_channel`.
///
/// Announces the pairing to the client, then relays frames both ways until
/// either side disconnects. Whichever side ends first, the other is told.
#[instrument(skip_all, fields(client_channel = %client_channel, worker_channel = tracing::field::Empty))]
pub async fn run_worker_relay<T: FrameTransport>(
    ctx: &BrokerContext,
    client_channel: ChannelName,
    transport: &mut T,
) -> WorkerOutcome {
    let mut sub = match ctx.layer.new_channel(WORKER_CHANNEL_PREFIX) {
        Ok(sub) => sub,
        Err(e) => {
            warn!(error = %e, "failed to allocate worker channel");
            transport.close(close_code::INTERNAL_ERROR, "internal error").await;
            return WorkerOutcome::Failed;
        }
    };
    let _ = tracing::Span::current().record("worker_channel", tracing::field::display(sub.name()));

    let paired = FabricMessage::Paired {
        client_channel: client_channel.clone(),
        worker_channel: sub.name().clone(),
    };
    if let Err(e) = ctx.layer.send(&client_channel, paired) {
        info!(error = %e, "claimed client is gone");
        transport.close(close_code::NORMAL, "client gone").await;
        return WorkerOutcome::ClientGone;
    }
    debug!("pairing announced");

    let mut heartbeat = Heartbeat::new(ctx.config.heartbeat_interval, ctx.config.heartbeat_timeout);
    let mut ticks = heartbeat.ticker();
    loop {
        tokio::select! {
            event = transport.recv() => match event {
                Some(TransportEvent::Frame(frame)) => {
                    heartbeat.on_activity();
                    forward(&ctx.layer, &client_channel, frame, "to_client");
                }
                Some(TransportEvent::Pong) => heartbeat.on_activity(),
                None => {
                    debug!("worker transport closed");
                    notify_peer(&ctx.layer, Some(client_channel), None);
                    return WorkerOutcome::WorkerClosed;
                }
            },
            message = sub.recv() => match message {
                Some(FabricMessage::Data { frame }) => {
                    if transport.send(frame).await.is_err() {
                        notify_peer(&ctx.layer, Some(client_channel), None);
                        return WorkerOutcome::Failed;
                    }
                }
                Some(FabricMessage::Disconnect { reason }) => {
                    debug!(reason = reason.as_deref().unwrap_or("none"), "client side disconnected");
                    transport
                        .close(close_code::NORMAL, reason.as_deref().unwrap_or_default())
                        .await;
                    return WorkerOutcome::Disconnected { reason };
                }
                Some(other) => debug!(kind = other.kind(), "ignoring message on worker channel"),
                None => return WorkerOutcome::Shutdown,
            },
            _ = ticks.tick() => match heartbeat.on_tick() {
                HeartbeatVerdict::Ping => {
                    if transport.ping().await.is_err() {
                        notify_peer(&ctx.layer, Some(client_channel), None);
                        return WorkerOutcome::Failed;
                    }
                }
                HeartbeatVerdict::TimedOut => {
                    warn!("worker unresponsive, disconnecting");
                    transport.close(close_code::GOING_AWAY, "heartbeat timeout").await;
                    notify_peer(&ctx.layer, Some(client_channel), None);
                    return WorkerOutcome::HeartbeatTimeout;
                }
            },
            () = ctx.shutdown.cancelled() => {
                transport.close(close_code::GOING_AWAY, "server shutting down").await;
                notify_peer(&ctx.layer, Some(client_channel), None);
                return WorkerOutcome::Shutdown;
            },
        }
    }
}
