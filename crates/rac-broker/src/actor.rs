//! Client session task: allocate a channel, offer, pair, relay, tear down.

use metrics::{counter, histogram};
use rac_core::{ChannelName, FabricMessage, Frame, PairOffer, SessionParams};
use rac_fabric::{ChannelLayer, GroupName, Subscription};
use tokio::time::Instant;
use tracing::{debug, error, field, info, instrument, trace, warn};

use crate::context::BrokerContext;
use crate::errors::BrokerError;
use crate::heartbeat::{Heartbeat, HeartbeatVerdict};
use crate::metrics::{
    RAC_FRAMES_DROPPED_TOTAL, RAC_FRAMES_RELAYED_TOTAL, RAC_OFFERS_SENT_TOTAL,
    RAC_PAIR_DURATION_SECONDS, RAC_PAIR_FAILURES_TOTAL, RAC_SESSION_DURATION_SECONDS,
    RAC_SESSIONS_TOTAL,
};
use crate::selector::select_candidates;
use crate::session::{ClientFrameAction, ClientSession, FabricAction, IgnoreReason};
use crate::transport::{FrameTransport, TransportEvent, close_code};

/// Prefix of client channel names.
pub const CLIENT_CHANNEL_PREFIX: &str = "rac_client";

/// Close reason when no worker claims a session.
pub const NO_INSTANCE_REASON: &str = "no instance available";

/// Disconnect reason sent to a worker whose claim lost the race.
pub const LATE_CLAIM_REASON: &str = "already paired";

/// How a client session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The client disconnected.
    ClientClosed,
    /// A disconnect arrived from the worker or a session teardown.
    Disconnected {
        /// Reason carried by the disconnect.
        reason: Option<String>,
    },
    /// No instance could be offered the session.
    NoCandidate,
    /// Nobody claimed the session before the deadline.
    PairTimeout,
    /// The client stopped answering pings.
    HeartbeatTimeout,
    /// The process is shutting down.
    Shutdown,
    /// Writing to the client failed, or the channel could not be set up.
    Failed,
}

impl SessionOutcome {
    /// Stable label for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::Disconnected { .. } => "disconnected",
            Self::NoCandidate => "no_candidate",
            Self::PairTimeout => "pair_timeout",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Shutdown => "shutdown",
            Self::Failed => "failed",
        }
    }
}

/// Run one client session to completion.
///
/// `params` come from a token that was already resolved, so the transport
/// is live. The session joins the global client group and its session
/// group, offers itself to one instance per outpost, and then relays frames
/// once a worker claims it. All group memberships are released on return.
#[instrument(
    skip_all,
    fields(
        session = %params.session,
        provider = %params.provider,
        endpoint = %params.endpoint_name,
        client_channel = field::Empty,
    )
)]
pub async fn run_client_session<T: FrameTransport>(
    ctx: &BrokerContext,
    params: SessionParams,
    transport: &mut T,
) -> SessionOutcome {
    let started = Instant::now();
    let mut sub = match ctx.layer.new_channel(CLIENT_CHANNEL_PREFIX) {
        Ok(sub) => sub,
        Err(e) => {
            error!(error = %e, "failed to allocate client channel");
            transport.close(close_code::INTERNAL_ERROR, "internal error").await;
            return SessionOutcome::Failed;
        }
    };
    let _ = tracing::Span::current().record("client_channel", field::display(sub.name()));
    let _active = ctx.stats.track_active();
    counter!(RAC_SESSIONS_TOTAL).increment(1);
    info!("client connected");

    if let Err(e) = ctx.layer.group_add(&GroupName::rac_clients(), sub.name()) {
        warn!(error = %e, "failed to join client group");
    }
    // Without the session group a logout could never reach this connection.
    if let Err(e) = ctx.layer.group_add(&GroupName::rac_session(&params.session), sub.name()) {
        error!(error = %e, "failed to join session group");
        transport.close(close_code::INTERNAL_ERROR, "internal error").await;
        return finish(started, SessionOutcome::Failed);
    }

    let mut session = ClientSession::new(sub.name().clone());
    match broadcast_offers(ctx, &params, session.channel()).await {
        Ok(targets) => debug!(targets, "pair offers sent"),
        Err(BrokerError::NoCandidateInstance(_)) if ctx.config.fail_fast_without_instances => {
            counter!(RAC_PAIR_FAILURES_TOTAL, "cause" => "no_candidate").increment(1);
            info!("no worker instance available");
            transport
                .close(close_code::TRY_AGAIN_LATER, NO_INSTANCE_REASON)
                .await;
            let _ = session.close();
            return finish(started, SessionOutcome::NoCandidate);
        }
        Err(e) => warn!(error = %e, "no pair offer sent"),
    }
    session.offers_sent();

    let outcome = relay(ctx, &mut session, &mut sub, transport, started).await;
    finish(started, outcome)
}

fn finish(started: Instant, outcome: SessionOutcome) -> SessionOutcome {
    histogram!(RAC_SESSION_DURATION_SECONDS, "outcome" => outcome.as_str())
        .record(started.elapsed().as_secs_f64());
    info!(outcome = outcome.as_str(), "client session ended");
    outcome
}

async fn broadcast_offers(
    ctx: &BrokerContext,
    params: &SessionParams,
    client_channel: &ChannelName,
) -> Result<usize, BrokerError> {
    let targets = select_candidates(ctx.directory.as_ref(), &params.provider).await?;
    let offer = FabricMessage::PairOffer(PairOffer {
        client_channel: client_channel.clone(),
        params: params.settings.clone(),
        protocol: params.protocol,
        hints: params.hints.clone(),
    });
    for target in &targets {
        let delivered = ctx.layer.group_send(&target.group(), &offer);
        debug!(
            outpost = %target.outpost,
            instance = %target.instance,
            load = target.active_connections,
            delivered,
            "pair offer broadcast"
        );
        counter!(RAC_OFFERS_SENT_TOTAL).increment(delivered as u64);
    }
    Ok(targets.len())
}

async fn relay<T: FrameTransport>(
    ctx: &BrokerContext,
    session: &mut ClientSession,
    sub: &mut Subscription,
    transport: &mut T,
    started: Instant,
) -> SessionOutcome {
    let mut heartbeat = Heartbeat::new(ctx.config.heartbeat_interval, ctx.config.heartbeat_timeout);
    let mut ticks = heartbeat.ticker();
    let pair_deadline = ctx.config.pair_timeout.map(|t| Instant::now() + t);
    let mut paired = None;

    loop {
        tokio::select! {
            event = transport.recv() => match event {
                Some(TransportEvent::Frame(frame)) => {
                    heartbeat.on_activity();
                    match session.on_client_frame(frame) {
                        ClientFrameAction::Forward { to, frame } => {
                            forward(&ctx.layer, &to, frame, "to_worker");
                        }
                        ClientFrameAction::Discard(frame) => {
                            counter!(RAC_FRAMES_DROPPED_TOTAL, "direction" => "to_worker", "reason" => "unpaired")
                                .increment(1);
                            trace!(len = frame.len(), "frame discarded before pairing");
                        }
                    }
                }
                Some(TransportEvent::Pong) => heartbeat.on_activity(),
                None => {
                    debug!("client transport closed");
                    notify_peer(&ctx.layer, session.on_client_closed(), None);
                    return SessionOutcome::ClientClosed;
                }
            },
            message = sub.recv() => {
                let Some(message) = message else {
                    transport.close(close_code::GOING_AWAY, "server shutting down").await;
                    notify_peer(&ctx.layer, session.close(), None);
                    return SessionOutcome::Shutdown;
                };
                match session.on_fabric(message) {
                    FabricAction::Deliver(frame) => {
                        if let Err(e) = transport.send(frame).await {
                            debug!(error = %e, "client write failed");
                            notify_peer(&ctx.layer, session.close(), None);
                            return SessionOutcome::Failed;
                        }
                    }
                    FabricAction::Bound(worker) => {
                        histogram!(RAC_PAIR_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
                        info!(worker_channel = %worker, "session paired");
                        paired = Some(ctx.stats.track_paired());
                    }
                    FabricAction::Ignore(IgnoreReason::AlreadyPaired { worker }) => {
                        debug!(worker_channel = %worker, "late claim rejected");
                        notify_peer(&ctx.layer, Some(worker), Some(LATE_CLAIM_REASON));
                    }
                    FabricAction::Ignore(reason) => {
                        debug!(?reason, "fabric message ignored");
                    }
                    FabricAction::Close { reason, notify } => {
                        info!(reason = reason.as_deref().unwrap_or("none"), "disconnect received");
                        transport
                            .close(close_code::NORMAL, reason.as_deref().unwrap_or_default())
                            .await;
                        notify_peer(&ctx.layer, notify, reason.as_deref());
                        drop(paired);
                        return SessionOutcome::Disconnected { reason };
                    }
                }
            },
            () = wait_until(pair_deadline), if session.is_awaiting_pair() => {
                counter!(RAC_PAIR_FAILURES_TOTAL, "cause" => "timeout").increment(1);
                info!("no worker claimed the session before the deadline");
                transport
                    .close(close_code::TRY_AGAIN_LATER, NO_INSTANCE_REASON)
                    .await;
                let _ = session.close();
                return SessionOutcome::PairTimeout;
            },
            _ = ticks.tick() => match heartbeat.on_tick() {
                HeartbeatVerdict::Ping => {
                    if transport.ping().await.is_err() {
                        notify_peer(&ctx.layer, session.close(), None);
                        return SessionOutcome::Failed;
                    }
                }
                HeartbeatVerdict::TimedOut => {
                    warn!("client unresponsive, disconnecting");
                    transport.close(close_code::GOING_AWAY, "heartbeat timeout").await;
                    notify_peer(&ctx.layer, session.close(), None);
                    return SessionOutcome::HeartbeatTimeout;
                }
            },
            () = ctx.shutdown.cancelled() => {
                transport.close(close_code::GOING_AWAY, "server shutting down").await;
                notify_peer(&ctx.layer, session.close(), None);
                return SessionOutcome::Shutdown;
            },
        }
    }
}

/// Hand `frame` to `to`, dropping it if the channel is full or gone.
pub(crate) fn forward(layer: &ChannelLayer, to: &ChannelName, frame: Frame, direction: &'static str) {
    match layer.send(to, FabricMessage::data(frame)) {
        Ok(()) => counter!(RAC_FRAMES_RELAYED_TOTAL, "direction" => direction).increment(1),
        Err(e) => {
            let reason = if e.is_full() { "full" } else { "unreachable" };
            counter!(RAC_FRAMES_DROPPED_TOTAL, "direction" => direction, "reason" => reason)
                .increment(1);
            debug!(destination = %to, error = %e, "frame dropped");
        }
    }
}

/// Best-effort disconnect to the other side of a pairing.
pub(crate) fn notify_peer(layer: &ChannelLayer, peer: Option<ChannelName>, reason: Option<&str>) {
    let Some(peer) = peer else { return };
    if let Err(e) = layer.send(&peer, FabricMessage::disconnect(reason)) {
        debug!(channel = %peer, error = %e, "disconnect not delivered");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionConfig;
    use crate::directory::InstanceDirectory;
    use crate::teardown::SessionTeardown;
    use crate::testing::{Sent, context, fake_transport, next_message, params};
    use bytes::Bytes;
    use rac_core::Protocol;
    use std::time::Duration;

    fn bin(b: &'static [u8]) -> Frame {
        Frame::Binary(Bytes::from_static(b))
    }

    fn instance_group(uid: &str) -> GroupName {
        GroupName::outpost_instance(&"op".into(), &uid.into())
    }

    /// Subscribe a stand-in for a worker's control connection.
    fn worker_listener(ctx: &BrokerContext, uid: &str) -> Subscription {
        let sub = ctx.layer.new_channel("ctl").unwrap();
        ctx.layer.group_add(&instance_group(uid), sub.name()).unwrap();
        sub
    }

    fn client_channel_of(offer: &FabricMessage) -> ChannelName {
        match offer {
            FabricMessage::PairOffer(o) => o.client_channel.clone(),
            other => panic!("expected offer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pairs_relays_and_propagates_disconnect() {
        let (ctx, dir) = context(SessionConfig::default());
        dir.register(&"op".into(), &"I1".into()).await.unwrap();
        let mut ctl = worker_listener(&ctx, "I1");

        let (mut transport, mut client) = fake_transport();
        let task_ctx = ctx.clone();
        let task = tokio::spawn(async move {
            run_client_session(&task_ctx, params("s1"), &mut transport).await
        });

        let offer = next_message(&mut ctl).await;
        let FabricMessage::PairOffer(ref body) = offer else {
            panic!("expected offer");
        };
        assert_eq!(body.protocol, Protocol::Rdp);
        assert_eq!(body.params["hostname"], "10.0.0.5");
        let client_channel = client_channel_of(&offer);

        let mut worker = ctx.layer.new_channel("rac_worker").unwrap();
        ctx.layer
            .send(
                &client_channel,
                FabricMessage::Paired {
                    client_channel: client_channel.clone(),
                    worker_channel: worker.name().clone(),
                },
            )
            .unwrap();
        ctx.layer
            .send(&client_channel, FabricMessage::data(Frame::Text("t1".into())))
            .unwrap();
        assert_eq!(client.next().await, Sent::Frame(Frame::Text("t1".into())));
        assert_eq!(ctx.stats.paired(), 1);

        client.send(bin(b"b1"));
        assert_eq!(
            next_message(&mut worker).await,
            FabricMessage::data(bin(b"b1"))
        );

        drop(client.tx);
        assert_eq!(next_message(&mut worker).await, FabricMessage::disconnect(None));
        assert_eq!(task.await.unwrap(), SessionOutcome::ClientClosed);
        assert_eq!(ctx.stats.active(), 0);
        assert_eq!(ctx.stats.paired(), 0);
        assert_eq!(ctx.layer.group_len(&GroupName::rac_session(&"s1".into())), 0);
        assert_eq!(ctx.layer.group_len(&GroupName::rac_clients()), 0);
    }

    #[tokio::test]
    async fn frames_before_pairing_never_reach_the_worker() {
        let (ctx, dir) = context(SessionConfig::default());
        dir.register(&"op".into(), &"I1".into()).await.unwrap();
        let mut ctl = worker_listener(&ctx, "I1");

        let (mut transport, mut client) = fake_transport();
        // Queued before the session starts, so it is read while unpaired.
        client.send(bin(b"b0"));
        let task_ctx = ctx.clone();
        let task = tokio::spawn(async move {
            run_client_session(&task_ctx, params("s1"), &mut transport).await
        });

        let client_channel = client_channel_of(&next_message(&mut ctl).await);
        let mut worker = ctx.layer.new_channel("rac_worker").unwrap();
        ctx.layer
            .send(
                &client_channel,
                FabricMessage::Paired {
                    client_channel: client_channel.clone(),
                    worker_channel: worker.name().clone(),
                },
            )
            .unwrap();
        ctx.layer
            .send(&client_channel, FabricMessage::data(Frame::Text("sync".into())))
            .unwrap();
        assert_eq!(client.next().await, Sent::Frame(Frame::Text("sync".into())));

        client.send(bin(b"b1"));
        client.send(bin(b"b2"));
        assert_eq!(next_message(&mut worker).await, FabricMessage::data(bin(b"b1")));
        assert_eq!(next_message(&mut worker).await, FabricMessage::data(bin(b"b2")));

        drop(client.tx);
        assert_eq!(task.await.unwrap(), SessionOutcome::ClientClosed);
    }

    #[tokio::test]
    async fn offers_go_to_least_loaded_instance() {
        let (ctx, dir) = context(SessionConfig::default());
        dir.register(&"op".into(), &"I1".into()).await.unwrap();
        dir.register(&"op".into(), &"I2".into()).await.unwrap();
        assert!(dir.update_load(&"op".into(), &"I1".into(), 3).await);
        assert!(dir.update_load(&"op".into(), &"I2".into(), 1).await);
        let mut i1 = worker_listener(&ctx, "I1");
        let mut i2 = worker_listener(&ctx, "I2");

        let (mut transport, client) = fake_transport();
        let task_ctx = ctx.clone();
        let task = tokio::spawn(async move {
            run_client_session(&task_ctx, params("s1"), &mut transport).await
        });

        let _ = client_channel_of(&next_message(&mut i2).await);
        assert!(i1.try_recv().is_none());

        drop(client);
        assert_eq!(task.await.unwrap(), SessionOutcome::ClientClosed);
    }

    #[tokio::test]
    async fn cross_talk_and_late_claims_are_ignored() {
        let (ctx, dir) = context(SessionConfig::default());
        dir.register(&"op".into(), &"I1".into()).await.unwrap();
        let mut ctl = worker_listener(&ctx, "I1");

        let (mut transport, mut client) = fake_transport();
        let task_ctx = ctx.clone();
        let task = tokio::spawn(async move {
            run_client_session(&task_ctx, params("s1"), &mut transport).await
        });
        let client_channel = client_channel_of(&next_message(&mut ctl).await);

        let mut stray = ctx.layer.new_channel("rac_worker").unwrap();
        let mut first = ctx.layer.new_channel("rac_worker").unwrap();
        let mut late = ctx.layer.new_channel("rac_worker").unwrap();
        for (named, worker) in [
            ("rac_client.someone_else", &stray),
            (client_channel.as_str(), &first),
            (client_channel.as_str(), &late),
        ] {
            ctx.layer
                .send(
                    &client_channel,
                    FabricMessage::Paired {
                        client_channel: named.into(),
                        worker_channel: worker.name().clone(),
                    },
                )
                .unwrap();
        }
        ctx.layer
            .send(&client_channel, FabricMessage::data(Frame::Text("ok".into())))
            .unwrap();
        assert_eq!(client.next().await, Sent::Frame(Frame::Text("ok".into())));

        assert_eq!(
            next_message(&mut late).await,
            FabricMessage::disconnect(Some(LATE_CLAIM_REASON))
        );
        client.send(bin(b"x"));
        assert_eq!(next_message(&mut first).await, FabricMessage::data(bin(b"x")));
        assert!(stray.try_recv().is_none());

        drop(client.tx);
        assert_eq!(task.await.unwrap(), SessionOutcome::ClientClosed);
    }

    #[tokio::test]
    async fn fails_fast_without_instances() {
        let (ctx, _dir) = context(SessionConfig::default());
        let (mut transport, mut client) = fake_transport();
        let outcome = run_client_session(&ctx, params("s1"), &mut transport).await;
        assert_eq!(outcome, SessionOutcome::NoCandidate);
        assert_eq!(
            client.next().await,
            Sent::Close(close_code::TRY_AGAIN_LATER, NO_INSTANCE_REASON.into())
        );
        assert_eq!(ctx.layer.channel_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pair_deadline_closes_with_try_again_later() {
        let config = SessionConfig {
            pair_timeout: Some(Duration::from_secs(5)),
            fail_fast_without_instances: false,
            ..SessionConfig::default()
        };
        let (ctx, _dir) = context(config);
        let (mut transport, mut client) = fake_transport();

        let start = Instant::now();
        let outcome = run_client_session(&ctx, params("s1"), &mut transport).await;
        assert_eq!(outcome, SessionOutcome::PairTimeout);
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(
            client.next().await,
            Sent::Close(close_code::TRY_AGAIN_LATER, NO_INSTANCE_REASON.into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_client_times_out() {
        let config = SessionConfig {
            pair_timeout: None,
            fail_fast_without_instances: false,
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(3),
        };
        let (ctx, _dir) = context(config);
        let (mut transport, mut client) = fake_transport();

        let outcome = run_client_session(&ctx, params("s1"), &mut transport).await;
        assert_eq!(outcome, SessionOutcome::HeartbeatTimeout);
        assert_eq!(
            client.next().await,
            Sent::Close(close_code::GOING_AWAY, "heartbeat timeout".into())
        );
    }

    #[tokio::test]
    async fn teardown_closes_only_that_sessions_clients() {
        let config = SessionConfig {
            pair_timeout: None,
            fail_fast_without_instances: false,
            ..SessionConfig::default()
        };
        let (ctx, _dir) = context(config);
        let mut clients = Vec::new();
        let mut tasks = Vec::new();
        for session in ["s1", "s1", "s2"] {
            let (mut transport, client) = fake_transport();
            let task_ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                run_client_session(&task_ctx, params(session), &mut transport).await
            }));
            clients.push(client);
        }
        let s1 = GroupName::rac_session(&"s1".into());
        while ctx.layer.group_len(&s1) < 2 || ctx.layer.group_len(&GroupName::rac_clients()) < 3 {
            tokio::task::yield_now().await;
        }

        let teardown = SessionTeardown::new(ctx.layer.clone());
        assert_eq!(teardown.end_session(&"s1".into(), "logout"), 2);

        let survivor = tasks.pop().unwrap();
        for task in tasks {
            assert_eq!(
                task.await.unwrap(),
                SessionOutcome::Disconnected {
                    reason: Some("logout".into())
                }
            );
        }
        for client in &mut clients[..2] {
            assert_eq!(
                client.next().await,
                Sent::Close(close_code::NORMAL, "logout".into())
            );
        }
        assert!(!survivor.is_finished());
        assert!(clients[2].rx.try_recv().is_err());

        ctx.shutdown.cancel();
        assert_eq!(survivor.await.unwrap(), SessionOutcome::Shutdown);
    }

    #[tokio::test]
    async fn teardown_reaches_sessions_with_opaque_keys() {
        let config = SessionConfig {
            pair_timeout: None,
            fail_fast_without_instances: false,
            ..SessionConfig::default()
        };
        let (ctx, _dir) = context(config);
        let long_key = format!("user:{}", "x".repeat(120));
        let teardown = SessionTeardown::new(ctx.layer.clone());

        for key in ["user:42", long_key.as_str()] {
            let (mut transport, mut client) = fake_transport();
            let task_ctx = ctx.clone();
            let task_key = key.to_owned();
            let task = tokio::spawn(async move {
                run_client_session(&task_ctx, params(&task_key), &mut transport).await
            });
            let group = GroupName::rac_session(&key.into());
            while ctx.layer.group_len(&group) == 0 {
                assert!(!task.is_finished(), "session ended before joining its group");
                tokio::task::yield_now().await;
            }

            assert_eq!(teardown.end_session(&key.into(), "logout"), 1);
            assert_eq!(
                client.next().await,
                Sent::Close(close_code::NORMAL, "logout".into())
            );
            assert_eq!(
                task.await.unwrap(),
                SessionOutcome::Disconnected {
                    reason: Some("logout".into())
                }
            );
        }
    }

    #[tokio::test]
    async fn worker_disconnect_closes_client() {
        let (ctx, dir) = context(SessionConfig::default());
        dir.register(&"op".into(), &"I1".into()).await.unwrap();
        let mut ctl = worker_listener(&ctx, "I1");
        let (mut transport, mut client) = fake_transport();
        let task_ctx = ctx.clone();
        let task = tokio::spawn(async move {
            run_client_session(&task_ctx, params("s1"), &mut transport).await
        });
        let client_channel = client_channel_of(&next_message(&mut ctl).await);
        let worker = ctx.layer.new_channel("rac_worker").unwrap();
        ctx.layer
            .send(
                &client_channel,
                FabricMessage::Paired {
                    client_channel: client_channel.clone(),
                    worker_channel: worker.name().clone(),
                },
            )
            .unwrap();
        ctx.layer
            .send(&client_channel, FabricMessage::disconnect(None))
            .unwrap();

        assert_eq!(client.next().await, Sent::Close(close_code::NORMAL, String::new()));
        assert_eq!(
            task.await.unwrap(),
            SessionOutcome::Disconnected { reason: None }
        );
    }
}
