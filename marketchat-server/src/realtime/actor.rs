use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::ws::{Message as WsMessage, WebSocket},
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use shared::{config::server::RealtimeConfig, models::ServerFrame};
use tokio::{
    sync::mpsc,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::ChatError,
    realtime::{registry::ConnectionHandle, session::ConnectionSession},
    services::delivery_service::DeliveryService,
};

/// Socket timing knobs taken from [`RealtimeConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SocketSettings {
    pub outbound_buffer: usize,
    pub write_timeout: Duration,
    pub heartbeat: Duration,
    pub require_authenticated: bool,
}

impl From<&RealtimeConfig> for SocketSettings {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            outbound_buffer: config.outbound_buffer,
            write_timeout: Duration::from_millis(config.write_timeout_ms),
            heartbeat: Duration::from_secs(config.heartbeat_seconds.max(1)),
            require_authenticated: config.require_authenticated_upgrade,
        }
    }
}

/// Drives one upgraded socket until either side goes away. The reader applies
/// frames through a [`ConnectionSession`]; a separate writer drains the
/// connection's bounded queue and sends heartbeats.
pub async fn run_connection(
    socket: WebSocket,
    delivery: Arc<DeliveryService>,
    settings: SocketSettings,
    authenticated: Option<Uuid>,
) {
    let (handle, outbound) = ConnectionHandle::channel(settings.outbound_buffer);
    let connection_id = handle.id();
    let (sink, stream) = socket.split();
    let shutdown = CancellationToken::new();

    debug!(connection_id = %connection_id, user_id = ?authenticated, "socket opened");

    let writer = tokio::spawn(write_loop(sink, outbound, settings, shutdown.clone()));

    let mut session = ConnectionSession::new(
        delivery,
        handle,
        authenticated,
        settings.require_authenticated,
    );
    read_loop(stream, &mut session, &shutdown).await;

    session.close().await;
    shutdown.cancel();
    if let Err(err) = writer.await {
        warn!(connection_id = %connection_id, error = %err, "socket writer task failed");
    }
    debug!(connection_id = %connection_id, "socket finished");
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    session: &mut ConnectionSession,
    shutdown: &CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => session.handle_text(text.as_str()).await,
                Some(Ok(WsMessage::Binary(_))) => session.report(
                    None,
                    &ChatError::bad_request("binary frames are not supported"),
                ),
                Some(Ok(WsMessage::Close(_))) | None => break,
                // Pongs need no handling; pings are answered by the socket.
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                Some(Err(err)) => {
                    debug!(connection_id = %session.connection().id(), error = %err, "socket read failed");
                    break;
                }
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<ServerFrame>,
    settings: SocketSettings,
    shutdown: CancellationToken,
) {
    let mut heartbeat = time::interval_at(Instant::now() + settings.heartbeat, settings.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            () = shutdown.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => match serde_json::to_string(&frame) {
                    Ok(json) => WsMessage::Text(json.into()),
                    Err(err) => {
                        warn!(event = frame.event(), error = %err, "failed to encode outbound frame");
                        continue;
                    }
                },
                None => break,
            },
            _ = heartbeat.tick() => WsMessage::Ping(Bytes::new()),
        };

        match time::timeout(settings.write_timeout, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(error = %err, "socket write failed");
                break;
            }
            Err(_) => {
                warn!(
                    timeout_ms = settings.write_timeout.as_millis() as u64,
                    "socket write timed out; closing connection"
                );
                break;
            }
        }
    }

    // Stops the reader when the writer is the side that failed.
    shutdown.cancel();
    let _ = sink.close().await;
}
