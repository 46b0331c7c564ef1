//! Session lifecycle, from upgrade to disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use printfleet_core::SessionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use super::broadcast::SessionRegistry;
use super::connection::Session;
use super::handler::handle_message;
use crate::dispatch::ActionRegistry;
use crate::metrics::{WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Writer time allowed to flush and send the close frame on exit.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Next heartbeat tick. Never resolves when heartbeats are off.
async fn next_ping(ping: Option<&mut tokio::time::Interval>) {
    match ping {
        Some(ping) => {
            let _ = ping.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Per-session transport settings.
#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    /// Bound of the outbound queue.
    pub outbound_queue_capacity: usize,
    /// Ping period. Zero turns pings off.
    pub heartbeat_interval: Duration,
}

/// Shared pieces every session needs.
pub struct SessionContext<S> {
    /// Actions served to the session.
    pub actions: Arc<ActionRegistry<S>>,
    /// Registry the session joins while connected.
    pub sessions: Arc<SessionRegistry<S>>,
    /// Transport settings.
    pub options: SessionOptions,
    /// Server shutdown.
    pub shutdown: CancellationToken,
}

/// Run one client session.
///
/// Text frames are handled in arrival order on this task. Replies and
/// pushes go through the session's outbound queue to a writer task that
/// also sends heartbeat pings. The session is deregistered on exit,
/// whatever the cause.
#[instrument(skip_all, fields(session_id = %id))]
pub async fn run_session<S: Send + Sync + 'static>(socket: WebSocket, id: SessionId, state: S, ctx: SessionContext<S>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Arc<str>>(ctx.options.outbound_queue_capacity.max(1));
    let session = Arc::new(Session::new(id.clone(), out_tx, state));
    ctx.sessions.insert(Arc::clone(&session));

    let started = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let closed = session.closed_token();
    let heartbeat = ctx.options.heartbeat_interval;
    let writer = tokio::spawn(async move {
        let mut ping = (!heartbeat.is_zero())
            .then(|| tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat));
        loop {
            tokio::select! {
                biased;
                () = closed.cancelled() => {
                    while let Ok(text) = out_rx.try_recv() {
                        if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                    let _ = ws_tx.send(Message::Close(None)).await;
                    let _ = ws_tx.close().await;
                    break;
                }
                next = out_rx.recv() => {
                    let Some(text) = next else { break };
                    if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
                        break;
                    }
                }
                () = next_ping(ping.as_mut()) => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        trace!("writer finished");
    });

    let closed = session.closed_token();
    loop {
        let frame = tokio::select! {
            () = ctx.shutdown.cancelled() => break,
            () = closed.cancelled() => break,
            frame = ws_rx.next() => frame,
        };
        let message = match frame {
            Some(Ok(message)) => message,
            Some(Err(error)) => {
                debug!(%error, "receive failed");
                break;
            }
            None => break,
        };
        session.touch();
        match message {
            Message::Text(text) => {
                if let Some(reply) = handle_message(text.as_str(), &ctx.actions, &session).await {
                    let queued = tokio::select! {
                        () = ctx.shutdown.cancelled() => false,
                        queued = session.reply(reply.into()) => queued,
                    };
                    if !queued {
                        debug!("session closed before reply was queued");
                        break;
                    }
                }
            }
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    let _ = ctx.sessions.remove(session.id());
    session.close();
    let abort = writer.abort_handle();
    if tokio::time::timeout(CLOSE_GRACE, writer).await.is_err() {
        debug!("writer did not finish in time");
        abort.abort();
    }

    info!(dropped = session.drop_count(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}
