//! Session establishment, queue flushing, and the reconnect loop.
//!
//! A "session" is everything between one successful channel open and its
//! close: the read/write pumps, the health monitor, and the refresh
//! scheduler, all hanging off one cancellation token. Abnormal closes flow
//! through the reconnection policy; intentional ones settle to Closed.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures_util::StreamExt as _;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::health;
use crate::manager::{ActiveConn, ConnectionState, ErrorSignal, Shared};
use crate::pumps;
use crate::refresh;

/// Errors from channel establishment.
///
/// Internal to the crate's recovery machinery; collaborators only ever see
/// these flattened into [`ErrorSignal::Transport`].
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("no credential bound to this session")]
    MissingToken,

    #[error("session superseded before the channel opened")]
    Superseded,
}

/// Opens the channel, starts the session tasks, and flushes the offline
/// queue before the manager transitions to Open.
///
/// `session_cancel` is the token of the session this attempt belongs to.
/// If that session is cancelled while the handshake is in flight — an
/// explicit `disconnect()` or a superseding `connect()` — the fresh socket
/// is dropped instead of installed, so the manager never owns two
/// connections.
pub(crate) async fn open_session(
    shared: &Arc<Shared>,
    session_cancel: CancellationToken,
) -> Result<(), ChannelError> {
    if session_cancel.is_cancelled() {
        return Err(ChannelError::Superseded);
    }
    let token = shared.current_token().ok_or(ChannelError::MissingToken)?;
    let url = shared.config.channel_url(&token);
    debug!("opening channel");

    let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await?;
    if session_cancel.is_cancelled() {
        return Err(ChannelError::Superseded);
    }
    let (write, read) = ws_stream.split();

    let conn_cancel = session_cancel.child_token();

    let (write_tx, write_rx) = mpsc::channel::<pumps::Outbound>(256);
    let (pong_tx, pong_rx) = mpsc::channel::<()>(8);
    let (refreshed_tx, refreshed_rx) = mpsc::channel::<String>(4);

    *shared.pong_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(pong_tx);
    *shared
        .refresh_route
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = Some(refreshed_tx);

    tokio::spawn(pumps::write::write_pump(
        write,
        write_rx,
        conn_cancel.clone(),
    ));
    tokio::spawn(pumps::read::read_pump(
        read,
        shared.clone(),
        write_tx.clone(),
        conn_cancel.clone(),
        session_cancel,
    ));
    tokio::spawn(health::health_pump(
        write_tx.clone(),
        pong_rx,
        shared.config.heartbeat_interval,
        shared.config.pong_timeout,
        conn_cancel.clone(),
    ));
    tokio::spawn(refresh::refresh_scheduler(
        shared.clone(),
        write_tx.clone(),
        refreshed_rx,
        conn_cancel.clone(),
    ));

    *shared.conn.lock().unwrap_or_else(|e| e.into_inner()) = Some(ActiveConn {
        write_tx: write_tx.clone(),
        cancel: conn_cancel,
    });

    // Queued messages go out strictly before anything sent after Open.
    flush_queue(shared, &write_tx).await;

    shared.attempts.store(0, Ordering::SeqCst);
    shared.set_state(ConnectionState::Open);
    shared.emit_connect();
    info!("channel open");
    Ok(())
}

/// Drains the offline queue oldest-first.
///
/// Each entry is removed only after its send is accepted; a failure leaves
/// the remainder queued for the next flush.
pub(crate) async fn flush_queue(shared: &Shared, write_tx: &mpsc::Sender<pumps::Outbound>) {
    let mut flushed = 0usize;
    while let Some(queued) = shared.queue.front() {
        if write_tx
            .send(pumps::Outbound::Message(queued.envelope))
            .await
            .is_err()
        {
            warn!(
                remaining = shared.queue.len(),
                "flush interrupted, messages stay queued"
            );
            return;
        }
        shared.queue.confirm_front();
        flushed += 1;
    }
    if flushed > 0 {
        info!(flushed, "offline queue flushed");
    }
}

/// Settles a closed channel.
///
/// Called by the read pump on exit. Intentional teardown (disconnect, or a
/// superseding `connect()`) is recognized by a cancelled session token and
/// does nothing further; anything else is an abnormal close and enters the
/// reconnect loop.
pub(crate) async fn handle_close(shared: Arc<Shared>, session_cancel: CancellationToken) {
    if let Some(conn) = shared
        .conn
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take()
    {
        conn.cancel.cancel();
    }
    *shared.pong_tx.lock().unwrap_or_else(|e| e.into_inner()) = None;
    *shared
        .refresh_route
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = None;
    shared.refresh_in_flight.store(false, Ordering::SeqCst);

    if session_cancel.is_cancelled() || shared.manual_disconnect.load(Ordering::SeqCst) {
        shared.set_state(ConnectionState::Closed);
        debug!("channel closed intentionally");
        return;
    }

    warn!("channel closed unexpectedly");
    if matches!(shared.state(), ConnectionState::Open) {
        shared.emit_disconnect();
    }
    reconnect_loop(shared, session_cancel).await;
}

/// Retries the connection with exponential backoff until it succeeds, the
/// session is cancelled, or the policy reports exhaustion.
///
/// Returns a boxed future: the loop re-enters `open_session`, whose read
/// pump awaits `handle_close`, which awaits this loop again. Type-erasing
/// this edge keeps the task futures finite for the spawner.
pub(crate) fn reconnect_loop(
    shared: Arc<Shared>,
    cancel: CancellationToken,
) -> BoxFuture<'static, ()> {
    Box::pin(reconnect_loop_inner(shared, cancel))
}

async fn reconnect_loop_inner(shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            debug!("reconnect cancelled");
            return;
        }

        let attempt = shared.attempts.load(Ordering::SeqCst);
        if shared.policy.is_exhausted(attempt) {
            shared.set_state(ConnectionState::Closed);
            if !shared.exhausted_reported.swap(true, Ordering::SeqCst) {
                warn!(attempts = attempt, "reconnect attempts exhausted");
                shared.emit_error(&ErrorSignal::Exhausted { attempts: attempt });
            }
            return;
        }

        let delay = shared.policy.next_delay(attempt);
        shared.set_state(ConnectionState::Reconnecting {
            attempt: attempt + 1,
        });
        info!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "reconnecting"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("reconnect cancelled during backoff");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        match open_session(&shared, cancel.clone()).await {
            Ok(()) => return,
            Err(ChannelError::Superseded) => {
                debug!("reconnect superseded by a newer session");
                return;
            }
            Err(e) => {
                shared.attempts.fetch_add(1, Ordering::SeqCst);
                warn!(attempt = attempt + 1, error = %e, "reconnect attempt failed");
                shared.emit_error(&ErrorSignal::Transport(e.to_string()));
            }
        }
    }
}
