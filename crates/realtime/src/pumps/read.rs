//! Channel read pump — parses inbound envelopes and dispatches them.
//!
//! Pongs are routed to the health monitor and never reach subscribers.
//! Refreshed-token responses are routed to the refresh scheduler and then
//! dispatched normally. Everything else goes straight to the registry.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use huntboard_protocol::{Envelope, MessageKind, RefreshedTokenResponse};

use crate::manager::Shared;
use crate::pumps::Outbound;
use crate::reconnection;

/// Reads frames until the stream ends, errors, or the connection is
/// cancelled, then settles the close through the reconnection machinery.
pub(crate) async fn read_pump<S>(
    mut read: S,
    shared: Arc<Shared>,
    write_tx: mpsc::Sender<Outbound>,
    conn_cancel: CancellationToken,
    session_cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin + Send,
{
    loop {
        tokio::select! {
            _ = conn_cancel.cancelled() => break,

            msg = read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        handle_text(&shared, &text);
                    }
                    Some(Ok(tungstenite::Message::Ping(data))) => {
                        let _ = write_tx.send(Outbound::TransportPong(data)).await;
                    }
                    Some(Ok(tungstenite::Message::Close(_))) => {
                        debug!("received close frame");
                        break;
                    }
                    Some(Ok(_)) => {} // binary frames are not part of the protocol
                    Some(Err(e)) => {
                        warn!("channel read error: {e}");
                        break;
                    }
                    None => {
                        debug!("channel stream ended");
                        break;
                    }
                }
            }
        }
    }

    reconnection::handle_close(shared, session_cancel).await;
}

/// Parses and routes one inbound text frame.
///
/// A frame that fails to parse is logged and dropped; the connection is
/// unaffected.
pub(crate) fn handle_text(shared: &Shared, text: &str) {
    let envelope = match Envelope::from_wire(text) {
        Ok(env) => env,
        Err(e) => {
            warn!("dropping unparseable message: {e}");
            return;
        }
    };
    route_envelope(shared, &envelope);
}

/// Routes one inbound envelope, whichever transport delivered it.
pub(crate) fn route_envelope(shared: &Shared, envelope: &Envelope) {
    match envelope.message_kind() {
        MessageKind::Pong => {
            trace!("pong received");
            let pong_tx = shared.pong_tx.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(tx) = pong_tx.as_ref() {
                let _ = tx.try_send(());
            }
        }
        MessageKind::RefreshedToken => {
            match envelope.parse_data::<RefreshedTokenResponse>() {
                Ok(Some(resp)) => {
                    let route = shared
                        .refresh_route
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    if let Some(tx) = route.as_ref() {
                        let _ = tx.try_send(resp.token);
                    }
                }
                Ok(None) => warn!("refreshedToken without payload"),
                Err(e) => warn!("bad refreshedToken payload: {e}"),
            }
            shared.registry.dispatch(envelope);
        }
        // ping and refreshToken are client-to-server kinds; an inbound one
        // is treated like any other event.
        MessageKind::Ping | MessageKind::RefreshToken | MessageKind::Other(_) => {
            shared.registry.dispatch(envelope);
        }
    }
}
