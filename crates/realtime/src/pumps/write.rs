//! Channel write pump.
//!
//! Everything the session sends funnels through one queue of [`Outbound`]
//! items; envelopes are serialized here, right before transmission, so no
//! other component touches raw frames.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use huntboard_protocol::Envelope;

/// An item queued for the write side of the channel.
pub(crate) enum Outbound {
    /// An envelope, serialized at the pump.
    Message(Envelope),
    /// Reply to a transport-level ping.
    TransportPong(tungstenite::Bytes),
}

/// Drains the outbound queue into the sink until cancelled or the sink
/// fails, then sends a close frame.
///
/// An envelope that fails to serialize is dropped with a warning; the
/// connection is unaffected.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            out = write_rx.recv() => {
                let Some(out) = out else { break };
                let frame = match out {
                    Outbound::Message(envelope) => match envelope.to_wire() {
                        Ok(text) => tungstenite::Message::Text(text.into()),
                        Err(e) => {
                            warn!(kind = %envelope.kind, "dropping unserializable message: {e}");
                            continue;
                        }
                    },
                    Outbound::TransportPong(data) => tungstenite::Message::Pong(data),
                };
                if let Err(e) = write.send(frame).await {
                    error!("channel write error: {e}");
                    break;
                }
            }
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}
