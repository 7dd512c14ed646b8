//! Heartbeat-based liveness detection.
//!
//! While the channel is open, a `{"type":"ping"}` envelope goes out every
//! heartbeat interval and arms a pong timeout. A pong cancels that cycle's
//! timeout; a timeout forces the connection closed, which flows into the
//! reconnection policy exactly like any other abnormal close.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use huntboard_protocol::{Envelope, MessageKind};

use crate::pumps::Outbound;

/// Sends periodic pings and force-closes the connection on a missed pong.
///
/// Stops when the connection token is cancelled, so an intentional
/// disconnect leaves no heartbeat or timeout timer behind.
pub(crate) async fn health_pump(
    write_tx: mpsc::Sender<Outbound>,
    mut pong_rx: mpsc::Receiver<()>,
    heartbeat_interval: Duration,
    pong_timeout: Duration,
    conn_cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(heartbeat_interval);
    interval.tick().await; // skip immediate first tick

    loop {
        tokio::select! {
            _ = conn_cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        // A pong left over from an earlier cycle must not satisfy this one.
        while pong_rx.try_recv().is_ok() {}

        let ping = Envelope::control(MessageKind::Ping);
        if write_tx.send(Outbound::Message(ping)).await.is_err() {
            return;
        }
        trace!("ping sent");

        tokio::select! {
            _ = conn_cancel.cancelled() => return,
            pong = pong_rx.recv() => {
                match pong {
                    Some(()) => trace!("liveness confirmed"),
                    None => return,
                }
            }
            _ = tokio::time::sleep(pong_timeout) => {
                warn!(
                    timeout_ms = pong_timeout.as_millis() as u64,
                    "no pong before timeout, forcing close"
                );
                conn_cancel.cancel();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_ping(out: &Outbound) -> bool {
        matches!(out, Outbound::Message(env) if env.kind == "ping" && env.data.is_none())
    }

    #[tokio::test(start_paused = true)]
    async fn missed_pong_forces_close() {
        let (write_tx, mut write_rx) = mpsc::channel(16);
        let (_pong_tx, pong_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(health_pump(
            write_tx,
            pong_rx,
            Duration::from_secs(30),
            Duration::from_secs(10),
            cancel.clone(),
        ));

        let msg = write_rx.recv().await.unwrap();
        assert!(is_ping(&msg));

        // No pong arrives; the timeout must force the close.
        handle.await.unwrap();
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn pong_keeps_connection_alive() {
        let (write_tx, mut write_rx) = mpsc::channel(16);
        let (pong_tx, pong_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(health_pump(
            write_tx,
            pong_rx,
            Duration::from_secs(30),
            Duration::from_secs(10),
            cancel.clone(),
        ));

        for _ in 0..3 {
            let msg = write_rx.recv().await.unwrap();
            assert!(is_ping(&msg));
            pong_tx.send(()).await.unwrap();
        }

        assert!(!cancel.is_cancelled());
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let (write_tx, _write_rx) = mpsc::channel(16);
        let (_pong_tx, pong_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let c = cancel.clone();
        let handle = tokio::spawn(health_pump(
            write_tx,
            pong_rx,
            Duration::from_secs(30),
            Duration::from_secs(10),
            c,
        ));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
    }
}
