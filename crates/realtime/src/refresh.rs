//! Credential refresh scheduling.
//!
//! One scheduler runs per open session. It arms a one-shot timer for
//! `expiry - refresh_threshold` (refreshing immediately when already inside
//! the threshold), sends the refresh request over the active channel, and
//! replaces the credential atomically when the response arrives. A refresh
//! never routes through the offline queue: if the channel is gone the next
//! session arms a fresh scheduler, which covers the deferred case.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use huntboard_protocol::{Credential, Envelope, RefreshTokenRequest};

use crate::manager::Shared;
use crate::pumps::Outbound;

pub(crate) async fn refresh_scheduler(
    shared: Arc<Shared>,
    write_tx: mpsc::Sender<Outbound>,
    mut refreshed_rx: mpsc::Receiver<String>,
    conn_cancel: CancellationToken,
) {
    loop {
        let credential = shared
            .credential
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(credential) = credential else {
            debug!("no decodable credential, refresh scheduling disabled");
            return;
        };

        let until_expiry = credential.expiry_epoch.saturating_sub(Utc::now().timestamp());
        let lead = Duration::from_secs(until_expiry.max(0) as u64)
            .saturating_sub(shared.config.refresh_threshold);

        if lead > Duration::ZERO {
            debug!(in_secs = lead.as_secs(), "credential refresh armed");
            tokio::select! {
                _ = conn_cancel.cancelled() => return,
                _ = tokio::time::sleep(lead) => {}
            }
        } else {
            debug!("credential already within refresh threshold");
        }

        // At most one refresh in flight; a competing scheduler backs off.
        if shared.refresh_in_flight.swap(true, Ordering::SeqCst) {
            debug!("refresh already in flight");
            return;
        }

        let request = match Envelope::new(
            "refreshToken",
            &RefreshTokenRequest {
                token: credential.token.clone(),
            },
        ) {
            Ok(env) => env,
            Err(e) => {
                warn!("failed to build refresh request: {e}");
                shared.refresh_in_flight.store(false, Ordering::SeqCst);
                return;
            }
        };

        if write_tx.send(Outbound::Message(request)).await.is_err() {
            // Channel gone; deferred until the next successful open.
            shared.refresh_in_flight.store(false, Ordering::SeqCst);
            return;
        }
        info!("credential refresh requested");

        let new_token = tokio::select! {
            _ = conn_cancel.cancelled() => {
                shared.refresh_in_flight.store(false, Ordering::SeqCst);
                return;
            }
            token = refreshed_rx.recv() => {
                match token {
                    Some(t) => t,
                    None => {
                        shared.refresh_in_flight.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }
        };
        shared.refresh_in_flight.store(false, Ordering::SeqCst);

        match Credential::decode(&new_token) {
            Ok(new_credential) => {
                // Token and decoded expiry replace together.
                *shared.token.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some(new_token.clone());
                *shared
                    .credential
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(new_credential);
                info!("credential refreshed");
            }
            Err(e) => {
                warn!("refreshed credential not decodable, refresh disabled: {e}");
                return;
            }
        }
        // Loop re-arms from the new expiry.
    }
}
