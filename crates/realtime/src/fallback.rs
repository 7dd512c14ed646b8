//! Degraded polling transport.
//!
//! Wraps a [`ConnectionManager`] and, when the initial connect fails or the
//! reconnection policy is exhausted, switches delivery to fixed-interval
//! HTTP polling of an equivalent resource. Poll responses feed through the identical
//! subscriber dispatch path, so collaborators cannot tell which transport
//! is in use. The degrade is one-way: polling never switches back to the
//! realtime channel on its own.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use huntboard_protocol::Envelope;

use crate::config::{ConfigError, RealtimeConfig};
use crate::manager::{ConnectionManager, ErrorSignal};
use crate::subscribers::Subscription;

/// Realtime transport with an HTTP-polling degrade path.
pub struct FallbackTransport {
    manager: Arc<ConnectionManager>,
    http: reqwest::Client,
    poll_endpoint: String,
    poll_interval: Duration,
    polling: Arc<AtomicBool>,
    poll_cancel: CancellationToken,
    _exhaustion_watch: Subscription,
}

impl FallbackTransport {
    /// Creates the transport. Requires `poll_endpoint` in the configuration.
    pub fn new(config: RealtimeConfig) -> Result<Self, ConfigError> {
        let poll_endpoint = config
            .poll_endpoint
            .clone()
            .ok_or_else(|| ConfigError::InvalidPollEndpoint("<unset>".into()))?;
        let poll_interval = config.poll_interval;
        let manager = Arc::new(ConnectionManager::new(config)?);
        let http = reqwest::Client::new();
        let polling = Arc::new(AtomicBool::new(false));
        let poll_cancel = CancellationToken::new();

        let exhaustion_watch = {
            let manager = manager.clone();
            let http = http.clone();
            let endpoint = poll_endpoint.clone();
            let polling = polling.clone();
            let cancel = poll_cancel.clone();
            manager.clone().on_error(move |signal| {
                if matches!(signal, ErrorSignal::Exhausted { .. })
                    && !polling.swap(true, Ordering::SeqCst)
                {
                    info!("realtime channel exhausted, degrading to polling");
                    tokio::spawn(poll_loop(
                        manager.clone(),
                        http.clone(),
                        endpoint.clone(),
                        poll_interval,
                        cancel.clone(),
                    ));
                }
            })
        };

        Ok(Self {
            manager,
            http,
            poll_endpoint,
            poll_interval,
            polling,
            poll_cancel,
            _exhaustion_watch: exhaustion_watch,
        })
    }

    /// Attempts the realtime channel.
    ///
    /// A first attempt that fails outright degrades to polling immediately;
    /// a channel that opens and is later lost degrades only once the
    /// reconnection policy reports exhaustion.
    pub async fn connect(&self, token: &str) {
        self.manager.connect(token).await;
        if !self.manager.is_connected() && !self.polling.swap(true, Ordering::SeqCst) {
            info!("initial connect failed, degrading to polling");
            self.manager.disconnect().await;
            tokio::spawn(poll_loop(
                self.manager.clone(),
                self.http.clone(),
                self.poll_endpoint.clone(),
                self.poll_interval,
                self.poll_cancel.clone(),
            ));
        }
    }

    /// Outbound entry point, fire-and-forget on either transport.
    pub fn send<T: serde::Serialize>(&self, kind: &str, data: &T) {
        if !self.polling.load(Ordering::SeqCst) {
            self.manager.send(kind, data);
            return;
        }

        let envelope = match Envelope::new(kind, data) {
            Ok(env) => env,
            Err(e) => {
                warn!(kind = %kind, "dropping unsendable message: {e}");
                return;
            }
        };
        let http = self.http.clone();
        let url = self.poll_endpoint.clone();
        let token = self.manager.current_token().unwrap_or_default();
        tokio::spawn(async move {
            let result = http
                .post(&url)
                .query(&[("token", token.as_str())])
                .json(&envelope)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => warn!(status = %resp.status(), "poll endpoint rejected message"),
                Err(e) => warn!("failed to deliver message over polling transport: {e}"),
            }
        });
    }

    /// The wrapped manager: subscriptions registered here fire for both
    /// transports.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// True once delivery has degraded to polling.
    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::SeqCst)
    }

    /// Stops polling and closes the realtime channel.
    pub async fn shutdown(&self) {
        self.poll_cancel.cancel();
        self.manager.disconnect().await;
    }
}

/// Polls the HTTP resource and feeds each returned envelope through the
/// same inbound routing the realtime read pump uses.
async fn poll_loop(
    manager: Arc<ConnectionManager>,
    http: reqwest::Client,
    endpoint: String,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        let token = manager.current_token().unwrap_or_default();
        let result = http
            .get(&endpoint)
            .query(&[("token", token.as_str())])
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                match resp.json::<Vec<Envelope>>().await {
                    Ok(envelopes) => {
                        debug!(count = envelopes.len(), "poll delivered messages");
                        for envelope in &envelopes {
                            if envelope.kind.is_empty() {
                                warn!("dropping polled message with empty type");
                                continue;
                            }
                            manager.dispatch_envelope(envelope);
                        }
                    }
                    Err(e) => warn!("bad poll response: {e}"),
                }
            }
            Ok(resp) => warn!(status = %resp.status(), "poll request failed"),
            Err(e) => warn!("poll request error: {e}"),
        }
    }
}
