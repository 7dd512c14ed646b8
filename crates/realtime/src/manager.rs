//! Connection manager orchestrating the realtime channel.
//!
//! Owns the single logical connection and its state, wires together the
//! reconnection policy, health monitor, offline queue, and refresh
//! scheduler, and dispatches inbound envelopes to typed subscribers.
//!
//! One manager is constructed per authenticated session and torn down on
//! logout; the hosting application passes it through its own context rather
//! than a global.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use huntboard_protocol::{Credential, Envelope};

use crate::backoff::ReconnectionPolicy;
use crate::config::{ConfigError, RealtimeConfig};
use crate::pumps::{self, Outbound};
use crate::queue::OfflineQueue;
use crate::reconnection;
use crate::subscribers::{CallbackList, Registry, Subscription, invoke_isolated};

/// Lifecycle state of the logical connection.
///
/// Exactly one state exists per manager; only the manager mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// Channel handshake in progress.
    Connecting,
    /// Channel established and flushed; sends transmit immediately.
    Open,
    /// Intentional close in progress.
    Closing,
    /// Channel lost; a retry is scheduled.
    Reconnecting { attempt: u32 },
    /// Terminal for the session, until an explicit `connect()`.
    Closed,
}

/// Signal delivered to error subscribers.
///
/// Deliberately unstructured beyond the exhaustion case: collaborators must
/// not rely on a stable transport-error shape.
#[derive(Debug, Clone)]
pub enum ErrorSignal {
    /// Channel-level failure; recovery is automatic.
    Transport(String),
    /// Reconnect attempts exceeded; no further automatic attempts.
    Exhausted { attempts: u32 },
}

/// Write side of the currently established channel.
pub(crate) struct ActiveConn {
    pub(crate) write_tx: mpsc::Sender<Outbound>,
    pub(crate) cancel: CancellationToken,
}

/// State shared between the manager handle and its background tasks.
pub(crate) struct Shared {
    pub(crate) config: RealtimeConfig,
    pub(crate) policy: ReconnectionPolicy,
    pub(crate) state: Mutex<ConnectionState>,
    pub(crate) registry: Registry,
    pub(crate) on_connect: CallbackList<dyn Fn() + Send + Sync>,
    pub(crate) on_disconnect: CallbackList<dyn Fn() + Send + Sync>,
    pub(crate) on_error: CallbackList<dyn Fn(&ErrorSignal) + Send + Sync>,
    pub(crate) queue: OfflineQueue,
    /// Raw token currently bound to the channel URL.
    pub(crate) token: Mutex<Option<String>>,
    /// Decoded credential; `None` when the token had no readable expiry.
    pub(crate) credential: Mutex<Option<Credential>>,
    pub(crate) attempts: AtomicU32,
    pub(crate) manual_disconnect: AtomicBool,
    pub(crate) exhausted_reported: AtomicBool,
    pub(crate) refresh_in_flight: AtomicBool,
    /// Cancels everything belonging to the current logical session:
    /// pumps, heartbeat, refresh timer, and pending reconnect delays.
    pub(crate) session_cancel: Mutex<CancellationToken>,
    pub(crate) conn: Mutex<Option<ActiveConn>>,
    /// Routes inbound pongs to the health monitor for the active connection.
    pub(crate) pong_tx: Mutex<Option<mpsc::Sender<()>>>,
    /// Routes refreshed tokens to the refresh scheduler.
    pub(crate) refresh_route: Mutex<Option<mpsc::Sender<String>>>,
}

impl Shared {
    pub(crate) fn state(&self) -> ConnectionState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn set_state(&self, new_state: ConnectionState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != new_state {
            debug!(from = ?*state, to = ?new_state, "connection state changed");
            *state = new_state;
        }
    }

    pub(crate) fn emit_connect(&self) {
        for cb in self.on_connect.snapshot() {
            invoke_isolated("onConnect", || cb());
        }
    }

    pub(crate) fn emit_disconnect(&self) {
        for cb in self.on_disconnect.snapshot() {
            invoke_isolated("onDisconnect", || cb());
        }
    }

    pub(crate) fn emit_error(&self, signal: &ErrorSignal) {
        for cb in self.on_error.snapshot() {
            invoke_isolated("onError", || cb(signal));
        }
    }

    pub(crate) fn current_token(&self) -> Option<String> {
        self.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Manager for the single realtime channel of an authenticated session.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Creates a manager.
    ///
    /// This is the only point that fails synchronously, and only on invalid
    /// configuration; every runtime failure is observable through state and
    /// error subscribers instead.
    pub fn new(config: RealtimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = ReconnectionPolicy::from_config(&config);
        let queue = OfflineQueue::open(config.queue_path.clone(), config.queue_capacity);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                policy,
                state: Mutex::new(ConnectionState::Idle),
                registry: Registry::default(),
                on_connect: CallbackList::default(),
                on_disconnect: CallbackList::default(),
                on_error: CallbackList::default(),
                queue,
                token: Mutex::new(None),
                credential: Mutex::new(None),
                attempts: AtomicU32::new(0),
                manual_disconnect: AtomicBool::new(false),
                exhausted_reported: AtomicBool::new(false),
                refresh_in_flight: AtomicBool::new(false),
                session_cancel: Mutex::new(CancellationToken::new()),
                conn: Mutex::new(None),
                pong_tx: Mutex::new(None),
                refresh_route: Mutex::new(None),
            }),
        })
    }

    /// Opens the channel with the given credential.
    ///
    /// No-op with a warning when already open. Failures surface through
    /// error subscribers and the reconnection policy, never as a return
    /// value.
    pub async fn connect(&self, token: &str) {
        let state = self.state();
        if matches!(state, ConnectionState::Open | ConnectionState::Connecting) {
            warn!(state = ?state, "connect() called while a connection is active, ignoring");
            return;
        }

        // A fresh logical session: cancel whatever the previous one left
        // running and restart the attempt counter.
        let session_cancel = {
            let mut cancel = self
                .shared
                .session_cancel
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            cancel.cancel();
            *cancel = CancellationToken::new();
            cancel.clone()
        };
        self.shared.manual_disconnect.store(false, Ordering::SeqCst);
        self.shared.exhausted_reported.store(false, Ordering::SeqCst);
        self.shared.attempts.store(0, Ordering::SeqCst);

        *self.shared.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.to_string());
        let credential = match Credential::decode(token) {
            Ok(cred) => Some(cred),
            Err(e) => {
                warn!("credential expiry not decodable, refresh scheduling disabled: {e}");
                None
            }
        };
        *self
            .shared
            .credential
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = credential;

        self.shared.set_state(ConnectionState::Connecting);
        match reconnection::open_session(&self.shared, session_cancel.clone()).await {
            Ok(()) => {}
            Err(reconnection::ChannelError::Superseded) => {
                debug!("connect superseded by a newer session");
            }
            Err(e) => {
                warn!(error = %e, "connect failed");
                self.shared
                    .emit_error(&ErrorSignal::Transport(e.to_string()));
                tokio::spawn(reconnection::reconnect_loop(
                    self.shared.clone(),
                    session_cancel,
                ));
            }
        }
    }

    /// Sends a typed message, fire-and-forget.
    ///
    /// Transmits immediately while open; otherwise buffers into the durable
    /// offline queue. Never fails from the caller's point of view.
    pub fn send<T: serde::Serialize>(&self, kind: &str, data: &T) {
        let envelope = match Envelope::new(kind, data) {
            Ok(env) => env,
            Err(e) => {
                warn!(kind = %kind, "dropping unsendable message: {e}");
                return;
            }
        };
        self.send_envelope(envelope);
    }

    pub(crate) fn send_envelope(&self, envelope: Envelope) {
        if matches!(self.state(), ConnectionState::Open) {
            let conn = self.shared.conn.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(conn) = conn.as_ref() {
                match conn.write_tx.try_send(Outbound::Message(envelope.clone())) {
                    Ok(()) => return,
                    Err(e) => {
                        warn!("channel write unavailable, buffering message: {e}");
                    }
                }
            }
        }
        self.shared.queue.enqueue(envelope);
    }

    /// Subscribes a handler to a message kind; `*` matches every kind.
    pub fn on(
        &self,
        kind: &str,
        handler: impl Fn(&Envelope) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.shared.registry.add(kind, Arc::new(handler));
        let shared = self.shared.clone();
        let kind = kind.to_string();
        Subscription::new(move || shared.registry.remove(&kind, id))
    }

    /// Subscribes to successful channel opens (including reconnects).
    pub fn on_connect(&self, handler: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.shared.on_connect.add(Arc::new(handler));
        let shared = self.shared.clone();
        Subscription::new(move || shared.on_connect.remove(id))
    }

    /// Subscribes to channel closes.
    pub fn on_disconnect(&self, handler: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.shared.on_disconnect.add(Arc::new(handler));
        let shared = self.shared.clone();
        Subscription::new(move || shared.on_disconnect.remove(id))
    }

    /// Subscribes to error signals. Observability only — recovery is
    /// automatic except after [`ErrorSignal::Exhausted`].
    pub fn on_error(
        &self,
        handler: impl Fn(&ErrorSignal) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.shared.on_error.add(Arc::new(handler));
        let shared = self.shared.clone();
        Subscription::new(move || shared.on_error.remove(id))
    }

    /// Intentionally closes the channel.
    ///
    /// Every timer owned by the session — heartbeat, pong timeout, reconnect
    /// delay, refresh — is cancelled before the socket closes, so no stray
    /// callback fires afterwards.
    pub async fn disconnect(&self) {
        self.shared.manual_disconnect.store(true, Ordering::SeqCst);
        let prev = self.state();

        self.shared
            .session_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();

        let conn = self
            .shared
            .conn
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        *self.shared.pong_tx.lock().unwrap_or_else(|e| e.into_inner()) = None;
        *self
            .shared
            .refresh_route
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;

        if let Some(conn) = conn {
            self.shared.set_state(ConnectionState::Closing);
            // The write pump sends the close frame as it shuts down and
            // drops its receiver; Closing holds until that handshake ends.
            conn.cancel.cancel();
            tokio::select! {
                _ = conn.write_tx.closed() => {}
                _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {
                    warn!("close handshake timed out");
                }
            }
        }

        self.shared.set_state(ConnectionState::Closed);
        if matches!(prev, ConnectionState::Open) {
            self.shared.emit_disconnect();
        }
        info!("disconnected");
    }

    /// True while the channel is open.
    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnectionState::Open)
    }

    /// Failed reconnect attempts in the current recovery cycle.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Feeds an envelope through the same inbound routing used for realtime
    /// frames: pongs go to the health monitor and are suppressed, everything
    /// else reaches subscribers. Used by the polling fallback so the
    /// transports are indistinguishable.
    pub(crate) fn dispatch_envelope(&self, envelope: &Envelope) {
        pumps::read::route_envelope(&self.shared, envelope);
    }

    /// The token currently bound to the channel, refreshed in place when a
    /// `refreshedToken` response arrives.
    pub fn current_token(&self) -> Option<String> {
        self.shared.current_token()
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn test_token(expires_in_secs: i64) -> String {
        let exp = chrono::Utc::now().timestamp() + expires_in_secs;
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload =
            URL_SAFE_NO_PAD.encode(serde_json::json!({"sub": "user-1", "exp": exp}).to_string());
        format!("{header}.{payload}.sig")
    }

    fn unreachable_config() -> RealtimeConfig {
        RealtimeConfig {
            base_reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_millis(50),
            ..RealtimeConfig::new("ws://127.0.0.1:9/ws")
        }
    }

    #[test]
    fn new_rejects_invalid_endpoint() {
        let result = ConnectionManager::new(RealtimeConfig::new("tcp://nope"));
        assert!(matches!(result, Err(ConfigError::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn starts_idle() {
        let mgr = ConnectionManager::new(unreachable_config()).unwrap();
        assert_eq!(mgr.state(), ConnectionState::Idle);
        assert!(!mgr.is_connected());
        assert_eq!(mgr.reconnect_attempts(), 0);
    }

    #[tokio::test]
    async fn send_while_idle_buffers() {
        let mgr = ConnectionManager::new(unreachable_config()).unwrap();
        mgr.send("statusUpdate", &serde_json::json!({"seq": 1}));
        mgr.send("statusUpdate", &serde_json::json!({"seq": 2}));
        assert_eq!(mgr.shared().queue.len(), 2);
    }

    #[tokio::test]
    async fn send_with_empty_kind_is_dropped() {
        let mgr = ConnectionManager::new(unreachable_config()).unwrap();
        mgr.send("", &serde_json::json!({}));
        assert_eq!(mgr.shared().queue.len(), 0);
    }

    #[tokio::test]
    async fn disconnect_when_idle_is_noop() {
        let mgr = ConnectionManager::new(unreachable_config()).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let _sub = mgr.on_disconnect(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        mgr.disconnect().await;
        assert_eq!(mgr.state(), ConnectionState::Closed);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhaustion_reported_exactly_once() {
        let config = RealtimeConfig {
            max_reconnect_attempts: 0,
            ..unreachable_config()
        };
        let mgr = ConnectionManager::new(config).unwrap();

        let exhausted = Arc::new(AtomicUsize::new(0));
        let e = exhausted.clone();
        let _sub = mgr.on_error(move |signal| {
            if matches!(signal, ErrorSignal::Exhausted { .. }) {
                e.fetch_add(1, Ordering::SeqCst);
            }
        });

        mgr.connect(&test_token(3600)).await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while mgr.state() != ConnectionState::Closed && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(mgr.state(), ConnectionState::Closed);
        assert_eq!(exhausted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_callbacks_fire_after_disconnect() {
        let mgr = ConnectionManager::new(unreachable_config()).unwrap();
        let errors = Arc::new(AtomicUsize::new(0));
        let e = errors.clone();
        let _sub = mgr.on_error(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        // Fails and schedules a reconnect, then the session is torn down.
        mgr.connect(&test_token(3600)).await;
        mgr.disconnect().await;
        let after_disconnect = errors.load(Ordering::SeqCst);

        // No reconnect delay, heartbeat, or refresh timer may still fire.
        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(3600)).await;
            tokio::task::yield_now().await;
        }
        assert_eq!(errors.load(Ordering::SeqCst), after_disconnect);
        assert_eq!(mgr.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn undecodable_token_still_attempts_connection() {
        let config = RealtimeConfig {
            max_reconnect_attempts: 0,
            ..unreachable_config()
        };
        let mgr = ConnectionManager::new(config).unwrap();
        mgr.connect("opaque-session-token").await;
        // Connect failed (nothing listening), but the token was accepted.
        assert_eq!(mgr.current_token().as_deref(), Some("opaque-session-token"));
        assert!(mgr.shared().credential.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn disconnect_holds_closing_through_the_handshake() {
        let mgr = ConnectionManager::new(unreachable_config()).unwrap();
        let (write_tx, write_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        *mgr.shared().conn.lock().unwrap() = Some(ActiveConn {
            write_tx,
            cancel: cancel.clone(),
        });
        mgr.shared().set_state(ConnectionState::Open);

        // Stand-in for the write pump: releases the channel once cancelled.
        let c = cancel.clone();
        tokio::spawn(async move {
            c.cancelled().await;
            drop(write_rx);
        });

        let shared = mgr.shared().clone();
        let saw_closing = Arc::new(AtomicBool::new(false));
        let s = saw_closing.clone();
        let watcher = tokio::spawn(async move {
            while shared.state() != ConnectionState::Closed {
                if shared.state() == ConnectionState::Closing {
                    s.store(true, Ordering::SeqCst);
                }
                tokio::task::yield_now().await;
            }
        });

        mgr.disconnect().await;
        watcher.await.unwrap();
        assert!(saw_closing.load(Ordering::SeqCst));
        assert_eq!(mgr.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_across_api() {
        let mgr = ConnectionManager::new(unreachable_config()).unwrap();
        let sub = mgr.on("notification", |_| {});
        sub.unsubscribe();
        sub.unsubscribe();

        let sub = mgr.on_connect(|| {});
        sub.unsubscribe();
        sub.unsubscribe();
    }
}
