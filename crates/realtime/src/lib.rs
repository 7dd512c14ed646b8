//! Realtime connection management for the job board.
//!
//! Provides the WebSocket connection manager with exponential-backoff
//! reconnection, heartbeat liveness monitoring, durable offline queueing,
//! credential refresh scheduling, and an HTTP-polling fallback transport.

pub mod backoff;
pub mod config;
pub mod fallback;
pub(crate) mod health;
pub mod manager;
pub(crate) mod pumps;
pub mod queue;
pub(crate) mod reconnection;
pub(crate) mod refresh;
pub mod subscribers;

pub use backoff::ReconnectionPolicy;
pub use config::{ConfigError, RealtimeConfig, TokenBinding};
pub use fallback::FallbackTransport;
pub use manager::{ConnectionManager, ConnectionState, ErrorSignal};
pub use queue::QueuedMessage;
pub use reconnection::ChannelError;
pub use subscribers::Subscription;

pub use huntboard_protocol::{Credential, Envelope, MessageKind, WILDCARD};
