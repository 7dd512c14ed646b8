//! Wire protocol types for Huntboard realtime communication.
//!
//! Defines the JSON envelope exchanged over the realtime channel,
//! the closed set of control message kinds, and credential decoding.

pub mod constants;
pub mod credential;
pub mod envelope;
pub mod messages;

pub use constants::{MessageKind, WILDCARD};
pub use credential::Credential;
pub use envelope::{Envelope, ProtocolError};
pub use messages::{RefreshTokenRequest, RefreshedTokenResponse};
