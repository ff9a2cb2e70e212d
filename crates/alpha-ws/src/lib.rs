//! Streaming channel for exchange push data.
//!
//! One generic channel type handles both stream classes (order execution
//! events and price klines); the differences are captured in a small
//! policy record supplied at construction. Provides automatic reconnection
//! with capped exponential backoff, heartbeat monitoring, and renewal of
//! the finite-lifetime order-stream credential.

pub mod channel;
pub mod error;
pub mod heartbeat;
pub mod listen_key;
pub mod message;
pub mod policy;

pub use channel::{ChannelConfig, ChannelState, StreamChannel};
pub use error::{WsError, WsResult};
pub use heartbeat::HeartbeatManager;
pub use listen_key::{ListenKeyHandle, ListenKeyRenewer};
pub use message::{OrderExecution, PriceKline, StreamEvent, WsRequest};
pub use policy::{price_stream_key, StreamPolicy};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
