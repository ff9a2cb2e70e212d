//! Stream policies: the two fixed stream classes expressed as data.
//!
//! A policy bundles the subscription-parameter builder and the frame
//! router for one stream class, so a single channel type serves both
//! without a type hierarchy.

use crate::listen_key::ListenKeyHandle;
use crate::message::{route_order, route_price, StreamEvent};
use serde_json::Value;

/// Behavior of one stream class, supplied to the channel at construction.
pub struct StreamPolicy {
    /// Short label for logs ("order" / "price").
    pub label: &'static str,
    /// Endpoint URL for this stream class.
    pub url: String,
    /// Builds the SUBSCRIBE parameter list. Re-invoked on every
    /// (re)subscribe so credential rotation is picked up.
    pub subscribe_params: Box<dyn Fn() -> Vec<String> + Send + Sync>,
    /// Routes one data frame into an event, or drops it.
    pub route: fn(&Value) -> Option<StreamEvent>,
}

impl StreamPolicy {
    /// Order-execution stream, keyed by the renewable listen key.
    pub fn order(url: impl Into<String>, listen_key: ListenKeyHandle) -> Self {
        Self {
            label: "order",
            url: url.into(),
            subscribe_params: Box::new(move || vec![format!("alpha@{}", listen_key.get())]),
            route: route_order,
        }
    }

    /// Price/kline stream, keyed by a contract+chain+interval tuple.
    pub fn price(url: impl Into<String>, stream_key: String) -> Self {
        Self {
            label: "price",
            url: url.into(),
            subscribe_params: Box::new(move || vec![stream_key.clone()]),
            route: route_price,
        }
    }
}

impl std::fmt::Debug for StreamPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPolicy")
            .field("label", &self.label)
            .field("url", &self.url)
            .finish()
    }
}

/// Price-stream subscription key: `<prefix>@<contract>@<chain>@kline_<interval>`.
pub fn price_stream_key(prefix: &str, contract_address: &str, chain_id: &str, interval: &str) -> String {
    format!("{prefix}@{contract_address}@{chain_id}@kline_{interval}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_stream_key_format() {
        assert_eq!(
            price_stream_key("came", "0xabc", "56", "1s"),
            "came@0xabc@56@kline_1s"
        );
    }

    #[test]
    fn test_order_policy_tracks_key_rotation() {
        let key = ListenKeyHandle::new("first".to_string());
        let policy = StreamPolicy::order("wss://example", key.clone());
        assert_eq!((policy.subscribe_params)(), vec!["alpha@first".to_string()]);

        key.set("second".to_string());
        assert_eq!((policy.subscribe_params)(), vec!["alpha@second".to_string()]);
    }
}
