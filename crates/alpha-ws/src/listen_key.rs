//! Renewal of the order-stream subscription credential.
//!
//! The listen key has a finite server-side lifetime. A background task
//! re-fetches it on a fixed interval; when the key changes, the order
//! channel is told to re-subscribe so no execution events are silently
//! lost on the stale key.

use alpha_client::ExchangeApi;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared view of the current listen key.
#[derive(Clone)]
pub struct ListenKeyHandle(Arc<RwLock<String>>);

impl ListenKeyHandle {
    pub fn new(key: String) -> Self {
        Self(Arc::new(RwLock::new(key)))
    }

    pub fn get(&self) -> String {
        self.0.read().clone()
    }

    pub fn set(&self, key: String) {
        *self.0.write() = key;
    }
}

/// Delay before retrying after a failed renewal.
const RETRY_DELAY: Duration = Duration::from_secs(60);

/// Background renewal task for one account's listen key.
pub struct ListenKeyRenewer<A> {
    api: Arc<A>,
    key: ListenKeyHandle,
    interval: Duration,
    resubscribe: Arc<Notify>,
    shutdown: CancellationToken,
}

impl<A: ExchangeApi> ListenKeyRenewer<A> {
    pub fn new(
        api: Arc<A>,
        key: ListenKeyHandle,
        interval: Duration,
        resubscribe: Arc<Notify>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            api,
            key,
            interval,
            resubscribe,
            shutdown,
        }
    }

    /// Run until shutdown.
    pub async fn run(self) {
        let mut delay = self.interval;
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            match self.api.listen_key().await {
                Ok(fresh) => {
                    delay = self.interval;
                    if fresh != self.key.get() {
                        info!("listen key rotated, re-subscribing order stream");
                        self.key.set(fresh);
                        self.resubscribe.notify_waiters();
                    } else {
                        info!("listen key renewed");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "listen key renewal failed, retrying sooner");
                    delay = RETRY_DELAY;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_set_get() {
        let handle = ListenKeyHandle::new("abc".to_string());
        assert_eq!(handle.get(), "abc");

        let clone = handle.clone();
        clone.set("def".to_string());
        assert_eq!(handle.get(), "def");
    }
}
