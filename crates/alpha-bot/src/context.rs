//! Run context: the explicit replacement for process-global state.
//!
//! Holds the stop flag, shutdown reason, and shared resources, built
//! once at run start and threaded through every task so the shutdown
//! sequence is testable in isolation.

use alpha_core::ErrorClassifier;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct RunContext {
    shutdown: CancellationToken,
    reason: RwLock<Option<String>>,
    pub classifier: Arc<ErrorClassifier>,
    pub dry_run: bool,
}

impl RunContext {
    pub fn new(dry_run: bool) -> Arc<Self> {
        Arc::new(Self {
            shutdown: CancellationToken::new(),
            reason: RwLock::new(None),
            classifier: Arc::new(ErrorClassifier::new()),
            dry_run,
        })
    }

    /// Request a graceful shutdown; the first reason wins.
    pub fn request_shutdown(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut slot = self.reason.write();
            if slot.is_none() {
                *slot = Some(reason.clone());
            }
        }
        info!(%reason, "shutdown requested");
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown_reason(&self) -> Option<String> {
        self.reason.read().clone()
    }
}

/// Translate Ctrl-C into a graceful shutdown request.
pub fn install_signal_handler(ctx: Arc<RunContext>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctx.request_shutdown("SIGINT (Ctrl+C)");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_shutdown_reason_wins() {
        let ctx = RunContext::new(false);
        assert!(!ctx.is_shutdown());
        assert!(ctx.shutdown_reason().is_none());

        ctx.request_shutdown("SIGINT (Ctrl+C)");
        ctx.request_shutdown("SIGTERM");

        assert!(ctx.is_shutdown());
        assert_eq!(ctx.shutdown_reason().as_deref(), Some("SIGINT (Ctrl+C)"));
    }

    #[tokio::test]
    async fn test_token_observes_cancellation() {
        let ctx = RunContext::new(false);
        let token = ctx.shutdown_token();
        ctx.request_shutdown("test");
        token.cancelled().await;
    }
}
