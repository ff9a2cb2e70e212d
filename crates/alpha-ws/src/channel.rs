//! Stream channel lifecycle: connect, subscribe, route, reconnect.

use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatManager;
use crate::message::{is_ack, WsRequest};
use crate::policy::StreamPolicy;
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::message::StreamEvent;

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Maximum reconnection attempts before surfacing the failure.
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// Ping cadence.
    pub heartbeat_interval_ms: u64,
    /// Pong must arrive within this.
    pub heartbeat_timeout_ms: u64,
    /// Reconnect if no application message arrives within this window
    /// despite healthy pongs. Zero disables the idle check.
    pub idle_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 60000,
            heartbeat_interval_ms: 20000,
            heartbeat_timeout_ms: 10000,
            idle_timeout_ms: 0,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// A persistent subscription to one stream class.
///
/// Parsed events are fanned out through the mpsc sender supplied at
/// construction; the consumer end is the per-class queue the trading and
/// claim loops block on. Messages in flight during an outage are lost —
/// the channel re-subscribes after reconnecting but provides no replay.
pub struct StreamChannel {
    config: ChannelConfig,
    policy: StreamPolicy,
    state: Arc<RwLock<ChannelState>>,
    event_tx: mpsc::Sender<StreamEvent>,
    heartbeat: HeartbeatManager,
    resubscribe: Arc<Notify>,
    shutdown: CancellationToken,
    next_request_id: AtomicU64,
}

impl StreamChannel {
    pub fn new(
        config: ChannelConfig,
        policy: StreamPolicy,
        event_tx: mpsc::Sender<StreamEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        let heartbeat = HeartbeatManager::new(
            config.heartbeat_interval_ms,
            config.heartbeat_timeout_ms,
        );
        Self {
            config,
            policy,
            state: Arc::new(RwLock::new(ChannelState::Disconnected)),
            event_tx,
            heartbeat,
            resubscribe: Arc::new(Notify::new()),
            shutdown,
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }

    /// Handle for forcing a fresh SUBSCRIBE (credential rotation).
    pub fn resubscribe_handle(&self) -> Arc<Notify> {
        self.resubscribe.clone()
    }

    /// Connect and run until shutdown or the reconnect budget is spent.
    pub async fn run(&self) -> WsResult<()> {
        let mut attempt = 0u32;

        loop {
            if self.shutdown.is_cancelled() {
                *self.state.write() = ChannelState::Disconnected;
                return Ok(());
            }

            *self.state.write() = ChannelState::Connecting;

            match self.connect_once(&mut attempt).await {
                Ok(()) => {
                    info!(stream = self.policy.label, "stream connection closed");
                }
                Err(e) => {
                    error!(stream = self.policy.label, error = %e, "stream connection error");
                }
            }

            if self.shutdown.is_cancelled() {
                *self.state.write() = ChannelState::Disconnected;
                return Ok(());
            }

            attempt += 1;
            if attempt >= self.config.max_reconnect_attempts {
                error!(
                    stream = self.policy.label,
                    attempt, "max reconnection attempts reached"
                );
                *self.state.write() = ChannelState::Disconnected;
                return Err(WsError::ConnectionFailed(format!(
                    "{}: max reconnection attempts reached",
                    self.policy.label
                )));
            }

            *self.state.write() = ChannelState::Reconnecting;
            let delay = backoff_delay(
                attempt,
                self.config.reconnect_base_delay_ms,
                self.config.reconnect_max_delay_ms,
            );
            warn!(
                stream = self.policy.label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown.cancelled() => {
                    *self.state.write() = ChannelState::Disconnected;
                    return Ok(());
                }
            }
        }
    }

    async fn connect_once(&self, attempt: &mut u32) -> WsResult<()> {
        info!(stream = self.policy.label, url = %self.policy.url, "connecting");

        let (ws_stream, _response) = connect_async(&self.policy.url).await?;
        let (mut write, mut read) = ws_stream.split();

        *self.state.write() = ChannelState::Connected;
        *attempt = 0;
        self.heartbeat.reset();

        self.send_subscribe(&mut write).await?;

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(stream = self.policy.label, error = %e, "close frame failed");
                    }
                    *self.state.write() = ChannelState::Disconnected;
                    return Ok(());
                }

                () = self.resubscribe.notified() => {
                    info!(stream = self.policy.label, "re-subscribing with fresh params");
                    self.send_subscribe(&mut write).await?;
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "normal close".to_string()));
                            warn!(stream = self.policy.label, code, %reason, "closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(stream = self.policy.label, error = %e, "read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!(stream = self.policy.label, "stream ended");
                            return Ok(());
                        }
                        _ => {}
                    }
                }

                _ = self.heartbeat.wait_for_check() => {
                    if self.heartbeat.is_timed_out() {
                        error!(stream = self.policy.label, "heartbeat timeout");
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if self.heartbeat.is_idle(self.config.idle_timeout_ms) {
                        warn!(
                            stream = self.policy.label,
                            idle_ms = self.heartbeat.time_since_last_message_ms(),
                            "no application messages, forcing reconnect"
                        );
                        return Err(WsError::IdleTimeout(self.config.idle_timeout_ms));
                    }
                    if self.heartbeat.should_send_ping() {
                        write.send(Message::Ping(Vec::new())).await?;
                        self.heartbeat.record_ping();
                        debug!(stream = self.policy.label, "ping sent");
                    }
                }
            }
        }
    }

    async fn send_subscribe<S>(&self, write: &mut S) -> WsResult<()>
    where
        S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let params = (self.policy.subscribe_params)();
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let request = WsRequest::subscribe(params.clone(), id);
        write
            .send(Message::Text(serde_json::to_string(&request)?))
            .await?;
        info!(stream = self.policy.label, ?params, "subscribed");
        Ok(())
    }

    async fn handle_text(&self, text: &str) -> WsResult<()> {
        self.heartbeat.record_message();

        let frame: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(stream = self.policy.label, error = %e, "unparseable frame dropped");
                return Ok(());
            }
        };

        if is_ack(&frame) {
            debug!(stream = self.policy.label, "subscription ack");
            return Ok(());
        }

        if let Some(event) = (self.policy.route)(&frame) {
            if self.event_tx.send(event).await.is_err() {
                warn!(stream = self.policy.label, "event receiver dropped");
                return Err(WsError::ReceiverDropped);
            }
        } else {
            debug!(stream = self.policy.label, "unrouted frame dropped");
        }

        Ok(())
    }
}

/// Exponential backoff with a small deterministic jitter.
fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let delay = base_ms.saturating_mul(1u64 << exponent).min(max_ms);
    let jitter = {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        u64::from(nanos % 1000)
    };
    Duration::from_millis(delay + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.heartbeat_interval_ms, 20000);
        assert_eq!(config.idle_timeout_ms, 0);
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let d1 = backoff_delay(1, 1000, 60000).as_millis() as u64;
        let d2 = backoff_delay(2, 1000, 60000).as_millis() as u64;
        let d3 = backoff_delay(3, 1000, 60000).as_millis() as u64;
        // Jitter is bounded by 1000ms.
        assert!((1000..2000).contains(&d1));
        assert!((2000..3000).contains(&d2));
        assert!((4000..5000).contains(&d3));

        let capped = backoff_delay(20, 1000, 60000).as_millis() as u64;
        assert!(capped <= 61000);
    }
}
