//! Server-clock calibration.
//!
//! Measures the local-to-server clock offset by timing round trips to the
//! exchange time endpoint. Taking the midpoint of the request/response
//! window halves the effect of asymmetric one-way latency versus a naive
//! single-shot measurement; averaging several samples smooths jitter.

use crate::api::ExchangeApi;
use crate::error::{ClientError, ClientResult};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, warn};

/// Pause between calibration samples.
const SAMPLE_PAUSE: Duration = Duration::from_millis(100);

/// Calibrated offset between the local clock and the server clock.
///
/// `local + offset ≈ server`. One value is calibrated per run and reused;
/// there is no continuous re-calibration.
#[derive(Debug, Clone, Copy)]
pub struct TimeOffset {
    offset_ms: f64,
}

impl TimeOffset {
    pub fn new(offset_ms: f64) -> Self {
        Self { offset_ms }
    }

    pub fn offset_ms(&self) -> f64 {
        self.offset_ms
    }

    /// Current server-calibrated time in milliseconds.
    pub fn now_ms(&self) -> f64 {
        Utc::now().timestamp_millis() as f64 + self.offset_ms
    }
}

/// Offset implied by one round trip: server time minus the midpoint of
/// the local send/receive window.
pub fn sample_offset(t0_ms: i64, t1_ms: i64, server_ms: i64) -> f64 {
    server_ms as f64 - (t0_ms as f64 + t1_ms as f64) / 2.0
}

fn average(samples: &[f64]) -> f64 {
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Calibrate the clock offset from `samples` round trips.
///
/// Individual sample failures are tolerated; the call fails only if every
/// sample fails.
pub async fn calibrate_offset<A: ExchangeApi>(api: &A, samples: u32) -> ClientResult<TimeOffset> {
    let mut offsets = Vec::with_capacity(samples as usize);
    for i in 0..samples {
        let t0 = Utc::now().timestamp_millis();
        match api.server_time().await {
            Ok(server_ms) => {
                let t1 = Utc::now().timestamp_millis();
                let offset = sample_offset(t0, t1, server_ms);
                debug!(sample = i + 1, offset_ms = offset, "calibration sample");
                offsets.push(offset);
            }
            Err(e) => warn!(sample = i + 1, error = %e, "calibration sample failed"),
        }
        if i + 1 < samples {
            tokio::time::sleep(SAMPLE_PAUSE).await;
        }
    }
    if offsets.is_empty() {
        return Err(ClientError::TimeSync(
            "every calibration sample failed".to_string(),
        ));
    }
    Ok(TimeOffset::new(average(&offsets)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{
        AirdropPage, AssetBalance, ClaimResponse, OrderHistoryQuery, OrderRecord, OrderRequest,
        PlaceOrderOutcome,
    };
    use alpha_core::OrderId;
    use parking_lot::Mutex;

    /// Fake exchange whose clock runs `skew_ms` ahead of the local clock
    /// and whose responses take `pre_ms`/`post_ms` to travel each way.
    struct SkewedClock {
        skew_ms: i64,
        pre_ms: u64,
        post_ms: u64,
        fail: Mutex<u32>,
    }

    impl SkewedClock {
        fn new(skew_ms: i64, pre_ms: u64, post_ms: u64) -> Self {
            Self {
                skew_ms,
                pre_ms,
                post_ms,
                fail: Mutex::new(0),
            }
        }

        fn failing_first(self, n: u32) -> Self {
            *self.fail.lock() = n;
            self
        }
    }

    impl ExchangeApi for SkewedClock {
        async fn server_time(&self) -> ClientResult<i64> {
            {
                let mut fail = self.fail.lock();
                if *fail > 0 {
                    *fail -= 1;
                    return Err(ClientError::TimeSync("synthetic failure".to_string()));
                }
            }
            tokio::time::sleep(Duration::from_millis(self.pre_ms)).await;
            let server = Utc::now().timestamp_millis() + self.skew_ms;
            tokio::time::sleep(Duration::from_millis(self.post_ms)).await;
            Ok(server)
        }

        async fn query_airdrop_list(&self, _: u32, _: u32) -> ClientResult<AirdropPage> {
            unimplemented!()
        }
        async fn claim_airdrop(&self, _: &str) -> ClientResult<ClaimResponse> {
            unimplemented!()
        }
        async fn place_limit_order(&self, _: &OrderRequest) -> ClientResult<PlaceOrderOutcome> {
            unimplemented!()
        }
        async fn cancel_order(&self, _: &OrderId, _: &str, _: &str) -> ClientResult<()> {
            unimplemented!()
        }
        async fn wallet_balances(&self) -> ClientResult<Vec<AssetBalance>> {
            unimplemented!()
        }
        async fn order_history(&self, _: &OrderHistoryQuery) -> ClientResult<Vec<OrderRecord>> {
            unimplemented!()
        }
        async fn listen_key(&self) -> ClientResult<String> {
            unimplemented!()
        }
    }

    #[test]
    fn test_sample_offset_midpoint() {
        // Server 500ms ahead, symmetric 20ms each way: midpoint cancels
        // the latency entirely.
        let t0 = 1_000_000;
        let t1 = 1_000_040;
        let server = 1_000_020 + 500;
        assert_eq!(sample_offset(t0, t1, server), 500.0);
    }

    #[test]
    fn test_sample_offset_asymmetry_bias_bounded() {
        // 40ms out, 0ms back: the measured server timestamp lands at the
        // end of the window, so the bias is half the asymmetry (20ms).
        let t0 = 1_000_000;
        let t1 = 1_000_040;
        let server = t1 + 500;
        let measured = sample_offset(t0, t1, server);
        assert_eq!(measured - 500.0, 20.0);
    }

    #[tokio::test]
    async fn test_calibrate_recovers_skew() {
        let api = SkewedClock::new(350, 5, 5);
        let offset = calibrate_offset(&api, 3).await.unwrap();
        assert!(
            (offset.offset_ms() - 350.0).abs() < 15.0,
            "offset {} too far from true skew",
            offset.offset_ms()
        );
    }

    #[tokio::test]
    async fn test_calibrate_tolerates_partial_failures() {
        let api = SkewedClock::new(100, 0, 0).failing_first(2);
        let offset = calibrate_offset(&api, 3).await.unwrap();
        assert!((offset.offset_ms() - 100.0).abs() < 15.0);
    }

    #[tokio::test]
    async fn test_calibrate_fails_when_all_samples_fail() {
        let api = SkewedClock::new(100, 0, 0).failing_first(3);
        assert!(calibrate_offset(&api, 3).await.is_err());
    }
}
