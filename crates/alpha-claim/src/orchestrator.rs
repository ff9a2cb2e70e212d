//! Per-account claim state machine and concurrent fan-out.
//!
//! Each eligible account runs `WaitingForWindow → Querying → Claiming →
//! Done` as an independent task against one shared target instant and one
//! calibrated clock offset, so all claim attempts fire as close to
//! simultaneously as the runtime allows.

use crate::schedule::ClaimSchedule;
use alpha_client::{ClaimOutcome, ExchangeApi, TimeOffset};
use alpha_core::Account;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Poll interval for the window wait. Tight enough for millisecond-scale
/// firing, loose enough not to starve the runtime.
const WINDOW_POLL: Duration = Duration::from_millis(10);

/// One scheduled claim attempt.
#[derive(Debug, Clone)]
pub struct ClaimTarget {
    pub token_symbol: String,
    pub alpha_id: String,
    /// Pre-resolved configuration id, if one is already known. When
    /// absent it is resolved by list lookup after the window opens and
    /// the target is abandoned if resolution fails.
    pub config_id: Option<String>,
    /// Target instant as server-calibrated epoch milliseconds.
    pub target_ms: i64,
}

/// Run parameters shared by every account in one claim run.
#[derive(Debug, Clone)]
pub struct ClaimRunParams {
    pub token_symbol: String,
    pub alpha_id: String,
    pub schedule: ClaimSchedule,
    /// Discover but do not claim.
    pub dry_run: bool,
}

/// Final per-account outcome of a claim run.
#[derive(Debug, Clone)]
pub struct ClaimReport {
    pub account_id: i64,
    pub success: bool,
    pub outcome: String,
    /// Claim attempts actually issued.
    pub attempts: u32,
    /// The account's credentials were rejected; the caller should flip
    /// its persisted login status.
    pub auth_failed: bool,
}

impl ClaimReport {
    fn skipped(account_id: i64, reason: impl Into<String>) -> Self {
        Self {
            account_id,
            success: false,
            outcome: reason.into(),
            attempts: 0,
            auth_failed: false,
        }
    }
}

/// Busy-wait until the lead-time threshold before the target instant.
///
/// Deliberately has no cancellation path: once armed, the window wait
/// runs to the threshold.
pub async fn wait_for_window(offset: TimeOffset, target_ms: i64, advance_ms: i64) {
    let threshold = (target_ms - advance_ms) as f64;
    loop {
        if offset.now_ms() >= threshold {
            return;
        }
        tokio::time::sleep(WINDOW_POLL).await;
    }
}

/// Best-effort countdown display; never affects claim timing.
pub async fn countdown_loop(offset: TimeOffset, target_ms: i64) {
    let mut last_printed: Option<i64> = None;
    loop {
        let remaining_ms = target_ms as f64 - offset.now_ms();
        if remaining_ms <= 0.0 {
            info!("target instant reached");
            return;
        }
        let whole_secs = (remaining_ms / 1000.0) as i64;
        if last_printed != Some(whole_secs) {
            info!(remaining_secs = whole_secs, "counting down to claim window");
            last_printed = Some(whole_secs);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

struct ClaimAttempts {
    success: bool,
    outcome: String,
    attempts: u32,
    auth_failed: bool,
}

/// Issue up to `retry_count` claim calls, stopping immediately on any
/// terminal outcome. Retrying a claimed or ended airdrop is wasted work
/// and may itself error.
pub async fn claim_with_retry<A: ExchangeApi>(
    api: &A,
    config_id: &str,
    token_symbol: &str,
    retry_count: u32,
    retry_interval: Duration,
) -> (bool, String, u32) {
    let result = claim_attempts(api, config_id, token_symbol, retry_count, retry_interval).await;
    (result.success, result.outcome, result.attempts)
}

async fn claim_attempts<A: ExchangeApi>(
    api: &A,
    config_id: &str,
    token_symbol: &str,
    retry_count: u32,
    retry_interval: Duration,
) -> ClaimAttempts {
    let mut last_message = String::from("no response");
    for attempt in 1..=retry_count {
        let started = Instant::now();
        match api.claim_airdrop(config_id).await {
            Ok(response) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                // Raw response and latency are kept for post-hoc tuning
                // of the advance window.
                debug!(token_symbol, attempt, latency_ms, raw = ?response, "claim attempt");
                match response.outcome() {
                    ClaimOutcome::Claimed => {
                        info!(token_symbol, attempt, "airdrop claimed");
                        return ClaimAttempts {
                            success: true,
                            outcome: format!("领取成功（第{attempt}次尝试）"),
                            attempts: attempt,
                            auth_failed: false,
                        };
                    }
                    ClaimOutcome::AlreadyClaimed => {
                        info!(token_symbol, attempt, "airdrop already claimed");
                        return ClaimAttempts {
                            success: true,
                            outcome: "已领取".to_string(),
                            attempts: attempt,
                            auth_failed: false,
                        };
                    }
                    ClaimOutcome::Ended => {
                        warn!(token_symbol, attempt, "airdrop ended");
                        return ClaimAttempts {
                            success: false,
                            outcome: "领取失败: 空投已结束".to_string(),
                            attempts: attempt,
                            auth_failed: false,
                        };
                    }
                    ClaimOutcome::Rejected { code, message } => {
                        debug!(token_symbol, attempt, ?code, reason = %message, "claim rejected");
                        last_message = message;
                    }
                }
            }
            Err(e) => {
                if e.is_auth_failure() {
                    return ClaimAttempts {
                        success: false,
                        outcome: "领取失败: 认证失效".to_string(),
                        attempts: attempt,
                        auth_failed: true,
                    };
                }
                warn!(token_symbol, attempt, error = %e, "claim call failed");
                last_message = e.to_string();
            }
        }
        if attempt < retry_count {
            tokio::time::sleep(retry_interval).await;
        }
    }
    ClaimAttempts {
        success: false,
        outcome: format!("领取失败: {last_message}"),
        attempts: retry_count,
        auth_failed: false,
    }
}

/// Full per-account state machine: wait for the window, resolve a config
/// id, then race the claim.
pub async fn claim_for_account<A: ExchangeApi>(
    account_id: i64,
    api: Arc<A>,
    target: ClaimTarget,
    schedule: ClaimSchedule,
    offset: TimeOffset,
    dry_run: bool,
) -> ClaimReport {
    wait_for_window(offset, target.target_ms, schedule.advance_ms).await;
    info!(
        account_id,
        calibrated_ms = offset.now_ms(),
        advance_ms = schedule.advance_ms,
        "claim window open"
    );

    // Resolve the config id: a pre-resolved id wins, otherwise poll the
    // airdrop list until something claimable for the target token shows
    // up or the discovery window closes.
    let config_id = match &target.config_id {
        Some(id) => Some(id.clone()),
        None => {
            discover_config_id(
                account_id,
                api.as_ref(),
                &target.token_symbol,
                &target.alpha_id,
                &schedule,
            )
            .await
        }
    };

    let Some(config_id) = config_id else {
        return ClaimReport::skipped(account_id, "领取失败: 未检测到可领取空投");
    };

    if dry_run {
        return ClaimReport {
            account_id,
            success: false,
            outcome: format!("dry-run: would claim configId={config_id}"),
            attempts: 0,
            auth_failed: false,
        };
    }

    let result = claim_attempts(
        api.as_ref(),
        &config_id,
        &target.token_symbol,
        schedule.retry_count,
        schedule.retry_interval,
    )
    .await;
    ClaimReport {
        account_id,
        success: result.success,
        outcome: result.outcome,
        attempts: result.attempts,
        auth_failed: result.auth_failed,
    }
}

/// High-frequency discovery: poll the airdrop list for a claimable
/// configuration matching the target token, bounded by the discovery
/// window. Empty token/alpha targets match the first claimable entry.
async fn discover_config_id<A: ExchangeApi>(
    account_id: i64,
    api: &A,
    token_symbol: &str,
    alpha_id: &str,
    schedule: &ClaimSchedule,
) -> Option<String> {
    let deadline = Instant::now() + schedule.query_duration;
    let mut queries = 0u32;
    while Instant::now() < deadline {
        queries += 1;
        match api.query_airdrop_list(1, 50).await {
            Ok(page) => {
                let matched = if token_symbol.is_empty() && alpha_id.is_empty() {
                    page.find_claimable("")
                } else {
                    page.configs
                        .iter()
                        .find(|cfg| cfg.matches(token_symbol, alpha_id) && cfg.is_claimable())
                };
                if let Some(cfg) = matched {
                    if let Some(id) = &cfg.config_id {
                        info!(
                            account_id,
                            config_id = %id,
                            token = ?cfg.token_symbol,
                            queries,
                            "claimable airdrop detected"
                        );
                        return Some(id.clone());
                    }
                }
            }
            Err(e) => warn!(account_id, error = %e, "airdrop list query failed"),
        }
        tokio::time::sleep(schedule.query_interval).await;
    }
    warn!(account_id, queries, "discovery window closed with nothing claimable");
    None
}

/// Fan out the claim state machine across all eligible accounts.
///
/// Accounts without auth material are skipped with a logged reason. A
/// failing account never aborts another: every account yields a report
/// and the batch is returned in account-id order.
pub async fn run_claims<A, F>(
    accounts: &[Account],
    make_api: F,
    params: &ClaimRunParams,
    offset: TimeOffset,
    target_ms: i64,
) -> Vec<ClaimReport>
where
    A: ExchangeApi + 'static,
    F: Fn(&Account) -> alpha_client::ClientResult<A>,
{
    let mut reports = Vec::new();
    let mut tasks = JoinSet::new();

    for account in accounts {
        if !account.has_auth() {
            warn!(account_id = account.id, "missing auth headers, skipping");
            reports.push(ClaimReport::skipped(account.id, "跳过: 缺少认证信息"));
            continue;
        }
        let api = match make_api(account) {
            Ok(api) => Arc::new(api),
            Err(e) => {
                error!(account_id = account.id, error = %e, "client construction failed");
                reports.push(ClaimReport::skipped(
                    account.id,
                    format!("跳过: 客户端构建失败 {e}"),
                ));
                continue;
            }
        };
        let target = ClaimTarget {
            token_symbol: params.token_symbol.clone(),
            alpha_id: params.alpha_id.clone(),
            config_id: None,
            target_ms,
        };
        let schedule = params.schedule.clone();
        let dry_run = params.dry_run;
        let account_id = account.id;
        tasks.spawn(async move {
            claim_for_account(account_id, api, target, schedule, offset, dry_run).await
        });
    }

    let countdown = tokio::spawn(countdown_loop(offset, target_ms));

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(e) => error!(error = %e, "claim task panicked"),
        }
    }
    countdown.abort();

    reports.sort_by_key(|r| r.account_id);
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use alpha_client::{
        AirdropPage, AssetBalance, ClaimResponse, ClientError, ClientResult, OrderHistoryQuery,
        OrderRecord, OrderRequest, PlaceOrderOutcome,
    };
    use alpha_core::{LoginStatus, OrderId};
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Scripted claim endpoint: pops one response per call and records
    /// call instants.
    struct FakeClaimApi {
        responses: Mutex<Vec<ClaimResponse>>,
        claim_calls: Arc<Mutex<Vec<Instant>>>,
    }

    impl FakeClaimApi {
        fn new(responses: Vec<ClaimResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                claim_calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn claim_count(&self) -> usize {
            self.claim_calls.lock().len()
        }
    }

    fn claim_response(json: serde_json::Value) -> ClaimResponse {
        serde_json::from_value(json).unwrap()
    }

    impl ExchangeApi for FakeClaimApi {
        async fn server_time(&self) -> ClientResult<i64> {
            Ok(Utc::now().timestamp_millis())
        }
        async fn query_airdrop_list(&self, _: u32, _: u32) -> ClientResult<AirdropPage> {
            Ok(AirdropPage::default())
        }
        async fn claim_airdrop(&self, _: &str) -> ClientResult<ClaimResponse> {
            self.claim_calls.lock().push(Instant::now());
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                return Err(ClientError::Malformed("script exhausted".to_string()));
            }
            Ok(responses.remove(0))
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

    #[tokio::test]
    async fn test_claim_stops_after_terminal_success() {
        // First attempt succeeds; the retry budget must not be spent.
        let api = FakeClaimApi::new(vec![
            claim_response(serde_json::json!({ "code": "000000" })),
            claim_response(serde_json::json!({ "code": "000000" })),
        ]);
        let (success, _, attempts) =
            claim_with_retry(&api, "cfg-1", "BR", 5, Duration::from_millis(1)).await;
        assert!(success);
        assert_eq!(attempts, 1);
        assert_eq!(api.claim_count(), 1);
    }

    #[tokio::test]
    async fn test_claim_stops_on_already_claimed() {
        let api = FakeClaimApi::new(vec![claim_response(serde_json::json!({
            "code": "ERR",
            "data": { "claimInfo": { "claimStatus": "claimed" } }
        }))]);
        let (success, _, attempts) =
            claim_with_retry(&api, "cfg-1", "BR", 5, Duration::from_millis(1)).await;
        assert!(success);
        assert_eq!(attempts, 1);
        assert_eq!(api.claim_count(), 1);
    }

    #[tokio::test]
    async fn test_claim_retries_until_budget_exhausted() {
        let rejected = serde_json::json!({ "code": "900001", "message": "not yet" });
        let api = FakeClaimApi::new(vec![
            claim_response(rejected.clone()),
            claim_response(rejected.clone()),
            claim_response(rejected),
        ]);
        let (success, outcome, attempts) =
            claim_with_retry(&api, "cfg-1", "BR", 3, Duration::from_millis(1)).await;
        assert!(!success);
        assert_eq!(attempts, 3);
        assert!(outcome.contains("领取失败"));
        assert_eq!(api.claim_count(), 3);
    }

    fn test_account(id: i64) -> Account {
        let mut headers = HashMap::new();
        headers.insert("csrftoken".to_string(), format!("token-{id}"));
        Account {
            id,
            name: format!("acct-{id}"),
            email: format!("acct-{id}@example.com"),
            auth_headers: headers,
            auth_cookies: None,
            score: 0,
            login_status: LoginStatus::Valid,
        }
    }

    #[tokio::test]
    async fn test_fan_out_fires_all_accounts_within_window() {
        let accounts: Vec<Account> = (1..=5).map(test_account).collect();
        let instants: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        struct StampingApi {
            instants: Arc<Mutex<Vec<Instant>>>,
        }
        impl ExchangeApi for StampingApi {
            async fn server_time(&self) -> ClientResult<i64> {
                Ok(Utc::now().timestamp_millis())
            }
            async fn query_airdrop_list(&self, _: u32, _: u32) -> ClientResult<AirdropPage> {
                let page = serde_json::json!({
                    "data": { "configs": [{
                        "configId": "cfg-1",
                        "tokenSymbol": "BR",
                        "claimInfo": { "canClaim": true }
                    }]}
                });
                Ok(AirdropPage::from_value(&page))
            }
            async fn claim_airdrop(&self, _: &str) -> ClientResult<ClaimResponse> {
                self.instants.lock().push(Instant::now());
                Ok(serde_json::from_value(serde_json::json!({ "code": "000000" })).unwrap())
            }
            async fn place_limit_order(
                &self,
                _: &OrderRequest,
            ) -> ClientResult<PlaceOrderOutcome> {
                unimplemented!()
            }
            async fn cancel_order(&self, _: &OrderId, _: &str, _: &str) -> ClientResult<()> {
                unimplemented!()
            }
            async fn wallet_balances(&self) -> ClientResult<Vec<AssetBalance>> {
                unimplemented!()
            }
            async fn order_history(
                &self,
                _: &OrderHistoryQuery,
            ) -> ClientResult<Vec<OrderRecord>> {
                unimplemented!()
            }
            async fn listen_key(&self) -> ClientResult<String> {
                unimplemented!()
            }
        }

        let params = ClaimRunParams {
            token_symbol: "BR".to_string(),
            alpha_id: String::new(),
            schedule: ClaimSchedule {
                advance_ms: 0,
                retry_count: 1,
                ..ClaimSchedule::default()
            },
            dry_run: false,
        };
        let offset = TimeOffset::new(0.0);
        let target_ms = Utc::now().timestamp_millis() + 300;

        let stamps = instants.clone();
        let reports = run_claims(
            &accounts,
            move |_| {
                Ok(StampingApi {
                    instants: stamps.clone(),
                })
            },
            &params,
            offset,
            target_ms,
        )
        .await;

        assert_eq!(reports.len(), 5);
        assert!(reports.iter().all(|r| r.success), "{reports:?}");
        // Reports come back in account-id order regardless of finish order.
        let ids: Vec<i64> = reports.iter().map(|r| r.account_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        // All claim calls must land within one scheduling window of each
        // other, not serialized one-after-another.
        let instants = instants.lock();
        assert_eq!(instants.len(), 5);
        let first = *instants.iter().min().unwrap();
        let last = *instants.iter().max().unwrap();
        assert!(
            last.duration_since(first) < Duration::from_millis(150),
            "spread too wide: {:?}",
            last.duration_since(first)
        );
    }

    #[tokio::test]
    async fn test_accounts_without_auth_are_skipped() {
        let mut account = test_account(7);
        account.auth_headers.clear();

        let params = ClaimRunParams {
            token_symbol: "BR".to_string(),
            alpha_id: String::new(),
            schedule: ClaimSchedule {
                advance_ms: 0,
                ..ClaimSchedule::default()
            },
            dry_run: false,
        };
        let offset = TimeOffset::new(0.0);
        let target_ms = Utc::now().timestamp_millis();

        let reports = run_claims(
            &[account],
            |_| -> ClientResult<FakeClaimApi> { panic!("must not build a client") },
            &params,
            offset,
            target_ms,
        )
        .await;

        assert_eq!(reports.len(), 1);
        assert!(!reports[0].success);
        assert_eq!(reports[0].attempts, 0);
    }
}
