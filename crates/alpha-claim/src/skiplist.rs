//! Skip-list claim variant.
//!
//! Instead of every account discovering claimability on its own, one
//! shared discovery pass probes all accounts' airdrop lists concurrently.
//! The first genuinely claimable configuration id wins and is broadcast
//! to every account, trading a small race risk (the id could in theory
//! differ per account) for large latency savings when the list query is
//! the bottleneck. Each account still interprets its own claim response,
//! so a per-account mismatch degrades to a normal claim failure.

use crate::orchestrator::{
    claim_with_retry, countdown_loop, wait_for_window, ClaimReport, ClaimRunParams,
};
use alpha_client::{ExchangeApi, TimeOffset};
use alpha_core::Account;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Probe all accounts concurrently; return the first claimable config id
/// any of them sees.
pub async fn find_first_claimable<A: ExchangeApi + 'static>(
    apis: &[(i64, Arc<A>)],
    token_symbol: &str,
) -> Option<String> {
    let mut probes = JoinSet::new();
    for (account_id, api) in apis {
        let api = api.clone();
        let symbol = token_symbol.to_string();
        let account_id = *account_id;
        probes.spawn(async move {
            match api.query_airdrop_list(1, 50).await {
                Ok(page) => page
                    .find_claimable(&symbol)
                    .and_then(|cfg| cfg.config_id.clone()),
                Err(e) => {
                    warn!(account_id, error = %e, "skiplist probe failed");
                    None
                }
            }
        });
    }
    while let Some(joined) = probes.join_next().await {
        if let Ok(Some(config_id)) = joined {
            probes.abort_all();
            return Some(config_id);
        }
    }
    None
}

/// Run the skip-list claim: shared window wait, shared discovery, then
/// every account claims the broadcast id concurrently.
pub async fn run_skiplist_claims<A, F>(
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
    let mut apis: Vec<(i64, Arc<A>)> = Vec::new();

    for account in accounts {
        if !account.has_auth() {
            warn!(account_id = account.id, "missing auth headers, skipping");
            reports.push(skipped(account.id, "跳过: 缺少认证信息"));
            continue;
        }
        match make_api(account) {
            Ok(api) => apis.push((account.id, Arc::new(api))),
            Err(e) => {
                error!(account_id = account.id, error = %e, "client construction failed");
                reports.push(skipped(account.id, format!("跳过: 客户端构建失败 {e}")));
            }
        }
    }

    if apis.is_empty() {
        reports.sort_by_key(|r| r.account_id);
        return reports;
    }

    let countdown = tokio::spawn(countdown_loop(offset, target_ms));
    wait_for_window(offset, target_ms, params.schedule.advance_ms).await;
    countdown.abort();

    // Shared discovery, bounded by the same discovery window as the
    // per-account variant.
    let deadline = Instant::now() + params.schedule.query_duration;
    let mut config_id = None;
    while Instant::now() < deadline {
        config_id = find_first_claimable(&apis, &params.token_symbol).await;
        if config_id.is_some() {
            break;
        }
        tokio::time::sleep(params.schedule.query_interval).await;
    }

    let Some(config_id) = config_id else {
        warn!(token = %params.token_symbol, "no account saw a claimable airdrop");
        for (account_id, _) in &apis {
            reports.push(skipped(*account_id, "领取失败: 未检测到可领取空投"));
        }
        reports.sort_by_key(|r| r.account_id);
        return reports;
    };

    info!(config_id = %config_id, accounts = apis.len(), "broadcasting claim");

    if params.dry_run {
        for (account_id, _) in &apis {
            reports.push(ClaimReport {
                account_id: *account_id,
                success: false,
                outcome: format!("dry-run: would claim configId={config_id}"),
                attempts: 0,
                auth_failed: false,
            });
        }
        reports.sort_by_key(|r| r.account_id);
        return reports;
    }

    let mut claims = JoinSet::new();
    for (account_id, api) in &apis {
        let api = api.clone();
        let config_id = config_id.clone();
        let token_symbol = params.token_symbol.clone();
        let retry_count = params.schedule.retry_count;
        let retry_interval = params.schedule.retry_interval;
        let account_id = *account_id;
        claims.spawn(async move {
            let (success, outcome, attempts) = claim_with_retry(
                api.as_ref(),
                &config_id,
                &token_symbol,
                retry_count,
                retry_interval,
            )
            .await;
            ClaimReport {
                account_id,
                success,
                outcome,
                attempts,
                auth_failed: false,
            }
        });
    }
    while let Some(joined) = claims.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(e) => error!(error = %e, "claim task panicked"),
        }
    }

    reports.sort_by_key(|r| r.account_id);
    reports
}

fn skipped(account_id: i64, outcome: impl Into<String>) -> ClaimReport {
    ClaimReport {
        account_id,
        success: false,
        outcome: outcome.into(),
        attempts: 0,
        auth_failed: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alpha_client::{
        AirdropPage, AssetBalance, ClaimResponse, ClientResult, OrderHistoryQuery, OrderRecord,
        OrderRequest, PlaceOrderOutcome,
    };
    use alpha_core::OrderId;
    use chrono::Utc;

    /// Fake whose list query only answers for one "lucky" account.
    struct LuckyOneApi {
        lucky: bool,
    }

    impl ExchangeApi for LuckyOneApi {
        async fn server_time(&self) -> ClientResult<i64> {
            Ok(Utc::now().timestamp_millis())
        }
        async fn query_airdrop_list(&self, _: u32, _: u32) -> ClientResult<AirdropPage> {
            if !self.lucky {
                return Ok(AirdropPage::default());
            }
            let page = serde_json::json!({
                "data": { "configs": [{
                    "configId": "cfg-lucky",
                    "tokenSymbol": "BR",
                    "claimInfo": { "claimStatus": "available" }
                }]}
            });
            Ok(AirdropPage::from_value(&page))
        }
        async fn claim_airdrop(&self, config_id: &str) -> ClientResult<ClaimResponse> {
            assert_eq!(config_id, "cfg-lucky");
            Ok(serde_json::from_value(serde_json::json!({ "code": "000000" })).unwrap())
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
    async fn test_first_claimable_id_wins_for_everyone() {
        let apis: Vec<(i64, Arc<LuckyOneApi>)> = vec![
            (1, Arc::new(LuckyOneApi { lucky: false })),
            (2, Arc::new(LuckyOneApi { lucky: true })),
            (3, Arc::new(LuckyOneApi { lucky: false })),
        ];
        let config_id = find_first_claimable(&apis, "BR").await;
        assert_eq!(config_id.as_deref(), Some("cfg-lucky"));
    }

    #[tokio::test]
    async fn test_no_claimable_returns_none() {
        let apis: Vec<(i64, Arc<LuckyOneApi>)> = vec![
            (1, Arc::new(LuckyOneApi { lucky: false })),
            (2, Arc::new(LuckyOneApi { lucky: false })),
        ];
        assert_eq!(find_first_claimable(&apis, "BR").await, None);
    }
}
