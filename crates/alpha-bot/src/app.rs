//! Command flows: claim runs, the auto-trader, and reporting commands.

use crate::config::AppConfig;
use crate::context::RunContext;
use crate::error::{AppError, AppResult};
use alpha_claim::{run_claims, run_skiplist_claims, ClaimRunParams};
use alpha_client::{calibrate_offset, AlphaClient, ExchangeApi, TokenInfo};
use alpha_core::LoginStatus;
use alpha_store::AccountStore;
use alpha_trader::{token_order_stats, AutoTrader, SessionHandle, TradeState, TradingSession};
use alpha_ws::{price_stream_key, ListenKeyHandle, ListenKeyRenewer, StreamChannel, StreamPolicy};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

const CALIBRATION_SAMPLES: u32 = 5;
/// How long to wait for in-flight cycles at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
/// Event queue depth per stream class.
const EVENT_QUEUE_DEPTH: usize = 256;

/// Timed claim run (per-account discovery, or the skip-list variant).
pub async fn run_claim(config: &AppConfig, ctx: &Arc<RunContext>, skiplist: bool) -> AppResult<()> {
    let store = AccountStore::open(&config.db_url).await?;
    let accounts = store.valid_accounts().await?;
    if accounts.is_empty() {
        return Err(AppError::NoAccounts);
    }
    info!(count = accounts.len(), "accounts loaded");

    let public = AlphaClient::public()?;
    info!("calibrating server clock offset");
    let offset = calibrate_offset(&public, CALIBRATION_SAMPLES).await?;
    info!(offset_ms = offset.offset_ms(), "offset calibrated");

    let schedule = config.claim.schedule();
    let target_ms = if ctx.dry_run {
        info!("dry run: claiming window opens immediately");
        Utc::now().timestamp_millis()
    } else {
        let target = schedule.next_target();
        info!(claim_target = %target, "next claim target");
        target.timestamp_millis()
    };

    let params = ClaimRunParams {
        token_symbol: config.claim.token_symbol.clone(),
        alpha_id: config.claim.alpha_id.clone(),
        schedule,
        dry_run: ctx.dry_run,
    };

    let reports = if skiplist {
        run_skiplist_claims(&accounts, AlphaClient::for_account, &params, offset, target_ms).await
    } else {
        run_claims(&accounts, AlphaClient::for_account, &params, offset, target_ms).await
    };

    let mut successes = 0usize;
    for report in &reports {
        if report.auth_failed {
            store
                .set_login_status(report.account_id, LoginStatus::Invalid)
                .await?;
        }
        if report.success {
            successes += 1;
        }
        println!("[用户{}] {}", report.account_id, report.outcome);
    }
    info!(
        total = reports.len(),
        successes,
        failures = reports.len() - successes,
        "claim run finished"
    );
    Ok(())
}

fn resolve_token<'a>(tokens: &'a [TokenInfo], target: &str) -> Option<&'a TokenInfo> {
    tokens.iter().find(|t| {
        t.symbol.as_deref() == Some(target) || t.alpha_id.as_deref() == Some(target)
    })
}

/// Start the auto-trader for every enabled account.
pub async fn run_trade(config: &AppConfig, ctx: &Arc<RunContext>) -> AppResult<()> {
    let store = AccountStore::open(&config.db_url).await?;
    let accounts = store.valid_accounts().await?;
    if accounts.is_empty() {
        return Err(AppError::NoAccounts);
    }

    let target_token = &config.trader.target_token;
    let public = AlphaClient::public()?;
    let tokens = public.token_list().await?;
    let token = resolve_token(&tokens, target_token)
        .ok_or_else(|| AppError::UnknownToken(target_token.clone()))?;
    let alpha_id = token
        .alpha_id
        .clone()
        .ok_or_else(|| AppError::UnknownToken(format!("{target_token}: no alpha id")))?;
    let contract = token
        .contract_address
        .clone()
        .ok_or_else(|| AppError::UnknownToken(format!("{target_token}: no contract address")))?;
    let chain_id = token.chain_id.clone().unwrap_or_else(|| "56".to_string());
    let stream_key = price_stream_key(
        &config.stream.price_stream_prefix,
        &contract,
        &chain_id,
        &config.stream.kline_interval,
    );
    info!(token = %target_token, alpha_id = %alpha_id, stream_key = %stream_key, "token resolved");

    if ctx.dry_run {
        for account in &accounts {
            match config.trader.resolve_user(account.id) {
                Some(user) => info!(
                    user_id = account.id,
                    buy_amount = %user.buy_amount,
                    target_total = ?user.target_total_amount,
                    "dry run: would trade"
                ),
                None => info!(user_id = account.id, "dry run: disabled by config"),
            }
        }
        return Ok(());
    }

    let ws_config = config.stream.channel_config();
    let mut aux_tasks: JoinSet<()> = JoinSet::new();
    let mut trader_tasks: JoinSet<(i64, Result<(), alpha_trader::TraderError>)> = JoinSet::new();
    let mut handles: Vec<(i64, SessionHandle)> = Vec::new();

    for account in &accounts {
        let Some(user_conf) = config.trader.resolve_user(account.id) else {
            info!(user_id = account.id, "not enabled in trader config, skipping");
            continue;
        };
        if !account.has_auth() {
            warn!(user_id = account.id, "missing auth headers, skipping");
            continue;
        }
        let api = match AlphaClient::for_account(account) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                error!(user_id = account.id, error = %e, "client construction failed");
                continue;
            }
        };

        // The order stream needs the account's renewable credential up
        // front; a 401 here means dead credentials, not a transient.
        let listen_key = match api.listen_key().await {
            Ok(key) => key,
            Err(e) => {
                if e.is_auth_failure() {
                    store
                        .set_login_status(account.id, LoginStatus::Invalid)
                        .await?;
                }
                warn!(user_id = account.id, error = %e, "listen key fetch failed, skipping");
                continue;
            }
        };
        let key_handle = ListenKeyHandle::new(listen_key);

        // One channel instance per account and class, so consumers never
        // see another account's events.
        let (order_tx, order_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (price_tx, price_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let order_channel = StreamChannel::new(
            ws_config.clone(),
            StreamPolicy::order(&config.stream.order_ws_url, key_handle.clone()),
            order_tx,
            ctx.shutdown_token(),
        );
        let resubscribe = order_channel.resubscribe_handle();
        let price_channel = StreamChannel::new(
            ws_config.clone(),
            StreamPolicy::price(&config.stream.price_ws_url, stream_key.clone()),
            price_tx,
            ctx.shutdown_token(),
        );
        let order_account = account.id;
        aux_tasks.spawn(async move {
            if let Err(e) = order_channel.run().await {
                error!(user_id = order_account, error = %e, "order channel ended");
            }
        });
        let price_account = account.id;
        aux_tasks.spawn(async move {
            if let Err(e) = price_channel.run().await {
                error!(user_id = price_account, error = %e, "price channel ended");
            }
        });
        aux_tasks.spawn(
            ListenKeyRenewer::new(
                api.clone(),
                key_handle,
                config.stream.renew_interval(),
                resubscribe,
                ctx.shutdown_token(),
            )
            .run(),
        );

        let session = TradingSession::new(
            account.id,
            alpha_id.clone(),
            target_token.clone(),
            user_conf.buy_amount,
            user_conf.target_total_amount,
        );
        let mut trader = AutoTrader::new(
            api,
            config.trader.trader_config(&user_conf),
            session,
            order_rx,
            price_rx,
            ctx.classifier.clone(),
        );
        handles.push((account.id, trader.status()));
        let stop = ctx.shutdown_token();
        let user_id = account.id;
        trader_tasks.spawn(async move { (user_id, trader.run(stop).await) });
    }

    if handles.is_empty() {
        return Err(AppError::NoAccounts);
    }
    info!(traders = handles.len(), "trading started");

    let shutdown = ctx.shutdown_token();
    loop {
        tokio::select! {
            joined = trader_tasks.join_next() => match joined {
                None => {
                    info!("all trading tasks finished");
                    break;
                }
                Some(Ok((user_id, Ok(())))) => info!(user_id, "trader finished"),
                Some(Ok((user_id, Err(e)))) => error!(user_id, error = %e, "trader failed"),
                Some(Err(e)) => error!(error = %e, "trader task panicked"),
            },
            () = shutdown.cancelled() => {
                info!(reason = ?ctx.shutdown_reason(), "shutdown requested, draining");
                wait_for_idle(&handles, DRAIN_TIMEOUT).await;
                break;
            }
        }
    }

    // Stop channels and renewers in the natural-completion case too.
    ctx.request_shutdown("trading complete");
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        while trader_tasks.join_next().await.is_some() {}
        while aux_tasks.join_next().await.is_some() {}
    })
    .await;

    log_final_stats(&handles, ctx);
    Ok(())
}

/// Poll session handles until every account is idle or the timeout
/// expires.
async fn wait_for_idle(handles: &[(i64, SessionHandle)], timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        let mut all_idle = true;
        for (user_id, handle) in handles {
            let snapshot = handle.snapshot();
            if snapshot.state != TradeState::Idle {
                all_idle = false;
                info!(
                    user_id,
                    state = %snapshot.state,
                    order = ?snapshot.current_order,
                    "waiting for cycle to finish"
                );
            }
        }
        if all_idle {
            info!("all cycles finished");
            return;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    warn!(timeout_secs = timeout.as_secs(), "drain timed out");
}

fn log_final_stats(handles: &[(i64, SessionHandle)], ctx: &Arc<RunContext>) {
    let mut total_trades = 0u32;
    for (user_id, handle) in handles {
        let snapshot = handle.snapshot();
        info!(
            user_id,
            trades = snapshot.trade_count,
            total_traded = %snapshot.total_traded,
            state = %snapshot.state,
            "final account stats"
        );
        total_trades += snapshot.trade_count;
    }
    info!(total_trades, reason = ?ctx.shutdown_reason(), "run summary");
    for (kind, count) in ctx.classifier.stats() {
        info!(kind = %kind, count, "error counter");
    }
}

/// Print day order statistics for every account.
pub async fn run_order_stats(config: &AppConfig) -> AppResult<()> {
    let store = AccountStore::open(&config.db_url).await?;
    let accounts = store.valid_accounts().await?;
    if accounts.is_empty() {
        return Err(AppError::NoAccounts);
    }

    let target_token = &config.trader.target_token;
    let public = AlphaClient::public()?;
    let tokens = public.token_list().await?;
    let token = resolve_token(&tokens, target_token)
        .ok_or_else(|| AppError::UnknownToken(target_token.clone()))?;
    let alpha_id = token
        .alpha_id
        .clone()
        .ok_or_else(|| AppError::UnknownToken(format!("{target_token}: no alpha id")))?;

    for account in &accounts {
        if !account.has_auth() {
            warn!(user_id = account.id, "missing auth headers, skipping");
            continue;
        }
        let api = match AlphaClient::for_account(account) {
            Ok(client) => client,
            Err(e) => {
                error!(user_id = account.id, error = %e, "client construction failed");
                continue;
            }
        };
        match token_order_stats(&api, &alpha_id, &config.trader.system.quote_currency).await {
            Ok(stats) => {
                println!(
                    "[用户{}] {} 买入{}笔/{:.2} 卖出{}笔/{:.2} 净额{:.2}",
                    account.id,
                    target_token,
                    stats.buy_count,
                    stats.buy_amount,
                    stats.sell_count,
                    stats.sell_amount,
                    stats.net_amount()
                );
            }
            Err(e) => error!(user_id = account.id, error = %e, "order stats failed"),
        }
    }
    Ok(())
}

/// Print the public token list as JSON.
pub async fn run_token_info() -> AppResult<()> {
    let public = AlphaClient::public()?;
    let tokens = public.token_list().await?;
    let json = serde_json::to_string_pretty(&tokens)
        .map_err(|e| AppError::Config(format!("serialize token list: {e}")))?;
    println!("{json}");
    info!(count = tokens.len(), "token list fetched");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(symbol: &str, alpha_id: &str) -> TokenInfo {
        TokenInfo {
            symbol: Some(symbol.to_string()),
            alpha_id: Some(alpha_id.to_string()),
            contract_address: Some("0xabc".to_string()),
            chain_id: Some("56".to_string()),
        }
    }

    #[test]
    fn test_resolve_token_by_symbol_or_alpha_id() {
        let tokens = vec![token("BR", "ALPHA_118"), token("CROSS", "ALPHA_259")];
        assert_eq!(
            resolve_token(&tokens, "CROSS").unwrap().alpha_id.as_deref(),
            Some("ALPHA_259")
        );
        assert_eq!(
            resolve_token(&tokens, "ALPHA_118").unwrap().symbol.as_deref(),
            Some("BR")
        );
        assert!(resolve_token(&tokens, "MPLX").is_none());
    }
}
