//! Order-history accounting.
//!
//! The exchange records executed notional externally; the trading loop
//! re-queries it at checkpoints to enforce lifetime caps. The daily
//! window is bounded at 08:00 local, matching the exchange's accounting
//! day.

use alpha_client::{ClientResult, ExchangeApi, OrderHistoryQuery, OrderRecord};
use alpha_core::OrderSide;
use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone};
use rust_decimal::Decimal;
use tracing::debug;

const PAGE_ROWS: u32 = 500;
/// Hard page cap so a misbehaving endpoint cannot loop forever.
const MAX_PAGES: u32 = 10;

/// The 24h accounting window containing `now`, split at 08:00 local.
/// Returns `(start_ms, end_ms)` epoch milliseconds.
pub fn day_window(now: DateTime<Local>) -> (i64, i64) {
    let eight = now
        .date_naive()
        .and_hms_opt(8, 0, 0)
        .expect("valid wall-clock time");
    let today_eight = Local.from_local_datetime(&eight).earliest().unwrap_or(now);
    let (start, end) = if now < today_eight {
        (today_eight - ChronoDuration::days(1), today_eight)
    } else {
        (today_eight, today_eight + ChronoDuration::days(1))
    };
    (start.timestamp_millis(), end.timestamp_millis())
}

/// Fetch every order for one side within a time range, merging pages.
pub async fn fetch_all_orders<A: ExchangeApi>(
    api: &A,
    base_asset: &str,
    quote_asset: &str,
    side: OrderSide,
    start_time_ms: i64,
    end_time_ms: i64,
) -> ClientResult<Vec<OrderRecord>> {
    let mut all = Vec::new();
    for page in 1..=MAX_PAGES {
        let query = OrderHistoryQuery {
            base_asset: base_asset.to_string(),
            quote_asset: quote_asset.to_string(),
            side,
            start_time_ms,
            end_time_ms,
            page,
            rows: PAGE_ROWS,
        };
        let orders = api.order_history(&query).await?;
        let count = orders.len();
        debug!(base_asset, %side, page, count, "order history page");
        if count == 0 {
            break;
        }
        all.extend(orders);
        if (count as u32) < PAGE_ROWS {
            break;
        }
    }
    Ok(all)
}

/// Cumulative executed buy notional for the current accounting day.
pub async fn cumulative_buy_amount<A: ExchangeApi>(
    api: &A,
    base_asset: &str,
    quote_asset: &str,
) -> ClientResult<Decimal> {
    let (start_ms, end_ms) = day_window(Local::now());
    let orders =
        fetch_all_orders(api, base_asset, quote_asset, OrderSide::Buy, start_ms, end_ms).await?;
    Ok(filled_notional(&orders))
}

fn filled_notional(orders: &[OrderRecord]) -> Decimal {
    orders
        .iter()
        .filter(|o| o.is_filled())
        .map(|o| o.executed_notional())
        .sum()
}

/// Aggregated day statistics for one token.
#[derive(Debug, Clone, Default)]
pub struct TokenOrderStats {
    pub buy_count: usize,
    pub buy_amount: Decimal,
    pub buy_quantity: Decimal,
    pub sell_count: usize,
    pub sell_amount: Decimal,
    pub sell_quantity: Decimal,
}

impl TokenOrderStats {
    pub fn net_amount(&self) -> Decimal {
        self.buy_amount - self.sell_amount
    }

    pub fn net_quantity(&self) -> Decimal {
        self.buy_quantity - self.sell_quantity
    }
}

pub(crate) fn fold_stats(buys: &[OrderRecord], sells: &[OrderRecord]) -> TokenOrderStats {
    let mut stats = TokenOrderStats::default();
    for order in buys.iter().filter(|o| o.is_filled()) {
        stats.buy_count += 1;
        stats.buy_amount += order.executed_notional();
        stats.buy_quantity += order.executed_qty;
    }
    for order in sells.iter().filter(|o| o.is_filled()) {
        stats.sell_count += 1;
        stats.sell_amount += order.executed_notional();
        stats.sell_quantity += order.executed_qty;
    }
    stats
}

/// Both-sides day statistics for one token.
pub async fn token_order_stats<A: ExchangeApi>(
    api: &A,
    base_asset: &str,
    quote_asset: &str,
) -> ClientResult<TokenOrderStats> {
    let (start_ms, end_ms) = day_window(Local::now());
    let buys =
        fetch_all_orders(api, base_asset, quote_asset, OrderSide::Buy, start_ms, end_ms).await?;
    let sells =
        fetch_all_orders(api, base_asset, quote_asset, OrderSide::Sell, start_ms, end_ms).await?;
    Ok(fold_stats(&buys, &sells))
}
