//! Streaming-order-driven trading loop.
//!
//! Per account: buy at a marketable limit, wait for the authoritative
//! fill notification on the order stream, then liquidate the filled
//! position with partial-fill and insufficient-balance recovery.

pub mod error;
pub mod history;
pub mod session;
pub mod trader;

pub use error::{TraderError, TraderResult};
pub use history::{cumulative_buy_amount, day_window, fetch_all_orders, token_order_stats, TokenOrderStats};
pub use session::{SessionHandle, SessionSnapshot, TradeState, TradingSession};
pub use trader::{compute_buy_order, compute_sell_price, AutoTrader, CycleOutcome, TraderConfig};
