//! Application configuration.

use crate::error::{AppError, AppResult};
use alpha_claim::ClaimSchedule;
use alpha_trader::TraderConfig;
use alpha_ws::ChannelConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration, loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_db_url")]
    pub db_url: String,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub claim: ClaimConfig,
    #[serde(default)]
    pub trader: TraderSection,
}

fn default_db_url() -> String {
    "sqlite://data/alpha_users.db".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_url: default_db_url(),
            stream: StreamConfig::default(),
            claim: ClaimConfig::default(),
            trader: TraderSection::default(),
        }
    }
}

impl AppConfig {
    /// Load from a specific file, or fall back to defaults when the
    /// file does not exist.
    pub fn load(path: &str) -> AppResult<Self> {
        if !Path::new(path).exists() {
            tracing::warn!(%path, "config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("failed to read {path}: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("failed to parse {path}: {e}")))
    }
}

/// Streaming endpoints and connection tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_order_ws_url")]
    pub order_ws_url: String,
    #[serde(default = "default_price_ws_url")]
    pub price_ws_url: String,
    #[serde(default = "default_price_stream_prefix")]
    pub price_stream_prefix: String,
    #[serde(default = "default_kline_interval")]
    pub kline_interval: String,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_listen_key_renew_secs")]
    pub listen_key_renew_secs: u64,
}

fn default_order_ws_url() -> String {
    "wss://nbstream.binance.com/w3w/stream".to_string()
}

fn default_price_ws_url() -> String {
    "wss://nbstream.binance.com/w3w/wsa/stream".to_string()
}

fn default_price_stream_prefix() -> String {
    "came".to_string()
}

fn default_kline_interval() -> String {
    "1s".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_heartbeat_interval_ms() -> u64 {
    20000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10000
}

fn default_idle_timeout_ms() -> u64 {
    90000
}

fn default_listen_key_renew_secs() -> u64 {
    1800
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            order_ws_url: default_order_ws_url(),
            price_ws_url: default_price_ws_url(),
            price_stream_prefix: default_price_stream_prefix(),
            kline_interval: default_kline_interval(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            listen_key_renew_secs: default_listen_key_renew_secs(),
        }
    }
}

impl StreamConfig {
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_base_delay_ms: self.reconnect_base_delay_ms,
            reconnect_max_delay_ms: 60000,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            heartbeat_timeout_ms: self.heartbeat_timeout_ms,
            idle_timeout_ms: self.idle_timeout_ms,
        }
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.listen_key_renew_secs)
    }
}

/// Claim run parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimConfig {
    #[serde(default)]
    pub token_symbol: String,
    #[serde(default)]
    pub alpha_id: String,
    #[serde(default = "default_target_hour")]
    pub target_hour: u32,
    #[serde(default)]
    pub target_minute: u32,
    #[serde(default)]
    pub target_second: u32,
    #[serde(default = "default_advance_ms")]
    pub advance_ms: i64,
    #[serde(default = "default_claim_retry_times")]
    pub claim_retry_times: u32,
    #[serde(default = "default_claim_retry_interval_secs")]
    pub claim_retry_interval_secs: f64,
    #[serde(default = "default_query_interval_secs")]
    pub query_interval_secs: f64,
    #[serde(default = "default_query_duration_secs")]
    pub query_duration_secs: f64,
}

fn default_target_hour() -> u32 {
    8
}

fn default_advance_ms() -> i64 {
    120
}

fn default_claim_retry_times() -> u32 {
    3
}

fn default_claim_retry_interval_secs() -> f64 {
    0.5
}

fn default_query_interval_secs() -> f64 {
    0.2
}

fn default_query_duration_secs() -> f64 {
    10.0
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            token_symbol: String::new(),
            alpha_id: String::new(),
            target_hour: default_target_hour(),
            target_minute: 0,
            target_second: 0,
            advance_ms: default_advance_ms(),
            claim_retry_times: default_claim_retry_times(),
            claim_retry_interval_secs: default_claim_retry_interval_secs(),
            query_interval_secs: default_query_interval_secs(),
            query_duration_secs: default_query_duration_secs(),
        }
    }
}

impl ClaimConfig {
    pub fn schedule(&self) -> ClaimSchedule {
        ClaimSchedule {
            target_hour: self.target_hour,
            target_minute: self.target_minute,
            target_second: self.target_second,
            advance_ms: self.advance_ms,
            retry_count: self.claim_retry_times,
            retry_interval: Duration::from_secs_f64(self.claim_retry_interval_secs),
            query_interval: Duration::from_secs_f64(self.query_interval_secs),
            query_duration: Duration::from_secs_f64(self.query_duration_secs),
        }
    }
}

/// Trader parameters: global defaults plus per-user overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct TraderSection {
    #[serde(default)]
    pub target_token: String,
    #[serde(default = "default_buy_amount")]
    pub buy_amount: Decimal,
    #[serde(default = "default_slippage")]
    pub buy_slippage: Decimal,
    #[serde(default = "default_slippage")]
    pub sell_slippage: Decimal,
    #[serde(default)]
    pub target_total_amount: Option<Decimal>,
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default = "default_order_wait_secs")]
    pub order_wait_secs: u64,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub users: Vec<UserOverride>,
}

fn default_buy_amount() -> Decimal {
    dec!(10)
}

fn default_slippage() -> Decimal {
    dec!(0.002)
}

fn default_max_retry() -> u32 {
    5
}

fn default_order_wait_secs() -> u64 {
    120
}

impl Default for TraderSection {
    fn default() -> Self {
        Self {
            target_token: String::new(),
            buy_amount: default_buy_amount(),
            buy_slippage: default_slippage(),
            sell_slippage: default_slippage(),
            target_total_amount: None,
            max_retry: default_max_retry(),
            order_wait_secs: default_order_wait_secs(),
            system: SystemConfig::default(),
            users: Vec::new(),
        }
    }
}

/// Exchange-level trading constants.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_quote_currency")]
    pub quote_currency: String,
    #[serde(default = "default_buy_payment_type")]
    pub buy_payment_type: String,
    #[serde(default = "default_sell_payment_type")]
    pub sell_payment_type: String,
    #[serde(default = "default_min_sell_quantity")]
    pub min_sell_quantity: Decimal,
    #[serde(default = "default_price_precision")]
    pub price_precision: Decimal,
    #[serde(default = "default_quantity_step")]
    pub quantity_step: Decimal,
    #[serde(default = "default_min_balance_threshold")]
    pub min_balance_threshold: Decimal,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_balance_settle_delay_ms")]
    pub balance_settle_delay_ms: u64,
    #[serde(default = "default_max_balance_errors")]
    pub max_balance_errors: u32,
    #[serde(default = "default_true")]
    pub enable_auto_sell_on_insufficient_balance: bool,
}

fn default_quote_currency() -> String {
    "USDT".to_string()
}

fn default_buy_payment_type() -> String {
    "CARD".to_string()
}

fn default_sell_payment_type() -> String {
    "ALPHA".to_string()
}

fn default_min_sell_quantity() -> Decimal {
    dec!(0.01)
}

fn default_price_precision() -> Decimal {
    dec!(0.00000001)
}

fn default_quantity_step() -> Decimal {
    dec!(0.1)
}

fn default_min_balance_threshold() -> Decimal {
    dec!(0.01)
}

fn default_settle_delay_ms() -> u64 {
    300
}

fn default_balance_settle_delay_ms() -> u64 {
    1000
}

fn default_max_balance_errors() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            quote_currency: default_quote_currency(),
            buy_payment_type: default_buy_payment_type(),
            sell_payment_type: default_sell_payment_type(),
            min_sell_quantity: default_min_sell_quantity(),
            price_precision: default_price_precision(),
            quantity_step: default_quantity_step(),
            min_balance_threshold: default_min_balance_threshold(),
            settle_delay_ms: default_settle_delay_ms(),
            balance_settle_delay_ms: default_balance_settle_delay_ms(),
            max_balance_errors: default_max_balance_errors(),
            enable_auto_sell_on_insufficient_balance: default_true(),
        }
    }
}

/// Per-user trading overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct UserOverride {
    pub user_id: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub buy_amount: Option<Decimal>,
    #[serde(default)]
    pub buy_slippage: Option<Decimal>,
    #[serde(default)]
    pub sell_slippage: Option<Decimal>,
    #[serde(default)]
    pub target_total_amount: Option<Decimal>,
}

/// Effective trading parameters for one user after override merging.
#[derive(Debug, Clone)]
pub struct ResolvedUserConfig {
    pub buy_amount: Decimal,
    pub buy_slippage: Decimal,
    pub sell_slippage: Decimal,
    pub target_total_amount: Option<Decimal>,
}

impl TraderSection {
    /// Effective parameters for a user. Returns `None` when a user list
    /// is configured and the user is absent or disabled.
    pub fn resolve_user(&self, user_id: i64) -> Option<ResolvedUserConfig> {
        let defaults = ResolvedUserConfig {
            buy_amount: self.buy_amount,
            buy_slippage: self.buy_slippage,
            sell_slippage: self.sell_slippage,
            target_total_amount: self.target_total_amount,
        };
        if self.users.is_empty() {
            return Some(defaults);
        }
        let entry = self.users.iter().find(|u| u.user_id == user_id)?;
        if !entry.enabled {
            return None;
        }
        Some(ResolvedUserConfig {
            buy_amount: entry.buy_amount.unwrap_or(defaults.buy_amount),
            buy_slippage: entry.buy_slippage.unwrap_or(defaults.buy_slippage),
            sell_slippage: entry.sell_slippage.unwrap_or(defaults.sell_slippage),
            target_total_amount: entry.target_total_amount.or(defaults.target_total_amount),
        })
    }

    /// Build the trader config for one resolved user.
    pub fn trader_config(&self, user: &ResolvedUserConfig) -> TraderConfig {
        TraderConfig {
            quote_asset: self.system.quote_currency.clone(),
            buy_payment_type: self.system.buy_payment_type.clone(),
            sell_payment_type: self.system.sell_payment_type.clone(),
            buy_slippage: user.buy_slippage,
            sell_slippage: user.sell_slippage,
            price_precision: self.system.price_precision,
            quantity_step: self.system.quantity_step,
            min_sell_quantity: self.system.min_sell_quantity,
            min_balance_threshold: self.system.min_balance_threshold,
            order_wait: Duration::from_secs(self.order_wait_secs),
            settle_delay: Duration::from_millis(self.system.settle_delay_ms),
            balance_settle_delay: Duration::from_millis(self.system.balance_settle_delay_ms),
            max_retry: self.max_retry,
            max_balance_errors: self.system.max_balance_errors,
            auto_sell_on_insufficient_balance: self
                .system
                .enable_auto_sell_on_insufficient_balance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.claim.target_hour, 8);
        assert_eq!(config.claim.advance_ms, 120);
        assert_eq!(config.trader.buy_amount, dec!(10));
        assert_eq!(config.stream.kline_interval, "1s");
    }

    #[test]
    fn test_parse_with_overrides() {
        let toml_text = r#"
            db_url = "sqlite://test.db"

            [claim]
            token_symbol = "BR"
            target_hour = 20
            advance_ms = 80

            [trader]
            target_token = "BR"
            buy_amount = 25.0
            target_total_amount = 200.0

            [[trader.users]]
            user_id = 1
            buy_amount = 50.0

            [[trader.users]]
            user_id = 2
            enabled = false
        "#;
        let config: AppConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(config.db_url, "sqlite://test.db");
        assert_eq!(config.claim.target_hour, 20);

        let user1 = config.trader.resolve_user(1).expect("enabled");
        assert_eq!(user1.buy_amount, dec!(50.0));
        assert_eq!(user1.target_total_amount, Some(dec!(200.0)));

        assert!(config.trader.resolve_user(2).is_none());
        assert!(config.trader.resolve_user(3).is_none());
    }

    #[test]
    fn test_resolve_without_user_list_uses_globals() {
        let section = TraderSection::default();
        let resolved = section.resolve_user(42).expect("no list means everyone");
        assert_eq!(resolved.buy_amount, dec!(10));
        assert_eq!(resolved.target_total_amount, None);
    }

    #[test]
    fn test_schedule_conversion() {
        let claim = ClaimConfig {
            claim_retry_interval_secs: 0.5,
            ..ClaimConfig::default()
        };
        let schedule = claim.schedule();
        assert_eq!(schedule.retry_interval, Duration::from_millis(500));
        assert_eq!(schedule.advance_ms, 120);
    }
}
