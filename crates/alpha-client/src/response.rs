//! Tagged response types for the exchange endpoints.
//!
//! The wire shapes are deserialized here, once, into enums the rest of
//! the system branches on. Numeric fields arrive as strings or numbers
//! depending on the endpoint, so parsing accepts both.

use alpha_core::{OrderId, OrderSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

/// Success code shared by most private endpoints.
pub const CODE_OK: &str = "000000";
/// Rejection code for an order exceeding the available balance.
pub const CODE_INSUFFICIENT_BALANCE: &str = "481020";
/// Rejection code for an order below the minimum notional.
pub const CODE_BELOW_MIN_NOTIONAL: &str = "481013";

fn de_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => s.parse().map_err(serde::de::Error::custom),
        serde_json::Value::Number(n) => n.to_string().parse().map_err(serde::de::Error::custom),
        serde_json::Value::Null => Ok(Decimal::ZERO),
        other => Err(serde::de::Error::custom(format!(
            "expected decimal, got {other}"
        ))),
    }
}

fn de_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Claim metadata attached to an airdrop configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimInfo {
    #[serde(default)]
    pub can_claim: bool,
    #[serde(default)]
    pub claim_status: Option<String>,
    #[serde(default)]
    pub is_claimed: bool,
}

/// One airdrop configuration from the list endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirdropConfig {
    #[serde(deserialize_with = "de_opt_string", default)]
    pub config_id: Option<String>,
    #[serde(default)]
    pub token_symbol: Option<String>,
    #[serde(default)]
    pub alpha_id: Option<String>,
    #[serde(default)]
    pub claim_info: Option<ClaimInfo>,
}

impl AirdropConfig {
    /// Whether the exchange currently reports this airdrop as claimable.
    pub fn is_claimable(&self) -> bool {
        self.claim_info.as_ref().is_some_and(|info| {
            info.can_claim || info.claim_status.as_deref() == Some("available")
        })
    }

    /// Match against a target token symbol and/or alpha id. Empty target
    /// strings are treated as wildcards, matching the lookup semantics of
    /// the claim configuration.
    pub fn matches(&self, token_symbol: &str, alpha_id: &str) -> bool {
        let by_symbol =
            !token_symbol.is_empty() && self.token_symbol.as_deref() == Some(token_symbol);
        let by_alpha = !alpha_id.is_empty() && self.alpha_id.as_deref() == Some(alpha_id);
        by_symbol || by_alpha
    }
}

/// One page of the airdrop list.
#[derive(Debug, Clone, Default)]
pub struct AirdropPage {
    pub configs: Vec<AirdropConfig>,
}

impl AirdropPage {
    pub fn from_value(value: &serde_json::Value) -> Self {
        let configs = value
            .pointer("/data/configs")
            .and_then(|c| c.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Self { configs }
    }

    /// First configuration matching the target token, if any.
    pub fn find(&self, token_symbol: &str, alpha_id: &str) -> Option<&AirdropConfig> {
        self.configs
            .iter()
            .find(|cfg| cfg.matches(token_symbol, alpha_id))
    }

    /// First claimable configuration, optionally restricted to a token.
    pub fn find_claimable(&self, token_symbol: &str) -> Option<&AirdropConfig> {
        self.configs.iter().find(|cfg| {
            cfg.is_claimable()
                && (token_symbol.is_empty()
                    || cfg.token_symbol.as_deref() == Some(token_symbol))
        })
    }
}

/// Raw claim-endpoint response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClaimResponse {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<ClaimData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimData {
    #[serde(default)]
    pub claim_info: Option<ClaimInfo>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Interpreted claim result. `Claimed`, `AlreadyClaimed` and `Ended` are
/// all terminal: retrying past any of them is wasted work and may itself
/// error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyClaimed,
    Ended,
    Rejected {
        code: Option<String>,
        message: String,
    },
}

impl ClaimOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Claimed | Self::AlreadyClaimed)
    }
}

impl ClaimResponse {
    pub fn outcome(&self) -> ClaimOutcome {
        let claim_info = self.data.as_ref().and_then(|d| d.claim_info.as_ref());
        let status = self.data.as_ref().and_then(|d| d.status.as_deref());

        if let Some(info) = claim_info {
            if info.is_claimed || matches!(info.claim_status.as_deref(), Some("success" | "claimed"))
            {
                return ClaimOutcome::AlreadyClaimed;
            }
        }
        if status == Some("ended") {
            return ClaimOutcome::Ended;
        }
        if self.code.as_deref() == Some(CODE_OK) {
            return ClaimOutcome::Claimed;
        }
        ClaimOutcome::Rejected {
            code: self.code.clone(),
            message: self
                .message
                .clone()
                .unwrap_or_else(|| "no message".to_string()),
        }
    }
}

/// Payment marker attached to order placement.
#[derive(Debug, Clone)]
pub struct PaymentDetail {
    pub amount: Decimal,
    pub wallet_type: String,
}

/// Limit order submission parameters.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub base_asset: String,
    pub quote_asset: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub payment: Option<PaymentDetail>,
}

/// Interpreted order-placement result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceOrderOutcome {
    Accepted {
        order_id: OrderId,
    },
    Rejected {
        code: Option<String>,
        message: String,
    },
}

impl PlaceOrderOutcome {
    pub fn from_value(value: &serde_json::Value) -> Self {
        let success = value
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let order_id = value.get("data").and_then(|d| match d {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        if success {
            if let Some(id) = order_id {
                return Self::Accepted {
                    order_id: OrderId::new(id),
                };
            }
        }
        Self::Rejected {
            code: value
                .get("code")
                .and_then(|c| c.as_str())
                .map(str::to_string),
            message: value
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("no message")
                .to_string(),
        }
    }

    pub fn rejected_with_code(&self, code: &str) -> bool {
        matches!(self, Self::Rejected { code: Some(c), .. } if c == code)
    }
}

/// One asset entry from the wallet balance endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    #[serde(deserialize_with = "de_decimal", default)]
    pub amount: Decimal,
}

/// One order from the history endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    #[serde(deserialize_with = "de_opt_string", default)]
    pub order_id: Option<String>,
    #[serde(deserialize_with = "de_decimal", default)]
    pub avg_price: Decimal,
    #[serde(deserialize_with = "de_decimal", default)]
    pub executed_qty: Decimal,
    /// The endpoint reports the status under either key.
    #[serde(default)]
    pub order_status: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl OrderRecord {
    pub fn is_filled(&self) -> bool {
        self.order_status.as_deref() == Some("FILLED") || self.status.as_deref() == Some("FILLED")
    }

    /// Notional of the executed part: avg price * executed quantity.
    pub fn executed_notional(&self) -> Decimal {
        self.avg_price * self.executed_qty
    }
}

/// Pagination and filter parameters for the order-history endpoint.
#[derive(Debug, Clone)]
pub struct OrderHistoryQuery {
    pub base_asset: String,
    pub quote_asset: String,
    pub side: OrderSide,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub page: u32,
    pub rows: u32,
}

/// One token from the public token-list endpoint.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub alpha_id: Option<String>,
    #[serde(default)]
    pub contract_address: Option<String>,
    #[serde(deserialize_with = "de_opt_string", default)]
    pub chain_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_airdrop_page_parse_and_find() {
        let value = json!({
            "data": { "configs": [
                {
                    "configId": "cfg-1",
                    "tokenSymbol": "BR",
                    "alphaId": "ALPHA_118",
                    "claimInfo": { "canClaim": false, "claimStatus": "pending" }
                },
                {
                    "configId": 77,
                    "tokenSymbol": "CROSS",
                    "alphaId": "ALPHA_259",
                    "claimInfo": { "canClaim": true }
                }
            ]}
        });
        let page = AirdropPage::from_value(&value);
        assert_eq!(page.configs.len(), 2);

        let cfg = page.find("CROSS", "").expect("symbol match");
        assert_eq!(cfg.config_id.as_deref(), Some("77"));
        assert!(cfg.is_claimable());

        let cfg = page.find("", "ALPHA_118").expect("alpha id match");
        assert_eq!(cfg.token_symbol.as_deref(), Some("BR"));
        assert!(!cfg.is_claimable());

        assert!(page.find("MPLX", "").is_none());
        assert_eq!(
            page.find_claimable("").unwrap().config_id.as_deref(),
            Some("77")
        );
    }

    #[test]
    fn test_claim_outcome_success_code() {
        let resp: ClaimResponse =
            serde_json::from_value(json!({ "code": "000000", "message": "ok" })).unwrap();
        assert_eq!(resp.outcome(), ClaimOutcome::Claimed);
        assert!(resp.outcome().is_terminal());
    }

    #[test]
    fn test_claim_outcome_already_claimed() {
        let resp: ClaimResponse = serde_json::from_value(json!({
            "code": "ERR",
            "data": { "claimInfo": { "claimStatus": "success" } }
        }))
        .unwrap();
        assert_eq!(resp.outcome(), ClaimOutcome::AlreadyClaimed);

        let resp: ClaimResponse = serde_json::from_value(json!({
            "data": { "claimInfo": { "isClaimed": true } }
        }))
        .unwrap();
        assert_eq!(resp.outcome(), ClaimOutcome::AlreadyClaimed);
    }

    #[test]
    fn test_claim_outcome_ended_and_rejected() {
        let resp: ClaimResponse = serde_json::from_value(json!({
            "code": "900001",
            "data": { "status": "ended" }
        }))
        .unwrap();
        assert_eq!(resp.outcome(), ClaimOutcome::Ended);
        assert!(resp.outcome().is_terminal());
        assert!(!resp.outcome().is_success());

        let resp: ClaimResponse = serde_json::from_value(json!({
            "code": "900001",
            "message": "not eligible"
        }))
        .unwrap();
        assert!(!resp.outcome().is_terminal());
    }

    #[test]
    fn test_place_order_outcome() {
        let accepted = PlaceOrderOutcome::from_value(&json!({
            "success": true, "data": "123456789"
        }));
        assert_eq!(
            accepted,
            PlaceOrderOutcome::Accepted {
                order_id: OrderId::new("123456789")
            }
        );

        let rejected = PlaceOrderOutcome::from_value(&json!({
            "success": false, "code": "481020", "message": "余额不足"
        }));
        assert!(rejected.rejected_with_code(CODE_INSUFFICIENT_BALANCE));
        assert!(!rejected.rejected_with_code(CODE_BELOW_MIN_NOTIONAL));
    }

    #[test]
    fn test_balance_and_order_record_decimals() {
        let balance: AssetBalance =
            serde_json::from_value(json!({ "asset": "BR", "amount": "12.4875" })).unwrap();
        assert_eq!(balance.amount.to_string(), "12.4875");

        let record: OrderRecord = serde_json::from_value(json!({
            "orderId": 42,
            "avgPrice": "2.02",
            "executedQty": 4.9,
            "orderStatus": "FILLED"
        }))
        .unwrap();
        assert!(record.is_filled());
        assert_eq!(record.executed_notional().to_string(), "9.898");
    }
}
