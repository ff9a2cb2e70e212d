//! Authenticated HTTP client for the exchange's alpha endpoints.

use crate::api::ExchangeApi;
use crate::error::{ClientError, ClientResult};
use crate::response::{
    AirdropPage, AssetBalance, ClaimResponse, OrderHistoryQuery, OrderRecord, OrderRequest,
    PlaceOrderOutcome, TokenInfo, CODE_OK,
};
use alpha_core::{Account, OrderId};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Default base URL for private endpoints.
pub const DEFAULT_BASE_URL: &str = "https://www.binance.com";
/// Default server-time endpoint (lives on the public API host).
pub const DEFAULT_TIME_URL: &str = "https://api.binance.com/api/v3/time";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const AIRDROP_LIST_PATH: &str =
    "/bapi/defi/v1/friendly/wallet-direct/buw/growth/query-alpha-airdrop";
const CLAIM_PATH: &str = "/bapi/defi/v1/private/wallet-direct/buw/growth/claim-alpha-airdrop";
const PLACE_ORDER_PATH: &str = "/bapi/asset/v1/private/alpha-trade/order/place";
const CANCEL_ORDER_PATH: &str = "/bapi/asset/v1/private/alpha-trade/order/cancel";
const WALLET_BALANCE_PATH: &str =
    "/bapi/asset/v2/private/asset-service/wallet/asset?needAlphaAsset=1&quoteAsset=USDT";
const ORDER_HISTORY_PATH: &str =
    "/bapi/defi/v1/private/alpha-trade/order/get-order-history-merge";
const LISTEN_KEY_PATH: &str = "/bapi/defi/v1/private/alpha-trade/get-listen-key";
const TOKEN_LIST_PATH: &str =
    "/bapi/defi/v1/public/wallet-direct/buw/wallet/cex/alpha/all/token/list";

/// Per-account HTTP client.
///
/// Carries the account's opaque auth headers/cookies on every request.
pub struct AlphaClient {
    http: Client,
    headers: HeaderMap,
    base_url: String,
    time_url: String,
}

impl AlphaClient {
    /// Build a client from an account's captured credentials.
    pub fn for_account(account: &Account) -> ClientResult<Self> {
        let mut headers = HeaderMap::new();
        for (key, value) in &account.auth_headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ClientError::Malformed(format!("bad header name {key}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ClientError::Malformed(format!("bad header value for {key}: {e}")))?;
            headers.insert(name, value);
        }
        if let Some(cookies) = &account.auth_cookies {
            if !cookies.is_empty() {
                let cookie_line = cookies
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                headers.insert(
                    COOKIE,
                    HeaderValue::from_str(&cookie_line)
                        .map_err(|e| ClientError::Malformed(format!("bad cookie value: {e}")))?,
                );
            }
        }
        Self::build(headers)
    }

    /// Unauthenticated client for public endpoints (server time, token list).
    pub fn public() -> ClientResult<Self> {
        Self::build(HeaderMap::new())
    }

    fn build(headers: HeaderMap) -> ClientResult<Self> {
        let http = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            http,
            headers,
            base_url: DEFAULT_BASE_URL.to_string(),
            time_url: DEFAULT_TIME_URL.to_string(),
        })
    }

    /// Override endpoint hosts (used against local test servers).
    pub fn with_urls(mut self, base_url: impl Into<String>, time_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self.time_url = time_url.into();
        self
    }

    async fn check(&self, response: reqwest::Response) -> ClientResult<Value> {
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ClientError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    async fn post_json(&self, path: &str, body: Value) -> ClientResult<Value> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "POST");
        let response = self
            .http
            .post(&url)
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await?;
        self.check(response).await
    }

    async fn get_json(&self, path: &str, query: &[(String, String)]) -> ClientResult<Value> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "GET");
        let response = self
            .http
            .get(&url)
            .headers(self.headers.clone())
            .query(query)
            .send()
            .await?;
        self.check(response).await
    }

    /// Public token list: symbol, alpha id, contract address, chain id.
    pub async fn token_list(&self) -> ClientResult<Vec<TokenInfo>> {
        let value = self.get_json(TOKEN_LIST_PATH, &[]).await?;
        let tokens = value
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| ClientError::Malformed("token list missing data array".to_string()))?
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect();
        Ok(tokens)
    }
}

impl ExchangeApi for AlphaClient {
    async fn server_time(&self) -> ClientResult<i64> {
        let response = self.http.get(&self.time_url).send().await?;
        let value = self.check(response).await?;
        value
            .get("serverTime")
            .and_then(|t| t.as_i64())
            .ok_or_else(|| ClientError::Malformed("time response missing serverTime".to_string()))
    }

    async fn query_airdrop_list(&self, page: u32, rows: u32) -> ClientResult<AirdropPage> {
        let value = self
            .post_json(AIRDROP_LIST_PATH, json!({ "page": page, "rows": rows }))
            .await?;
        Ok(AirdropPage::from_value(&value))
    }

    async fn claim_airdrop(&self, config_id: &str) -> ClientResult<ClaimResponse> {
        let value = self
            .post_json(CLAIM_PATH, json!({ "configId": config_id }))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn place_limit_order(&self, request: &OrderRequest) -> ClientResult<PlaceOrderOutcome> {
        let mut body = json!({
            "baseAsset": request.base_asset,
            "quoteAsset": request.quote_asset,
            "side": request.side.as_wire(),
            "price": request.price.to_string(),
            "quantity": request.quantity.to_string(),
        });
        if let Some(payment) = &request.payment {
            body["paymentDetails"] = json!([{
                "amount": payment.amount.to_string(),
                "paymentWalletType": payment.wallet_type,
            }]);
        }
        let value = self.post_json(PLACE_ORDER_PATH, body).await?;
        Ok(PlaceOrderOutcome::from_value(&value))
    }

    async fn cancel_order(
        &self,
        order_id: &OrderId,
        base_asset: &str,
        quote_asset: &str,
    ) -> ClientResult<()> {
        let value = self
            .post_json(
                CANCEL_ORDER_PATH,
                json!({
                    "orderId": order_id.as_str(),
                    "baseAsset": base_asset,
                    "quoteAsset": quote_asset,
                }),
            )
            .await?;
        let code = value.get("code").and_then(|c| c.as_str());
        if code.is_some() && code != Some(CODE_OK) {
            warn!(order_id = %order_id, ?code, "cancel returned non-success code");
        }
        Ok(())
    }

    async fn wallet_balances(&self) -> ClientResult<Vec<AssetBalance>> {
        let value = self.get_json(WALLET_BALANCE_PATH, &[]).await?;
        let balances = value
            .get("data")
            .and_then(|d| d.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Ok(balances)
    }

    async fn order_history(&self, query: &OrderHistoryQuery) -> ClientResult<Vec<OrderRecord>> {
        let params = vec![
            ("page".to_string(), query.page.to_string()),
            ("rows".to_string(), query.rows.to_string()),
            ("baseAsset".to_string(), query.base_asset.clone()),
            ("quoteAsset".to_string(), query.quote_asset.clone()),
            ("side".to_string(), query.side.as_wire().to_string()),
            ("startTime".to_string(), query.start_time_ms.to_string()),
            ("endTime".to_string(), query.end_time_ms.to_string()),
        ];
        let value = self.get_json(ORDER_HISTORY_PATH, &params).await?;
        if value.get("code").and_then(|c| c.as_str()) != Some(CODE_OK) {
            return Err(ClientError::Malformed(format!(
                "order history returned {:?}",
                value.get("code")
            )));
        }
        let orders = value
            .get("data")
            .and_then(|d| d.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Ok(orders)
    }

    async fn listen_key(&self) -> ClientResult<String> {
        let value = self.post_json(LISTEN_KEY_PATH, json!({})).await?;
        let success = value
            .get("success")
            .and_then(|s| s.as_bool())
            .unwrap_or(false);
        let key = value.get("data").and_then(|d| d.as_str());
        match (success, key) {
            (true, Some(key)) => Ok(key.to_string()),
            _ => Err(ClientError::Malformed(format!(
                "listen key fetch failed: {value}"
            ))),
        }
    }
}

/// Balance of one asset, zero if absent from the wallet.
pub fn asset_amount(balances: &[AssetBalance], symbol: &str) -> Decimal {
    balances
        .iter()
        .find(|b| b.asset == symbol)
        .map(|b| b.amount)
        .unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_asset_amount_lookup() {
        let balances = vec![
            AssetBalance {
                asset: "USDT".to_string(),
                amount: dec!(25.5),
            },
            AssetBalance {
                asset: "BR".to_string(),
                amount: dec!(4.9),
            },
        ];
        assert_eq!(asset_amount(&balances, "BR"), dec!(4.9));
        assert_eq!(asset_amount(&balances, "MPLX"), dec!(0));
    }
}
