//! Exchange API surface consumed by the claim and trading loops.
//!
//! The trait keeps the orchestration code independent of the HTTP layer
//! so tests can drive it with hand-rolled fakes.

use crate::error::ClientResult;
use crate::response::{
    AirdropPage, AssetBalance, ClaimResponse, OrderHistoryQuery, OrderRecord, OrderRequest,
    PlaceOrderOutcome,
};
use alpha_core::OrderId;
use std::future::Future;

pub trait ExchangeApi: Send + Sync {
    /// Current server time in milliseconds.
    fn server_time(&self) -> impl Future<Output = ClientResult<i64>> + Send;

    /// One page of the airdrop configuration list.
    fn query_airdrop_list(
        &self,
        page: u32,
        rows: u32,
    ) -> impl Future<Output = ClientResult<AirdropPage>> + Send;

    /// Attempt to claim the airdrop with the given configuration id.
    fn claim_airdrop(
        &self,
        config_id: &str,
    ) -> impl Future<Output = ClientResult<ClaimResponse>> + Send;

    /// Submit a limit order.
    fn place_limit_order(
        &self,
        request: &OrderRequest,
    ) -> impl Future<Output = ClientResult<PlaceOrderOutcome>> + Send;

    /// Cancel an open order.
    fn cancel_order(
        &self,
        order_id: &OrderId,
        base_asset: &str,
        quote_asset: &str,
    ) -> impl Future<Output = ClientResult<()>> + Send;

    /// All wallet balances.
    fn wallet_balances(&self) -> impl Future<Output = ClientResult<Vec<AssetBalance>>> + Send;

    /// One page of order history.
    fn order_history(
        &self,
        query: &OrderHistoryQuery,
    ) -> impl Future<Output = ClientResult<Vec<OrderRecord>>> + Send;

    /// Fetch the renewable order-stream subscription credential.
    fn listen_key(&self) -> impl Future<Output = ClientResult<String>> + Send;
}
