//! Authenticated HTTP client for the exchange's private alpha endpoints.
//!
//! Responses are parsed once at this boundary into tagged result types so
//! the claim and trading loops never re-inspect raw JSON for control flow.

pub mod api;
pub mod client;
pub mod error;
pub mod response;
pub mod time_sync;

pub use api::ExchangeApi;
pub use client::{asset_amount, AlphaClient, DEFAULT_BASE_URL, DEFAULT_TIME_URL};
pub use error::{ClientError, ClientResult};
pub use response::{
    AirdropConfig, AirdropPage, AssetBalance, ClaimInfo, ClaimOutcome, ClaimResponse,
    OrderHistoryQuery, OrderRecord, OrderRequest, PaymentDetail, PlaceOrderOutcome, TokenInfo,
    CODE_BELOW_MIN_NOTIONAL, CODE_INSUFFICIENT_BALANCE, CODE_OK,
};
pub use time_sync::{calibrate_offset, TimeOffset};
