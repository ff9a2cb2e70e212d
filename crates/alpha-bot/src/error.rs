//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] alpha_store::StoreError),

    #[error("Client error: {0}")]
    Client(#[from] alpha_client::ClientError),

    #[error("No eligible accounts")]
    NoAccounts,

    #[error("Unknown token: {0}")]
    UnknownToken(String),
}

pub type AppResult<T> = Result<T, AppError>;
