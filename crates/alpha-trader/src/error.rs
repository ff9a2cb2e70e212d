//! Trading loop error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraderError {
    #[error("order stream closed")]
    StreamClosed,

    #[error("price stream closed")]
    PriceStreamClosed,
}

pub type TraderResult<T> = Result<T, TraderError>;
