//! Application wiring: configuration, run context, and command flows.

pub mod app;
pub mod config;
pub mod context;
pub mod error;

pub use app::{run_claim, run_order_stats, run_token_info, run_trade};
pub use config::AppConfig;
pub use context::RunContext;
pub use error::{AppError, AppResult};
