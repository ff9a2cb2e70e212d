//! SQLite-backed account/credential store.
//!
//! The account table is owned by an external updater; the core reads it
//! and only writes login-status transitions caused by authentication
//! failures.

pub mod error;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::AccountStore;
