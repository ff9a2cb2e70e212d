//! Timed airdrop claim orchestration.
//!
//! Calibrates the local clock against the exchange, waits until a small
//! configurable lead before the daily claim instant, then races a bounded
//! number of claim attempts per account, all accounts concurrently.

pub mod orchestrator;
pub mod schedule;
pub mod skiplist;

pub use orchestrator::{
    claim_for_account, claim_with_retry, countdown_loop, run_claims, wait_for_window,
    ClaimReport, ClaimRunParams, ClaimTarget,
};
pub use schedule::{next_target_instant, ClaimSchedule};
pub use skiplist::{find_first_claimable, run_skiplist_claims};
