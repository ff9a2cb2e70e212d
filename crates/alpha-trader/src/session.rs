//! Per-account trading session state.

use alpha_core::OrderId;
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;

/// Trading state. Transitions only idle → buying → selling → idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeState {
    Idle,
    Buying,
    Selling,
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Buying => f.write_str("buying"),
            Self::Selling => f.write_str("selling"),
        }
    }
}

/// Observable snapshot of a session, read by the supervisor when
/// draining in-flight cycles at shutdown.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: TradeState,
    pub current_order: Option<OrderId>,
    pub trade_count: u32,
    pub total_traded: Decimal,
}

/// Shared handle onto a session's observable state.
#[derive(Clone, Debug)]
pub struct SessionHandle(Arc<RwLock<SessionSnapshot>>);

impl SessionHandle {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(SessionSnapshot {
            state: TradeState::Idle,
            current_order: None,
            trade_count: 0,
            total_traded: Decimal::ZERO,
        })))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.0.read().clone()
    }

    pub fn state(&self) -> TradeState {
        self.0.read().state
    }

    pub fn set_state(&self, state: TradeState) {
        self.0.write().state = state;
    }

    pub fn set_order(&self, order: Option<OrderId>) {
        self.0.write().current_order = order;
    }

    pub fn record_trade(&self, notional: Decimal) {
        let mut inner = self.0.write();
        inner.trade_count += 1;
        inner.total_traded += notional;
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// State for one account's buy→sell cycle loop.
///
/// At most one open order per account at a time; `remaining_cycles` is
/// only decremented after a sell cycle fully completes. Not persisted
/// across runs except via the externally-queried cumulative notional.
#[derive(Debug)]
pub struct TradingSession {
    pub user_id: i64,
    /// Alpha id used as the base asset for order placement.
    pub token: String,
    pub token_symbol: String,
    /// Quote-currency notional per buy cycle.
    pub buy_amount: Decimal,
    /// Optional lifetime-notional cap.
    pub target_total_amount: Option<Decimal>,
    /// Externally-queried cumulative buy notional, refreshed at
    /// checkpoints.
    pub cumulative_buy_amount: Decimal,
    pub remaining_cycles: u32,
    handle: SessionHandle,
}

impl TradingSession {
    pub fn new(
        user_id: i64,
        token: impl Into<String>,
        token_symbol: impl Into<String>,
        buy_amount: Decimal,
        target_total_amount: Option<Decimal>,
    ) -> Self {
        Self {
            user_id,
            token: token.into(),
            token_symbol: token_symbol.into(),
            buy_amount,
            target_total_amount,
            cumulative_buy_amount: Decimal::ZERO,
            remaining_cycles: 0,
            handle: SessionHandle::new(),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Whether the loop may start another cycle.
    pub fn cycles_remain(&self) -> bool {
        self.target_total_amount.is_none() || self.remaining_cycles > 0
    }

    /// Record a freshly-queried cumulative notional. Returns true when
    /// the lifetime cap has been met.
    pub fn apply_cumulative(&mut self, cumulative: Decimal) -> bool {
        self.cumulative_buy_amount = cumulative;
        match self.target_total_amount {
            None => false,
            Some(target) => cumulative >= target,
        }
    }

    /// Derive the cycle budget from the freshly-queried cumulative
    /// notional. Called once at startup; later refreshes only check the
    /// cap so a completed cycle's decrement is not overwritten by a
    /// lagging external record.
    pub fn recompute_cycles(&mut self) {
        let Some(target) = self.target_total_amount else {
            return;
        };
        let remaining = target - self.cumulative_buy_amount;
        if remaining <= Decimal::ZERO || self.buy_amount <= Decimal::ZERO {
            self.remaining_cycles = 0;
            return;
        }
        let cycles = (remaining / self.buy_amount).floor().to_u32().unwrap_or(1);
        self.remaining_cycles = cycles.max(1);
    }

    /// Mark one completed sell cycle.
    pub fn complete_cycle(&mut self) {
        if self.target_total_amount.is_some() {
            self.remaining_cycles = self.remaining_cycles.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_uncapped_session_always_has_cycles() {
        let session = TradingSession::new(1, "ALPHA_259", "CROSS", dec!(10), None);
        assert!(session.cycles_remain());
    }

    #[test]
    fn test_cycle_budget_from_cumulative() {
        let mut session = TradingSession::new(1, "ALPHA_259", "CROSS", dec!(10), Some(dec!(100)));
        assert!(!session.apply_cumulative(dec!(25)));
        session.recompute_cycles();
        assert_eq!(session.remaining_cycles, 7);

        session.complete_cycle();
        assert_eq!(session.remaining_cycles, 6);
    }

    #[test]
    fn test_cap_reached() {
        let mut session = TradingSession::new(1, "ALPHA_259", "CROSS", dec!(10), Some(dec!(100)));
        assert!(session.apply_cumulative(dec!(100)));
        session.recompute_cycles();
        assert_eq!(session.remaining_cycles, 0);
        assert!(!session.cycles_remain());
    }

    #[test]
    fn test_small_remainder_gets_one_cycle() {
        let mut session = TradingSession::new(1, "ALPHA_259", "CROSS", dec!(10), Some(dec!(100)));
        session.apply_cumulative(dec!(95));
        session.recompute_cycles();
        assert_eq!(session.remaining_cycles, 1);
    }

    #[test]
    fn test_handle_records_trades() {
        let session = TradingSession::new(1, "ALPHA_259", "CROSS", dec!(10), None);
        let handle = session.handle();
        handle.set_state(TradeState::Selling);
        handle.record_trade(dec!(9.898));
        handle.record_trade(dec!(9.7));

        let snapshot = session.handle().snapshot();
        assert_eq!(snapshot.state, TradeState::Selling);
        assert_eq!(snapshot.trade_count, 2);
        assert_eq!(snapshot.total_traded, dec!(19.598));
    }
}
