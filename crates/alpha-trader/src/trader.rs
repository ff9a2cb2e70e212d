//! The buy→monitor→sell trading state machine.
//!
//! Each account runs one `AutoTrader` task. A cycle buys at a marketable
//! limit computed from the latest streamed price, waits for the
//! exchange's authoritative fill notification on the order queue, then
//! liquidates the filled quantity in slices until nothing sellable
//! remains. Failures are classified into values and handled locally so
//! one account's trouble never aborts another's task.

use crate::error::{TraderError, TraderResult};
use crate::history::cumulative_buy_amount;
use crate::session::{SessionHandle, TradeState, TradingSession};
use alpha_client::{
    asset_amount, ExchangeApi, OrderRequest, PaymentDetail, PlaceOrderOutcome,
    CODE_BELOW_MIN_NOTIONAL, CODE_INSUFFICIENT_BALANCE,
};
use alpha_core::{ErrorClassifier, ErrorKind, OrderId, OrderSide, OrderStatus, Price,
    RecommendedAction, Size};
use alpha_ws::StreamEvent;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Trading loop tuning.
#[derive(Debug, Clone)]
pub struct TraderConfig {
    pub quote_asset: String,
    /// Payment wallet marker for buys.
    pub buy_payment_type: String,
    /// Payment wallet marker for sells.
    pub sell_payment_type: String,
    pub buy_slippage: Decimal,
    pub sell_slippage: Decimal,
    /// Price precision step for limit prices.
    pub price_precision: Decimal,
    /// Quantity step for order sizes.
    pub quantity_step: Decimal,
    /// Smallest sell worth submitting.
    pub min_sell_quantity: Decimal,
    /// Below this, a probed balance is not worth liquidating.
    pub min_balance_threshold: Decimal,
    /// Uniform timeout for every blocking fill-wait. On expiry the wait
    /// falls back to a balance probe instead of hanging on a
    /// notification the exchange may have dropped.
    pub order_wait: Duration,
    /// Pause after a fill before selling, letting exchange-side balance
    /// state settle.
    pub settle_delay: Duration,
    /// Pause before the pre-sell balance re-verification.
    pub balance_settle_delay: Duration,
    /// Retry budget for the sell-liquidation slicing loop.
    pub max_retry: u32,
    /// Bounded number of insufficient-balance corrections per
    /// liquidation.
    pub max_balance_errors: u32,
    pub auto_sell_on_insufficient_balance: bool,
}

impl Default for TraderConfig {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".to_string(),
            buy_payment_type: "CARD".to_string(),
            sell_payment_type: "ALPHA".to_string(),
            buy_slippage: dec!(0.002),
            sell_slippage: dec!(0.002),
            price_precision: dec!(0.00000001),
            quantity_step: dec!(0.1),
            min_sell_quantity: dec!(0.01),
            min_balance_threshold: dec!(0.01),
            order_wait: Duration::from_secs(120),
            settle_delay: Duration::from_millis(300),
            balance_settle_delay: Duration::from_secs(1),
            max_retry: 5,
            max_balance_errors: 3,
            auto_sell_on_insufficient_balance: true,
        }
    }
}

/// Marketable limit buy: price padded up by the slippage, quantity the
/// configured notional at that price, both floored to their steps.
pub fn compute_buy_order(
    base_price: Decimal,
    buy_amount: Decimal,
    buy_slippage: Decimal,
    price_precision: Decimal,
    quantity_step: Decimal,
) -> (Decimal, Decimal) {
    let price = Price::new(base_price * (Decimal::ONE + buy_slippage))
        .round_down_to(price_precision)
        .inner();
    let quantity = Size::new(buy_amount / price)
        .round_down_to(quantity_step)
        .inner();
    (price, quantity)
}

/// Marketable limit sell price: padded down by the slippage, floored.
pub fn compute_sell_price(
    base_price: Decimal,
    sell_slippage: Decimal,
    price_precision: Decimal,
) -> Decimal {
    Price::new(base_price * (Decimal::ONE - sell_slippage))
        .round_down_to(price_precision)
        .inner()
}

/// Result of one buy→sell cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A sell cycle fully completed.
    Completed,
    /// The cycle was abandoned; the loop goes around again.
    Abandoned,
    /// Stop was requested or a stream ended.
    Stopped,
}

enum FillWait {
    Event(alpha_ws::OrderExecution),
    TimedOut,
    Closed,
}

/// Per-account trading task.
pub struct AutoTrader<A> {
    api: Arc<A>,
    cfg: TraderConfig,
    session: TradingSession,
    handle: SessionHandle,
    order_rx: mpsc::Receiver<StreamEvent>,
    price_rx: mpsc::Receiver<StreamEvent>,
    classifier: Arc<ErrorClassifier>,
}

impl<A: ExchangeApi> AutoTrader<A> {
    pub fn new(
        api: Arc<A>,
        cfg: TraderConfig,
        session: TradingSession,
        order_rx: mpsc::Receiver<StreamEvent>,
        price_rx: mpsc::Receiver<StreamEvent>,
        classifier: Arc<ErrorClassifier>,
    ) -> Self {
        let handle = session.handle();
        Self {
            api,
            cfg,
            session,
            handle,
            order_rx,
            price_rx,
            classifier,
        }
    }

    pub fn session(&self) -> &TradingSession {
        &self.session
    }

    pub fn status(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Run cycles until the lifetime cap is met, the stop flag is set,
    /// or a stream ends.
    pub async fn run(&mut self, stop: CancellationToken) -> TraderResult<()> {
        if !self.init_cumulative().await {
            info!(user_id = self.session.user_id, "lifetime cap already met, not trading");
            return Ok(());
        }

        while !stop.is_cancelled() && self.session.cycles_remain() {
            if self.session.target_total_amount.is_some() {
                info!(
                    user_id = self.session.user_id,
                    remaining_cycles = self.session.remaining_cycles,
                    "starting cycle"
                );
                if self.refresh_cumulative().await {
                    info!(user_id = self.session.user_id, "lifetime cap met, stopping");
                    break;
                }
            }
            match self.run_cycle(&stop).await? {
                CycleOutcome::Stopped => break,
                CycleOutcome::Completed | CycleOutcome::Abandoned => {}
            }
        }

        let snapshot = self.handle.snapshot();
        info!(
            user_id = self.session.user_id,
            trade_count = snapshot.trade_count,
            total_traded = %snapshot.total_traded,
            "trading loop finished"
        );
        Ok(())
    }

    /// Initial cap check. Returns false when the account already met its
    /// target; defaults to trading when the external record is
    /// unavailable.
    async fn init_cumulative(&mut self) -> bool {
        if self.session.target_total_amount.is_none() {
            info!(user_id = self.session.user_id, "no lifetime cap, unbounded cycles");
            return true;
        }
        match cumulative_buy_amount(
            self.api.as_ref(),
            &self.session.token,
            &self.cfg.quote_asset,
        )
        .await
        {
            Ok(cumulative) => {
                let reached = self.session.apply_cumulative(cumulative);
                info!(
                    user_id = self.session.user_id,
                    cumulative = %cumulative,
                    target_total = ?self.session.target_total_amount,
                    "cumulative buy notional"
                );
                if reached {
                    return false;
                }
                self.session.recompute_cycles();
                info!(
                    user_id = self.session.user_id,
                    cycles = self.session.remaining_cycles,
                    "cycle budget computed"
                );
                true
            }
            Err(e) => {
                warn!(
                    user_id = self.session.user_id,
                    error = %e,
                    "cumulative query failed, trading anyway"
                );
                true
            }
        }
    }

    /// Checkpoint cap re-query. Returns true when the cap has been met.
    async fn refresh_cumulative(&mut self) -> bool {
        match cumulative_buy_amount(
            self.api.as_ref(),
            &self.session.token,
            &self.cfg.quote_asset,
        )
        .await
        {
            Ok(cumulative) => self.session.apply_cumulative(cumulative),
            Err(e) => {
                warn!(user_id = self.session.user_id, error = %e, "cumulative re-query failed");
                false
            }
        }
    }

    /// Block for the next close price from the price queue.
    async fn latest_close(&mut self, stop: &CancellationToken) -> Option<Decimal> {
        loop {
            tokio::select! {
                () = stop.cancelled() => return None,
                event = self.price_rx.recv() => match event {
                    Some(StreamEvent::Price(kline)) => return Some(kline.close),
                    Some(_) => continue,
                    None => return None,
                }
            }
        }
    }

    /// Block on the order queue for a terminal event for this order,
    /// bounded by the uniform fill-wait timeout.
    async fn wait_fill(&mut self, order_id: &OrderId, side: OrderSide) -> FillWait {
        let deadline = tokio::time::Instant::now() + self.cfg.order_wait;
        loop {
            match tokio::time::timeout_at(deadline, self.order_rx.recv()).await {
                Ok(Some(StreamEvent::Order(exec)))
                    if exec.matches(order_id, side) && exec.status.is_terminal_for_wait() =>
                {
                    return FillWait::Event(exec);
                }
                Ok(Some(_)) => continue,
                Ok(None) => return FillWait::Closed,
                Err(_) => return FillWait::TimedOut,
            }
        }
    }

    /// Balance probe; zero on failure so callers degrade to skipping.
    async fn token_balance(&self) -> Decimal {
        match self.api.wallet_balances().await {
            Ok(balances) => asset_amount(&balances, &self.session.token_symbol),
            Err(e) => {
                let classification = self.classifier.classify(&e.to_string());
                warn!(
                    user_id = self.session.user_id,
                    error = %e,
                    kind = %classification.kind,
                    "balance probe failed"
                );
                Decimal::ZERO
            }
        }
    }

    async fn cancel_quietly(&self, order_id: &OrderId) {
        if let Err(e) = self
            .api
            .cancel_order(order_id, &self.session.token, &self.cfg.quote_asset)
            .await
        {
            warn!(
                user_id = self.session.user_id,
                order_id = %order_id,
                error = %e,
                "cancel failed (order may already be filled)"
            );
        }
    }

    async fn run_cycle(&mut self, stop: &CancellationToken) -> TraderResult<CycleOutcome> {
        let Some(base_price) = self.latest_close(stop).await else {
            return if stop.is_cancelled() {
                Ok(CycleOutcome::Stopped)
            } else {
                Err(TraderError::PriceStreamClosed)
            };
        };

        let (buy_price, buy_quantity) = compute_buy_order(
            base_price,
            self.session.buy_amount,
            self.cfg.buy_slippage,
            self.cfg.price_precision,
            self.cfg.quantity_step,
        );
        if buy_quantity < Decimal::ONE {
            // Dust guard: a sub-unit order is not worth the round trip.
            warn!(
                user_id = self.session.user_id,
                quantity = %buy_quantity,
                "buy quantity below one unit, skipping cycle"
            );
            return Ok(CycleOutcome::Abandoned);
        }

        let notional = Size::new(buy_price * buy_quantity)
            .round_down_to(self.cfg.price_precision)
            .inner();
        let request = OrderRequest {
            base_asset: self.session.token.clone(),
            quote_asset: self.cfg.quote_asset.clone(),
            side: OrderSide::Buy,
            price: buy_price,
            quantity: buy_quantity,
            payment: Some(PaymentDetail {
                amount: notional,
                wallet_type: self.cfg.buy_payment_type.clone(),
            }),
        };
        debug!(
            user_id = self.session.user_id,
            price = %buy_price,
            quantity = %buy_quantity,
            amount = %notional,
            "submitting buy"
        );

        let outcome = match self.api.place_limit_order(&request).await {
            Ok(outcome) => outcome,
            // Transport failures funnel through the same classification
            // as exchange rejections.
            Err(e) => PlaceOrderOutcome::Rejected {
                code: None,
                message: e.to_string(),
            },
        };
        let order_id = match outcome {
            PlaceOrderOutcome::Accepted { order_id } => order_id,
            PlaceOrderOutcome::Rejected { code, message } => {
                return self.handle_buy_rejection(stop, code, message).await;
            }
        };

        self.handle.set_state(TradeState::Buying);
        self.handle.set_order(Some(order_id.clone()));
        info!(
            user_id = self.session.user_id,
            order_id = %order_id,
            price = %buy_price,
            quantity = %buy_quantity,
            "buy order placed"
        );

        match self.wait_fill(&order_id, OrderSide::Buy).await {
            FillWait::Closed => Err(TraderError::StreamClosed),
            FillWait::TimedOut => {
                warn!(
                    user_id = self.session.user_id,
                    order_id = %order_id,
                    "buy fill wait timed out, probing balance"
                );
                self.cancel_quietly(&order_id).await;
                self.handle.set_order(None);
                let balance = self.token_balance().await;
                if balance >= self.cfg.min_balance_threshold {
                    self.handle.set_state(TradeState::Selling);
                    tokio::time::sleep(self.cfg.settle_delay).await;
                    let completed = self.sell_all_balance(stop, balance).await?;
                    Ok(if completed {
                        CycleOutcome::Completed
                    } else {
                        CycleOutcome::Abandoned
                    })
                } else {
                    self.handle.set_state(TradeState::Idle);
                    Ok(CycleOutcome::Abandoned)
                }
            }
            FillWait::Event(exec) => {
                self.handle.set_order(None);
                let net_quantity = match exec.status {
                    OrderStatus::Filled => exec.net_filled(),
                    OrderStatus::PartiallyFilled => {
                        // Cancel the remainder at once: faster
                        // liquidation is worth more than further fill.
                        self.cancel_quietly(&order_id).await;
                        info!(
                            user_id = self.session.user_id,
                            filled = %exec.cumulative_filled,
                            "buy partially filled, cancelled remainder"
                        );
                        exec.net_filled()
                    }
                    OrderStatus::Canceled => {
                        if exec.cumulative_filled.is_zero() {
                            info!(user_id = self.session.user_id, "buy cancelled with no fill");
                            self.handle.set_state(TradeState::Idle);
                            return Ok(CycleOutcome::Abandoned);
                        }
                        exec.net_filled()
                    }
                    OrderStatus::New => unreachable!("fill wait only returns terminal statuses"),
                };
                info!(
                    user_id = self.session.user_id,
                    filled = %exec.cumulative_filled,
                    commission = %exec.commission,
                    net = %net_quantity,
                    "buy filled"
                );
                self.handle.set_state(TradeState::Selling);
                tokio::time::sleep(self.cfg.settle_delay).await;
                let completed = self.sell_all_balance(stop, net_quantity).await?;
                Ok(if completed {
                    CycleOutcome::Completed
                } else {
                    CycleOutcome::Abandoned
                })
            }
        }
    }

    /// Branch on the classification of a buy rejection.
    async fn handle_buy_rejection(
        &mut self,
        stop: &CancellationToken,
        code: Option<String>,
        message: String,
    ) -> TraderResult<CycleOutcome> {
        let text = match &code {
            Some(code) => format!("{code} {message}"),
            None => message.clone(),
        };
        let classification = self.classifier.classify(&text);
        warn!(
            user_id = self.session.user_id,
            ?code,
            reason = %message,
            kind = %classification.kind,
            "buy rejected"
        );

        if classification.kind == ErrorKind::InsufficientBalance {
            let balance = self.token_balance().await;
            if balance < self.cfg.min_balance_threshold {
                warn!(
                    user_id = self.session.user_id,
                    balance = %balance,
                    "no quote funds and no sellable position, skipping cycle"
                );
                return Ok(CycleOutcome::Abandoned);
            }
            if self.cfg.auto_sell_on_insufficient_balance {
                info!(
                    user_id = self.session.user_id,
                    balance = %balance,
                    "quote funds exhausted but tokens held, liquidating"
                );
                self.handle.set_state(TradeState::Selling);
                self.sell_all_balance(stop, balance).await?;
            }
            return Ok(CycleOutcome::Abandoned);
        }

        match classification.action {
            RecommendedAction::Retry | RecommendedAction::Wait => {
                tokio::time::sleep(classification.cooldown).await;
            }
            RecommendedAction::Skip
            | RecommendedAction::AutoSell
            | RecommendedAction::LogOnly => {}
        }
        Ok(CycleOutcome::Abandoned)
    }

    /// Liquidate up to `expected` tokens, slicing until the remainder is
    /// below the minimum sell quantity. Returns true when the final
    /// slice fully filled and the cycle counts as complete.
    pub async fn sell_all_balance(
        &mut self,
        stop: &CancellationToken,
        expected: Decimal,
    ) -> TraderResult<bool> {
        info!(
            user_id = self.session.user_id,
            expected = %expected,
            "starting liquidation"
        );
        tokio::time::sleep(self.cfg.balance_settle_delay).await;

        // The computed fill quantity is not trusted blindly; exchange
        // rounding and fees can diverge from it. A 0.1% margin under the
        // verified balance avoids over-requesting.
        let actual = self.token_balance().await;
        let mut remain = (actual * dec!(0.999)).min(expected);
        info!(
            user_id = self.session.user_id,
            actual = %actual,
            remain = %remain,
            "liquidation sized from verified balance"
        );
        if remain < self.cfg.min_sell_quantity {
            warn!(
                user_id = self.session.user_id,
                remain = %remain,
                "below minimum sell quantity, skipping liquidation"
            );
            self.finish_liquidation().await;
            return Ok(false);
        }

        let mut retry = 0u32;
        let mut balance_errors = 0u32;
        let mut completed = false;

        while remain >= self.cfg.min_sell_quantity {
            let final_pass = remain < self.cfg.min_sell_quantity * dec!(2)
                || retry >= self.cfg.max_retry.saturating_sub(1);
            if final_pass {
                // Final iteration: re-query and sell the whole balance
                // unconditionally so no unsellable dust is left behind.
                let balance = self.token_balance().await;
                let quantity = Size::new(balance)
                    .round_down_to(self.cfg.quantity_step)
                    .inner();
                if quantity < self.cfg.min_sell_quantity {
                    debug!(
                        user_id = self.session.user_id,
                        balance = %balance,
                        "final-pass balance below minimum, done"
                    );
                    break;
                }
                let Some(base_price) = self.latest_close(stop).await else {
                    break;
                };
                let price = compute_sell_price(
                    base_price,
                    self.cfg.sell_slippage,
                    self.cfg.price_precision,
                );
                info!(
                    user_id = self.session.user_id,
                    quantity = %quantity,
                    price = %price,
                    "final full-balance sell"
                );
                if let Err(e) = self
                    .api
                    .place_limit_order(&self.sell_request(price, quantity))
                    .await
                {
                    warn!(user_id = self.session.user_id, error = %e, "final sell failed");
                }
                break;
            }

            let Some(base_price) = self.latest_close(stop).await else {
                break;
            };
            let price =
                compute_sell_price(base_price, self.cfg.sell_slippage, self.cfg.price_precision);
            let quantity = Size::new(remain)
                .round_down_to(self.cfg.quantity_step)
                .inner();
            if quantity < self.cfg.min_sell_quantity {
                // The remainder floors to nothing at the quantity step;
                // only the unconditional full-balance pass can clear it.
                retry = self.cfg.max_retry;
                continue;
            }
            debug!(
                user_id = self.session.user_id,
                price = %price,
                quantity = %quantity,
                remain = %remain,
                "submitting sell slice"
            );

            let outcome = match self
                .api
                .place_limit_order(&self.sell_request(price, quantity))
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => PlaceOrderOutcome::Rejected {
                    code: None,
                    message: e.to_string(),
                },
            };

            match outcome {
                ref rejected @ PlaceOrderOutcome::Rejected { .. }
                    if rejected.rejected_with_code(CODE_INSUFFICIENT_BALANCE) =>
                {
                    balance_errors += 1;
                    warn!(
                        user_id = self.session.user_id,
                        balance_errors,
                        quantity = %quantity,
                        "sell rejected for insufficient balance"
                    );
                    if balance_errors >= self.cfg.max_balance_errors {
                        error!(
                            user_id = self.session.user_id,
                            "too many balance corrections, stopping liquidation"
                        );
                        break;
                    }
                    let balance = self.token_balance().await;
                    if balance < self.cfg.min_sell_quantity {
                        warn!(
                            user_id = self.session.user_id,
                            balance = %balance,
                            "re-queried balance below minimum, stopping"
                        );
                        break;
                    }
                    remain = balance * dec!(0.99);
                    info!(
                        user_id = self.session.user_id,
                        remain = %remain,
                        "shrunk liquidation to re-queried balance"
                    );
                }
                ref rejected @ PlaceOrderOutcome::Rejected { .. }
                    if rejected.rejected_with_code(CODE_BELOW_MIN_NOTIONAL) =>
                {
                    let min_required = dec!(0.1) / price;
                    warn!(
                        user_id = self.session.user_id,
                        quantity = %quantity,
                        min_required = %min_required,
                        "sell below minimum notional"
                    );
                    if remain < min_required {
                        warn!(
                            user_id = self.session.user_id,
                            "remainder cannot meet minimum notional, stopping"
                        );
                        break;
                    }
                    // Force the unconditional full-balance pass.
                    retry = self.cfg.max_retry;
                }
                PlaceOrderOutcome::Rejected { code, message } => {
                    let text = match &code {
                        Some(code) => format!("{code} {message}"),
                        None => message.clone(),
                    };
                    let classification = self.classifier.classify(&text);
                    warn!(
                        user_id = self.session.user_id,
                        ?code,
                        reason = %message,
                        kind = %classification.kind,
                        "sell rejected"
                    );
                    if classification.kind == ErrorKind::InsufficientBalance {
                        break;
                    }
                    match classification.action {
                        RecommendedAction::Retry | RecommendedAction::Wait => {
                            tokio::time::sleep(classification.cooldown).await;
                            retry += 1;
                        }
                        _ => break,
                    }
                }
                PlaceOrderOutcome::Accepted { order_id } => {
                    self.handle.set_order(Some(order_id.clone()));
                    match self.wait_fill(&order_id, OrderSide::Sell).await {
                        FillWait::Closed => return Err(TraderError::StreamClosed),
                        FillWait::TimedOut => {
                            warn!(
                                user_id = self.session.user_id,
                                order_id = %order_id,
                                "sell fill wait timed out, probing balance"
                            );
                            self.cancel_quietly(&order_id).await;
                            self.handle.set_order(None);
                            let balance = self.token_balance().await;
                            remain = (balance * dec!(0.999)).min(remain);
                            retry += 1;
                        }
                        FillWait::Event(exec) => {
                            self.handle.set_order(None);
                            let sliced = exec.cumulative_filled;
                            if sliced.is_zero() {
                                debug!(
                                    user_id = self.session.user_id,
                                    "sell saw no fill at all, stopping"
                                );
                                break;
                            }
                            remain -= sliced;
                            retry += 1;
                            match exec.status {
                                OrderStatus::Filled => {
                                    if remain < self.cfg.min_sell_quantity {
                                        // Full fill of the last slice:
                                        // the cycle is complete.
                                        let notional = quantity * price;
                                        self.handle.record_trade(notional);
                                        self.session.complete_cycle();
                                        info!(
                                            user_id = self.session.user_id,
                                            notional = %notional,
                                            remaining_cycles = self.session.remaining_cycles,
                                            "sell cycle complete"
                                        );
                                        completed = true;
                                        tokio::time::sleep(self.cfg.settle_delay).await;
                                        break;
                                    }
                                }
                                OrderStatus::PartiallyFilled => {
                                    tokio::time::sleep(self.cfg.settle_delay).await;
                                }
                                _ => break,
                            }
                        }
                    }
                }
            }
        }

        self.finish_liquidation().await;
        Ok(completed)
    }

    fn sell_request(&self, price: Decimal, quantity: Decimal) -> OrderRequest {
        OrderRequest {
            base_asset: self.session.token.clone(),
            quote_asset: self.cfg.quote_asset.clone(),
            side: OrderSide::Sell,
            price,
            quantity,
            payment: Some(PaymentDetail {
                amount: quantity,
                wallet_type: self.cfg.sell_payment_type.clone(),
            }),
        }
    }

    async fn finish_liquidation(&mut self) {
        let balance = self.token_balance().await;
        debug!(
            user_id = self.session.user_id,
            final_balance = %balance,
            "liquidation finished"
        );
        self.handle.set_order(None);
        self.handle.set_state(TradeState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alpha_client::{
        AirdropPage, AssetBalance, ClaimResponse, ClientError, ClientResult, OrderHistoryQuery,
        OrderRecord,
    };
    use alpha_ws::{OrderExecution, PriceKline};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct FakeExchange {
        place_results: Mutex<VecDeque<PlaceOrderOutcome>>,
        place_requests: Mutex<Vec<OrderRequest>>,
        cancels: Mutex<Vec<OrderId>>,
        /// Balance script; the last entry repeats.
        balances: Mutex<VecDeque<Decimal>>,
        token_symbol: String,
        history: Vec<OrderRecord>,
    }

    impl FakeExchange {
        fn new(token_symbol: &str) -> Self {
            Self {
                place_results: Mutex::new(VecDeque::new()),
                place_requests: Mutex::new(Vec::new()),
                cancels: Mutex::new(Vec::new()),
                balances: Mutex::new(VecDeque::new()),
                token_symbol: token_symbol.to_string(),
                history: Vec::new(),
            }
        }

        fn script_place(&self, outcome: PlaceOrderOutcome) {
            self.place_results.lock().push_back(outcome);
        }

        fn script_balance(&self, amount: Decimal) {
            self.balances.lock().push_back(amount);
        }

        fn requests(&self) -> Vec<OrderRequest> {
            self.place_requests.lock().clone()
        }
    }

    impl ExchangeApi for FakeExchange {
        async fn server_time(&self) -> ClientResult<i64> {
            unimplemented!()
        }
        async fn query_airdrop_list(&self, _: u32, _: u32) -> ClientResult<AirdropPage> {
            unimplemented!()
        }
        async fn claim_airdrop(&self, _: &str) -> ClientResult<ClaimResponse> {
            unimplemented!()
        }
        async fn place_limit_order(&self, request: &OrderRequest) -> ClientResult<PlaceOrderOutcome> {
            self.place_requests.lock().push(request.clone());
            self.place_results
                .lock()
                .pop_front()
                .ok_or_else(|| ClientError::Malformed("place script exhausted".to_string()))
        }
        async fn cancel_order(&self, order_id: &OrderId, _: &str, _: &str) -> ClientResult<()> {
            self.cancels.lock().push(order_id.clone());
            Ok(())
        }
        async fn wallet_balances(&self) -> ClientResult<Vec<AssetBalance>> {
            let mut balances = self.balances.lock();
            let amount = if balances.len() > 1 {
                balances.pop_front().unwrap()
            } else {
                balances.front().copied().unwrap_or(Decimal::ZERO)
            };
            Ok(vec![AssetBalance {
                asset: self.token_symbol.clone(),
                amount,
            }])
        }
        async fn order_history(&self, _: &OrderHistoryQuery) -> ClientResult<Vec<OrderRecord>> {
            Ok(self.history.clone())
        }
        async fn listen_key(&self) -> ClientResult<String> {
            unimplemented!()
        }
    }

    fn price_event(close: Decimal) -> StreamEvent {
        StreamEvent::Price(PriceKline {
            close,
            open: close,
            high: close,
            low: close,
            volume: dec!(0),
            interval: "1s".to_string(),
        })
    }

    fn order_event(
        id: &str,
        side: OrderSide,
        status: OrderStatus,
        cumulative: Decimal,
        commission: Decimal,
    ) -> StreamEvent {
        StreamEvent::Order(OrderExecution {
            order_id: OrderId::new(id),
            side,
            status,
            cumulative_filled: cumulative,
            last_filled: cumulative,
            commission,
            commission_asset: None,
        })
    }

    fn accepted(id: &str) -> PlaceOrderOutcome {
        PlaceOrderOutcome::Accepted {
            order_id: OrderId::new(id),
        }
    }

    fn rejected(code: &str, message: &str) -> PlaceOrderOutcome {
        PlaceOrderOutcome::Rejected {
            code: Some(code.to_string()),
            message: message.to_string(),
        }
    }

    fn fast_config() -> TraderConfig {
        TraderConfig {
            buy_slippage: dec!(0.01),
            sell_slippage: dec!(0.01),
            order_wait: Duration::from_millis(200),
            settle_delay: Duration::from_millis(1),
            balance_settle_delay: Duration::from_millis(1),
            ..TraderConfig::default()
        }
    }

    fn build_trader(
        api: Arc<FakeExchange>,
        cfg: TraderConfig,
        target: Option<Decimal>,
    ) -> (
        AutoTrader<FakeExchange>,
        mpsc::Sender<StreamEvent>,
        mpsc::Sender<StreamEvent>,
    ) {
        let (order_tx, order_rx) = mpsc::channel(64);
        let (price_tx, price_rx) = mpsc::channel(64);
        let session = TradingSession::new(1, "ALPHA_118", "BR", dec!(10), target);
        let trader = AutoTrader::new(
            api,
            cfg,
            session,
            order_rx,
            price_rx,
            Arc::new(ErrorClassifier::new()),
        );
        (trader, order_tx, price_tx)
    }

    #[test]
    fn test_compute_buy_order_rounding() {
        let (price, quantity) =
            compute_buy_order(dec!(3.33333333), dec!(10), dec!(0), dec!(0.00000001), dec!(0.1));
        assert_eq!(price, dec!(3.33333333));
        assert_eq!(quantity, dec!(3.0));
        assert!(quantity <= dec!(10) / dec!(3.33333333));
    }

    #[test]
    fn test_compute_buy_order_with_slippage() {
        let (price, quantity) =
            compute_buy_order(dec!(2.0), dec!(10), dec!(0.01), dec!(0.00000001), dec!(0.1));
        assert_eq!(price, dec!(2.02));
        // 10 / 2.02 = 4.9504..., floored to one decimal.
        assert_eq!(quantity, dec!(4.9));
    }

    #[test]
    fn test_compute_sell_price() {
        assert_eq!(
            compute_sell_price(dec!(2.0), dec!(0.01), dec!(0.00000001)),
            dec!(1.98)
        );
    }

    #[tokio::test]
    async fn test_happy_path_cycle_completes_and_decrements() {
        let api = Arc::new(FakeExchange::new("BR"));
        api.script_place(accepted("B1"));
        api.script_place(accepted("S1"));
        api.script_balance(dec!(5.0));

        let (mut trader, order_tx, price_tx) =
            build_trader(api.clone(), fast_config(), Some(dec!(100)));

        // Price for the buy, price for the sell slice.
        price_tx.send(price_event(dec!(2.0))).await.unwrap();
        price_tx.send(price_event(dec!(2.0))).await.unwrap();
        // Buy fills in full with no commission, then the sell fills.
        order_tx
            .send(order_event("B1", OrderSide::Buy, OrderStatus::Filled, dec!(4.9), dec!(0)))
            .await
            .unwrap();
        order_tx
            .send(order_event("S1", OrderSide::Sell, OrderStatus::Filled, dec!(4.9), dec!(0)))
            .await
            .unwrap();

        let stop = CancellationToken::new();
        let stopper = stop.clone();
        let handle = tokio::spawn(async move {
            // The second cycle blocks on an empty price queue; release it.
            tokio::time::sleep(Duration::from_millis(300)).await;
            stopper.cancel();
        });

        trader.run(stop).await.unwrap();
        handle.await.unwrap();

        let requests = api.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].side, OrderSide::Buy);
        assert_eq!(requests[0].price, dec!(2.02));
        assert_eq!(requests[0].quantity, dec!(4.9));
        assert_eq!(requests[1].side, OrderSide::Sell);
        assert_eq!(requests[1].price, dec!(1.98));
        assert_eq!(requests[1].quantity, dec!(4.9));

        let snapshot = trader.status().snapshot();
        assert_eq!(snapshot.trade_count, 1);
        assert_eq!(snapshot.state, TradeState::Idle);
        // One completed cycle against the ten-cycle budget.
        assert_eq!(trader.session().remaining_cycles, 9);
    }

    #[tokio::test]
    async fn test_commission_reduces_sellable_quantity() {
        let api = Arc::new(FakeExchange::new("BR"));
        api.script_place(accepted("B1"));
        api.script_place(accepted("S1"));
        api.script_balance(dec!(13.0));

        let (mut trader, order_tx, price_tx) = build_trader(api.clone(), fast_config(), None);

        price_tx.send(price_event(dec!(2.0))).await.unwrap();
        price_tx.send(price_event(dec!(2.0))).await.unwrap();
        order_tx
            .send(order_event(
                "B1",
                OrderSide::Buy,
                OrderStatus::Filled,
                dec!(12.5),
                dec!(0.0125),
            ))
            .await
            .unwrap();
        order_tx
            .send(order_event("S1", OrderSide::Sell, OrderStatus::Filled, dec!(12.4), dec!(0)))
            .await
            .unwrap();

        let stop = CancellationToken::new();
        let stopper = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            stopper.cancel();
        });

        trader.run(stop).await.unwrap();

        let requests = api.requests();
        assert_eq!(requests.len(), 2);
        // Sellable is 12.4875 (12.5 minus commission), never 12.5:
        // the slice is that remainder floored to the quantity step.
        assert_eq!(requests[1].quantity, dec!(12.4));
        assert!(requests[1].quantity <= dec!(12.4875));
    }

    #[tokio::test]
    async fn test_sell_liquidation_converges_on_balance_errors() {
        let api = Arc::new(FakeExchange::new("BR"));
        // Every slice is rejected for insufficient balance; each probe
        // reports a smaller balance. The loop must stop within the
        // bounded correction budget instead of shrinking forever.
        api.script_place(rejected("481020", "余额不足"));
        api.script_place(rejected("481020", "余额不足"));
        api.script_place(rejected("481020", "余额不足"));
        api.script_balance(dec!(10.0)); // pre-sell verification
        api.script_balance(dec!(8.0)); // after first rejection
        api.script_balance(dec!(5.0)); // after second rejection
        api.script_balance(dec!(5.0));

        let (mut trader, _order_tx, price_tx) = build_trader(api.clone(), fast_config(), None);
        for _ in 0..4 {
            price_tx.send(price_event(dec!(2.0))).await.unwrap();
        }

        let stop = CancellationToken::new();
        let completed = trader.sell_all_balance(&stop, dec!(10.0)).await.unwrap();
        assert!(!completed);

        // Three rejected submissions, then the correction budget stops
        // the loop.
        assert_eq!(api.requests().len(), 3);
        assert_eq!(trader.status().state(), TradeState::Idle);
    }

    #[tokio::test]
    async fn test_buy_timeout_falls_back_to_balance_probe() {
        let api = Arc::new(FakeExchange::new("BR"));
        api.script_place(accepted("B1"));
        api.script_balance(dec!(0));

        let mut cfg = fast_config();
        cfg.order_wait = Duration::from_millis(30);
        let (mut trader, _order_tx, price_tx) = build_trader(api.clone(), cfg, None);

        price_tx.send(price_event(dec!(2.0))).await.unwrap();

        let stop = CancellationToken::new();
        let stopper = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.cancel();
        });

        // No fill event ever arrives: the wait must expire, cancel the
        // order, probe the balance, and abandon the cycle.
        trader.run(stop).await.unwrap();

        assert_eq!(api.cancels.lock().len(), 1);
        assert_eq!(api.requests().len(), 1);
        assert_eq!(trader.status().state(), TradeState::Idle);
    }

    #[tokio::test]
    async fn test_dust_buy_is_skipped() {
        let api = Arc::new(FakeExchange::new("BR"));
        let (mut trader, _order_tx, price_tx) = build_trader(api.clone(), fast_config(), None);

        // 10 USDT at 20.0 buys less than one unit: no order may go out.
        price_tx.send(price_event(dec!(20.0))).await.unwrap();

        let stop = CancellationToken::new();
        let stopper = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.cancel();
        });

        trader.run(stop).await.unwrap();
        assert!(api.requests().is_empty());
    }

    #[tokio::test]
    async fn test_partial_buy_fill_cancels_remainder_then_sells() {
        let api = Arc::new(FakeExchange::new("BR"));
        api.script_place(accepted("B1"));
        api.script_place(accepted("S1"));
        api.script_balance(dec!(3.0));

        let (mut trader, order_tx, price_tx) = build_trader(api.clone(), fast_config(), None);

        price_tx.send(price_event(dec!(2.0))).await.unwrap();
        price_tx.send(price_event(dec!(2.0))).await.unwrap();
        order_tx
            .send(order_event(
                "B1",
                OrderSide::Buy,
                OrderStatus::PartiallyFilled,
                dec!(2.5),
                dec!(0),
            ))
            .await
            .unwrap();
        order_tx
            .send(order_event("S1", OrderSide::Sell, OrderStatus::Filled, dec!(2.5), dec!(0)))
            .await
            .unwrap();

        let stop = CancellationToken::new();
        let stopper = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            stopper.cancel();
        });

        trader.run(stop).await.unwrap();

        // The partially-filled buy is cancelled before liquidation.
        assert_eq!(api.cancels.lock().len(), 1);
        let requests = api.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].side, OrderSide::Sell);
        // min(3.0 * 0.999, 2.5) floored to the step.
        assert_eq!(requests[1].quantity, dec!(2.5));
    }
}
