//! Stream wire messages: control frames, event parsing, routing helpers.

use alpha_core::{OrderId, OrderSide, OrderStatus};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

/// Client-to-server control frame.
#[derive(Debug, Clone, Serialize)]
pub struct WsRequest {
    pub method: String,
    pub params: Vec<String>,
    pub id: u64,
}

impl WsRequest {
    pub fn subscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: "SUBSCRIBE".to_string(),
            params,
            id,
        }
    }

    pub fn unsubscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: "UNSUBSCRIBE".to_string(),
            params,
            id,
        }
    }
}

/// A parsed unit pulled off the streaming channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Order(OrderExecution),
    Price(PriceKline),
}

/// One order-execution push.
///
/// Delivered at least once; consumers filter by order id and side and key
/// decisions on status transitions, not arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderExecution {
    pub order_id: OrderId,
    pub side: OrderSide,
    pub status: OrderStatus,
    /// Cumulative filled quantity (`z`).
    pub cumulative_filled: Decimal,
    /// Quantity filled by the latest execution (`l`).
    pub last_filled: Decimal,
    /// Cumulative commission (`n`). For buys this is paid in the
    /// purchased token and must be subtracted before reselling.
    pub commission: Decimal,
    pub commission_asset: Option<String>,
}

impl OrderExecution {
    /// Quantity actually received after commission.
    pub fn net_filled(&self) -> Decimal {
        self.cumulative_filled - self.commission
    }

    pub fn matches(&self, order_id: &OrderId, side: OrderSide) -> bool {
        &self.order_id == order_id && self.side == side
    }
}

/// One price/kline push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceKline {
    pub close: Decimal,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub volume: Decimal,
    pub interval: String,
}

/// Subscription acknowledgement frames carry only an id/result echo and
/// no payload; they are dropped before routing.
pub fn is_ack(frame: &Value) -> bool {
    frame.get("id").is_some() && frame.get("result").is_some() && frame.get("stream").is_none()
}

fn decimal_field(value: &Value, key: &str) -> Decimal {
    match value.get(key) {
        Some(Value::String(s)) => s.parse().unwrap_or(Decimal::ZERO),
        Some(Value::Number(n)) => n.to_string().parse().unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}

/// Route an order-stream data frame. Returns `None` for anything that is
/// not an `executionReport`.
pub fn route_order(frame: &Value) -> Option<StreamEvent> {
    let data = frame.get("data")?;
    if str_field(data, "e") != Some("executionReport") {
        return None;
    }
    let order_id = match data.get("i") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return None,
    };
    let side = OrderSide::from_wire(str_field(data, "S")?)?;
    let status = OrderStatus::from_wire(str_field(data, "X")?)?;
    Some(StreamEvent::Order(OrderExecution {
        order_id: OrderId::new(order_id),
        side,
        status,
        cumulative_filled: decimal_field(data, "z"),
        last_filled: decimal_field(data, "l"),
        commission: decimal_field(data, "n"),
        commission_asset: str_field(data, "N").map(str::to_string),
    }))
}

/// Route a price-stream data frame. Returns `None` for anything that is
/// not a `kline`.
pub fn route_price(frame: &Value) -> Option<StreamEvent> {
    let data = frame.get("data")?;
    if str_field(data, "e") != Some("kline") {
        return None;
    }
    let k = data.get("k")?;
    Some(StreamEvent::Price(PriceKline {
        close: decimal_field(k, "c"),
        open: decimal_field(k, "o"),
        high: decimal_field(k, "h"),
        low: decimal_field(k, "l"),
        volume: decimal_field(k, "v"),
        interval: str_field(k, "i").unwrap_or_default().to_string(),
    }))
}
