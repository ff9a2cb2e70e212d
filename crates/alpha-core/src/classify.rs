//! Error classification for claim and trading loops.
//!
//! Maps arbitrary exception/response text onto a closed set of error
//! categories, each with one recommended recovery action and a fixed
//! cooldown. Callers branch on the returned value instead of matching
//! exception strings at every call site.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Closed set of error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InsufficientBalance,
    NetworkTimeout,
    RateLimit,
    InvalidOrder,
    OrderNotFound,
    StreamDisconnect,
    ServerError,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        Self::InsufficientBalance,
        Self::NetworkTimeout,
        Self::RateLimit,
        Self::InvalidOrder,
        Self::OrderNotFound,
        Self::StreamDisconnect,
        Self::ServerError,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientBalance => "insufficient_balance",
            Self::NetworkTimeout => "network_timeout",
            Self::RateLimit => "rate_limit",
            Self::InvalidOrder => "invalid_order",
            Self::OrderNotFound => "order_not_found",
            Self::StreamDisconnect => "stream_disconnect",
            Self::ServerError => "server_error",
            Self::Unknown => "unknown",
        }
    }

    fn index(&self) -> usize {
        Self::ALL.iter().position(|k| k == self).unwrap_or(Self::ALL.len() - 1)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recovery action recommended for a classified error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendedAction {
    Retry,
    Wait,
    Skip,
    AutoSell,
    LogOnly,
}

/// Result of classifying one error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub action: RecommendedAction,
    pub cooldown: Duration,
}

/// Keyword sets per category, matched in declaration order against the
/// lower-cased message. First hit wins; no hit means `Unknown`.
const KEYWORDS: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::InsufficientBalance,
        &["余额不足", "481020", "insufficient balance", "balance not enough"],
    ),
    (
        ErrorKind::NetworkTimeout,
        &["timeout", "连接超时", "网络超时", "timed out"],
    ),
    (
        ErrorKind::RateLimit,
        &["rate limit", "限流", "too many requests", "429", "请求过于频繁"],
    ),
    (
        ErrorKind::InvalidOrder,
        &["invalid order", "订单无效", "order invalid", "参数错误"],
    ),
    (
        ErrorKind::OrderNotFound,
        &["order not found", "订单不存在", "order does not exist"],
    ),
    (
        ErrorKind::StreamDisconnect,
        &["connection closed", "连接断开", "websocket", "connection reset"],
    ),
    (
        ErrorKind::ServerError,
        &["api error", "服务器错误", "internal error", "500", "502", "503"],
    ),
];

/// Classify an error message into its category. Deterministic: the same
/// message always yields the same kind.
pub fn classify(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();
    for (kind, keywords) in KEYWORDS {
        if keywords.iter().any(|kw| lowered.contains(kw)) {
            return *kind;
        }
    }
    ErrorKind::Unknown
}

impl ErrorKind {
    /// Fixed action/cooldown table for each category.
    pub fn classification(self) -> ErrorClassification {
        let (action, cooldown_secs) = match self {
            Self::InsufficientBalance => (RecommendedAction::AutoSell, 0),
            Self::NetworkTimeout => (RecommendedAction::Retry, 5),
            Self::RateLimit => (RecommendedAction::Wait, 60),
            Self::InvalidOrder => (RecommendedAction::Skip, 0),
            Self::OrderNotFound => (RecommendedAction::LogOnly, 0),
            Self::StreamDisconnect => (RecommendedAction::Retry, 2),
            Self::ServerError => (RecommendedAction::Retry, 30),
            Self::Unknown => (RecommendedAction::LogOnly, 0),
        };
        ErrorClassification {
            kind: self,
            action,
            cooldown: Duration::from_secs(cooldown_secs),
        }
    }
}

/// Process-wide classifier with per-category counters.
///
/// The counters are observability only: the loops read them at shutdown,
/// never to gate behavior. Shared through the run context rather than a
/// module global so shutdown reporting is testable in isolation.
#[derive(Debug)]
pub struct ErrorClassifier {
    counts: [AtomicU64; 8],
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Classify a message and bump the category counter.
    pub fn classify(&self, message: &str) -> ErrorClassification {
        let kind = classify(message);
        self.counts[kind.index()].fetch_add(1, Ordering::Relaxed);
        kind.classification()
    }

    /// Counter value for one category.
    pub fn count(&self, kind: ErrorKind) -> u64 {
        self.counts[kind.index()].load(Ordering::Relaxed)
    }

    /// Snapshot of all non-zero counters, in category order.
    pub fn stats(&self) -> Vec<(ErrorKind, u64)> {
        ErrorKind::ALL
            .iter()
            .map(|k| (*k, self.count(*k)))
            .filter(|(_, n)| *n > 0)
            .collect()
    }
}
