//! Unified error types for the window arbitrage engine.

use rust_decimal::Decimal;
use thiserror::Error;

/// Unified error type for the engine.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Exchange/collaborator error.
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    /// Order execution error.
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// State store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Settlement/redemption error.
    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the exchange, market feed, chain, and relayer contracts.
#[derive(Error, Debug, Clone)]
pub enum ExchangeError {
    /// Transport-level failure (connection, timeout, malformed response).
    #[error("transport failure: {0}")]
    Transport(String),

    /// Order rejected by the exchange with a reason.
    #[error("order rejected: {reason}")]
    OrderRejected {
        /// Rejection reason from the exchange.
        reason: String,
    },

    /// Authentication or signing failure. Never retryable.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Order book for the asset is unavailable.
    #[error("order book unavailable for {asset}")]
    BookUnavailable {
        /// Asset whose book could not be fetched.
        asset: String,
    },

    /// Unknown order id on a status or cancel query.
    #[error("unknown order: {order_id}")]
    UnknownOrder {
        /// The order id that was not found.
        order_id: String,
    },

    /// Relayer refused or lost the request.
    #[error("relayer failure: {0}")]
    RelayerFailure(String),
}

/// Order execution errors raised by the trade and iceberg executors.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Deadline passed before the order reached a terminal state.
    #[error("deadline exceeded for {context}")]
    DeadlineExceeded {
        /// What was being executed.
        context: String,
    },

    /// Not enough depth within the slippage budget.
    #[error("insufficient depth: need {required}, fillable {available}")]
    InsufficientDepth {
        /// Required notional.
        required: Decimal,
        /// Fillable notional within the budget.
        available: Decimal,
    },

    /// Projected slippage above the configured maximum.
    #[error("slippage {projected} exceeds limit {limit}")]
    SlippageExceeded {
        /// Projected slippage ratio.
        projected: Decimal,
        /// Configured maximum.
        limit: Decimal,
    },

    /// Invalid notional or chunk parameters.
    #[error("invalid execution parameters: {0}")]
    InvalidParams(String),

    /// Fatal exchange error surfaced during execution.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// State store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Durable write failed. Always fatal for the tick that issued it.
    #[error("durable write failed for {key}: {reason}")]
    WriteFailed {
        /// Record key.
        key: String,
        /// Failure reason.
        reason: String,
    },

    /// Stored record could not be decoded.
    #[error("corrupt record {key}: {0}", key = .key)]
    Corrupt {
        /// Record key.
        key: String,
        /// Decode error.
        #[source]
        source: serde_json::Error,
    },
}

/// Settlement and redemption errors.
#[derive(Error, Debug)]
pub enum SettlementError {
    /// Claim transaction could not be built or submitted.
    #[error("claim submission failed: {0}")]
    SubmissionFailed(String),

    /// Chain or relayer error surfaced during redemption.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// Retry classification for errors crossing the executor boundary.
///
/// Low-level transport and parsing failures are reclassified here; layers
/// above the executors only ever see the closed outcome sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Auth/config/malformed-request errors. Stop immediately.
    Fatal,
    /// Order rejected for a non-liquidity reason. Stop this attempt.
    Business,
    /// No match, thin book, transient timeout. Retry until deadline.
    Retryable,
    /// No terminal signal from any source. Re-query on the next tick;
    /// never assume success or failure.
    Ambiguous,
}

/// Message fragments that mark an error as fatal regardless of its shape.
const FATAL_PATTERNS: &[&str] = &[
    "auth",
    "unauthorized",
    "forbidden",
    "signature",
    "api key",
    "invalid credentials",
    "malformed",
];

/// Rejection reasons that indicate missing liquidity rather than a bad order.
const LIQUIDITY_PATTERNS: &[&str] = &["no match", "unmatched", "liquidity", "depth", "fill or kill"];

/// Classify an exchange error for the executor retry loops.
pub fn classify(err: &ExchangeError) -> ErrorClass {
    match err {
        ExchangeError::AuthenticationFailed(_) => ErrorClass::Fatal,
        ExchangeError::OrderRejected { reason } => {
            let lower = reason.to_lowercase();
            if LIQUIDITY_PATTERNS.iter().any(|p| lower.contains(p)) {
                ErrorClass::Retryable
            } else {
                ErrorClass::Business
            }
        }
        ExchangeError::UnknownOrder { .. } => ErrorClass::Ambiguous,
        ExchangeError::BookUnavailable { .. } => ErrorClass::Retryable,
        ExchangeError::RelayerFailure(_) => ErrorClass::Retryable,
        ExchangeError::Transport(msg) => {
            let lower = msg.to_lowercase();
            if FATAL_PATTERNS.iter().any(|p| lower.contains(p)) {
                ErrorClass::Fatal
            } else {
                ErrorClass::Retryable
            }
        }
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable_by_default() {
        let err = ExchangeError::Transport("connection reset by peer".to_string());
        assert_eq!(classify(&err), ErrorClass::Retryable);
    }

    #[test]
    fn transport_errors_matching_fatal_patterns_stop() {
        for msg in ["401 Unauthorized", "bad signature", "invalid API key supplied"] {
            let err = ExchangeError::Transport(msg.to_string());
            assert_eq!(classify(&err), ErrorClass::Fatal, "{msg}");
        }
    }

    #[test]
    fn auth_failures_are_fatal() {
        let err = ExchangeError::AuthenticationFailed("expired".to_string());
        assert_eq!(classify(&err), ErrorClass::Fatal);
    }

    #[test]
    fn liquidity_rejections_are_retryable() {
        // These windows are seconds long; a thin-book rejection loops
        // immediately.
        let err = ExchangeError::OrderRejected {
            reason: "no match".to_string(),
        };
        assert_eq!(classify(&err), ErrorClass::Retryable);
    }

    #[test]
    fn non_liquidity_rejections_stop_the_attempt() {
        let err = ExchangeError::OrderRejected {
            reason: "price outside allowed band".to_string(),
        };
        assert_eq!(classify(&err), ErrorClass::Business);
    }

    #[test]
    fn unknown_order_is_ambiguous() {
        let err = ExchangeError::UnknownOrder {
            order_id: "ord-1".to_string(),
        };
        assert_eq!(classify(&err), ErrorClass::Ambiguous);
    }
}
