//! Collaborator contracts consumed by the engine.
//!
//! The exchange, market feed, chain node, and relayer are external systems;
//! only their call surface is specified here. Every method is a suspension
//! point and must never block the runtime.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::depth::OrderbookSnapshot;
use crate::error::ExchangeError;

use super::types::PricePair;

/// Order status reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Accepted but not yet on the book.
    #[strum(serialize = "pending", serialize = "PENDING")]
    Pending,
    /// Resting on the book.
    #[strum(serialize = "live", serialize = "LIVE")]
    Live,
    /// Fully filled.
    #[strum(serialize = "filled", serialize = "FILLED")]
    Filled,
    /// Cancelled before filling.
    #[strum(serialize = "canceled", serialize = "cancelled", serialize = "CANCELED")]
    Canceled,
    /// Rejected by the exchange.
    #[strum(serialize = "rejected", serialize = "REJECTED")]
    Rejected,
    /// Expired unfilled.
    #[strum(serialize = "expired", serialize = "EXPIRED")]
    Expired,
}

impl OrderStatus {
    /// Check if the status is terminal (won't change).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// Check if the order filled.
    pub fn is_filled(&self) -> bool {
        matches!(self, OrderStatus::Filled)
    }
}

/// Parameters for one buy order.
#[derive(Debug, Clone)]
pub struct OrderTicket {
    /// Asset to buy.
    pub asset: String,
    /// USD notional to spend.
    pub notional: Decimal,
    /// Limit price, the worst acceptable fill.
    pub limit_price: Decimal,
}

impl OrderTicket {
    /// Validate order parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.asset.is_empty() {
            return Err("asset is required".to_string());
        }
        if self.notional <= Decimal::ZERO {
            return Err("notional must be positive".to_string());
        }
        if self.limit_price <= Decimal::ZERO || self.limit_price >= Decimal::ONE {
            return Err("limit price must be in (0, 1)".to_string());
        }
        Ok(())
    }
}

/// Immediate response to an order submission.
#[derive(Debug, Clone)]
pub struct OrderAck {
    /// Exchange-assigned order id.
    pub order_id: String,
    /// Status at acknowledgement time.
    pub status: OrderStatus,
}

/// Point-in-time view of one order.
#[derive(Debug, Clone)]
pub struct OrderReport {
    /// Order id.
    pub order_id: String,
    /// Current status.
    pub status: OrderStatus,
    /// Tokens filled so far.
    pub filled_tokens: Decimal,
    /// Average realized price across fills.
    pub avg_price: Option<Decimal>,
}

/// Receipt for a settled transaction on the chain.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    /// Transaction reference (hash).
    pub tx_ref: String,
    /// Whether the transaction succeeded.
    pub success: bool,
}

/// A claim transaction ready for relayed submission.
#[derive(Debug, Clone)]
pub struct ClaimTx {
    /// Condition being redeemed.
    pub condition_id: String,
    /// Encoded call data.
    pub payload: Vec<u8>,
}

/// Relayer-side state of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayState {
    /// Queued at the relayer.
    Pending,
    /// Broadcast to the chain.
    Submitted {
        /// Transaction reference assigned at broadcast.
        tx_ref: String,
    },
    /// Mined and confirmed.
    Confirmed {
        /// Final transaction reference.
        tx_ref: String,
    },
    /// Dropped or reverted.
    Failed {
        /// Failure reason.
        reason: String,
    },
}

/// Acknowledgement of a relayed submission.
#[derive(Debug, Clone)]
pub struct RelaySubmission {
    /// Relayer request id for status polling.
    pub request_id: String,
    /// Transaction reference, if assigned immediately.
    pub tx_ref: Option<String>,
}

/// Live price and depth source.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Best ask for both outcomes of a window.
    async fn top_of_book(
        &self,
        up_asset: &str,
        down_asset: &str,
    ) -> Result<PricePair, ExchangeError>;

    /// Full order book for one asset.
    async fn order_book(&self, asset: &str) -> Result<OrderbookSnapshot, ExchangeError>;
}

/// Order entry and query surface of the exchange.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Submit one order, returning the immediate acknowledgement.
    async fn submit_order(&self, ticket: &OrderTicket) -> Result<OrderAck, ExchangeError>;

    /// Query current order state.
    async fn order_status(&self, order_id: &str) -> Result<OrderReport, ExchangeError>;

    /// Settlement reference for a filled order, if the exchange has one.
    async fn fill_tx_ref(&self, order_id: &str) -> Result<Option<String>, ExchangeError>;

    /// Cancel an open order.
    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError>;
}

/// Chain/settlement layer queries.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Receipt for a transaction, if mined.
    async fn transaction_receipt(&self, tx_ref: &str) -> Result<Option<TxReceipt>, ExchangeError>;

    /// On-chain balance of a position asset.
    async fn onchain_balance(&self, asset: &str) -> Result<Decimal, ExchangeError>;
}

/// Relayed transaction submission.
#[async_trait]
pub trait Relayer: Send + Sync {
    /// Submit a transaction through the relayer.
    async fn submit_relayed_tx(&self, txn: &ClaimTx) -> Result<RelaySubmission, ExchangeError>;

    /// Relayer-side state of a prior submission.
    async fn relay_status(&self, request_id: &str) -> Result<RelayState, ExchangeError>;
}
