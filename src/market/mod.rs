//! Market types and collaborator contracts.

pub mod client;
pub mod mock;
pub mod types;

pub use client::{ChainClient, Exchange, MarketFeed, OrderAck, OrderStatus, RelayState, Relayer};
pub use types::{Outcome, PricePair, TradingWindow};
