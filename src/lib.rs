//! Capital deployment engine for short binary-outcome trading windows.
//!
//! Buys both outcomes of a fixed-duration binary market when their combined
//! price is below $1.00, then keeps the two sides' token counts balanced
//! until the window locks. A balanced position pays out the same amount
//! whichever side wins, so the spread below parity is a guaranteed profit.
//!
//! # Strategy
//!
//! Capital for each window is split into three pools spent in phases:
//!
//! ```text
//! WAITING    prices observed until the entry band is hit
//! INITIAL    equal token counts bought on both sides
//! REBALANCE  stepwise top-ups of the under-weighted side
//! RESERVE    final top-ups from the reserve pool
//! LOCKED     no further trading; wait for resolution
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`market`]: Market types and collaborator contracts
//! - [`depth`]: Order book depth analysis
//! - [`confirm`]: Multi-source confirmation racing
//! - [`execution`]: Trade driving, iceberg chunking, reconciliation
//! - [`arbitrage`]: Position accounting and the phase state machine
//! - [`store`]: Dual-tier state persistence
//! - [`settlement`]: Post-resolution redemption
//! - [`metrics`]: Metric names and registration

pub mod arbitrage;
pub mod config;
pub mod confirm;
pub mod depth;
pub mod error;
pub mod execution;
pub mod market;
pub mod metrics;
pub mod settlement;
pub mod store;

pub use config::Config;
pub use error::{BotError, Result};
