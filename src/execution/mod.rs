//! Order execution: single-order driving, iceberg chunking, and post-hoc
//! reconciliation of abandoned orders.

pub mod iceberg;
pub mod reconcile;
pub mod trade;

pub use iceberg::{IcebergExecutor, IcebergReport};
pub use reconcile::{sweep, PhantomFill};
pub use trade::{FillDetails, TradeExecutor, TradeOutcome};
