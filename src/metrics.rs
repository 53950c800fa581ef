//! Metrics for the window arbitrage engine.
//!
//! Counters and gauges published through the `metrics` facade:
//! - Order lifecycle (submitted, filled, abandoned)
//! - Iceberg chunk execution
//! - Phantom fills found by reconciliation
//! - Window outcomes (locked, unbalanced, untraded)
//! - Redemption results and cumulative profit

use metrics::{describe_counter, describe_gauge, gauge};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

// === Metric Name Constants ===

/// Orders submitted counter metric name.
pub const METRIC_ORDERS_SUBMITTED: &str = "orders_submitted_total";
/// Orders filled counter metric name.
pub const METRIC_ORDERS_FILLED: &str = "orders_filled_total";
/// Orders abandoned at deadline counter metric name.
pub const METRIC_ORDERS_ABANDONED: &str = "orders_abandoned_total";
/// Iceberg chunks executed counter metric name.
pub const METRIC_CHUNKS_EXECUTED: &str = "iceberg_chunks_executed_total";
/// Phantom fills discovered counter metric name.
pub const METRIC_PHANTOM_FILLS: &str = "phantom_fills_total";
/// Rebalance buys counter metric name.
pub const METRIC_REBALANCE_BUYS: &str = "rebalance_buys_total";
/// Windows locked with a guaranteed payout counter metric name.
pub const METRIC_WINDOWS_LOCKED: &str = "windows_locked_total";
/// Windows resolved with an unbalanced position counter metric name.
pub const METRIC_WINDOWS_UNBALANCED: &str = "windows_unbalanced_total";
/// Windows that closed without any trade counter metric name.
pub const METRIC_WINDOWS_UNTRADED: &str = "windows_untraded_total";
/// Successful redemptions counter metric name.
pub const METRIC_REDEMPTIONS: &str = "redemptions_total";
/// Failed redemptions counter metric name.
pub const METRIC_REDEMPTIONS_FAILED: &str = "redemptions_failed_total";
/// Cumulative realized profit gauge metric name.
pub const METRIC_CUMULATIVE_PROFIT: &str = "cumulative_profit_usd";
/// Current token imbalance ratio gauge metric name.
pub const METRIC_IMBALANCE_RATIO: &str = "imbalance_ratio";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_counter!(
        METRIC_ORDERS_SUBMITTED,
        "Total number of orders submitted"
    );
    describe_counter!(METRIC_ORDERS_FILLED, "Total number of orders filled");
    describe_counter!(
        METRIC_ORDERS_ABANDONED,
        "Total number of orders abandoned at a deadline"
    );
    describe_counter!(
        METRIC_CHUNKS_EXECUTED,
        "Total number of iceberg chunks executed"
    );
    describe_counter!(
        METRIC_PHANTOM_FILLS,
        "Total number of abandoned orders later found filled"
    );
    describe_counter!(
        METRIC_REBALANCE_BUYS,
        "Total number of rebalance top-up buys"
    );
    describe_counter!(
        METRIC_WINDOWS_LOCKED,
        "Total number of windows locked with a guaranteed payout"
    );
    describe_counter!(
        METRIC_WINDOWS_UNBALANCED,
        "Total number of windows resolved with an unbalanced position"
    );
    describe_counter!(
        METRIC_WINDOWS_UNTRADED,
        "Total number of windows that closed without a trade"
    );
    describe_counter!(METRIC_REDEMPTIONS, "Total number of successful redemptions");
    describe_counter!(
        METRIC_REDEMPTIONS_FAILED,
        "Total number of failed redemptions"
    );

    describe_gauge!(
        METRIC_CUMULATIVE_PROFIT,
        "Cumulative realized profit in USD"
    );
    describe_gauge!(
        METRIC_IMBALANCE_RATIO,
        "Current token imbalance ratio of the active position"
    );

    debug!("Metrics initialized");
}

/// Record the cumulative realized profit.
pub fn record_cumulative_profit(profit: Decimal) {
    gauge!(METRIC_CUMULATIVE_PROFIT).set(profit.to_f64().unwrap_or(0.0));
}

/// Record the active position's imbalance ratio.
pub fn record_imbalance_ratio(ratio: Decimal) {
    gauge!(METRIC_IMBALANCE_RATIO).set(ratio.to_f64().unwrap_or(0.0));
}
