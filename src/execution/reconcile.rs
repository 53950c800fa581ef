//! Post-hoc reconciliation of abandoned orders.
//!
//! Orders abandoned at a deadline may still have filled after the cancel
//! request raced a match. The sweep re-queries every abandoned id and
//! reports any that reached Filled, so the discrepancy lands in the logs
//! and the audit record instead of silently skewing the position.

use std::sync::Arc;

use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::market::client::Exchange;
use crate::metrics::METRIC_PHANTOM_FILLS;

/// An abandoned order that turned out to have filled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhantomFill {
    /// The abandoned order id.
    pub order_id: String,
    /// Tokens the fill produced.
    pub tokens: Decimal,
    /// Average fill price, when the venue reports one.
    pub avg_price: Option<Decimal>,
}

/// Re-query abandoned order ids and report any that actually filled.
///
/// Detection only. The position is never mutated here; an operator (or a
/// later window) decides what to do with the stray tokens.
#[instrument(skip(exchange, order_ids), fields(count = order_ids.len()))]
pub async fn sweep(exchange: &Arc<dyn Exchange>, order_ids: &[String]) -> Vec<PhantomFill> {
    let mut found = Vec::new();
    for order_id in order_ids {
        match exchange.order_status(order_id).await {
            Ok(report) if report.status.is_filled() => {
                warn!(
                    order_id,
                    tokens = %report.filled_tokens,
                    "abandoned order filled after deadline"
                );
                counter!(METRIC_PHANTOM_FILLS).increment(1);
                found.push(PhantomFill {
                    order_id: order_id.clone(),
                    tokens: report.filled_tokens,
                    avg_price: report.avg_price,
                });
            }
            Ok(_) => {}
            Err(e) => {
                // An unknown id is expected for orders the cancel beat.
                warn!(order_id, error = %e, "reconciliation query failed");
            }
        }
    }
    found
}
