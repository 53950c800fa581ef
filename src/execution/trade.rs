//! Single-order execution.
//!
//! Drives one order to a terminal success or failure within a deadline,
//! racing the exchange's order-status poll against a chain-receipt poll for
//! confirmation and retrying retryable failures until the deadline. The
//! deadline is the window close plus a fixed grace period: retrying briefly
//! after the official close is deliberate, liquidity sometimes remains
//! momentarily.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::confirm::{race, ConfirmationResult, Probe, ProbeVerdict};
use crate::error::{classify, ErrorClass, ExchangeError};
use crate::market::client::{ChainClient, Exchange, OrderStatus, OrderTicket};
use crate::metrics::{METRIC_ORDERS_ABANDONED, METRIC_ORDERS_FILLED, METRIC_ORDERS_SUBMITTED};

/// Confirmed fill details.
#[derive(Debug, Clone)]
pub struct FillDetails {
    /// Order id that filled.
    pub order_id: String,
    /// Tokens received.
    pub tokens: Decimal,
    /// Notional spent.
    pub spent: Decimal,
    /// Realized average price.
    pub avg_price: Decimal,
    /// Settlement reference, if recovered.
    pub tx_ref: Option<String>,
    /// Which confirmation source terminated the race.
    pub confirmed_by: String,
}

/// Terminal outcome of driving one order.
#[derive(Debug, Clone)]
pub enum TradeOutcome {
    /// Order filled and was confirmed.
    Filled(FillDetails),
    /// Order failed terminally before the deadline.
    Failed {
        /// Human-readable reason.
        reason: String,
        /// True for auth/config errors that must stop the whole loop.
        fatal: bool,
    },
    /// Deadline passed with orders possibly still live on the exchange.
    /// These ids are phantom-fill candidates for later reconciliation,
    /// never silently dropped.
    Abandoned {
        /// Order ids whose final state is unknown.
        pending_order_ids: Vec<String>,
    },
}

/// Probe polling the exchange's own view of an order.
struct OrderStatusProbe {
    exchange: Arc<dyn Exchange>,
    order_id: String,
    interval: Duration,
}

#[async_trait]
impl Probe for OrderStatusProbe {
    fn source(&self) -> &str {
        "order-status"
    }

    fn poll_interval(&self) -> Duration {
        self.interval
    }

    async fn check(&self) -> Result<Option<ProbeVerdict>, ExchangeError> {
        let report = self.exchange.order_status(&self.order_id).await?;
        if report.status.is_terminal() {
            Ok(Some(ProbeVerdict {
                confirmed: report.status.is_filled(),
                tx_ref: None,
            }))
        } else {
            Ok(None)
        }
    }
}

/// Probe polling the settlement layer for a mined receipt.
pub(crate) struct ReceiptProbe {
    pub(crate) chain: Arc<dyn ChainClient>,
    pub(crate) tx_ref: String,
    pub(crate) interval: Duration,
}

#[async_trait]
impl Probe for ReceiptProbe {
    fn source(&self) -> &str {
        "chain-receipt"
    }

    fn poll_interval(&self) -> Duration {
        self.interval
    }

    async fn check(&self) -> Result<Option<ProbeVerdict>, ExchangeError> {
        match self.chain.transaction_receipt(&self.tx_ref).await? {
            Some(receipt) => Ok(Some(ProbeVerdict {
                confirmed: receipt.success,
                tx_ref: Some(receipt.tx_ref),
            })),
            None => Ok(None),
        }
    }
}

/// Executes one order at a time, confirming fills through a two-probe race.
#[derive(Clone)]
pub struct TradeExecutor {
    exchange: Arc<dyn Exchange>,
    chain: Arc<dyn ChainClient>,
    config: Arc<Config>,
}

impl TradeExecutor {
    /// Build an executor over the exchange and chain contracts.
    pub fn new(exchange: Arc<dyn Exchange>, chain: Arc<dyn ChainClient>, config: Arc<Config>) -> Self {
        Self {
            exchange,
            chain,
            config,
        }
    }

    /// Drive one order to a terminal outcome before `deadline`.
    ///
    /// No new submission is ever issued after the deadline.
    #[instrument(skip(self, ticket), fields(asset = %ticket.asset, notional = %ticket.notional))]
    pub async fn execute(&self, ticket: &OrderTicket, deadline: Instant) -> TradeOutcome {
        if let Err(reason) = ticket.validate() {
            return TradeOutcome::Failed { reason, fatal: true };
        }

        let mut pending_order_ids: Vec<String> = Vec::new();

        while Instant::now() < deadline {
            let ack = match self.exchange.submit_order(ticket).await {
                Ok(ack) => ack,
                Err(e) => match classify(&e) {
                    ErrorClass::Fatal => {
                        return TradeOutcome::Failed {
                            reason: e.to_string(),
                            fatal: true,
                        };
                    }
                    ErrorClass::Business => {
                        // Rejected for a non-liquidity reason; resubmitting
                        // the same ticket would fail the same way.
                        return TradeOutcome::Failed {
                            reason: e.to_string(),
                            fatal: false,
                        };
                    }
                    _ => {
                        debug!(error = %e, "submission failed, retrying");
                        // Pacing yield so a hot failure loop cannot starve
                        // the runtime; not a backoff.
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                },
            };
            counter!(METRIC_ORDERS_SUBMITTED).increment(1);

            match ack.status {
                OrderStatus::Filled => {
                    return self.confirm_fill(&ack.order_id, deadline).await;
                }
                OrderStatus::Rejected | OrderStatus::Canceled | OrderStatus::Expired => {
                    // Retryable; these windows are seconds long, loop now.
                    debug!(order_id = %ack.order_id, status = %ack.status, "order dead on arrival, retrying");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
                OrderStatus::Pending | OrderStatus::Live => {
                    let cap = self.race_cap(deadline);
                    let probes: Vec<Arc<dyn Probe>> = vec![Arc::new(OrderStatusProbe {
                        exchange: Arc::clone(&self.exchange),
                        order_id: ack.order_id.clone(),
                        interval: Duration::from_millis(self.config.status_poll_ms),
                    })];
                    match race(probes, cap).await {
                        ConfirmationResult::Terminal { confirmed: true, .. } => {
                            return self.confirm_fill(&ack.order_id, deadline).await;
                        }
                        ConfirmationResult::Terminal { confirmed: false, .. } => {
                            debug!(order_id = %ack.order_id, "order terminated unfilled, retrying");
                            continue;
                        }
                        ConfirmationResult::Timeout => {
                            // Ambiguous: re-query once before deciding. The
                            // order may have filled while the race was idle.
                            match self.exchange.order_status(&ack.order_id).await {
                                Ok(report) if report.status.is_filled() => {
                                    return self.confirm_fill(&ack.order_id, deadline).await;
                                }
                                Ok(report) if !report.status.is_terminal() => {
                                    // Still live: cancel best-effort and keep
                                    // the id for reconciliation.
                                    let _ = self.exchange.cancel_order(&ack.order_id).await;
                                    pending_order_ids.push(ack.order_id.clone());
                                }
                                _ => pending_order_ids.push(ack.order_id.clone()),
                            }
                            continue;
                        }
                    }
                }
            }
        }

        if pending_order_ids.is_empty() {
            TradeOutcome::Failed {
                reason: "deadline exceeded with no fill".to_string(),
                fatal: false,
            }
        } else {
            warn!(
                count = pending_order_ids.len(),
                "abandoning orders past deadline; flagged for reconciliation"
            );
            counter!(METRIC_ORDERS_ABANDONED).increment(pending_order_ids.len() as u64);
            TradeOutcome::Abandoned { pending_order_ids }
        }
    }

    /// Confirmation race cap: `min(configured timeout, time to deadline)`.
    fn race_cap(&self, deadline: Instant) -> Duration {
        let configured = Duration::from_secs(self.config.confirm_timeout_secs);
        configured.min(deadline.saturating_duration_since(Instant::now()))
    }

    /// An exchange-filled order: recover the settlement reference, race the
    /// receipt probe if one exists, and read out the final fill shape.
    async fn confirm_fill(&self, order_id: &str, deadline: Instant) -> TradeOutcome {
        let tx_ref = self.recover_tx_ref(order_id).await;

        let confirmed_by = if let Some(ref tx) = tx_ref {
            let probes: Vec<Arc<dyn Probe>> = vec![
                Arc::new(OrderStatusProbe {
                    exchange: Arc::clone(&self.exchange),
                    order_id: order_id.to_string(),
                    interval: Duration::from_millis(self.config.status_poll_ms),
                }),
                Arc::new(ReceiptProbe {
                    chain: Arc::clone(&self.chain),
                    tx_ref: tx.clone(),
                    interval: Duration::from_millis(self.config.receipt_poll_ms),
                }),
            ];
            match race(probes, self.race_cap(deadline)).await {
                ConfirmationResult::Terminal { source, confirmed: true, .. } => source,
                // The exchange already reported the fill; a failed or absent
                // receipt does not un-fill it.
                _ => "order-status".to_string(),
            }
        } else {
            "order-status".to_string()
        };

        match self.exchange.order_status(order_id).await {
            Ok(report) => {
                let avg_price = report.avg_price.unwrap_or(Decimal::ZERO);
                let spent = report.filled_tokens * avg_price;
                counter!(METRIC_ORDERS_FILLED).increment(1);
                info!(
                    order_id,
                    tokens = %report.filled_tokens,
                    spent = %spent,
                    confirmed_by = %confirmed_by,
                    "fill confirmed"
                );
                TradeOutcome::Filled(FillDetails {
                    order_id: order_id.to_string(),
                    tokens: report.filled_tokens,
                    spent,
                    avg_price,
                    tx_ref,
                    confirmed_by,
                })
            }
            Err(e) => TradeOutcome::Failed {
                reason: format!("fill reported but final read failed: {e}"),
                fatal: false,
            },
        }
    }

    /// Try briefly to recover the fill's settlement reference from the
    /// exchange's own trade record. Absence is acceptable: the
    /// exchange-confirmed result stands alone.
    async fn recover_tx_ref(&self, order_id: &str) -> Option<String> {
        let budget = Duration::from_millis(self.config.tx_ref_recovery_ms);
        let started = Instant::now();
        loop {
            match self.exchange.fill_tx_ref(order_id).await {
                Ok(Some(tx_ref)) => return Some(tx_ref),
                Ok(None) => {}
                Err(e) => debug!(order_id, error = %e, "tx ref lookup failed"),
            }
            if started.elapsed() >= budget {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::PriceLevel;
    use crate::market::mock::{FillBehavior, MockVenue};
    use rust_decimal_macros::dec;
    use std::sync::atomic::Ordering;

    fn config() -> Arc<Config> {
        Arc::new(Config {
            status_poll_ms: 10,
            receipt_poll_ms: 10,
            tx_ref_recovery_ms: 50,
            confirm_timeout_secs: 1,
            ..Config::default()
        })
    }

    fn ticket() -> OrderTicket {
        OrderTicket {
            asset: "up".to_string(),
            notional: dec!(10),
            limit_price: dec!(0.55),
        }
    }

    fn executor(venue: &MockVenue) -> TradeExecutor {
        TradeExecutor::new(
            Arc::new(venue.clone()),
            Arc::new(venue.clone()),
            config(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_fill_is_confirmed() {
        let venue = MockVenue::new();
        venue.set_book("up", vec![PriceLevel::new(dec!(0.50), dec!(100))]);

        let outcome = executor(&venue)
            .execute(&ticket(), Instant::now() + Duration::from_secs(5))
            .await;

        match outcome {
            TradeOutcome::Filled(fill) => {
                assert_eq!(fill.tokens, dec!(20));
                assert_eq!(fill.avg_price, dec!(0.50));
                assert!(fill.tx_ref.is_some());
            }
            other => panic!("expected fill, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_fill_is_driven_to_terminal() {
        let venue = MockVenue::new();
        venue.set_book("up", vec![PriceLevel::new(dec!(0.50), dec!(100))]);
        venue.set_fill_behavior(FillBehavior::AfterPolls(3));

        let outcome = executor(&venue)
            .execute(&ticket(), Instant::now() + Duration::from_secs(10))
            .await;

        assert!(matches!(outcome, TradeOutcome::Filled(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_submit_failures_are_retried() {
        let venue = MockVenue::new();
        venue.set_book("up", vec![PriceLevel::new(dec!(0.50), dec!(100))]);
        venue.fail_next_submits(3);

        let outcome = executor(&venue)
            .execute(&ticket(), Instant::now() + Duration::from_secs(10))
            .await;

        assert!(matches!(outcome, TradeOutcome::Filled(_)));
        assert_eq!(venue.submit_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_stop_immediately() {
        let venue = MockVenue::new();
        venue.set_fatal_submit_error("401 unauthorized");

        let outcome = executor(&venue)
            .execute(&ticket(), Instant::now() + Duration::from_secs(10))
            .await;

        match outcome {
            TradeOutcome::Failed { fatal, .. } => assert!(fatal),
            other => panic!("expected fatal failure, got {other:?}"),
        }
        assert_eq!(venue.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_submission_after_deadline() {
        let venue = MockVenue::new();
        venue.set_book("up", vec![PriceLevel::new(dec!(0.50), dec!(100))]);
        venue.fail_next_submits(u32::MAX);

        let outcome = executor(&venue)
            .execute(&ticket(), Instant::now() + Duration::from_millis(200))
            .await;

        assert!(matches!(outcome, TradeOutcome::Failed { fatal: false, .. }));
        let calls_at_deadline = venue.submit_calls.load(Ordering::SeqCst);

        // Time moves on; no further submissions may appear.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(venue.submit_calls.load(Ordering::SeqCst), calls_at_deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn unfilled_live_order_is_abandoned_and_flagged() {
        let venue = MockVenue::new();
        venue.set_book("up", vec![PriceLevel::new(dec!(0.50), dec!(100))]);
        venue.set_fill_behavior(FillBehavior::NeverFill);

        let outcome = executor(&venue)
            .execute(&ticket(), Instant::now() + Duration::from_secs(3))
            .await;

        match outcome {
            TradeOutcome::Abandoned { pending_order_ids } => {
                assert!(!pending_order_ids.is_empty());
            }
            other => panic!("expected abandonment, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fill_without_tx_ref_is_accepted_on_exchange_word() {
        let venue = MockVenue::new();
        venue.set_book("up", vec![PriceLevel::new(dec!(0.50), dec!(100))]);
        venue.set_provide_tx_refs(false);

        let outcome = executor(&venue)
            .execute(&ticket(), Instant::now() + Duration::from_secs(5))
            .await;

        match outcome {
            TradeOutcome::Filled(fill) => {
                assert!(fill.tx_ref.is_none());
                assert_eq!(fill.confirmed_by, "order-status");
            }
            other => panic!("expected fill, got {other:?}"),
        }
    }
}
