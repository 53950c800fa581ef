//! Scriptable mock collaborators for unit and integration testing.
//!
//! One mock implements all four contracts (feed, exchange, chain, relayer)
//! so tests can wire a single object everywhere. Behavior is scripted per
//! asset or order: fills, rejections, transport failures, and confirmation
//! delays are all injectable, and every surface keeps call counters so tests
//! can assert that cancelled probes really stopped polling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::depth::{OrderbookSnapshot, PriceLevel};
use crate::error::ExchangeError;

use super::client::{
    ChainClient, ClaimTx, Exchange, MarketFeed, OrderAck, OrderReport, OrderStatus, OrderTicket,
    RelayState, RelaySubmission, Relayer, TxReceipt,
};
use super::types::PricePair;

/// How the mock exchange treats an incoming order.
#[derive(Debug, Clone, Default)]
pub enum FillBehavior {
    /// Fill instantly against the scripted book.
    #[default]
    Immediate,
    /// Acknowledge as pending; fill after N status polls.
    AfterPolls(u32),
    /// Reject with the given reason.
    Reject(String),
    /// Acknowledge as live and never fill.
    NeverFill,
}

#[derive(Debug, Clone)]
struct MockOrder {
    asset: String,
    notional: Decimal,
    status: OrderStatus,
    filled_tokens: Decimal,
    avg_price: Option<Decimal>,
    polls_until_fill: u32,
    tx_ref: Option<String>,
}

#[derive(Default)]
struct MockState {
    books: HashMap<String, Vec<PriceLevel>>,
    orders: HashMap<String, MockOrder>,
    fill_behavior: FillBehavior,
    /// Transport failures injected into the next N submissions.
    failing_submits: u32,
    fatal_submit_error: Option<String>,
    provide_tx_refs: bool,
    balances: HashMap<String, Decimal>,
    receipts: HashMap<String, TxReceipt>,
    relay_requests: HashMap<String, u32>,
    relay_confirm_after: u32,
    relay_fail_reason: Option<String>,
}

/// Mock implementation of every collaborator contract.
#[derive(Clone)]
pub struct MockVenue {
    state: Arc<Mutex<MockState>>,
    next_id: Arc<AtomicU64>,
    /// Submissions attempted.
    pub submit_calls: Arc<AtomicU32>,
    /// Order status polls.
    pub status_calls: Arc<AtomicU32>,
    /// Chain receipt polls.
    pub receipt_calls: Arc<AtomicU32>,
    /// Relayer status polls.
    pub relay_calls: Arc<AtomicU32>,
}

impl MockVenue {
    /// Create an empty mock.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                provide_tx_refs: true,
                relay_confirm_after: 1,
                ..MockState::default()
            })),
            next_id: Arc::new(AtomicU64::new(1)),
            submit_calls: Arc::new(AtomicU32::new(0)),
            status_calls: Arc::new(AtomicU32::new(0)),
            receipt_calls: Arc::new(AtomicU32::new(0)),
            relay_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Script the ask ladder for an asset.
    pub fn set_book(&self, asset: &str, asks: Vec<PriceLevel>) {
        let mut state = self.state.lock().unwrap();
        let mut sorted = asks;
        sorted.sort_by(|a, b| a.price.cmp(&b.price));
        state.books.insert(asset.to_string(), sorted);
    }

    /// Script how incoming orders behave.
    pub fn set_fill_behavior(&self, behavior: FillBehavior) {
        self.state.lock().unwrap().fill_behavior = behavior;
    }

    /// Inject transport failures into the next `count` submissions.
    pub fn fail_next_submits(&self, count: u32) {
        self.state.lock().unwrap().failing_submits = count;
    }

    /// Make every submission fail with a fatal (auth-style) message.
    pub fn set_fatal_submit_error(&self, message: &str) {
        self.state.lock().unwrap().fatal_submit_error = Some(message.to_string());
    }

    /// Control whether filled orders carry a settlement reference.
    pub fn set_provide_tx_refs(&self, provide: bool) {
        self.state.lock().unwrap().provide_tx_refs = provide;
    }

    /// Script the on-chain balance for an asset.
    pub fn set_balance(&self, asset: &str, amount: Decimal) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(asset.to_string(), amount);
    }

    /// Script a mined receipt.
    pub fn set_receipt(&self, tx_ref: &str, success: bool) {
        self.state.lock().unwrap().receipts.insert(
            tx_ref.to_string(),
            TxReceipt {
                tx_ref: tx_ref.to_string(),
                success,
            },
        );
    }

    /// Confirm relayed transactions after this many status polls.
    pub fn set_relay_confirm_after(&self, polls: u32) {
        self.state.lock().unwrap().relay_confirm_after = polls;
    }

    /// Make relayed transactions fail with the given reason.
    pub fn set_relay_failure(&self, reason: &str) {
        self.state.lock().unwrap().relay_fail_reason = Some(reason.to_string());
    }

    fn next_order_id(&self) -> String {
        format!("ord-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Walk the scripted book, consuming notional and returning
    /// (tokens, avg price). Levels are mutated so later chunks see the
    /// thinner book.
    fn consume_book(state: &mut MockState, asset: &str, notional: Decimal) -> (Decimal, Decimal) {
        let Some(levels) = state.books.get_mut(asset) else {
            return (Decimal::ZERO, Decimal::ZERO);
        };
        let mut remaining = notional;
        let mut spent = Decimal::ZERO;
        let mut tokens = Decimal::ZERO;
        for level in levels.iter_mut() {
            if remaining.is_zero() {
                break;
            }
            let take = remaining.min(level.notional);
            level.notional -= take;
            spent += take;
            tokens += take / level.price;
            remaining -= take;
        }
        levels.retain(|l| l.notional > Decimal::ZERO);
        let avg = if tokens > Decimal::ZERO {
            spent / tokens
        } else {
            Decimal::ZERO
        };
        (tokens, avg)
    }
}

impl Default for MockVenue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketFeed for MockVenue {
    async fn top_of_book(
        &self,
        up_asset: &str,
        down_asset: &str,
    ) -> Result<PricePair, ExchangeError> {
        let state = self.state.lock().unwrap();
        let best = |asset: &str| {
            state
                .books
                .get(asset)
                .and_then(|levels| levels.first())
                .map(|l| l.price)
                .ok_or_else(|| ExchangeError::BookUnavailable {
                    asset: asset.to_string(),
                })
        };
        Ok(PricePair::new(best(up_asset)?, best(down_asset)?))
    }

    async fn order_book(&self, asset: &str) -> Result<OrderbookSnapshot, ExchangeError> {
        let state = self.state.lock().unwrap();
        let levels = state
            .books
            .get(asset)
            .ok_or_else(|| ExchangeError::BookUnavailable {
                asset: asset.to_string(),
            })?;
        Ok(OrderbookSnapshot::new(asset, levels.clone()))
    }
}

#[async_trait]
impl Exchange for MockVenue {
    async fn submit_order(&self, ticket: &OrderTicket) -> Result<OrderAck, ExchangeError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();

        if let Some(message) = &state.fatal_submit_error {
            return Err(ExchangeError::Transport(message.clone()));
        }
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(ExchangeError::Transport("connection reset".to_string()));
        }

        let order_id = self.next_order_id();
        let behavior = state.fill_behavior.clone();
        let (status, filled_tokens, avg_price, polls_until_fill) = match behavior {
            FillBehavior::Immediate => {
                let (tokens, avg) = Self::consume_book(&mut state, &ticket.asset, ticket.notional);
                (OrderStatus::Filled, tokens, Some(avg), 0)
            }
            FillBehavior::AfterPolls(polls) => (OrderStatus::Pending, Decimal::ZERO, None, polls),
            FillBehavior::Reject(reason) => {
                return Err(ExchangeError::OrderRejected { reason });
            }
            FillBehavior::NeverFill => (OrderStatus::Live, Decimal::ZERO, None, 0),
        };

        let tx_ref = if status.is_filled() && state.provide_tx_refs {
            Some(format!("0xfill-{order_id}"))
        } else {
            None
        };

        state.orders.insert(
            order_id.clone(),
            MockOrder {
                asset: ticket.asset.clone(),
                notional: ticket.notional,
                status,
                filled_tokens,
                avg_price,
                polls_until_fill,
                tx_ref,
            },
        );

        Ok(OrderAck { order_id, status })
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderReport, ExchangeError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();

        // Resolve deferred fills first, then read the final shape.
        let (asset, notional, fill_now) = {
            let order =
                state
                    .orders
                    .get_mut(order_id)
                    .ok_or_else(|| ExchangeError::UnknownOrder {
                        order_id: order_id.to_string(),
                    })?;
            if order.status == OrderStatus::Pending && order.polls_until_fill > 0 {
                order.polls_until_fill -= 1;
                (
                    order.asset.clone(),
                    order.notional,
                    order.polls_until_fill == 0,
                )
            } else {
                (order.asset.clone(), order.notional, false)
            }
        };

        if fill_now {
            let (tokens, avg) = Self::consume_book(&mut state, &asset, notional);
            let provide_refs = state.provide_tx_refs;
            let order = state.orders.get_mut(order_id).expect("order exists");
            order.status = OrderStatus::Filled;
            order.filled_tokens = tokens;
            order.avg_price = Some(avg);
            if provide_refs {
                order.tx_ref = Some(format!("0xfill-{order_id}"));
            }
        }

        let order = &state.orders[order_id];
        Ok(OrderReport {
            order_id: order_id.to_string(),
            status: order.status,
            filled_tokens: order.filled_tokens,
            avg_price: order.avg_price,
        })
    }

    async fn fill_tx_ref(&self, order_id: &str) -> Result<Option<String>, ExchangeError> {
        let state = self.state.lock().unwrap();
        let order = state
            .orders
            .get(order_id)
            .ok_or_else(|| ExchangeError::UnknownOrder {
                order_id: order_id.to_string(),
            })?;
        Ok(order.tx_ref.clone())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        let mut state = self.state.lock().unwrap();
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| ExchangeError::UnknownOrder {
                order_id: order_id.to_string(),
            })?;
        if !order.status.is_terminal() {
            order.status = OrderStatus::Canceled;
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockVenue {
    async fn transaction_receipt(&self, tx_ref: &str) -> Result<Option<TxReceipt>, ExchangeError> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(state.receipts.get(tx_ref).cloned())
    }

    async fn onchain_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        let state = self.state.lock().unwrap();
        Ok(state.balances.get(asset).copied().unwrap_or(Decimal::ZERO))
    }
}

#[async_trait]
impl Relayer for MockVenue {
    async fn submit_relayed_tx(&self, txn: &ClaimTx) -> Result<RelaySubmission, ExchangeError> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = &state.relay_fail_reason {
            return Err(ExchangeError::RelayerFailure(reason.clone()));
        }
        let request_id = format!("relay-{}", txn.condition_id);
        let polls = state.relay_confirm_after;
        state.relay_requests.insert(request_id.clone(), polls);
        Ok(RelaySubmission {
            request_id,
            tx_ref: None,
        })
    }

    async fn relay_status(&self, request_id: &str) -> Result<RelayState, ExchangeError> {
        self.relay_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let remaining =
            state
                .relay_requests
                .get_mut(request_id)
                .ok_or_else(|| ExchangeError::RelayerFailure(format!(
                    "unknown request {request_id}"
                )))?;
        if *remaining > 1 {
            *remaining -= 1;
            Ok(RelayState::Pending)
        } else {
            Ok(RelayState::Confirmed {
                tx_ref: format!("0xclaim-{request_id}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ticket(asset: &str, notional: Decimal) -> OrderTicket {
        OrderTicket {
            asset: asset.to_string(),
            notional,
            limit_price: dec!(0.60),
        }
    }

    #[tokio::test]
    async fn immediate_fill_consumes_the_book() {
        let venue = MockVenue::new();
        venue.set_book(
            "up",
            vec![
                PriceLevel::new(dec!(0.50), dec!(30)),
                PriceLevel::new(dec!(0.52), dec!(40)),
            ],
        );

        let ack = venue.submit_order(&ticket("up", dec!(50))).await.unwrap();
        assert!(ack.status.is_filled());

        let report = venue.order_status(&ack.order_id).await.unwrap();
        assert_eq!(report.avg_price.unwrap().round_dp(3), dec!(0.508));

        // The book lost the consumed depth.
        let book = venue.order_book("up").await.unwrap();
        assert_eq!(book.total_notional(), dec!(20));
    }

    #[tokio::test]
    async fn top_of_book_reads_both_best_asks() {
        let venue = MockVenue::new();
        venue.set_book(
            "up",
            vec![
                PriceLevel::new(dec!(0.56), dec!(40)),
                PriceLevel::new(dec!(0.55), dec!(30)),
            ],
        );
        venue.set_book("down", vec![PriceLevel::new(dec!(0.42), dec!(30))]);

        let prices = venue.top_of_book("up", "down").await.unwrap();
        assert_eq!(prices.up, dec!(0.55));
        assert_eq!(prices.down, dec!(0.42));

        let missing = venue.top_of_book("up", "other").await;
        assert!(matches!(
            missing,
            Err(ExchangeError::BookUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn deferred_fill_resolves_after_polls() {
        let venue = MockVenue::new();
        venue.set_book("up", vec![PriceLevel::new(dec!(0.50), dec!(100))]);
        venue.set_fill_behavior(FillBehavior::AfterPolls(2));

        let ack = venue.submit_order(&ticket("up", dec!(10))).await.unwrap();
        assert_eq!(ack.status, OrderStatus::Pending);

        let first = venue.order_status(&ack.order_id).await.unwrap();
        assert_eq!(first.status, OrderStatus::Pending);
        let second = venue.order_status(&ack.order_id).await.unwrap();
        assert!(second.status.is_filled());
        assert_eq!(second.filled_tokens, dec!(20));
    }

    #[tokio::test]
    async fn injected_transport_failures_are_consumed() {
        let venue = MockVenue::new();
        venue.set_book("up", vec![PriceLevel::new(dec!(0.50), dec!(100))]);
        venue.fail_next_submits(1);

        assert!(venue.submit_order(&ticket("up", dec!(10))).await.is_err());
        assert!(venue.submit_order(&ticket("up", dec!(10))).await.is_ok());
    }

    #[tokio::test]
    async fn relayer_confirms_after_scripted_polls() {
        let venue = MockVenue::new();
        venue.set_relay_confirm_after(2);
        let submission = venue
            .submit_relayed_tx(&ClaimTx {
                condition_id: "cond-1".to_string(),
                payload: Vec::new(),
            })
            .await
            .unwrap();

        assert_eq!(
            venue.relay_status(&submission.request_id).await.unwrap(),
            RelayState::Pending
        );
        assert!(matches!(
            venue.relay_status(&submission.request_id).await.unwrap(),
            RelayState::Confirmed { .. }
        ));
    }
}
