//! End-to-end window lifecycle tests over the scripted mock venue.
//!
//! Each test drives the public API the way the binary does: build the
//! executors, tick the state machine through a compressed window, resolve,
//! and redeem. No network access is required.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use time::macros::datetime;

use window_arb::arbitrage::{ArbitrageStateMachine, Phase, ResolutionStatus, Session};
use window_arb::config::Config;
use window_arb::depth::PriceLevel;
use window_arb::execution::{reconcile, IcebergExecutor, TradeExecutor};
use window_arb::market::client::Exchange;
use window_arb::market::mock::{FillBehavior, MockVenue};
use window_arb::market::types::{Outcome, PricePair, TradingWindow};
use window_arb::settlement::{RedemptionService, RedemptionStatus};
use window_arb::store::StateStore;

fn test_config() -> Arc<Config> {
    Arc::new(Config {
        status_poll_ms: 10,
        receipt_poll_ms: 10,
        tx_ref_recovery_ms: 20,
        confirm_timeout_secs: 1,
        inter_chunk_delay_ms: 20,
        grace_period_secs: 1,
        ..Config::default()
    })
}

fn test_window(condition_id: &str) -> TradingWindow {
    TradingWindow {
        symbol: "btc-15m".to_string(),
        open_at: datetime!(2025-01-01 00:00 UTC),
        close_at: datetime!(2025-01-01 00:15 UTC),
        grace_secs: 1,
        up_asset: "up".to_string(),
        down_asset: "down".to_string(),
        condition_id: condition_id.to_string(),
    }
}

fn iceberg(venue: &MockVenue, config: &Arc<Config>) -> IcebergExecutor {
    let trade = TradeExecutor::new(
        Arc::new(venue.clone()),
        Arc::new(venue.clone()),
        Arc::clone(config),
    );
    IcebergExecutor::new(Arc::new(venue.clone()), trade, Arc::clone(config))
}

fn deep_books(venue: &MockVenue) {
    venue.set_book(
        "up",
        vec![
            PriceLevel::new(dec!(0.55), dec!(120)),
            PriceLevel::new(dec!(0.56), dec!(200)),
        ],
    );
    venue.set_book(
        "down",
        vec![
            PriceLevel::new(dec!(0.42), dec!(120)),
            PriceLevel::new(dec!(0.43), dec!(200)),
        ],
    );
}

#[tokio::test(start_paused = true)]
async fn full_window_locks_profit_and_redeems() {
    let venue = MockVenue::new();
    deep_books(&venue);
    let config = test_config();
    let store = StateStore::in_memory(Duration::from_secs(60));

    let mut machine = ArbitrageStateMachine::load_or_create(
        test_window("cond-full"),
        Arc::clone(&config),
        iceberg(&venue, &config),
        store.clone(),
    )
    .await
    .unwrap();

    let prices = PricePair::new(dec!(0.55), dec!(0.42));
    for secs_left in [840u64, 600, 360, 150, 90, 20] {
        machine
            .advance(prices, Duration::from_secs(secs_left))
            .await
            .unwrap();
    }
    assert_eq!(machine.phase(), Phase::Locked);

    let position = machine.position();
    assert_eq!(
        position.tokens_up.round_dp(4),
        position.tokens_down.round_dp(4)
    );
    assert!(position.profit() > Decimal::ZERO);

    let mut session = Session::new("btc-15m");
    let summary = machine.resolve(Outcome::Down, &mut session).await.unwrap();
    let profit = match summary.status {
        ResolutionStatus::Locked { profit } => profit,
        other => panic!("expected locked resolution, got {other:?}"),
    };
    assert!(profit > Decimal::ZERO);
    assert_eq!(session.cumulative_profit, profit);

    // Redeem the winning side.
    let window = test_window("cond-full");
    venue.set_balance("down", machine.position().tokens_down);
    let redemption = RedemptionService::new(
        Arc::new(venue.clone()),
        Arc::new(venue.clone()),
        store,
        config,
    );
    let record = redemption.redeem(&window, Outcome::Down).await.unwrap();
    assert_eq!(record.status, RedemptionStatus::Confirmed);
    assert_eq!(record.amount, machine.position().tokens_down);
}

#[tokio::test(start_paused = true)]
async fn thin_liquidity_window_resolves_unbalanced_and_counts_the_streak() {
    let venue = MockVenue::new();
    venue.set_book("up", vec![PriceLevel::new(dec!(0.55), dec!(500))]);
    // Barely any depth on the down side, for the whole window.
    venue.set_book("down", vec![PriceLevel::new(dec!(0.42), dec!(8))]);
    let config = test_config();
    let store = StateStore::in_memory(Duration::from_secs(60));

    let mut session = Session::new("btc-15m");
    let prices = PricePair::new(dec!(0.55), dec!(0.42));

    for n in 0..config.max_unbalanced_streak {
        // Distinct open times give each window its own persistence key.
        let mut window = test_window(&format!("cond-thin-{n}"));
        window.open_at += time::Duration::minutes(15 * n as i64);
        window.close_at += time::Duration::minutes(15 * n as i64);

        let mut machine = ArbitrageStateMachine::load_or_create(
            window,
            Arc::clone(&config),
            iceberg(&venue, &config),
            store.clone(),
        )
        .await
        .unwrap();
        machine
            .advance(prices, Duration::from_secs(600))
            .await
            .unwrap();
        let summary = machine.resolve(Outcome::Up, &mut session).await.unwrap();
        assert!(matches!(
            summary.status,
            ResolutionStatus::Unbalanced { .. }
        ));
    }

    assert!(session.halted);
    assert_eq!(session.unbalanced, config.max_unbalanced_streak);
}

#[tokio::test(start_paused = true)]
async fn deferred_fills_still_land_within_the_window() {
    let venue = MockVenue::new();
    deep_books(&venue);
    venue.set_fill_behavior(FillBehavior::AfterPolls(2));
    let config = test_config();
    let store = StateStore::in_memory(Duration::from_secs(60));

    let mut machine = ArbitrageStateMachine::load_or_create(
        test_window("cond-slow"),
        Arc::clone(&config),
        iceberg(&venue, &config),
        store,
    )
    .await
    .unwrap();

    let prices = PricePair::new(dec!(0.55), dec!(0.42));
    let snapshot = machine
        .advance(prices, Duration::from_secs(600))
        .await
        .unwrap();

    assert_eq!(snapshot.phase, Phase::Rebalance);
    assert!(snapshot.tokens_up > Decimal::ZERO);
    assert!(snapshot.tokens_down > Decimal::ZERO);
}

#[tokio::test(start_paused = true)]
async fn crash_between_ticks_recovers_the_position_from_the_store() {
    let venue = MockVenue::new();
    deep_books(&venue);
    let config = test_config();
    let store = StateStore::in_memory(Duration::from_secs(60));

    let prices = PricePair::new(dec!(0.55), dec!(0.42));
    let spent_before;
    {
        let mut machine = ArbitrageStateMachine::load_or_create(
            test_window("cond-crash"),
            Arc::clone(&config),
            iceberg(&venue, &config),
            store.clone(),
        )
        .await
        .unwrap();
        machine
            .advance(prices, Duration::from_secs(600))
            .await
            .unwrap();
        spent_before = machine.position().total_spent();
        // Machine dropped here, as a crash would.
    }

    let mut machine = ArbitrageStateMachine::load_or_create(
        test_window("cond-crash"),
        Arc::clone(&config),
        iceberg(&venue, &config),
        store,
    )
    .await
    .unwrap();
    assert_eq!(machine.phase(), Phase::Rebalance);
    assert_eq!(machine.position().total_spent(), spent_before);

    // The recovered machine finishes the window normally.
    machine
        .advance(prices, Duration::from_secs(20))
        .await
        .unwrap();
    assert_eq!(machine.phase(), Phase::Locked);
}

#[tokio::test(start_paused = true)]
async fn abandoned_orders_are_swept_after_the_window() {
    let venue = MockVenue::new();
    deep_books(&venue);
    venue.set_fill_behavior(FillBehavior::NeverFill);
    let config = test_config();
    let store = StateStore::in_memory(Duration::from_secs(60));

    let mut machine = ArbitrageStateMachine::load_or_create(
        test_window("cond-ghost"),
        Arc::clone(&config),
        iceberg(&venue, &config),
        store,
    )
    .await
    .unwrap();

    // Short window: entry happens, but no order ever fills before the
    // execution deadline, so the executor abandons them.
    let prices = PricePair::new(dec!(0.55), dec!(0.42));
    machine
        .advance(prices, Duration::from_secs(40))
        .await
        .unwrap();

    assert!(!machine.position().has_fills());
    assert!(!machine.abandoned_order_ids().is_empty());

    // Nothing ever filled, so any sweep hit would be a phantom.
    let exchange: Arc<dyn Exchange> = Arc::new(venue.clone());
    let phantoms = reconcile::sweep(&exchange, machine.abandoned_order_ids()).await;
    assert!(phantoms.is_empty());
}
