//! Window arbitrage engine entry point.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rust_decimal_macros::dec;
use time::OffsetDateTime;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use window_arb::arbitrage::{ArbitrageStateMachine, ResolutionStatus, Session};
use window_arb::config::Config;
use window_arb::depth::PriceLevel;
use window_arb::execution::{reconcile, IcebergExecutor, TradeExecutor};
use window_arb::market::client::{Exchange, MarketFeed};
use window_arb::market::mock::MockVenue;
use window_arb::market::types::{Outcome, TradingWindow};
use window_arb::metrics;
use window_arb::settlement::RedemptionService;
use window_arb::store::StateStore;

/// Both-sides arbitrage engine for short binary prediction-market windows.
#[derive(Parser, Debug)]
#[command(name = "window-arb")]
#[command(about = "Automated both-sides arbitrage for short binary-outcome windows")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check configuration validity.
    CheckConfig,

    /// Run paper windows against a scripted venue (default).
    Simulate {
        /// Number of consecutive windows to simulate.
        #[arg(short, long, default_value = "3")]
        windows: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("window_arb=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    metrics::init_metrics();

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config().await,
        Some(Command::Simulate { windows }) => cmd_simulate(windows).await,
        None => cmd_simulate(1).await,
    }
}

/// Check configuration validity.
async fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("WINDOW ARB - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!(
        "  Pools: initial ${} / rebalance ${} / reserve ${} (total ${})",
        config.initial_pool_usd,
        config.rebalance_pool_usd,
        config.reserve_pool_usd,
        config.total_budget()
    );
    println!(
        "  Entry Band: [{}, {}] on the higher-priced side",
        config.entry_band_low, config.entry_band_high
    );
    println!("  Imbalance Threshold: {}", config.imbalance_threshold);
    println!("  Max Slippage: {}", config.max_slippage);
    println!(
        "  Iceberg: threshold ${}, {} of top level per chunk, {}ms between chunks",
        config.chunk_threshold_usd, config.chunk_top_level_fraction, config.inter_chunk_delay_ms
    );
    println!(
        "  Timing: reserve window {}s, lock cutoff {}s, grace {}s",
        config.reserve_window_secs, config.lock_cutoff_secs, config.grace_period_secs
    );
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Run paper windows end to end over a scripted in-process venue.
async fn cmd_simulate(windows: u32) -> anyhow::Result<()> {
    let config = Arc::new(Config::load()?);
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let venue = MockVenue::new();
    let store = StateStore::in_memory(Duration::from_secs(config.cache_ttl_secs));
    let trade = TradeExecutor::new(
        Arc::new(venue.clone()),
        Arc::new(venue.clone()),
        Arc::clone(&config),
    );
    let iceberg = IcebergExecutor::new(Arc::new(venue.clone()), trade, Arc::clone(&config));
    let redemption = RedemptionService::new(
        Arc::new(venue.clone()),
        Arc::new(venue.clone()),
        store.clone(),
        Arc::clone(&config),
    );

    let mut session = Session::new("btc-15m");
    info!(windows, "starting simulation");

    for i in 0..windows {
        let window = TradingWindow {
            symbol: "btc-15m".to_string(),
            open_at: OffsetDateTime::now_utc() + time::Duration::minutes(15 * i as i64),
            close_at: OffsetDateTime::now_utc() + time::Duration::minutes(15 * (i as i64 + 1)),
            grace_secs: config.grace_period_secs,
            up_asset: format!("up-{i}"),
            down_asset: format!("down-{i}"),
            condition_id: format!("cond-{i}"),
        };

        venue.set_book(
            &window.up_asset,
            vec![
                PriceLevel::new(dec!(0.55), dec!(120)),
                PriceLevel::new(dec!(0.56), dec!(200)),
            ],
        );
        venue.set_book(
            &window.down_asset,
            vec![
                PriceLevel::new(dec!(0.42), dec!(120)),
                PriceLevel::new(dec!(0.43), dec!(200)),
            ],
        );

        let prices = venue
            .top_of_book(&window.up_asset, &window.down_asset)
            .await?;

        let mut machine = ArbitrageStateMachine::load_or_create(
            window.clone(),
            Arc::clone(&config),
            iceberg.clone(),
            store.clone(),
        )
        .await?;

        // Compressed window: one tick per simulated minute, then the final
        // seconds before lock.
        for secs_left in [840u64, 600, 360, 240, 150, 90, 20] {
            let snapshot = machine
                .advance(prices, Duration::from_secs(secs_left))
                .await?;
            info!(
                window = i,
                secs_left,
                phase = %snapshot.phase,
                tokens_up = %snapshot.tokens_up,
                tokens_down = %snapshot.tokens_down,
                imbalance = %snapshot.imbalance_ratio,
                "tick"
            );
        }

        let winner = if i % 2 == 0 { Outcome::Up } else { Outcome::Down };
        let summary = machine.resolve(winner, &mut session).await?;
        match &summary.status {
            ResolutionStatus::Locked { profit } => {
                info!(window = i, %profit, "window locked a guaranteed profit");
            }
            ResolutionStatus::Unbalanced { winner, payout, pnl } => {
                warn!(window = i, %winner, %payout, %pnl, "window resolved unbalanced");
            }
            ResolutionStatus::Untraded { reason } => {
                info!(window = i, reason, "window skipped");
            }
        }

        venue.set_balance(window.asset(winner), machine.position().tokens(winner));
        let record = redemption.redeem(&window, winner).await?;
        info!(
            window = i,
            status = ?record.status,
            tx_ref = record.tx_ref.as_deref().unwrap_or("-"),
            "redemption finished"
        );

        let exchange: Arc<dyn Exchange> = Arc::new(venue.clone());
        let phantoms = reconcile::sweep(&exchange, machine.abandoned_order_ids()).await;
        if !phantoms.is_empty() {
            warn!(window = i, count = phantoms.len(), "phantom fills found");
        }

        if summary.halted {
            warn!(window = i, "session halted, stopping");
            break;
        }
    }

    println!("======================================================================");
    println!("SIMULATION SUMMARY");
    println!("======================================================================");
    println!("  Windows:            {}", session.windows);
    println!("  Locked wins:        {}", session.locked_wins);
    println!("  Unbalanced:         {}", session.unbalanced);
    println!("  Untraded:           {}", session.untraded);
    println!("  Cumulative profit:  ${}", session.cumulative_profit);
    println!("======================================================================");

    Ok(())
}
