//! Phased deployment engine for one trading window.
//!
//! Owns the window's [`CapitalPosition`] exclusively; every mutation happens
//! on the control-loop task that calls [`ArbitrageStateMachine::advance`].
//! Phases move forward only: WAITING until the entry criteria hold, INITIAL
//! to seed both sides with equal tokens, REBALANCE and RESERVE to shrink any
//! token imbalance, then LOCKED until the window resolves. Every confirmed
//! mutation is persisted durably before the next tick proceeds.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{classify, BotError, ErrorClass, ExecutionError, Result};
use crate::execution::{IcebergExecutor, IcebergReport};
use crate::market::types::{Outcome, PricePair, TradingWindow};
use crate::metrics::{
    record_cumulative_profit, record_imbalance_ratio, METRIC_REBALANCE_BUYS,
    METRIC_WINDOWS_LOCKED, METRIC_WINDOWS_UNBALANCED, METRIC_WINDOWS_UNTRADED,
};
use crate::store::StateStore;

use super::position::{
    CapitalPosition, Phase, Pool, PoolBalances, Session, Trade,
};

/// Read-only view of the position after one tick.
#[derive(Debug, Clone, Serialize)]
pub struct PositionSnapshot {
    /// Current phase.
    pub phase: Phase,
    /// Tokens held on the up side.
    pub tokens_up: Decimal,
    /// Tokens held on the down side.
    pub tokens_down: Decimal,
    /// Token imbalance ratio.
    pub imbalance_ratio: Decimal,
    /// Remaining pool balances.
    pub pools: PoolBalances,
    /// Profit if the position resolved right now, balanced or not.
    pub guaranteed_profit: Decimal,
}

/// How a window ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResolutionStatus {
    /// Balanced position; payout independent of the winner.
    Locked {
        /// Guaranteed profit (payout minus total spend).
        profit: Decimal,
    },
    /// Directional exposure remained at resolution.
    Unbalanced {
        /// The winning outcome.
        winner: Outcome,
        /// Tokens held on the winning side (the realized payout).
        payout: Decimal,
        /// Payout minus total spend; may be negative.
        pnl: Decimal,
    },
    /// No fills ever confirmed for this window.
    Untraded {
        /// Why the window was skipped.
        reason: String,
    },
}

/// Final accounting for one resolved window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionSummary {
    /// The resolved window's id.
    pub window_id: String,
    /// How the window ended.
    pub status: ResolutionStatus,
    /// Cumulative profit after this window.
    pub cumulative_profit: Decimal,
    /// Whether the session halted on this resolution.
    pub halted: bool,
}

/// Drives one window's position through its phases.
pub struct ArbitrageStateMachine {
    window: TradingWindow,
    position: CapitalPosition,
    config: Arc<Config>,
    iceberg: IcebergExecutor,
    store: StateStore,
    /// Order ids abandoned by executors, kept for the reconciliation sweep.
    abandoned_order_ids: Vec<String>,
}

impl ArbitrageStateMachine {
    /// Resume the window's position from the store, or start fresh.
    ///
    /// A recovered position is rebuilt from its trade log; cached pool
    /// remainders are never trusted.
    pub async fn load_or_create(
        window: TradingWindow,
        config: Arc<Config>,
        iceberg: IcebergExecutor,
        store: StateStore,
    ) -> Result<Self> {
        let position = match store.load::<CapitalPosition>(&window.id()).await? {
            Some(mut recovered) => {
                info!(window_id = %window.id(), phase = %recovered.phase, "recovered position");
                recovered.recover();
                recovered
            }
            None => CapitalPosition::new(
                window.id(),
                window.symbol.clone(),
                PoolBalances {
                    initial: config.initial_pool_usd,
                    rebalance: config.rebalance_pool_usd,
                    reserve: config.reserve_pool_usd,
                },
            ),
        };

        Ok(Self {
            window,
            position,
            config,
            iceberg,
            store,
            abandoned_order_ids: Vec::new(),
        })
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.position.phase
    }

    /// The position as it stands.
    pub fn position(&self) -> &CapitalPosition {
        &self.position
    }

    /// Order ids abandoned so far, for post-window reconciliation.
    pub fn abandoned_order_ids(&self) -> &[String] {
        &self.abandoned_order_ids
    }

    /// Run one control-loop tick against fresh top-of-book prices.
    ///
    /// Returns after any confirmed mutation is durably persisted.
    #[instrument(skip(self, prices), fields(window_id = %self.window.id(), phase = %self.position.phase))]
    pub async fn advance(
        &mut self,
        prices: PricePair,
        time_left: Duration,
    ) -> Result<PositionSnapshot> {
        let mutated = match self.position.phase {
            Phase::Waiting => self.tick_waiting(prices, time_left).await?,
            Phase::Initial => self.tick_initial(prices, time_left).await?,
            Phase::Rebalance => self.tick_rebalance(prices, time_left).await?,
            Phase::Reserve => self.tick_reserve(prices, time_left).await?,
            Phase::Locked | Phase::Resolved => false,
        };

        if mutated {
            self.persist().await?;
        }
        record_imbalance_ratio(self.position.imbalance_ratio());
        Ok(self.snapshot())
    }

    async fn tick_waiting(&mut self, prices: PricePair, time_left: Duration) -> Result<bool> {
        if time_left < Duration::from_secs(self.config.lock_cutoff_secs) {
            // Too late to build a balanced position; stay out.
            return Ok(false);
        }
        if !self.entry_criteria_met(prices) {
            debug!(up = %prices.up, down = %prices.down, "entry criteria not met");
            return Ok(false);
        }

        info!(up = %prices.up, down = %prices.down, "entry criteria met, deploying initial pool");
        self.position
            .advance_phase(Phase::Initial)
            .map_err(invalid_transition)?;
        // Persist the phase change first; a crash mid-INITIAL must recover
        // into a position that knows deployment started.
        self.persist().await?;
        self.tick_initial(prices, time_left).await?;
        Ok(true)
    }

    /// Seed both sides with equal token counts from the initial pool.
    ///
    /// Legs run sequentially, expensive side first: if anything fails
    /// mid-way the cheaper remainder is the easier one to top up later.
    async fn tick_initial(&mut self, prices: PricePair, time_left: Duration) -> Result<bool> {
        let sum = prices.sum();
        if sum <= Decimal::ZERO {
            return Ok(false);
        }
        let target_tokens = self.config.initial_pool_usd / sum;
        let deadline = self.deadline(time_left);

        let first = prices.higher_outcome();
        for outcome in [first, first.opposite()] {
            // On recovery into INITIAL, tokens already confirmed before the
            // crash count toward the target; only the shortfall is bought.
            let needed = (target_tokens - self.position.tokens(outcome)).max(Decimal::ZERO);
            let notional = (needed * prices.price(outcome))
                .min(self.position.pool_remaining(Pool::Initial));
            if notional <= Decimal::ZERO {
                continue;
            }
            self.buy(outcome, Pool::Initial, notional, deadline).await?;
        }

        self.position
            .advance_phase(Phase::Rebalance)
            .map_err(invalid_transition)?;
        Ok(true)
    }

    async fn tick_rebalance(&mut self, prices: PricePair, time_left: Duration) -> Result<bool> {
        if time_left <= Duration::from_secs(self.config.reserve_window_secs) {
            self.position
                .advance_phase(Phase::Reserve)
                .map_err(invalid_transition)?;
            self.tick_reserve(prices, time_left).await?;
            return Ok(true);
        }
        self.top_up(prices, Pool::Rebalance, time_left).await
    }

    async fn tick_reserve(&mut self, prices: PricePair, time_left: Duration) -> Result<bool> {
        if time_left < Duration::from_secs(self.config.lock_cutoff_secs)
            || self.position.is_balanced(self.config.imbalance_threshold)
        {
            return self.lock();
        }
        let mutated = self.top_up(prices, Pool::Reserve, time_left).await?;
        if self.position.is_balanced(self.config.imbalance_threshold) {
            self.lock()?;
            return Ok(true);
        }
        Ok(mutated)
    }

    fn lock(&mut self) -> Result<bool> {
        info!(
            window_id = %self.window.id(),
            payout = %self.position.guaranteed_payout(),
            profit = %self.position.profit(),
            "locking position"
        );
        self.position
            .advance_phase(Phase::Locked)
            .map_err(invalid_transition)?;
        Ok(true)
    }

    /// Buy the deficit side with one bounded step from the given pool.
    async fn top_up(
        &mut self,
        prices: PricePair,
        pool: Pool,
        time_left: Duration,
    ) -> Result<bool> {
        if self.position.is_balanced(self.config.imbalance_threshold) {
            return Ok(false);
        }
        let Some(deficit) = self.position.deficit_outcome() else {
            return Ok(false);
        };
        let price = prices.price(deficit);
        if price <= Decimal::ZERO {
            return Ok(false);
        }

        let notional = self
            .config
            .rebalance_step_usd
            .min(self.position.pool_remaining(pool))
            .min(self.position.cost_to_balance(price));
        if notional <= Decimal::ZERO {
            return Ok(false);
        }

        debug!(
            deficit = %deficit,
            pool = %pool,
            %notional,
            imbalance = %self.position.imbalance_ratio(),
            "topping up deficit side"
        );
        let filled = self
            .buy(deficit, pool, notional, self.deadline(time_left))
            .await?;
        if filled {
            counter!(METRIC_REBALANCE_BUYS).increment(1);
        }
        Ok(filled)
    }

    /// Execute one buy and book the confirmed fill into the position.
    ///
    /// Fatal exchange errors bubble; everything else degrades to "nothing
    /// filled this tick" and the next tick tries again.
    async fn buy(
        &mut self,
        outcome: Outcome,
        pool: Pool,
        notional: Decimal,
        deadline: Instant,
    ) -> Result<bool> {
        let asset = self.window.asset(outcome).to_string();
        let report = match self.iceberg.execute_buy(&asset, notional, deadline).await {
            Ok(report) => report,
            Err(ExecutionError::Exchange(e)) if classify(&e) == ErrorClass::Fatal => {
                return Err(BotError::Exchange(e));
            }
            Err(e) => {
                warn!(outcome = %outcome, error = %e, "buy failed, will retry next tick");
                return Ok(false);
            }
        };
        self.abandoned_order_ids
            .extend(report.abandoned_order_ids.iter().cloned());

        if !report.filled_any() {
            return Ok(false);
        }
        self.book_fill(outcome, pool, notional, &report)?;
        Ok(true)
    }

    fn book_fill(
        &mut self,
        outcome: Outcome,
        pool: Pool,
        requested: Decimal,
        report: &IcebergReport,
    ) -> Result<()> {
        let trade = Trade {
            outcome,
            pool,
            requested,
            spent: report.total_spent,
            tokens: report.total_tokens,
            price: report.avg_price(),
            kind: report.kind,
            slippage: report.avg_slippage,
            confirmed_at: OffsetDateTime::now_utc(),
        };
        self.position
            .apply_fill(trade)
            .map_err(|reason| BotError::Execution(ExecutionError::InvalidParams(reason)))
    }

    /// Settle the window against the winning outcome and update the session.
    #[instrument(skip(self, session), fields(window_id = %self.window.id(), winner = %winner))]
    pub async fn resolve(
        &mut self,
        winner: Outcome,
        session: &mut Session,
    ) -> Result<ResolutionSummary> {
        let balanced = self.position.is_balanced(self.config.imbalance_threshold);
        // The window is over; a balanced position locks on its way out so a
        // Locked status always corresponds to a locked phase.
        if balanced && self.position.has_fills() && self.position.phase < Phase::Locked {
            self.position
                .advance_phase(Phase::Locked)
                .map_err(invalid_transition)?;
        }

        let status = if !self.position.has_fills() {
            session.record_untraded();
            counter!(METRIC_WINDOWS_UNTRADED).increment(1);
            ResolutionStatus::Untraded {
                reason: "entry criteria never met".to_string(),
            }
        } else if self.position.phase >= Phase::Locked && balanced {
            let profit = self.position.profit();
            session.record_locked(profit);
            counter!(METRIC_WINDOWS_LOCKED).increment(1);
            ResolutionStatus::Locked { profit }
        } else {
            let payout = self.position.tokens(winner);
            let pnl = payout - self.position.total_spent();
            session.record_unbalanced(pnl, self.config.max_unbalanced_streak);
            counter!(METRIC_WINDOWS_UNBALANCED).increment(1);
            warn!(%payout, %pnl, "window resolved with directional exposure");
            ResolutionStatus::Unbalanced {
                winner,
                payout,
                pnl,
            }
        };

        if self.position.phase < Phase::Resolved {
            self.position
                .advance_phase(Phase::Resolved)
                .map_err(invalid_transition)?;
        }
        self.position.resolved_at = Some(OffsetDateTime::now_utc());
        self.persist().await?;
        self.store
            .save(&session_key(&self.window.symbol), session)
            .await?;
        record_cumulative_profit(session.cumulative_profit);

        Ok(ResolutionSummary {
            window_id: self.window.id(),
            status,
            cumulative_profit: session.cumulative_profit,
            halted: session.halted,
        })
    }

    /// Higher-priced side inside the acceptance band and a combined price
    /// below parity. Above parity there is no room for a guaranteed profit.
    fn entry_criteria_met(&self, prices: PricePair) -> bool {
        let higher = prices.price(prices.higher_outcome());
        higher >= self.config.entry_band_low
            && higher <= self.config.entry_band_high
            && prices.sum() < Decimal::ONE
    }

    /// Execution deadline for this tick: window close plus the grace period.
    fn deadline(&self, time_left: Duration) -> Instant {
        Instant::now() + time_left + Duration::from_secs(self.config.grace_period_secs)
    }

    async fn persist(&self) -> Result<()> {
        self.store.save(&self.window.id(), &self.position).await?;
        Ok(())
    }

    fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            phase: self.position.phase,
            tokens_up: self.position.tokens_up,
            tokens_down: self.position.tokens_down,
            imbalance_ratio: self.position.imbalance_ratio(),
            pools: self.position.pools,
            guaranteed_profit: self.position.profit(),
        }
    }
}

/// Durable key for a symbol's session counters.
pub fn session_key(symbol: &str) -> String {
    format!("session:{symbol}")
}

fn invalid_transition(reason: String) -> BotError {
    BotError::Execution(ExecutionError::InvalidParams(reason))
}
