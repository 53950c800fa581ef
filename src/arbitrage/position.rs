//! Capital position accounting for one trading window.
//!
//! A position is owned and mutated by exactly one state-machine instance.
//! The trade log is append-only; pool balances only ever decrease, and only
//! by confirmed spend. On crash recovery the balances are reconstructed from
//! the log rather than trusting cached remainders.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

use crate::market::Outcome;

/// Allocation phase of a position. Transitions are forward-only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    /// Observing prices, waiting for entry criteria.
    #[strum(serialize = "WAITING")]
    Waiting,
    /// Spending the initial pool across both outcomes.
    #[strum(serialize = "INITIAL")]
    Initial,
    /// Topping up the under-weighted side from the rebalance pool.
    #[strum(serialize = "REBALANCE")]
    Rebalance,
    /// Final rebalancing window using the reserve pool.
    #[strum(serialize = "RESERVE")]
    Reserve,
    /// Position committed; no further trading.
    #[strum(serialize = "LOCKED")]
    Locked,
    /// Window outcome known; counters updated.
    #[strum(serialize = "RESOLVED")]
    Resolved,
}

/// Which capital pool funded a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    /// The INITIAL-phase pool.
    Initial,
    /// The REBALANCE-phase pool.
    Rebalance,
    /// The RESERVE-phase pool.
    Reserve,
}

/// How a trade was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    /// Single order.
    Direct,
    /// Chunked iceberg execution.
    Iceberg,
}

/// One confirmed fill. Append-only; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Which outcome was bought.
    pub outcome: Outcome,
    /// Pool that funded the spend.
    pub pool: Pool,
    /// Notional requested.
    pub requested: Decimal,
    /// Notional actually spent (confirmed).
    pub spent: Decimal,
    /// Tokens received.
    pub tokens: Decimal,
    /// Realized average price.
    pub price: Decimal,
    /// Execution kind.
    pub kind: ExecutionKind,
    /// Realized slippage ratio.
    pub slippage: Decimal,
    /// When the fill was confirmed.
    #[serde(with = "time::serde::rfc3339")]
    pub confirmed_at: OffsetDateTime,
}

/// Remaining balances of the three pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolBalances {
    /// Initial pool remaining.
    pub initial: Decimal,
    /// Rebalance pool remaining.
    pub rebalance: Decimal,
    /// Reserve pool remaining.
    pub reserve: Decimal,
}

impl PoolBalances {
    fn get(&self, pool: Pool) -> Decimal {
        match pool {
            Pool::Initial => self.initial,
            Pool::Rebalance => self.rebalance,
            Pool::Reserve => self.reserve,
        }
    }

    fn get_mut(&mut self, pool: Pool) -> &mut Decimal {
        match pool {
            Pool::Initial => &mut self.initial,
            Pool::Rebalance => &mut self.rebalance,
            Pool::Reserve => &mut self.reserve,
        }
    }
}

/// Capital deployed into one window, with its trade log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalPosition {
    /// Owning window id.
    pub window_id: String,
    /// Traded symbol.
    pub symbol: String,
    /// Current phase.
    pub phase: Phase,
    /// Configured pool sizes at creation (never change).
    pub pool_sizes: PoolBalances,
    /// Remaining pool balances.
    pub pools: PoolBalances,
    /// Tokens held on the up side.
    pub tokens_up: Decimal,
    /// Tokens held on the down side.
    pub tokens_down: Decimal,
    /// Confirmed spend on the up side.
    pub spent_up: Decimal,
    /// Confirmed spend on the down side.
    pub spent_down: Decimal,
    /// Append-only trade log, in fill-confirmation order.
    pub trades: Vec<Trade>,
    /// When the position was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the window resolved, if it has.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub resolved_at: Option<OffsetDateTime>,
}

impl CapitalPosition {
    /// Create a fresh position with the configured pool sizes.
    pub fn new(window_id: String, symbol: String, pool_sizes: PoolBalances) -> Self {
        Self {
            window_id,
            symbol,
            phase: Phase::Waiting,
            pool_sizes,
            pools: pool_sizes,
            tokens_up: Decimal::ZERO,
            tokens_down: Decimal::ZERO,
            spent_up: Decimal::ZERO,
            spent_down: Decimal::ZERO,
            trades: Vec::new(),
            created_at: OffsetDateTime::now_utc(),
            resolved_at: None,
        }
    }

    /// Remaining balance of a pool.
    pub fn pool_remaining(&self, pool: Pool) -> Decimal {
        self.pools.get(pool)
    }

    /// Record a confirmed fill, decrementing the funding pool.
    ///
    /// Pools are only ever decremented by confirmed spend, never by
    /// submitted-but-unconfirmed amounts.
    pub fn apply_fill(&mut self, trade: Trade) -> Result<(), String> {
        if trade.spent < Decimal::ZERO || trade.tokens < Decimal::ZERO {
            return Err("negative fill amounts".to_string());
        }
        let balance = self.pools.get_mut(trade.pool);
        if trade.spent > *balance {
            return Err(format!(
                "pool {} has {} remaining, fill spent {}",
                trade.pool, balance, trade.spent
            ));
        }
        *balance -= trade.spent;

        match trade.outcome {
            Outcome::Up => {
                self.tokens_up += trade.tokens;
                self.spent_up += trade.spent;
            }
            Outcome::Down => {
                self.tokens_down += trade.tokens;
                self.spent_down += trade.spent;
            }
        }
        self.trades.push(trade);
        Ok(())
    }

    /// Advance to a later phase. Backward transitions are rejected.
    pub fn advance_phase(&mut self, next: Phase) -> Result<(), String> {
        if next <= self.phase {
            return Err(format!("cannot move from {} back to {}", self.phase, next));
        }
        self.phase = next;
        Ok(())
    }

    /// Tokens held on a side.
    pub fn tokens(&self, outcome: Outcome) -> Decimal {
        match outcome {
            Outcome::Up => self.tokens_up,
            Outcome::Down => self.tokens_down,
        }
    }

    /// Payout independent of which outcome wins.
    pub fn guaranteed_payout(&self) -> Decimal {
        self.tokens_up.min(self.tokens_down)
    }

    /// Total confirmed spend across both sides.
    pub fn total_spent(&self) -> Decimal {
        self.spent_up + self.spent_down
    }

    /// Guaranteed profit: payout minus everything spent.
    pub fn profit(&self) -> Decimal {
        self.guaranteed_payout() - self.total_spent()
    }

    /// Token imbalance relative to the larger side; zero when flat or empty.
    pub fn imbalance_ratio(&self) -> Decimal {
        let larger = self.tokens_up.max(self.tokens_down);
        if larger.is_zero() {
            return Decimal::ZERO;
        }
        (self.tokens_up - self.tokens_down).abs() / larger
    }

    /// The under-weighted side, if any.
    pub fn deficit_outcome(&self) -> Option<Outcome> {
        if self.tokens_up < self.tokens_down {
            Some(Outcome::Up)
        } else if self.tokens_down < self.tokens_up {
            Some(Outcome::Down)
        } else {
            None
        }
    }

    /// Notional needed to fully even the sides at the given price.
    pub fn cost_to_balance(&self, deficit_price: Decimal) -> Decimal {
        (self.tokens_up - self.tokens_down).abs() * deficit_price
    }

    /// Whether the imbalance is within the threshold.
    pub fn is_balanced(&self, threshold: Decimal) -> bool {
        self.imbalance_ratio() <= threshold
    }

    /// Whether any side was ever bought.
    pub fn has_fills(&self) -> bool {
        !self.trades.is_empty()
    }

    /// Reconstruct pools, tokens, and spend from the trade log.
    ///
    /// Used on crash-recovery reload: the log is authoritative; cached
    /// remainders are discarded.
    pub fn recover(&mut self) {
        self.pools = self.pool_sizes;
        self.tokens_up = Decimal::ZERO;
        self.tokens_down = Decimal::ZERO;
        self.spent_up = Decimal::ZERO;
        self.spent_down = Decimal::ZERO;
        for trade in &self.trades {
            *self.pools.get_mut(trade.pool) -= trade.spent;
            match trade.outcome {
                Outcome::Up => {
                    self.tokens_up += trade.tokens;
                    self.spent_up += trade.spent;
                }
                Outcome::Down => {
                    self.tokens_down += trade.tokens;
                    self.spent_down += trade.spent;
                }
            }
        }
    }
}

/// Cumulative per-symbol counters used to decide when to stop trading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Traded symbol.
    pub symbol: String,
    /// Windows resolved so far.
    pub windows: u32,
    /// Windows that locked a guaranteed profit.
    pub locked_wins: u32,
    /// Windows resolved with directional exposure.
    pub unbalanced: u32,
    /// Windows skipped without a trade.
    pub untraded: u32,
    /// Cumulative realized profit.
    pub cumulative_profit: Decimal,
    /// Consecutive unbalanced resolutions.
    pub unbalanced_streak: u32,
    /// Whether trading on this symbol should stop.
    pub halted: bool,
}

impl Session {
    /// Fresh session for a symbol.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            windows: 0,
            locked_wins: 0,
            unbalanced: 0,
            untraded: 0,
            cumulative_profit: Decimal::ZERO,
            unbalanced_streak: 0,
            halted: false,
        }
    }

    /// Record a locked window with the given profit.
    pub fn record_locked(&mut self, profit: Decimal) {
        self.windows += 1;
        self.locked_wins += 1;
        self.cumulative_profit += profit;
        self.unbalanced_streak = 0;
    }

    /// Record an unbalanced window with its realized result.
    pub fn record_unbalanced(&mut self, pnl: Decimal, max_streak: u32) {
        self.windows += 1;
        self.unbalanced += 1;
        self.cumulative_profit += pnl;
        self.unbalanced_streak += 1;
        if self.unbalanced_streak >= max_streak {
            self.halted = true;
        }
    }

    /// Record a window we never entered.
    pub fn record_untraded(&mut self) {
        self.windows += 1;
        self.untraded += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn pools() -> PoolBalances {
        PoolBalances {
            initial: dec!(100),
            rebalance: dec!(50),
            reserve: dec!(25),
        }
    }

    fn fill(outcome: Outcome, pool: Pool, spent: Decimal, tokens: Decimal) -> Trade {
        Trade {
            outcome,
            pool,
            requested: spent,
            spent,
            tokens,
            price: if tokens.is_zero() { Decimal::ZERO } else { spent / tokens },
            kind: ExecutionKind::Direct,
            slippage: Decimal::ZERO,
            confirmed_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn apply_fill_decrements_only_confirmed_spend() {
        let mut position = CapitalPosition::new("w:1".into(), "btc-15m".into(), pools());
        position
            .apply_fill(fill(Outcome::Up, Pool::Initial, dec!(56.70), dec!(103.09)))
            .unwrap();

        assert_eq!(position.pool_remaining(Pool::Initial), dec!(43.30));
        assert_eq!(position.tokens_up, dec!(103.09));
        assert_eq!(position.spent_up, dec!(56.70));
        // Other pools untouched.
        assert_eq!(position.pool_remaining(Pool::Rebalance), dec!(50));
    }

    #[test]
    fn apply_fill_rejects_overdraw() {
        let mut position = CapitalPosition::new("w:1".into(), "btc-15m".into(), pools());
        let result = position.apply_fill(fill(Outcome::Up, Pool::Reserve, dec!(26), dec!(40)));
        assert!(result.is_err());
        // Nothing changed on rejection.
        assert_eq!(position.pool_remaining(Pool::Reserve), dec!(25));
        assert!(position.trades.is_empty());
    }

    #[test]
    fn pools_are_monotonically_non_increasing() {
        let mut position = CapitalPosition::new("w:1".into(), "btc-15m".into(), pools());
        let mut last = position.pool_remaining(Pool::Initial);
        for _ in 0..10 {
            position
                .apply_fill(fill(Outcome::Up, Pool::Initial, dec!(9), dec!(18)))
                .unwrap();
            let now = position.pool_remaining(Pool::Initial);
            assert!(now <= last && now >= Decimal::ZERO);
            last = now;
        }
    }

    #[test]
    fn guaranteed_payout_and_profit() {
        let mut position = CapitalPosition::new("w:1".into(), "btc-15m".into(), pools());
        position
            .apply_fill(fill(Outcome::Up, Pool::Initial, dec!(56.70), dec!(103.09)))
            .unwrap();
        position
            .apply_fill(fill(Outcome::Down, Pool::Initial, dec!(43.30), dec!(103.09)))
            .unwrap();

        assert_eq!(position.guaranteed_payout(), dec!(103.09));
        assert_eq!(position.profit(), dec!(3.09));
    }

    #[test]
    fn imbalance_ratio_relative_to_larger_side() {
        let mut position = CapitalPosition::new("w:1".into(), "btc-15m".into(), pools());
        position
            .apply_fill(fill(Outcome::Up, Pool::Initial, dec!(30), dec!(60)))
            .unwrap();
        position
            .apply_fill(fill(Outcome::Down, Pool::Initial, dec!(20), dec!(40)))
            .unwrap();

        // |60 - 40| / 60 = 33.3%
        assert_eq!(position.imbalance_ratio().round_dp(3), dec!(0.333));
        assert_eq!(position.deficit_outcome(), Some(Outcome::Down));
        assert!(!position.is_balanced(dec!(0.05)));
        assert_eq!(position.cost_to_balance(dec!(0.50)), dec!(10));
    }

    #[test]
    fn phase_transitions_are_forward_only() {
        let mut position = CapitalPosition::new("w:1".into(), "btc-15m".into(), pools());
        position.advance_phase(Phase::Initial).unwrap();
        position.advance_phase(Phase::Rebalance).unwrap();
        assert!(position.advance_phase(Phase::Initial).is_err());
        assert!(position.advance_phase(Phase::Rebalance).is_err());
        position.advance_phase(Phase::Locked).unwrap();
    }

    #[test]
    fn recover_rebuilds_from_trade_log() {
        let mut position = CapitalPosition::new("w:1".into(), "btc-15m".into(), pools());
        position
            .apply_fill(fill(Outcome::Up, Pool::Initial, dec!(40), dec!(80)))
            .unwrap();
        position
            .apply_fill(fill(Outcome::Down, Pool::Rebalance, dec!(10), dec!(22)))
            .unwrap();

        // Corrupt the cached remainders, as a stale snapshot might.
        position.pools.initial = dec!(999);
        position.tokens_up = dec!(0);

        position.recover();
        assert_eq!(position.pool_remaining(Pool::Initial), dec!(60));
        assert_eq!(position.pool_remaining(Pool::Rebalance), dec!(40));
        assert_eq!(position.tokens_up, dec!(80));
        assert_eq!(position.tokens_down, dec!(22));
        assert_eq!(position.total_spent(), dec!(50));
    }

    #[test]
    fn position_serde_round_trip() {
        let mut position = CapitalPosition::new("w:1".into(), "btc-15m".into(), pools());
        position
            .apply_fill(fill(Outcome::Up, Pool::Initial, dec!(40), dec!(80)))
            .unwrap();

        let json = serde_json::to_string(&position).unwrap();
        let restored: CapitalPosition = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.tokens_up, dec!(80));
        assert_eq!(restored.phase, Phase::Waiting);
        assert_eq!(restored.trades.len(), 1);
    }

    #[test]
    fn session_halts_after_unbalanced_streak() {
        let mut session = Session::new("btc-15m");
        session.record_locked(dec!(3));
        session.record_unbalanced(dec!(-5), 2);
        assert!(!session.halted);
        session.record_unbalanced(dec!(-4), 2);
        assert!(session.halted);
        assert_eq!(session.windows, 3);
        assert_eq!(session.cumulative_profit, dec!(-6));
    }
}
