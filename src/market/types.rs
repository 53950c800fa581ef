//! Core market types for short binary-outcome trading windows.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

/// One of the two outcomes of a binary window.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The "up"/YES side.
    #[strum(serialize = "up", serialize = "yes", serialize = "UP", serialize = "YES")]
    #[default]
    Up,
    /// The "down"/NO side.
    #[strum(serialize = "down", serialize = "no", serialize = "DOWN", serialize = "NO")]
    Down,
}

impl Outcome {
    /// Get the opposite outcome.
    pub fn opposite(&self) -> Self {
        match self {
            Outcome::Up => Outcome::Down,
            Outcome::Down => Outcome::Up,
        }
    }
}

/// Top-of-book prices for both outcomes at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePair {
    /// Best ask for the up outcome.
    pub up: Decimal,
    /// Best ask for the down outcome.
    pub down: Decimal,
}

impl PricePair {
    /// Create a new price pair.
    pub fn new(up: Decimal, down: Decimal) -> Self {
        Self { up, down }
    }

    /// Combined cost of one share of each side.
    pub fn sum(&self) -> Decimal {
        self.up + self.down
    }

    /// Price for a given outcome.
    pub fn price(&self, outcome: Outcome) -> Decimal {
        match outcome {
            Outcome::Up => self.up,
            Outcome::Down => self.down,
        }
    }

    /// The outcome currently priced higher (up wins ties).
    pub fn higher_outcome(&self) -> Outcome {
        if self.down > self.up {
            Outcome::Down
        } else {
            Outcome::Up
        }
    }
}

/// One fixed-duration binary market instance.
///
/// Immutable once created; supplied by the external scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingWindow {
    /// Traded symbol (e.g. "btc-15m").
    pub symbol: String,
    /// When the window opened.
    #[serde(with = "time::serde::rfc3339")]
    pub open_at: OffsetDateTime,
    /// When the window closes and prices lock.
    #[serde(with = "time::serde::rfc3339")]
    pub close_at: OffsetDateTime,
    /// Seconds after close during which executors may still retry.
    pub grace_secs: u64,
    /// Asset identifier for the up outcome.
    pub up_asset: String,
    /// Asset identifier for the down outcome.
    pub down_asset: String,
    /// Settlement condition identifier for redemption.
    pub condition_id: String,
}

impl TradingWindow {
    /// Stable key for persistence, one per window.
    pub fn id(&self) -> String {
        format!("{}:{}", self.symbol, self.open_at.unix_timestamp())
    }

    /// Asset identifier for a given outcome.
    pub fn asset(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Up => &self.up_asset,
            Outcome::Down => &self.down_asset,
        }
    }

    /// Check if the window has closed.
    pub fn is_closed(&self) -> bool {
        OffsetDateTime::now_utc() >= self.close_at
    }

    /// Remaining time until close, zero once closed.
    pub fn time_remaining(&self) -> std::time::Duration {
        let remaining = self.close_at - OffsetDateTime::now_utc();
        if remaining.is_positive() {
            std::time::Duration::from_secs_f64(remaining.as_seconds_f64())
        } else {
            std::time::Duration::ZERO
        }
    }

    /// End of the grace period after official close.
    pub fn grace_end(&self) -> OffsetDateTime {
        self.close_at + time::Duration::seconds(self.grace_secs as i64)
    }
}
