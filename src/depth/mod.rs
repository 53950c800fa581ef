//! Order book depth analysis.
//!
//! Estimates the achievable fill price and slippage for a target notional by
//! walking the ask ladder, and recommends a chunking scheme for orders too
//! large to submit in one piece.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::instrument;

/// Single price level: USD notional available at one price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceLevel {
    /// Price at this level.
    pub price: Decimal,
    /// USD notional available at this price.
    pub notional: Decimal,
}

impl PriceLevel {
    /// Create a new price level.
    pub fn new(price: Decimal, notional: Decimal) -> Self {
        Self { price, notional }
    }
}

/// Transient snapshot of one outcome's ask ladder.
///
/// Recomputed on demand, never persisted.
#[derive(Debug, Clone)]
pub struct OrderbookSnapshot {
    /// Asset this book belongs to.
    pub asset: String,
    /// Ask levels sorted by price ascending.
    pub asks: Vec<PriceLevel>,
    /// When the snapshot was taken.
    pub taken_at: OffsetDateTime,
}

impl OrderbookSnapshot {
    /// Create a snapshot, sorting levels best-first.
    pub fn new(asset: impl Into<String>, mut asks: Vec<PriceLevel>) -> Self {
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self {
            asset: asset.into(),
            asks,
            taken_at: OffsetDateTime::now_utc(),
        }
    }

    /// Best (lowest) ask price.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Notional available at the best level.
    pub fn top_level_notional(&self) -> Decimal {
        self.asks.first().map(|l| l.notional).unwrap_or(Decimal::ZERO)
    }

    /// Total notional across all levels.
    pub fn total_notional(&self) -> Decimal {
        self.asks.iter().map(|l| l.notional).sum()
    }
}

/// Result of analyzing a book against a target notional.
#[derive(Debug, Clone)]
pub struct DepthAnalysis {
    /// Best price at analysis time.
    pub best_price: Decimal,
    /// Expected average fill price for the target notional.
    pub expected_avg_price: Decimal,
    /// `(avg - best) / best`; above the limit when depth is unavailable.
    pub expected_slippage: Decimal,
    /// Notional fillable within the available levels.
    pub fillable_notional: Decimal,
    /// Tokens expected for the fillable notional.
    pub expected_tokens: Decimal,
    /// Target fully fillable AND slippage within the limit.
    pub has_adequate_depth: bool,
    /// Largest single-chunk notional the book safely supports.
    pub max_chunk_notional: Decimal,
    /// Recommended number of chunks for the target notional.
    pub recommended_chunks: u32,
}

impl DepthAnalysis {
    /// Conservative analysis for an unavailable or empty book.
    ///
    /// Unavailable depth must read as "unsafe", never as "safe by default".
    pub fn unavailable(max_slippage: Decimal) -> Self {
        Self {
            best_price: Decimal::ZERO,
            expected_avg_price: Decimal::ZERO,
            expected_slippage: max_slippage + Decimal::ONE,
            fillable_notional: Decimal::ZERO,
            expected_tokens: Decimal::ZERO,
            has_adequate_depth: false,
            max_chunk_notional: Decimal::ZERO,
            recommended_chunks: 0,
        }
    }
}

/// Analyze a book for a buy of `notional`, walking asks from the best level
/// outward.
///
/// `chunk_fraction` sizes the recommended chunk as a share of the top level.
#[instrument(skip(book), fields(asset = %book.asset, notional = %notional))]
pub fn analyze(
    book: &OrderbookSnapshot,
    notional: Decimal,
    max_slippage: Decimal,
    chunk_fraction: Decimal,
) -> DepthAnalysis {
    let Some(best_price) = book.best_ask() else {
        return DepthAnalysis::unavailable(max_slippage);
    };
    if notional <= Decimal::ZERO || best_price <= Decimal::ZERO {
        return DepthAnalysis::unavailable(max_slippage);
    }

    let mut remaining = notional;
    let mut spent = Decimal::ZERO;
    let mut tokens = Decimal::ZERO;

    for level in &book.asks {
        if remaining.is_zero() {
            break;
        }
        if level.price <= Decimal::ZERO {
            continue;
        }
        let take = remaining.min(level.notional);
        spent += take;
        tokens += take / level.price;
        remaining -= take;
    }

    let fillable = notional - remaining;
    let (avg_price, slippage) = if tokens > Decimal::ZERO {
        let avg = spent / tokens;
        (avg, (avg - best_price) / best_price)
    } else {
        (Decimal::ZERO, max_slippage + Decimal::ONE)
    };

    let fully_filled = remaining.is_zero();
    let max_chunk = book.top_level_notional() * chunk_fraction;
    let recommended_chunks = if max_chunk > Decimal::ZERO {
        (notional / max_chunk).ceil().to_u32().unwrap_or(u32::MAX)
    } else {
        0
    };

    DepthAnalysis {
        best_price,
        expected_avg_price: avg_price,
        expected_slippage: slippage,
        fillable_notional: fillable,
        expected_tokens: tokens,
        has_adequate_depth: fully_filled && slippage <= max_slippage,
        max_chunk_notional: max_chunk,
        recommended_chunks,
    }
}
