//! Anti-slippage iceberg execution.
//!
//! Large notionals are split into chunks sized from the depth analyzer's
//! recommendation. The book is re-analyzed before every chunk because it
//! moves between submissions; chunks are submitted sequentially with an
//! inter-chunk delay to reduce detectable market impact. Partial completion
//! is a normal, expected outcome when partial fills are allowed.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::arbitrage::position::ExecutionKind;
use crate::config::Config;
use crate::depth::{self, DepthAnalysis};
use crate::error::{ExchangeError, ExecutionError};
use crate::market::client::{MarketFeed, OrderTicket};
use crate::metrics::METRIC_CHUNKS_EXECUTED;

use super::trade::{TradeExecutor, TradeOutcome};

/// Aggregated result of an iceberg (or direct) buy.
#[derive(Debug, Clone)]
pub struct IcebergReport {
    /// Tokens received across all chunks.
    pub total_tokens: Decimal,
    /// Notional spent across all chunks.
    pub total_spent: Decimal,
    /// Size-weighted average realized slippage.
    pub avg_slippage: Decimal,
    /// Chunks the plan called for.
    pub chunks_planned: u32,
    /// Chunks that actually executed.
    pub chunks_executed: u32,
    /// How the buy was executed.
    pub kind: ExecutionKind,
    /// Order ids abandoned mid-run, for reconciliation.
    pub abandoned_order_ids: Vec<String>,
}

impl IcebergReport {
    /// Realized average price, zero if nothing filled.
    pub fn avg_price(&self) -> Decimal {
        if self.total_tokens.is_zero() {
            Decimal::ZERO
        } else {
            self.total_spent / self.total_tokens
        }
    }

    /// Whether anything filled at all.
    pub fn filled_any(&self) -> bool {
        self.total_tokens > Decimal::ZERO
    }
}

/// Executes a notional either directly or as a sequence of depth-checked
/// chunks.
#[derive(Clone)]
pub struct IcebergExecutor {
    feed: Arc<dyn MarketFeed>,
    trade: TradeExecutor,
    config: Arc<Config>,
}

impl IcebergExecutor {
    /// Build over the feed and a trade executor.
    pub fn new(feed: Arc<dyn MarketFeed>, trade: TradeExecutor, config: Arc<Config>) -> Self {
        Self { feed, trade, config }
    }

    /// Buy `notional` of `asset`, chunking when it exceeds the threshold.
    #[instrument(skip(self), fields(asset, notional = %notional))]
    pub async fn execute_buy(
        &self,
        asset: &str,
        notional: Decimal,
        deadline: Instant,
    ) -> Result<IcebergReport, ExecutionError> {
        if notional <= Decimal::ZERO {
            return Err(ExecutionError::InvalidParams(format!(
                "notional must be positive, got {notional}"
            )));
        }

        let analysis = self.analyze(asset, notional).await;
        if notional <= self.config.chunk_threshold_usd && analysis.has_adequate_depth {
            return self.direct_buy(asset, notional, &analysis, deadline).await;
        }

        self.chunked_buy(asset, notional, analysis, deadline).await
    }

    async fn analyze(&self, asset: &str, notional: Decimal) -> DepthAnalysis {
        match self.feed.order_book(asset).await {
            Ok(book) => depth::analyze(
                &book,
                notional,
                self.config.max_slippage,
                self.config.chunk_top_level_fraction,
            ),
            Err(e) => {
                // Unavailable depth is unsafe, never safe by default.
                warn!(asset, error = %e, "order book unavailable");
                DepthAnalysis::unavailable(self.config.max_slippage)
            }
        }
    }

    async fn direct_buy(
        &self,
        asset: &str,
        notional: Decimal,
        analysis: &DepthAnalysis,
        deadline: Instant,
    ) -> Result<IcebergReport, ExecutionError> {
        let ticket = self.ticket(asset, notional, analysis);
        match self.trade.execute(&ticket, deadline).await {
            TradeOutcome::Filled(fill) => {
                let slippage = realized_slippage(fill.avg_price, analysis.best_price);
                Ok(IcebergReport {
                    total_tokens: fill.tokens,
                    total_spent: fill.spent,
                    avg_slippage: slippage,
                    chunks_planned: 1,
                    chunks_executed: 1,
                    kind: ExecutionKind::Direct,
                    abandoned_order_ids: Vec::new(),
                })
            }
            TradeOutcome::Failed { reason, fatal } => {
                if fatal {
                    Err(ExecutionError::Exchange(ExchangeError::Transport(reason)))
                } else {
                    Ok(empty_report(ExecutionKind::Direct, 1))
                }
            }
            TradeOutcome::Abandoned { pending_order_ids } => {
                let mut report = empty_report(ExecutionKind::Direct, 1);
                report.abandoned_order_ids = pending_order_ids;
                Ok(report)
            }
        }
    }

    async fn chunked_buy(
        &self,
        asset: &str,
        notional: Decimal,
        initial_analysis: DepthAnalysis,
        deadline: Instant,
    ) -> Result<IcebergReport, ExecutionError> {
        let chunk_size = if initial_analysis.max_chunk_notional > Decimal::ZERO {
            initial_analysis.max_chunk_notional.min(notional)
        } else {
            // No usable depth yet; plan conservatively off the threshold.
            self.config.chunk_threshold_usd.min(notional)
        };
        let planned = depth_ceil_div(notional, chunk_size);

        info!(
            asset,
            %notional,
            %chunk_size,
            planned,
            "starting iceberg execution"
        );

        let mut report = empty_report(ExecutionKind::Iceberg, planned);
        let mut remaining = notional;
        let mut weighted_slippage = Decimal::ZERO;

        while remaining > Decimal::ZERO && Instant::now() < deadline {
            let this_chunk = chunk_size.min(remaining);

            // The book moves between chunks; re-check before each one.
            let mut analysis = self.analyze(asset, this_chunk).await;
            if !analysis.has_adequate_depth {
                // Wait briefly and re-check once before giving up.
                tokio::time::sleep(Duration::from_millis(self.config.inter_chunk_delay_ms)).await;
                analysis = self.analyze(asset, this_chunk).await;
            }
            if !analysis.has_adequate_depth {
                if self.config.allow_partial_iceberg {
                    debug!(asset, executed = report.chunks_executed, "depth gone, stopping early");
                    break;
                }
                if analysis.fillable_notional < this_chunk {
                    return Err(ExecutionError::InsufficientDepth {
                        required: this_chunk,
                        available: analysis.fillable_notional,
                    });
                }
                return Err(ExecutionError::SlippageExceeded {
                    projected: analysis.expected_slippage,
                    limit: self.config.max_slippage,
                });
            }

            let mut executed = false;
            for attempt in 0..self.config.chunk_max_retries {
                let ticket = self.ticket(asset, this_chunk, &analysis);
                match self.trade.execute(&ticket, deadline).await {
                    TradeOutcome::Filled(fill) => {
                        let slippage = realized_slippage(fill.avg_price, analysis.best_price);
                        weighted_slippage += slippage * fill.spent;
                        report.total_tokens += fill.tokens;
                        report.total_spent += fill.spent;
                        report.chunks_executed += 1;
                        remaining -= this_chunk;
                        counter!(METRIC_CHUNKS_EXECUTED).increment(1);
                        executed = true;
                        break;
                    }
                    TradeOutcome::Failed { reason, fatal } => {
                        if fatal {
                            return Err(ExecutionError::Exchange(ExchangeError::Transport(reason)));
                        }
                        debug!(asset, attempt, %reason, "chunk attempt failed");
                    }
                    TradeOutcome::Abandoned { pending_order_ids } => {
                        report.abandoned_order_ids.extend(pending_order_ids);
                    }
                }
            }

            if !executed {
                if self.config.allow_partial_iceberg {
                    break;
                }
                return Err(ExecutionError::DeadlineExceeded {
                    context: format!("iceberg chunk on {asset}"),
                });
            }

            if remaining > Decimal::ZERO {
                tokio::time::sleep(Duration::from_millis(self.config.inter_chunk_delay_ms)).await;
            }
        }

        report.avg_slippage = if report.total_spent.is_zero() {
            Decimal::ZERO
        } else {
            weighted_slippage / report.total_spent
        };

        info!(
            asset,
            executed = report.chunks_executed,
            planned = report.chunks_planned,
            tokens = %report.total_tokens,
            spent = %report.total_spent,
            "iceberg execution finished"
        );
        Ok(report)
    }

    /// Limit at the analyzed average plus the slippage budget, capped below 1.
    fn ticket(&self, asset: &str, notional: Decimal, analysis: &DepthAnalysis) -> OrderTicket {
        let base = if analysis.expected_avg_price > Decimal::ZERO {
            analysis.expected_avg_price
        } else {
            Decimal::new(50, 2)
        };
        let limit = (base * (Decimal::ONE + self.config.max_slippage)).min(Decimal::new(99, 2));
        OrderTicket {
            asset: asset.to_string(),
            notional,
            limit_price: limit,
        }
    }
}

fn empty_report(kind: ExecutionKind, planned: u32) -> IcebergReport {
    IcebergReport {
        total_tokens: Decimal::ZERO,
        total_spent: Decimal::ZERO,
        avg_slippage: Decimal::ZERO,
        chunks_planned: planned,
        chunks_executed: 0,
        kind,
        abandoned_order_ids: Vec::new(),
    }
}

fn realized_slippage(avg_price: Decimal, best_price: Decimal) -> Decimal {
    if best_price.is_zero() {
        Decimal::ZERO
    } else {
        (avg_price - best_price) / best_price
    }
}

fn depth_ceil_div(notional: Decimal, chunk: Decimal) -> u32 {
    use rust_decimal::prelude::ToPrimitive;
    if chunk <= Decimal::ZERO {
        return 0;
    }
    (notional / chunk).ceil().to_u32().unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::PriceLevel;
    use crate::market::mock::MockVenue;
    use rust_decimal_macros::dec;

    fn config() -> Arc<Config> {
        Arc::new(Config {
            status_poll_ms: 10,
            receipt_poll_ms: 10,
            tx_ref_recovery_ms: 20,
            confirm_timeout_secs: 1,
            chunk_threshold_usd: dec!(25),
            chunk_top_level_fraction: dec!(0.3),
            inter_chunk_delay_ms: 20,
            max_slippage: dec!(0.05),
            ..Config::default()
        })
    }

    fn executor(venue: &MockVenue, config: Arc<Config>) -> IcebergExecutor {
        let trade = TradeExecutor::new(
            Arc::new(venue.clone()),
            Arc::new(venue.clone()),
            Arc::clone(&config),
        );
        IcebergExecutor::new(Arc::new(venue.clone()), trade, config)
    }

    #[tokio::test(start_paused = true)]
    async fn small_notional_goes_direct() {
        let venue = MockVenue::new();
        venue.set_book("up", vec![PriceLevel::new(dec!(0.50), dec!(200))]);

        let report = executor(&venue, config())
            .execute_buy("up", dec!(20), Instant::now() + Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(report.kind, ExecutionKind::Direct);
        assert_eq!(report.chunks_executed, 1);
        assert_eq!(report.total_tokens, dec!(40));
        assert_eq!(report.total_spent, dec!(20));
    }

    #[tokio::test(start_paused = true)]
    async fn large_notional_is_chunked_and_conserves_totals() {
        let venue = MockVenue::new();
        venue.set_book(
            "up",
            vec![
                PriceLevel::new(dec!(0.50), dec!(100)),
                PriceLevel::new(dec!(0.51), dec!(100)),
            ],
        );

        // Top level $100, fraction 0.3 -> $30 chunks; $90 -> 3 chunks.
        let report = executor(&venue, config())
            .execute_buy("up", dec!(90), Instant::now() + Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(report.kind, ExecutionKind::Iceberg);
        assert_eq!(report.chunks_planned, 3);
        assert_eq!(report.chunks_executed, 3);
        assert_eq!(report.total_spent, dec!(90));
        // All fills landed on the $0.50 level: 90 / 0.50 tokens.
        assert_eq!(report.total_tokens, dec!(180));
        assert_eq!(report.avg_price(), dec!(0.50));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_completion_when_depth_evaporates() {
        let venue = MockVenue::new();
        // Only $40 of depth for a $90 target.
        venue.set_book("up", vec![PriceLevel::new(dec!(0.50), dec!(40))]);

        let report = executor(&venue, config())
            .execute_buy("up", dec!(90), Instant::now() + Duration::from_secs(60))
            .await
            .unwrap();

        assert!(report.chunks_executed < report.chunks_planned);
        assert!(report.total_spent < dec!(90));
        assert!(report.filled_any());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_when_partials_disallowed() {
        let venue = MockVenue::new();
        venue.set_book("up", vec![PriceLevel::new(dec!(0.50), dec!(10))]);

        let config = Arc::new(Config {
            allow_partial_iceberg: false,
            ..(*config()).clone()
        });
        let result = executor(&venue, config)
            .execute_buy("up", dec!(90), Instant::now() + Duration::from_secs(60))
            .await;

        assert!(matches!(
            result,
            Err(ExecutionError::InsufficientDepth { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_nonpositive_notional() {
        let venue = MockVenue::new();
        let result = executor(&venue, config())
            .execute_buy("up", dec!(0), Instant::now() + Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(ExecutionError::InvalidParams(_))));
    }
}
