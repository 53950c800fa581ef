//! Post-resolution redemption of winning position tokens.
//!
//! Redemption is submitted through a gasless relayer and confirmed by racing
//! the relayer's own status endpoint against a direct chain-receipt poll,
//! whichever answers first, under a single bounded timeout. Every attempt
//! leaves a durable audit record whether it confirmed, failed, or timed out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::confirm::{race, ConfirmationResult, Probe, ProbeVerdict};
use crate::error::{ExchangeError, SettlementError};
use crate::execution::trade::ReceiptProbe;
use crate::market::client::{ChainClient, ClaimTx, RelayState, Relayer};
use crate::market::types::{Outcome, TradingWindow};
use crate::metrics::{METRIC_REDEMPTIONS, METRIC_REDEMPTIONS_FAILED};
use crate::store::StateStore;

/// Terminal state of one redemption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedemptionStatus {
    /// Claim confirmed on chain.
    Confirmed,
    /// Claim terminally failed.
    Failed,
    /// No terminal signal within the timeout.
    Unknown,
    /// Nothing to redeem; no claim was submitted.
    Skipped,
}

/// Durable audit record of one redemption attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionRecord {
    /// Unique id of this attempt.
    pub id: String,
    /// Window whose tokens were redeemed.
    pub window_id: String,
    /// Settlement condition that was claimed.
    pub condition_id: String,
    /// Winning outcome.
    pub winner: Outcome,
    /// Token balance the claim covered.
    pub amount: Decimal,
    /// Terminal state of the attempt.
    pub status: RedemptionStatus,
    /// Transaction reference, when one was recovered.
    pub tx_ref: Option<String>,
    /// Which confirmation source answered, when one did.
    pub confirmed_by: Option<String>,
    /// When the attempt finished.
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// Probe polling the relayer's view of a submitted claim.
struct RelayStatusProbe {
    relayer: Arc<dyn Relayer>,
    request_id: String,
    interval: Duration,
}

#[async_trait]
impl Probe for RelayStatusProbe {
    fn source(&self) -> &str {
        "relayer-status"
    }

    fn poll_interval(&self) -> Duration {
        self.interval
    }

    async fn check(&self) -> Result<Option<ProbeVerdict>, ExchangeError> {
        match self.relayer.relay_status(&self.request_id).await? {
            RelayState::Confirmed { tx_ref } => Ok(Some(ProbeVerdict {
                confirmed: true,
                tx_ref: Some(tx_ref),
            })),
            RelayState::Failed { reason } => {
                warn!(request_id = %self.request_id, %reason, "relayed claim failed");
                Ok(Some(ProbeVerdict {
                    confirmed: false,
                    tx_ref: None,
                }))
            }
            RelayState::Pending | RelayState::Submitted { .. } => Ok(None),
        }
    }
}

/// Redeems winning tokens after a window resolves.
pub struct RedemptionService {
    chain: Arc<dyn ChainClient>,
    relayer: Arc<dyn Relayer>,
    store: StateStore,
    config: Arc<Config>,
}

impl RedemptionService {
    /// Build over the chain and relayer contracts.
    pub fn new(
        chain: Arc<dyn ChainClient>,
        relayer: Arc<dyn Relayer>,
        store: StateStore,
        config: Arc<Config>,
    ) -> Self {
        Self {
            chain,
            relayer,
            store,
            config,
        }
    }

    /// Redeem the window's winning tokens, returning the audit record.
    ///
    /// A zero on-chain balance short-circuits without submitting anything;
    /// the exchange may have already settled the position internally.
    #[instrument(skip(self, window), fields(window_id = %window.id(), winner = %winner))]
    pub async fn redeem(
        &self,
        window: &TradingWindow,
        winner: Outcome,
    ) -> Result<RedemptionRecord, SettlementError> {
        let asset = window.asset(winner);
        let balance = self.chain.onchain_balance(asset).await?;
        if balance <= Decimal::ZERO {
            info!(asset, "no on-chain balance, skipping redemption");
            return self
                .record(window, winner, balance, RedemptionStatus::Skipped, None, None)
                .await;
        }

        let claim = ClaimTx {
            condition_id: window.condition_id.clone(),
            payload: encode_claim(&window.condition_id, winner),
        };
        let submission = self.relayer.submit_relayed_tx(&claim).await.map_err(|e| {
            SettlementError::SubmissionFailed(e.to_string())
        })?;
        info!(request_id = %submission.request_id, "claim submitted through relayer");

        let mut probes: Vec<Arc<dyn Probe>> = vec![Arc::new(RelayStatusProbe {
            relayer: Arc::clone(&self.relayer),
            request_id: submission.request_id.clone(),
            interval: Duration::from_millis(self.config.status_poll_ms),
        })];
        if let Some(tx_ref) = submission.tx_ref.clone() {
            probes.push(Arc::new(ReceiptProbe {
                chain: Arc::clone(&self.chain),
                tx_ref,
                interval: Duration::from_millis(self.config.receipt_poll_ms),
            }));
        }

        let timeout = Duration::from_secs(self.config.confirm_timeout_secs);
        let (status, tx_ref, confirmed_by) = match race(probes, timeout).await {
            ConfirmationResult::Terminal {
                source,
                confirmed: true,
                tx_ref,
            } => {
                counter!(METRIC_REDEMPTIONS).increment(1);
                (RedemptionStatus::Confirmed, tx_ref, Some(source))
            }
            ConfirmationResult::Terminal {
                source,
                confirmed: false,
                ..
            } => {
                counter!(METRIC_REDEMPTIONS_FAILED).increment(1);
                (RedemptionStatus::Failed, None, Some(source))
            }
            ConfirmationResult::Timeout => {
                // The claim may still land later; record it as unresolved
                // rather than failed.
                warn!(request_id = %submission.request_id, "claim confirmation timed out");
                counter!(METRIC_REDEMPTIONS_FAILED).increment(1);
                (RedemptionStatus::Unknown, submission.tx_ref.clone(), None)
            }
        };

        self.record(window, winner, balance, status, tx_ref, confirmed_by)
            .await
    }

    async fn record(
        &self,
        window: &TradingWindow,
        winner: Outcome,
        amount: Decimal,
        status: RedemptionStatus,
        tx_ref: Option<String>,
        confirmed_by: Option<String>,
    ) -> Result<RedemptionRecord, SettlementError> {
        let record = RedemptionRecord {
            id: Uuid::new_v4().to_string(),
            window_id: window.id(),
            condition_id: window.condition_id.clone(),
            winner,
            amount,
            status,
            tx_ref,
            confirmed_by,
            recorded_at: OffsetDateTime::now_utc(),
        };
        self.store
            .save(&format!("redemption:{}", window.id()), &record)
            .await
            .map_err(|e| SettlementError::SubmissionFailed(e.to_string()))?;
        Ok(record)
    }
}

/// Encode the claim call data for a condition and winning outcome.
fn encode_claim(condition_id: &str, winner: Outcome) -> Vec<u8> {
    format!("{condition_id}:{winner}").into_bytes()
}
