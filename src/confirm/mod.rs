//! Confirmation racing.
//!
//! Runs N independent pollers concurrently and accepts whichever reports a
//! terminal state first. The losers are stopped cooperatively: each probe
//! checks a shared stop flag between polls and is never abandoned in the
//! middle of a network call.
//!
//! The trade executor races an order-status probe against a chain-receipt
//! probe; the redemption service races a relayer-status probe against a
//! chain-receipt probe. Only the probe implementations differ.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, instrument, warn};

use crate::error::ExchangeError;

/// Terminal verdict from one probe.
#[derive(Debug, Clone)]
pub struct ProbeVerdict {
    /// Whether the watched operation succeeded.
    pub confirmed: bool,
    /// Settlement reference, if the source knows one.
    pub tx_ref: Option<String>,
}

/// One independent confirmation source.
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    /// Stable label for logs and results.
    fn source(&self) -> &str;

    /// How often this probe polls its source.
    fn poll_interval(&self) -> Duration;

    /// Poll once. `Ok(None)` means "not terminal yet, keep polling".
    async fn check(&self) -> Result<Option<ProbeVerdict>, ExchangeError>;
}

/// Outcome of a confirmation race.
#[derive(Debug, Clone)]
pub enum ConfirmationResult {
    /// A probe reported a terminal state.
    Terminal {
        /// Which probe won.
        source: String,
        /// Whether the operation succeeded.
        confirmed: bool,
        /// Settlement reference, if known.
        tx_ref: Option<String>,
    },
    /// No probe terminated before the timeout. The caller decides whether
    /// this is failure or "still pending, retry"; it must never be assumed
    /// to be either success or failure.
    Timeout,
}

impl ConfirmationResult {
    /// Whether the race ended in a confirmed success.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, ConfirmationResult::Terminal { confirmed: true, .. })
    }

    /// Settlement reference carried by the result, if any.
    pub fn tx_ref(&self) -> Option<&str> {
        match self {
            ConfirmationResult::Terminal { tx_ref, .. } => tx_ref.as_deref(),
            ConfirmationResult::Timeout => None,
        }
    }
}

/// Race the given probes until the first terminal result or the timeout.
///
/// All probes are started concurrently; the first terminal verdict wins and
/// flips the shared stop flag so the rest cease polling.
#[instrument(skip(probes), fields(probe_count = probes.len()))]
pub async fn race(probes: Vec<Arc<dyn Probe>>, timeout: Duration) -> ConfirmationResult {
    if probes.is_empty() {
        return ConfirmationResult::Timeout;
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let (result_tx, mut result_rx) = mpsc::channel::<ConfirmationResult>(probes.len());

    for probe in probes {
        let mut stop = stop_rx.clone();
        let results = result_tx.clone();
        tokio::spawn(async move {
            loop {
                if *stop.borrow() {
                    break;
                }
                match probe.check().await {
                    Ok(Some(verdict)) => {
                        debug!(source = probe.source(), confirmed = verdict.confirmed, "probe terminal");
                        let _ = results
                            .send(ConfirmationResult::Terminal {
                                source: probe.source().to_string(),
                                confirmed: verdict.confirmed,
                                tx_ref: verdict.tx_ref,
                            })
                            .await;
                        break;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // A failing source is not a terminal signal; keep
                        // polling until stopped or the race times out.
                        warn!(source = probe.source(), error = %e, "probe poll failed");
                    }
                }
                // Sleep for the poll interval, waking early if stopped.
                tokio::select! {
                    _ = tokio::time::sleep(probe.poll_interval()) => {}
                    _ = stop.changed() => break,
                }
            }
        });
    }
    drop(result_tx);

    let result = match tokio::time::timeout(timeout, result_rx.recv()).await {
        Ok(Some(result)) => result,
        Ok(None) | Err(_) => ConfirmationResult::Timeout,
    };

    // First terminal result (or timeout) cancels every remaining probe.
    let _ = stop_tx.send(true);
    result
}
