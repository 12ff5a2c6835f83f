//! Recovery Worker
//!
//! Background worker that scans for and resumes transfers whose owner went
//! away mid-flight.

use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use super::cancel::CancelSignal;
use super::coordinator::TransferCoordinator;
use super::error::TransferError;
use super::state::TransferState;
use crate::config::RecoveryConfig;

/// Resumes past this count get flagged in the logs
const NOISY_ATTEMPTS: u32 = 10;

/// Configuration for the recovery worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan for stale transfers
    pub scan_interval: Duration,
    /// How long an in-flight record must sit untouched to be considered stale
    pub stale_threshold: Duration,
    /// Maximum transfers to resume per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&RecoveryConfig::default())
    }
}

impl From<&RecoveryConfig> for WorkerConfig {
    fn from(config: &RecoveryConfig) -> Self {
        Self {
            scan_interval: Duration::from_millis(config.scan_interval_ms),
            stale_threshold: Duration::from_millis(config.stale_threshold_ms),
            batch_size: config.batch_size,
        }
    }
}

/// Periodically picks up in-flight journal records with an expired lease and
/// drives them to a terminal state through the coordinator.
pub struct RecoveryWorker {
    coordinator: Arc<TransferCoordinator>,
    config: WorkerConfig,
    span: Span,
}

impl RecoveryWorker {
    pub fn new(coordinator: Arc<TransferCoordinator>, config: WorkerConfig) -> Self {
        Self {
            coordinator,
            config,
            span: Span::none(),
        }
    }

    pub fn with_defaults(coordinator: Arc<TransferCoordinator>) -> Self {
        Self::new(coordinator, WorkerConfig::default())
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Run until `shutdown` fires
    pub async fn run(&self, shutdown: CancelSignal) {
        let span = info_span!(parent: &self.span, "recovery");
        async {
            info!(
                scan_interval_ms = self.config.scan_interval.as_millis() as u64,
                stale_threshold_ms = self.config.stale_threshold.as_millis() as u64,
                "Starting recovery worker"
            );

            loop {
                if let Err(e) = self.scan_and_recover().await {
                    error!(error = %e, "Recovery scan failed");
                }

                tokio::select! {
                    _ = tokio::time::sleep(self.config.scan_interval) => {}
                    _ = shutdown.cancelled() => break,
                }
            }

            info!("Recovery worker stopped");
        }
        .instrument(span)
        .await
    }

    /// Run a single scan. Returns how many transfers reached a terminal
    /// outcome.
    pub async fn scan_and_recover(&self) -> Result<usize, TransferError> {
        let stale = self
            .coordinator
            .guard()
            .find_stale(self.config.stale_threshold, self.config.batch_size)
            .await?;

        if stale.is_empty() {
            debug!("No stale transfers found");
            return Ok(0);
        }

        info!(count = stale.len(), "Found stale transfers to recover");

        let mut recovered = 0;
        for record in &stale {
            if record.attempts > NOISY_ATTEMPTS {
                warn!(
                    idempotency_key = %record.idempotency_key,
                    state = %record.state,
                    attempts = record.attempts,
                    "Transfer keeps getting resumed"
                );
            }

            match self.coordinator.resume(record).await {
                Ok(Some(outcome)) => {
                    info!(
                        idempotency_key = %record.idempotency_key,
                        from_state = %record.state,
                        status = %outcome.status,
                        "Transfer recovered"
                    );
                    recovered += 1;
                }
                Ok(None) => {
                    debug!(
                        idempotency_key = %record.idempotency_key,
                        "Picked up by another owner"
                    );
                }
                Err(TransferError::CriticalInconsistency(key)) => {
                    error!(idempotency_key = %key, "Recovery ended in critical inconsistency");
                }
                Err(e) if record.state == TransferState::Compensating => {
                    error!(
                        idempotency_key = %record.idempotency_key,
                        error = %e,
                        "Failed to resume compensating transfer"
                    );
                }
                Err(e) => {
                    warn!(
                        idempotency_key = %record.idempotency_key,
                        error = %e,
                        "Failed to recover transfer"
                    );
                }
            }
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered transfers this scan");
        }

        Ok(recovered)
    }
}
