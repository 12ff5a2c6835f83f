//! Idempotency guard
//!
//! The journal keyed by idempotency key. A key is first *claimed*: an
//! in-flight record owned by one `ClaimToken` for the length of a lease.
//! Only the owner may advance, record or release it. Once a terminal outcome
//! is recorded the record is frozen and every later claim gets that outcome
//! back.
//!
//! ```text
//! absent ──claim──▶ in-flight(owner, lease) ──record──▶ terminal
//!    ▲                  │    │
//!    └─────release──────┘    └──quarantine──▶ CRITICAL_INCONSISTENCY
//! ```
//!
//! A lease that runs out without being renewed lets the next claimant take
//! the record over; that is how a crashed worker's transfer gets finished.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::state::TransferState;
use super::types::{ClaimToken, OutcomeStatus, TransferOutcome, TransferRecord, TransferRequest};
use crate::core_types::IdempotencyKey;

pub use memory::InMemoryIdempotencyGuard;
pub use postgres::PgIdempotencyGuard;

/// Result of trying to claim a key
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// Caller now owns the record. `state` is where a previous owner left
    /// off (`Received` for a fresh key).
    Acquired(TransferRecord),
    /// Another owner's lease is still running
    Busy { lease_until: DateTime<Utc> },
    Finished(TransferOutcome),
    Quarantined,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GuardError {
    #[error("Outcome for {key} already recorded as {existing}")]
    Conflict {
        key: IdempotencyKey,
        existing: OutcomeStatus,
    },

    #[error("Claim on {0} is no longer held")]
    LeaseLost(IdempotencyKey),

    #[error("Idempotency key {0} belongs to a different transfer")]
    KeyMismatch(IdempotencyKey),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for GuardError {
    fn from(e: sqlx::Error) -> Self {
        GuardError::Database(e.to_string())
    }
}

#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    fn name(&self) -> &'static str;

    /// Terminal outcome for `key`, if one was recorded
    async fn lookup(&self, key: &IdempotencyKey) -> Result<Option<TransferOutcome>, GuardError>;

    /// Full journal record, in-flight or terminal
    async fn get(&self, key: &IdempotencyKey) -> Result<Option<TransferRecord>, GuardError>;

    /// Atomic insert-if-absent, or takeover of an expired lease
    async fn claim(
        &self,
        req: &TransferRequest,
        token: ClaimToken,
        lease: Duration,
    ) -> Result<Claim, GuardError>;

    /// Persist progress and renew the lease
    async fn advance(
        &self,
        key: &IdempotencyKey,
        token: ClaimToken,
        state: TransferState,
        lease: Duration,
    ) -> Result<(), GuardError>;

    /// Drop an in-flight claim that applied nothing, so the key can be used
    /// again from scratch
    async fn release(&self, key: &IdempotencyKey, token: ClaimToken) -> Result<(), GuardError>;

    /// Freeze the terminal outcome. Recording the same verdict twice returns
    /// the stored outcome; a different verdict is a `Conflict`.
    async fn record(
        &self,
        token: ClaimToken,
        outcome: &TransferOutcome,
    ) -> Result<TransferOutcome, GuardError>;

    async fn quarantine(
        &self,
        key: &IdempotencyKey,
        token: ClaimToken,
        detail: &str,
    ) -> Result<(), GuardError>;

    /// In-flight records whose lease has expired and which have not moved for
    /// `older_than`
    async fn find_stale(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, GuardError>;
}

pub(crate) fn lease_deadline(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(30))
}
