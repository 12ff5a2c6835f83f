//! Transfer Error Types
//!
//! Business rejections are not errors: they come back as a recorded
//! `TransferOutcome`. `TransferError` covers everything that leaves a
//! transfer without a terminal outcome, plus `Rejected` for callers that
//! want to fold a rejection into `Result` (see `into_result`).

use thiserror::Error;

use super::idempotency::GuardError;
use super::types::{RejectReason, TransferOutcome};
use crate::core_types::IdempotencyKey;
use crate::ledger::{LedgerError, ResolveError};

#[derive(Error, Debug, Clone)]
pub enum TransferError {
    #[error("Transfer rejected: {0}")]
    Rejected(RejectReason),

    /// Nothing was applied; retrying with the same key is safe
    #[error("Transfer {0} lost every version race, nothing applied")]
    Contention(IdempotencyKey),

    /// Another worker holds the claim for this key
    #[error("Transfer {0} is being processed elsewhere")]
    InProgress(IdempotencyKey),

    #[error("Transfer cancelled before the debit was applied")]
    Cancelled,

    /// Debit applied, refund failed. Quarantined for an operator.
    #[error("Critical inconsistency on transfer {0}")]
    CriticalInconsistency(IdempotencyKey),

    #[error("Idempotency key {0} was already used for a different transfer")]
    KeyMismatch(IdempotencyKey),

    #[error("Transfer not found: {0}")]
    NotFound(IdempotencyKey),

    #[error("Ledger store error: {0}")]
    Store(String),

    #[error("Idempotency journal error: {0}")]
    Journal(String),
}

impl TransferError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Rejected(reason) => reason.code(),
            TransferError::Contention(_) => "CONTENTION",
            TransferError::InProgress(_) => "IN_PROGRESS",
            TransferError::Cancelled => "CANCELLED",
            TransferError::CriticalInconsistency(_) => "CRITICAL_INCONSISTENCY",
            TransferError::KeyMismatch(_) => "IDEMPOTENCY_KEY_MISMATCH",
            TransferError::NotFound(_) => "TRANSFER_NOT_FOUND",
            TransferError::Store(_) => "STORE_ERROR",
            TransferError::Journal(_) => "JOURNAL_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::Rejected(reason) if reason.is_not_found() => 404,
            TransferError::Rejected(RejectReason::InsufficientFunds) => 422,
            TransferError::Rejected(RejectReason::Contention) => 409,
            TransferError::Rejected(_) => 400,
            TransferError::KeyMismatch(_) => 422,
            TransferError::Contention(_) | TransferError::InProgress(_) => 409,
            TransferError::NotFound(_) => 404,
            TransferError::Cancelled => 499,
            TransferError::CriticalInconsistency(_)
            | TransferError::Store(_)
            | TransferError::Journal(_) => 500,
        }
    }

    /// Worth redelivering or resubmitting with the same key
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Contention(_)
                | TransferError::InProgress(_)
                | TransferError::Cancelled
                | TransferError::Store(_)
                | TransferError::Journal(_)
        )
    }
}

impl From<LedgerError> for TransferError {
    fn from(e: LedgerError) -> Self {
        TransferError::Store(e.to_string())
    }
}

impl From<ResolveError> for TransferError {
    fn from(e: ResolveError) -> Self {
        TransferError::Store(e.to_string())
    }
}

impl From<GuardError> for TransferError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::KeyMismatch(key) => TransferError::KeyMismatch(key),
            GuardError::LeaseLost(key) => TransferError::InProgress(key),
            other => TransferError::Journal(other.to_string()),
        }
    }
}

impl TransferOutcome {
    /// `Ok` for applied transfers, `Err(Rejected)` otherwise
    pub fn into_result(self) -> Result<TransferOutcome, TransferError> {
        match self.reason {
            Some(reason) if !self.is_applied() => Err(TransferError::Rejected(reason)),
            _ => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            TransferError::Rejected(RejectReason::InsufficientFunds).code(),
            "INSUFFICIENT_FUNDS"
        );
        assert_eq!(
            TransferError::CriticalInconsistency(IdempotencyKey::generate()).code(),
            "CRITICAL_INCONSISTENCY"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(
            TransferError::Rejected(RejectReason::UnknownTargetAccount).http_status(),
            404
        );
        assert_eq!(
            TransferError::Rejected(RejectReason::SameAccount).http_status(),
            400
        );
        assert_eq!(
            TransferError::Rejected(RejectReason::InsufficientFunds).http_status(),
            422
        );
        assert_eq!(
            TransferError::Contention(IdempotencyKey::generate()).http_status(),
            409
        );
        assert_eq!(TransferError::Store("x".into()).http_status(), 500);
    }

    #[test]
    fn test_retry_classification() {
        assert!(TransferError::Contention(IdempotencyKey::generate()).is_retryable());
        assert!(TransferError::Store("down".into()).is_retryable());
        assert!(!TransferError::CriticalInconsistency(IdempotencyKey::generate()).is_retryable());
        assert!(!TransferError::KeyMismatch(IdempotencyKey::generate()).is_retryable());
        assert!(!TransferError::Rejected(RejectReason::InvalidAmount).is_retryable());
    }

    #[test]
    fn test_into_result() {
        let key = IdempotencyKey::generate();
        assert!(TransferOutcome::applied(&key).into_result().is_ok());
        assert!(matches!(
            TransferOutcome::rejected(&key, RejectReason::InvalidAmount).into_result(),
            Err(TransferError::Rejected(RejectReason::InvalidAmount))
        ));
    }
}
