//! Transfer request, outcome and journal record types

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::state::TransferState;
use crate::core_types::IdempotencyKey;
use crate::ledger::Iban;

/// One logical transfer. Every delivery of it carries the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_iban: String,
    pub to_iban: String,
    pub amount: Decimal,
    pub idempotency_key: IdempotencyKey,
}

impl TransferRequest {
    /// Synchronous request: a fresh key per call
    pub fn new(from_iban: impl Into<String>, to_iban: impl Into<String>, amount: Decimal) -> Self {
        Self::with_key(from_iban, to_iban, amount, IdempotencyKey::generate())
    }

    /// Key derived from content plus a caller token, so resubmitting the same
    /// token is a no-op
    pub fn with_token(
        from_iban: impl Into<String>,
        to_iban: impl Into<String>,
        amount: Decimal,
        token: &str,
    ) -> Self {
        let from_iban = from_iban.into();
        let to_iban = to_iban.into();
        let key = IdempotencyKey::derive(&from_iban, &to_iban, amount, Some(token));
        Self::with_key(from_iban, to_iban, amount, key)
    }

    pub fn with_key(
        from_iban: impl Into<String>,
        to_iban: impl Into<String>,
        amount: Decimal,
        idempotency_key: IdempotencyKey,
    ) -> Self {
        Self {
            from_iban: from_iban.into(),
            to_iban: to_iban.into(),
            amount,
            idempotency_key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Applied,
    Rejected,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Applied => "applied",
            OutcomeStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transfer was rejected. Stored by code in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    UnknownSourceAccount,
    UnknownTargetAccount,
    /// `from` and `to` resolve to the same account
    SameAccount,
    /// Accounts hold different currencies; no conversion is done
    CurrencyMismatch,
    InvalidAmount,
    InsufficientFunds,
    /// Debit applied, credit kept losing, debit refunded
    Contention,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::UnknownSourceAccount => "UNKNOWN_SOURCE_ACCOUNT",
            RejectReason::UnknownTargetAccount => "UNKNOWN_TARGET_ACCOUNT",
            RejectReason::SameAccount => "SAME_ACCOUNT",
            RejectReason::CurrencyMismatch => "CURRENCY_MISMATCH",
            RejectReason::InvalidAmount => "INVALID_AMOUNT",
            RejectReason::InsufficientFunds => "INSUFFICIENT_FUNDS",
            RejectReason::Contention => "CONTENTION",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "UNKNOWN_SOURCE_ACCOUNT" => Some(RejectReason::UnknownSourceAccount),
            "UNKNOWN_TARGET_ACCOUNT" => Some(RejectReason::UnknownTargetAccount),
            "SAME_ACCOUNT" => Some(RejectReason::SameAccount),
            "CURRENCY_MISMATCH" => Some(RejectReason::CurrencyMismatch),
            "INVALID_AMOUNT" => Some(RejectReason::InvalidAmount),
            "INSUFFICIENT_FUNDS" => Some(RejectReason::InsufficientFunds),
            "CONTENTION" => Some(RejectReason::Contention),
            _ => None,
        }
    }

    /// Request is malformed in itself (`InvalidTransfer` family)
    pub fn is_invalid_transfer(&self) -> bool {
        matches!(
            self,
            RejectReason::SameAccount | RejectReason::CurrencyMismatch
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RejectReason::UnknownSourceAccount | RejectReason::UnknownTargetAccount
        )
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Terminal result of a transfer. Never changes once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub idempotency_key: IdempotencyKey,
    pub status: OutcomeStatus,
    pub reason: Option<RejectReason>,
    pub applied_at: DateTime<Utc>,
}

impl TransferOutcome {
    pub fn applied(key: &IdempotencyKey) -> Self {
        Self {
            idempotency_key: key.clone(),
            status: OutcomeStatus::Applied,
            reason: None,
            applied_at: Utc::now(),
        }
    }

    pub fn rejected(key: &IdempotencyKey, reason: RejectReason) -> Self {
        Self {
            idempotency_key: key.clone(),
            status: OutcomeStatus::Rejected,
            reason: Some(reason),
            applied_at: Utc::now(),
        }
    }

    pub fn is_applied(&self) -> bool {
        self.status == OutcomeStatus::Applied
    }

    /// Same terminal verdict (timestamps aside)
    pub fn same_verdict(&self, other: &TransferOutcome) -> bool {
        self.status == other.status && self.reason == other.reason
    }

    pub fn terminal_state(&self) -> TransferState {
        match self.status {
            OutcomeStatus::Applied => TransferState::Committed,
            OutcomeStatus::Rejected => TransferState::Rejected,
        }
    }
}

/// Owner of an in-flight journal record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimToken(Ulid);

impl ClaimToken {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ClaimToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ClaimToken {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

/// Idempotency journal row
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub idempotency_key: IdempotencyKey,
    pub from_iban: String,
    pub to_iban: String,
    pub amount: Decimal,
    pub state: TransferState,
    pub reason: Option<RejectReason>,
    /// Operator-facing note, set on quarantine
    pub detail: Option<String>,
    pub owner: Option<ClaimToken>,
    pub lease_until: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl TransferRecord {
    /// Fresh in-flight record owned by `owner`
    pub fn claimed(req: &TransferRequest, owner: ClaimToken, lease_until: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            idempotency_key: req.idempotency_key.clone(),
            from_iban: Iban::canonical(&req.from_iban),
            to_iban: Iban::canonical(&req.to_iban),
            amount: req.amount,
            state: TransferState::Received,
            reason: None,
            detail: None,
            owner: Some(owner),
            lease_until: Some(lease_until),
            attempts: 1,
            created_at: now,
            updated_at: now,
            applied_at: None,
        }
    }

    /// True when `req` describes the same transfer this record was claimed for
    pub fn matches(&self, req: &TransferRequest) -> bool {
        Iban::canonical(&self.from_iban) == Iban::canonical(&req.from_iban)
            && Iban::canonical(&self.to_iban) == Iban::canonical(&req.to_iban)
            && self.amount.normalize() == req.amount.normalize()
    }

    pub fn request(&self) -> TransferRequest {
        TransferRequest::with_key(
            self.from_iban.clone(),
            self.to_iban.clone(),
            self.amount,
            self.idempotency_key.clone(),
        )
    }

    pub fn outcome(&self) -> Option<TransferOutcome> {
        let status = match self.state {
            TransferState::Committed => OutcomeStatus::Applied,
            TransferState::Rejected => OutcomeStatus::Rejected,
            _ => return None,
        };
        Some(TransferOutcome {
            idempotency_key: self.idempotency_key.clone(),
            status,
            reason: self.reason,
            applied_at: self.applied_at.unwrap_or(self.updated_at),
        })
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease_until.is_none_or(|until| until <= now)
    }
}
