//! Ledger store contract
//!
//! Every balance change is a compare-and-swap on the account `version`,
//! stamped with a [`Posting`] in the same atomic step. The posting makes a
//! leg visible to a later attempt (or another worker) even when the call that
//! applied it timed out.

use std::fmt;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::iban::Iban;
use super::models::Account;
use crate::core_types::{AccountId, IdempotencyKey};

/// Which side of a transfer a posting belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum Leg {
    Debit = 1,
    Credit = 2,
    /// Compensating credit back to the debited account
    Refund = 3,
}

impl Leg {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Leg::Debit),
            2 => Some(Leg::Credit),
            3 => Some(Leg::Refund),
            _ => None,
        }
    }

    /// Uniqueness slot within a transfer. Credit and refund settle the same
    /// debit, so they compete for one slot.
    #[inline]
    pub fn slot(&self) -> i16 {
        match self {
            Leg::Debit => 1,
            Leg::Credit | Leg::Refund => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Leg::Debit => "DEBIT",
            Leg::Credit => "CREDIT",
            Leg::Refund => "REFUND",
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stamp written together with a balance change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub key: IdempotencyKey,
    pub leg: Leg,
    pub amount: Decimal,
}

impl Posting {
    pub fn new(key: &IdempotencyKey, leg: Leg, amount: Decimal) -> Self {
        Self {
            key: key.clone(),
            leg,
            amount,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    NotFound(AccountId),

    #[error("Version conflict on {account}: expected {expected}, found {actual}")]
    VersionConflict {
        account: AccountId,
        expected: u64,
        actual: u64,
    },

    #[error("Account already exists: {0}")]
    AlreadyExists(String),

    #[error("{0} leg already posted for this transfer")]
    AlreadyPosted(Leg),

    #[error("Balance of {0} would become negative")]
    NegativeBalance(AccountId),

    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    #[error("Ledger store call timed out: {0}")]
    Timeout(&'static str),

    #[error("Database error: {0}")]
    Database(String),
}

impl LedgerError {
    /// Failures worth another attempt after re-reading the account
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::VersionConflict { .. } | LedgerError::Timeout(_) | LedgerError::Database(_)
        )
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db_err) = e.as_database_error()
            && db_err.is_unique_violation()
        {
            return LedgerError::AlreadyExists(db_err.message().to_string());
        }
        LedgerError::Database(e.to_string())
    }
}

/// Durable account storage
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    async fn get(&self, id: AccountId) -> Result<Account, LedgerError>;

    /// Secondary lookup; `Ok(None)` when no account carries this IBAN
    async fn find_by_iban(&self, iban: &Iban) -> Result<Option<Account>, LedgerError>;

    /// Insert a new account. Fails with `AlreadyExists` on id or IBAN collision.
    async fn create(&self, account: Account) -> Result<Account, LedgerError>;

    /// Set `balance` to `new_balance` iff the stored version equals
    /// `expected_version`, recording `posting` atomically with the change.
    ///
    /// Checked in this order: the posting slot is free (`AlreadyPosted` names
    /// the leg occupying it), the version matches (`VersionConflict`), the new
    /// balance is non-negative (`NegativeBalance`). On any failure nothing is
    /// written.
    async fn conditional_update(
        &self,
        id: AccountId,
        expected_version: u64,
        new_balance: Decimal,
        posting: &Posting,
    ) -> Result<Account, LedgerError>;

    /// Legs already posted under `key`, debit first
    async fn postings(&self, key: &IdempotencyKey) -> Result<Vec<Leg>, LedgerError>;

    async fn list(&self) -> Result<Vec<Account>, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leg_slots() {
        assert_eq!(Leg::Debit.slot(), 1);
        assert_eq!(Leg::Credit.slot(), Leg::Refund.slot());
        assert_ne!(Leg::Debit.slot(), Leg::Credit.slot());
    }

    #[test]
    fn test_leg_id_roundtrip() {
        for leg in [Leg::Debit, Leg::Credit, Leg::Refund] {
            assert_eq!(Leg::from_id(leg.id()), Some(leg));
        }
        assert_eq!(Leg::from_id(0), None);
    }

    #[test]
    fn test_transient_classification() {
        let id = AccountId::new();
        assert!(
            LedgerError::VersionConflict {
                account: id,
                expected: 1,
                actual: 2
            }
            .is_transient()
        );
        assert!(LedgerError::Timeout("get").is_transient());
        assert!(!LedgerError::NotFound(id).is_transient());
        assert!(!LedgerError::AlreadyPosted(Leg::Debit).is_transient());
        assert!(!LedgerError::NegativeBalance(id).is_transient());
    }
}
