use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::iban::Iban;
use crate::core_types::AccountId;

/// Account record as held by the ledger store.
///
/// `balance` only changes through [`LedgerStore::conditional_update`], which
/// also bumps `version`.
///
/// [`LedgerStore::conditional_update`]: super::store::LedgerStore::conditional_update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub iban: Iban,
    pub currency: String,
    pub balance: Decimal,
    pub owner_user_id: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        id: AccountId,
        iban: Iban,
        currency: impl Into<String>,
        balance: Decimal,
        owner_user_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            iban,
            currency: currency.into(),
            balance,
            owner_user_id: owner_user_id.into(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
