//! In-memory ledger store
//!
//! Backs tests and the database-less dev profile. Each conditional update
//! holds the account's shard lock while it checks and writes the posting, so
//! the balance change and the stamp land together.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;

use super::iban::Iban;
use super::models::Account;
use super::store::{LedgerError, LedgerStore, Leg, Posting};
use crate::core_types::{AccountId, IdempotencyKey};

#[derive(Default)]
pub struct InMemoryLedgerStore {
    accounts: DashMap<AccountId, Account>,
    by_iban: DashMap<Iban, AccountId>,
    postings: DashMap<(IdempotencyKey, i16), Leg>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all balances, for conservation checks
    pub fn total_balance(&self) -> Decimal {
        self.accounts.iter().map(|a| a.balance).sum()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.accounts
            .get(&id)
            .map(|a| a.clone())
            .ok_or(LedgerError::NotFound(id))
    }

    async fn find_by_iban(&self, iban: &Iban) -> Result<Option<Account>, LedgerError> {
        let id = match self.by_iban.get(iban) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.accounts.get(&id).map(|a| a.clone()))
    }

    async fn create(&self, account: Account) -> Result<Account, LedgerError> {
        if account.balance < Decimal::ZERO {
            return Err(LedgerError::InvalidAccount(
                "initial balance must not be negative".into(),
            ));
        }

        // Lock order: iban index, then accounts
        match self.by_iban.entry(account.iban.clone()) {
            Entry::Occupied(_) => Err(LedgerError::AlreadyExists(format!(
                "iban {}",
                account.iban
            ))),
            Entry::Vacant(iban_slot) => match self.accounts.entry(account.id) {
                Entry::Occupied(_) => {
                    Err(LedgerError::AlreadyExists(format!("id {}", account.id)))
                }
                Entry::Vacant(id_slot) => {
                    id_slot.insert(account.clone());
                    iban_slot.insert(account.id);
                    Ok(account)
                }
            },
        }
    }

    async fn conditional_update(
        &self,
        id: AccountId,
        expected_version: u64,
        new_balance: Decimal,
        posting: &Posting,
    ) -> Result<Account, LedgerError> {
        // Lock order: account, then posting slot
        let mut account = self
            .accounts
            .get_mut(&id)
            .ok_or(LedgerError::NotFound(id))?;

        let slot = match self
            .postings
            .entry((posting.key.clone(), posting.leg.slot()))
        {
            Entry::Occupied(existing) => return Err(LedgerError::AlreadyPosted(*existing.get())),
            Entry::Vacant(slot) => slot,
        };

        if account.version != expected_version {
            return Err(LedgerError::VersionConflict {
                account: id,
                expected: expected_version,
                actual: account.version,
            });
        }
        if new_balance < Decimal::ZERO {
            return Err(LedgerError::NegativeBalance(id));
        }

        account.balance = new_balance;
        account.version += 1;
        account.updated_at = Utc::now();
        slot.insert(posting.leg);

        Ok(account.clone())
    }

    async fn postings(&self, key: &IdempotencyKey) -> Result<Vec<Leg>, LedgerError> {
        let legs = [Leg::Debit.slot(), Leg::Credit.slot()]
            .into_iter()
            .filter_map(|slot| self.postings.get(&(key.clone(), slot)).map(|leg| *leg))
            .collect();
        Ok(legs)
    }

    async fn list(&self) -> Result<Vec<Account>, LedgerError> {
        let mut accounts: Vec<Account> = self.accounts.iter().map(|a| a.clone()).collect();
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(accounts)
    }
}
