//! Account creation and read paths

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use super::iban::IbanGenerator;
use super::models::Account;
use super::store::{LedgerError, LedgerStore};
use crate::core_types::AccountId;

/// IBAN collisions are astronomically rare; a handful of draws is plenty.
const MAX_IBAN_DRAWS: usize = 5;

/// Parameters for opening an account
#[derive(Debug, Clone)]
pub struct OpenAccount {
    pub currency: String,
    pub owner_user_id: String,
    pub initial_balance: Decimal,
}

pub struct AccountService {
    store: Arc<dyn LedgerStore>,
    generator: IbanGenerator,
}

impl AccountService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self::with_generator(store, IbanGenerator::new())
    }

    pub fn with_generator(store: Arc<dyn LedgerStore>, generator: IbanGenerator) -> Self {
        Self { store, generator }
    }

    /// Create an account with a fresh id and a generated IBAN
    pub async fn open(&self, params: OpenAccount) -> Result<Account, LedgerError> {
        let currency = params.currency.trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(LedgerError::InvalidAccount(format!(
                "currency must be a 3-letter code, got '{}'",
                params.currency
            )));
        }
        if params.owner_user_id.trim().is_empty() {
            return Err(LedgerError::InvalidAccount("owner_user_id is required".into()));
        }
        if params.initial_balance < Decimal::ZERO {
            return Err(LedgerError::InvalidAccount(
                "initial balance must not be negative".into(),
            ));
        }

        let mut last_err = None;
        for _ in 0..MAX_IBAN_DRAWS {
            let iban = self
                .generator
                .generate_default()
                .map_err(|e| LedgerError::InvalidAccount(e.to_string()))?;
            let account = Account::new(
                AccountId::new(),
                iban,
                currency.clone(),
                params.initial_balance,
                params.owner_user_id.trim(),
            );

            match self.store.create(account).await {
                Ok(created) => {
                    info!(
                        account_id = %created.id,
                        iban = %created.iban,
                        currency = %created.currency,
                        "Account opened"
                    );
                    return Ok(created);
                }
                Err(LedgerError::AlreadyExists(detail)) => {
                    warn!(detail = %detail, "IBAN collision, drawing again");
                    last_err = Some(LedgerError::AlreadyExists(detail));
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| LedgerError::AlreadyExists("iban".into())))
    }

    pub async fn get(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.store.get(id).await
    }

    pub async fn list(&self) -> Result<Vec<Account>, LedgerError> {
        self.store.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedgerStore;

    fn service() -> AccountService {
        AccountService::with_generator(
            Arc::new(InMemoryLedgerStore::new()),
            IbanGenerator::with_seed(21),
        )
    }

    #[tokio::test]
    async fn test_open_account() {
        let svc = service();
        let acc = svc
            .open(OpenAccount {
                currency: "try".into(),
                owner_user_id: "user-9".into(),
                initial_balance: Decimal::new(12_550, 2),
            })
            .await
            .unwrap();

        assert_eq!(acc.currency, "TRY");
        assert_eq!(acc.version, 0);
        assert!(acc.iban.has_valid_checksum());
        assert_eq!(svc.get(acc.id).await.unwrap(), acc);
        assert_eq!(svc.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_rejects_bad_input() {
        let svc = service();
        let bad_currency = svc
            .open(OpenAccount {
                currency: "LIRA".into(),
                owner_user_id: "u".into(),
                initial_balance: Decimal::ZERO,
            })
            .await;
        assert!(matches!(bad_currency, Err(LedgerError::InvalidAccount(_))));

        let negative = svc
            .open(OpenAccount {
                currency: "TRY".into(),
                owner_user_id: "u".into(),
                initial_balance: Decimal::NEGATIVE_ONE,
            })
            .await;
        assert!(matches!(negative, Err(LedgerError::InvalidAccount(_))));
        assert!(svc.list().await.unwrap().is_empty());
    }
}
