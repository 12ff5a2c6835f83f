//! PostgreSQL ledger store
//!
//! Conditional update and posting insert run in one transaction; the posting
//! primary key `(idempotency_key, slot)` is what makes a leg single-shot.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::iban::Iban;
use super::models::Account;
use super::store::{LedgerError, LedgerStore, Leg, Posting};
use crate::core_types::{AccountId, IdempotencyKey};

const ACCOUNT_COLUMNS: &str =
    "account_id, iban, currency, balance, owner_user_id, version, created_at, updated_at";

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_account(row: &PgRow) -> Result<Account, LedgerError> {
        let id: String = row.try_get("account_id")?;
        let iban: String = row.try_get("iban")?;
        let version: i64 = row.try_get("version")?;

        Ok(Account {
            id: id
                .parse()
                .map_err(|e| LedgerError::Database(format!("bad account_id {}: {}", id, e)))?,
            iban: Iban::parse(&iban)
                .map_err(|e| LedgerError::Database(format!("bad iban {}: {}", iban, e)))?,
            currency: row.try_get("currency")?,
            balance: row.try_get("balance")?,
            owner_user_id: row.try_get("owner_user_id")?,
            version: version as u64,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn get(&self, id: AccountId) -> Result<Account, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts_tb WHERE account_id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_account(&row),
            None => Err(LedgerError::NotFound(id)),
        }
    }

    async fn find_by_iban(&self, iban: &Iban) -> Result<Option<Account>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts_tb WHERE iban = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(iban.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    async fn create(&self, account: Account) -> Result<Account, LedgerError> {
        if account.balance < Decimal::ZERO {
            return Err(LedgerError::InvalidAccount(
                "initial balance must not be negative".into(),
            ));
        }

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO accounts_tb
                (account_id, iban, currency, balance, owner_user_id, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(account.id.to_string())
        .bind(account.iban.as_str())
        .bind(&account.currency)
        .bind(account.balance)
        .bind(&account.owner_user_id)
        .bind(account.version as i64)
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_account(&row)
    }

    async fn conditional_update(
        &self,
        id: AccountId,
        expected_version: u64,
        new_balance: Decimal,
        posting: &Posting,
    ) -> Result<Account, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<i16> = sqlx::query_scalar(
            "SELECT leg FROM ledger_postings_tb WHERE idempotency_key = $1 AND slot = $2",
        )
        .bind(posting.key.as_str())
        .bind(posting.leg.slot())
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(leg) = existing.and_then(Leg::from_id) {
            return Err(LedgerError::AlreadyPosted(leg));
        }

        if new_balance < Decimal::ZERO {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM accounts_tb WHERE account_id = $1")
                    .bind(id.to_string())
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(match actual {
                None => LedgerError::NotFound(id),
                Some(v) if v as u64 != expected_version => LedgerError::VersionConflict {
                    account: id,
                    expected: expected_version,
                    actual: v as u64,
                },
                Some(_) => LedgerError::NegativeBalance(id),
            });
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE accounts_tb
            SET balance = $1, version = version + 1, updated_at = NOW()
            WHERE account_id = $2 AND version = $3
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(new_balance)
        .bind(id.to_string())
        .bind(expected_version as i64)
        .fetch_optional(&mut *tx)
        .await?;

        let account = match row {
            Some(row) => Self::row_to_account(&row)?,
            None => {
                let actual: Option<i64> =
                    sqlx::query_scalar("SELECT version FROM accounts_tb WHERE account_id = $1")
                        .bind(id.to_string())
                        .fetch_optional(&mut *tx)
                        .await?;
                return Err(match actual {
                    Some(v) => LedgerError::VersionConflict {
                        account: id,
                        expected: expected_version,
                        actual: v as u64,
                    },
                    None => LedgerError::NotFound(id),
                });
            }
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO ledger_postings_tb (idempotency_key, slot, leg, account_id, amount)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (idempotency_key, slot) DO NOTHING
            "#,
        )
        .bind(posting.key.as_str())
        .bind(posting.leg.slot())
        .bind(posting.leg.id())
        .bind(id.to_string())
        .bind(posting.amount)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            // A concurrent attempt won the slot after our first check
            tx.rollback().await?;
            let winner: Option<i16> = sqlx::query_scalar(
                "SELECT leg FROM ledger_postings_tb WHERE idempotency_key = $1 AND slot = $2",
            )
            .bind(posting.key.as_str())
            .bind(posting.leg.slot())
            .fetch_optional(&self.pool)
            .await?;
            return Err(LedgerError::AlreadyPosted(
                winner.and_then(Leg::from_id).unwrap_or(posting.leg),
            ));
        }

        tx.commit().await?;
        Ok(account)
    }

    async fn postings(&self, key: &IdempotencyKey) -> Result<Vec<Leg>, LedgerError> {
        let legs: Vec<i16> = sqlx::query_scalar(
            "SELECT leg FROM ledger_postings_tb WHERE idempotency_key = $1 ORDER BY slot",
        )
        .bind(key.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(legs.into_iter().filter_map(Leg::from_id).collect())
    }

    async fn list(&self) -> Result<Vec<Account>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM accounts_tb ORDER BY created_at, account_id",
            ACCOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_account).collect()
    }
}
