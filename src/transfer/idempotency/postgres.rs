//! PostgreSQL idempotency journal
//!
//! Claim is `INSERT .. ON CONFLICT DO NOTHING` followed by a conditional
//! takeover `UPDATE`; every owner-scoped write carries `owner_token` in its
//! `WHERE` clause, the same CAS shape as the state updates elsewhere.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::{Claim, GuardError, IdempotencyGuard};
use crate::core_types::IdempotencyKey;
use crate::db::SafeRow;
use crate::ledger::Iban;
use crate::transfer::state::TransferState;
use crate::transfer::types::{
    ClaimToken, RejectReason, TransferOutcome, TransferRecord, TransferRequest,
};

const RECORD_COLUMNS: &str = "idempotency_key, from_iban, to_iban, amount, state, reason, \
     owner_token, lease_until, attempts, created_at, updated_at, applied_at";

/// States a record can no longer leave through the normal flow
const CLOSED_STATES: &str = "(40, -10, -99)";

/// Claim races (insert vs. concurrent release) settle within a few rounds
const MAX_CLAIM_ROUNDS: usize = 3;

pub struct PgIdempotencyGuard {
    pool: PgPool,
}

impl PgIdempotencyGuard {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &PgRow) -> Result<TransferRecord, GuardError> {
        let key: String = row.try_get("idempotency_key")?;
        let state_id: i16 = row.try_get("state")?;
        let state = TransferState::from_id(state_id)
            .ok_or_else(|| GuardError::Database(format!("unknown state {}", state_id)))?;
        let reason_text: Option<String> = row.try_get("reason")?;
        let owner: Option<String> = row.try_get("owner_token")?;
        let attempts: i32 = row.try_get("attempts")?;

        let (reason, detail) = match state {
            TransferState::CriticalInconsistency => (None, reason_text),
            _ => (reason_text.as_deref().and_then(RejectReason::from_code), None),
        };

        Ok(TransferRecord {
            idempotency_key: IdempotencyKey::parse(&key)
                .ok_or_else(|| GuardError::Database(format!("bad idempotency key {}", key)))?,
            from_iban: row.try_get("from_iban")?,
            to_iban: row.try_get("to_iban")?,
            amount: row.try_get("amount")?,
            state,
            reason,
            detail,
            owner: owner.and_then(|t| t.parse().ok()),
            lease_until: row.try_get_log::<Option<DateTime<Utc>>>("lease_until").flatten(),
            attempts: attempts.max(0) as u32,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            applied_at: row.try_get_log::<Option<DateTime<Utc>>>("applied_at").flatten(),
        })
    }

    async fn fetch(&self, key: &IdempotencyKey) -> Result<Option<TransferRecord>, GuardError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transfer_journal_tb WHERE idempotency_key = $1",
            RECORD_COLUMNS
        ))
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }
}

fn lease_ms(lease: Duration) -> i64 {
    lease.as_millis().min(i64::MAX as u128) as i64
}

#[async_trait]
impl IdempotencyGuard for PgIdempotencyGuard {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn lookup(&self, key: &IdempotencyKey) -> Result<Option<TransferOutcome>, GuardError> {
        Ok(self.fetch(key).await?.and_then(|r| r.outcome()))
    }

    async fn get(&self, key: &IdempotencyKey) -> Result<Option<TransferRecord>, GuardError> {
        self.fetch(key).await
    }

    async fn claim(
        &self,
        req: &TransferRequest,
        token: ClaimToken,
        lease: Duration,
    ) -> Result<Claim, GuardError> {
        for _ in 0..MAX_CLAIM_ROUNDS {
            let inserted = sqlx::query(&format!(
                r#"
                INSERT INTO transfer_journal_tb
                    (idempotency_key, from_iban, to_iban, amount, state, owner_token, lease_until)
                VALUES ($1, $2, $3, $4, $5, $6, NOW() + $7::float8 * INTERVAL '1 millisecond')
                ON CONFLICT (idempotency_key) DO NOTHING
                RETURNING {}
                "#,
                RECORD_COLUMNS
            ))
            .bind(req.idempotency_key.as_str())
            .bind(Iban::canonical(&req.from_iban))
            .bind(Iban::canonical(&req.to_iban))
            .bind(req.amount)
            .bind(TransferState::Received.id())
            .bind(token.to_string())
            .bind(lease_ms(lease))
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = inserted {
                return Ok(Claim::Acquired(Self::row_to_record(&row)?));
            }

            let taken_over = sqlx::query(&format!(
                r#"
                UPDATE transfer_journal_tb
                SET owner_token = $1,
                    lease_until = NOW() + $2::float8 * INTERVAL '1 millisecond',
                    attempts = attempts + 1,
                    updated_at = NOW()
                WHERE idempotency_key = $3
                  AND from_iban = $4 AND to_iban = $5 AND amount = $6
                  AND state NOT IN {}
                  AND (owner_token = $1 OR lease_until IS NULL OR lease_until <= NOW())
                RETURNING {}
                "#,
                CLOSED_STATES, RECORD_COLUMNS
            ))
            .bind(token.to_string())
            .bind(lease_ms(lease))
            .bind(req.idempotency_key.as_str())
            .bind(Iban::canonical(&req.from_iban))
            .bind(Iban::canonical(&req.to_iban))
            .bind(req.amount)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = taken_over {
                return Ok(Claim::Acquired(Self::row_to_record(&row)?));
            }

            let Some(record) = self.fetch(&req.idempotency_key).await? else {
                // Released between our insert and our read; go again
                continue;
            };
            if !record.matches(req) {
                return Err(GuardError::KeyMismatch(req.idempotency_key.clone()));
            }
            if let Some(outcome) = record.outcome() {
                return Ok(Claim::Finished(outcome));
            }
            if record.state == TransferState::CriticalInconsistency {
                return Ok(Claim::Quarantined);
            }
            match record.lease_until {
                Some(lease_until) => return Ok(Claim::Busy { lease_until }),
                None => continue,
            }
        }

        Err(GuardError::Database(format!(
            "claim on {} did not settle",
            req.idempotency_key
        )))
    }

    async fn advance(
        &self,
        key: &IdempotencyKey,
        token: ClaimToken,
        state: TransferState,
        lease: Duration,
    ) -> Result<(), GuardError> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE transfer_journal_tb
            SET state = $1,
                lease_until = NOW() + $2::float8 * INTERVAL '1 millisecond',
                updated_at = NOW()
            WHERE idempotency_key = $3 AND owner_token = $4 AND state NOT IN {}
            "#,
            CLOSED_STATES
        ))
        .bind(state.id())
        .bind(lease_ms(lease))
        .bind(key.as_str())
        .bind(token.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GuardError::LeaseLost(key.clone()));
        }
        Ok(())
    }

    async fn release(&self, key: &IdempotencyKey, token: ClaimToken) -> Result<(), GuardError> {
        let result = sqlx::query(&format!(
            "DELETE FROM transfer_journal_tb \
             WHERE idempotency_key = $1 AND owner_token = $2 AND state NOT IN {}",
            CLOSED_STATES
        ))
        .bind(key.as_str())
        .bind(token.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && self.fetch(key).await?.is_some() {
            return Err(GuardError::LeaseLost(key.clone()));
        }
        Ok(())
    }

    async fn record(
        &self,
        token: ClaimToken,
        outcome: &TransferOutcome,
    ) -> Result<TransferOutcome, GuardError> {
        let key = &outcome.idempotency_key;
        let updated = sqlx::query(&format!(
            r#"
            UPDATE transfer_journal_tb
            SET state = $1, reason = $2, applied_at = $3,
                owner_token = NULL, lease_until = NULL, updated_at = NOW()
            WHERE idempotency_key = $4 AND owner_token = $5 AND state NOT IN {}
            "#,
            CLOSED_STATES
        ))
        .bind(outcome.terminal_state().id())
        .bind(outcome.reason.map(|r| r.code()))
        .bind(outcome.applied_at)
        .bind(key.as_str())
        .bind(token.to_string())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(outcome.clone());
        }

        match self.fetch(key).await?.and_then(|r| r.outcome()) {
            Some(existing) if existing.same_verdict(outcome) => Ok(existing),
            Some(existing) => Err(GuardError::Conflict {
                key: key.clone(),
                existing: existing.status,
            }),
            None => Err(GuardError::LeaseLost(key.clone())),
        }
    }

    async fn quarantine(
        &self,
        key: &IdempotencyKey,
        token: ClaimToken,
        detail: &str,
    ) -> Result<(), GuardError> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE transfer_journal_tb
            SET state = $1, reason = $2, owner_token = NULL, lease_until = NULL, updated_at = NOW()
            WHERE idempotency_key = $3 AND owner_token = $4 AND state NOT IN {}
            "#,
            CLOSED_STATES
        ))
        .bind(TransferState::CriticalInconsistency.id())
        .bind(detail)
        .bind(key.as_str())
        .bind(token.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GuardError::LeaseLost(key.clone()));
        }
        Ok(())
    }

    async fn find_stale(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, GuardError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM transfer_journal_tb
            WHERE state NOT IN {}
              AND (lease_until IS NULL OR lease_until < NOW())
              AND updated_at < NOW() - $1::float8 * INTERVAL '1 millisecond'
            ORDER BY updated_at
            LIMIT $2
            "#,
            RECORD_COLUMNS, CLOSED_STATES
        ))
        .bind(lease_ms(older_than))
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }
}
