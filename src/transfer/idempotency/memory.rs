use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{Claim, GuardError, IdempotencyGuard, lease_deadline};
use crate::core_types::IdempotencyKey;
use crate::transfer::state::TransferState;
use crate::transfer::types::{ClaimToken, TransferOutcome, TransferRecord, TransferRequest};

/// Process-local journal. Survives nothing; for tests and the dev profile.
#[derive(Default)]
pub struct InMemoryIdempotencyGuard {
    records: DashMap<IdempotencyKey, TransferRecord>,
}

impl InMemoryIdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Test hook: pretend the current owner's lease ran out `ago` in the past
    pub fn expire_lease(&self, key: &IdempotencyKey, ago: Duration) {
        if let Some(mut record) = self.records.get_mut(key) {
            let ago = chrono::Duration::from_std(ago).unwrap_or(chrono::Duration::zero());
            let now = Utc::now();
            record.lease_until = Some(now - ago);
            record.updated_at = now - ago;
        }
    }
}

fn is_open(record: &TransferRecord, token: ClaimToken) -> bool {
    record.owner == Some(token)
        && !record.state.is_terminal()
        && record.state != TransferState::CriticalInconsistency
}

#[async_trait]
impl IdempotencyGuard for InMemoryIdempotencyGuard {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn lookup(&self, key: &IdempotencyKey) -> Result<Option<TransferOutcome>, GuardError> {
        Ok(self.records.get(key).and_then(|r| r.outcome()))
    }

    async fn get(&self, key: &IdempotencyKey) -> Result<Option<TransferRecord>, GuardError> {
        Ok(self.records.get(key).map(|r| r.clone()))
    }

    async fn claim(
        &self,
        req: &TransferRequest,
        token: ClaimToken,
        lease: Duration,
    ) -> Result<Claim, GuardError> {
        let now = Utc::now();
        match self.records.entry(req.idempotency_key.clone()) {
            Entry::Vacant(slot) => {
                let record = TransferRecord::claimed(req, token, lease_deadline(now, lease));
                slot.insert(record.clone());
                Ok(Claim::Acquired(record))
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                if !record.matches(req) {
                    return Err(GuardError::KeyMismatch(req.idempotency_key.clone()));
                }
                if let Some(outcome) = record.outcome() {
                    return Ok(Claim::Finished(outcome));
                }
                if record.state == TransferState::CriticalInconsistency {
                    return Ok(Claim::Quarantined);
                }
                if record.owner == Some(token) || record.lease_expired(now) {
                    record.owner = Some(token);
                    record.lease_until = Some(lease_deadline(now, lease));
                    record.attempts += 1;
                    record.updated_at = now;
                    return Ok(Claim::Acquired(record.clone()));
                }
                Ok(Claim::Busy {
                    lease_until: record.lease_until.unwrap_or(now),
                })
            }
        }
    }

    async fn advance(
        &self,
        key: &IdempotencyKey,
        token: ClaimToken,
        state: TransferState,
        lease: Duration,
    ) -> Result<(), GuardError> {
        let mut record = self
            .records
            .get_mut(key)
            .ok_or_else(|| GuardError::LeaseLost(key.clone()))?;
        if !is_open(&record, token) {
            return Err(GuardError::LeaseLost(key.clone()));
        }
        let now = Utc::now();
        record.state = state;
        record.lease_until = Some(lease_deadline(now, lease));
        record.updated_at = now;
        Ok(())
    }

    async fn release(&self, key: &IdempotencyKey, token: ClaimToken) -> Result<(), GuardError> {
        if self.records.remove_if(key, |_, r| is_open(r, token)).is_some() {
            return Ok(());
        }
        match self.records.get(key) {
            None => Ok(()),
            Some(_) => Err(GuardError::LeaseLost(key.clone())),
        }
    }

    async fn record(
        &self,
        token: ClaimToken,
        outcome: &TransferOutcome,
    ) -> Result<TransferOutcome, GuardError> {
        let key = &outcome.idempotency_key;
        let mut record = self
            .records
            .get_mut(key)
            .ok_or_else(|| GuardError::LeaseLost(key.clone()))?;

        if let Some(existing) = record.outcome() {
            if existing.same_verdict(outcome) {
                return Ok(existing);
            }
            return Err(GuardError::Conflict {
                key: key.clone(),
                existing: existing.status,
            });
        }
        if !is_open(&record, token) {
            return Err(GuardError::LeaseLost(key.clone()));
        }

        record.state = outcome.terminal_state();
        record.reason = outcome.reason;
        record.applied_at = Some(outcome.applied_at);
        record.owner = None;
        record.lease_until = None;
        record.updated_at = Utc::now();
        Ok(outcome.clone())
    }

    async fn quarantine(
        &self,
        key: &IdempotencyKey,
        token: ClaimToken,
        detail: &str,
    ) -> Result<(), GuardError> {
        let mut record = self
            .records
            .get_mut(key)
            .ok_or_else(|| GuardError::LeaseLost(key.clone()))?;
        if !is_open(&record, token) {
            return Err(GuardError::LeaseLost(key.clone()));
        }
        record.state = TransferState::CriticalInconsistency;
        record.detail = Some(detail.to_string());
        record.owner = None;
        record.lease_until = None;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn find_stale(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, GuardError> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());
        let mut stale: Vec<TransferRecord> = self
            .records
            .iter()
            .filter(|r| {
                !r.state.is_terminal()
                    && r.state != TransferState::CriticalInconsistency
                    && r.lease_expired(now)
                    && r.updated_at <= cutoff
            })
            .map(|r| r.clone())
            .collect();
        stale.sort_by_key(|r| r.updated_at);
        stale.truncate(limit);
        Ok(stale)
    }
}
