//! Fault-injecting ledger store wrapper for tests

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::iban::Iban;
use super::models::Account;
use super::store::{LedgerError, LedgerStore, Leg, Posting};
use crate::core_types::{AccountId, IdempotencyKey};

#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Reject with a version conflict, `remaining` more times (None = forever)
    Conflict { remaining: Option<usize> },
    /// Apply the write, then report a timeout to the caller
    TimeoutAfterApply,
}

pub struct FaultyLedgerStore {
    inner: Arc<dyn LedgerStore>,
    faults: Mutex<HashMap<Leg, Fault>>,
    get_delay: Mutex<Option<Duration>>,
    updates: AtomicUsize,
}

impl FaultyLedgerStore {
    pub fn new(inner: Arc<dyn LedgerStore>) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
            get_delay: Mutex::new(None),
            updates: AtomicUsize::new(0),
        }
    }

    pub fn fail_leg_always(&self, leg: Leg) {
        self.faults
            .lock()
            .unwrap()
            .insert(leg, Fault::Conflict { remaining: None });
    }

    pub fn fail_leg_times(&self, leg: Leg, times: usize) {
        self.faults.lock().unwrap().insert(
            leg,
            Fault::Conflict {
                remaining: Some(times),
            },
        );
    }

    /// Next update of `leg` lands but the caller sees a timeout
    pub fn timeout_after_apply(&self, leg: Leg) {
        self.faults
            .lock()
            .unwrap()
            .insert(leg, Fault::TimeoutAfterApply);
    }

    pub fn delay_gets(&self, delay: Duration) {
        *self.get_delay.lock().unwrap() = Some(delay);
    }

    pub fn clear(&self) {
        self.faults.lock().unwrap().clear();
        *self.get_delay.lock().unwrap() = None;
    }

    /// Conditional updates that reached the inner store
    pub fn applied_updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    fn take_fault(&self, leg: Leg) -> Option<Fault> {
        let mut faults = self.faults.lock().unwrap();
        match faults.get(&leg).copied() {
            Some(Fault::Conflict { remaining: None }) => Some(Fault::Conflict { remaining: None }),
            Some(Fault::Conflict {
                remaining: Some(n),
            }) => {
                if n <= 1 {
                    faults.remove(&leg);
                } else {
                    faults.insert(
                        leg,
                        Fault::Conflict {
                            remaining: Some(n - 1),
                        },
                    );
                }
                Some(Fault::Conflict { remaining: Some(n) })
            }
            Some(Fault::TimeoutAfterApply) => {
                faults.remove(&leg);
                Some(Fault::TimeoutAfterApply)
            }
            None => None,
        }
    }
}

#[async_trait]
impl LedgerStore for FaultyLedgerStore {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn get(&self, id: AccountId) -> Result<Account, LedgerError> {
        let delay = *self.get_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.get(id).await
    }

    async fn find_by_iban(&self, iban: &Iban) -> Result<Option<Account>, LedgerError> {
        self.inner.find_by_iban(iban).await
    }

    async fn create(&self, account: Account) -> Result<Account, LedgerError> {
        self.inner.create(account).await
    }

    async fn conditional_update(
        &self,
        id: AccountId,
        expected_version: u64,
        new_balance: Decimal,
        posting: &Posting,
    ) -> Result<Account, LedgerError> {
        match self.take_fault(posting.leg) {
            Some(Fault::Conflict { .. }) => Err(LedgerError::VersionConflict {
                account: id,
                expected: expected_version,
                actual: expected_version + 1,
            }),
            Some(Fault::TimeoutAfterApply) => {
                self.inner
                    .conditional_update(id, expected_version, new_balance, posting)
                    .await?;
                self.updates.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::Timeout("conditional_update"))
            }
            None => {
                let account = self
                    .inner
                    .conditional_update(id, expected_version, new_balance, posting)
                    .await?;
                self.updates.fetch_add(1, Ordering::SeqCst);
                Ok(account)
            }
        }
    }

    async fn postings(&self, key: &IdempotencyKey) -> Result<Vec<Leg>, LedgerError> {
        self.inner.postings(key).await
    }

    async fn list(&self) -> Result<Vec<Account>, LedgerError> {
        self.inner.list().await
    }
}
