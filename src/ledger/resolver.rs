//! IBAN → account id resolution
//!
//! IBANs are assigned once and never reused, so positive answers are cached
//! forever. Misses always go to the store: an account created a moment ago
//! becomes resolvable on the next call.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{Instrument, Span, debug, debug_span};

use super::iban::Iban;
use super::store::{LedgerError, LedgerStore};
use crate::core_types::AccountId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("No account for IBAN {0}")]
    NotFound(Iban),

    #[error(transparent)]
    Store(#[from] LedgerError),
}

pub struct IbanResolver {
    store: Arc<dyn LedgerStore>,
    cache: DashMap<Iban, AccountId>,
    timeout: Duration,
    span: Span,
}

impl IbanResolver {
    pub fn new(store: Arc<dyn LedgerStore>, timeout: Duration) -> Self {
        Self::with_span(store, timeout, Span::none())
    }

    pub fn with_span(store: Arc<dyn LedgerStore>, timeout: Duration, span: Span) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            timeout,
            span,
        }
    }

    pub async fn resolve(&self, iban: &Iban) -> Result<AccountId, ResolveError> {
        if let Some(id) = self.cache.get(iban) {
            return Ok(*id);
        }

        let span = debug_span!(parent: &self.span, "resolve_iban", iban = %iban);
        self.lookup(iban).instrument(span).await
    }

    async fn lookup(&self, iban: &Iban) -> Result<AccountId, ResolveError> {
        let found = tokio::time::timeout(self.timeout, self.store.find_by_iban(iban))
            .await
            .map_err(|_| LedgerError::Timeout("find_by_iban"))??;

        match found {
            Some(account) => {
                self.cache.insert(iban.clone(), account.id);
                debug!(account_id = %account.id, "IBAN resolved");
                Ok(account.id)
            }
            None => {
                debug!("IBAN not found");
                Err(ResolveError::NotFound(iban.clone()))
            }
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
