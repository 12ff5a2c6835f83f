//! Core types used throughout the system
//!
//! Identifiers shared by the ledger, the idempotency journal and the queue.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::Iban;

/// Account ID - opaque, stable, never reused.
///
/// Ordering is significant: transfers read the two accounts of a pair in
/// ascending `AccountId` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for AccountId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Namespace for content-derived idempotency keys
const IDEMPOTENCY_NAMESPACE: Uuid = Uuid::from_u128(0x6b63_2d62_616e_6b2d_7472_616e_7366_6572);

/// Longest client-supplied key we accept
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Idempotency key - binds every delivery of one logical transfer together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Fresh random key, used once per synchronous request
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Deterministic key from request content plus an optional caller token.
    ///
    /// IBANs and the amount are normalized first, so `tr12 0006...` and
    /// `TR120006...` collide, as do `10` and `10.00`.
    pub fn derive(from_iban: &str, to_iban: &str, amount: Decimal, token: Option<&str>) -> Self {
        let material = format!(
            "{}|{}|{}|{}",
            Iban::canonical(from_iban),
            Iban::canonical(to_iban),
            amount.normalize(),
            token.unwrap_or("")
        );
        Self(Uuid::new_v5(&IDEMPOTENCY_NAMESPACE, material.as_bytes()).to_string())
    }

    /// Accept a key produced elsewhere (queue payloads, status lookups)
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty()
            || raw.len() > MAX_IDEMPOTENCY_KEY_LEN
            || !raw.chars().all(|c| c.is_ascii_graphic())
        {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
