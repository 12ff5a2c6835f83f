//! kc_bank - Ledger-style funds-transfer core
//!
//! Moves money between two accounts identified by IBAN so that every
//! transfer either fully applies or fully does not, exactly once per
//! idempotency key, under concurrent requests and redelivered messages.
//!
//! # Modules
//!
//! - [`core_types`] - Account ids and idempotency keys
//! - [`ledger`] - Accounts, the optimistic-concurrency store, IBAN resolution
//! - [`transfer`] - Transfer FSM coordinator, idempotency guard, recovery
//! - [`queue`] - At-least-once transfer queue and its consumer pool
//! - [`gateway`] - HTTP API
//! - [`db`] - PostgreSQL pool and schema
//! - [`config`] / [`logging`] - Process setup

// Core types - must be first!
pub mod core_types;

pub mod config;
pub mod db;
pub mod gateway;
pub mod ledger;
pub mod logging;
pub mod queue;
pub mod transfer;

// Convenient re-exports at crate root
pub use core_types::{AccountId, IdempotencyKey};
pub use ledger::{Account, AccountService, Iban, IbanResolver, LedgerError, LedgerStore};
pub use queue::{TransferConsumer, TransferQueue};
pub use transfer::{
    CancelSignal, RecoveryWorker, TransferCoordinator, TransferError, TransferOutcome,
    TransferRequest,
};
