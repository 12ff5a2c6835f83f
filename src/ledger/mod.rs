//! Account ledger
//!
//! Account records, the storage contract behind them and IBAN handling.
//!
//! # Mutation rule
//!
//! A balance changes only through `conditional_update`: compare the stored
//! `version`, write the new balance, bump the version and stamp the transfer
//! leg, all or nothing. There is no lock held across calls; callers re-read
//! and retry on `VersionConflict`.

pub mod accounts;
pub mod iban;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod resolver;
pub mod store;

#[cfg(test)]
pub mod faulty;

pub use accounts::{AccountService, OpenAccount};
pub use iban::{Iban, IbanError, IbanGenerator};
pub use memory::InMemoryLedgerStore;
pub use models::Account;
pub use postgres::PgLedgerStore;
pub use resolver::{IbanResolver, ResolveError};
pub use store::{LedgerError, LedgerStore, Leg, Posting};
