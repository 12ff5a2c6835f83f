//! HTTP handlers

pub mod account;
pub mod health;
pub mod transfer;

pub use account::{get_account, list_accounts, open_account};
pub use health::{HealthResponse, health_check};
pub use transfer::{create_transfer, create_transfer_async, get_transfer};
