use std::sync::Arc;

use crate::db::Database;
use crate::ledger::AccountService;
use crate::queue::TransferQueue;
use crate::transfer::TransferCoordinator;

/// Shared gateway state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<TransferCoordinator>,
    pub accounts: Arc<AccountService>,
    /// Target of `POST /transfers/async`
    pub queue: Arc<dyn TransferQueue>,
    /// Pinged by the health check when the stores are PostgreSQL-backed
    pub db: Option<Arc<Database>>,
}

impl AppState {
    pub fn new(
        coordinator: Arc<TransferCoordinator>,
        accounts: Arc<AccountService>,
        queue: Arc<dyn TransferQueue>,
    ) -> Self {
        Self {
            coordinator,
            accounts,
            queue,
            db: None,
        }
    }

    pub fn with_database(mut self, db: Arc<Database>) -> Self {
        self.db = Some(db);
        self
    }
}
