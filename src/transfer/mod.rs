//! Transfer FSM
//!
//! Moves value between two ledger accounts with at-most-once application
//! under concurrent and duplicated requests.
//!
//! # State Machine
//!
//! ```text
//! RECEIVED → VALIDATING → RESOLVING → CHECKING_FUNDS → MUTATING_DEBIT → MUTATING_CREDIT → COMMITTED
//!                 ↓            ↓             ↓ ↑               ↓                  ↓
//!              REJECTED     REJECTED      REJECTED ←──────────┘            COMPENSATING → REJECTED
//!                                                                                ↓
//!                                                                     CRITICAL_INCONSISTENCY
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Persist-Before-Call**: the journal records `MUTATING_*` before the
//!    matching ledger write is attempted
//! 2. **Stamped Legs**: every balance change carries a posting for its leg,
//!    so a replayed write is refused instead of applied twice
//! 3. **No Rollback Past Debit**: once the debit lands the transfer ends in
//!    `COMMITTED`, `REJECTED` (refunded) or `CRITICAL_INCONSISTENCY`
//! 4. **Write-Once Outcome**: a terminal outcome never changes

pub mod cancel;
pub mod coordinator;
pub mod error;
pub mod idempotency;
pub mod retry;
pub mod state;
pub mod types;
pub mod worker;


pub use cancel::CancelSignal;
pub use coordinator::{MAX_AMOUNT_SCALE, TransferCoordinator};
pub use error::TransferError;
pub use idempotency::{
    Claim, GuardError, IdempotencyGuard, InMemoryIdempotencyGuard, PgIdempotencyGuard,
};
pub use retry::RetryPolicy;
pub use state::TransferState;
pub use types::{
    ClaimToken, OutcomeStatus, RejectReason, TransferOutcome, TransferRecord, TransferRequest,
};
pub use worker::{RecoveryWorker, WorkerConfig};
