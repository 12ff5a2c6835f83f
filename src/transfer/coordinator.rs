//! Transfer Coordinator
//!
//! Drives one transfer through the FSM. Synchronous callers, queue consumers
//! and the recovery worker all come through here.
//!
//! The ledger's posting stamps are the source of truth for which legs have
//! landed; the journal state is only a hint for where to resume. The journal
//! is advanced before each mutating call (persist-before-call), so a crash
//! mid-call leaves a record the recovery worker will pick up.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use super::cancel::CancelSignal;
use super::error::TransferError;
use super::idempotency::{Claim, GuardError, IdempotencyGuard};
use super::retry::RetryPolicy;
use super::state::TransferState;
use super::types::{ClaimToken, RejectReason, TransferOutcome, TransferRecord, TransferRequest};
use crate::config::TransferConfig;
use crate::core_types::{AccountId, IdempotencyKey};
use crate::ledger::{
    Account, Iban, IbanResolver, LedgerError, LedgerStore, Leg, Posting, ResolveError,
};

/// Amounts are stored as NUMERIC(38, 8)
pub const MAX_AMOUNT_SCALE: u32 = 8;

/// The refund gets more room than the forward legs before we give up on it
const COMPENSATION_ATTEMPT_FACTOR: u32 = 2;

pub struct TransferCoordinator {
    ledger: Arc<dyn LedgerStore>,
    guard: Arc<dyn IdempotencyGuard>,
    resolver: IbanResolver,
    retry: RetryPolicy,
    store_timeout: Duration,
    claim_lease: Duration,
    span: Span,
}

impl TransferCoordinator {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        guard: Arc<dyn IdempotencyGuard>,
        config: &TransferConfig,
    ) -> Self {
        Self::with_span(ledger, guard, config, Span::none())
    }

    pub fn with_span(
        ledger: Arc<dyn LedgerStore>,
        guard: Arc<dyn IdempotencyGuard>,
        config: &TransferConfig,
        span: Span,
    ) -> Self {
        let resolver = IbanResolver::with_span(ledger.clone(), config.store_timeout(), span.clone());
        Self {
            ledger,
            guard,
            resolver,
            retry: RetryPolicy::from(config),
            store_timeout: config.store_timeout(),
            claim_lease: config.claim_lease(),
            span,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub fn guard(&self) -> &Arc<dyn IdempotencyGuard> {
        &self.guard
    }

    /// Run a transfer to a terminal outcome.
    ///
    /// `Ok` carries both applied and rejected outcomes; `Err` means no
    /// terminal outcome exists yet (or the transfer is quarantined).
    pub async fn execute(&self, req: TransferRequest) -> Result<TransferOutcome, TransferError> {
        self.execute_with_cancel(req, &CancelSignal::never()).await
    }

    /// As [`execute`](Self::execute), abandoning the transfer if `cancel`
    /// fires before the debit is applied
    pub async fn execute_with_cancel(
        &self,
        req: TransferRequest,
        cancel: &CancelSignal,
    ) -> Result<TransferOutcome, TransferError> {
        let span = info_span!(
            parent: &self.span,
            "transfer",
            idempotency_key = %req.idempotency_key,
            amount = %req.amount
        );
        async {
            match self.run(&req, cancel, true).await? {
                Some(outcome) => Ok(outcome),
                None => Err(TransferError::InProgress(req.idempotency_key.clone())),
            }
        }
        .instrument(span)
        .await
    }

    /// Run on a detached task. A dropped caller cannot abandon a transfer
    /// between its debit and its credit.
    pub fn spawn_execute(
        self: &Arc<Self>,
        req: TransferRequest,
    ) -> JoinHandle<Result<TransferOutcome, TransferError>> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.execute(req).await })
    }

    /// Pick up a stale journal record. `Ok(None)` when someone else holds a
    /// live claim on it.
    pub async fn resume(
        &self,
        record: &TransferRecord,
    ) -> Result<Option<TransferOutcome>, TransferError> {
        let req = record.request();
        let span = info_span!(
            parent: &self.span,
            "resume",
            idempotency_key = %req.idempotency_key,
            state = %record.state
        );
        self.run(&req, &CancelSignal::never(), false)
            .instrument(span)
            .await
    }

    /// Recorded terminal outcome, if any
    pub async fn outcome(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<TransferOutcome>, TransferError> {
        Ok(self.guard.lookup(key).await?)
    }

    /// Journal record, in-flight or terminal
    pub async fn status(&self, key: &IdempotencyKey) -> Result<TransferRecord, TransferError> {
        self.guard
            .get(key)
            .await?
            .ok_or_else(|| TransferError::NotFound(key.clone()))
    }

    async fn run(
        &self,
        req: &TransferRequest,
        cancel: &CancelSignal,
        wait_when_busy: bool,
    ) -> Result<Option<TransferOutcome>, TransferError> {
        let key = &req.idempotency_key;
        let token = ClaimToken::new();
        let deadline = Instant::now() + self.claim_lease + self.retry.max;
        let mut polls = 0u32;

        loop {
            match self.guard.claim(req, token, self.claim_lease).await? {
                Claim::Finished(outcome) => {
                    debug!(status = %outcome.status, "Returning recorded outcome");
                    return Ok(Some(outcome));
                }
                Claim::Quarantined => {
                    return Err(TransferError::CriticalInconsistency(key.clone()));
                }
                Claim::Busy { lease_until } => {
                    if !wait_when_busy {
                        return Ok(None);
                    }
                    if cancel.is_cancelled() {
                        return Err(TransferError::Cancelled);
                    }
                    if Instant::now() >= deadline {
                        return Err(TransferError::InProgress(key.clone()));
                    }
                    polls += 1;
                    let until_lease = (lease_until - Utc::now()).to_std().unwrap_or_default();
                    let pause = self
                        .retry
                        .backoff(polls)
                        .min(until_lease)
                        .max(Duration::from_millis(1));
                    debug!(polls, ?pause, "Claim held elsewhere, waiting");
                    tokio::select! {
                        _ = tokio::time::sleep(pause) => {}
                        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                    }
                }
                Claim::Acquired(record) => match self.drive(req, record, token, cancel).await {
                    // Lease lost mid-flight: the new owner finishes it, we wait
                    Err(TransferError::InProgress(_)) if wait_when_busy => continue,
                    other => return other.map(Some),
                },
            }
        }
    }

    async fn drive(
        &self,
        req: &TransferRequest,
        record: TransferRecord,
        token: ClaimToken,
        cancel: &CancelSignal,
    ) -> Result<TransferOutcome, TransferError> {
        let key = &req.idempotency_key;
        let fresh = record.state == TransferState::Received && record.attempts <= 1;
        if fresh {
            return self.start(req, token, cancel).await;
        }

        info!(
            state = %record.state,
            attempts = record.attempts,
            "Resuming transfer"
        );
        let legs = self.timed("postings", self.ledger.postings(key)).await?;

        if legs.contains(&Leg::Refund) {
            return self
                .finish(token, TransferOutcome::rejected(key, RejectReason::Contention))
                .await;
        }
        if legs.contains(&Leg::Credit) {
            return self.finish(token, TransferOutcome::applied(key)).await;
        }
        if !legs.contains(&Leg::Debit) {
            return self.start(req, token, cancel).await;
        }

        let (from_id, to_id) = self.resolve_existing(req).await?;
        let mut state = record.state;
        if state == TransferState::Compensating {
            self.compensate(req, token, &mut state, from_id, to_id).await
        } else {
            if !state.is_in_flight() {
                state = TransferState::MutatingDebit;
            }
            self.credit_phase(req, token, &mut state, from_id, to_id).await
        }
    }

    /// Validation, resolution and the debit, for a transfer nothing has
    /// touched yet
    async fn start(
        &self,
        req: &TransferRequest,
        token: ClaimToken,
        cancel: &CancelSignal,
    ) -> Result<TransferOutcome, TransferError> {
        let mut state = TransferState::Received;

        if cancel.is_cancelled() {
            self.release(&req.idempotency_key, token).await;
            return Err(TransferError::Cancelled);
        }

        self.enter(&mut state, TransferState::Validating);
        let from_iban = match Iban::parse(&req.from_iban) {
            Ok(iban) => iban,
            Err(e) => {
                debug!(error = %e, "Malformed source IBAN");
                return self
                    .reject(req, token, &mut state, RejectReason::UnknownSourceAccount)
                    .await;
            }
        };
        let to_iban = match Iban::parse(&req.to_iban) {
            Ok(iban) => iban,
            Err(e) => {
                debug!(error = %e, "Malformed target IBAN");
                return self
                    .reject(req, token, &mut state, RejectReason::UnknownTargetAccount)
                    .await;
            }
        };

        self.enter(&mut state, TransferState::Resolving);
        let from_id = match self.resolver.resolve(&from_iban).await {
            Ok(id) => id,
            Err(ResolveError::NotFound(_)) => {
                return self
                    .reject(req, token, &mut state, RejectReason::UnknownSourceAccount)
                    .await;
            }
            Err(e) => {
                self.release(&req.idempotency_key, token).await;
                return Err(e.into());
            }
        };
        let to_id = match self.resolver.resolve(&to_iban).await {
            Ok(id) => id,
            Err(ResolveError::NotFound(_)) => {
                return self
                    .reject(req, token, &mut state, RejectReason::UnknownTargetAccount)
                    .await;
            }
            Err(e) => {
                self.release(&req.idempotency_key, token).await;
                return Err(e.into());
            }
        };

        if from_id == to_id {
            return self
                .reject(req, token, &mut state, RejectReason::SameAccount)
                .await;
        }
        if req.amount <= Decimal::ZERO || req.amount.normalize().scale() > MAX_AMOUNT_SCALE {
            return self
                .reject(req, token, &mut state, RejectReason::InvalidAmount)
                .await;
        }

        self.debit_phase(req, token, &mut state, from_id, to_id, cancel)
            .await
    }

    /// Writes the debit before the credit, whatever the id order of the
    /// pair; only reads follow ascending id order.
    async fn debit_phase(
        &self,
        req: &TransferRequest,
        token: ClaimToken,
        state: &mut TransferState,
        from_id: AccountId,
        to_id: AccountId,
        cancel: &CancelSignal,
    ) -> Result<TransferOutcome, TransferError> {
        let key = &req.idempotency_key;
        let amount = req.amount;
        // A timed-out or failed write may still have landed
        let mut maybe_applied = false;

        for attempt in 1..=self.retry.max_attempts {
            if cancel.is_cancelled() {
                return self
                    .give_up(req, token, state, from_id, to_id, maybe_applied, TransferError::Cancelled)
                    .await;
            }

            // A landed debit has already lowered the source balance
            if maybe_applied {
                match self.timed("postings", self.ledger.postings(key)).await {
                    Ok(legs) if legs.contains(&Leg::Debit) => {
                        info!(attempt, "Debit turned out to be applied, continuing");
                        self.enter(state, TransferState::MutatingDebit);
                        return self.credit_phase(req, token, state, from_id, to_id).await;
                    }
                    Ok(_) => {}
                    Err(e) if e.is_transient() => {
                        warn!(attempt, error = %e, "Debit postings read failed");
                        self.pause(attempt, Some(cancel)).await;
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "Cannot confirm debit state, leaving claim in place");
                        return Err(e.into());
                    }
                }
            }

            self.enter(state, TransferState::CheckingFunds);
            let (from, to) = match self.read_pair(from_id, to_id).await {
                Ok(pair) => pair,
                Err(e) if e.is_transient() => {
                    warn!(attempt, error = %e, "Account read failed");
                    self.pause(attempt, Some(cancel)).await;
                    continue;
                }
                Err(LedgerError::NotFound(id)) => {
                    let reason = if id == from_id {
                        RejectReason::UnknownSourceAccount
                    } else {
                        RejectReason::UnknownTargetAccount
                    };
                    return self.reject(req, token, state, reason).await;
                }
                Err(e) => {
                    return self
                        .give_up(req, token, state, from_id, to_id, maybe_applied, e.into())
                        .await;
                }
            };

            if from.currency != to.currency {
                return self
                    .reject(req, token, state, RejectReason::CurrencyMismatch)
                    .await;
            }
            let Some(debited) = from.balance.checked_sub(amount).filter(|b| *b >= Decimal::ZERO)
            else {
                debug!(balance = %from.balance, "Insufficient funds");
                return self
                    .reject(req, token, state, RejectReason::InsufficientFunds)
                    .await;
            };

            self.enter(state, TransferState::MutatingDebit);
            if let Err(e) = self
                .guard
                .advance(key, token, TransferState::MutatingDebit, self.claim_lease)
                .await
            {
                return self
                    .give_up(req, token, state, from_id, to_id, maybe_applied, e.into())
                    .await;
            }

            let posting = Posting::new(key, Leg::Debit, amount);
            match self
                .timed(
                    "conditional_update",
                    self.ledger
                        .conditional_update(from.id, from.version, debited, &posting),
                )
                .await
            {
                Ok(_) | Err(LedgerError::AlreadyPosted(_)) => {
                    debug!(from_account = %from_id, attempt, "Debit applied");
                    return self.credit_phase(req, token, state, from_id, to_id).await;
                }
                Err(LedgerError::NotFound(_)) => {
                    return self
                        .reject(req, token, state, RejectReason::UnknownSourceAccount)
                        .await;
                }
                Err(e @ (LedgerError::VersionConflict { .. } | LedgerError::NegativeBalance(_))) => {
                    debug!(attempt, error = %e, "Debit lost version race");
                }
                Err(e) if e.is_transient() => {
                    maybe_applied = true;
                    warn!(attempt, error = %e, "Debit outcome unknown, re-checking");
                }
                Err(e) => {
                    return self
                        .give_up(req, token, state, from_id, to_id, maybe_applied, e.into())
                        .await;
                }
            }

            if attempt < self.retry.max_attempts {
                self.pause(attempt, Some(cancel)).await;
            }
        }

        warn!(
            from_account = %from_id,
            to_account = %to_id,
            attempts = self.retry.max_attempts,
            "Debit retries exhausted"
        );
        self.give_up(
            req,
            token,
            state,
            from_id,
            to_id,
            maybe_applied,
            TransferError::Contention(key.clone()),
        )
        .await
    }

    /// Leave the transfer without a terminal outcome. The claim is released
    /// only once the ledger confirms no debit landed; otherwise the transfer
    /// continues with the credit.
    #[allow(clippy::too_many_arguments)]
    async fn give_up(
        &self,
        req: &TransferRequest,
        token: ClaimToken,
        state: &mut TransferState,
        from_id: AccountId,
        to_id: AccountId,
        maybe_applied: bool,
        err: TransferError,
    ) -> Result<TransferOutcome, TransferError> {
        let key = &req.idempotency_key;
        if maybe_applied {
            let legs = match self.timed("postings", self.ledger.postings(key)).await {
                Ok(legs) => legs,
                Err(e) => {
                    // Cannot tell; keep the claim and let its lease run out
                    warn!(error = %e, "Cannot confirm debit state, leaving claim in place");
                    return Err(e.into());
                }
            };
            if legs.contains(&Leg::Debit) {
                info!("Debit turned out to be applied, continuing");
                self.enter(state, TransferState::MutatingDebit);
                return self.credit_phase(req, token, state, from_id, to_id).await;
            }
        }

        self.release(key, token).await;
        Err(err)
    }

    async fn credit_phase(
        &self,
        req: &TransferRequest,
        token: ClaimToken,
        state: &mut TransferState,
        from_id: AccountId,
        to_id: AccountId,
    ) -> Result<TransferOutcome, TransferError> {
        let key = &req.idempotency_key;
        let amount = req.amount;

        self.enter(state, TransferState::MutatingCredit);
        self.advance_in_flight(key, token, TransferState::MutatingCredit)
            .await?;

        let posting = Posting::new(key, Leg::Credit, amount);
        for attempt in 1..=self.retry.max_attempts {
            let to = match self.timed("get", self.ledger.get(to_id)).await {
                Ok(account) => account,
                Err(e) if e.is_transient() => {
                    warn!(attempt, error = %e, "Credit account read failed");
                    self.pause(attempt, None).await;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Credit account unreadable");
                    break;
                }
            };
            let Some(credited) = to.balance.checked_add(amount) else {
                warn!(to_account = %to_id, "Credit would overflow");
                break;
            };

            match self
                .timed(
                    "conditional_update",
                    self.ledger
                        .conditional_update(to.id, to.version, credited, &posting),
                )
                .await
            {
                Ok(_) | Err(LedgerError::AlreadyPosted(Leg::Credit)) => {
                    self.enter(state, TransferState::Committed);
                    return self.finish(token, TransferOutcome::applied(key)).await;
                }
                Err(LedgerError::AlreadyPosted(_)) => {
                    // Refund already settled this debit
                    self.enter(state, TransferState::Compensating);
                    self.enter(state, TransferState::Rejected);
                    return self
                        .finish(token, TransferOutcome::rejected(key, RejectReason::Contention))
                        .await;
                }
                Err(e) if e.is_transient() || matches!(e, LedgerError::NegativeBalance(_)) => {
                    debug!(attempt, error = %e, "Credit attempt failed");
                }
                Err(e) => {
                    warn!(error = %e, "Credit refused");
                    break;
                }
            }

            if attempt < self.retry.max_attempts {
                self.pause(attempt, None).await;
            }
        }

        self.compensate(req, token, state, from_id, to_id).await
    }

    async fn compensate(
        &self,
        req: &TransferRequest,
        token: ClaimToken,
        state: &mut TransferState,
        from_id: AccountId,
        to_id: AccountId,
    ) -> Result<TransferOutcome, TransferError> {
        let key = &req.idempotency_key;
        let amount = req.amount;

        self.enter(state, TransferState::Compensating);
        warn!(
            from_account = %from_id,
            to_account = %to_id,
            amount = %amount,
            "Credit failed after debit, refunding"
        );
        self.advance_in_flight(key, token, TransferState::Compensating)
            .await?;

        let posting = Posting::new(key, Leg::Refund, amount);
        let max_attempts = self.retry.max_attempts * COMPENSATION_ATTEMPT_FACTOR;
        for attempt in 1..=max_attempts {
            let from = match self.timed("get", self.ledger.get(from_id)).await {
                Ok(account) => account,
                Err(e) if e.is_transient() => {
                    warn!(attempt, error = %e, "Refund account read failed");
                    self.pause(attempt, None).await;
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Refund account unreadable");
                    break;
                }
            };
            let Some(refunded) = from.balance.checked_add(amount) else {
                error!(from_account = %from_id, "Refund would overflow");
                break;
            };

            match self
                .timed(
                    "conditional_update",
                    self.ledger
                        .conditional_update(from.id, from.version, refunded, &posting),
                )
                .await
            {
                Ok(_) | Err(LedgerError::AlreadyPosted(Leg::Refund)) => {
                    info!(from_account = %from_id, "Debit refunded");
                    self.enter(state, TransferState::Rejected);
                    return self
                        .finish(token, TransferOutcome::rejected(key, RejectReason::Contention))
                        .await;
                }
                Err(LedgerError::AlreadyPosted(_)) => {
                    info!(to_account = %to_id, "Credit had landed after all");
                    self.enter(state, TransferState::Committed);
                    return self.finish(token, TransferOutcome::applied(key)).await;
                }
                Err(e) if e.is_transient() || matches!(e, LedgerError::NegativeBalance(_)) => {
                    warn!(attempt, error = %e, "Refund attempt failed");
                }
                Err(e) => {
                    error!(error = %e, "Refund refused");
                    break;
                }
            }

            if attempt < max_attempts {
                self.pause(attempt, None).await;
            }
        }

        self.enter(state, TransferState::CriticalInconsistency);
        error!(
            idempotency_key = %key,
            from_account = %from_id,
            to_account = %to_id,
            amount = %amount,
            "CRITICAL: refund exhausted with debit applied"
        );
        let detail = format!(
            "debit of {} from {} not refunded; credit to {} not applied",
            amount, from_id, to_id
        );
        if let Err(e) = self.guard.quarantine(key, token, &detail).await {
            error!(error = %e, "Failed to quarantine transfer");
        }
        Err(TransferError::CriticalInconsistency(key.clone()))
    }

    async fn reject(
        &self,
        req: &TransferRequest,
        token: ClaimToken,
        state: &mut TransferState,
        reason: RejectReason,
    ) -> Result<TransferOutcome, TransferError> {
        self.enter(state, TransferState::Rejected);
        self.finish(
            token,
            TransferOutcome::rejected(&req.idempotency_key, reason),
        )
        .await
    }

    async fn finish(
        &self,
        token: ClaimToken,
        outcome: TransferOutcome,
    ) -> Result<TransferOutcome, TransferError> {
        match self.guard.record(token, &outcome).await {
            Ok(stored) => {
                match stored.reason {
                    None => info!(status = %stored.status, "Transfer finished"),
                    Some(reason) => info!(status = %stored.status, reason = %reason, "Transfer finished"),
                }
                Ok(stored)
            }
            Err(GuardError::Conflict { key, existing }) => {
                error!(
                    idempotency_key = %key,
                    existing = %existing,
                    attempted = %outcome.status,
                    "Terminal outcome conflict"
                );
                Err(TransferError::Journal(format!(
                    "outcome for {} already recorded as {}",
                    key, existing
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// After the debit the transfer must reach a terminal state; a journal
    /// hiccup is logged and ignored, a lost lease hands the transfer over.
    async fn advance_in_flight(
        &self,
        key: &IdempotencyKey,
        token: ClaimToken,
        state: TransferState,
    ) -> Result<(), TransferError> {
        match self
            .guard
            .advance(key, token, state, self.claim_lease)
            .await
        {
            Ok(()) => Ok(()),
            Err(GuardError::LeaseLost(key)) => {
                warn!(state = %state, "Claim lost mid-flight, handing over");
                Err(TransferError::InProgress(key))
            }
            Err(e) => {
                warn!(state = %state, error = %e, "Journal advance failed, continuing");
                Ok(())
            }
        }
    }

    async fn release(&self, key: &IdempotencyKey, token: ClaimToken) {
        if let Err(e) = self.guard.release(key, token).await {
            warn!(error = %e, "Failed to release claim");
        }
    }

    async fn resolve_existing(
        &self,
        req: &TransferRequest,
    ) -> Result<(AccountId, AccountId), TransferError> {
        let resolve = |raw: &str| {
            Iban::parse(raw)
                .map_err(|e| TransferError::Store(format!("stored IBAN {} unreadable: {}", raw, e)))
        };
        let from_iban = resolve(&req.from_iban)?;
        let to_iban = resolve(&req.to_iban)?;
        let from_id = self.resolver.resolve(&from_iban).await?;
        let to_id = self.resolver.resolve(&to_iban).await?;
        Ok((from_id, to_id))
    }

    /// Read both accounts in ascending id order, return them as (from, to)
    async fn read_pair(
        &self,
        from_id: AccountId,
        to_id: AccountId,
    ) -> Result<(Account, Account), LedgerError> {
        let (first, second) = if from_id < to_id {
            (from_id, to_id)
        } else {
            (to_id, from_id)
        };
        let a = self.timed("get", self.ledger.get(first)).await?;
        let b = self.timed("get", self.ledger.get(second)).await?;
        Ok(if first == from_id { (a, b) } else { (b, a) })
    }

    async fn timed<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .unwrap_or(Err(LedgerError::Timeout(op)))
    }

    async fn pause(&self, attempt: u32, cancel: Option<&CancelSignal>) {
        let delay = self.retry.backoff(attempt);
        match cancel {
            Some(cancel) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }

    fn enter(&self, state: &mut TransferState, next: TransferState) {
        if *state == next {
            return;
        }
        if !state.can_transition_to(next) {
            warn!(from = %state, to = %next, "Unexpected state transition");
        }
        debug!(from = %state, to = %next, "state");
        *state = next;
    }
}
