//! Queue consumer worker pool
//!
//! Each worker pulls deliveries from its own stream and hands them to the
//! coordinator. A delivery is acked only after `execute` returned a terminal
//! outcome; anything else is nacked back or dead-lettered.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use super::{Delivery, Nack, TransferQueue};
use crate::config::QueueConfig;
use crate::transfer::{CancelSignal, OutcomeStatus, TransferCoordinator, TransferError};

/// What happened to one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked(OutcomeStatus),
    Requeued,
    DeadLettered,
}

pub struct TransferConsumer {
    queue: Arc<dyn TransferQueue>,
    coordinator: Arc<TransferCoordinator>,
    workers: usize,
    nack_delay: Duration,
    span: Span,
}

impl TransferConsumer {
    pub fn new(
        queue: Arc<dyn TransferQueue>,
        coordinator: Arc<TransferCoordinator>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            queue,
            coordinator,
            workers: config.workers.max(1),
            nack_delay: Duration::from_millis(config.nack_delay_ms),
            span: Span::none(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Run the worker pool until `shutdown` fires. A delivery already being
    /// processed is finished first.
    pub async fn run(self: Arc<Self>, shutdown: CancelSignal) {
        info!(
            queue = self.queue.name(),
            workers = self.workers,
            "Starting transfer consumers"
        );

        let handles: Vec<_> = (0..self.workers)
            .map(|worker| {
                let consumer = Arc::clone(&self);
                let shutdown = shutdown.clone();
                let span = info_span!(parent: &self.span, "consumer", worker);
                tokio::spawn(async move { consumer.work(shutdown).instrument(span).await })
            })
            .collect();

        for handle in futures::future::join_all(handles).await {
            if let Err(e) = handle {
                error!(error = %e, "Consumer worker panicked");
            }
        }

        info!("Transfer consumers stopped");
    }

    async fn work(&self, shutdown: CancelSignal) {
        let mut deliveries = self.queue.consume();
        loop {
            let next = tokio::select! {
                next = deliveries.next() => next,
                _ = shutdown.cancelled() => break,
            };
            match next {
                Some(Ok(delivery)) => {
                    self.handle(delivery).await;
                }
                Some(Err(e)) => warn!(error = %e, "Queue read failed"),
                None => {
                    info!("Queue closed");
                    break;
                }
            }
        }
    }

    /// Process one delivery and settle it
    pub async fn handle(&self, delivery: Delivery) -> Settlement {
        let req = match delivery.decode() {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "Undecodable message");
                return self
                    .settle(
                        delivery,
                        Nack::DeadLetter {
                            reason: e.to_string(),
                        },
                        Settlement::DeadLettered,
                    )
                    .await;
            }
        };

        let span = info_span!(
            parent: &self.span,
            "delivery",
            idempotency_key = %req.idempotency_key,
            attempt = delivery.attempt()
        );
        async {
            match self.coordinator.execute(req).await {
                Ok(outcome) => {
                    debug!(status = %outcome.status, "Acknowledging delivery");
                    if let Err(e) = delivery.ack().await {
                        // Redelivery resolves to the recorded outcome
                        warn!(error = %e, "Ack failed");
                    }
                    Settlement::Acked(outcome.status)
                }
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "Transfer not finished, requeueing");
                    self.settle(
                        delivery,
                        Nack::Requeue {
                            delay: self.nack_delay,
                        },
                        Settlement::Requeued,
                    )
                    .await
                }
                Err(e) => {
                    if matches!(e, TransferError::CriticalInconsistency(_)) {
                        error!(error = %e, "Dead-lettering quarantined transfer");
                    } else {
                        warn!(error = %e, "Dead-lettering delivery");
                    }
                    self.settle(
                        delivery,
                        Nack::DeadLetter {
                            reason: e.to_string(),
                        },
                        Settlement::DeadLettered,
                    )
                    .await
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn settle(&self, delivery: Delivery, nack: Nack, settlement: Settlement) -> Settlement {
        if let Err(e) = delivery.nack(nack).await {
            warn!(error = %e, "Nack failed");
        }
        settlement
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::core_types::AccountId;
    use crate::ledger::faulty::FaultyLedgerStore;
    use crate::ledger::{Account, IbanGenerator, InMemoryLedgerStore, LedgerStore, Leg};
    use crate::queue::{InMemoryQueue, QueueError};
    use crate::transfer::{InMemoryIdempotencyGuard, TransferRequest};
    use futures::stream::BoxStream;
    use rust_decimal::Decimal;

    struct Fixture {
        ledger: Arc<InMemoryLedgerStore>,
        faults: Arc<FaultyLedgerStore>,
        queue: Arc<InMemoryQueue>,
        consumer: Arc<TransferConsumer>,
        from: Account,
        to: Account,
    }

    async fn fixture() -> Fixture {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let faults = Arc::new(FaultyLedgerStore::new(ledger.clone()));
        let generator = IbanGenerator::with_seed(8);
        let mut accounts = Vec::new();
        for balance in [1_000, 0] {
            accounts.push(
                ledger
                    .create(Account::new(
                        AccountId::new(),
                        generator.generate_default().unwrap(),
                        "TRY",
                        Decimal::from(balance),
                        "u",
                    ))
                    .await
                    .unwrap(),
            );
        }
        let to = accounts.pop().unwrap();
        let from = accounts.pop().unwrap();

        let coordinator = Arc::new(TransferCoordinator::new(
            faults.clone(),
            Arc::new(InMemoryIdempotencyGuard::new()),
            &TransferConfig {
                base_backoff_ms: 1,
                max_backoff_ms: 2,
                ..TransferConfig::default()
            },
        ));
        let queue = Arc::new(InMemoryQueue::new(3));
        let consumer = Arc::new(TransferConsumer::new(
            queue.clone(),
            coordinator,
            &QueueConfig {
                workers: 2,
                nack_delay_ms: 0,
                ..QueueConfig::default()
            },
        ));
        Fixture {
            ledger,
            faults,
            queue,
            consumer,
            from,
            to,
        }
    }

    async fn next(stream: &mut BoxStream<'static, Result<Delivery, QueueError>>) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("delivery expected")
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_replayed_message_applies_once() {
        let f = fixture().await;
        let req = TransferRequest::new(f.from.iban.as_str(), f.to.iban.as_str(), Decimal::from(100));
        f.queue.publish(&req).await.unwrap();
        f.queue.publish(&req).await.unwrap();

        let mut stream = f.queue.consume();
        for _ in 0..2 {
            let delivery = next(&mut stream).await;
            assert_eq!(
                f.consumer.handle(delivery).await,
                Settlement::Acked(OutcomeStatus::Applied)
            );
        }

        assert_eq!(f.ledger.get(f.to.id).await.unwrap().balance, Decimal::from(100));
        assert_eq!(f.ledger.get(f.from.id).await.unwrap().balance, Decimal::from(900));
        assert_eq!(f.queue.acked(), 2);
    }

    #[tokio::test]
    async fn test_crash_before_ack_redelivers() {
        let f = fixture().await;
        let req = TransferRequest::new(f.from.iban.as_str(), f.to.iban.as_str(), Decimal::from(10));
        f.queue.publish(&req).await.unwrap();
        let mut stream = f.queue.consume();

        // Worker dies holding the delivery
        drop(next(&mut stream).await);

        let again = next(&mut stream).await;
        assert_eq!(again.attempt(), 2);
        assert_eq!(
            f.consumer.handle(again).await,
            Settlement::Acked(OutcomeStatus::Applied)
        );
        assert_eq!(f.ledger.get(f.to.id).await.unwrap().balance, Decimal::from(10));
    }

    #[tokio::test]
    async fn test_rejection_is_acked() {
        let f = fixture().await;
        let req = TransferRequest::new(f.from.iban.as_str(), f.to.iban.as_str(), Decimal::from(5_000));
        f.queue.publish(&req).await.unwrap();
        let mut stream = f.queue.consume();

        assert_eq!(
            f.consumer.handle(next(&mut stream).await).await,
            Settlement::Acked(OutcomeStatus::Rejected)
        );
        assert!(f.queue.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_contention_requeues_then_succeeds() {
        let f = fixture().await;
        let req = TransferRequest::new(f.from.iban.as_str(), f.to.iban.as_str(), Decimal::from(1));
        f.queue.publish(&req).await.unwrap();
        let mut stream = f.queue.consume();

        f.faults.fail_leg_always(Leg::Debit);
        assert_eq!(
            f.consumer.handle(next(&mut stream).await).await,
            Settlement::Requeued
        );

        f.faults.clear();
        let again = next(&mut stream).await;
        assert_eq!(again.attempt(), 2);
        assert_eq!(
            f.consumer.handle(again).await,
            Settlement::Acked(OutcomeStatus::Applied)
        );
    }

    #[tokio::test]
    async fn test_debit_timeout_on_large_transfer_is_acked_applied() {
        let f = fixture().await;
        let req = TransferRequest::new(f.from.iban.as_str(), f.to.iban.as_str(), Decimal::from(700));
        f.queue.publish(&req).await.unwrap();
        let mut stream = f.queue.consume();

        f.faults.timeout_after_apply(Leg::Debit);
        assert_eq!(
            f.consumer.handle(next(&mut stream).await).await,
            Settlement::Acked(OutcomeStatus::Applied)
        );
        assert_eq!(f.ledger.get(f.from.id).await.unwrap().balance, Decimal::from(300));
        assert_eq!(f.ledger.get(f.to.id).await.unwrap().balance, Decimal::from(700));
        assert_eq!(f.ledger.total_balance(), Decimal::from(1_000));
    }

    #[tokio::test]
    async fn test_garbage_is_dead_lettered() {
        let f = fixture().await;
        f.queue.publish_raw("{not json").unwrap();
        let mut stream = f.queue.consume();

        assert_eq!(
            f.consumer.handle(next(&mut stream).await).await,
            Settlement::DeadLettered
        );
        assert_eq!(f.queue.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn test_key_mismatch_is_dead_lettered() {
        let f = fixture().await;
        let req = TransferRequest::new(f.from.iban.as_str(), f.to.iban.as_str(), Decimal::from(1));
        let mut forged = req.clone();
        forged.amount = Decimal::from(999);
        f.queue.publish(&req).await.unwrap();
        f.queue.publish(&forged).await.unwrap();
        let mut stream = f.queue.consume();

        f.consumer.handle(next(&mut stream).await).await;
        assert_eq!(
            f.consumer.handle(next(&mut stream).await).await,
            Settlement::DeadLettered
        );
        assert_eq!(f.ledger.get(f.to.id).await.unwrap().balance, Decimal::from(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_drains_queue_and_stops() {
        let f = fixture().await;
        for _ in 0..20 {
            let req = TransferRequest::new(f.from.iban.as_str(), f.to.iban.as_str(), Decimal::from(10));
            f.queue.publish(&req).await.unwrap();
        }

        let shutdown = CancelSignal::new();
        let pool = tokio::spawn(Arc::clone(&f.consumer).run(shutdown.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.queue.acked() < 20 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue should drain");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), pool)
            .await
            .expect("pool should stop")
            .unwrap();

        assert_eq!(f.ledger.get(f.to.id).await.unwrap().balance, Decimal::from(200));
        assert_eq!(f.ledger.total_balance(), Decimal::from(1_000));
    }
}
