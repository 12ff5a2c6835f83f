//! In-process queue
//!
//! Same delivery contract as the PostgreSQL queue, minus durability: an
//! unsettled or dropped delivery goes straight back to the tail.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use super::{Acknowledger, Delivery, Nack, QueueError, TransferQueue, message};
use crate::transfer::TransferRequest;

#[derive(Debug, Clone)]
struct Envelope {
    id: u64,
    payload: String,
    /// Deliveries so far
    attempt: u32,
}

/// A message parked after a dead-letter nack or too many deliveries
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub payload: String,
    pub attempts: u32,
    pub reason: String,
}

struct Inner {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    max_deliveries: u32,
    next_id: AtomicU64,
    acked: AtomicU64,
    redelivered: AtomicU64,
    dead: DashMap<u64, DeadLetter>,
}

impl Inner {
    fn requeue(&self, envelope: Envelope) {
        if envelope.attempt >= self.max_deliveries {
            self.bury(envelope, "delivery limit reached".to_string());
            return;
        }
        self.redelivered.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.tx.send(envelope) {
            warn!(id = e.0.id, "Queue receiver gone, message dropped");
        }
    }

    fn bury(&self, envelope: Envelope, reason: String) {
        warn!(id = envelope.id, attempts = envelope.attempt, reason = %reason, "Message dead-lettered");
        self.dead.insert(
            envelope.id,
            DeadLetter {
                payload: envelope.payload,
                attempts: envelope.attempt,
                reason,
            },
        );
    }
}

pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

impl InMemoryQueue {
    pub fn new(max_deliveries: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                tx,
                rx: Mutex::new(rx),
                max_deliveries: max_deliveries.max(1),
                next_id: AtomicU64::new(1),
                acked: AtomicU64::new(0),
                redelivered: AtomicU64::new(0),
                dead: DashMap::new(),
            }),
        }
    }

    /// Enqueue a raw payload, bypassing encoding
    pub fn publish_raw(&self, payload: impl Into<String>) -> Result<(), QueueError> {
        let envelope = Envelope {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            payload: payload.into(),
            attempt: 0,
        };
        self.inner.tx.send(envelope).map_err(|_| QueueError::Closed)
    }

    pub fn acked(&self) -> u64 {
        self.inner.acked.load(Ordering::Relaxed)
    }

    pub fn redelivered(&self) -> u64 {
        self.inner.redelivered.load(Ordering::Relaxed)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        let mut dead: Vec<(u64, DeadLetter)> = self
            .inner
            .dead
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        dead.sort_by_key(|(id, _)| *id);
        dead.into_iter().map(|(_, d)| d).collect()
    }
}

#[async_trait]
impl TransferQueue for InMemoryQueue {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, req: &TransferRequest) -> Result<(), QueueError> {
        self.publish_raw(message::encode(req)?)
    }

    fn consume(&self) -> BoxStream<'static, Result<Delivery, QueueError>> {
        stream::unfold(Arc::clone(&self.inner), |inner| async move {
            let mut envelope = {
                let mut rx = inner.rx.lock().await;
                rx.recv().await?
            };
            envelope.attempt += 1;
            debug!(id = envelope.id, attempt = envelope.attempt, "Delivering message");
            let delivery = Delivery::new(
                envelope.payload.clone(),
                envelope.attempt,
                Box::new(MemoryAcker {
                    inner: Arc::clone(&inner),
                    envelope,
                }),
            );
            Some((Ok(delivery), inner))
        })
        .boxed()
    }
}

struct MemoryAcker {
    inner: Arc<Inner>,
    envelope: Envelope,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.inner.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn nack(&self, nack: Nack) -> Result<(), QueueError> {
        match nack {
            Nack::Requeue { delay } if delay.is_zero() => {
                self.inner.requeue(self.envelope.clone());
            }
            Nack::Requeue { delay } => {
                let inner = Arc::clone(&self.inner);
                let envelope = self.envelope.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.requeue(envelope);
                });
            }
            Nack::DeadLetter { reason } => {
                self.inner.bury(self.envelope.clone(), reason);
            }
        }
        Ok(())
    }

    fn abandon(&self) {
        debug!(id = self.envelope.id, "Delivery dropped unsettled, requeueing");
        self.inner.requeue(self.envelope.clone());
    }
}
