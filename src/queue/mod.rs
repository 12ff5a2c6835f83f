//! Message Queue Gateway
//!
//! Durable hand-off of transfer requests from the HTTP layer to consumer
//! workers. Delivery is at-least-once and acknowledgment is explicit: a
//! message leaves the queue only when its `Delivery` is acked, which the
//! consumer does after the coordinator returned a terminal outcome.
//!
//! ```text
//! publish ──▶ [ready] ──consume──▶ [leased] ──ack──▶ gone
//!                ▲                    │  │
//!                └──nack(requeue)─────┘  └──nack(dead-letter) / delivery limit──▶ [dead]
//!                └──dropped handle / visibility timeout
//! ```
//!
//! The gateway holds no business logic; it never looks inside the payload
//! beyond decoding it for the caller.

pub mod consumer;
pub mod memory;
pub mod message;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::transfer::TransferRequest;

pub use consumer::{Settlement, TransferConsumer};
pub use memory::InMemoryQueue;
pub use postgres::PgQueue;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Queue closed")]
    Closed,

    /// The visibility timeout ran out and someone else may hold the message
    #[error("Lease on message {0} is no longer held")]
    LeaseLost(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Database(e.to_string())
    }
}

/// Negative acknowledgment
#[derive(Debug, Clone, PartialEq)]
pub enum Nack {
    /// Deliver again after `delay`
    Requeue { delay: Duration },
    /// Park the message for an operator
    DeadLetter { reason: String },
}

/// Backend half of a delivery handle
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), QueueError>;

    async fn nack(&self, nack: Nack) -> Result<(), QueueError>;

    /// The handle was dropped unsettled; a crash looks the same to the broker
    fn abandon(&self);
}

/// One delivery of one message, carrying its own ack/nack capability.
///
/// Dropping a delivery without settling it makes the message deliverable
/// again.
pub struct Delivery {
    payload: String,
    attempt: u32,
    acker: Option<Box<dyn Acknowledger>>,
}

impl Delivery {
    pub fn new(payload: String, attempt: u32, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            payload,
            attempt,
            acker: Some(acker),
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// 1 on first delivery
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn decode(&self) -> Result<TransferRequest, QueueError> {
        message::decode(&self.payload)
    }

    pub async fn ack(mut self) -> Result<(), QueueError> {
        match self.acker.take() {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    pub async fn nack(mut self, nack: Nack) -> Result<(), QueueError> {
        match self.acker.take() {
            Some(acker) => acker.nack(nack).await,
            None => Ok(()),
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(acker) = self.acker.take() {
            acker.abandon();
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("attempt", &self.attempt)
            .field("payload", &self.payload)
            .finish()
    }
}

#[async_trait]
pub trait TransferQueue: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns once the message is durably accepted
    async fn publish(&self, req: &TransferRequest) -> Result<(), QueueError>;

    /// Lazy, effectively infinite stream of deliveries. Errors are yielded
    /// in-band and the stream keeps going; it ends only when the queue is
    /// closed.
    fn consume(&self) -> BoxStream<'static, Result<Delivery, QueueError>>;
}
