//! Per-message processing: parse, validate, apply, dead-letter.
//!
//! A [`MessageProcessor`] owns one [`MessageHandler`] and walks every
//! delivery through the [`DeliveryState`] machine:
//!
//! ```text
//! Received ─decode─► Parsed ─validate─► Validated ─apply─► Applied
//!     │                 │                   │
//!     └─────────────────┴───────────────────┴─► dead-letter sink
//!                                                 ├─ ok  ─► DeadLettered
//!                                                 └─ err ─► Failed
//! ```
//!
//! Transient errors ([`DomainError::is_transient`]) in the validate and apply
//! steps are retried with backoff. Everything else goes straight to the
//! dead-letter sink. The processor never asks for redelivery: the consumer
//! acknowledges every message once [`DeliveryHandler::handle`] returns.

use crate::metrics::MessageMetrics;
use crate::retry::{Exhausted, RetryPolicy, retry_with_predicate};
use async_trait::async_trait;
use orderdesk_core::environment::{Clock, SystemClock};
use orderdesk_core::{DeadLetter, DeadLetterSink, DeliveryState, DomainError, Envelope, Result};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Domain logic for one queue.
///
/// `validate` and `apply` borrow the message so the processor can retry
/// them without cloning.
pub trait MessageHandler: Send + Sync + 'static {
    /// Decoded message type.
    type Message: DeserializeOwned + Send + Sync + 'static;

    /// Action label for logs.
    fn action(message: &Self::Message) -> &'static str;

    /// Check the message against current state without writing.
    ///
    /// # Errors
    ///
    /// Any [`DomainError`]; transient ones are retried.
    fn validate(&self, message: &Self::Message) -> impl Future<Output = Result<()>> + Send;

    /// Perform the mutation.
    ///
    /// # Errors
    ///
    /// Any [`DomainError`]; transient ones are retried.
    fn apply(&self, message: &Self::Message) -> impl Future<Output = Result<()>> + Send;
}

/// Type-erased delivery processing, held by the queue consumer.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Process one message to a terminal state.
    ///
    /// Never fails: errors end up in the returned state.
    async fn handle(&self, envelope: &Envelope) -> DeliveryState;
}

/// Drives a [`MessageHandler`] with retries and a dead-letter fallback.
pub struct MessageProcessor<H> {
    handler: H,
    retry: RetryPolicy,
    dead_letters: Arc<dyn DeadLetterSink>,
    clock: Arc<dyn Clock>,
}

impl<H: MessageHandler> MessageProcessor<H> {
    /// Processor with the default retry policy and the system clock.
    #[must_use]
    pub fn new(handler: H, dead_letters: Arc<dyn DeadLetterSink>) -> Self {
        Self {
            handler,
            retry: RetryPolicy::default(),
            dead_letters,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the clock used to stamp dead letters.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The wrapped handler.
    #[must_use]
    pub const fn handler(&self) -> &H {
        &self.handler
    }

    /// Run one envelope through parse, validate and apply.
    pub async fn process(&self, envelope: &Envelope) -> DeliveryState {
        let started = Instant::now();
        let state = self.run(envelope).await;
        MessageMetrics::record_outcome(&envelope.queue, &state, started.elapsed());
        state
    }

    async fn run(&self, envelope: &Envelope) -> DeliveryState {
        debug!(
            queue = %envelope.queue,
            position = %envelope.position,
            state = DeliveryState::Received.name(),
            "Message received"
        );

        let message: H::Message = match orderdesk_core::message::decode(&envelope.payload) {
            Ok(message) => message,
            Err(error) => return self.dead_letter(envelope, &error, 0).await,
        };
        let action = H::action(&message);
        debug!(
            queue = %envelope.queue,
            position = %envelope.position,
            action,
            state = DeliveryState::Parsed.name(),
            "Message parsed"
        );

        let validated = retry_with_predicate(
            &self.retry,
            || self.handler.validate(&message),
            DomainError::is_transient,
        )
        .await;
        if let Err(Exhausted { error, attempts }) = validated {
            return self.dead_letter(envelope, &error, attempts).await;
        }
        debug!(
            queue = %envelope.queue,
            position = %envelope.position,
            action,
            state = DeliveryState::Validated.name(),
            "Message validated"
        );

        let applied = retry_with_predicate(
            &self.retry,
            || self.handler.apply(&message),
            DomainError::is_transient,
        )
        .await;
        match applied {
            Ok(()) => {
                info!(
                    queue = %envelope.queue,
                    position = %envelope.position,
                    action,
                    "Message applied"
                );
                DeliveryState::Applied
            }
            Err(Exhausted { error, attempts }) => {
                self.dead_letter(envelope, &error, attempts).await
            }
        }
    }

    async fn dead_letter(
        &self,
        envelope: &Envelope,
        error: &DomainError,
        attempts: u32,
    ) -> DeliveryState {
        let letter = DeadLetter::from_error(
            &envelope.queue,
            envelope.key.as_deref(),
            &envelope.payload,
            error,
            attempts,
            self.clock.now(),
        );
        let reason = error.to_string();

        match self.dead_letters.add(letter).await {
            Ok(id) => {
                warn!(
                    queue = %envelope.queue,
                    position = %envelope.position,
                    dead_letter_id = id,
                    error_kind = error.kind(),
                    error = %error,
                    attempts,
                    "Message dead-lettered"
                );
                metrics::counter!("dead_letters_added_total", "queue" => envelope.queue.clone())
                    .increment(1);
                DeliveryState::DeadLettered { reason, attempts }
            }
            Err(sink_error) => {
                error!(
                    queue = %envelope.queue,
                    position = %envelope.position,
                    error = %error,
                    sink_error = %sink_error,
                    payload = %String::from_utf8_lossy(&envelope.payload),
                    "Message dropped: dead-letter write failed"
                );
                DeliveryState::Failed { reason }
            }
        }
    }
}

#[async_trait]
impl<H: MessageHandler> DeliveryHandler for MessageProcessor<H> {
    async fn handle(&self, envelope: &Envelope) -> DeliveryState {
        self.process(envelope).await
    }
}
