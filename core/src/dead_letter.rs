//! Dead-letter contract for messages that could not be applied.

use crate::error::{DomainError, Result};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// A message that failed processing, with enough context to replay it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// Queue the message came from
    pub queue: String,
    /// Partitioning key, if any
    pub key: Option<String>,
    /// Raw payload as received
    pub payload: Vec<u8>,
    /// Machine-readable failure kind (see [`DomainError::kind`])
    pub error_kind: String,
    /// Human-readable failure message
    pub error_message: String,
    /// Attempts made before giving up (0 if the payload did not parse)
    pub attempts: u32,
    /// When processing gave up
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Build a dead letter from a processing error.
    #[must_use]
    pub fn from_error(
        queue: &str,
        key: Option<&str>,
        payload: &[u8],
        error: &DomainError,
        attempts: u32,
        failed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            queue: queue.to_string(),
            key: key.map(str::to_string),
            payload: payload.to_vec(),
            error_kind: error.kind().to_string(),
            error_message: error.to_string(),
            attempts,
            failed_at,
        }
    }

    /// Payload as text, lossily decoded.
    #[must_use]
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Somewhere to park failed messages.
///
/// Object-safe so the processor can hold `Arc<dyn DeadLetterSink>`.
pub trait DeadLetterSink: Send + Sync {
    /// Store a dead letter and return its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Database`] or [`DomainError::Unreachable`] if the
    /// entry could not be written.
    fn add(&self, letter: DeadLetter) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>>;
}
