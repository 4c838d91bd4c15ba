//! Per-message processing state.

use serde::{Deserialize, Serialize};

/// Where a single delivery ended up.
///
/// ```text
/// Received ──► Parsed ──► Validated ──► Applied
///    │           │            │
///    └───────────┴────────────┴──► DeadLettered { reason, attempts }
///                                        │ (dead-letter write failed)
///                                        ▼
///                                  Failed { reason }
/// ```
///
/// Every state ends with the delivery being acknowledged; nothing is
/// requeued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryState {
    /// Taken off the queue.
    Received,
    /// Payload decoded into a message.
    Parsed,
    /// Message passed handler validation.
    Validated,
    /// Mutation committed.
    Applied,
    /// Processing failed and the message could not be preserved.
    Failed {
        /// Why processing stopped
        reason: String,
    },
    /// Processing failed and the message was written to the dead-letter queue.
    DeadLettered {
        /// Why processing stopped
        reason: String,
        /// Attempts made in the failing step (0 if the payload did not parse)
        attempts: u32,
    },
}

impl DeliveryState {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Parsed => "parsed",
            Self::Validated => "validated",
            Self::Applied => "applied",
            Self::Failed { .. } => "failed",
            Self::DeadLettered { .. } => "dead_lettered",
        }
    }

    /// `true` once processing cannot advance any further.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Applied | Self::Failed { .. } | Self::DeadLettered { .. }
        )
    }

    /// `true` only for [`DeliveryState::Applied`].
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!DeliveryState::Received.is_terminal());
        assert!(!DeliveryState::Validated.is_terminal());
        assert!(DeliveryState::Applied.is_terminal());
        assert!(
            DeliveryState::DeadLettered {
                reason: "out of stock".into(),
                attempts: 1,
            }
            .is_terminal()
        );
        assert_eq!(
            DeliveryState::Failed { reason: "x".into() }.name(),
            "failed"
        );
    }
}
