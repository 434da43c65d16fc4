//! Error types for the synchronization core
//!
//! Every failure is terminal at the coordination boundary: emitter
//! operations report it through [`BroadcastError`], the transport and
//! store seams through their own enums. Nothing here is meant to cross
//! into the UI as a panic.

use thiserror::Error;

/// Why a broadcast from the local participant did not go out
#[derive(Error, Debug)]
pub enum BroadcastError {
    /// The local participant lacks the manage capability
    #[error("participant is not allowed to broadcast lifecycle events")]
    NotAuthorized,

    /// The session channel is not subscribed
    #[error("session channel is not connected")]
    NotConnected,

    /// A start broadcast is still outstanding
    #[error("a quiz start is already pending")]
    AlreadyPending,

    /// The session reached its terminal state
    #[error("session already completed")]
    SessionCompleted,

    /// The transport refused or lost the message
    #[error("publish failed: {0}")]
    Publish(#[from] TransportError),

    /// The coordination task is gone (handle outlived its session)
    #[error("session coordinator closed")]
    Closed,
}

impl BroadcastError {
    /// Role and connection gates are expected outcomes of speculative calls
    pub fn is_policy_rejection(&self) -> bool {
        matches!(self, Self::NotAuthorized | Self::NotConnected)
    }
}

/// Pub/sub transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Redis operation failed
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Frame could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Channel subscription was not acknowledged
    #[error("subscribe to {channel} failed: {reason}")]
    SubscribeFailed { channel: String, reason: String },

    /// Message was not accepted by the relay
    #[error("publish to {channel} failed: {reason}")]
    PublishFailed { channel: String, reason: String },

    /// Transport has shut down
    #[error("transport closed")]
    Closed,
}

/// Session store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database query failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Row carried a status this client does not know
    #[error("unknown session status: {0}")]
    InvalidStatus(String),

    /// Change notification payload was malformed
    #[error("invalid change payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Result type for broadcast operations
pub type BroadcastResult<T = ()> = Result<T, BroadcastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_rejections() {
        assert!(BroadcastError::NotAuthorized.is_policy_rejection());
        assert!(BroadcastError::NotConnected.is_policy_rejection());
        assert!(!BroadcastError::AlreadyPending.is_policy_rejection());
        assert!(!BroadcastError::Publish(TransportError::Closed).is_policy_rejection());
    }

    #[test]
    fn test_publish_error_message() {
        let err = BroadcastError::from(TransportError::PublishFailed {
            channel: "quiz-sync-1".to_string(),
            reason: "timeout".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "publish failed: publish to quiz-sync-1 failed: timeout"
        );
    }
}
