//! Realtime pub/sub transports
//!
//! The coordination core never talks to a messaging backend directly; it is
//! handed an `Arc<dyn RealtimeTransport>`. Two implementations ship here:
//! a Redis-backed transport for multi-process deployments and an in-memory
//! hub for single-process mode and tests.

mod memory;
mod redis;

pub use self::memory::InMemoryHub;
pub use self::redis::RedisTransport;

use std::sync::Arc;

use async_trait::async_trait;
use lexiquiz_shared_config::RedisConfig;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::TransportError;
use crate::messages::Envelope;
use crate::types::PresenceMeta;

/// Channel capacity for per-channel fan-out
pub(crate) const BROADCAST_CAPACITY: usize = 256;

/// Something that happened on a subscribed channel
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Broadcast(Envelope),
    PresenceJoin(PresenceMeta),
    PresenceLeave { participant_id: Uuid },
}

/// Acknowledged subscription to a named channel
#[derive(Debug)]
pub struct ChannelSubscription {
    pub receiver: broadcast::Receiver<TransportEvent>,

    /// Presence entries already tracked when the subscription was acknowledged
    pub presence: Vec<PresenceMeta>,
}

/// Named-channel pub/sub with presence tracking
///
/// Implementations may deliver a publisher's own messages back to it;
/// callers must filter by originator.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Subscribe and wait for the acknowledgment
    async fn subscribe(&self, channel: &str) -> Result<ChannelSubscription, TransportError>;

    /// Publish to every current subscriber of `channel`
    async fn publish(&self, channel: &str, envelope: Envelope) -> Result<(), TransportError>;

    /// Announce local presence on `channel`
    async fn track(&self, channel: &str, meta: PresenceMeta) -> Result<(), TransportError>;

    /// Withdraw a presence entry from `channel`
    async fn untrack(&self, channel: &str, participant_id: Uuid) -> Result<(), TransportError>;

    /// Whether messages reach other processes
    fn is_redis_backed(&self) -> bool {
        false
    }
}

/// Try to connect to Redis, fall back to the in-memory hub
pub async fn connect_transport(config: &RedisConfig) -> Arc<dyn RealtimeTransport> {
    match RedisTransport::connect(config).await {
        Ok(transport) => {
            tracing::info!(namespace = %config.namespace, "Redis transport connected for quiz sync");
            Arc::new(transport)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Redis transport unavailable");
            tracing::warn!("Using in-memory transport (single process mode only)");
            Arc::new(InMemoryHub::new())
        }
    }
}
