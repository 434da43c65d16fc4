//! In-memory transport for single-process mode

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{ChannelSubscription, RealtimeTransport, TransportEvent, BROADCAST_CAPACITY};
use crate::error::TransportError;
use crate::messages::Envelope;
use crate::types::PresenceMeta;

struct HubChannel {
    sender: broadcast::Sender<TransportEvent>,
    presence: HashMap<Uuid, PresenceMeta>,
}

impl Default for HubChannel {
    fn default() -> Self {
        Self {
            sender: broadcast::channel(BROADCAST_CAPACITY).0,
            presence: HashMap::new(),
        }
    }
}

impl HubChannel {
    fn is_idle(&self) -> bool {
        self.sender.receiver_count() == 0 && self.presence.is_empty()
    }
}

/// Process-local pub/sub hub
///
/// Cloning is cheap and every clone shares the same channels, so one hub
/// can be handed to any number of participants. Publishers receive their
/// own broadcasts.
#[derive(Clone, Default)]
pub struct InMemoryHub {
    channels: Arc<DashMap<String, HubChannel>>,
}

impl InMemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live receivers on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|c| c.sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of channels the hub still holds state for
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Participants currently tracked on `channel`
    pub fn presence(&self, channel: &str) -> Vec<PresenceMeta> {
        self.channels
            .get(channel)
            .map(|c| c.presence.values().cloned().collect())
            .unwrap_or_default()
    }

    fn prune(&self, channel: &str) {
        self.channels.remove_if(channel, |_, c| c.is_idle());
    }
}

#[async_trait]
impl RealtimeTransport for InMemoryHub {
    async fn subscribe(&self, channel: &str) -> Result<ChannelSubscription, TransportError> {
        // Receivers are dropped without notice, so sweep abandoned channels here
        self.channels.retain(|_, c| !c.is_idle());

        let entry = self.channels.entry(channel.to_string()).or_default();
        Ok(ChannelSubscription {
            receiver: entry.sender.subscribe(),
            presence: entry.presence.values().cloned().collect(),
        })
    }

    async fn publish(&self, channel: &str, envelope: Envelope) -> Result<(), TransportError> {
        let idle = match self.channels.get(channel) {
            Some(entry) => {
                // No receivers is not an error for fire-and-forget broadcast
                let _ = entry.sender.send(TransportEvent::Broadcast(envelope));
                entry.is_idle()
            }
            None => false,
        };
        if idle {
            self.prune(channel);
        }
        Ok(())
    }

    async fn track(&self, channel: &str, meta: PresenceMeta) -> Result<(), TransportError> {
        let mut entry = self.channels.entry(channel.to_string()).or_default();
        entry.presence.insert(meta.participant_id, meta.clone());
        let _ = entry.sender.send(TransportEvent::PresenceJoin(meta));
        Ok(())
    }

    async fn untrack(&self, channel: &str, participant_id: Uuid) -> Result<(), TransportError> {
        let idle = match self.channels.get_mut(channel) {
            Some(mut entry) => {
                if entry.presence.remove(&participant_id).is_some() {
                    let _ = entry
                        .sender
                        .send(TransportEvent::PresenceLeave { participant_id });
                }
                entry.is_idle()
            }
            None => false,
        };
        if idle {
            self.prune(channel);
        }
        Ok(())
    }
}
