//! Redis pub/sub transport for multi-process deployments
//!
//! One background listener pattern-subscribes to every channel under the
//! configured namespace and redistributes frames to local per-channel
//! senders. Presence lives in one Redis hash per channel so that a late
//! subscriber can rebuild the participant set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use lexiquiz_shared_config::RedisConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{ChannelSubscription, RealtimeTransport, TransportEvent, BROADCAST_CAPACITY};
use crate::error::TransportError;
use crate::messages::Envelope;
use crate::types::PresenceMeta;

type LocalChannels = Arc<DashMap<String, broadcast::Sender<TransportEvent>>>;

/// Frame published on a Redis channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RedisFrame {
    Broadcast { envelope: Envelope },
    PresenceJoin { meta: PresenceMeta },
    PresenceLeave { participant_id: Uuid },
}

impl From<RedisFrame> for TransportEvent {
    fn from(frame: RedisFrame) -> Self {
        match frame {
            RedisFrame::Broadcast { envelope } => TransportEvent::Broadcast(envelope),
            RedisFrame::PresenceJoin { meta } => TransportEvent::PresenceJoin(meta),
            RedisFrame::PresenceLeave { participant_id } => {
                TransportEvent::PresenceLeave { participant_id }
            }
        }
    }
}

fn channel_key(namespace: &str, channel: &str) -> String {
    format!("{}{}", namespace, channel)
}

fn presence_key(namespace: &str, channel: &str) -> String {
    format!("{}presence:{}", namespace, channel)
}

/// Redis-backed realtime transport
pub struct RedisTransport {
    conn: redis::aio::MultiplexedConnection,
    namespace: String,
    channels: LocalChannels,
    listener: JoinHandle<()>,
}

impl RedisTransport {
    /// Connect, verify with PING and start the pattern listener
    pub async fn connect(config: &RedisConfig) -> Result<Self, TransportError> {
        let client = redis::Client::open(config.connection_url())?;
        let timeout = Duration::from_secs(config.connect_timeout_secs);

        let mut conn = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| {
                redis::RedisError::from((redis::ErrorKind::IoError, "connection timed out"))
            })??;

        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        let channels: LocalChannels = Arc::new(DashMap::new());
        let listener = spawn_listener(client, config.namespace.clone(), channels.clone());

        Ok(Self {
            conn,
            namespace: config.namespace.clone(),
            channels,
            listener,
        })
    }

    async fn publish_frame(&self, channel: &str, frame: &RedisFrame) -> Result<(), TransportError> {
        let payload = serde_json::to_string(frame)?;
        let mut conn = self.conn.clone();

        redis::cmd("PUBLISH")
            .arg(channel_key(&self.namespace, channel))
            .arg(&payload)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| TransportError::PublishFailed {
                channel: channel.to_string(),
                reason: e.to_string(),
            })
    }
}

impl Drop for RedisTransport {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[async_trait]
impl RealtimeTransport for RedisTransport {
    async fn subscribe(&self, channel: &str) -> Result<ChannelSubscription, TransportError> {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
        let receiver = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .subscribe();

        let mut conn = self.conn.clone();
        let entries: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(presence_key(&self.namespace, channel))
            .query_async(&mut conn)
            .await
            .map_err(|e| TransportError::SubscribeFailed {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;

        let presence = entries
            .values()
            .filter_map(|raw| match serde_json::from_str::<PresenceMeta>(raw) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    tracing::warn!(channel, error = %e, "Skipping malformed presence entry");
                    None
                }
            })
            .collect();

        Ok(ChannelSubscription { receiver, presence })
    }

    async fn publish(&self, channel: &str, envelope: Envelope) -> Result<(), TransportError> {
        self.publish_frame(channel, &RedisFrame::Broadcast { envelope })
            .await
    }

    async fn track(&self, channel: &str, meta: PresenceMeta) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        redis::cmd("HSET")
            .arg(presence_key(&self.namespace, channel))
            .arg(meta.participant_id.to_string())
            .arg(serde_json::to_string(&meta)?)
            .query_async::<_, ()>(&mut conn)
            .await?;

        self.publish_frame(channel, &RedisFrame::PresenceJoin { meta })
            .await
    }

    async fn untrack(&self, channel: &str, participant_id: Uuid) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        let removed: u32 = redis::cmd("HDEL")
            .arg(presence_key(&self.namespace, channel))
            .arg(participant_id.to_string())
            .query_async(&mut conn)
            .await?;

        if removed > 0 {
            self.publish_frame(channel, &RedisFrame::PresenceLeave { participant_id })
                .await?;
        }
        Ok(())
    }

    fn is_redis_backed(&self) -> bool {
        true
    }
}

fn spawn_listener(
    client: redis::Client,
    namespace: String,
    channels: LocalChannels,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        const MAX_RECONNECT_DELAY_SECS: u64 = 60;
        const MAX_RECONNECT_ATTEMPTS: u32 = 100;

        let mut attempts = 0u32;
        let mut delay_secs = 1u64;

        loop {
            match run_listener(&client, &namespace, &channels).await {
                Ok(()) => {
                    tracing::warn!("Redis quiz-sync listener disconnected, reconnecting...");
                    attempts = 0;
                    delay_secs = 1;
                }
                Err(e) => {
                    attempts += 1;
                    if attempts >= MAX_RECONNECT_ATTEMPTS {
                        tracing::error!(
                            "Redis quiz-sync listener exceeded {} reconnect attempts, giving up",
                            MAX_RECONNECT_ATTEMPTS
                        );
                        break;
                    }
                    tracing::error!(
                        error = %e,
                        attempt = attempts,
                        delay_secs = delay_secs,
                        "Redis quiz-sync listener error, reconnecting..."
                    );
                }
            }

            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
            delay_secs = (delay_secs * 2).min(MAX_RECONNECT_DELAY_SECS);
        }
    })
}

async fn run_listener(
    client: &redis::Client,
    namespace: &str,
    channels: &LocalChannels,
) -> Result<(), redis::RedisError> {
    use futures_util::StreamExt;

    let conn = client.get_async_connection().await?;
    let mut pubsub = conn.into_pubsub();
    pubsub.psubscribe(format!("{}*", namespace)).await?;

    let mut stream = pubsub.on_message();

    while let Some(msg) = stream.next().await {
        let Some(channel) = msg.get_channel_name().strip_prefix(namespace) else {
            continue;
        };

        let frame = match serde_json::from_slice::<RedisFrame>(msg.get_payload_bytes()) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(channel, error = %e, "Dropping undecodable Redis frame");
                continue;
            }
        };

        deliver(channels, channel, frame.into());
    }

    Ok(())
}

/// Hand a frame to local receivers, dropping the channel once none are left
fn deliver(channels: &LocalChannels, channel: &str, event: TransportEvent) {
    let idle = match channels.get(channel) {
        Some(sender) => {
            // No local receivers left is fine
            let _ = sender.send(event);
            sender.receiver_count() == 0
        }
        None => false,
    };
    if idle {
        channels.remove_if(channel, |_, sender| sender.receiver_count() == 0);
    }
}
