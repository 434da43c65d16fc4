//! Channel connection manager
//!
//! Owns the subscriptions to the per-session room channel and the
//! group-wide notification channel, plus the participant presence set
//! derived from room presence events.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::error::TransportError;
use crate::messages::SyncEvent;
use crate::store::SessionRow;
use crate::transport::{RealtimeTransport, TransportEvent};
use crate::types::PresenceMeta;

/// Which channel a message arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// `quiz-sync-{session_id}`
    Room,
    /// `group-wide-notifications-{group_id}`
    Group,
}

/// Input to the event router
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event { channel: ChannelKind, event: SyncEvent },
    /// The presence set changed
    PresenceChanged,
    /// A subscription closed underneath us
    Lost,
    /// The backing row changed
    RowUpdate(SessionRow),
}

struct Subscriptions {
    room: broadcast::Receiver<TransportEvent>,
    group: broadcast::Receiver<TransportEvent>,
}

pub struct ChannelConnection {
    transport: Arc<dyn RealtimeTransport>,
    room_channel: String,
    group_channel: String,
    participant_id: Uuid,
    subscriptions: Option<Subscriptions>,
    presence: BTreeMap<Uuid, PresenceMeta>,
    tracking: bool,
}

impl ChannelConnection {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        room_channel: String,
        group_channel: String,
        participant_id: Uuid,
    ) -> Self {
        Self {
            transport,
            room_channel,
            group_channel,
            participant_id,
            subscriptions: None,
            presence: BTreeMap::new(),
            tracking: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.subscriptions.is_some()
    }

    pub fn room_channel(&self) -> &str {
        &self.room_channel
    }

    /// Current presence set, ordered by participant id
    pub fn participants(&self) -> Vec<PresenceMeta> {
        self.presence.values().cloned().collect()
    }

    /// Subscribe to both channels and, when in room, announce presence
    ///
    /// On failure the connection stays down; there is no retry here.
    pub async fn connect(&mut self, in_room: bool) -> Result<(), TransportError> {
        if self.is_connected() {
            return Ok(());
        }

        let room = match self.transport.subscribe(&self.room_channel).await {
            Ok(sub) => sub,
            Err(e) => {
                tracing::warn!(channel = %self.room_channel, error = %e, "Room channel subscribe failed");
                return Err(e);
            }
        };
        let group = match self.transport.subscribe(&self.group_channel).await {
            Ok(sub) => sub,
            Err(e) => {
                tracing::warn!(channel = %self.group_channel, error = %e, "Group channel subscribe failed");
                return Err(e);
            }
        };

        self.presence = room
            .presence
            .into_iter()
            .map(|meta| (meta.participant_id, meta))
            .collect();
        self.subscriptions = Some(Subscriptions {
            room: room.receiver,
            group: group.receiver,
        });

        tracing::info!(
            channel = %self.room_channel,
            participant_id = %self.participant_id,
            "Connected to quiz session channel"
        );

        if in_room {
            self.track_presence().await;
        }
        Ok(())
    }

    /// Unsubscribe and withdraw presence; safe to call repeatedly
    pub async fn disconnect(&mut self) {
        self.untrack_presence().await;

        if self.subscriptions.take().is_some() {
            tracing::info!(
                channel = %self.room_channel,
                participant_id = %self.participant_id,
                "Disconnected from quiz session channel"
            );
        }
        self.presence.clear();
    }

    /// Announce local presence on the room channel
    pub async fn track_presence(&mut self) {
        if !self.is_connected() || self.tracking {
            return;
        }

        let meta = PresenceMeta::now(self.participant_id);
        match self.transport.track(&self.room_channel, meta.clone()).await {
            Ok(()) => {
                self.presence.insert(meta.participant_id, meta);
                self.tracking = true;
            }
            Err(e) => {
                tracing::warn!(channel = %self.room_channel, error = %e, "Failed to track presence");
            }
        }
    }

    pub async fn untrack_presence(&mut self) {
        if !self.tracking {
            return;
        }
        self.tracking = false;
        self.presence.remove(&self.participant_id);

        if let Err(e) = self
            .transport
            .untrack(&self.room_channel, self.participant_id)
            .await
        {
            tracing::warn!(channel = %self.room_channel, error = %e, "Failed to untrack presence");
        }
    }

    pub async fn publish(
        &self,
        kind: ChannelKind,
        event: &SyncEvent,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }

        let channel = match kind {
            ChannelKind::Room => &self.room_channel,
            ChannelKind::Group => &self.group_channel,
        };
        self.transport.publish(channel, event.to_envelope()?).await
    }

    /// Next inbound message; pending forever while disconnected
    ///
    /// Cancel safe: dropping the future loses nothing.
    pub async fn recv(&mut self) -> Inbound {
        loop {
            let Some(subs) = self.subscriptions.as_mut() else {
                return std::future::pending().await;
            };

            let (kind, result) = tokio::select! {
                r = subs.room.recv() => (ChannelKind::Room, r),
                r = subs.group.recv() => (ChannelKind::Group, r),
            };

            match result {
                Ok(TransportEvent::Broadcast(envelope)) => match envelope.decode() {
                    Ok(event) => return Inbound::Event { channel: kind, event },
                    Err(e) => {
                        tracing::warn!(event = %envelope.event, error = %e, "Dropping undecodable message");
                    }
                },
                Ok(TransportEvent::PresenceJoin(meta)) => {
                    if kind == ChannelKind::Room {
                        self.presence.insert(meta.participant_id, meta);
                        return Inbound::PresenceChanged;
                    }
                }
                Ok(TransportEvent::PresenceLeave { participant_id }) => {
                    if kind == ChannelKind::Room
                        && self.presence.remove(&participant_id).is_some()
                    {
                        return Inbound::PresenceChanged;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        channel = %self.room_channel,
                        skipped,
                        "Quiz sync receiver lagged, messages dropped"
                    );
                }
                Err(RecvError::Closed) => {
                    tracing::warn!(channel = %self.room_channel, "Quiz session channel closed");
                    self.subscriptions = None;
                    self.presence.clear();
                    self.tracking = false;
                    return Inbound::Lost;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::PreparationUpdate;
    use crate::transport::InMemoryHub;
    use chrono::Utc;

    fn connection(hub: &InMemoryHub, participant_id: Uuid) -> ChannelConnection {
        ChannelConnection::new(
            Arc::new(hub.clone()),
            "quiz-sync-s1".to_string(),
            "group-wide-notifications-g1".to_string(),
            participant_id,
        )
    }

    #[tokio::test]
    async fn test_connect_tracks_presence_in_room() {
        let hub = InMemoryHub::new();
        let me = Uuid::new_v4();
        let mut conn = connection(&hub, me);

        conn.connect(true).await.unwrap();

        assert!(conn.is_connected());
        assert_eq!(conn.participants().len(), 1);
        assert_eq!(hub.presence("quiz-sync-s1")[0].participant_id, me);
    }

    #[tokio::test]
    async fn test_connect_out_of_room_does_not_track() {
        let hub = InMemoryHub::new();
        let mut conn = connection(&hub, Uuid::new_v4());

        conn.connect(false).await.unwrap();

        assert!(conn.is_connected());
        assert!(hub.presence("quiz-sync-s1").is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let hub = InMemoryHub::new();
        let mut conn = connection(&hub, Uuid::new_v4());
        conn.connect(true).await.unwrap();

        conn.disconnect().await;
        conn.disconnect().await;

        assert!(!conn.is_connected());
        assert!(conn.participants().is_empty());
        assert!(hub.presence("quiz-sync-s1").is_empty());
        assert_eq!(hub.subscriber_count("quiz-sync-s1"), 0);
    }

    #[tokio::test]
    async fn test_peer_presence_updates_set() {
        let hub = InMemoryHub::new();
        let mut owner = connection(&hub, Uuid::new_v4());
        let mut member = connection(&hub, Uuid::new_v4());
        owner.connect(true).await.unwrap();
        // Drain own join
        assert_eq!(owner.recv().await, Inbound::PresenceChanged);

        member.connect(true).await.unwrap();
        assert_eq!(member.participants().len(), 2);

        assert_eq!(owner.recv().await, Inbound::PresenceChanged);
        assert_eq!(owner.participants().len(), 2);

        member.disconnect().await;
        assert_eq!(owner.recv().await, Inbound::PresenceChanged);
        assert_eq!(owner.participants().len(), 1);
    }

    #[tokio::test]
    async fn test_recv_tags_channel_kind() {
        let hub = InMemoryHub::new();
        let mut conn = connection(&hub, Uuid::new_v4());
        conn.connect(false).await.unwrap();

        let event = SyncEvent::QuizPreparationChange(PreparationUpdate {
            step: "questions_ready".to_string(),
            updated_by: Uuid::new_v4(),
            updated_at: Utc::now(),
            details: Default::default(),
        });
        conn.publish(ChannelKind::Group, &event).await.unwrap();

        assert_eq!(
            conn.recv().await,
            Inbound::Event {
                channel: ChannelKind::Group,
                event
            }
        );
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let hub = InMemoryHub::new();
        let conn = connection(&hub, Uuid::new_v4());
        let event = SyncEvent::QuizPreparationChange(PreparationUpdate {
            step: "questions_ready".to_string(),
            updated_by: Uuid::new_v4(),
            updated_at: Utc::now(),
            details: Default::default(),
        });

        assert!(matches!(
            conn.publish(ChannelKind::Room, &event).await,
            Err(TransportError::Closed)
        ));
    }
}
