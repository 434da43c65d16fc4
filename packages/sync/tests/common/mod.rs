//! Common test utilities for quiz sync integration tests
//!
//! A [`Room`] is one session on an in-memory hub wrapped in a
//! [`FlakyTransport`]; participants join it with their own navigator.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use lexiquiz_sync::{
    Identity, InMemoryHub, Notice, QuizSync, SessionContext, SessionStore, SyncConfig, SyncDeps,
    SyncSnapshot,
};
use lexiquiz_test_utils::{FlakyTransport, MockSessionStore, RecordingNavigator};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Upper bound for any wait in these tests (virtual time)
const WAIT_LIMIT: Duration = Duration::from_secs(60);

pub struct Room {
    pub hub: InMemoryHub,
    pub transport: FlakyTransport,
    pub config: SyncConfig,
    pub session_id: Uuid,
    pub group_id: Uuid,
    pub store: Option<MockSessionStore>,
}

pub struct Participant {
    pub id: Uuid,
    pub sync: QuizSync,
    pub navigator: RecordingNavigator,
}

impl Room {
    pub fn new() -> Self {
        let hub = InMemoryHub::new();
        Self {
            transport: FlakyTransport::new(hub.clone()),
            hub,
            config: SyncConfig::default(),
            session_id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            store: None,
        }
    }

    pub fn with_store(mut self, store: MockSessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn room_channel(&self) -> String {
        self.config.room_channel(self.session_id)
    }

    pub fn group_channel(&self) -> String {
        self.config.group_channel(self.group_id)
    }

    /// Spawn a participant without waiting for the connection
    pub fn spawn(&self, identity: Identity, in_room: bool) -> Participant {
        let navigator = RecordingNavigator::new();
        let context = SessionContext {
            session_id: self.session_id,
            group_id: self.group_id,
            identity,
            in_room,
            quiz_title: Some("Irregular verbs".to_string()),
        };
        let deps = SyncDeps {
            transport: Arc::new(self.transport.clone()),
            navigator: Arc::new(navigator.clone()),
            store: self
                .store
                .clone()
                .map(|s| Arc::new(s) as Arc<dyn SessionStore>),
        };

        Participant {
            id: identity.participant_id,
            sync: QuizSync::spawn(context, self.config.clone(), deps),
            navigator,
        }
    }

    /// Spawn a participant and wait until its channels are subscribed
    pub async fn join(&self, identity: Identity, in_room: bool) -> Participant {
        let participant = self.spawn(identity, in_room);
        wait_until(&participant.sync, |s| s.is_connected).await;
        participant
    }

    pub async fn owner(&self) -> Participant {
        self.join(Identity::manager(Uuid::new_v4()), true).await
    }

    pub async fn member(&self) -> Participant {
        self.join(Identity::member(Uuid::new_v4()), true).await
    }
}

/// Wait for a snapshot matching `predicate`
pub async fn wait_until(
    sync: &QuizSync,
    predicate: impl FnMut(&SyncSnapshot) -> bool,
) -> SyncSnapshot {
    let mut rx = sync.watch();
    let snapshot = tokio::time::timeout(WAIT_LIMIT, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for snapshot")
        .expect("sync loop dropped its snapshot sender")
        .clone();
    snapshot
}

/// Everything currently buffered on a notice receiver
pub fn drain(notices: &mut broadcast::Receiver<Notice>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        out.push(notice);
    }
    out
}

/// Let spawned loops process everything already delivered
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
