//! Mock session store for reconciliation tests
//!
//! Rows live in memory; [`MockSessionStore::set_status`] updates a row and
//! pushes the change to every watcher of that session, standing in for the
//! database change feed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use lexiquiz_sync::{BackingStatus, SessionRow, SessionStore, StoreError};
use tokio::sync::mpsc;
use uuid::Uuid;

const WATCH_CAPACITY: usize = 16;

#[derive(Clone, Default)]
pub struct MockSessionStore {
    rows: Arc<RwLock<HashMap<Uuid, SessionRow>>>,
    watchers: Arc<RwLock<Vec<(Uuid, mpsc::Sender<SessionRow>)>>>,
}

impl MockSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a row without notifying watchers
    pub fn insert(&self, row: SessionRow) {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        rows.insert(row.id, row);
    }

    /// Change a row's status and notify watchers
    ///
    /// Returns false when the session is unknown.
    pub fn set_status(&self, session_id: Uuid, status: BackingStatus) -> bool {
        let row = {
            let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
            let Some(row) = rows.get_mut(&session_id) else {
                return false;
            };
            row.status = status;
            row.clone()
        };

        let mut watchers = self.watchers.write().unwrap_or_else(|e| e.into_inner());
        watchers.retain(|(id, tx)| {
            if *id != session_id {
                return !tx.is_closed();
            }
            tx.try_send(row.clone()).is_ok()
        });
        true
    }

    /// Number of live watchers
    pub fn watcher_count(&self) -> usize {
        let watchers = self.watchers.read().unwrap_or_else(|e| e.into_inner());
        watchers.iter().filter(|(_, tx)| !tx.is_closed()).count()
    }
}

#[async_trait]
impl SessionStore for MockSessionStore {
    async fn fetch_session(&self, session_id: Uuid) -> Result<Option<SessionRow>, StoreError> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        Ok(rows.get(&session_id).cloned())
    }

    async fn watch_session(
        &self,
        session_id: Uuid,
    ) -> Result<mpsc::Receiver<SessionRow>, StoreError> {
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        let mut watchers = self.watchers.write().unwrap_or_else(|e| e.into_inner());
        watchers.push((session_id, tx));
        Ok(rx)
    }
}
