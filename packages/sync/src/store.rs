//! Backing session store
//!
//! The relational store is the slow, authoritative record of a session's
//! status. The coordination loop reads it once on connect and then follows
//! row changes so that a session finished or cancelled elsewhere converges
//! locally even if the channel event was missed.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use lexiquiz_shared_config::DatabaseConfig;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgListener, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::StoreError;

/// Buffer for row updates waiting to be routed
const ROW_UPDATE_CAPACITY: usize = 16;

/// Status column of `group_quiz_sessions`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackingStatus {
    Scheduled,
    Active,
    Completed,
    Cancelled,
}

impl FromStr for BackingStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// Row-level view of a backing session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRow {
    pub id: Uuid,
    pub group_id: Uuid,
    pub status: BackingStatus,
}

/// Read access to the backing session record
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current row, or `None` if the session does not exist
    async fn fetch_session(&self, session_id: Uuid) -> Result<Option<SessionRow>, StoreError>;

    /// Stream of subsequent row changes for one session
    async fn watch_session(
        &self,
        session_id: Uuid,
    ) -> Result<mpsc::Receiver<SessionRow>, StoreError>;
}

#[derive(Debug, FromRow)]
struct RawSessionRow {
    id: Uuid,
    group_id: Uuid,
    status: String,
}

impl TryFrom<RawSessionRow> for SessionRow {
    type Error = StoreError;

    fn try_from(raw: RawSessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: raw.id,
            group_id: raw.group_id,
            status: raw.status.parse()?,
        })
    }
}

/// PostgreSQL-backed session store
///
/// Row changes arrive through `LISTEN` on the configured channel; the
/// NOTIFY payload is the JSON-encoded row.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
    notify_channel: String,
}

impl PgSessionStore {
    pub fn new(pool: PgPool, notify_channel: impl Into<String>) -> Self {
        Self {
            pool,
            notify_channel: notify_channel.into(),
        }
    }

    /// Open a pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        Ok(Self::new(pool, config.notify_channel.clone()))
    }
}

/// Decode a NOTIFY payload into a row
fn decode_notification(payload: &str) -> Result<SessionRow, StoreError> {
    Ok(serde_json::from_str(payload)?)
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn fetch_session(&self, session_id: Uuid) -> Result<Option<SessionRow>, StoreError> {
        let raw = sqlx::query_as::<_, RawSessionRow>(
            r#"
            SELECT id, group_id, status
            FROM group_quiz_sessions
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        raw.map(SessionRow::try_from).transpose()
    }

    async fn watch_session(
        &self,
        session_id: Uuid,
    ) -> Result<mpsc::Receiver<SessionRow>, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&self.notify_channel).await?;

        let (tx, rx) = mpsc::channel(ROW_UPDATE_CAPACITY);

        tokio::spawn(async move {
            loop {
                let notification = match listener.recv().await {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::error!(session_id = %session_id, error = %e, "Session row listener failed");
                        break;
                    }
                };

                let row = match decode_notification(notification.payload()) {
                    Ok(row) => row,
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring malformed session change payload");
                        continue;
                    }
                };

                if row.id != session_id {
                    continue;
                }

                if tx.send(row).await.is_err() {
                    // Coordinator is gone
                    break;
                }
            }
        });

        Ok(rx)
    }
}
