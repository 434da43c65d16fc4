//! Session data model
//!
//! The types consumers read: the local [`Session`] record, the presence
//! entries, the preparation view and the notices surfaced to the UI.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messages::PreparationUpdate;

/// Local view of the session lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Waiting,
    Starting,
    Active,
    Completed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Waiting => write!(f, "waiting"),
            SessionStatus::Starting => write!(f, "starting"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Completed => write!(f, "completed"),
        }
    }
}

/// One quiz instance scoped to a group
///
/// `countdown_seconds` is `Some` exactly while `status` is
/// [`SessionStatus::Starting`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub session_id: Uuid,
    pub group_id: Uuid,
    pub status: SessionStatus,

    /// Participant whose broadcast started the countdown
    pub started_by: Option<Uuid>,

    /// When the start broadcast was issued
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds left before the quiz goes live
    pub countdown_seconds: Option<u32>,
}

impl Session {
    pub fn new(session_id: Uuid, group_id: Uuid) -> Self {
        Self {
            session_id,
            group_id,
            status: SessionStatus::Waiting,
            started_by: None,
            started_at: None,
            countdown_seconds: None,
        }
    }

    /// Completed sessions accept no further mutation
    pub fn is_terminal(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}

/// Capability handed in by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub participant_id: Uuid,

    /// Whether this participant may drive lifecycle transitions
    pub can_manage: bool,
}

impl Identity {
    pub fn manager(participant_id: Uuid) -> Self {
        Self {
            participant_id,
            can_manage: true,
        }
    }

    pub fn member(participant_id: Uuid) -> Self {
        Self {
            participant_id,
            can_manage: false,
        }
    }
}

/// Presence entry tracked on the room channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMeta {
    pub participant_id: Uuid,
    pub joined_at: DateTime<Utc>,
}

impl PresenceMeta {
    pub fn now(participant_id: Uuid) -> Self {
        Self {
            participant_id,
            joined_at: Utc::now(),
        }
    }
}

/// Last-write-wins register for one preparation field
#[derive(Debug, Clone, PartialEq)]
struct Stamped<T> {
    value: T,
    updated_at: DateTime<Utc>,
}

/// Pre-session preparation state as seen by this participant
///
/// Each field (including `step`) is merged independently: an update only
/// overwrites a field when it is at least as recent as the stored value,
/// so out-of-order delivery converges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparationView {
    step: Option<Stamped<String>>,
    updated_by: Option<Uuid>,
    fields: BTreeMap<String, Stamped<serde_json::Value>>,
}

impl PreparationView {
    pub fn step(&self) -> Option<&str> {
        self.step.as_ref().map(|s| s.value.as_str())
    }

    pub fn updated_by(&self) -> Option<Uuid> {
        self.updated_by
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.step.as_ref().map(|s| s.updated_at)
    }

    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name).map(|s| &s.value)
    }

    /// Merge an update; returns true when anything changed
    pub fn merge(&mut self, update: &PreparationUpdate) -> bool {
        let mut changed = false;
        let at = update.updated_at;

        let step_is_newer = self.step.as_ref().map_or(true, |s| s.updated_at <= at);
        if step_is_newer && self.step() != Some(update.step.as_str()) {
            changed = true;
        }
        if step_is_newer {
            self.step = Some(Stamped {
                value: update.step.clone(),
                updated_at: at,
            });
            self.updated_by = Some(update.updated_by);
        }

        for (name, value) in &update.details {
            let newer = self.fields.get(name).map_or(true, |s| s.updated_at <= at);
            if !newer {
                continue;
            }
            if self.fields.get(name).map(|s| &s.value) != Some(value) {
                changed = true;
            }
            self.fields.insert(
                name.clone(),
                Stamped {
                    value: value.clone(),
                    updated_at: at,
                },
            );
        }

        changed
    }
}

/// User-visible notices raised by the coordination layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A quiz is starting while this participant is not in the room
    JoinNow {
        session_id: Uuid,
        started_by: Uuid,
        quiz_title: Option<String>,
    },

    /// A manager cancelled the pending start
    QuizCancelled { cancelled_by: Uuid },

    /// A manager moved the preparation forward
    PreparationChanged { step: String, updated_by: Uuid },

    /// Start requested while the previous one is still pending
    DuplicateStart,

    /// A broadcast could not be delivered; local state was restored
    PublishFailed { reason: String },

    /// The channel subscription dropped
    ConnectionLost,
}

/// Everything a UI consumer reads about the session
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    pub session: Session,
    pub preparation: PreparationView,
    pub participants: Vec<PresenceMeta>,
    pub is_connected: bool,
    pub in_room: bool,
    pub broadcast_pending: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn update(step: &str, at: DateTime<Utc>, details: serde_json::Value) -> PreparationUpdate {
        PreparationUpdate {
            step: step.to_string(),
            updated_by: Uuid::nil(),
            updated_at: at,
            details: details.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_new_session_is_waiting() {
        let session = Session::new(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(session.status, SessionStatus::Waiting);
        assert!(session.countdown_seconds.is_none());
        assert!(!session.is_terminal());
    }

    #[test]
    fn test_preparation_merge_in_order() {
        let t0 = Utc::now();
        let mut view = PreparationView::default();

        assert!(view.merge(&update("preset_selected", t0, json!({"preset": "verbs"}))));
        assert!(view.merge(&update(
            "questions_ready",
            t0 + Duration::seconds(1),
            json!({"questionCount": 10})
        )));

        assert_eq!(view.step(), Some("questions_ready"));
        assert_eq!(view.field("preset"), Some(&json!("verbs")));
        assert_eq!(view.field("questionCount"), Some(&json!(10)));
    }

    #[test]
    fn test_preparation_merge_out_of_order_is_last_write_wins() {
        let t0 = Utc::now();
        let mut view = PreparationView::default();

        view.merge(&update(
            "questions_ready",
            t0 + Duration::seconds(2),
            json!({"preset": "nouns"}),
        ));
        // Older update arrives late: stale fields are ignored, new ones kept.
        let changed = view.merge(&update(
            "preset_selected",
            t0,
            json!({"preset": "verbs", "difficulty": "hard"}),
        ));

        assert!(changed);
        assert_eq!(view.step(), Some("questions_ready"));
        assert_eq!(view.field("preset"), Some(&json!("nouns")));
        assert_eq!(view.field("difficulty"), Some(&json!("hard")));
    }

    #[test]
    fn test_preparation_merge_duplicate_is_unchanged() {
        let t0 = Utc::now();
        let mut view = PreparationView::default();
        let u = update("preset_selected", t0, json!({"preset": "verbs"}));

        assert!(view.merge(&u));
        assert!(!view.merge(&u));
    }
}
