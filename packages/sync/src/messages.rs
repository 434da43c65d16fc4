//! Channel message types for quiz-session synchronization
//!
//! Every message on a session or group channel is an envelope
//! `{ "event": <name>, "payload": { ... } }`. Inbound envelopes are decoded
//! into the closed [`SyncEvent`] enum; payload fields are camelCase to stay
//! wire-compatible with the browser clients sharing the channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known preparation steps (the field itself is freeform)
pub mod steps {
    pub const PRESET_SELECTED: &str = "preset_selected";
    pub const GENERATING_QUESTIONS: &str = "generating_questions";
    pub const QUESTIONS_READY: &str = "questions_ready";
}

// =============================================================================
// Transport envelope
// =============================================================================

/// Untyped message as carried by the transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub event: String,
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Decode into a typed event; unknown event names are an error
    pub fn decode(&self) -> Result<SyncEvent, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }
}

// =============================================================================
// Typed events
// =============================================================================

/// Every event this core produces or consumes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Group-wide announcement for participants outside the room
    QuizSessionStart(QuizStarting),

    /// Lifecycle change on the session room channel
    SessionStateChange(StateChange),

    /// Pre-session preparation metadata
    QuizPreparationChange(PreparationUpdate),
}

impl SyncEvent {
    /// Participant that published the event
    pub fn originator(&self) -> Uuid {
        match self {
            SyncEvent::QuizSessionStart(start) => start.started_by,
            SyncEvent::SessionStateChange(StateChange::QuizStarting(start)) => start.started_by,
            SyncEvent::SessionStateChange(StateChange::QuizCancelled(cancel)) => {
                cancel.cancelled_by
            }
            SyncEvent::QuizPreparationChange(update) => update.updated_by,
        }
    }

    /// Name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::QuizSessionStart(_) => "quiz_session_start",
            SyncEvent::SessionStateChange(StateChange::QuizStarting(_)) => "quiz_starting",
            SyncEvent::SessionStateChange(StateChange::QuizCancelled(_)) => "quiz_cancelled",
            SyncEvent::QuizPreparationChange(_) => "quiz_preparation_change",
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }
}

/// `session_state_change` payload, discriminated by its `type` field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateChange {
    QuizStarting(QuizStarting),
    QuizCancelled(QuizCancelled),
}

/// Start broadcast carrying the shared countdown
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizStarting {
    pub started_by: Uuid,
    pub started_at: DateTime<Utc>,

    /// Countdown in seconds
    pub countdown: u32,
    pub session_id: Uuid,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz_title: Option<String>,

    /// Opaque join tokens forwarded to out-of-room participants
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_tokens: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizCancelled {
    pub cancelled_by: Uuid,
    pub cancelled_at: DateTime<Utc>,
}

/// Preparation step plus any freeform fields the manager attached
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreparationUpdate {
    pub step: String,
    pub updated_by: Uuid,
    pub updated_at: DateTime<Utc>,

    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Decode a raw JSON envelope
pub fn decode_message(raw: &str) -> Result<SyncEvent, serde_json::Error> {
    serde_json::from_str::<SyncEvent>(raw)
}

/// Encode an event as a JSON envelope
pub fn encode_message(event: &SyncEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
