//! Broadcast emitter
//!
//! Role-gated publishing of lifecycle events. The publisher applies its own
//! transition locally before the message goes out (it must not rely on
//! receiving its own broadcast) and restores the previous state if the
//! room-channel publish fails.

use chrono::Utc;

use crate::connection::ChannelKind;
use crate::coordinator::SyncLoop;
use crate::error::{BroadcastError, BroadcastResult};
use crate::machine::{Checkpoint, SessionCore};
use crate::messages::{PreparationUpdate, QuizCancelled, QuizStarting, StateChange, SyncEvent};
use crate::timer::SessionTimers;
use crate::types::Notice;

/// Role, connection and terminal-state gate shared by every broadcast
pub(crate) fn check_gate(core: &SessionCore, connected: bool) -> BroadcastResult {
    if !core.identity().can_manage {
        return Err(BroadcastError::NotAuthorized);
    }
    if !connected {
        return Err(BroadcastError::NotConnected);
    }
    if core.session().is_terminal() {
        return Err(BroadcastError::SessionCompleted);
    }
    Ok(())
}

/// Everything a failed publish has to put back
struct Rollback {
    state: Checkpoint,
    timers: SessionTimers,
}

impl SyncLoop {
    pub(crate) async fn broadcast_start(&mut self) -> BroadcastResult {
        self.gate("quiz_starting")?;

        if self.timers.guard_armed() {
            tracing::warn!(
                session_id = %self.core.session().session_id,
                "Quiz start already pending, ignoring duplicate"
            );
            self.notify(Notice::DuplicateStart);
            return Err(BroadcastError::AlreadyPending);
        }

        let session = self.core.session();
        let payload = QuizStarting {
            started_by: self.core.identity().participant_id,
            started_at: Utc::now(),
            countdown: self.config.countdown_secs,
            session_id: session.session_id,
            quiz_title: self.core.quiz_title().map(str::to_string),
            share_tokens: None,
        };

        let rollback = self.rollback_point();
        self.timers.arm_guard(self.config.guard_window());
        if self.core.in_room() {
            let effects = self.core.apply_starting(&payload);
            self.run_effects(effects);
        }
        self.publish_snapshot();

        let room_event = SyncEvent::SessionStateChange(StateChange::QuizStarting(payload.clone()));
        self.publish_or_rollback(&room_event, rollback).await?;

        // Clients outside this session room learn of the start here
        let group_event = SyncEvent::QuizSessionStart(payload);
        if let Err(e) = self.connection.publish(ChannelKind::Group, &group_event).await {
            tracing::error!(
                session_id = %self.core.session().session_id,
                error = %e,
                "Failed to publish group-wide start notification"
            );
        }

        tracing::info!(
            session_id = %self.core.session().session_id,
            countdown = self.config.countdown_secs,
            "Quiz start broadcast"
        );
        Ok(())
    }

    pub(crate) async fn broadcast_cancellation(&mut self) -> BroadcastResult {
        self.gate("quiz_cancelled")?;

        let rollback = self.rollback_point();
        let effects = self.core.cancel_locally();
        self.run_effects(effects);
        self.publish_snapshot();

        let event = SyncEvent::SessionStateChange(StateChange::QuizCancelled(QuizCancelled {
            cancelled_by: self.core.identity().participant_id,
            cancelled_at: Utc::now(),
        }));
        self.publish_or_rollback(&event, rollback).await?;

        tracing::info!(
            session_id = %self.core.session().session_id,
            "Quiz cancellation broadcast"
        );
        Ok(())
    }

    pub(crate) async fn broadcast_preparation(
        &mut self,
        step: String,
        details: serde_json::Map<String, serde_json::Value>,
    ) -> BroadcastResult {
        self.gate("quiz_preparation_change")?;

        let update = PreparationUpdate {
            step,
            updated_by: self.core.identity().participant_id,
            updated_at: Utc::now(),
            details,
        };

        let rollback = self.rollback_point();
        self.core.apply_local_preparation(&update);
        self.publish_snapshot();

        let event = SyncEvent::QuizPreparationChange(update);
        self.publish_or_rollback(&event, rollback).await
    }

    fn gate(&self, event: &'static str) -> BroadcastResult {
        check_gate(&self.core, self.connection.is_connected()).map_err(|e| {
            tracing::warn!(
                session_id = %self.core.session().session_id,
                participant_id = %self.core.identity().participant_id,
                event,
                reason = %e,
                "Broadcast rejected"
            );
            e
        })
    }

    fn rollback_point(&self) -> Rollback {
        Rollback {
            state: self.core.checkpoint(),
            timers: self.timers.clone(),
        }
    }

    async fn publish_or_rollback(
        &mut self,
        event: &SyncEvent,
        rollback: Rollback,
    ) -> BroadcastResult {
        let Err(e) = self.connection.publish(ChannelKind::Room, event).await else {
            return Ok(());
        };

        tracing::error!(
            session_id = %self.core.session().session_id,
            event = event.kind(),
            error = %e,
            "Broadcast failed, restoring local state"
        );

        self.core.restore(rollback.state);
        self.timers = rollback.timers;
        self.notify(Notice::PublishFailed {
            reason: e.to_string(),
        });
        Err(BroadcastError::Publish(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identity;
    use assert_matches::assert_matches;
    use uuid::Uuid;

    fn core(identity: Identity) -> SessionCore {
        SessionCore::new(Uuid::new_v4(), Uuid::new_v4(), identity, true, None)
    }

    #[test]
    fn test_gate_order() {
        let member = core(Identity::member(Uuid::new_v4()));
        assert_matches!(check_gate(&member, false), Err(BroadcastError::NotAuthorized));
        assert_matches!(check_gate(&member, true), Err(BroadcastError::NotAuthorized));

        let mut manager = core(Identity::manager(Uuid::new_v4()));
        assert_matches!(check_gate(&manager, false), Err(BroadcastError::NotConnected));
        assert_matches!(check_gate(&manager, true), Ok(()));

        manager.complete();
        assert_matches!(check_gate(&manager, true), Err(BroadcastError::SessionCompleted));
    }
}
