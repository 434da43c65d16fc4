//! Event router
//!
//! The single entry point for inbound traffic. Every channel event is
//! checked against the local participant id before it reaches the state
//! machine: the emitter already applied our own transitions at publish
//! time, and transports are free to echo a publisher's messages back.

use crate::connection::{ChannelKind, Inbound};
use crate::machine::{Effect, SessionCore};
use crate::messages::{StateChange, SyncEvent};
use crate::types::Notice;

/// Apply one inbound message to the session
pub fn route(core: &mut SessionCore, inbound: Inbound) -> Vec<Effect> {
    match inbound {
        Inbound::Event { channel, event } => route_event(core, channel, event),
        Inbound::RowUpdate(row) => core.apply_row(&row),
        Inbound::Lost => vec![Effect::Notify(Notice::ConnectionLost)],
        Inbound::PresenceChanged => Vec::new(),
    }
}

fn route_event(core: &mut SessionCore, channel: ChannelKind, event: SyncEvent) -> Vec<Effect> {
    let session_id = core.session().session_id;
    let originator = event.originator();

    if originator == core.identity().participant_id {
        tracing::debug!(
            session_id = %session_id,
            event = event.kind(),
            ?channel,
            "Ignoring self-originated event"
        );
        return Vec::new();
    }

    tracing::debug!(
        session_id = %session_id,
        event = event.kind(),
        originator = %originator,
        ?channel,
        "Routing peer event"
    );

    match event {
        SyncEvent::QuizSessionStart(start)
        | SyncEvent::SessionStateChange(StateChange::QuizStarting(start)) => {
            // The group channel carries starts for every session in the group
            if start.session_id != session_id {
                tracing::debug!(
                    session_id = %session_id,
                    other_session_id = %start.session_id,
                    "Ignoring start for another session"
                );
                return Vec::new();
            }
            // Cancels only travel on the room channel, so a group copy
            // can overtake one and must never restart the countdown.
            if channel == ChannelKind::Group {
                tracing::debug!(
                    session_id = %session_id,
                    started_by = %start.started_by,
                    "Ignoring group copy of own session start"
                );
                return Vec::new();
            }
            core.apply_starting(&start)
        }
        SyncEvent::SessionStateChange(StateChange::QuizCancelled(cancel)) => {
            core.apply_cancelled(&cancel)
        }
        SyncEvent::QuizPreparationChange(update) => core.apply_preparation(&update),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{PreparationUpdate, QuizCancelled, QuizStarting};
    use crate::store::{BackingStatus, SessionRow};
    use crate::types::{Identity, SessionStatus};
    use chrono::Utc;
    use tracing_test::traced_test;
    use uuid::Uuid;

    fn member_core(in_room: bool) -> SessionCore {
        SessionCore::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Identity::member(Uuid::new_v4()),
            in_room,
            None,
        )
    }

    fn start_event(core: &SessionCore, started_by: Uuid) -> SyncEvent {
        SyncEvent::SessionStateChange(StateChange::QuizStarting(QuizStarting {
            started_by,
            started_at: Utc::now(),
            countdown: 5,
            session_id: core.session().session_id,
            quiz_title: None,
            share_tokens: None,
        }))
    }

    fn room(event: SyncEvent) -> Inbound {
        Inbound::Event {
            channel: ChannelKind::Room,
            event,
        }
    }

    #[test]
    fn test_self_originated_events_are_dropped() {
        let mut core = member_core(true);
        let me = core.identity().participant_id;

        let event = start_event(&core, me);
        let effects = route(&mut core, room(event));

        assert!(effects.is_empty());
        assert_eq!(core.session().status, SessionStatus::Waiting);
    }

    #[test]
    #[traced_test]
    fn test_self_echo_is_logged() {
        let mut core = member_core(true);
        let me = core.identity().participant_id;
        let cancel = SyncEvent::SessionStateChange(StateChange::QuizCancelled(QuizCancelled {
            cancelled_by: me,
            cancelled_at: Utc::now(),
        }));

        route(&mut core, room(cancel));

        assert!(logs_contain("Ignoring self-originated event"));
        assert!(!logs_contain("Routing peer event"));
    }

    #[test]
    fn test_peer_start_is_applied() {
        let mut core = member_core(true);
        let owner = Uuid::new_v4();

        let event = start_event(&core, owner);
        let effects = route(&mut core, room(event));

        assert_eq!(effects, vec![Effect::ArmCountdown]);
        assert_eq!(core.session().status, SessionStatus::Starting);
        assert_eq!(core.session().started_by, Some(owner));
    }

    #[test]
    fn test_group_start_for_other_session_is_ignored() {
        let mut core = member_core(false);
        let event = SyncEvent::QuizSessionStart(QuizStarting {
            started_by: Uuid::new_v4(),
            started_at: Utc::now(),
            countdown: 5,
            session_id: Uuid::new_v4(),
            quiz_title: None,
            share_tokens: None,
        });

        let effects = route(
            &mut core,
            Inbound::Event {
                channel: ChannelKind::Group,
                event,
            },
        );

        assert!(effects.is_empty());
        assert_eq!(core.session().status, SessionStatus::Waiting);
    }

    #[test]
    fn test_same_start_on_both_channels_applies_once() {
        let mut core = member_core(false);
        let owner = Uuid::new_v4();
        let SyncEvent::SessionStateChange(StateChange::QuizStarting(start)) =
            start_event(&core, owner)
        else {
            unreachable!()
        };

        let first = route(
            &mut core,
            room(SyncEvent::SessionStateChange(StateChange::QuizStarting(
                start.clone(),
            ))),
        );
        let second = route(
            &mut core,
            Inbound::Event {
                channel: ChannelKind::Group,
                event: SyncEvent::QuizSessionStart(start),
            },
        );

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
    }

    #[test]
    fn test_group_copy_after_cancel_keeps_waiting() {
        let mut core = member_core(true);
        let owner = Uuid::new_v4();
        let SyncEvent::SessionStateChange(StateChange::QuizStarting(start)) =
            start_event(&core, owner)
        else {
            unreachable!()
        };
        let cancel = SyncEvent::SessionStateChange(StateChange::QuizCancelled(QuizCancelled {
            cancelled_by: owner,
            cancelled_at: Utc::now(),
        }));

        route(
            &mut core,
            room(SyncEvent::SessionStateChange(StateChange::QuizStarting(
                start.clone(),
            ))),
        );
        route(&mut core, room(cancel));
        let late = route(
            &mut core,
            Inbound::Event {
                channel: ChannelKind::Group,
                event: SyncEvent::QuizSessionStart(start),
            },
        );

        assert!(late.is_empty());
        assert_eq!(core.session().status, SessionStatus::Waiting);
        assert_eq!(core.session().countdown_seconds, None);
    }

    #[tokio::test]
    async fn test_interleaved_channels_converge_after_cancel() {
        use crate::connection::ChannelConnection;
        use crate::transport::InMemoryHub;
        use std::sync::Arc;

        let hub = InMemoryHub::new();
        let owner_id = Uuid::new_v4();
        let mut owner = ChannelConnection::new(
            Arc::new(hub.clone()),
            "quiz-sync-s1".to_string(),
            "group-wide-notifications-g1".to_string(),
            owner_id,
        );
        owner.connect(false).await.unwrap();

        // Delivery order across the two receivers varies from run to run
        for _ in 0..100 {
            let mut core = member_core(false);
            let mut member = ChannelConnection::new(
                Arc::new(hub.clone()),
                "quiz-sync-s1".to_string(),
                "group-wide-notifications-g1".to_string(),
                core.identity().participant_id,
            );
            member.connect(false).await.unwrap();

            let start = QuizStarting {
                started_by: owner_id,
                started_at: Utc::now(),
                countdown: 5,
                session_id: core.session().session_id,
                quiz_title: None,
                share_tokens: None,
            };
            let cancel = SyncEvent::SessionStateChange(StateChange::QuizCancelled(QuizCancelled {
                cancelled_by: owner_id,
                cancelled_at: Utc::now(),
            }));
            owner
                .publish(
                    ChannelKind::Room,
                    &SyncEvent::SessionStateChange(StateChange::QuizStarting(start.clone())),
                )
                .await
                .unwrap();
            owner
                .publish(ChannelKind::Group, &SyncEvent::QuizSessionStart(start))
                .await
                .unwrap();
            owner.publish(ChannelKind::Room, &cancel).await.unwrap();

            for _ in 0..3 {
                let inbound = member.recv().await;
                route(&mut core, inbound);
            }

            assert_eq!(core.session().status, SessionStatus::Waiting);
            member.disconnect().await;
        }
    }

    #[test]
    fn test_peer_cancel_surfaces_notice() {
        let mut core = member_core(true);
        let owner = Uuid::new_v4();
        let start = start_event(&core, owner);
        route(&mut core, room(start));

        let cancel = SyncEvent::SessionStateChange(StateChange::QuizCancelled(QuizCancelled {
            cancelled_by: owner,
            cancelled_at: Utc::now(),
        }));
        let effects = route(&mut core, room(cancel));

        assert!(effects.contains(&Effect::Notify(Notice::QuizCancelled { cancelled_by: owner })));
        assert_eq!(core.session().status, SessionStatus::Waiting);
    }

    #[test]
    fn test_preparation_from_peer_reaches_member() {
        let mut core = member_core(true);
        let update = SyncEvent::QuizPreparationChange(PreparationUpdate {
            step: "questions_ready".to_string(),
            updated_by: Uuid::new_v4(),
            updated_at: Utc::now(),
            details: Default::default(),
        });

        let effects = route(&mut core, room(update));

        assert_eq!(effects.len(), 1);
        assert_eq!(core.preparation().step(), Some("questions_ready"));
    }

    #[test]
    fn test_lost_connection_notifies() {
        let mut core = member_core(true);
        assert_eq!(
            route(&mut core, Inbound::Lost),
            vec![Effect::Notify(Notice::ConnectionLost)]
        );
    }

    #[test]
    fn test_row_update_is_routed() {
        let mut core = member_core(true);
        let row = SessionRow {
            id: core.session().session_id,
            group_id: core.session().group_id,
            status: BackingStatus::Active,
        };

        route(&mut core, Inbound::RowUpdate(row));
        assert_eq!(core.session().status, SessionStatus::Active);
    }
}
