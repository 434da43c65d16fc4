//! Session state machine
//!
//! `SessionCore` owns the canonical local [`Session`] and the preparation
//! view. Transitions are synchronous and return the [`Effect`]s the
//! coordination loop must carry out (timers, notices, navigation), which
//! keeps the transition table testable without a runtime.
//!
//! ```text
//! waiting ──start──▶ starting ──countdown elapsed──▶ active ──▶ completed
//!    ▲                  │
//!    └────cancelled─────┘
//! ```

use uuid::Uuid;

use crate::messages::{PreparationUpdate, QuizCancelled, QuizStarting};
use crate::store::{BackingStatus, SessionRow};
use crate::types::{Identity, Notice, PreparationView, Session, SessionStatus};

/// Side effect requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Notify(Notice),
    /// Begin the one-second countdown ticks
    ArmCountdown,
    DisarmCountdown,
    /// Clear the pending-broadcast guard
    ReleaseGuard,
    /// Navigate the local participant into the live quiz
    EnterQuiz,
}

/// Copy of the mutable state, restored when a broadcast fails
#[derive(Debug, Clone)]
pub struct Checkpoint {
    session: Session,
    preparation: PreparationView,
}

#[derive(Debug, Clone)]
pub struct SessionCore {
    session: Session,
    preparation: PreparationView,
    identity: Identity,
    in_room: bool,
    quiz_title: Option<String>,
}

impl SessionCore {
    pub fn new(
        session_id: Uuid,
        group_id: Uuid,
        identity: Identity,
        in_room: bool,
        quiz_title: Option<String>,
    ) -> Self {
        Self {
            session: Session::new(session_id, group_id),
            preparation: PreparationView::default(),
            identity,
            in_room,
            quiz_title,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn preparation(&self) -> &PreparationView {
        &self.preparation
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn in_room(&self) -> bool {
        self.in_room
    }

    pub fn quiz_title(&self) -> Option<&str> {
        self.quiz_title.as_deref()
    }

    pub fn set_in_room(&mut self, in_room: bool) {
        self.in_room = in_room;
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            session: self.session.clone(),
            preparation: self.preparation.clone(),
        }
    }

    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.session = checkpoint.session;
        self.preparation = checkpoint.preparation;
    }

    /// `waiting → starting`
    ///
    /// Applied only from `waiting`: a start for a session already counting
    /// down or live is a duplicate (the same start arrives on the room and
    /// the group channel).
    pub fn apply_starting(&mut self, start: &QuizStarting) -> Vec<Effect> {
        if self.session.status != SessionStatus::Waiting {
            tracing::debug!(
                session_id = %self.session.session_id,
                status = %self.session.status,
                "Ignoring start for session that is not waiting"
            );
            return Vec::new();
        }

        // A zero countdown would leave `starting` without a countdown value
        let countdown = start.countdown.max(1);

        self.session.status = SessionStatus::Starting;
        self.session.started_by = Some(start.started_by);
        self.session.started_at = Some(start.started_at);
        self.session.countdown_seconds = Some(countdown);

        tracing::info!(
            session_id = %self.session.session_id,
            started_by = %start.started_by,
            countdown,
            in_room = self.in_room,
            "Quiz starting"
        );

        let mut effects = vec![Effect::ArmCountdown];
        if !self.in_room {
            effects.push(Effect::Notify(Notice::JoinNow {
                session_id: self.session.session_id,
                started_by: start.started_by,
                quiz_title: start.quiz_title.clone().or_else(|| self.quiz_title.clone()),
            }));
        }
        effects
    }

    /// Reset a peer-cancelled session to `waiting`
    pub fn apply_cancelled(&mut self, cancel: &QuizCancelled) -> Vec<Effect> {
        if self.session.is_terminal() {
            return Vec::new();
        }

        let changed = self.reset_to_waiting();
        if changed {
            tracing::info!(
                session_id = %self.session.session_id,
                cancelled_by = %cancel.cancelled_by,
                "Quiz start cancelled"
            );
        }

        let mut effects = vec![Effect::DisarmCountdown, Effect::ReleaseGuard];
        if changed {
            effects.push(Effect::Notify(Notice::QuizCancelled {
                cancelled_by: cancel.cancelled_by,
            }));
        }
        effects
    }

    /// Reset for a cancellation this participant issued
    pub fn cancel_locally(&mut self) -> Vec<Effect> {
        if self.session.is_terminal() {
            return Vec::new();
        }

        self.reset_to_waiting();
        vec![Effect::DisarmCountdown, Effect::ReleaseGuard]
    }

    fn reset_to_waiting(&mut self) -> bool {
        let changed = self.session.status != SessionStatus::Waiting;
        self.session.status = SessionStatus::Waiting;
        self.session.started_by = None;
        self.session.started_at = None;
        self.session.countdown_seconds = None;
        changed
    }

    /// One second of the countdown elapsed
    pub fn tick(&mut self) -> Vec<Effect> {
        let remaining = match (self.session.status, self.session.countdown_seconds) {
            (SessionStatus::Starting, Some(remaining)) => remaining.saturating_sub(1),
            _ => return vec![Effect::DisarmCountdown],
        };

        if remaining > 0 {
            self.session.countdown_seconds = Some(remaining);
            return Vec::new();
        }

        self.session.status = SessionStatus::Active;
        self.session.countdown_seconds = None;

        tracing::info!(
            session_id = %self.session.session_id,
            in_room = self.in_room,
            "Countdown elapsed, quiz is live"
        );

        let mut effects = vec![Effect::DisarmCountdown];
        if self.in_room {
            effects.push(Effect::EnterQuiz);
        }
        effects
    }

    /// Merge a peer's preparation update
    ///
    /// Managers drive preparation themselves and ignore peer updates.
    pub fn apply_preparation(&mut self, update: &PreparationUpdate) -> Vec<Effect> {
        if self.identity.can_manage || self.session.is_terminal() {
            return Vec::new();
        }

        if !self.preparation.merge(update) {
            return Vec::new();
        }

        tracing::debug!(
            session_id = %self.session.session_id,
            step = %update.step,
            "Preparation updated"
        );

        vec![Effect::Notify(Notice::PreparationChanged {
            step: update.step.clone(),
            updated_by: update.updated_by,
        })]
    }

    /// Record a preparation update this participant issued
    pub fn apply_local_preparation(&mut self, update: &PreparationUpdate) {
        self.preparation.merge(update);
    }

    /// Reconcile with the backing row
    pub fn apply_row(&mut self, row: &SessionRow) -> Vec<Effect> {
        if row.id != self.session.session_id {
            return Vec::new();
        }

        match row.status {
            BackingStatus::Scheduled => Vec::new(),
            BackingStatus::Active => {
                if self.session.is_terminal() || self.session.status == SessionStatus::Active {
                    return Vec::new();
                }
                self.session.status = SessionStatus::Active;
                self.session.countdown_seconds = None;
                tracing::info!(session_id = %self.session.session_id, "Backing session is active");
                vec![Effect::DisarmCountdown, Effect::ReleaseGuard]
            }
            BackingStatus::Completed | BackingStatus::Cancelled => self.complete(),
        }
    }

    /// Terminal transition; nothing mutates the session afterwards
    pub fn complete(&mut self) -> Vec<Effect> {
        if self.session.is_terminal() {
            return Vec::new();
        }

        self.session.status = SessionStatus::Completed;
        self.session.countdown_seconds = None;
        tracing::info!(session_id = %self.session.session_id, "Session completed");

        vec![Effect::DisarmCountdown, Effect::ReleaseGuard]
    }
}
