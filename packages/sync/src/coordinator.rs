//! Session coordination loop
//!
//! Each [`QuizSync`] handle drives one tokio task that exclusively owns the
//! session state, the channel connection and the timers. Local actions
//! arrive as commands, inbound traffic and timer deadlines are selected in
//! the same loop, so every mutation is serialized without locks.
//!
//! Dropping the handle cancels the loop, which withdraws presence, drops
//! the subscriptions and forgets any running countdown before it exits.

use std::sync::Arc;

use lexiquiz_shared_config::SyncConfig;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::connection::{ChannelConnection, Inbound};
use crate::error::{BroadcastError, BroadcastResult};
use crate::machine::{Effect, SessionCore};
use crate::router;
use crate::store::{SessionRow, SessionStore};
use crate::timer::{sleep_until_next, SessionTimers, TimerEvent};
use crate::transport::RealtimeTransport;
use crate::types::{Identity, Notice, SessionStatus, SyncSnapshot};

const COMMAND_CAPACITY: usize = 32;

/// Moves the local user into the live quiz view
pub trait Navigator: Send + Sync {
    fn enter_quiz(&self, session_id: Uuid);
}

/// Who and where the local participant is
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub group_id: Uuid,
    pub identity: Identity,

    /// Whether the participant is currently in the waiting room
    pub in_room: bool,

    /// Shown to out-of-room participants when the quiz starts
    pub quiz_title: Option<String>,
}

/// Collaborators injected into the coordination loop
#[derive(Clone)]
pub struct SyncDeps {
    pub transport: Arc<dyn RealtimeTransport>,
    pub navigator: Arc<dyn Navigator>,
    pub store: Option<Arc<dyn SessionStore>>,
}

pub(crate) enum Command {
    BroadcastStart {
        reply: oneshot::Sender<BroadcastResult>,
    },
    BroadcastCancellation {
        reply: oneshot::Sender<BroadcastResult>,
    },
    BroadcastPreparation {
        step: String,
        details: serde_json::Map<String, serde_json::Value>,
        reply: oneshot::Sender<BroadcastResult>,
    },
    EnterRoom {
        reply: oneshot::Sender<()>,
    },
    LeaveRoom {
        reply: oneshot::Sender<()>,
    },
    Reconnect {
        reply: oneshot::Sender<bool>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Complete {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to one session's coordination loop
pub struct QuizSync {
    session_id: Uuid,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SyncSnapshot>,
    notices: broadcast::Sender<Notice>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl QuizSync {
    /// Spawn the loop and connect to the session channels
    ///
    /// Connection failure is not an error here: the snapshot reports
    /// `is_connected == false` and the caller may [`QuizSync::reconnect`].
    pub fn spawn(context: SessionContext, config: SyncConfig, deps: SyncDeps) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (notices, _) = broadcast::channel(config.notice_capacity);
        let shutdown = CancellationToken::new();

        let connection = ChannelConnection::new(
            deps.transport,
            config.room_channel(context.session_id),
            config.group_channel(context.group_id),
            context.identity.participant_id,
        );
        let core = SessionCore::new(
            context.session_id,
            context.group_id,
            context.identity,
            context.in_room,
            context.quiz_title,
        );
        let (snapshot_tx, snapshot_rx) = watch::channel(snapshot_of(&core, &connection, false));

        let sync_loop = SyncLoop {
            core,
            connection,
            timers: SessionTimers::new(),
            config,
            navigator: deps.navigator,
            store: deps.store,
            rows: None,
            commands: commands_rx,
            notices: notices.clone(),
            snapshot: snapshot_tx,
            shutdown: shutdown.clone(),
        };

        let task = tokio::spawn(sync_loop.run());

        Self {
            session_id: context.session_id,
            commands: commands_tx,
            snapshot: snapshot_rx,
            notices,
            shutdown,
            task: Some(task),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Announce the start countdown to everyone in the session
    pub async fn broadcast_start(&self) -> BroadcastResult {
        self.request(|reply| Command::BroadcastStart { reply }).await?
    }

    /// Abort a pending start for everyone
    pub async fn broadcast_cancellation(&self) -> BroadcastResult {
        self.request(|reply| Command::BroadcastCancellation { reply }).await?
    }

    /// Share preparation progress with members
    pub async fn broadcast_preparation(
        &self,
        step: impl Into<String>,
        details: serde_json::Map<String, serde_json::Value>,
    ) -> BroadcastResult {
        let step = step.into();
        self.request(|reply| Command::BroadcastPreparation {
            step,
            details,
            reply,
        })
        .await?
    }

    pub async fn enter_room(&self) -> BroadcastResult {
        self.request(|reply| Command::EnterRoom { reply }).await
    }

    pub async fn leave_room(&self) -> BroadcastResult {
        self.request(|reply| Command::LeaveRoom { reply }).await
    }

    /// Re-run the subscription handshake; returns whether it succeeded
    pub async fn reconnect(&self) -> BroadcastResult<bool> {
        self.request(|reply| Command::Reconnect { reply }).await
    }

    pub async fn disconnect(&self) -> BroadcastResult {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Record that the quiz finished locally
    pub async fn complete(&self) -> BroadcastResult {
        self.request(|reply| Command::Complete { reply }).await
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.snapshot.borrow().is_connected
    }

    /// Subscribe to snapshot changes
    pub fn watch(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Stop the loop and wait until it has released its resources
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(session_id = %self.session_id, error = %e, "Quiz sync task failed");
            }
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, BroadcastError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| BroadcastError::Closed)?;
        response.await.map_err(|_| BroadcastError::Closed)
    }
}

impl Drop for QuizSync {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// What woke the loop up
enum Wake {
    Shutdown,
    Command(Command),
    Inbound(Inbound),
    RowsClosed,
    Timer(Instant, TimerEvent),
}

pub(crate) struct SyncLoop {
    pub(crate) core: SessionCore,
    pub(crate) connection: ChannelConnection,
    pub(crate) timers: SessionTimers,
    pub(crate) config: SyncConfig,
    pub(crate) navigator: Arc<dyn Navigator>,
    store: Option<Arc<dyn SessionStore>>,
    rows: Option<mpsc::Receiver<SessionRow>>,
    commands: mpsc::Receiver<Command>,
    pub(crate) notices: broadcast::Sender<Notice>,
    snapshot: watch::Sender<SyncSnapshot>,
    shutdown: CancellationToken,
}

impl SyncLoop {
    async fn run(mut self) {
        let session_id = self.core.session().session_id;
        tracing::debug!(session_id = %session_id, "Quiz sync loop started");

        self.establish().await;
        self.publish_snapshot();

        loop {
            let wake = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Wake::Shutdown,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => Wake::Command(cmd),
                    None => Wake::Shutdown,
                },
                (at, event) = sleep_until_next(self.timers.next()) => Wake::Timer(at, event),
                inbound = self.connection.recv() => Wake::Inbound(inbound),
                row = next_row(&mut self.rows) => match row {
                    Some(row) => Wake::Inbound(Inbound::RowUpdate(row)),
                    None => Wake::RowsClosed,
                },
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Command(cmd) => self.handle_command(cmd).await,
                Wake::Inbound(inbound) => {
                    let effects = router::route(&mut self.core, inbound);
                    self.run_effects(effects);
                }
                Wake::RowsClosed => {
                    tracing::warn!(session_id = %session_id, "Session row updates ended");
                    self.rows = None;
                }
                Wake::Timer(at, event) => {
                    self.timers.fired(event, at);
                    match event {
                        TimerEvent::CountdownTick => {
                            let effects = self.core.tick();
                            self.run_effects(effects);
                        }
                        TimerEvent::GuardRelease => {
                            tracing::debug!(session_id = %session_id, "Broadcast guard released");
                        }
                    }
                }
            }

            self.publish_snapshot();
        }

        self.connection.disconnect().await;
        self.timers.clear();
        self.rows = None;
        self.publish_snapshot();
        tracing::debug!(session_id = %session_id, "Quiz sync loop stopped");
    }

    /// Connect and reconcile with the backing store
    async fn establish(&mut self) -> bool {
        if self.connection.connect(self.core.in_room()).await.is_err() {
            return false;
        }

        // Resume a countdown frozen by an earlier disconnect
        if self.core.session().status == SessionStatus::Starting && !self.timers.countdown_armed() {
            self.timers.arm_countdown();
        }

        let Some(store) = self.store.clone() else {
            return true;
        };
        let session_id = self.core.session().session_id;

        match store.fetch_session(session_id).await {
            Ok(Some(row)) => {
                let effects = self.core.apply_row(&row);
                self.run_effects(effects);
            }
            Ok(None) => {
                tracing::warn!(session_id = %session_id, "Session not found in store");
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to read session row");
            }
        }

        if self.rows.is_none() {
            match store.watch_session(session_id).await {
                Ok(rows) => self.rows = Some(rows),
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to watch session row");
                }
            }
        }
        true
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::BroadcastStart { reply } => {
                let result = self.broadcast_start().await;
                let _ = reply.send(result);
            }
            Command::BroadcastCancellation { reply } => {
                let result = self.broadcast_cancellation().await;
                let _ = reply.send(result);
            }
            Command::BroadcastPreparation {
                step,
                details,
                reply,
            } => {
                let result = self.broadcast_preparation(step, details).await;
                let _ = reply.send(result);
            }
            Command::EnterRoom { reply } => {
                self.core.set_in_room(true);
                self.connection.track_presence().await;
                let _ = reply.send(());
            }
            Command::LeaveRoom { reply } => {
                self.core.set_in_room(false);
                self.connection.untrack_presence().await;
                let _ = reply.send(());
            }
            Command::Reconnect { reply } => {
                let connected = self.connection.is_connected() || self.establish().await;
                let _ = reply.send(connected);
            }
            Command::Disconnect { reply } => {
                self.connection.disconnect().await;
                self.timers.clear();
                self.rows = None;
                let _ = reply.send(());
            }
            Command::Complete { reply } => {
                let effects = self.core.complete();
                self.run_effects(effects);
                let _ = reply.send(());
            }
        }
    }

    pub(crate) fn run_effects(&mut self, effects: Vec<Effect>) {
        let session_id = self.core.session().session_id;

        for effect in effects {
            match effect {
                Effect::Notify(notice) => self.notify(notice),
                Effect::ArmCountdown => self.timers.arm_countdown(),
                Effect::DisarmCountdown => self.timers.disarm_countdown(),
                Effect::ReleaseGuard => self.timers.release_guard(),
                Effect::EnterQuiz => {
                    tracing::info!(session_id = %session_id, "Entering quiz");
                    self.navigator.enter_quiz(session_id);
                }
            }
        }
    }

    pub(crate) fn notify(&self, notice: Notice) {
        // No listeners is fine
        let _ = self.notices.send(notice);
    }

    pub(crate) fn publish_snapshot(&self) {
        let next = snapshot_of(&self.core, &self.connection, self.timers.guard_armed());
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

fn snapshot_of(
    core: &SessionCore,
    connection: &ChannelConnection,
    broadcast_pending: bool,
) -> SyncSnapshot {
    SyncSnapshot {
        session: core.session().clone(),
        preparation: core.preparation().clone(),
        participants: connection.participants(),
        is_connected: connection.is_connected(),
        in_room: core.in_room(),
        broadcast_pending,
    }
}

async fn next_row(rows: &mut Option<mpsc::Receiver<SessionRow>>) -> Option<SessionRow> {
    match rows {
        Some(rows) => rows.recv().await,
        None => std::future::pending().await,
    }
}
