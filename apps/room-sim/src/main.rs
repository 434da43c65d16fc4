use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use lexiquiz_shared_config::{parse_env, CommonConfig};
use lexiquiz_sync::{
    connect_transport, steps, Identity, Navigator, PgSessionStore, QuizSync, SessionContext,
    SessionStore, SyncDeps,
};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// How long to wait for every participant to subscribe
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Logs navigation instead of switching views
struct LogNavigator {
    participant_id: Uuid,
}

impl Navigator for LogNavigator {
    fn enter_quiz(&self, session_id: Uuid) {
        tracing::info!(
            participant_id = %self.participant_id,
            session_id = %session_id,
            "Participant entered the quiz"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lexiquiz_room_sim=info,lexiquiz_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CommonConfig::from_env().context("failed to load configuration")?;
    let member_count: usize = parse_env("ROOM_SIM_MEMBERS", 3)?;

    tracing::info!(
        environment = %config.environment,
        members = member_count,
        "Starting quiz room simulation"
    );

    let transport = connect_transport(&config.redis).await;

    let store: Option<Arc<dyn SessionStore>> = match &config.database {
        Some(db) => match PgSessionStore::connect(db).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                tracing::warn!(error = %e, "Session store unavailable, continuing without it");
                None
            }
        },
        None => None,
    };

    let session_id = Uuid::new_v4();
    let group_id = Uuid::new_v4();

    // The last member waits outside the room to receive the join notice
    let mut roster = vec![(Identity::manager(Uuid::new_v4()), true)];
    for n in 0..member_count {
        roster.push((Identity::member(Uuid::new_v4()), n + 1 < member_count));
    }

    let mut participants = Vec::with_capacity(roster.len());
    for (identity, in_room) in roster {
        let context = SessionContext {
            session_id,
            group_id,
            identity,
            in_room,
            quiz_title: Some("Room simulation".to_string()),
        };
        let deps = SyncDeps {
            transport: transport.clone(),
            navigator: Arc::new(LogNavigator {
                participant_id: identity.participant_id,
            }),
            store: store.clone(),
        };

        let sync = QuizSync::spawn(context, config.sync.clone(), deps);
        spawn_notice_logger(&sync, identity.participant_id);
        participants.push(sync);
    }

    for sync in &participants {
        let mut rx = sync.watch();
        tokio::time::timeout(CONNECT_TIMEOUT, rx.wait_for(|s| s.is_connected))
            .await
            .context("participant did not connect in time")?
            .context("participant loop stopped")?;
    }

    let owner = participants
        .first()
        .context("simulation needs an owner")?;

    owner
        .broadcast_preparation(
            steps::PRESET_SELECTED,
            json!({"presetName": "Common verbs"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        )
        .await
        .context("preparation broadcast failed")?;
    owner
        .broadcast_preparation(steps::QUESTIONS_READY, Default::default())
        .await
        .context("preparation broadcast failed")?;

    owner.broadcast_start().await.context("start broadcast failed")?;

    tokio::time::sleep(config.sync.guard_window() + Duration::from_secs(1)).await;

    for sync in &participants {
        let snapshot = sync.snapshot();
        tracing::info!(
            session_id = %snapshot.session.session_id,
            status = %snapshot.session.status,
            in_room = snapshot.in_room,
            participants = snapshot.participants.len(),
            preparation = ?snapshot.preparation.step(),
            "Final participant state"
        );
    }

    for sync in participants {
        sync.shutdown().await;
    }

    tracing::info!("Quiz room simulation finished");
    Ok(())
}

fn spawn_notice_logger(sync: &QuizSync, participant_id: Uuid) {
    let mut notices = sync.notices();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            tracing::info!(participant_id = %participant_id, ?notice, "Notice");
        }
    });
}
