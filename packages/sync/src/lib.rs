//! Multi-party quiz-session synchronization
//!
//! Coordinates the lifecycle of a shared quiz (waiting, countdown, live,
//! finished) between a room owner and any number of members over a
//! realtime pub/sub channel. There is no central coordinator: the owner
//! broadcasts, every participant applies the same transitions locally and
//! converges.
//!
//! Building blocks:
//! - [`connection`]: channel subscriptions and the presence set
//! - `emitter`: role-gated broadcasts with local echo and rollback
//! - [`router`]: inbound demultiplexing with self-echo suppression
//! - [`machine`]: the session state machine
//! - [`QuizSync`]: the per-session loop tying them together

pub mod connection;
pub mod coordinator;
mod emitter;
pub mod error;
pub mod machine;
pub mod messages;
pub mod router;
pub mod store;
pub mod timer;
pub mod transport;
pub mod types;

pub use coordinator::{Navigator, QuizSync, SessionContext, SyncDeps};
pub use error::{BroadcastError, BroadcastResult, StoreError, TransportError};
pub use messages::{
    steps, Envelope, PreparationUpdate, QuizCancelled, QuizStarting, StateChange, SyncEvent,
};
pub use store::{BackingStatus, PgSessionStore, SessionRow, SessionStore};
pub use transport::{
    connect_transport, ChannelSubscription, InMemoryHub, RealtimeTransport, RedisTransport,
    TransportEvent,
};
pub use types::{
    Identity, Notice, PreparationView, PresenceMeta, Session, SessionStatus, SyncSnapshot,
};

pub use lexiquiz_shared_config::SyncConfig;
