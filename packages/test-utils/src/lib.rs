//! Shared test utilities for the lexiquiz workspace
//!
//! This crate provides in-process doubles for the collaborators the
//! synchronization core talks to, so integration tests run without Redis,
//! Postgres or a UI.
//!
//! # Test Doubles
//!
//! - [`MockSessionStore`] - In-memory backing store with pushable row updates
//! - [`RecordingNavigator`] - Records every "enter quiz" navigation
//! - [`FlakyTransport`] - Wraps a transport and fails publishes or subscribes on demand
//!
//! # Example
//!
//! ```rust,ignore
//! use lexiquiz_sync::InMemoryHub;
//! use lexiquiz_test_utils::{FlakyTransport, RecordingNavigator};
//!
//! #[tokio::test]
//! async fn test_with_doubles() {
//!     let transport = FlakyTransport::new(InMemoryHub::new());
//!     transport.fail_publishes(true);
//!
//!     let navigator = RecordingNavigator::new();
//!     // Hand both to QuizSync::spawn through SyncDeps
//! }
//! ```

mod navigator;
mod store;
mod transport;

pub use navigator::RecordingNavigator;
pub use store::MockSessionStore;
pub use transport::FlakyTransport;
