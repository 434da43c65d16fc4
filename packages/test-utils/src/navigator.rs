//! Navigation double

use std::sync::{Arc, Mutex};

use lexiquiz_sync::Navigator;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

/// Navigator that records when and into which session it was asked to go
///
/// Clones share the same record.
#[derive(Clone)]
pub struct RecordingNavigator {
    entries: Arc<Mutex<Vec<(Uuid, Instant)>>>,
    count: Arc<watch::Sender<usize>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(watch::channel(0).0),
        }
    }

    /// Sessions entered, in order
    pub fn entered(&self) -> Vec<Uuid> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().map(|(id, _)| *id).collect()
    }

    /// Instants (tokio clock) at which each navigation happened
    pub fn entered_at(&self) -> Vec<Instant> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().map(|(_, at)| *at).collect()
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Wait until at least `n` navigations were recorded
    pub async fn wait_for(&self, n: usize) {
        let mut rx = self.count.subscribe();
        // The sender lives in self, so this cannot fail
        let _ = rx.wait_for(|count| *count >= n).await;
    }
}

impl Default for RecordingNavigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator for RecordingNavigator {
    fn enter_quiz(&self, session_id: Uuid) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push((session_id, Instant::now()));
        let len = entries.len();
        drop(entries);

        self.count.send_replace(len);
    }
}
