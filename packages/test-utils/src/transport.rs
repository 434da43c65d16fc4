//! Transport double with switchable failures

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lexiquiz_sync::{
    ChannelSubscription, Envelope, PresenceMeta, RealtimeTransport, TransportError,
};
use uuid::Uuid;

/// Wraps a real transport, records publishes and fails on demand
///
/// Clones share flags and the publish log.
#[derive(Clone)]
pub struct FlakyTransport {
    inner: Arc<dyn RealtimeTransport>,
    fail_publish: Arc<AtomicBool>,
    fail_subscribe: Arc<AtomicBool>,
    published: Arc<Mutex<Vec<(String, Envelope)>>>,
}

impl FlakyTransport {
    pub fn new(inner: impl RealtimeTransport + 'static) -> Self {
        Self {
            inner: Arc::new(inner),
            fail_publish: Arc::new(AtomicBool::new(false)),
            fail_subscribe: Arc::new(AtomicBool::new(false)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscribes(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Every envelope that was accepted, with its channel
    pub fn published(&self) -> Vec<(String, Envelope)> {
        let published = self.published.lock().unwrap_or_else(|e| e.into_inner());
        published.clone()
    }

    /// Accepted envelopes with the given event name
    pub fn published_events(&self, event: &str) -> Vec<Envelope> {
        self.published()
            .into_iter()
            .filter(|(_, envelope)| envelope.event == event)
            .map(|(_, envelope)| envelope)
            .collect()
    }
}

#[async_trait]
impl RealtimeTransport for FlakyTransport {
    async fn subscribe(&self, channel: &str) -> Result<ChannelSubscription, TransportError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(TransportError::SubscribeFailed {
                channel: channel.to_string(),
                reason: "subscription refused".to_string(),
            });
        }
        self.inner.subscribe(channel).await
    }

    async fn publish(&self, channel: &str, envelope: Envelope) -> Result<(), TransportError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed {
                channel: channel.to_string(),
                reason: "relay unavailable".to_string(),
            });
        }

        {
            let mut published = self.published.lock().unwrap_or_else(|e| e.into_inner());
            published.push((channel.to_string(), envelope.clone()));
        }
        self.inner.publish(channel, envelope).await
    }

    async fn track(&self, channel: &str, meta: PresenceMeta) -> Result<(), TransportError> {
        self.inner.track(channel, meta).await
    }

    async fn untrack(&self, channel: &str, participant_id: Uuid) -> Result<(), TransportError> {
        self.inner.untrack(channel, participant_id).await
    }
}
