//! Socket-backed viewer presence and the daemon's notification surface.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use reviewwatch_core::TrackedChange;
use reviewwatch_sync::{DeliveryError, Notification, Notifier, ViewerHub};

/// Live update fan-out to every subscribed connection.
///
/// A viewer is present while it holds a receiver, so presence is simply the
/// broadcast receiver count.
#[derive(Debug, Clone)]
pub struct SubscriberHub {
    tx: broadcast::Sender<Vec<TrackedChange>>,
}

impl SubscriberHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<TrackedChange>> {
        self.tx.subscribe()
    }

    pub fn viewer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl ViewerHub for SubscriberHub {
    fn has_viewers(&self) -> bool {
        self.viewer_count() > 0
    }

    async fn push(&self, updated: &[TrackedChange]) -> Result<(), DeliveryError> {
        self.tx
            .send(updated.to_vec())
            .map(|_| ())
            .map_err(|err| DeliveryError(err.to_string()))
    }
}

/// Notifier that reports through the daemon log and keeps the badge text
/// for status queries.
#[derive(Debug, Default)]
pub struct LogNotifier {
    badge: Mutex<String>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn badge(&self) -> String {
        self.badge
            .lock()
            .map(|badge| badge.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) {
        tracing::info!(
            title = %notification.title,
            badge = notification.badge,
            "{}",
            notification.message,
        );
    }

    async fn set_badge(&self, text: &str) {
        if let Ok(mut badge) = self.badge.lock() {
            *badge = text.to_string();
        }
    }
}
