//! How a cycle's updates reach the user: live push to attached viewers, or a
//! deferred notification with a badge count.

use async_trait::async_trait;

use reviewwatch_core::TrackedChange;

use crate::error::DeliveryError;

pub const NOTIFICATION_TITLE: &str = "reviewwatch";

/// Foreground viewers attached to the service.
#[async_trait]
pub trait ViewerHub: Send + Sync {
    /// Whether at least one viewer is attached. Must not block.
    fn has_viewers(&self) -> bool;

    /// Fire-and-forget push of one cycle's updated entries.
    async fn push(&self, updated: &[TrackedChange]) -> Result<(), DeliveryError>;
}

/// Aggregate notification shown when updates arrive with no viewer open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub badge: usize,
}

impl Notification {
    pub fn for_updates(count: usize) -> Self {
        let plural = if count > 1 { "s" } else { "" };
        Self {
            title: NOTIFICATION_TITLE.to_string(),
            message: format!("{count} change{plural} updated"),
            badge: count,
        }
    }

    pub fn badge_text(&self) -> String {
        self.badge.to_string()
    }
}

/// User-facing notification surface.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification);

    /// Set the badge text; an empty string removes it.
    async fn set_badge(&self, text: &str);
}
