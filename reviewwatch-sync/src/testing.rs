//! In-memory stand-ins for the remote, viewer and notifier boundaries.
//!
//! Used by this crate's tests and by the daemon's controller tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use reviewwatch_core::{ChangeId, ConnectionOptions, Credentials, TrackedChange};

use crate::error::DeliveryError;
use crate::remote::{QueryResult, RemoteChange, ReviewApi};
use crate::surface::{Notification, Notifier, ViewerHub};

/// Scripted remote. Unknown ids fail.
#[derive(Debug, Default)]
pub struct FakeReviewApi {
    responses: Mutex<HashMap<ChangeId, RemoteChange>>,
    queried: Mutex<Vec<ChangeId>>,
    endpoints: Mutex<Vec<String>>,
    reachable: AtomicBool,
}

impl FakeReviewApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer queries for `id` with `change` from now on.
    pub fn respond(&self, id: impl Into<ChangeId>, change: RemoteChange) {
        lock(&self.responses).insert(id.into(), change);
    }

    /// Make queries for `id` fail from now on.
    pub fn fail(&self, id: impl Into<ChangeId>) {
        lock(&self.responses).remove(&id.into());
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Every id queried so far, in order.
    pub fn queried(&self) -> Vec<ChangeId> {
        lock(&self.queried).clone()
    }

    /// Endpoint of the options passed with each query, in order.
    pub fn endpoints(&self) -> Vec<String> {
        lock(&self.endpoints).clone()
    }
}

#[async_trait]
impl ReviewApi for FakeReviewApi {
    async fn query(&self, options: &ConnectionOptions, change_id: &ChangeId) -> QueryResult {
        lock(&self.queried).push(change_id.clone());
        lock(&self.endpoints).push(options.endpoint.clone());
        match lock(&self.responses).get(change_id) {
            Some(change) => QueryResult::Success(change.clone()),
            None => QueryResult::Failure(change_id.clone()),
        }
    }

    async fn test(&self, _endpoint: &str, _credentials: &Credentials) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Viewer hub whose presence is toggled by the test.
#[derive(Debug, Default)]
pub struct FakeViewers {
    open: AtomicBool,
    pushes: Mutex<Vec<Vec<TrackedChange>>>,
}

impl FakeViewers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn pushes(&self) -> Vec<Vec<TrackedChange>> {
        lock(&self.pushes).clone()
    }
}

#[async_trait]
impl ViewerHub for FakeViewers {
    fn has_viewers(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn push(&self, updated: &[TrackedChange]) -> Result<(), DeliveryError> {
        lock(&self.pushes).push(updated.to_vec());
        Ok(())
    }
}

/// Notifier that records what it was asked to show.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
    badge: Mutex<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }

    pub fn badge(&self) -> String {
        lock(&self.badge).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) {
        lock(&self.notifications).push(notification.clone());
    }

    async fn set_badge(&self, text: &str) {
        *lock(&self.badge) = text.to_string();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
