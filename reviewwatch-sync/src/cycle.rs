//! One synchronization pass over every tracked change.
//!
//! The cycle never decides the service lifecycle itself: it reports a
//! [`CycleOutcome`] and the caller restarts or stops the timer. A restart
//! request is observed cooperatively, before each query and once after the
//! loop; an in-flight request is never cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reviewwatch_core::{ChangeStore, TrackedChange};

use crate::error::SyncError;
use crate::remote::{QueryResult, ReviewApi};
use crate::surface::{Notification, Notifier, ViewerHub};

/// Shared restart flag polled by a running cycle.
#[derive(Debug, Clone, Default)]
pub struct RestartToken(Arc<AtomicBool>);

impl RestartToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What the caller must do after a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Keep the timer running. `updated` counts surfaced entries.
    Completed { updated: usize },
    /// A restart was requested; the remaining work was abandoned.
    Restart,
    /// Nothing left to do: config is invalid, or every change is terminal.
    Stop,
}

/// The synchronization cycle and its collaborators.
#[derive(Clone)]
pub struct SyncCycle {
    store: ChangeStore,
    api: Arc<dyn ReviewApi>,
    viewers: Arc<dyn ViewerHub>,
    notifier: Arc<dyn Notifier>,
}

impl SyncCycle {
    pub fn new(
        store: ChangeStore,
        api: Arc<dyn ReviewApi>,
        viewers: Arc<dyn ViewerHub>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            api,
            viewers,
            notifier,
        }
    }

    pub fn store(&self) -> &ChangeStore {
        &self.store
    }

    /// Run one pass.
    pub async fn run(&self, restart: &RestartToken) -> Result<CycleOutcome, SyncError> {
        tracing::debug!("sync cycle started");
        if !self.store.is_config_set().await? {
            tracing::info!("connection options incomplete; stopping update service");
            return Ok(CycleOutcome::Stop);
        }

        let options = self.store.get_options().await?;
        let mut changes = self.store.get_changes().await?;
        let mut updated = Vec::new();

        for cached in changes.iter_mut() {
            if restart.is_requested() {
                return Ok(CycleOutcome::Restart);
            }
            if cached.is_terminal() {
                tracing::debug!(change_id = %cached.id, "skipping terminal change");
                continue;
            }

            let fresh = match self.api.query(&options, &cached.id).await {
                QueryResult::Failure(id) => {
                    if !ChangeStore::is_change_empty(cached) {
                        // Transient failure on a known-good entry: keep it.
                        continue;
                    }
                    TrackedChange::failed(id)
                }
                QueryResult::Success(remote) => {
                    let fresh = remote.into_tracked(cached.id.clone());
                    if fresh == *cached {
                        continue;
                    }
                    fresh
                }
            };

            updated.push(fresh.to_updated());
            *cached = fresh;
        }

        if restart.is_requested() {
            return Ok(CycleOutcome::Restart);
        }

        let tracked = if updated.is_empty() {
            self.store.get_changes().await?
        } else {
            let (tracked, surfaced) = self
                .store
                .update_changes(|current| merge_updates(current, &updated))
                .await?;
            if !surfaced.is_empty() {
                self.surface(&surfaced).await?;
            }
            updated = surfaced;
            tracked
        };

        if tracked.iter().all(TrackedChange::is_terminal) {
            tracing::info!("no change left to query; stopping update service");
            return Ok(CycleOutcome::Stop);
        }

        Ok(CycleOutcome::Completed {
            updated: updated.len(),
        })
    }

    async fn surface(&self, updated: &[TrackedChange]) -> Result<(), SyncError> {
        if self.viewers.has_viewers() {
            if let Err(err) = self.viewers.push(updated).await {
                tracing::debug!(error = %err, "ignoring live update delivery failure");
            }
            return Ok(());
        }

        self.store.save_updated_changes(Some(updated)).await?;
        let notification = Notification::for_updates(updated.len());
        tracing::info!(count = updated.len(), message = %notification.message, "deferred update notification");
        self.notifier.set_badge(&notification.badge_text()).await;
        self.notifier.notify(&notification).await;
        Ok(())
    }
}

/// Apply one cycle's results to the currently persisted set.
///
/// Results replace entries by id; failed placeholders are evicted. Entries a
/// viewer added or removed while the cycle was querying are left as they are.
///
/// Returns the results that still matched a tracked entry; only those are
/// surfaced.
fn merge_updates(current: &mut Vec<TrackedChange>, updated: &[TrackedChange]) -> Vec<TrackedChange> {
    let mut surfaced = Vec::with_capacity(updated.len());
    for change in updated {
        if let Some(slot) = current.iter_mut().find(|c| c.id == change.id) {
            *slot = change.clone();
            surfaced.push(change.clone());
        }
    }
    current.retain(|c| !c.error);
    surfaced
}
