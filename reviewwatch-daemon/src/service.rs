//! Service controller: owns the recurring update timer and handles viewer
//! messages.
//!
//! # States
//!
//! ```text
//! Stopped ──start──▶ Running ──trigger-restart──▶ RestartPending
//!    ▲                  │                               │
//!    └──────stop────────┴──────── cycle observes ───────┘
//!                                 flag: stop + start
//! ```
//!
//! The timer is a spawned task that runs one cycle per tick. Stopping cancels
//! the task's token; a cycle already in flight finishes but its outcome is
//! ignored. All cycles take the cycle lock, so a stop followed by a quick
//! start never runs two cycles at once.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use reviewwatch_core::{ChangeId, ChangeStore, ConnectionOptions, TrackedChange};
use reviewwatch_sync::{CycleOutcome, Notifier, RestartToken, ReviewApi, SyncCycle, ViewerHub};

use crate::error::DaemonError;
use crate::protocol::{ConnectionTarget, Message, Reply};

/// Observable lifecycle state of the update service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceState {
    Stopped,
    Running,
    RestartPending,
}

struct Timer {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    store: ChangeStore,
    api: Arc<dyn ReviewApi>,
    notifier: Arc<dyn Notifier>,
    cycle: SyncCycle,
    restart: RestartToken,
    timer: Mutex<Option<Timer>>,
    cycle_lock: Mutex<()>,
    generation: AtomicU64,
}

/// Cheap to clone; clones share one service.
#[derive(Clone)]
pub struct ServiceController {
    inner: Arc<Inner>,
}

type BoxedResult<'a> = Pin<Box<dyn Future<Output = Result<(), DaemonError>> + Send + 'a>>;

impl ServiceController {
    pub fn new(
        store: ChangeStore,
        api: Arc<dyn ReviewApi>,
        viewers: Arc<dyn ViewerHub>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let cycle = SyncCycle::new(store.clone(), api.clone(), viewers, notifier.clone());
        Self {
            inner: Arc::new(Inner {
                store,
                api,
                notifier,
                cycle,
                restart: RestartToken::new(),
                timer: Mutex::new(None),
                cycle_lock: Mutex::new(()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &ChangeStore {
        &self.inner.store
    }

    pub async fn state(&self) -> ServiceState {
        let timer = self.inner.timer.lock().await;
        match *timer {
            None => ServiceState::Stopped,
            Some(_) if self.inner.restart.is_requested() => ServiceState::RestartPending,
            Some(_) => ServiceState::Running,
        }
    }

    /// Start the service at process startup if anything is tracked.
    pub async fn init(&self) -> Result<(), DaemonError> {
        let changes = self.inner.store.get_changes().await?;
        if !changes.is_empty() {
            self.start_service().await?;
        }
        Ok(())
    }

    /// Stopped → Running. Runs one cycle before returning, then keeps the
    /// timer armed. Stays stopped when no refresh time is configured.
    pub async fn start_service(&self) -> Result<(), DaemonError> {
        let first_cycle = {
            let mut timer = self.inner.timer.lock().await;
            if timer.is_some() {
                return Ok(());
            }

            let options = self.inner.store.get_options().await?;
            let Some(period) = options.refresh_interval() else {
                tracing::info!("refresh time not configured; update service stays stopped");
                return Ok(());
            };

            tracing::info!(period_secs = period.as_secs(), "starting update service");
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let cancel = CancellationToken::new();
            let (done_tx, done_rx) = oneshot::channel();
            let task = tokio::spawn(self.clone().service_loop(
                generation,
                period,
                cancel.clone(),
                done_tx,
            ));
            *timer = Some(Timer {
                generation,
                cancel,
                task,
            });
            done_rx
        };

        // Dropped without a value when the service is stopped mid-cycle.
        let _ = first_cycle.await;
        Ok(())
    }

    /// Running | RestartPending → Stopped.
    pub async fn stop_service(&self) {
        let mut timer = self.inner.timer.lock().await;
        self.stop_locked(&mut timer);
    }

    /// Stop, then start with freshly loaded options.
    pub fn restart_service(&self) -> BoxedResult<'_> {
        Box::pin(async move {
            tracing::info!("restarting update service");
            self.stop_service().await;
            self.start_service().await
        })
    }

    /// Ask the running cycle loop to restart at its next checkpoint. A no-op
    /// on a stopped service.
    pub async fn trigger_restart_service(&self) -> bool {
        let timer = self.inner.timer.lock().await;
        if timer.is_some() {
            self.inner.restart.request();
        }
        true
    }

    /// Stop and wait for the timer task to go away, without waiting on an
    /// in-flight request.
    pub async fn shutdown(&self) {
        let mut timer = self.inner.timer.lock().await;
        if let Some(stopped) = timer.take() {
            stopped.cancel.cancel();
            stopped.task.abort();
        }
        self.inner.restart.clear();
    }

    fn stop_locked(&self, timer: &mut Option<Timer>) {
        if let Some(stopped) = timer.take() {
            tracing::info!("stopping update service");
            stopped.cancel.cancel();
        }
        self.inner.restart.clear();
    }

    /// Stop only if `generation` is still the live timer.
    async fn stop_generation(&self, generation: u64) {
        let mut timer = self.inner.timer.lock().await;
        if timer.as_ref().is_some_and(|t| t.generation == generation) {
            self.stop_locked(&mut timer);
        }
    }

    async fn service_loop(
        self,
        generation: u64,
        period: Duration,
        cancel: CancellationToken,
        first_cycle: oneshot::Sender<()>,
    ) {
        let mut first_cycle = Some(first_cycle);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // The first tick completes immediately.
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let outcome = self.run_cycle().await;
            if cancel.is_cancelled() {
                break;
            }

            match outcome {
                Some(CycleOutcome::Restart) => {
                    if let Err(err) = self.restart_service().await {
                        tracing::error!(error = %err, "update service restart failed");
                    }
                    break;
                }
                Some(CycleOutcome::Stop) => {
                    self.stop_generation(generation).await;
                    break;
                }
                Some(CycleOutcome::Completed { updated }) => {
                    tracing::debug!(updated, "sync cycle completed");
                }
                None => {}
            }

            if let Some(done) = first_cycle.take() {
                let _ = done.send(());
            }
        }

        if let Some(done) = first_cycle.take() {
            let _ = done.send(());
        }
    }

    async fn run_cycle(&self) -> Option<CycleOutcome> {
        let _guard = self.inner.cycle_lock.lock().await;
        match self.inner.cycle.run(&self.inner.restart).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                tracing::error!(error = %err, "sync cycle failed; retrying on next tick");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Message handling
    // -----------------------------------------------------------------------

    /// Dispatch one viewer message. `subscribe` and `shutdown` concern the
    /// connection itself and are answered by the runtime.
    pub async fn handle(&self, message: Message) -> Result<Reply, DaemonError> {
        tracing::debug!(message = message.kind(), "received message");
        match message {
            Message::GetCurrentState => {
                let changes = self.current_state().await?;
                Ok(Reply::response(serde_json::to_value(changes)?))
            }
            Message::AddChange(id) => self.add_change(id).await.map(|_| Reply::ack()),
            Message::RemoveChanges(ids) => self.remove_changes(&ids).await.map(|_| Reply::ack()),
            Message::TestConnection(target) => Ok(Reply::response(self.test_connection(&target).await)),
            Message::TriggerRestart => Ok(Reply::Ack(self.trigger_restart_service().await)),
            Message::GetConfigState => Ok(Reply::response(self.inner.store.is_config_set().await?)),
            Message::SaveOptions(options) => self.save_options(&options).await.map(|_| Reply::ack()),
            Message::OpenChange(id) => Ok(Reply::response(self.change_url(&id).await?)),
            Message::Status => Ok(Reply::response(self.status().await?)),
            Message::Clear => self.clear().await.map(|_| Reply::ack()),
            Message::Subscribe | Message::Shutdown => Ok(Reply::error(format!(
                "'{}' is only valid on a daemon connection",
                message.kind()
            ))),
        }
    }

    /// Pending buffer first, then tracked changes not in it. Consumes the
    /// buffer and clears the badge.
    pub async fn current_state(&self) -> Result<Vec<TrackedChange>, DaemonError> {
        let changes = self.inner.store.get_changes().await?;
        let mut merged = self.inner.store.get_updated_changes().await?;
        self.inner.notifier.set_badge("").await;

        let rest: Vec<TrackedChange> = changes
            .into_iter()
            .filter(|change| !merged.iter().any(|u| u.id == change.id))
            .collect();
        merged.extend(rest);
        Ok(merged)
    }

    pub async fn add_change(&self, id: ChangeId) -> Result<(), DaemonError> {
        tracing::info!(change_id = %id, "adding change");
        self.inner
            .store
            .update_changes(|changes| {
                if !changes.iter().any(|c| c.id == id) {
                    changes.insert(0, TrackedChange::placeholder(id));
                }
            })
            .await?;

        if self.state().await == ServiceState::Stopped {
            self.start_service().await?;
        }
        Ok(())
    }

    pub async fn remove_changes(&self, ids: &[ChangeId]) -> Result<(), DaemonError> {
        tracing::info!(count = ids.len(), "removing changes");
        let (remaining, ()) = self
            .inner
            .store
            .update_changes(|changes| changes.retain(|c| !ids.contains(&c.id)))
            .await?;

        if remaining.is_empty() {
            self.stop_service().await;
        }
        Ok(())
    }

    pub async fn test_connection(&self, target: &ConnectionTarget) -> bool {
        self.inner.api.test(&target.endpoint, &target.credentials).await
    }

    /// Persist new options and apply them: a running service restarts, a
    /// stopped one starts if anything is tracked.
    pub async fn save_options(&self, options: &ConnectionOptions) -> Result<(), DaemonError> {
        self.inner.store.save_options(options).await?;
        if self.state().await == ServiceState::Stopped {
            self.init().await
        } else {
            self.trigger_restart_service().await;
            Ok(())
        }
    }

    pub async fn change_url(&self, id: &ChangeId) -> Result<Option<String>, DaemonError> {
        let options = self.inner.store.get_options().await?;
        if options.endpoint.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!(
            "{}/{}",
            options.endpoint.trim_end_matches('/'),
            id
        )))
    }

    pub async fn status(&self) -> Result<Value, DaemonError> {
        let tracked = self.inner.store.get_changes().await?.len();
        Ok(json!({
            "state": self.state().await,
            "restartRequested": self.inner.restart.is_requested(),
            "tracked": tracked,
        }))
    }

    pub async fn clear(&self) -> Result<(), DaemonError> {
        tracing::info!("clearing tracked changes");
        self.stop_service().await;
        self.inner.store.clear().await?;
        self.inner.notifier.set_badge("").await;
        Ok(())
    }
}
