//! End-to-end sync cycle behaviour against in-memory collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use reviewwatch_core::{
    ChangeId, ChangeStatus, ChangeStore, ConnectionOptions, Credentials, TrackedChange,
};
use reviewwatch_sync::testing::{FakeReviewApi, FakeViewers, RecordingNotifier};
use reviewwatch_sync::{
    CycleOutcome, QueryResult, RemoteChange, RestartToken, ReviewApi, SyncCycle,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    store: ChangeStore,
    api: Arc<FakeReviewApi>,
    viewers: Arc<FakeViewers>,
    notifier: Arc<RecordingNotifier>,
    cycle: SyncCycle,
}

async fn harness(changes: Vec<TrackedChange>) -> Harness {
    let store = ChangeStore::in_memory();
    store.save_options(&options()).await.expect("options");
    store.save_changes(&changes).await.expect("changes");

    let api = Arc::new(FakeReviewApi::new());
    let viewers = Arc::new(FakeViewers::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let cycle = SyncCycle::new(store.clone(), api.clone(), viewers.clone(), notifier.clone());
    Harness {
        store,
        api,
        viewers,
        notifier,
        cycle,
    }
}

fn options() -> ConnectionOptions {
    ConnectionOptions {
        refresh_time_seconds: Some(30),
        endpoint: "https://hereweare.testing.it".to_string(),
        credentials: Credentials {
            identity: "johnny@b.goode".to_string(),
            secret: "ultrasecretpassword".to_string(),
        },
    }
}

fn tracked(id: &str, subject: &str, status: ChangeStatus, verified: i8, code_review: i8) -> TrackedChange {
    TrackedChange {
        subject: Some(subject.to_string()),
        status: Some(status),
        verified,
        code_review,
        ..TrackedChange::placeholder(id)
    }
}

fn remote(subject: &str, status: ChangeStatus, verified: i8, code_review: i8) -> RemoteChange {
    RemoteChange {
        subject: subject.to_string(),
        status,
        code_review,
        verified,
    }
}

fn three_changes() -> Vec<TrackedChange> {
    vec![
        tracked("326205", "Expose index of the group for a line", ChangeStatus::New, -1, 0),
        tracked("269047", "Validate reviewer filters", ChangeStatus::New, 1, 0),
        tracked(
            "321037",
            "Abstract Publisher/Subscriber into generic interfaces",
            ChangeStatus::Merged,
            1,
            2,
        ),
    ]
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unconfigured_store_stops_without_querying() {
    let h = harness(three_changes()).await;
    h.store
        .save_options(&ConnectionOptions::default())
        .await
        .expect("clear options");

    let outcome = h.cycle.run(&RestartToken::new()).await.expect("run");

    assert_eq!(outcome, CycleOutcome::Stop);
    assert!(h.api.queried().is_empty());
}

#[tokio::test]
async fn merged_remote_update_stops_service() {
    let h = harness(vec![tracked(
        "326205",
        "Expose index of the group for a line",
        ChangeStatus::New,
        -1,
        0,
    )])
    .await;
    h.api.respond(
        "326205",
        remote("Expose index of the group for a line", ChangeStatus::Merged, 1, 1),
    );

    let outcome = h.cycle.run(&RestartToken::new()).await.expect("run");

    assert_eq!(outcome, CycleOutcome::Stop, "all changes are terminal");
    let changes = h.store.get_changes().await.expect("changes");
    assert_eq!(
        changes,
        vec![tracked(
            "326205",
            "Expose index of the group for a line",
            ChangeStatus::Merged,
            1,
            1
        )]
    );
}

#[tokio::test]
async fn closed_viewer_gets_pending_buffer_and_notification() {
    let h = harness(three_changes()).await;
    h.api.respond("326205", remote("Expose index", ChangeStatus::New, 1, 0));
    h.api.respond("269047", remote("Validate reviewer filters", ChangeStatus::New, 1, 2));

    let outcome = h.cycle.run(&RestartToken::new()).await.expect("run");

    assert_eq!(outcome, CycleOutcome::Completed { updated: 2 });
    let pending = h.store.get_updated_changes().await.expect("pending");
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|c| c.updated));
    assert_eq!(h.notifier.badge(), "2");
    let notifications = h.notifier.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].message, "2 changes updated");
    assert!(h.viewers.pushes().is_empty());
}

#[tokio::test]
async fn open_viewer_gets_single_live_push() {
    let h = harness(three_changes()).await;
    h.viewers.set_open(true);
    h.api.respond("326205", remote("Expose index", ChangeStatus::New, 1, 0));
    h.api.respond("269047", remote("Validate reviewer filters", ChangeStatus::New, 1, 2));

    h.cycle.run(&RestartToken::new()).await.expect("run");

    let pushes = h.viewers.pushes();
    assert_eq!(pushes.len(), 1, "at most one push per cycle");
    assert_eq!(pushes[0].len(), 2);
    assert!(pushes[0].iter().all(|c| c.updated));
    assert!(h.store.get_updated_changes().await.expect("pending").is_empty());
    assert!(h.notifier.notifications().is_empty());
    assert!(
        h.store.get_changes().await.expect("changes").iter().all(|c| !c.updated),
        "updated flag is never persisted"
    );
}

#[tokio::test]
async fn second_run_without_remote_changes_is_idempotent() {
    let h = harness(three_changes()).await;
    h.api.respond("326205", remote("Expose index", ChangeStatus::New, 1, 0));
    h.api.respond("269047", remote("Validate reviewer filters", ChangeStatus::New, 1, 0));

    let first = h.cycle.run(&RestartToken::new()).await.expect("first");
    let second = h.cycle.run(&RestartToken::new()).await.expect("second");

    assert_eq!(first, CycleOutcome::Completed { updated: 1 });
    assert_eq!(second, CycleOutcome::Completed { updated: 0 });
}

#[tokio::test]
async fn terminal_changes_are_never_queried() {
    let mut changes = three_changes();
    changes.push(tracked("999", "Dropped", ChangeStatus::Abandoned, 0, 0));
    let h = harness(changes).await;
    h.api.respond("326205", remote("Expose index", ChangeStatus::New, -1, 0));
    h.api.respond("269047", remote("Validate reviewer filters", ChangeStatus::New, 1, 0));

    h.cycle.run(&RestartToken::new()).await.expect("run");
    h.cycle.run(&RestartToken::new()).await.expect("run");

    let queried = h.api.queried();
    assert!(!queried.contains(&ChangeId::from("321037")));
    assert!(!queried.contains(&ChangeId::from("999")));
    assert_eq!(queried.len(), 4);
}

#[tokio::test]
async fn failure_on_populated_entry_keeps_last_known_state() {
    let h = harness(three_changes()).await;
    h.api.respond("269047", remote("Validate reviewer filters", ChangeStatus::New, 1, 0));
    // 326205 is not scripted, so its query fails.

    let outcome = h.cycle.run(&RestartToken::new()).await.expect("run");

    assert_eq!(outcome, CycleOutcome::Completed { updated: 0 });
    assert_eq!(h.store.get_changes().await.expect("changes"), three_changes());
    assert!(h.notifier.notifications().is_empty());
}

#[tokio::test]
async fn failure_on_placeholder_evicts_it() {
    let mut changes = three_changes();
    changes.insert(0, TrackedChange::placeholder("222222"));
    let h = harness(changes).await;
    h.api.respond("326205", remote("Expose index of the group for a line", ChangeStatus::New, -1, 0));
    h.api.respond("269047", remote("Validate reviewer filters", ChangeStatus::New, 1, 0));

    let outcome = h.cycle.run(&RestartToken::new()).await.expect("run");

    assert_eq!(outcome, CycleOutcome::Completed { updated: 1 });
    assert_eq!(h.store.get_changes().await.expect("changes"), three_changes());
    let pending = h.store.get_updated_changes().await.expect("pending");
    assert_eq!(pending.len(), 1);
    assert!(pending[0].error && pending[0].updated);
}

#[tokio::test]
async fn placeholder_success_fills_in_entry() {
    let h = harness(vec![TrackedChange::placeholder("222222")]).await;
    h.api.respond("222222", remote("New feature", ChangeStatus::New, 0, 1));

    h.cycle.run(&RestartToken::new()).await.expect("run");

    let changes = h.store.get_changes().await.expect("changes");
    assert_eq!(changes, vec![tracked("222222", "New feature", ChangeStatus::New, 0, 1)]);
}

#[tokio::test]
async fn empty_tracked_set_stops() {
    let h = harness(vec![]).await;
    let outcome = h.cycle.run(&RestartToken::new()).await.expect("run");
    assert_eq!(outcome, CycleOutcome::Stop);
}

// ---------------------------------------------------------------------------
// Restart checkpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pending_restart_aborts_before_first_query() {
    let h = harness(three_changes()).await;
    let restart = RestartToken::new();
    restart.request();

    let outcome = h.cycle.run(&restart).await.expect("run");

    assert_eq!(outcome, CycleOutcome::Restart);
    assert!(h.api.queried().is_empty());
}

/// Requests a restart from inside the first query, like a viewer message
/// arriving while a request is in flight.
struct RestartingApi {
    inner: FakeReviewApi,
    restart: RestartToken,
}

#[async_trait]
impl ReviewApi for RestartingApi {
    async fn query(&self, options: &ConnectionOptions, change_id: &ChangeId) -> QueryResult {
        self.restart.request();
        self.inner.query(options, change_id).await
    }

    async fn test(&self, endpoint: &str, credentials: &Credentials) -> bool {
        self.inner.test(endpoint, credentials).await
    }
}

#[tokio::test]
async fn restart_during_loop_abandons_results() {
    let store = ChangeStore::in_memory();
    store.save_options(&options()).await.expect("options");
    store.save_changes(&three_changes()).await.expect("changes");
    let restart = RestartToken::new();
    let api = RestartingApi {
        inner: FakeReviewApi::new(),
        restart: restart.clone(),
    };
    api.inner
        .respond("326205", remote("Expose index", ChangeStatus::Merged, 2, 2));
    let api = Arc::new(api);
    let notifier = Arc::new(RecordingNotifier::new());
    let cycle = SyncCycle::new(
        store.clone(),
        api.clone(),
        Arc::new(FakeViewers::new()),
        notifier.clone(),
    );

    let outcome = cycle.run(&restart).await.expect("run");

    assert_eq!(outcome, CycleOutcome::Restart);
    assert_eq!(api.inner.queried(), vec![ChangeId::from("326205")]);
    assert_eq!(store.get_changes().await.expect("changes"), three_changes());
    assert!(notifier.notifications().is_empty());
}

// ---------------------------------------------------------------------------
// Concurrent viewer edits
// ---------------------------------------------------------------------------

/// Adds a change to the store from inside a query, like an add-change message
/// handled while the cycle is mid-flight.
struct AddingApi {
    inner: FakeReviewApi,
    store: ChangeStore,
}

#[async_trait]
impl ReviewApi for AddingApi {
    async fn query(&self, options: &ConnectionOptions, change_id: &ChangeId) -> QueryResult {
        self.store
            .update_changes(|changes| changes.insert(0, TrackedChange::placeholder("555555")))
            .await
            .expect("concurrent add");
        self.inner.query(options, change_id).await
    }

    async fn test(&self, endpoint: &str, credentials: &Credentials) -> bool {
        self.inner.test(endpoint, credentials).await
    }
}

#[tokio::test]
async fn cycle_write_preserves_concurrent_add() {
    let store = ChangeStore::in_memory();
    store.save_options(&options()).await.expect("options");
    store
        .save_changes(&[tracked("326205", "Expose index", ChangeStatus::New, -1, 0)])
        .await
        .expect("changes");
    let api = AddingApi {
        inner: FakeReviewApi::new(),
        store: store.clone(),
    };
    api.inner
        .respond("326205", remote("Expose index", ChangeStatus::Merged, 1, 1));
    let cycle = SyncCycle::new(
        store.clone(),
        Arc::new(api),
        Arc::new(FakeViewers::new()),
        Arc::new(RecordingNotifier::new()),
    );

    let outcome = cycle.run(&RestartToken::new()).await.expect("run");

    let changes = store.get_changes().await.expect("changes");
    assert_eq!(changes.len(), 2, "added placeholder survives the cycle write");
    assert_eq!(changes[0].id, ChangeId::from("555555"));
    assert_eq!(changes[1].status, Some(ChangeStatus::Merged));
    assert!(
        matches!(outcome, CycleOutcome::Completed { updated: 1 }),
        "the new placeholder keeps the service running, got {outcome:?}"
    );
}

/// Drops one id from the store while its query is in flight.
struct RemovingApi {
    inner: FakeReviewApi,
    store: ChangeStore,
    remove: ChangeId,
}

#[async_trait]
impl ReviewApi for RemovingApi {
    async fn query(&self, options: &ConnectionOptions, change_id: &ChangeId) -> QueryResult {
        let remove = self.remove.clone();
        self.store
            .update_changes(|changes| changes.retain(|c| c.id != remove))
            .await
            .expect("concurrent remove");
        self.inner.query(options, change_id).await
    }

    async fn test(&self, endpoint: &str, credentials: &Credentials) -> bool {
        self.inner.test(endpoint, credentials).await
    }
}

#[tokio::test]
async fn change_removed_mid_cycle_is_not_surfaced() {
    let store = ChangeStore::in_memory();
    store.save_options(&options()).await.expect("options");
    store
        .save_changes(&[
            tracked("326205", "Expose index", ChangeStatus::New, -1, 0),
            tracked("1", "Other change", ChangeStatus::New, 0, 0),
        ])
        .await
        .expect("changes");
    let api = RemovingApi {
        inner: FakeReviewApi::new(),
        store: store.clone(),
        remove: ChangeId::from("326205"),
    };
    api.inner
        .respond("326205", remote("Expose index", ChangeStatus::Merged, 1, 1));
    api.inner
        .respond("1", remote("Other change", ChangeStatus::New, 0, 0));
    let notifier = Arc::new(RecordingNotifier::new());
    let cycle = SyncCycle::new(
        store.clone(),
        Arc::new(api),
        Arc::new(FakeViewers::new()),
        notifier.clone(),
    );

    let outcome = cycle.run(&RestartToken::new()).await.expect("run");

    let ids: Vec<ChangeId> = store
        .get_changes()
        .await
        .expect("changes")
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec![ChangeId::from("1")]);
    assert!(store.get_updated_changes().await.expect("pending").is_empty());
    assert_eq!(notifier.badge(), "");
    assert!(notifier.notifications().is_empty());
    assert_eq!(outcome, CycleOutcome::Completed { updated: 0 });
}
