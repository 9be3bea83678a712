//! End-to-end daemon behaviour over the Unix socket with a scripted remote.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use reviewwatch_core::{ChangeId, ChangeStatus, ConnectionOptions, Credentials};
use reviewwatch_daemon::paths::socket_path;
use reviewwatch_daemon::{request, serve, subscribe, Message, Push};
use reviewwatch_sync::testing::FakeReviewApi;
use reviewwatch_sync::RemoteChange;

fn options() -> ConnectionOptions {
    ConnectionOptions {
        refresh_time_seconds: Some(1),
        endpoint: "https://hereweare.testing.it".to_string(),
        credentials: Credentials {
            identity: "johnny@b.goode".to_string(),
            secret: "ultrasecretpassword".to_string(),
        },
    }
}

fn remote(status: ChangeStatus) -> RemoteChange {
    RemoteChange {
        subject: "Expose index of the group for a line".to_string(),
        status,
        code_review: 0,
        verified: 0,
    }
}

async fn call(home: &Path, message: Message) -> Value {
    let home = home.to_path_buf();
    tokio::task::spawn_blocking(move || request(&home, &message))
        .await
        .expect("join")
        .expect("daemon reply")
}

async fn wait_for_socket(home: &Path) {
    let socket = socket_path(home);
    for _ in 0..200 {
        if socket.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("daemon socket never appeared at {}", socket.display());
}

struct Running {
    home: TempDir,
    api: Arc<FakeReviewApi>,
    task: tokio::task::JoinHandle<()>,
}

async fn start_daemon() -> Running {
    let home = TempDir::new().expect("home");
    let api = Arc::new(FakeReviewApi::new());
    let task = {
        let home: PathBuf = home.path().to_path_buf();
        let api = api.clone();
        tokio::spawn(async move {
            serve(home, api).await.expect("daemon run");
        })
    };
    wait_for_socket(home.path()).await;
    Running { home, api, task }
}

async fn stop_daemon(running: Running) {
    assert_eq!(call(running.home.path(), Message::Shutdown).await, json!(true));
    tokio::time::timeout(Duration::from_secs(5), running.task)
        .await
        .expect("daemon exits after shutdown")
        .expect("join");
    assert!(!socket_path(running.home.path()).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn configure_add_and_list_changes() {
    let daemon = start_daemon().await;
    let home = daemon.home.path();
    daemon.api.respond("326205", remote(ChangeStatus::New));

    assert_eq!(call(home, Message::GetConfigState).await, json!(false));
    assert_eq!(call(home, Message::SaveOptions(options())).await, json!(true));
    assert_eq!(call(home, Message::GetConfigState).await, json!(true));

    let added = call(home, Message::AddChange(ChangeId::from("326205"))).await;
    assert_eq!(added, json!(true));

    let state = call(home, Message::GetCurrentState).await;
    assert_eq!(state[0]["id"], json!("326205"));
    assert_eq!(state[0]["subject"], json!("Expose index of the group for a line"));
    assert_eq!(state[0]["status"], json!("NEW"));

    let status = call(home, Message::Status).await;
    assert_eq!(status["state"], json!("running"));
    assert_eq!(status["tracked"], json!(1));
    assert_eq!(status["viewers"], json!(0));

    let url = call(home, Message::OpenChange(ChangeId::from("326205"))).await;
    assert_eq!(url, json!("https://hereweare.testing.it/326205"));

    assert_eq!(
        call(home, Message::RemoveChanges(vec![ChangeId::from("326205")])).await,
        json!(true)
    );
    let status = call(home, Message::Status).await;
    assert_eq!(status["state"], json!("stopped"));

    stop_daemon(daemon).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribed_viewer_receives_update_push() {
    let daemon = start_daemon().await;
    let home = daemon.home.path().to_path_buf();
    daemon.api.respond("326205", remote(ChangeStatus::New));
    call(&home, Message::SaveOptions(options())).await;
    call(&home, Message::AddChange(ChangeId::from("326205"))).await;

    let first_push = {
        let home = home.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = subscribe(&home).expect("subscribe");
            session.next()
        })
    };

    // Wait for the viewer to be counted, then make the remote change.
    for _ in 0..200 {
        if call(&home, Message::Status).await["viewers"] == json!(1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    daemon.api.respond("326205", remote(ChangeStatus::Merged));

    let push = tokio::time::timeout(Duration::from_secs(10), first_push)
        .await
        .expect("push within a few cycles")
        .expect("join")
        .expect("session open")
        .expect("push decodes");

    let Push::UpdateNotify(changes) = push;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].id, ChangeId::from("326205"));
    assert_eq!(changes[0].status, Some(ChangeStatus::Merged));
    assert!(changes[0].updated);

    // Every tracked change is terminal now, so the service stops itself.
    let mut state = Value::Null;
    for _ in 0..200 {
        state = call(&home, Message::Status).await["state"].clone();
        if state == json!("stopped") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state, json!("stopped"));

    stop_daemon(daemon).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_message_gets_error_reply() {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;

    let daemon = start_daemon().await;
    let socket = socket_path(daemon.home.path());

    let reply = tokio::task::spawn_blocking(move || {
        let mut stream = UnixStream::connect(&socket).expect("connect");
        stream.write_all(b"{\"type\":\"bogus\"}\n").expect("write");
        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).expect("read");
        line
    })
    .await
    .expect("join");

    let reply: Value = serde_json::from_str(reply.trim()).expect("json reply");
    assert!(reply["error"]
        .as_str()
        .is_some_and(|msg| msg.contains("invalid message JSON")));

    stop_daemon(daemon).await;
}
