use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use reviewwatch_core::{ChangeStore, JsonFileStore, TrackedChange};
use reviewwatch_sync::{GerritClient, ReviewApi};

use crate::error::{io_err, DaemonError};
use crate::paths::{reviewwatch_root, socket_path, store_path};
use crate::protocol::{Message, Push, Reply};
use crate::service::ServiceController;
use crate::viewers::{LogNotifier, SubscriberHub};

const SUBSCRIBER_CAPACITY: usize = 16;

pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let api = Arc::new(GerritClient::new()?);
    serve(home, api).await
}

/// Everything the socket handlers share.
#[derive(Clone)]
struct Daemon {
    controller: ServiceController,
    hub: SubscriberHub,
    notifier: Arc<LogNotifier>,
    shutdown: broadcast::Sender<()>,
}

/// Run the daemon against `api` until ctrl-c or a `shutdown` message.
pub async fn serve(home: PathBuf, api: Arc<dyn ReviewApi>) -> Result<(), DaemonError> {
    let root = reviewwatch_root(&home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }

    let store = ChangeStore::new(Arc::new(JsonFileStore::new(store_path(&home))));
    let hub = SubscriberHub::new(SUBSCRIBER_CAPACITY);
    let notifier = Arc::new(LogNotifier::new());
    let controller = ServiceController::new(store, api, Arc::new(hub.clone()), notifier.clone());
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let daemon = Daemon {
        controller: controller.clone(),
        hub,
        notifier,
        shutdown: shutdown_tx.clone(),
    };

    // Bind before the first cycle so clients can connect while it runs.
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;
    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "reviewwatch daemon listening");

    let socket_handle = {
        let daemon = daemon.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let result = socket_server_task(listener, socket, daemon.clone(), shutdown_rx).await;
            let _ = daemon.shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    if let Err(err) = controller.init().await {
        tracing::error!(error = %err, "failed to start update service");
    }

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);
    controller.shutdown().await;

    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn socket_server_task(
    listener: UnixListener,
    socket: PathBuf,
    daemon: Daemon,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let daemon = daemon.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, daemon).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, daemon: Daemon) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let message = match serde_json::from_str::<Message>(&line) {
            Ok(message) => message,
            Err(err) => {
                write_line(&mut writer, &Reply::error(format!("invalid message JSON: {err}")))
                    .await?;
                continue;
            }
        };

        match message {
            Message::Subscribe => {
                let updates = daemon.hub.subscribe();
                write_line(&mut writer, &Reply::ack()).await?;
                return viewer_session(lines, writer, updates, daemon).await;
            }
            Message::Shutdown => {
                let _ = daemon.shutdown.send(());
                write_line(&mut writer, &Reply::ack()).await?;
                break;
            }
            Message::Status => {
                let reply = match daemon.controller.status().await {
                    Ok(mut payload) => {
                        payload["badge"] = json!(daemon.notifier.badge());
                        payload["viewers"] = json!(daemon.hub.viewer_count());
                        Reply::response(payload)
                    }
                    Err(err) => Reply::error(err.to_string()),
                };
                write_line(&mut writer, &reply).await?;
            }
            message => {
                let reply = daemon
                    .controller
                    .handle(message)
                    .await
                    .unwrap_or_else(|err| Reply::error(err.to_string()));
                write_line(&mut writer, &reply).await?;
            }
        }
    }

    Ok(())
}

/// Forward update pushes to a subscribed connection until the client hangs
/// up or the daemon shuts down.
async fn viewer_session(
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    mut writer: OwnedWriteHalf,
    mut updates: broadcast::Receiver<Vec<TrackedChange>>,
    daemon: Daemon,
) -> Result<(), DaemonError> {
    let mut shutdown_rx = daemon.shutdown.subscribe();
    tracing::debug!(viewers = daemon.hub.viewer_count(), "viewer attached");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            line = lines.next_line() => {
                match line {
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(err) => return Err(io_err("daemon socket read", err)),
                }
            }
            update = updates.recv() => {
                match update {
                    Ok(changes) => write_line(&mut writer, &Push::UpdateNotify(changes)).await?,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "viewer fell behind; dropping updates");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!("viewer detached");
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_line<T: serde::Serialize>(
    writer: &mut OwnedWriteHalf,
    value: &T,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_vec(value)?;
    payload.push(b'\n');
    writer
        .write_all(&payload)
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
