use std::io::{BufRead, BufReader, Lines, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use reviewwatch_core::{ChangeId, ConnectionOptions, Credentials, TrackedChange};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request: `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum Message {
    /// Pending buffer entries first, then the remaining tracked changes.
    GetCurrentState,
    AddChange(ChangeId),
    RemoveChanges(Vec<ChangeId>),
    TestConnection(ConnectionTarget),
    TriggerRestart,
    GetConfigState,
    SaveOptions(ConnectionOptions),
    /// Resolve the browser URL of a change.
    OpenChange(ChangeId),
    Status,
    /// Forget every tracked change and stop the service.
    Clear,
    /// Turn this connection into a viewer session.
    Subscribe,
    Shutdown,
}

impl Message {
    /// Wire name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::GetCurrentState => "get-current-state",
            Message::AddChange(_) => "add-change",
            Message::RemoveChanges(_) => "remove-changes",
            Message::TestConnection(_) => "test-connection",
            Message::TriggerRestart => "trigger-restart",
            Message::GetConfigState => "get-config-state",
            Message::SaveOptions(_) => "save-options",
            Message::OpenChange(_) => "open-change",
            Message::Status => "status",
            Message::Clear => "clear",
            Message::Subscribe => "subscribe",
            Message::Shutdown => "shutdown",
        }
    }
}

/// Endpoint and credentials to check, independent of the stored options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub endpoint: String,
    pub credentials: Credentials,
}

/// JSON newline-delimited reply: a bare `true`, `{"response": ...}`, or
/// `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Ack(bool),
    Response { response: Value },
    Error { error: String },
}

impl Reply {
    pub fn ack() -> Self {
        Reply::Ack(true)
    }

    pub fn response(value: impl Into<Value>) -> Self {
        Reply::Response {
            response: value.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            error: message.into(),
        }
    }

    /// The payload carried by a successful reply.
    pub fn into_value(self) -> Result<Value, DaemonError> {
        match self {
            Reply::Ack(ok) => Ok(Value::Bool(ok)),
            Reply::Response { response } => Ok(response),
            Reply::Error { error } => Err(DaemonError::Protocol(error)),
        }
    }
}

/// Viewer-bound pushes written to subscribed connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum Push {
    UpdateNotify(Vec<TrackedChange>),
}

/// Send one JSON request to the daemon socket and return one reply.
pub fn send_request(home: &Path, message: &Message) -> Result<Reply, DaemonError> {
    let (socket, stream) = connect(home)?;
    let mut reader = BufReader::new(write_message(&socket, stream, message)?);
    read_reply(&socket, &mut reader)
}

/// Send a request and unwrap its payload.
pub fn request(home: &Path, message: &Message) -> Result<Value, DaemonError> {
    send_request(home, message)?.into_value()
}

/// Open a viewer session. Iterate the returned value to receive pushes.
pub fn subscribe(home: &Path) -> Result<Subscription, DaemonError> {
    let (socket, stream) = connect(home)?;
    let mut reader = BufReader::new(write_message(&socket, stream, &Message::Subscribe)?);
    read_reply(&socket, &mut reader)?.into_value()?;
    Ok(Subscription {
        socket,
        lines: reader.lines(),
    })
}

/// An attached viewer session.
pub struct Subscription {
    socket: PathBuf,
    lines: Lines<BufReader<UnixStream>>,
}

impl Iterator for Subscription {
    type Item = Result<Push, DaemonError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(io_err(&self.socket, err))),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).map_err(DaemonError::from));
        }
    }
}

fn connect(home: &Path) -> Result<(PathBuf, UnixStream), DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;
    Ok((socket, stream))
}

fn write_message(
    socket: &Path,
    mut stream: UnixStream,
    message: &Message,
) -> Result<UnixStream, DaemonError> {
    let payload = serde_json::to_string(message)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(socket, e))?;
    stream.flush().map_err(|e| io_err(socket, e))?;
    Ok(stream)
}

fn read_reply(socket: &Path, reader: &mut BufReader<UnixStream>) -> Result<Reply, DaemonError> {
    let mut line = String::new();
    let read = reader.read_line(&mut line).map_err(|e| io_err(socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }
    Ok(serde_json::from_str(line.trim_end())?)
}
