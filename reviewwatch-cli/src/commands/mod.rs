pub mod changes;
pub mod daemon;
pub mod options;

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::Value;

use reviewwatch_daemon::{request, DaemonError, Message};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Send one message to the daemon, with a hint when it is not running.
pub(crate) fn call(message: Message) -> Result<Value> {
    let home = home()?;
    let kind = message.kind();
    request(&home, &message).map_err(|err| match err {
        DaemonError::DaemonNotRunning { .. } => {
            anyhow::anyhow!("{err}; start it with `reviewwatch daemon start`")
        }
        other => anyhow::Error::new(other).context(format!("'{kind}' request failed")),
    })
}
