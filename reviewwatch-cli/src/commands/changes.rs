//! Tracked change commands: add, remove, list, watch, open, restart, reset.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use reviewwatch_core::{ChangeId, ChangeStatus, TrackedChange};
use reviewwatch_daemon::{subscribe, Message, Push};
use reviewwatch_sync::Notification;

use super::{call, home};

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Change number on the review server.
    pub id: String,
}

impl AddArgs {
    pub fn run(self) -> Result<()> {
        call(Message::AddChange(ChangeId::from(self.id.clone())))?;
        println!("tracking {}", self.id);
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Change numbers to stop tracking.
    #[arg(required = true)]
    pub ids: Vec<String>,
}

impl RemoveArgs {
    pub fn run(self) -> Result<()> {
        let count = self.ids.len();
        let ids = self.ids.into_iter().map(ChangeId::from).collect();
        call(Message::RemoveChanges(ids))?;
        println!("removed {count} change(s)");
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ListArgs {
    pub fn run(self) -> Result<()> {
        let value = call(Message::GetCurrentState)?;
        let changes: Vec<TrackedChange> =
            serde_json::from_value(value).context("daemon sent an unexpected change list")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&changes).context("failed to render changes JSON")?
            );
            return Ok(());
        }

        if changes.is_empty() {
            println!("No changes tracked.");
            println!("Run: reviewwatch add <id>");
            return Ok(());
        }

        let rows: Vec<ChangeRow> = changes.iter().map(ChangeRow::from).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct OpenArgs {
    pub id: String,
}

impl OpenArgs {
    pub fn run(self) -> Result<()> {
        match call(Message::OpenChange(ChangeId::from(self.id.clone())))? {
            serde_json::Value::String(url) => println!("{url}"),
            _ => anyhow::bail!(
                "no endpoint configured; run `reviewwatch options set` before opening {}",
                self.id
            ),
        }
        Ok(())
    }
}

pub fn watch() -> Result<()> {
    let home = home()?;
    let session = subscribe(&home).context("failed to attach to daemon")?;
    println!("watching for updates (ctrl-c to stop)");

    for push in session {
        let Push::UpdateNotify(changes) = push.context("daemon connection failed")?;
        let notification = Notification::for_updates(changes.len());
        println!("{}", notification.message.bold());
        for change in &changes {
            println!(
                "  {} {} {}",
                change.id.as_str().cyan(),
                status_cell(change.status.as_ref()),
                change.subject.as_deref().unwrap_or("")
            );
        }
    }

    println!("daemon closed the session");
    Ok(())
}

pub fn restart() -> Result<()> {
    call(Message::TriggerRestart)?;
    println!("restart requested");
    Ok(())
}

pub fn reset() -> Result<()> {
    call(Message::Clear)?;
    println!("all tracked changes forgotten");
    Ok(())
}

// ---------------------------------------------------------------------------
// Table rendering
// ---------------------------------------------------------------------------

#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "")]
    marker: String,
    #[tabled(rename = "change")]
    id: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "CR")]
    code_review: String,
    #[tabled(rename = "V")]
    verified: String,
    #[tabled(rename = "subject")]
    subject: String,
}

impl From<&TrackedChange> for ChangeRow {
    fn from(change: &TrackedChange) -> Self {
        let marker = if change.updated {
            "●".yellow().bold().to_string()
        } else {
            String::new()
        };
        Self {
            marker,
            id: change.id.to_string(),
            status: status_cell(change.status.as_ref()),
            code_review: vote_cell(change.code_review),
            verified: vote_cell(change.verified),
            subject: change
                .subject
                .clone()
                .unwrap_or_else(|| "(not fetched yet)".dimmed().to_string()),
        }
    }
}

fn status_cell(status: Option<&ChangeStatus>) -> String {
    match status {
        Some(ChangeStatus::Merged) => "MERGED".green().bold().to_string(),
        Some(ChangeStatus::Abandoned) => "ABANDONED".red().to_string(),
        Some(other) => other.as_str().to_string(),
        None => "-".to_string(),
    }
}

fn vote_cell(vote: i8) -> String {
    match vote {
        v if v > 0 => format!("+{v}").green().to_string(),
        v if v < 0 => v.to_string().red().to_string(),
        _ => "0".to_string(),
    }
}
