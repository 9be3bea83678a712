//! reviewwatch: track code review changes from the terminal.
//!
//! # Usage
//!
//! ```text
//! reviewwatch daemon start|stop|status
//! reviewwatch options set --endpoint <url> --identity <user> [--secret <pw> | $REVIEWWATCH_SECRET] [--refresh <secs>]
//! reviewwatch options test --endpoint <url> --identity <user> [--secret <pw> | $REVIEWWATCH_SECRET]
//! reviewwatch add <id>
//! reviewwatch remove <id>...
//! reviewwatch list [--json]
//! reviewwatch watch
//! reviewwatch open <id>
//! reviewwatch restart
//! reviewwatch reset
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    changes::{AddArgs, ListArgs, OpenArgs, RemoveArgs},
    daemon::DaemonCommand,
    options::OptionsCommand,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "reviewwatch",
    version,
    about = "Watch code review changes and get told when they move",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage the background update daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Configure the review server connection.
    Options {
        #[command(subcommand)]
        command: OptionsCommand,
    },

    /// Start tracking a change.
    Add(AddArgs),

    /// Stop tracking one or more changes.
    Remove(RemoveArgs),

    /// Show tracked changes, updated ones first.
    List(ListArgs),

    /// Stay attached and print updates as they arrive.
    Watch,

    /// Print the review page URL of a change.
    Open(OpenArgs),

    /// Reload options on the next update cycle.
    Restart,

    /// Forget every tracked change.
    Reset,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Options { command } => commands::options::run(command),
        Commands::Add(args) => args.run(),
        Commands::Remove(args) => args.run(),
        Commands::List(args) => args.run(),
        Commands::Watch => commands::changes::watch(),
        Commands::Open(args) => args.run(),
        Commands::Restart => commands::changes::restart(),
        Commands::Reset => commands::changes::reset(),
    }
}
