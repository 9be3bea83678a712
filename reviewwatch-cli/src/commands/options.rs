//! `reviewwatch options set` and `reviewwatch options test`

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;

use reviewwatch_core::{ConnectionOptions, Credentials};
use reviewwatch_daemon::{ConnectionTarget, Message};

use super::call;

#[derive(Subcommand, Debug)]
pub enum OptionsCommand {
    /// Save connection options and apply them to the update service.
    Set(SetArgs),

    /// Check that an endpoint answers with the given credentials.
    Test(ConnectionArgs),

    /// Report whether usable options are stored.
    Check,
}

#[derive(Args, Debug)]
pub struct ConnectionArgs {
    /// Review server base URL, e.g. https://review.example.org
    #[arg(long)]
    pub endpoint: String,

    /// Account name for HTTP basic auth.
    #[arg(long)]
    pub identity: String,

    /// HTTP password or token. Prefer the environment variable so the
    /// secret stays out of the process list.
    #[arg(long, env = "REVIEWWATCH_SECRET", hide_env_values = true)]
    pub secret: String,
}

impl ConnectionArgs {
    fn credentials(&self) -> Credentials {
        Credentials {
            identity: self.identity.clone(),
            secret: self.secret.clone(),
        }
    }
}

#[derive(Args, Debug)]
pub struct SetArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Seconds between update cycles.
    #[arg(long = "refresh", default_value_t = 60)]
    pub refresh_time_seconds: u64,
}

pub fn run(command: OptionsCommand) -> Result<()> {
    match command {
        OptionsCommand::Set(args) => set(args),
        OptionsCommand::Test(args) => test(args),
        OptionsCommand::Check => check(),
    }
}

fn set(args: SetArgs) -> Result<()> {
    if args.refresh_time_seconds == 0 {
        bail!("--refresh must be at least 1 second");
    }
    let options = ConnectionOptions {
        refresh_time_seconds: Some(args.refresh_time_seconds),
        endpoint: args.connection.endpoint.trim_end_matches('/').to_string(),
        credentials: args.connection.credentials(),
    };
    call(Message::SaveOptions(options)).context("failed to save options")?;
    println!("options saved");
    Ok(())
}

fn test(args: ConnectionArgs) -> Result<()> {
    let target = ConnectionTarget {
        endpoint: args.endpoint.trim_end_matches('/').to_string(),
        credentials: args.credentials(),
    };
    let reachable = call(Message::TestConnection(target))?
        .as_bool()
        .unwrap_or(false);

    if reachable {
        println!("{} {}", "✔".green().bold(), args.endpoint);
        Ok(())
    } else {
        bail!("could not reach {} with the given credentials", args.endpoint)
    }
}

fn check() -> Result<()> {
    let configured = call(Message::GetConfigState)?.as_bool().unwrap_or(false);
    if configured {
        println!("options are set");
    } else {
        println!("options are not set");
        println!("Run: reviewwatch options set --endpoint <url> --identity <user> --secret <pw>");
    }
    Ok(())
}
