//! gmarchive - mirror a Gmail search into local maildirs
//!
//! Subcommands:
//! - `init` writes the archive configuration into the archive root
//! - `sync` downloads whatever the archive is missing
//! - `login` runs the OAuth flow ahead of the first sync
//! - `logout` forgets the cached OAuth tokens

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use archive::{
    Archive, ArchiveError, ArchiveSync, GmailAuth, GmailClient, GmailCredentials, SyncConfig,
    SyncOptions,
};
use clap::Parser;
use log::{info, warn};

mod cli;

use cli::{Cli, Command, InitCmd, SyncCmd};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let verbose = matches!(&cli.command, Command::Sync(cmd) if cmd.verbose);
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(verbose)),
    )
    .format_timestamp_millis()
    .init();

    if let Err(e) = config::init() {
        warn!("Failed to initialize config directory: {}", e);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let configuration = matches!(
                e.downcast_ref::<ArchiveError>(),
                Some(ArchiveError::Configuration(_))
            );
            ExitCode::from(if configuration { 2 } else { 1 })
        }
    }
}

/// Default log filter; `-v` only raises our own crates to debug
fn log_filter(verbose: bool) -> &'static str {
    if verbose {
        "info,archive=debug,gmarchive=debug"
    } else {
        "info"
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init(cmd) => init(&cli.root, cmd),
        Command::Sync(cmd) => sync(&cli.root, cmd),
        Command::Login => login(),
        Command::Logout => logout(),
    }
}

fn init(root: &Path, cmd: InitCmd) -> Result<()> {
    let path = SyncConfig::path_in(root);
    if path.exists() && !cmd.force {
        return Err(ArchiveError::Configuration(format!(
            "{} already exists (use --force to replace it)",
            path.display()
        ))
        .into());
    }
    if let (Some(after), Some(before)) = (cmd.after, cmd.before)
        && after >= before
    {
        return Err(ArchiveError::Configuration(format!(
            "--after ({}) must be earlier than --before ({})",
            after, before
        ))
        .into());
    }

    let config = SyncConfig {
        query: cmd.query,
        after: cmd.after,
        before: cmd.before,
        period: cmd.period,
    };
    config.save(root)?;
    info!("Wrote {}", path.display());
    Ok(())
}

fn sync(root: &Path, cmd: SyncCmd) -> Result<()> {
    // Configuration problems surface before any network traffic
    let config = SyncConfig::load(root)?;
    let creds = GmailCredentials::load()?;
    let client = GmailClient::new(GmailAuth::new(creds.client_id, creds.client_secret)?);

    let options = SyncOptions {
        concurrency: cmd.jobs,
        dry_run: cmd.dry_run,
        full_resync: cmd.full_resync,
        resync_last: cmd.resync,
        since: cmd.since,
        verbose: cmd.verbose,
    };

    let stats = ArchiveSync::new(&client, Archive::new(root), config, options).run()?;
    info!(
        "{} partitions, {} ids listed, {} new messages",
        stats.partitions, stats.listed, stats.committed
    );
    Ok(())
}

fn login() -> Result<()> {
    let creds = GmailCredentials::load()?;
    let client = GmailClient::new(GmailAuth::new(creds.client_id, creds.client_secret)?);
    if client.is_authenticated() {
        info!("Already authenticated");
        return Ok(());
    }
    client.authenticate()?;
    info!("Logged in");
    Ok(())
}

fn logout() -> Result<()> {
    let creds = GmailCredentials::load()?;
    GmailAuth::new(creds.client_id, creds.client_secret)?.logout()?;
    info!("Logged out");
    Ok(())
}
