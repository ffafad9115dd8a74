// ABOUTME: Operational CLI for retention: routine cleanup and permanent purge
// ABOUTME: Purge prompts for confirmation unless --force is given
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ledgergate::config::ServerConfig;
use ledgergate::database::Database;
use ledgergate::logging;
use ledgergate::retention::{PurgeOptions, RetentionEngine};
use std::io::{self, BufRead, Write};

#[derive(Parser)]
#[command(name = "ledgergate-cli", about = "Ledgergate operational commands")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Remove expired tokens, old codes, and stale registered clients
    Cleanup,
    /// Permanently delete revoked and aged-out expired rows
    Purge {
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
        /// Only purge revoked and deleted rows
        #[arg(long, conflicts_with = "expired_only")]
        revoked_only: bool,
        /// Only purge expired rows past the grace period
        #[arg(long)]
        expired_only: bool,
        /// Grace period in hours after expiry before a row is purged
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::from_env().context("failed to load configuration")?;
    logging::init(&config.log_level);

    let database = Database::new(&config.database_url)
        .await
        .context("failed to open database")?;
    let engine = RetentionEngine::new(database, config);

    match cli.command {
        Command::Cleanup => {
            let report = engine.cleanup().await.context("cleanup failed")?;
            println!(
                "cleanup: {} stale clients, {} access tokens, {} refresh tokens, {} auth codes",
                report.stale_clients,
                report.access_tokens,
                report.refresh_tokens,
                report.auth_codes
            );
        }
        Command::Purge {
            force,
            revoked_only,
            expired_only,
            hours,
        } => {
            let options = PurgeOptions {
                revoked: !expired_only,
                expired: !revoked_only,
                min_age_hours: hours,
            };

            if !force && !confirm_purge()? {
                bail!("purge aborted");
            }

            let report = engine.purge(&options).await.context("purge failed")?;
            println!(
                "purged: {} access tokens, {} refresh tokens, {} auth codes",
                report.access_tokens, report.refresh_tokens, report.auth_codes
            );
        }
    }

    Ok(())
}

/// Ask the operator to confirm a destructive purge
fn confirm_purge() -> Result<bool> {
    print!("This permanently deletes token data. Type 'yes' to continue: ");
    io::stdout().flush().context("failed to flush stdout")?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read confirmation")?;
    Ok(line.trim().eq_ignore_ascii_case("yes"))
}
