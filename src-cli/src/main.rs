//! scout-sync - command line driver for the scout offline queue.
//!
//! Inspects and resolves the local queue, runs drain passes against the
//! remote project, and copies storage buckets between projects.

mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "scout-sync")]
#[command(about = "Offline queue and background sync for scout observations")]
#[command(version)]
struct Cli {
    /// Directory holding the queue journal and the reference cache
    #[arg(long, env = "SCOUT_DATA_DIR", default_value = "scout-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

/// How to authenticate against the remote project.
#[derive(Args, Clone, Debug, Default)]
pub struct Credentials {
    /// Existing access token
    #[arg(long, env = "SCOUT_ACCESS_TOKEN", hide_env_values = true, requires = "user_id")]
    pub access_token: Option<String>,

    /// User id the access token belongs to
    #[arg(long, env = "SCOUT_USER_ID")]
    pub user_id: Option<String>,

    /// Sign in with this email instead of a token
    #[arg(long, env = "SCOUT_EMAIL", conflicts_with = "access_token", requires = "password")]
    pub email: Option<String>,

    /// Password for --email
    #[arg(long, env = "SCOUT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the sync status of the local queue as JSON
    Status,
    /// Inspect and resolve abandoned operations
    Abandoned {
        #[command(subcommand)]
        action: AbandonedAction,
    },
    /// Run one drain pass against the remote project
    Drain {
        #[command(flatten)]
        credentials: Credentials,
    },
    /// Keep draining in the background until Ctrl-C
    Run {
        #[command(flatten)]
        credentials: Credentials,

        /// Reachability probe interval in seconds
        #[arg(long, default_value_t = 15)]
        interval_secs: u64,
    },
    /// Copy a storage bucket from the source to the destination project
    MigrateStorage {
        /// Bucket to copy (overrides STORAGE_BUCKET)
        #[arg(long)]
        bucket: Option<String>,

        /// Overwrite files that already exist at the destination
        #[arg(long)]
        overwrite: bool,
    },
}

#[derive(Subcommand)]
enum AbandonedAction {
    /// List abandoned operations
    List,
    /// Put an abandoned operation back in line
    Retry { id: offline_queue::OperationId },
    /// Delete an abandoned operation for good
    Discard { id: offline_queue::OperationId },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Status => commands::status(&cli.data_dir),
        Command::Abandoned { action } => match action {
            AbandonedAction::List => commands::list_abandoned(&cli.data_dir),
            AbandonedAction::Retry { id } => commands::retry_abandoned(&cli.data_dir, id),
            AbandonedAction::Discard { id } => commands::discard_abandoned(&cli.data_dir, id),
        },
        Command::Drain { credentials } => commands::drain(&cli.data_dir, &credentials).await,
        Command::Run {
            credentials,
            interval_secs,
        } => commands::run(&cli.data_dir, &credentials, interval_secs).await,
        Command::MigrateStorage { bucket, overwrite } => {
            commands::migrate_storage(bucket, overwrite).await
        }
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_abandoned_retry() {
        let id = offline_queue::OperationId::generate();
        let cli = Cli::try_parse_from([
            "scout-sync",
            "--data-dir",
            "/tmp/scout",
            "abandoned",
            "retry",
            &id.to_string(),
        ])
        .unwrap();
        assert_eq!(cli.data_dir, PathBuf::from("/tmp/scout"));
        match cli.command {
            Command::Abandoned {
                action: AbandonedAction::Retry { id: parsed },
            } => assert_eq!(parsed, id),
            _ => panic!("unexpected command"),
        }
    }

    #[test]
    fn test_rejects_malformed_operation_id() {
        assert!(Cli::try_parse_from(["scout-sync", "abandoned", "discard", "nope"]).is_err());
    }

    #[test]
    fn test_parses_migration_flags() {
        let cli = Cli::try_parse_from([
            "scout-sync",
            "migrate-storage",
            "--bucket",
            "scout-media",
            "--overwrite",
        ])
        .unwrap();
        match cli.command {
            Command::MigrateStorage { bucket, overwrite } => {
                assert_eq!(bucket.as_deref(), Some("scout-media"));
                assert!(overwrite);
            }
            _ => panic!("unexpected command"),
        }
    }

    #[test]
    fn test_email_requires_password() {
        let parsed = Cli::try_parse_from(["scout-sync", "drain", "--email", "a@b.c"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
