//! Subcommand implementations.
//!
//! Each returns `Ok(false)` when the command ran but the outcome should
//! produce a non-zero exit status.

use crate::Credentials;
use anyhow::{bail, Context, Result};
use offline_queue::{FileQueueStore, OperationId, QueueConfig, QueueStore};
use remote::{
    AuthCapability, BucketMigration, HttpAuth, HttpObjectStorage, MigrationConfig, RemoteConfig,
    RestClient, Session, SessionContext, UserIdentity,
};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use sync_engine::{ClientConfig, OfflineClient, StatusPublisher};

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_queue(data_dir: &Path) -> Result<FileQueueStore> {
    FileQueueStore::open(data_dir, QueueConfig::default())
        .with_context(|| format!("Failed to open queue in {}", data_dir.display()))
}

pub fn status(data_dir: &Path) -> Result<bool> {
    let queue = open_queue(data_dir)?;
    let publisher = StatusPublisher::new();
    publisher.refresh_counts(&queue)?;
    print_json(&publisher.current())?;
    Ok(true)
}

pub fn list_abandoned(data_dir: &Path) -> Result<bool> {
    let queue = open_queue(data_dir)?;
    print_json(&queue.abandoned()?)?;
    Ok(true)
}

pub fn retry_abandoned(data_dir: &Path, id: OperationId) -> Result<bool> {
    let queue = open_queue(data_dir)?;
    queue
        .retry_abandoned(&id)
        .with_context(|| format!("Failed to requeue {}", id))?;
    println!("Requeued {}", id);
    Ok(true)
}

pub fn discard_abandoned(data_dir: &Path, id: OperationId) -> Result<bool> {
    let queue = open_queue(data_dir)?;
    match queue.get(&id)? {
        None => bail!("No queued operation {}", id),
        Some(op) if !op.is_abandoned() => bail!("Operation {} is not abandoned", id),
        Some(_) => {}
    }
    queue.remove(&id)?;
    println!("Discarded {}", id);
    Ok(true)
}

/// REST client for the primary project, signed in per `credentials`.
async fn connect(credentials: &Credentials) -> Result<RestClient> {
    let config = RemoteConfig::from_env().context("Failed to load remote configuration")?;
    let session = SessionContext::new();
    let rest = RestClient::new(config, session.clone()).context("Failed to build HTTP client")?;

    if let Some(token) = &credentials.access_token {
        let user_id = credentials
            .user_id
            .clone()
            .context("--user-id is required with --access-token")?;
        session.set_session(Session::new(token.clone(), UserIdentity::new(user_id)));
    } else if let (Some(email), Some(password)) = (&credentials.email, &credentials.password) {
        HttpAuth::new(rest.clone())
            .sign_in(email, password)
            .await
            .context("Sign-in failed")?;
    } else {
        tracing::warn!("No credentials given, requests use the project key");
    }
    Ok(rest)
}

pub async fn drain(data_dir: &Path, credentials: &Credentials) -> Result<bool> {
    let rest = connect(credentials).await?;
    let client = OfflineClient::open(data_dir, rest, ClientConfig::default())
        .context("Failed to open offline client")?;

    let report = client.sync_now().await;
    print_json(&report)?;
    let ok = !report.stop.is_failure();
    client.shutdown().await;
    Ok(ok)
}

pub async fn run(data_dir: &Path, credentials: &Credentials, interval_secs: u64) -> Result<bool> {
    let rest = connect(credentials).await?;
    let config = ClientConfig::default().with_probe_interval(Duration::from_secs(interval_secs.max(1)));
    let mut client =
        OfflineClient::open(data_dir, rest, config).context("Failed to open offline client")?;

    let _status = client.subscribe_status(|s| {
        tracing::debug!(
            pending = s.pending_count,
            active = s.active_count,
            abandoned = s.abandoned_count,
            syncing = s.is_syncing,
            state = ?s.state,
            "Sync status"
        );
    });
    client.start_probing_remote();
    tracing::info!(data_dir = %data_dir.display(), "Sync running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");
    client.shutdown().await;
    Ok(true)
}

pub async fn migrate_storage(bucket: Option<String>, overwrite: bool) -> Result<bool> {
    let mut config = MigrationConfig::from_env().context("Failed to load migration configuration")?;
    if let Some(bucket) = bucket {
        config = config.with_bucket(bucket);
    }
    if overwrite {
        config = config.with_overwrite(true);
    }

    let source = HttpObjectStorage::new(RestClient::new(config.source.clone(), SessionContext::new())?);
    let destination =
        HttpObjectStorage::new(RestClient::new(config.destination.clone(), SessionContext::new())?);
    tracing::info!(
        bucket = %config.bucket,
        overwrite = config.overwrite,
        source = %config.source.url,
        destination = %config.destination.url,
        "Starting bucket migration"
    );

    let report = BucketMigration::new(source, destination, config.bucket.clone())
        .with_overwrite(config.overwrite)
        .run()
        .await
        .with_context(|| format!("Failed to list bucket {}", config.bucket))?;
    print_json(&report)?;
    Ok(report.is_success())
}
