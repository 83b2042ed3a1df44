//! Environment configuration for the remote capabilities.
//!
//! Loading fails fast with a [`ConfigError`] naming the offending variable;
//! nothing is contacted before every required value is present.

use crate::error::{ConfigError, ConfigResult};
use std::time::Duration;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bucket copied by the storage migration.
pub const DEFAULT_BUCKET: &str = "player-media";

/// Connection settings for one remote project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Project base URL, without a trailing slash.
    pub url: String,
    /// Public key sent as `apikey` on every request.
    pub anon_key: String,
    /// Privileged key, used as bearer when nobody is signed in.
    pub service_role_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            service_role_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_service_role_key(mut self, key: impl Into<String>) -> Self {
        self.service_role_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load `SCOUT_URL`, `SCOUT_ANON_KEY`, `SCOUT_SERVICE_ROLE_KEY` and
    /// `SCOUT_TIMEOUT_SECS` from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup("SCOUT", env_var)
    }

    /// Load `{prefix}_URL`, `{prefix}_ANON_KEY`, `{prefix}_SERVICE_ROLE_KEY`
    /// and `{prefix}_TIMEOUT_SECS` through `lookup`.
    pub fn from_lookup(prefix: &str, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let url = required(&lookup, &format!("{}_URL", prefix))?;
        validate_url(&format!("{}_URL", prefix), &url)?;
        let anon_key = required(&lookup, &format!("{}_ANON_KEY", prefix))?;

        let mut config = Self::new(url, anon_key);
        if let Some(key) = optional(&lookup, &format!("{}_SERVICE_ROLE_KEY", prefix)) {
            config = config.with_service_role_key(key);
        }

        let timeout_var = format!("{}_TIMEOUT_SECS", prefix);
        if let Some(raw) = optional(&lookup, &timeout_var) {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::Invalid {
                var: timeout_var.clone(),
                reason: format!("expected a whole number of seconds, got {:?}", raw),
            })?;
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    var: timeout_var,
                    reason: "must be greater than zero".to_string(),
                });
            }
            config = config.with_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    /// Key presented as bearer when no user session exists.
    pub fn fallback_bearer(&self) -> &str {
        self.service_role_key.as_deref().unwrap_or(&self.anon_key)
    }
}

/// Settings for copying a storage bucket between two projects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    pub source: RemoteConfig,
    pub destination: RemoteConfig,
    pub bucket: String,
    /// Overwrite files that already exist at the destination.
    pub overwrite: bool,
}

impl MigrationConfig {
    /// Load `SOURCE_URL`, `SOURCE_SERVICE_ROLE_KEY`, `DEST_URL`,
    /// `DEST_SERVICE_ROLE_KEY`, `STORAGE_BUCKET` and `STORAGE_UPSERT` from
    /// the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(env_var)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let source = project(&lookup, "SOURCE")?;
        let destination = project(&lookup, "DEST")?;
        let bucket = optional(&lookup, "STORAGE_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string());
        let overwrite = match optional(&lookup, "STORAGE_UPSERT") {
            Some(raw) => parse_bool("STORAGE_UPSERT", &raw)?,
            None => false,
        };
        Ok(Self {
            source,
            destination,
            bucket,
            overwrite,
        })
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// A project addressed with its service role key only.
fn project(lookup: &impl Fn(&str) -> Option<String>, prefix: &str) -> ConfigResult<RemoteConfig> {
    let url_var = format!("{}_URL", prefix);
    let url = required(lookup, &url_var)?;
    validate_url(&url_var, &url)?;
    let key = required(lookup, &format!("{}_SERVICE_ROLE_KEY", prefix))?;
    Ok(RemoteConfig::new(url, key.clone()).with_service_role_key(key))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> ConfigResult<String> {
    optional(lookup, var).ok_or_else(|| ConfigError::Missing {
        var: var.to_string(),
    })
}

fn validate_url(var: &str, url: &str) -> ConfigResult<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            var: var.to_string(),
            reason: format!("expected an http(s) URL, got {:?}", url),
        })
    }
}

fn parse_bool(var: &str, raw: &str) -> ConfigResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var: var.to_string(),
            reason: format!("expected true or false, got {:?}", raw),
        }),
    }
}
