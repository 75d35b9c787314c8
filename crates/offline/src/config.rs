//! Queue limits and runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Hard cap on queued events; the oldest are evicted beyond this.
pub const MAX_QUEUE_SIZE: usize = 50;

/// Delivery attempts before a failed event stops being retried.
pub const MAX_SYNC_ATTEMPTS: u32 = 3;

/// Events older than this are pruned regardless of status.
pub const STALE_EVENT_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Key under which the queue snapshot is stored.
pub const STORAGE_KEY: &str = "pending-wear-events";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("could not resolve an application data directory; set WARDROBE_DATA_DIR")]
    NoDataDir,
}

/// Per-queue policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub storage_key: String,
    pub max_sync_attempts: u32,
    pub stale_event_age: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            storage_key: STORAGE_KEY.to_string(),
            max_sync_attempts: MAX_SYNC_ATTEMPTS,
            stale_event_age: STALE_EVENT_AGE,
        }
    }
}

/// Cadence of the background sync worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncWorkerConfig {
    pub sync_interval: Duration,
    pub prune_interval: Duration,
    /// Upper bound for the backoff applied after consecutive failed cycles.
    pub max_backoff: Duration,
}

impl Default for SyncWorkerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            prune_interval: Duration::from_secs(60 * 60),
            max_backoff: Duration::from_secs(300),
        }
    }
}

/// Process configuration for the offline binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub queue: QueueConfig,
    pub worker: SyncWorkerConfig,
}

impl AppConfig {
    /// Load from `WARDROBE_*` environment variables, falling back to defaults.
    ///
    /// - `WARDROBE_DATA_DIR`: directory holding `offline.db`
    ///   (default `{os data dir}/wardrobe`)
    /// - `WARDROBE_SYNC_INTERVAL_SECS`
    /// - `WARDROBE_PRUNE_INTERVAL_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = match lookup("WARDROBE_DATA_DIR") {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => default_data_dir()?,
        };

        let mut worker = SyncWorkerConfig::default();
        if let Some(secs) = parse_secs(&lookup, "WARDROBE_SYNC_INTERVAL_SECS")? {
            worker.sync_interval = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "WARDROBE_PRUNE_INTERVAL_SECS")? {
            worker.prune_interval = secs;
        }

        Ok(Self {
            data_dir,
            queue: QueueConfig::default(),
            worker,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("offline.db")
    }
}

fn parse_secs<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let secs: u64 = raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Some(Duration::from_secs(secs)))
}

fn default_data_dir() -> Result<PathBuf, ConfigError> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .ok_or(ConfigError::NoDataDir)?;
    Ok(base.join("wardrobe"))
}
