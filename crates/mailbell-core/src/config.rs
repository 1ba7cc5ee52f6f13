//! Configuration for mailbell.
//!
//! Loaded from `~/.mailbell/config.yaml`. Every section is optional; a missing
//! file yields the defaults. Command-line flags override file values after
//! loading, then [`MailbellConfig::validate`] runs once on the merged result.
//!
//! ```yaml
//! server_url: http://10.0.0.170:8080
//! alert:
//!   duration_secs: 70
//!   ringtone: /sdcard/Ringtones/klaxon.ogg
//!   background_persistence: true
//! ingest:
//!   poll_interval_secs: 10
//!   cross_transport_dedup: true
//! push:
//!   inbox_path: /data/local/tmp/mailbell-push.json
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MailbellError, Result};
use crate::logging::mailbell_home;

/// Shortest allowed alert duration in seconds.
pub const MIN_ALERT_DURATION_SECS: u64 = 10;

/// Longest allowed alert duration in seconds.
pub const MAX_ALERT_DURATION_SECS: u64 = 300;

/// Default alert duration in seconds.
pub const DEFAULT_ALERT_DURATION_SECS: u64 = 70;

/// Default poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Default watchdog tick in seconds.
pub const DEFAULT_WATCHDOG_INTERVAL_SECS: u64 = 30;

/// Default capacity of the recently-seen set.
pub const DEFAULT_RECENT_CAPACITY: usize = 100;

/// Retry ceiling for the stream worker, effectively unbounded.
pub const DEFAULT_MAX_STREAM_RETRIES: u32 = 1_000_000;

/// Config file path (`~/.mailbell/config.yaml`).
pub fn default_config_path() -> Result<PathBuf> {
    Ok(mailbell_home()?.join("config.yaml"))
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MailbellConfig {
    /// Base URL of the alert server (e.g. `http://10.0.0.170:8080`)
    pub server_url: Option<String>,

    /// Alert delivery settings
    pub alert: AlertConfig,

    /// Ingestion worker settings
    pub ingest: IngestConfig,

    /// Push inbox settings
    pub push: PushConfig,

    /// Alert journal settings
    pub journal: JournalConfig,
}

/// User-facing alert settings, read by the actuator when a session starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    /// How long each alert rings and vibrates (10..=300)
    pub duration_secs: u64,

    /// Custom ringtone; the bundled tone is used when unset or missing
    pub ringtone: Option<PathBuf>,

    /// Hold wake locks so channels keep running with the screen off
    pub background_persistence: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            duration_secs: DEFAULT_ALERT_DURATION_SECS,
            ringtone: None,
            background_persistence: true,
        }
    }
}

impl AlertConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn with_duration_secs(mut self, secs: u64) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn with_ringtone(mut self, path: impl Into<PathBuf>) -> Self {
        self.ringtone = Some(path.into());
        self
    }

    pub fn with_background_persistence(mut self, enabled: bool) -> Self {
        self.background_persistence = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_ALERT_DURATION_SECS..=MAX_ALERT_DURATION_SECS).contains(&self.duration_secs) {
            return Err(MailbellError::config_validation(format!(
                "alert.duration_secs must be between {MIN_ALERT_DURATION_SECS} and \
                 {MAX_ALERT_DURATION_SECS}, got {}",
                self.duration_secs
            )));
        }
        Ok(())
    }
}

/// Ingestion worker settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Run the SSE stream worker
    pub stream_enabled: bool,

    /// Run the poll worker
    pub poll_enabled: bool,

    /// Path of the SSE endpoint
    pub stream_path: String,

    /// Path of the poll endpoint
    pub poll_path: String,

    /// Seconds between polls
    pub poll_interval_secs: u64,

    /// Seconds between watchdog ticks
    pub watchdog_interval_secs: u64,

    /// Timeout for connecting and for each poll request
    pub request_timeout_secs: u64,

    /// Longest silence tolerated on an open stream before reconnecting
    pub stream_read_timeout_secs: u64,

    /// Cap of the reconnect backoff
    pub max_backoff_secs: u64,

    /// Reconnect attempts before the stream worker gives up
    pub max_stream_retries: u32,

    /// Capacity of the recently-seen set
    pub recent_capacity: usize,

    /// Share one recently-seen set across stream, poll and push workers
    pub cross_transport_dedup: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            stream_enabled: true,
            poll_enabled: true,
            stream_path: "/events".to_string(),
            poll_path: "/poll".to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            watchdog_interval_secs: DEFAULT_WATCHDOG_INTERVAL_SECS,
            request_timeout_secs: 10,
            stream_read_timeout_secs: 60,
            max_backoff_secs: 5,
            max_stream_retries: DEFAULT_MAX_STREAM_RETRIES,
            recent_capacity: DEFAULT_RECENT_CAPACITY,
            cross_transport_dedup: true,
        }
    }
}

impl IngestConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_read_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_read_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("ingest.poll_interval_secs", self.poll_interval_secs),
            ("ingest.watchdog_interval_secs", self.watchdog_interval_secs),
            ("ingest.request_timeout_secs", self.request_timeout_secs),
            ("ingest.stream_read_timeout_secs", self.stream_read_timeout_secs),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(MailbellError::config_validation(format!(
                    "{field} must be greater than zero"
                )));
            }
        }
        if self.recent_capacity == 0 {
            return Err(MailbellError::config_validation(
                "ingest.recent_capacity must be greater than zero",
            ));
        }
        if !self.stream_enabled && !self.poll_enabled {
            return Err(MailbellError::config_validation(
                "at least one of ingest.stream_enabled / ingest.poll_enabled must be true",
            ));
        }
        Ok(())
    }
}

/// Push inbox settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PushConfig {
    /// Pending-push file written by the push SDK bridge; unset disables the worker
    pub inbox_path: Option<PathBuf>,

    /// Seconds between inbox checks
    pub check_interval_secs: u64,

    /// Seconds to wait after an inbox error
    pub error_backoff_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            inbox_path: None,
            check_interval_secs: 1,
            error_backoff_secs: 5,
        }
    }
}

/// Alert journal settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JournalConfig {
    pub enabled: bool,

    /// Defaults to `~/.mailbell/alerts.jsonl`
    pub path: Option<PathBuf>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl JournalConfig {
    /// The journal file, falling back to `~/.mailbell/alerts.jsonl`.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(mailbell_home()?.join("alerts.jsonl")),
        }
    }
}

impl MailbellConfig {
    /// Load configuration.
    ///
    /// With `path = None` the default location is used and a missing file
    /// yields defaults. An explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (default_config_path()?, false),
        };

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MailbellError::ConfigNotFound {
                    path,
                    source: Some(e),
                });
            }
            Err(e) => return Err(MailbellError::io("reading config", path, e)),
        };

        Self::from_yaml(&content, &path)
    }

    /// Parse configuration from YAML text. `origin` is used in error messages.
    pub fn from_yaml(content: &str, origin: &Path) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| MailbellError::ConfigInvalid {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Render as YAML, in the file format [`load`](Self::load) reads.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| MailbellError::internal(format!(
            "serializing configuration: {e}"
        )))
    }

    /// Validate the merged configuration.
    pub fn validate(&self) -> Result<()> {
        self.alert.validate()?;
        self.ingest.validate()?;
        if let Some(url) = &self.server_url {
            validate_server_url(url)?;
        }
        Ok(())
    }

    /// Server URL, required for connecting.
    pub fn require_server_url(&self) -> Result<&str> {
        match self.server_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(url.trim()),
            _ => Err(MailbellError::ConfigMissingField {
                field: "server_url".into(),
            }),
        }
    }
}

fn validate_server_url(url: &str) -> Result<()> {
    let url = url.trim();
    if url.is_empty() {
        return Err(MailbellError::config_validation("server_url must not be empty"));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(MailbellError::config_validation(format!(
            "server_url must start with http:// or https://, got {url}"
        )));
    }
    Ok(())
}
