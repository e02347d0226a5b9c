//! Sync configuration for hosts embedding the engine.
//!
//! Values resolve in order: built-in defaults, an optional JSON file, then
//! `TICKETSYNC_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::RetryPolicy;
use crate::util::{is_http_url, normalize_text_option};

pub const ENV_API_URL: &str = "TICKETSYNC_API_URL";
pub const ENV_AUTH_TOKEN: &str = "TICKETSYNC_AUTH_TOKEN";
pub const ENV_SYNC_INTERVAL_SECS: &str = "TICKETSYNC_SYNC_INTERVAL_SECS";
pub const ENV_BATCH_SIZE: &str = "TICKETSYNC_BATCH_SIZE";

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 5 * 60;
const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_MAX_RECORD_RETRIES: u32 = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TRANSPORT_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1_000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
const DEFAULT_STALE_SYNCING_SECS: u64 = 10 * 60;

/// Sync engine settings.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Base URL of the ticket API; `/sync` is appended for cycles
    pub api_base_url: Option<String>,
    /// Bearer token sent with every request
    pub auth_token: Option<String>,
    pub sync_interval_secs: u64,
    /// Most tickets sent in one cycle
    pub batch_size: usize,
    /// Server-side failures before a record stops retrying automatically
    pub max_record_retries: u32,
    pub request_timeout_secs: u64,
    /// Transport attempts per cycle, first try included
    pub transport_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Age after which a `syncing` record stranded by a crash is re-sent
    pub stale_syncing_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            auth_token: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
            max_record_retries: DEFAULT_MAX_RECORD_RETRIES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            transport_attempts: DEFAULT_TRANSPORT_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            stale_syncing_secs: DEFAULT_STALE_SYNCING_SECS,
        }
    }
}

impl std::fmt::Debug for SyncSettings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncSettings")
            .field("api_base_url", &self.api_base_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("sync_interval_secs", &self.sync_interval_secs)
            .field("batch_size", &self.batch_size)
            .field("max_record_retries", &self.max_record_retries)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("transport_attempts", &self.transport_attempts)
            .field("initial_backoff_ms", &self.initial_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("stale_syncing_secs", &self.stale_syncing_secs)
            .finish()
    }
}

impl SyncSettings {
    /// Resolve settings from an optional file plus the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides(|key| std::env::var(key).ok())?;
        settings.normalize();
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a JSON file; a missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str::<Self>(&raw).map_err(|error| {
            Error::InvalidInput(format!(
                "failed to parse config at {}: {error}",
                path.display()
            ))
        })
    }

    /// Apply `TICKETSYNC_*` overrides from a variable lookup.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = normalize_text_option(lookup(ENV_API_URL)) {
            self.api_base_url = Some(url);
        }
        if let Some(token) = normalize_text_option(lookup(ENV_AUTH_TOKEN)) {
            self.auth_token = Some(token);
        }
        if let Some(raw) = normalize_text_option(lookup(ENV_SYNC_INTERVAL_SECS)) {
            self.sync_interval_secs = parse_env_number(ENV_SYNC_INTERVAL_SECS, &raw)?;
        }
        if let Some(raw) = normalize_text_option(lookup(ENV_BATCH_SIZE)) {
            self.batch_size = parse_env_number(ENV_BATCH_SIZE, &raw)?;
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.api_base_url = normalize_text_option(self.api_base_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.auth_token = normalize_text_option(self.auth_token.take());
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.api_base_url {
            if !is_http_url(url) {
                return Err(Error::InvalidInput(
                    "api_base_url must include http:// or https://".to_string(),
                ));
            }
        }
        for (field, value) in [
            ("sync_interval_secs", self.sync_interval_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("initial_backoff_ms", self.initial_backoff_ms),
        ] {
            if value == 0 {
                return Err(Error::InvalidInput(format!("{field} must be positive")));
            }
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be positive".to_string()));
        }
        if self.max_record_retries == 0 || self.transport_attempts == 0 {
            return Err(Error::InvalidInput(
                "retry counts must be positive".to_string(),
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(Error::InvalidInput(
                "max_backoff_ms must not be below initial_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn stale_syncing_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.stale_syncing_secs).unwrap_or(i64::MAX))
    }

    /// Transport retry policy derived from these settings
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.transport_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

fn parse_env_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| Error::InvalidInput(format!("{key} must be a positive integer, got '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let settings = SyncSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.sync_interval(), Duration::from_secs(300));
        assert_eq!(settings.batch_size, 50);

        let policy = settings.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn file_values_override_defaults() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("sync.json");
        std::fs::write(
            &path,
            r#"{ "api_base_url": "https://api.example.com/", "batch_size": 10 }"#,
        )
        .unwrap();

        let mut settings = SyncSettings::load_from_path(&path).unwrap();
        settings.normalize();
        assert_eq!(
            settings.api_base_url.as_deref(),
            Some("https://api.example.com")
        );
        assert_eq!(settings.batch_size, 10);
        assert_eq!(settings.max_record_retries, 5);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("sync.json");
        std::fs::write(&path, r#"{ "batch": 10 }"#).unwrap();

        assert!(SyncSettings::load_from_path(&path).is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempdir().unwrap();
        let settings = SyncSettings::load_from_path(&tmp.path().join("absent.json")).unwrap();
        assert_eq!(settings, SyncSettings::default());
    }

    #[test]
    fn env_overrides_win() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_API_URL, "http://localhost:3000"),
            (ENV_SYNC_INTERVAL_SECS, "60"),
            (ENV_BATCH_SIZE, "  "),
        ]);
        let mut settings = SyncSettings::default();
        settings
            .apply_env_overrides(|key| vars.get(key).map(ToString::to_string))
            .unwrap();

        assert_eq!(settings.api_base_url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(settings.sync_interval_secs, 60);
        assert_eq!(settings.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn invalid_env_number_is_an_error() {
        let mut settings = SyncSettings::default();
        let result =
            settings.apply_env_overrides(|key| (key == ENV_BATCH_SIZE).then(|| "many".to_string()));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn validate_rejects_non_http_url() {
        let settings = SyncSettings {
            api_base_url: Some("api.example.com".to_string()),
            ..SyncSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn debug_redacts_token() {
        let settings = SyncSettings {
            auth_token: Some("secret".to_string()),
            ..SyncSettings::default()
        };
        let debug = format!("{settings:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
