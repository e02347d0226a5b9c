//! Per-record synchronization state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a local record stands relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local changes not yet sent
    Pending,
    /// Captured in an outbox snapshot, awaiting the server's outcome
    Syncing,
    /// Accepted by the server
    Synced,
    /// Diverged from the server; needs resolution
    Conflict,
    /// Rejected by the server
    Error,
}

impl SyncStatus {
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Syncing,
        Self::Synced,
        Self::Conflict,
        Self::Error,
    ];

    /// Index value stored in the `sync_status` column
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
            Self::Error => "error",
        }
    }

    /// Whether the server has not yet acknowledged the local state
    pub const fn is_unsynced(self) -> bool {
        !matches!(self, Self::Synced)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "conflict" => Ok(Self::Conflict),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown sync status '{other}'")),
        }
    }
}

/// Retry bookkeeping carried by every syncable record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    /// Failed server attempts since the last success or manual retry
    #[serde(default)]
    pub attempts: u32,
    /// Last error reported by the server
    #[serde(default)]
    pub last_error: Option<String>,
    /// When the record was captured into an outbox snapshot
    #[serde(default)]
    pub syncing_since: Option<DateTime<Utc>>,
    /// Excluded from automatic retry until a manual retry
    #[serde(default)]
    pub retry_exhausted: bool,
}

impl SyncMeta {
    /// Whether a record in `status` may be picked up by the next outbox.
    ///
    /// `syncing` records only qualify once their snapshot is older than
    /// `stale_before`, which recovers records stranded by a crash.
    pub fn outbox_eligible(&self, status: SyncStatus, stale_before: DateTime<Utc>) -> bool {
        match status {
            SyncStatus::Pending => true,
            SyncStatus::Error => !self.retry_exhausted,
            SyncStatus::Syncing => self
                .syncing_since
                .map_or(true, |since| since <= stale_before),
            SyncStatus::Synced | SyncStatus::Conflict => false,
        }
    }

    /// Record a server-side failure; returns whether retries are now exhausted.
    pub fn record_failure(
        &mut self,
        error: Option<String>,
        max_attempts: u32,
        permanent: bool,
    ) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = error;
        self.syncing_since = None;
        self.retry_exhausted = permanent || self.attempts >= max_attempts;
        self.retry_exhausted
    }

    /// Clear all failure state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_parses_index_values() {
        for status in SyncStatus::ALL {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("done".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn stale_syncing_records_become_eligible() {
        let now = Utc::now();
        let meta = SyncMeta {
            syncing_since: Some(now - Duration::minutes(30)),
            ..SyncMeta::default()
        };
        assert!(meta.outbox_eligible(SyncStatus::Syncing, now - Duration::minutes(10)));
        assert!(!meta.outbox_eligible(SyncStatus::Syncing, now - Duration::minutes(40)));
    }

    #[test]
    fn exhausted_errors_are_not_eligible() {
        let mut meta = SyncMeta::default();
        assert!(!meta.record_failure(Some("boom".into()), 2, false));
        assert!(meta.outbox_eligible(SyncStatus::Error, Utc::now()));
        assert!(meta.record_failure(Some("boom".into()), 2, false));
        assert!(!meta.outbox_eligible(SyncStatus::Error, Utc::now()));
    }

    #[test]
    fn permanent_failures_exhaust_immediately() {
        let mut meta = SyncMeta::default();
        assert!(meta.record_failure(Some("bad plate".into()), 5, true));
        assert_eq!(meta.attempts, 1);
    }
}
