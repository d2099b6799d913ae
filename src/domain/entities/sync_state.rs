use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
    Success,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
            SyncStatus::Success => "success",
        }
    }

    /// Idle → Syncing → (Success | Error) → Idle
    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        matches!(
            (self, next),
            (SyncStatus::Idle, SyncStatus::Syncing)
                | (SyncStatus::Syncing, SyncStatus::Success)
                | (SyncStatus::Syncing, SyncStatus::Error)
                | (SyncStatus::Success, SyncStatus::Idle)
                | (SyncStatus::Error, SyncStatus::Idle)
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide sync indicator. Only the orchestrator writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub pending_changes_count: u64,
    pub failed_changes_count: u64,
    pub last_error: Option<String>,
}

impl SyncState {
    /// Startup state: idle, with the persisted checkpoint restored.
    pub fn restored(last_sync_time: Option<DateTime<Utc>>) -> Self {
        Self {
            last_sync_time,
            ..Self::default()
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.status == SyncStatus::Syncing
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            status: SyncStatus::Idle,
            last_sync_time: None,
            pending_changes_count: 0,
            failed_changes_count: 0,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_documented_transitions_are_allowed() {
        assert!(SyncStatus::Idle.can_transition_to(SyncStatus::Syncing));
        assert!(SyncStatus::Syncing.can_transition_to(SyncStatus::Error));
        assert!(SyncStatus::Error.can_transition_to(SyncStatus::Idle));
        assert!(!SyncStatus::Syncing.can_transition_to(SyncStatus::Syncing));
        assert!(!SyncStatus::Idle.can_transition_to(SyncStatus::Success));
        assert!(!SyncStatus::Success.can_transition_to(SyncStatus::Syncing));
    }
}
