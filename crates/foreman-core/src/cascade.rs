//! Cascades: blast-radius groupings of repair sessions.
//!
//! A cascade records one blast-radius analysis of a core-file change and
//! groups the repair sessions dispatched from it. The grouping is weak:
//! deleting a session leaves the cascade, deleting a cascade nulls the
//! pointer in its sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{CascadeId, SessionId};

/// Lifecycle status of a cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStatus {
    /// The Auditor oracle is decomposing the blast radius.
    Analyzing,
    /// At least one repair job was dispatched.
    Dispatched,
    /// All repair sessions reached a terminal state successfully.
    Completed,
    /// No repair job could be dispatched, or analysis was discarded.
    Failed,
}

impl std::fmt::Display for CascadeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Analyzing => "analyzing",
            Self::Dispatched => "dispatched",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for CascadeStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "analyzing" => Ok(Self::Analyzing),
            "dispatched" => Ok(Self::Dispatched),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(crate::error::Error::InvalidInput(format!(
                "unknown cascade status '{other}'"
            ))),
        }
    }
}

/// Dispatch telemetry persisted against the cascade row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchTelemetry {
    /// Wall-clock time spent dispatching all jobs.
    pub dispatch_latency_ms: u64,
    /// Jobs that hit a lock conflict.
    pub conflict_count: usize,
    /// Jobs whose agent was started.
    pub dispatched_count: usize,
    /// Jobs that failed for any reason (conflicts included).
    pub failed_count: usize,
}

/// A cascade row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cascade {
    /// Unique identifier.
    pub id: CascadeId,
    /// The session whose push triggered the analysis, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_session_id: Option<SessionId>,
    /// Core files whose change triggered the cascade.
    pub core_files_changed: Vec<String>,
    /// Downstream files the oracle judged at risk.
    pub downstream_files: Vec<String>,
    /// Number of repair jobs the analysis produced (after engine caps).
    pub repair_job_count: usize,
    /// Oracle summary of the blast radius.
    pub summary: String,
    /// Lifecycle status.
    pub status: CascadeStatus,
    /// Telemetry from the dispatch pass, when one ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<DispatchTelemetry>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Cascade {
    /// Creates a cascade in the `analyzing` state.
    #[must_use]
    pub fn new(trigger_session_id: Option<SessionId>, core_files_changed: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: CascadeId::generate(),
            trigger_session_id,
            core_files_changed,
            downstream_files: Vec::new(),
            repair_job_count: 0,
            summary: String::new(),
            status: CascadeStatus::Analyzing,
            telemetry: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cascades_start_analyzing() {
        let cascade = Cascade::new(None, vec!["core/schema.rs".into()]);
        assert_eq!(cascade.status, CascadeStatus::Analyzing);
        assert!(cascade.telemetry.is_none());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            CascadeStatus::Analyzing,
            CascadeStatus::Dispatched,
            CascadeStatus::Completed,
            CascadeStatus::Failed,
        ] {
            let parsed: CascadeStatus = status.to_string().parse().expect("parse");
            assert_eq!(parsed, status);
        }
    }
}
