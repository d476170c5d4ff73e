//! Run history models

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one host within a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    #[default]
    Pending,
    Success,
    Failed,
    Unknown,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Pending => "pending",
            HostStatus::Success => "success",
            HostStatus::Failed => "failed",
            HostStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-host summary scraped from the playbook output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResult {
    /// The legacy Rapid7 agent was removed
    #[serde(default)]
    pub removed_legacy_agent: bool,

    /// The Nessus agent was installed
    #[serde(default)]
    pub installed_agent: bool,

    #[serde(default)]
    pub status: HostStatus,

    /// The output line that last changed this host's status
    #[serde(default)]
    pub details: String,
}

/// Host results keyed by hostname
pub type HostResults = BTreeMap<String, HostResult>;

/// One completed deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,

    /// User who started the run
    pub initiator: String,

    pub timestamp: DateTime<Utc>,

    /// Combined playbook output
    pub raw_log: String,

    pub host_results: HostResults,

    /// Playbook exit code
    pub exit_code: Option<i32>,
}

impl RunRecord {
    /// Number of hosts in each terminal state: (success, failed, other)
    pub fn tally(&self) -> (usize, usize, usize) {
        self.host_results
            .values()
            .fold((0, 0, 0), |(ok, failed, other), result| match result.status {
                HostStatus::Success => (ok + 1, failed, other),
                HostStatus::Failed => (ok, failed + 1, other),
                _ => (ok, failed, other + 1),
            })
    }
}
