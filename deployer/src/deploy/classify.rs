//! Best-effort per-host outcome scraping from playbook output.
//!
//! This is text matching, not a protocol: a line that matches nothing leaves
//! the summary untouched. Structured JSON host results are honoured when the
//! playbook emits them.

use serde_json::Value;

use crate::models::run::{HostResult, HostResults, HostStatus};

/// Substrings naming the legacy Rapid7 agent
const LEGACY_AGENT_MARKERS: [&str; 2] = ["rapid7", "ir_agent"];

/// Substring naming the new agent
const NEW_AGENT_MARKER: &str = "nessus";

/// Context words that, alongside the new agent's name, indicate it was installed
const INSTALL_CONTEXTS: [&str; 3] = ["install", "link", "changed"];

const FAILURE_KEYWORDS: [&str; 3] = ["failed", "fatal", "unreachable"];

const SUCCESS_KEYWORD: &str = "success";

/// A partial change to one host's result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostUpdate {
    pub host: String,
    pub status: Option<HostStatus>,
    pub removed_legacy_agent: Option<bool>,
    pub installed_agent: Option<bool>,
    pub details: Option<String>,
}

impl HostUpdate {
    fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..Default::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.removed_legacy_agent.is_none()
            && self.installed_agent.is_none()
            && self.details.is_none()
    }
}

/// Classify one output line against the known hosts
pub fn classify(line: &str, known_hosts: &[String]) -> Vec<HostUpdate> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    if let Some(update) = classify_structured(trimmed) {
        return vec![update];
    }

    let lower = trimmed.to_lowercase();
    let recap = parse_recap(&lower);

    known_hosts
        .iter()
        .filter(|host| mentions_host(&lower, &host.to_lowercase()))
        .map(|host| {
            let mut update = HostUpdate::new(host);

            let failed = match recap {
                Some(recap_failed) => recap_failed,
                None => FAILURE_KEYWORDS.iter().any(|k| lower.contains(k)),
            };

            if failed {
                update.status = Some(HostStatus::Failed);
            } else if recap.is_some() || lower.contains(SUCCESS_KEYWORD) {
                update.status = Some(HostStatus::Success);
            }

            if !failed {
                if LEGACY_AGENT_MARKERS.iter().any(|m| lower.contains(m)) {
                    update.removed_legacy_agent = Some(true);
                }
                if lower.contains(NEW_AGENT_MARKER)
                    && INSTALL_CONTEXTS.iter().any(|c| lower.contains(c))
                {
                    update.installed_agent = Some(true);
                }
            }

            if update.status.is_some() {
                update.details = Some(trimmed.to_string());
            }
            update
        })
        .filter(|update| !update.is_empty())
        .collect()
}

/// Whether `host` appears in `line` as a whole name, so `h1` does not match
/// `h10` or `h1.example.com`
fn mentions_host(line: &str, host: &str) -> bool {
    if host.is_empty() {
        return false;
    }

    let is_name_char = |c: char| c.is_alphanumeric() || c == '.' || c == '-';
    line.match_indices(host).any(|(start, _)| {
        let before = line[..start].chars().next_back();
        let after = line[start + host.len()..].chars().next();
        !before.is_some_and(is_name_char) && !after.is_some_and(is_name_char)
    })
}

/// `{"host": "...", "status": "...", ...}` emitted by a callback or debug task
fn classify_structured(line: &str) -> Option<HostUpdate> {
    if !line.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(line).ok()?;
    let object = value.as_object()?;
    let host = object.get("host")?.as_str()?;

    let flag = |keys: &[&str]| keys.iter().find_map(|k| object.get(*k).and_then(Value::as_bool));

    let mut update = HostUpdate::new(host);
    update.status = object
        .get("status")
        .and_then(Value::as_str)
        .map(|s| match s.to_lowercase().as_str() {
            "success" | "ok" | "changed" => HostStatus::Success,
            "failed" | "fatal" | "unreachable" => HostStatus::Failed,
            "pending" => HostStatus::Pending,
            _ => HostStatus::Unknown,
        });
    update.removed_legacy_agent = flag(&["removed_legacy_agent", "removed_rapid7"]);
    update.installed_agent = flag(&["installed_agent", "installed_nessus"]);
    update.details = object
        .get("details")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(update)
}

/// For a PLAY RECAP line, whether it reports a failure
fn parse_recap(lower: &str) -> Option<bool> {
    if !(lower.contains("ok=") && lower.contains("failed=")) {
        return None;
    }

    let count = |key: &str| -> u64 {
        lower
            .split_whitespace()
            .find_map(|token| token.strip_prefix(key))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    };

    Some(count("failed=") > 0 || count("unreachable=") > 0)
}

/// Running per-host summary for one deployment
#[derive(Debug, Clone, Default)]
pub struct HostSummary {
    hosts: Vec<String>,
    results: HostResults,
}

impl HostSummary {
    /// Every host starts `pending`
    pub fn new(hosts: &[String]) -> Self {
        let results = hosts
            .iter()
            .map(|h| (h.clone(), HostResult::default()))
            .collect();
        Self {
            hosts: hosts.to_vec(),
            results,
        }
    }

    /// Classify `line` and fold the result in
    pub fn observe(&mut self, line: &str) {
        for update in classify(line, &self.hosts) {
            self.apply(update);
        }
    }

    /// Fold one update in. A failed host never goes back to success.
    pub fn apply(&mut self, update: HostUpdate) {
        let result = self.results.entry(update.host).or_default();

        let keep_failure =
            result.status == HostStatus::Failed && update.status == Some(HostStatus::Success);
        if !keep_failure {
            if let Some(status) = update.status {
                result.status = status;
            }
            if let Some(details) = update.details {
                result.details = details;
            }
        }
        if let Some(removed) = update.removed_legacy_agent {
            result.removed_legacy_agent |= removed;
        }
        if let Some(installed) = update.installed_agent {
            result.installed_agent |= installed;
        }
    }

    /// Close the summary: hosts never classified become `unknown`
    pub fn finish(mut self) -> HostResults {
        for result in self.results.values_mut() {
            if result.status == HostStatus::Pending {
                result.status = HostStatus::Unknown;
            }
        }
        self.results
    }
}
