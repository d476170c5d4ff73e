//! Deployment models

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Privilege-elevation mechanism used on the target hosts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalateMethod {
    #[default]
    Sudo,
    Dzdo,
    Su,
}

impl EscalateMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalateMethod::Sudo => "sudo",
            EscalateMethod::Dzdo => "dzdo",
            EscalateMethod::Su => "su",
        }
    }

    /// Parse a submitted value, coercing anything unrecognised to `sudo`
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            warn!("Unknown escalation method {:?}, using sudo", value);
            EscalateMethod::Sudo
        })
    }
}

impl FromStr for EscalateMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sudo" => Ok(EscalateMethod::Sudo),
            "dzdo" => Ok(EscalateMethod::Dzdo),
            "su" => Ok(EscalateMethod::Su),
            _ => Err(format!("Invalid escalation method: {}", s)),
        }
    }
}

impl fmt::Display for EscalateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the installed agent links: to Tenable cloud or to an on-prem manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    #[default]
    Cloud,
    Manager,
}

impl DeployMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployMode::Cloud => "cloud",
            DeployMode::Manager => "manager",
        }
    }
}

impl FromStr for DeployMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cloud" => Ok(DeployMode::Cloud),
            "manager" => Ok(DeployMode::Manager),
            _ => Err(format!("mode must be 'cloud' or 'manager', got {:?}", s)),
        }
    }
}

impl fmt::Display for DeployMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
