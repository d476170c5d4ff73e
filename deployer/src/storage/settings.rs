//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::DeployerError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Environment variable overriding the session signing secret
pub const SESSION_SECRET_ENV: &str = "NESSUS_DEPLOYER_SESSION_SECRET";

/// Deployer settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs to a rolling file under the instance directory
    #[serde(default)]
    pub log_to_file: bool,

    /// HTTP listener configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Directory service configuration
    #[serde(default)]
    pub ldap: LdapSettings,

    /// Login session configuration
    #[serde(default)]
    pub session: SessionSettings,

    /// Automation tool configuration
    #[serde(default)]
    pub playbook: PlaybookSettings,
}

impl Settings {
    /// Load settings from `file`, falling back to defaults when it is absent
    pub async fn load(file: &File) -> Result<Self, DeployerError> {
        if !file.exists().await {
            info!(
                "No settings file at {}, using defaults",
                file.path().display()
            );
            return Ok(Self::default());
        }

        file.read_json::<Settings>().await.map_err(|e| {
            DeployerError::StartupError(format!(
                "Unable to read settings file {}: {}",
                file.path().display(),
                e
            ))
        })
    }

    /// The session secret, with the environment taking precedence
    pub fn session_secret(&self) -> Option<String> {
        std::env::var(SESSION_SECRET_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| self.session.secret.clone().filter(|s| !s.is_empty()))
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8443
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// LDAP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapSettings {
    /// Directory URL; `ldaps://` keeps the bind on an encrypted channel
    #[serde(default = "default_ldap_url")]
    pub url: String,

    /// Domain appended to the username to form the bind principal
    #[serde(default = "default_ldap_domain")]
    pub domain: String,

    /// Connection timeout in seconds
    #[serde(default = "default_ldap_timeout")]
    pub timeout_secs: u64,
}

fn default_ldap_url() -> String {
    "ldaps://ldap.example.com:636".to_string()
}

fn default_ldap_domain() -> String {
    "example.com".to_string()
}

fn default_ldap_timeout() -> u64 {
    10
}

impl Default for LdapSettings {
    fn default() -> Self {
        Self {
            url: default_ldap_url(),
            domain: default_ldap_domain(),
            timeout_secs: default_ldap_timeout(),
        }
    }
}

/// Session cookie settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Signing secret; a random one is generated per process when unset
    #[serde(default)]
    pub secret: Option<String>,

    /// Session lifetime in seconds
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,

    /// Mark cookies `Secure` (serve behind TLS)
    #[serde(default)]
    pub secure_cookie: bool,
}

fn default_session_ttl() -> u64 {
    8 * 60 * 60
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            secret: None,
            ttl_secs: default_session_ttl(),
            secure_cookie: false,
        }
    }
}

/// Automation tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookSettings {
    /// Executable to launch
    #[serde(default = "default_program")]
    pub program: PathBuf,

    /// Arguments placed before `-i <inventory> <playbook>`
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Playbook path
    #[serde(default = "default_playbook")]
    pub playbook: PathBuf,

    /// Directory for ephemeral inventories; the system temp dir when unset
    #[serde(default)]
    pub inventory_dir: Option<PathBuf>,
}

fn default_program() -> PathBuf {
    PathBuf::from("ansible-playbook")
}

fn default_playbook() -> PathBuf {
    PathBuf::from("deploy_nessus_agent.yml")
}

impl Default for PlaybookSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            extra_args: Vec::new(),
            playbook: default_playbook(),
            inventory_dir: None,
        }
    }
}
