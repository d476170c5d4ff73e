//! Deployment requests built from the submitted form

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::errors::DeployerError;
use crate::models::deployment::{DeployMode, EscalateMethod};
use crate::secrets::store::{Credential, SecretStore};
use crate::utils::is_truthy;

/// Manager port used when the form leaves it blank
pub const DEFAULT_MANAGER_PORT: u16 = 8834;

/// Raw fields of the deployment form
#[derive(Default, Deserialize)]
#[serde(default)]
pub struct DeployForm {
    pub predefined_account: String,
    pub username: String,
    pub password: String,
    pub sudo_password: String,
    pub activation_key: String,
    pub hosts: String,
    pub groups: String,
    pub mode: String,
    pub manager_host: String,
    pub manager_port: String,
    pub escalate_method: String,
    pub remove_rapid7: Option<String>,
}

impl fmt::Debug for DeployForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployForm")
            .field("predefined_account", &self.predefined_account)
            .field("username", &self.username)
            .field("hosts", &self.hosts)
            .field("groups", &self.groups)
            .field("mode", &self.mode)
            .field("manager_host", &self.manager_host)
            .field("manager_port", &self.manager_port)
            .field("escalate_method", &self.escalate_method)
            .field("remove_rapid7", &self.remove_rapid7)
            .finish_non_exhaustive()
    }
}

/// A validated request to run the playbook against a set of hosts
#[derive(Debug)]
pub struct DeploymentRequest {
    /// User who submitted the request
    pub initiator: String,

    /// Target hosts in submission order
    pub hosts: Vec<String>,

    /// Agent groups to join
    pub groups: String,

    pub mode: DeployMode,

    pub manager_host: String,

    pub manager_port: u16,

    pub escalate_method: EscalateMethod,

    /// Remove the Rapid7 agent before installing
    pub remove_legacy_agent: bool,

    pub credential: Credential,
}

impl DeploymentRequest {
    /// Build a request from the form, decrypting a predefined credential if one
    /// was selected, and validate it.
    pub fn from_form(
        initiator: &str,
        form: DeployForm,
        store: &SecretStore,
    ) -> Result<Self, DeployerError> {
        let account = form.predefined_account.trim();
        let credential = if account.is_empty() {
            Credential {
                username: form.username.trim().to_string(),
                password: SecretString::from(form.password.trim().to_string()),
                sudo_password: SecretString::from(form.sudo_password.trim().to_string()),
                activation_key: SecretString::from(form.activation_key.trim().to_string()),
                escalate_method: None,
            }
        } else {
            store.unseal(account)?
        };

        validate_credential(&credential)?;

        let hosts = parse_hosts(&form.hosts);

        let mode = if form.mode.trim().is_empty() {
            DeployMode::default()
        } else {
            form.mode
                .parse::<DeployMode>()
                .map_err(DeployerError::ValidationError)?
        };

        let manager_port = parse_port(&form.manager_port)?;

        let escalate_method = if !form.escalate_method.trim().is_empty() {
            EscalateMethod::parse_lenient(&form.escalate_method)
        } else {
            credential.escalate_method.unwrap_or_default()
        };

        let request = Self {
            initiator: initiator.to_string(),
            hosts,
            groups: form.groups.trim().to_string(),
            mode,
            manager_host: form.manager_host.trim().to_string(),
            manager_port,
            escalate_method,
            remove_legacy_agent: form.remove_rapid7.as_deref().is_some_and(is_truthy),
            credential,
        };

        request.validate()?;
        Ok(request)
    }

    /// Reject requests missing a required field
    pub fn validate(&self) -> Result<(), DeployerError> {
        validate_credential(&self.credential)?;

        if self.hosts.is_empty() {
            return Err(DeployerError::ValidationError(
                "at least one host is required.".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_credential(credential: &Credential) -> Result<(), DeployerError> {
    if credential.username.is_empty()
        || credential.password.expose_secret().is_empty()
        || credential.activation_key.expose_secret().is_empty()
    {
        return Err(DeployerError::ValidationError(
            "username, password, and activation key are required.".to_string(),
        ));
    }
    Ok(())
}

/// Split the newline-separated host list, dropping blank lines
pub fn parse_hosts(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_port(raw: &str) -> Result<u16, DeployerError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(DEFAULT_MANAGER_PORT);
    }
    raw.parse::<u16>()
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| {
            DeployerError::ValidationError(format!(
                "manager_port must be a TCP port, got {:?}",
                raw
            ))
        })
}
