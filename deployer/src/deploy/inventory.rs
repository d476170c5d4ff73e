//! Ephemeral Ansible inventory generation
//!
//! Every operator-supplied value is single-quoted before it lands in the INI
//! text, so a later shell expansion of the variable yields the value verbatim.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use tempfile::TempPath;
use tracing::debug;

use crate::deploy::request::DeploymentRequest;
use crate::errors::DeployerError;
use crate::logs::redact_key_values;

/// Inventory group the playbook targets
pub const HOST_GROUP: &str = "agents";

/// Quote `value` for POSIX shells: wrap in single quotes and rewrite each
/// embedded `'` as `'\''`.
pub fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Render the inventory text for `request`
pub fn render_inventory(request: &DeploymentRequest) -> Result<String, DeployerError> {
    let credential = &request.credential;

    let vars: [(&str, String); 10] = [
        ("ansible_user", quoted("username", &credential.username)?),
        (
            "ansible_password",
            quoted("password", credential.password.expose_secret())?,
        ),
        (
            "ansible_become_password",
            quoted("sudo password", credential.sudo_password.expose_secret())?,
        ),
        (
            "ansible_become_method",
            request.escalate_method.as_str().to_string(),
        ),
        (
            "activation_key",
            quoted("activation key", credential.activation_key.expose_secret())?,
        ),
        ("groups", quoted("groups", &request.groups)?),
        ("mode", quoted("mode", request.mode.as_str())?),
        ("manager_host", quoted("manager host", &request.manager_host)?),
        ("manager_port", request.manager_port.to_string()),
        ("remove_rapid7", request.remove_legacy_agent.to_string()),
    ];

    let mut lines = Vec::with_capacity(request.hosts.len() + vars.len() + 3);
    lines.push(format!("[{}]", HOST_GROUP));
    for host in &request.hosts {
        lines.push(quoted("host", host)?);
    }
    lines.push(String::new());
    lines.push(format!("[{}:vars]", HOST_GROUP));
    for (key, value) in vars {
        lines.push(format!("{key}={value}"));
    }

    let mut content = lines.join("\n");
    content.push('\n');
    Ok(content)
}

/// Line breaks would start a new INI entry, so they are refused outright
fn quoted(field: &str, value: &str) -> Result<String, DeployerError> {
    if value.contains(['\n', '\r', '\0']) {
        return Err(DeployerError::ValidationError(format!(
            "{field} must not contain line breaks."
        )));
    }
    Ok(shell_quote(value))
}

/// A rendered inventory on disk, readable only by this process's user.
///
/// Dropping the payload removes the file; `close` removes it and reports failure.
#[derive(Debug)]
pub struct InventoryPayload {
    path: TempPath,
}

impl InventoryPayload {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file
    pub fn close(self) -> io::Result<()> {
        self.path.close()
    }
}

/// Writes inventories into a private temporary file
#[derive(Debug, Clone, Default)]
pub struct InventoryBuilder {
    dir: Option<PathBuf>,
}

impl InventoryBuilder {
    /// Inventories go to `dir`, or the system temp dir when `None`
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn build(&self, request: &DeploymentRequest) -> Result<InventoryPayload, DeployerError> {
        request.validate()?;
        let content = render_inventory(request)?;

        let dir = self.dir.clone().unwrap_or_else(std::env::temp_dir);
        let mut builder = tempfile::Builder::new();
        builder.prefix("inventory-").suffix(".ini");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(std::fs::Permissions::from_mode(0o600));
        }

        let mut file = builder.tempfile_in(&dir)?;
        file.write_all(content.as_bytes())?;
        file.as_file().sync_all()?;
        let path = file.into_temp_path();

        debug!(
            "Wrote inventory {} for {} host(s):\n{}",
            path.display(),
            request.hosts.len(),
            redact_key_values(&content)
        );

        Ok(InventoryPayload { path })
    }
}
