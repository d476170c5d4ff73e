//! Predefined credential store

use std::collections::BTreeMap;
use std::fmt;

use secrecy::SecretString;
use serde::Deserialize;
use tracing::info;

use crate::errors::DeployerError;
use crate::filesys::file::File;
use crate::models::deployment::EscalateMethod;
use crate::secrets::cipher::{EncryptedSecret, SecretKey};

/// A predefined credential as stored on disk, passwords still sealed
#[derive(Clone, Deserialize)]
pub struct StoredCredential {
    pub username: String,

    #[serde(default)]
    pub password: EncryptedSecret,

    #[serde(default)]
    pub sudo_password: EncryptedSecret,

    #[serde(default)]
    pub activation_key: String,

    #[serde(default)]
    pub escalate_method: Option<String>,
}

impl fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredential")
            .field("username", &self.username)
            .field("escalate_method", &self.escalate_method)
            .finish_non_exhaustive()
    }
}

/// A credential ready for use in one deployment
#[derive(Debug)]
pub struct Credential {
    pub username: String,
    pub password: SecretString,
    pub sudo_password: SecretString,
    pub activation_key: SecretString,
    pub escalate_method: Option<EscalateMethod>,
}

/// Holds the process key and the predefined credentials. Read-only once loaded.
#[derive(Debug)]
pub struct SecretStore {
    key: SecretKey,
    accounts: BTreeMap<String, StoredCredential>,
}

impl SecretStore {
    pub fn new(key: SecretKey, accounts: BTreeMap<String, StoredCredential>) -> Self {
        Self { key, accounts }
    }

    /// Load the key and the accounts file.
    ///
    /// The accounts file is created empty when absent; a missing key file or an
    /// unparseable accounts file refuses startup.
    pub async fn load(key_file: &File, accounts_file: &File) -> Result<Self, DeployerError> {
        let key = SecretKey::load(key_file).await?;

        if !accounts_file.exists().await {
            info!(
                "Creating empty predefined accounts file at {}",
                accounts_file.path().display()
            );
            accounts_file.write_string("{}").await?;
        }

        let accounts: BTreeMap<String, StoredCredential> =
            accounts_file.read_json().await.map_err(|e| {
                DeployerError::StartupError(format!(
                    "Unable to read predefined accounts file {}: {}",
                    accounts_file.path().display(),
                    e
                ))
            })?;

        info!("Loaded {} predefined account(s)", accounts.len());
        Ok(Self::new(key, accounts))
    }

    /// Names of the predefined credentials, sorted
    pub fn account_names(&self) -> Vec<&str> {
        self.accounts.keys().map(String::as_str).collect()
    }

    /// Look up a predefined credential by name
    pub fn resolve_credential(&self, name: &str) -> Result<&StoredCredential, DeployerError> {
        self.accounts
            .get(name)
            .ok_or_else(|| DeployerError::NotFound(format!("predefined account '{}'", name)))
    }

    /// Recover the plaintext of a stored secret
    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<SecretString, DeployerError> {
        self.key.decrypt(secret)
    }

    /// Resolve and decrypt a predefined credential
    pub fn unseal(&self, name: &str) -> Result<Credential, DeployerError> {
        let stored = self.resolve_credential(name)?;

        Ok(Credential {
            username: stored.username.clone(),
            password: self.decrypt(&stored.password)?,
            sudo_password: self.decrypt(&stored.sudo_password)?,
            activation_key: SecretString::from(stored.activation_key.clone()),
            escalate_method: stored
                .escalate_method
                .as_deref()
                .filter(|m| !m.trim().is_empty())
                .map(EscalateMethod::parse_lenient),
        })
    }
}
