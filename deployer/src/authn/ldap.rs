//! Directory-service login

use std::time::Duration;

use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings};
use tracing::{debug, warn};

use crate::storage::settings::LdapSettings;

/// Verifies a username/password pair
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `true` only when the credentials are accepted. Every failure mode
    /// (bad password, network, TLS) is `false`.
    async fn authenticate(&self, username: &str, password: &str) -> bool;
}

/// Simple bind against LDAP as `username@domain`
#[derive(Debug, Clone)]
pub struct LdapAuthenticator {
    url: String,
    domain: String,
    timeout: Duration,
}

impl LdapAuthenticator {
    pub fn new(settings: &LdapSettings) -> Self {
        Self {
            url: settings.url.clone(),
            domain: settings.domain.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    /// Bind principal for `username`
    pub fn principal(&self, username: &str) -> String {
        format!("{}@{}", username, self.domain)
    }

    async fn bind(&self, principal: &str, password: &str) -> Result<(), ldap3::LdapError> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.url).await?;
        ldap3::drive!(conn);

        ldap.with_timeout(self.timeout)
            .simple_bind(principal, password)
            .await?
            .success()?;

        if let Err(e) = ldap.unbind().await {
            debug!("LDAP unbind failed: {}", e);
        }
        Ok(())
    }
}

#[async_trait]
impl Authenticator for LdapAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> bool {
        // An empty password makes a simple bind anonymous, which would succeed
        if username.trim().is_empty() || password.is_empty() {
            return false;
        }

        let principal = self.principal(username.trim());
        match self.bind(&principal, password).await {
            Ok(()) => {
                debug!("LDAP bind succeeded for {}", principal);
                true
            }
            Err(e) => {
                warn!("LDAP auth failed for {}: {}", principal, e);
                false
            }
        }
    }
}
