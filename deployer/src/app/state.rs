//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::authn::ldap::{Authenticator, LdapAuthenticator};
use crate::authn::session::SessionKeys;
use crate::deploy::inventory::InventoryBuilder;
use crate::deploy::job::JobContext;
use crate::deploy::runner::{DeploymentRunner, RunnerOptions};
use crate::errors::DeployerError;
use crate::secrets::store::SecretStore;
use crate::server::state::ServerState;
use crate::storage::layout::StorageLayout;
use crate::storage::runs::RunRecorder;
use crate::storage::settings::Settings;

/// Main application state. Built once at startup and never mutated.
pub struct AppState {
    /// Key and predefined credentials
    pub store: Arc<SecretStore>,

    /// Everything a deployment needs
    pub jobs: JobContext,

    /// Directory-service login
    pub authenticator: Arc<dyn Authenticator>,

    /// Session token keys
    pub session_keys: Arc<SessionKeys>,

    /// Mark cookies `Secure`
    pub secure_cookie: bool,
}

impl AppState {
    /// Initialize application state
    pub async fn init(layout: &StorageLayout, settings: &Settings) -> Result<Self, DeployerError> {
        info!("Initializing application state...");

        layout.setup().await?;

        let store = Arc::new(SecretStore::load(&layout.key_file(), &layout.accounts_file()).await?);
        let recorder = Arc::new(RunRecorder::open(&layout.database_file()).await?);

        let jobs = JobContext {
            builder: InventoryBuilder::new(settings.playbook.inventory_dir.clone()),
            runner: DeploymentRunner::new(RunnerOptions::from(&settings.playbook)),
            recorder,
            tracker: TaskTracker::new(),
        };

        let ttl = Duration::from_secs(settings.session.ttl_secs);
        let session_keys = match settings.session_secret() {
            Some(secret) => SessionKeys::new(secret.as_bytes(), ttl),
            None => {
                warn!("No session secret configured, sessions will not survive a restart");
                SessionKeys::random(ttl)
            }
        };

        Ok(Self {
            store,
            jobs,
            authenticator: Arc::new(LdapAuthenticator::new(&settings.ldap)),
            session_keys: Arc::new(session_keys),
            secure_cookie: settings.session.secure_cookie,
        })
    }

    /// State handed to the HTTP handlers
    pub fn server_state(&self) -> ServerState {
        ServerState::new(
            self.store.clone(),
            self.jobs.clone(),
            self.authenticator.clone(),
            self.session_keys.clone(),
            self.secure_cookie,
        )
    }

    /// Stop accepting deployments and wait for running ones to be recorded
    pub async fn shutdown(&self) -> Result<(), DeployerError> {
        info!("Shutting down application state...");

        let tracker = &self.jobs.tracker;
        tracker.close();
        if !tracker.is_empty() {
            info!("Waiting for {} running deployment(s) to finish...", tracker.len());
        }
        tracker.wait().await;
        Ok(())
    }
}
