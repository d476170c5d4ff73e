//! Server state

use std::sync::Arc;

use crate::authn::ldap::Authenticator;
use crate::authn::session::SessionKeys;
use crate::deploy::job::JobContext;
use crate::secrets::store::SecretStore;
use crate::storage::runs::RunRecorder;

/// Server state shared across handlers
pub struct ServerState {
    pub store: Arc<SecretStore>,
    pub jobs: JobContext,
    pub recorder: Arc<RunRecorder>,
    pub authenticator: Arc<dyn Authenticator>,
    pub session_keys: Arc<SessionKeys>,
    pub secure_cookie: bool,
}

impl ServerState {
    pub fn new(
        store: Arc<SecretStore>,
        jobs: JobContext,
        authenticator: Arc<dyn Authenticator>,
        session_keys: Arc<SessionKeys>,
        secure_cookie: bool,
    ) -> Self {
        Self {
            store,
            recorder: jobs.recorder.clone(),
            jobs,
            authenticator,
            session_keys,
            secure_cookie,
        }
    }
}
