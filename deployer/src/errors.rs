//! Error types for the deployer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use thiserror::Error;
use tracing::{error, warn};

/// Main error type for the deployer
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("{0}")]
    ValidationError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Startup error: {0}")]
    StartupError(String),

    /// Never carries the ciphertext or the key
    #[error("Failed to decrypt stored secret")]
    DecryptionError,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to launch playbook: {0}")]
    ProcessLaunchError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for DeployerError {
    fn into_response(self) -> Response {
        match self {
            DeployerError::ValidationError(msg) => {
                (StatusCode::BAD_REQUEST, format!("Error: {msg}")).into_response()
            }
            DeployerError::NotFound(what) => {
                (StatusCode::NOT_FOUND, format!("Error: {what} not found")).into_response()
            }
            DeployerError::AuthError(e) => {
                warn!("Rejected request: {}", e);
                Redirect::to("/login").into_response()
            }
            DeployerError::DecryptionError => {
                error!("Stored credential could not be decrypted");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error: failed to decrypt stored credential.",
                )
                    .into_response()
            }
            DeployerError::ProcessLaunchError(e) => {
                error!("Playbook launch failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error: failed to launch the deployment playbook.",
                )
                    .into_response()
            }
            e => {
                error!("Request failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}
