//! Login session tokens
//!
//! A session is an HS256 JWT carried in an HttpOnly cookie. Expiry is enforced
//! by the token itself, so no server-side session table exists.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::errors::DeployerError;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "deployer_session";

/// Session token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (the directory username)
    pub sub: String,

    /// Issued at timestamp
    pub iat: i64,

    /// Expiration timestamp
    pub exp: i64,
}

impl SessionClaims {
    pub fn username(&self) -> &str {
        &self.sub
    }
}

/// Signs and verifies session tokens
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SessionKeys {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    /// Keys from a secret only this process knows
    pub fn random(ttl: Duration) -> Self {
        let mut secret = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret);
        Self::new(&secret, ttl)
    }

    /// Issue a token for `username`
    pub fn issue(&self, username: &str) -> Result<String, DeployerError> {
        let now = Utc::now().timestamp();
        let exp = i64::try_from(self.ttl.as_secs())
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| {
                DeployerError::ConfigError(format!(
                    "Session lifetime of {}s is out of range",
                    self.ttl.as_secs()
                ))
            })?;
        let claims = SessionClaims {
            sub: username.to_string(),
            iat: now,
            exp,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| DeployerError::Internal(format!("Failed to sign session: {}", e)))
    }

    /// Claims of a valid, unexpired token
    pub fn verify(&self, token: &str) -> Option<SessionClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        decode::<SessionClaims>(token, &self.decoding, &validation)
            .ok()
            .map(|data| data.claims)
            .filter(|claims| !claims.sub.is_empty())
    }
}
