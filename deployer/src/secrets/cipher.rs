//! Symmetric encryption of stored credentials
//!
//! AES-256-GCM with a fresh random nonce per secret. Ciphertext text is the
//! URL-safe base64 of `nonce || ciphertext || tag`; the key file holds the
//! URL-safe base64 of the 32-byte key on a single line.

use std::fmt;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::errors::DeployerError;
use crate::filesys::file::File;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Ciphertext of a stored secret, as found in the accounts file
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedSecret(String);

impl EncryptedSecret {
    pub fn new(ciphertext: impl Into<String>) -> Self {
        Self(ciphertext.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedSecret({} bytes)", self.0.len())
    }
}

/// The process-wide symmetric key
pub struct SecretKey {
    cipher: Aes256Gcm,
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

impl SecretKey {
    /// Generate a new key, returned in its key-file encoding
    pub fn generate_encoded() -> String {
        let key = Aes256Gcm::generate_key(OsRng);
        URL_SAFE.encode(key.as_slice())
    }

    /// Parse a key from its key-file encoding
    pub fn from_encoded(encoded: &str) -> Result<Self, DeployerError> {
        let bytes = URL_SAFE
            .decode(encoded.trim())
            .map_err(|_| {
                DeployerError::StartupError("Secret key is not valid base64".to_string())
            })?;

        if bytes.len() != KEY_LEN {
            return Err(DeployerError::StartupError(format!(
                "Secret key must be {} bytes, found {}",
                KEY_LEN,
                bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&bytes).map_err(|_| {
            DeployerError::StartupError("Secret key has an invalid length".to_string())
        })?;

        Ok(Self { cipher })
    }

    /// Load the key file. A missing file is fatal.
    pub async fn load(key_file: &File) -> Result<Self, DeployerError> {
        if !key_file.exists().await {
            return Err(DeployerError::StartupError(format!(
                "Secret key file '{}' not found. Generate it first with --generate-key",
                key_file.path().display()
            )));
        }

        let encoded = key_file.read_string().await?;
        Self::from_encoded(&encoded)
    }

    /// Encrypt `plaintext` under this key
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, DeployerError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| DeployerError::Internal("Encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);

        Ok(EncryptedSecret::new(URL_SAFE.encode(sealed)))
    }

    /// Encrypt the first line read from `input`, without its line ending
    pub async fn encrypt_line<R>(&self, input: &mut R) -> Result<EncryptedSecret, DeployerError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line = String::new();
        input.read_line(&mut line).await?;
        self.encrypt(line.trim_end_matches(['\r', '\n']))
    }

    /// Decrypt a stored secret.
    ///
    /// An empty ciphertext is an empty secret. Anything malformed, tampered or
    /// sealed under another key is a `DecryptionError`.
    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<SecretString, DeployerError> {
        if secret.is_empty() {
            return Ok(SecretString::from(String::new()));
        }

        let sealed = URL_SAFE
            .decode(secret.as_str().trim())
            .map_err(|_| DeployerError::DecryptionError)?;

        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(DeployerError::DecryptionError);
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| DeployerError::DecryptionError)?;

        String::from_utf8(plaintext)
            .map(SecretString::from)
            .map_err(|_| DeployerError::DecryptionError)
    }
}
