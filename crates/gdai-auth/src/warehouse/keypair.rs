//! Key-pair JWT authentication
//!
//! Loads an RSA private key (PKCS#8, passphrase-encrypted PKCS#8, or PKCS#1 PEM)
//! and mints the short-lived RS256 JWT the warehouse accepts in place of a
//! password. The issuer embeds the SHA-256 fingerprint of the public key.

use std::fmt;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::RsaPrivateKey;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Lifetime of a minted JWT; the warehouse rejects anything over one hour
pub const JWT_LIFETIME_MINUTES: i64 = 59;

/// Key-pair errors
#[derive(Debug, Error)]
pub enum KeyPairError {
    /// The key file could not be read
    #[error("Failed to read private key {path}: {source}")]
    Io {
        /// Key path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The PEM could not be decoded (wrong format or wrong passphrase)
    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    /// JWT signing failed
    #[error("Failed to sign key-pair JWT: {0}")]
    Signing(String),
}

#[derive(Debug, Serialize)]
struct KeyPairClaims {
    iss: String,
    sub: String,
    iat: i64,
    exp: i64,
}

/// Signs key-pair JWTs with a loaded private key
pub struct KeyPairSigner {
    encoding_key: EncodingKey,
    fingerprint: String,
}

impl KeyPairSigner {
    /// Load and decode a private key file
    ///
    /// # Errors
    ///
    /// Returns [`KeyPairError::Io`] when the file cannot be read and
    /// [`KeyPairError::InvalidKey`] when it does not decode.
    pub fn load(path: &Path, passphrase: Option<&SecretString>) -> Result<Self, KeyPairError> {
        let pem = std::fs::read_to_string(path).map_err(|source| KeyPairError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_pem(&pem, passphrase)
    }

    /// Decode a PEM-encoded private key
    ///
    /// # Errors
    ///
    /// Returns [`KeyPairError::InvalidKey`] when the PEM is not an RSA private key
    /// or the passphrase does not decrypt an encrypted one. Unencrypted keys
    /// load whether or not a passphrase is given.
    pub fn from_pem(pem: &str, passphrase: Option<&SecretString>) -> Result<Self, KeyPairError> {
        // A passphrase does not imply an encrypted key; plain PEM is accepted as well
        let encrypted = passphrase.map(|passphrase| {
            RsaPrivateKey::from_pkcs8_encrypted_pem(pem, passphrase.expose_secret().as_bytes())
        });
        let private_key = match encrypted {
            Some(Ok(key)) => key,
            Some(Err(encrypted_error)) => decode_plain(pem)
                .map_err(|_| KeyPairError::InvalidKey(encrypted_error.to_string()))?,
            None => decode_plain(pem).map_err(KeyPairError::InvalidKey)?,
        };

        let public_der = private_key
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| KeyPairError::InvalidKey(e.to_string()))?;
        let fingerprint = format!(
            "SHA256:{}",
            STANDARD.encode(Sha256::digest(public_der.as_bytes()))
        );

        let private_der = private_key
            .to_pkcs1_der()
            .map_err(|e| KeyPairError::InvalidKey(e.to_string()))?;

        Ok(Self {
            encoding_key: EncodingKey::from_rsa_der(private_der.as_bytes()),
            fingerprint,
        })
    }

    /// Public key fingerprint (`SHA256:<base64>`)
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Mint a JWT for `username` on `account`
    ///
    /// # Errors
    ///
    /// Returns [`KeyPairError::Signing`] when the signature cannot be produced.
    pub fn mint(
        &self,
        account: &str,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<String, KeyPairError> {
        let qualified_user = format!("{}.{}", jwt_account(account), username.to_uppercase());
        let claims = KeyPairClaims {
            iss: format!("{qualified_user}.{}", self.fingerprint),
            sub: qualified_user,
            iat: now.timestamp(),
            exp: (now + Duration::minutes(JWT_LIFETIME_MINUTES)).timestamp(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| KeyPairError::Signing(e.to_string()))
    }
}

impl fmt::Debug for KeyPairSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPairSigner")
            .field("encoding_key", &"[REDACTED]")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Decode an unencrypted PKCS#8 or PKCS#1 PEM
fn decode_plain(pem: &str) -> Result<RsaPrivateKey, String> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| e.to_string())
}

/// Account part of the JWT subject: uppercased, region and cloud suffixes dropped
pub fn jwt_account(account: &str) -> String {
    account
        .split('.')
        .next()
        .unwrap_or(account)
        .to_uppercase()
}
