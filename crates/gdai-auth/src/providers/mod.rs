//! Credential Providers
//!
//! Sign-in strategies behind one [`CredentialProvider`] interface, plus the
//! [`ProviderRegistry`] that enumerates which strategies are active. The
//! registry is built once at startup from [`AuthSettings`] and never mutated.

pub mod entra;
pub mod key_pair;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::config::{AuthSettings, ConfigError};
use crate::permissions::PermissionResolver;
use crate::types::{Identity, PermissionTier};

pub use entra::EntraProvider;
pub use key_pair::KeyPairProvider;

/// Sign-in errors surfaced to callers
#[derive(Debug, Error)]
pub enum AuthError {
    /// Credentials were rejected; not a system fault
    #[error("Sign-in rejected: {0}")]
    Rejected(String),

    /// The request kind does not match the provider
    #[error("Provider '{provider}' does not accept this kind of credentials")]
    UnsupportedCredentials {
        /// Provider id
        provider: String,
    },

    /// No active provider has this id
    #[error("Provider '{0}' is not configured")]
    UnknownProvider(String),
}

/// Account data handed over by the identity provider callback
#[derive(Clone)]
pub struct OAuthAccount {
    /// Subject claim
    pub subject: String,
    /// Name claim
    pub name: Option<String>,
    /// Email claim
    pub email: Option<String>,
    /// Issued access token
    pub access_token: String,
    /// Expiry of the access token, seconds since the epoch
    pub expires_at: Option<i64>,
    /// Issued refresh token
    pub refresh_token: Option<String>,
}

impl fmt::Debug for OAuthAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthAccount")
            .field("subject", &self.subject)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Input to a sign-in attempt
#[derive(Debug, Clone)]
pub enum SignInRequest {
    /// Identity provider callback after a completed authorization
    OAuthCallback(OAuthAccount),
    /// Direct credentials (development key-pair path)
    Credentials {
        /// Warehouse user name
        username: String,
    },
}

/// Credential material produced by a sign-in
#[derive(Clone)]
pub enum SignInCredential {
    /// Tokens issued by the identity provider
    OAuth {
        /// Access token
        access_token: String,
        /// Absolute expiry
        expires_at: Option<DateTime<Utc>>,
        /// Refresh token
        refresh_token: Option<String>,
    },
    /// Development key-pair sign-in; no provider tokens exist
    DevKeyPair,
}

impl fmt::Debug for SignInCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OAuth { expires_at, .. } => f
                .debug_struct("OAuth")
                .field("access_token", &"[REDACTED]")
                .field("expires_at", expires_at)
                .field("refresh_token", &"[REDACTED]")
                .finish(),
            Self::DevKeyPair => f.write_str("DevKeyPair"),
        }
    }
}

/// Result of a successful sign-in
#[derive(Debug, Clone)]
pub struct SignIn {
    /// Authenticated identity
    pub identity: Identity,
    /// Tier already known to the provider. `None` means the tier must be
    /// resolved from the issued access token.
    pub initial_tier: Option<PermissionTier>,
    /// Credential material
    pub credential: SignInCredential,
}

/// Sign-in strategy
#[async_trait]
pub trait CredentialProvider: Send + Sync + fmt::Debug {
    /// Stable provider id used in sign-in routes
    fn id(&self) -> &str;

    /// Human readable provider name
    fn name(&self) -> &str;

    /// Authenticate a sign-in request
    async fn authenticate(&self, request: SignInRequest) -> Result<SignIn, AuthError>;
}

/// Fixed set of active providers
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn CredentialProvider>>,
}

impl ProviderRegistry {
    /// Create a registry from explicit providers
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoProviders`] when `providers` is empty.
    pub fn new(providers: Vec<Arc<dyn CredentialProvider>>) -> Result<Self, ConfigError> {
        if providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }
        Ok(Self { providers })
    }

    /// Build the registry enumerated by `settings`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoProviders`] when neither provider is enabled.
    pub fn from_settings(
        settings: &AuthSettings,
        resolver: &PermissionResolver,
    ) -> Result<Self, ConfigError> {
        let mut providers: Vec<Arc<dyn CredentialProvider>> = Vec::new();

        if let Some(dev) = &settings.dev_key_pair {
            providers.push(Arc::new(KeyPairProvider::new(dev.clone(), resolver.clone())));
        }
        if settings.entra.is_some() {
            providers.push(Arc::new(EntraProvider::new(settings.authorization_scope())));
        }

        let registry = Self::new(providers)?;
        info!(providers = ?registry.ids(), "Sign-in providers registered");
        Ok(registry)
    }

    /// Look up an active provider
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownProvider`] when no active provider has `id`.
    pub fn get(&self, id: &str) -> Result<&Arc<dyn CredentialProvider>, AuthError> {
        self.providers
            .iter()
            .find(|provider| provider.id() == id)
            .ok_or_else(|| AuthError::UnknownProvider(id.to_string()))
    }

    /// Ids of the active providers, in registration order
    pub fn ids(&self) -> Vec<&str> {
        self.providers.iter().map(|provider| provider.id()).collect()
    }
}
