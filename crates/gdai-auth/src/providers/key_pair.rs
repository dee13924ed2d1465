//! Development key-pair sign-in
//!
//! Accepts a bare warehouse user name and proves it by opening a key-pair
//! authenticated warehouse connection with the configured private key. The
//! same connection answers the role-membership query before it is released.
//! A failed connection means the sign-in is rejected, never a system error.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{AuthError, CredentialProvider, SignIn, SignInCredential, SignInRequest};
use crate::config::DevKeyPairConfig;
use crate::permissions::PermissionResolver;
use crate::types::{Identity, PermissionTier};
use crate::warehouse::{KeyPairCredential, ScopedConnection, WarehouseAuth};

/// Provider id used in sign-in routes
pub const PROVIDER_ID: &str = "snowflake-keypair";

/// Key-pair sign-in for development environments
#[derive(Debug, Clone)]
pub struct KeyPairProvider {
    config: DevKeyPairConfig,
    resolver: PermissionResolver,
}

impl KeyPairProvider {
    /// Create a provider signing in with the configured private key
    pub fn new(config: DevKeyPairConfig, resolver: PermissionResolver) -> Self {
        Self { config, resolver }
    }

    /// Authenticate `username`; `None` when the warehouse refuses the key pair
    pub async fn authorize(&self, username: &str) -> Option<SignIn> {
        let username = username.trim();
        if username.is_empty() {
            return None;
        }

        let auth = WarehouseAuth::KeyPair(KeyPairCredential {
            username: username.to_string(),
            private_key_path: self.config.private_key_path.clone(),
            passphrase: self.config.passphrase.clone(),
        });

        let scoped = match ScopedConnection::open(self.resolver.connector(), &auth).await {
            Ok(scoped) => scoped,
            Err(e) => {
                warn!(username, error = %e, "Key-pair sign-in failed");
                return None;
            }
        };

        let tier = match scoped.connection() {
            Ok(conn) => self.resolver.resolve_tier_on(conn).await,
            Err(_) => PermissionTier::Standard,
        };
        scoped.release().await;

        info!(username, tier = %tier, "Key-pair sign-in succeeded");
        Some(SignIn {
            identity: Identity::new(username)
                .with_display_name(username)
                .with_email(username),
            initial_tier: Some(tier),
            credential: SignInCredential::DevKeyPair,
        })
    }
}

#[async_trait]
impl CredentialProvider for KeyPairProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Snowflake (Dev)"
    }

    async fn authenticate(&self, request: SignInRequest) -> Result<SignIn, AuthError> {
        match request {
            SignInRequest::Credentials { username } => self
                .authorize(&username)
                .await
                .ok_or_else(|| AuthError::Rejected("key-pair authentication failed".to_string())),
            SignInRequest::OAuthCallback(_) => Err(AuthError::UnsupportedCredentials {
                provider: PROVIDER_ID.to_string(),
            }),
        }
    }
}
