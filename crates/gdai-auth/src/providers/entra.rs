//! Microsoft Entra ID sign-in
//!
//! The identity provider collects credentials and issues tokens. This provider
//! only turns the callback account into a [`SignIn`]; it never knows the
//! permission tier, which is resolved afterwards from the issued access token.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{AuthError, CredentialProvider, OAuthAccount, SignIn, SignInCredential, SignInRequest};
use crate::types::Identity;

/// Provider id used in sign-in routes
pub const PROVIDER_ID: &str = "azure-ad";

/// OAuth sign-in through Microsoft Entra ID
#[derive(Debug, Clone)]
pub struct EntraProvider {
    scope: String,
}

impl EntraProvider {
    /// Create a provider negotiating `scope` at sign-in
    pub fn new(scope: String) -> Self {
        Self { scope }
    }

    /// Scope string sent with the authorization redirect
    pub fn authorization_scope(&self) -> &str {
        &self.scope
    }

    fn sign_in(&self, account: OAuthAccount) -> Result<SignIn, AuthError> {
        if account.access_token.is_empty() {
            return Err(AuthError::Rejected(
                "identity provider issued no access token".to_string(),
            ));
        }
        if account.subject.is_empty() {
            return Err(AuthError::Rejected(
                "identity provider returned no subject".to_string(),
            ));
        }

        let expires_at = account
            .expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

        let identity = Identity {
            subject_id: account.subject,
            display_name: account.name,
            email: account.email,
        };
        debug!(subject = %identity.subject_id, "OAuth callback accepted");

        Ok(SignIn {
            identity,
            initial_tier: None,
            credential: SignInCredential::OAuth {
                access_token: account.access_token,
                expires_at,
                refresh_token: account.refresh_token,
            },
        })
    }
}

#[async_trait]
impl CredentialProvider for EntraProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Microsoft Entra ID"
    }

    async fn authenticate(&self, request: SignInRequest) -> Result<SignIn, AuthError> {
        match request {
            SignInRequest::OAuthCallback(account) => self.sign_in(account),
            SignInRequest::Credentials { .. } => Err(AuthError::UnsupportedCredentials {
                provider: PROVIDER_ID.to_string(),
            }),
        }
    }
}
