//! Identity Provider Token Endpoint
//!
//! Refresh-token grant against the identity provider's v2.0 token endpoint.
//! Credential collection and the authorization-code exchange belong to the
//! identity provider integration; this module only renews tokens it issued.
//!
//! ## Submodules
//!
//! - `client` - [`TokenEndpointClient`], the `oauth2` refresh client

pub mod client;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub use client::TokenEndpointClient;

/// Why a refresh attempt failed. Never escapes the token lifecycle manager.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// Issuer URL absent or without a tenant segment
    #[error("Token endpoint unavailable: {0}")]
    EndpointUnavailable(String),

    /// No refresh token is held for the session
    #[error("No refresh token held")]
    MissingRefreshToken,

    /// Transport-level failure
    #[error("Token request failed: {0}")]
    Transport(String),

    /// The token endpoint answered with an OAuth error
    #[error("Token endpoint rejected the grant: {0}")]
    Rejected(String),

    /// Response body is not a usable token response
    #[error("Malformed token response: {0}")]
    Malformed(String),
}

/// Successful refresh-token grant response
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    /// New access token
    pub access_token: String,
    /// Lifetime of the new access token in seconds
    pub expires_in: u64,
    /// Rotated refresh token, when the provider issued one
    pub refresh_token: Option<String>,
}

impl fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedTokens")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Exchanges a refresh token for new tokens
#[async_trait]
pub trait TokenRefresher: Send + Sync + fmt::Debug {
    /// Perform one refresh-token grant
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, RefreshError>;
}
