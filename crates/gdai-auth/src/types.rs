//! Core Session Types
//!
//! Identity, token, permission tier and session records shared by every
//! component of the sign-in pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authorization tier derived from the warehouse's active role set.
///
/// `Standard` is the safe default; `Elevated` is only ever produced by an
/// affirmative role-membership query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionTier {
    /// Least-privileged tier
    #[default]
    Standard,
    /// Elevated role confirmed active in the warehouse session
    Elevated,
}

impl PermissionTier {
    /// Wire name of the tier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Elevated => "elevated",
        }
    }
}

impl fmt::Display for PermissionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error flag carried by a token (and the session built from it)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenError {
    /// The identity provider refused or could not complete a refresh
    RefreshFailed,
}

impl TokenError {
    /// Wire name of the error flag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RefreshFailed => "refresh_failed",
        }
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User identity produced once per sign-in by a credential provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable subject identifier
    pub subject_id: String,
    /// Human readable name
    pub display_name: Option<String>,
    /// Email address
    pub email: Option<String>,
}

impl Identity {
    /// Create an identity with only a subject
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            display_name: None,
            email: None,
        }
    }

    /// Builder method: set display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Builder method: set email
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Opaque per-session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random session id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strongly typed access-token record held for one session.
///
/// Only the token lifecycle manager mutates a `Token`; the permission tier is
/// fixed at construction and refresh never touches it. Unknown fields are
/// rejected when a token is deserialized.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Token {
    pub(crate) access_token: String,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub(crate) expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) refresh_token: Option<String>,
    #[serde(default)]
    pub(crate) permission_tier: PermissionTier,
    #[serde(default)]
    pub(crate) dev_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<TokenError>,
}

impl Token {
    /// Token issued by the identity provider at OAuth sign-in
    pub fn oauth(
        access_token: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
        refresh_token: Option<String>,
        permission_tier: PermissionTier,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
            refresh_token,
            permission_tier,
            dev_mode: false,
            error: None,
        }
    }

    /// Development key-pair token: no access token, never expires, never refreshed
    pub fn dev(permission_tier: PermissionTier) -> Self {
        Self {
            access_token: String::new(),
            expires_at: None,
            refresh_token: None,
            permission_tier,
            dev_mode: true,
            error: None,
        }
    }

    /// Get the access token value
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Get the absolute expiry, if known
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Get the permission tier fixed at sign-in
    pub fn permission_tier(&self) -> PermissionTier {
        self.permission_tier
    }

    /// Whether this is a development key-pair token
    pub fn is_dev_mode(&self) -> bool {
        self.dev_mode
    }

    /// Get the error flag
    pub fn error(&self) -> Option<TokenError> {
        self.error
    }

    /// Whether a refresh token is held
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    pub(crate) fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Copy of this token flagged as failed; every other field is retained
    pub(crate) fn into_failed(mut self) -> Self {
        self.error = Some(TokenError::RefreshFailed);
        self
    }
}

// Manual Debug impl to keep token material out of logs
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("permission_tier", &self.permission_tier)
            .field("dev_mode", &self.dev_mode)
            .field("error", &self.error)
            .finish()
    }
}

/// User section of the session record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionUser {
    /// Subject of the identity
    pub id: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Externally visible session record.
///
/// Never carries the refresh token. When `error` is set the access token must
/// not be used; [`Session::usable_access_token`] enforces that.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Session {
    /// Current access token
    pub access_token: String,
    /// Permission tier resolved at sign-in
    pub permission_tier: PermissionTier,
    /// Terminal credential error, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TokenError>,
    /// Session user
    pub user: SessionUser,
}

impl Session {
    /// Access token, unless the session carries an error flag
    pub fn usable_access_token(&self) -> Option<&str> {
        if self.error.is_some() {
            None
        } else {
            Some(&self.access_token)
        }
    }

    /// Whether the session holds the elevated tier
    pub fn is_elevated(&self) -> bool {
        self.permission_tier == PermissionTier::Elevated
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("permission_tier", &self.permission_tier)
            .field("error", &self.error)
            .field("user", &self.user)
            .finish()
    }
}
