//! # GDAI Auth - Sign-in, Token Lifecycle and Permission Tiers
//!
//! Authentication core for the GDAI workflow application: users sign in through
//! Microsoft Entra ID (or a development key-pair path against the warehouse),
//! their access tokens are kept fresh across requests, and their permission tier
//! is derived once, at sign-in, from the warehouse's active role set.
//!
//! ## Design Principles
//!
//! - **Fail Closed**: every ambiguity resolves to the least-privileged outcome
//! - **Never Stale**: an expiring token is refreshed, a failed refresh is flagged
//! - **Single-Flight**: one refresh per session, however many requests race
//! - **Scoped Connections**: every warehouse connection is released by its owner
//!
//! ## Architecture
//!
//! - [`warehouse`] - Downstream query gateway (SQL API connector, key-pair JWTs)
//! - [`permissions`] - Permission resolver, fails closed to `standard`
//! - [`providers`] - Credential providers and the startup provider registry
//! - [`lifecycle`] - Token refresh state machine with single-flight refresh
//! - [`oauth2`] - Refresh-token grant against the identity provider
//! - [`session`] - Session orchestrator and the pure session merge
//! - [`watchdog`] - Client recovery watchdog with workflow checkpoints
//! - [`guard`] - Route guard redirecting anonymous requests to sign-in
//! - [`config`] - Environment-driven settings
//! - [`types`] - Identity, token, tier and session records
//!
//! ## Quick Start
//!
//! ```rust
//! use gdai_auth::{Identity, PermissionTier, Token, materialize};
//!
//! let identity = Identity::new("user123").with_email("alice@example.com");
//! let token = Token::dev(PermissionTier::Elevated);
//!
//! let session = materialize(&identity, &token);
//! assert!(session.is_elevated());
//! assert_eq!(session.user.id, "user123");
//! ```
//!
//! ## Configuration
//!
//! [`AuthSettings::from_env`] reads the `AUTH_MICROSOFT_ENTRA_ID_*` and
//! `SNOWFLAKE_*` variables. At least one provider must end up enabled.

// Submodules
pub mod config;
pub mod guard;
pub mod lifecycle;
pub mod oauth2;
pub mod permissions;
pub mod providers;
pub mod session;
pub mod types;
pub mod warehouse;
pub mod watchdog;

// Re-export configuration types
#[doc(inline)]
pub use config::{AuthSettings, ConfigError, DevKeyPairConfig, EntraConfig, WarehouseConfig};

// Re-export core records
#[doc(inline)]
pub use types::{Identity, PermissionTier, Session, SessionId, SessionUser, Token, TokenError};

// Re-export providers
#[doc(inline)]
pub use providers::{
    AuthError, CredentialProvider, EntraProvider, KeyPairProvider, OAuthAccount, ProviderRegistry,
    SignIn, SignInCredential, SignInRequest,
};

#[doc(inline)]
pub use lifecycle::{TokenLifecycleManager, TokenState};

#[doc(inline)]
pub use permissions::PermissionResolver;

#[doc(inline)]
pub use session::{SessionOrchestrator, materialize};

#[doc(inline)]
pub use watchdog::{
    CheckpointStorage, ClientNavigator, MemoryCheckpointStorage, SessionWatchdog,
    WorkflowCheckpoint,
};

#[doc(inline)]
pub use guard::{GuardDecision, RouteGuard};
