//! Session Orchestrator
//!
//! Composes provider sign-ins and the token lifecycle into the externally
//! visible [`Session`] record. [`materialize`] is the pure merge; the
//! [`SessionOrchestrator`] owns the per-session identity store and wires the
//! components together.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::{AuthSettings, ConfigError};
use crate::lifecycle::TokenLifecycleManager;
use crate::oauth2::{TokenEndpointClient, TokenRefresher};
use crate::permissions::PermissionResolver;
use crate::providers::{AuthError, ProviderRegistry, SignInRequest};
use crate::types::{Identity, Session, SessionId, SessionUser, Token};
use crate::warehouse::SqlApiConnector;

/// Merge an identity and its current token into a session record.
///
/// The refresh token never leaves the token.
pub fn materialize(identity: &Identity, token: &Token) -> Session {
    Session {
        access_token: token.access_token().to_string(),
        permission_tier: token.permission_tier(),
        error: token.error(),
        user: SessionUser {
            id: identity.subject_id.clone(),
            name: identity.display_name.clone(),
            email: identity.email.clone(),
        },
    }
}

/// Sign-in entry point and session store
#[derive(Debug, Clone)]
pub struct SessionOrchestrator {
    registry: ProviderRegistry,
    lifecycle: TokenLifecycleManager,
    identities: Arc<DashMap<SessionId, Identity>>,
}

impl SessionOrchestrator {
    /// Create an orchestrator from its components
    pub fn new(registry: ProviderRegistry, lifecycle: TokenLifecycleManager) -> Self {
        Self {
            registry,
            lifecycle,
            identities: Arc::new(DashMap::new()),
        }
    }

    /// Wire the production components described by `settings`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the warehouse URL cannot be derived or no
    /// provider is enabled.
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, ConfigError> {
        let connector = Arc::new(SqlApiConnector::new(&settings.warehouse)?);
        let resolver = PermissionResolver::new(connector, &settings.warehouse.elevated_role);
        let registry = ProviderRegistry::from_settings(settings, &resolver)?;

        let refresher = settings.entra.as_ref().map(|entra| {
            Arc::new(TokenEndpointClient::new(entra, settings.authorization_scope()))
                as Arc<dyn TokenRefresher>
        });

        Ok(Self::new(registry, TokenLifecycleManager::new(refresher, resolver)))
    }

    /// Active providers
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Token lifecycle manager
    pub fn lifecycle(&self) -> &TokenLifecycleManager {
        &self.lifecycle
    }

    /// Authenticate through `provider_id` and open a new session
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the provider is unknown or rejects the request.
    pub async fn sign_in(
        &self,
        provider_id: &str,
        request: SignInRequest,
    ) -> Result<(SessionId, Session), AuthError> {
        let provider = self.registry.get(provider_id)?;
        let sign_in = provider.authenticate(request).await?;

        let session_id = SessionId::generate();
        let token = self.lifecycle.sign_in(&session_id, &sign_in).await;
        let session = materialize(&sign_in.identity, &token);
        self.identities.insert(session_id.clone(), sign_in.identity);

        info!(session = %session_id, provider = provider_id, "Session opened");
        Ok((session_id, session))
    }

    /// Current session record, refreshing the token first when needed.
    /// `None` for unknown or signed-out sessions.
    pub async fn session(&self, session_id: &SessionId) -> Option<Session> {
        let identity = self
            .identities
            .get(session_id)
            .map(|entry| entry.value().clone())?;
        let (token, state) = self.lifecycle.current(session_id).await?;

        if state.is_usable() {
            debug!(session = %session_id, state = %state, "Materialized session");
        } else {
            warn!(session = %session_id, state = %state, "Session credential is no longer usable");
        }
        Some(materialize(&identity, &token))
    }

    /// Forget a session. Returns whether it existed.
    pub fn sign_out(&self, session_id: &SessionId) -> bool {
        let known = self.identities.remove(session_id).is_some();
        let had_token = self.lifecycle.remove(session_id).is_some();
        if known {
            info!(session = %session_id, "Session closed");
        }
        known || had_token
    }
}
