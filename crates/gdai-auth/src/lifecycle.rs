//! Token Lifecycle Manager
//!
//! Owns the refresh state machine for every live session token.
//!
//! The pure half of the module decides what a token needs:
//!
//! - [`assess`] classifies a held token as `Valid`, due for refresh or `Failed`
//! - [`initial_token`] builds the `Fresh` token of a sign-in
//! - [`refresh`] runs one refresh-token grant and always returns a token,
//!   flagged with [`TokenError::RefreshFailed`] on any failure
//!
//! [`TokenLifecycleManager`] holds one token per [`SessionId`] and coordinates
//! concurrent requests so that at most one refresh per session is in flight.
//! Refreshes run on their own task: a caller that gives up waiting does not
//! abandon the refresh, whose result still lands in the shared token store.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::oauth2::{RefreshError, TokenRefresher};
use crate::permissions::PermissionResolver;
use crate::providers::{SignIn, SignInCredential};
use crate::types::{PermissionTier, SessionId, Token, TokenError};
use crate::warehouse::WarehouseAuth;

/// Tokens expiring within this many seconds are refreshed ahead of time
pub const EXPIRY_BUFFER_SECS: i64 = 5;

/// Refresh state of a session token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenState {
    /// Just issued by a sign-in
    Fresh,
    /// Unexpired and usable
    Valid,
    /// Expiring; a refresh is required or in flight
    Refreshing,
    /// A refresh just succeeded
    Refreshed,
    /// A refresh failed. Terminal until the next full sign-in.
    Failed,
}

impl TokenState {
    /// Whether the token may be handed to callers as a usable credential
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Refreshing | Self::Failed)
    }
}

impl fmt::Display for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fresh => "fresh",
            Self::Valid => "valid",
            Self::Refreshing => "refreshing",
            Self::Refreshed => "refreshed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Classify a held token at `now`.
///
/// Dev-mode tokens are always `Valid`. A token with an unknown expiry is
/// treated as expiring.
pub fn assess(token: &Token, now: DateTime<Utc>) -> TokenState {
    if token.error.is_some() {
        return TokenState::Failed;
    }
    if token.dev_mode {
        return TokenState::Valid;
    }

    let buffer = TimeDelta::seconds(EXPIRY_BUFFER_SECS);
    let refresh_at = token
        .expires_at
        .and_then(|expires_at| expires_at.checked_sub_signed(buffer));

    match refresh_at {
        Some(refresh_at) if now < refresh_at => TokenState::Valid,
        _ => TokenState::Refreshing,
    }
}

/// Build the token of a completed sign-in with its resolved `tier`
pub fn initial_token(sign_in: &SignIn, tier: PermissionTier) -> Token {
    match &sign_in.credential {
        SignInCredential::OAuth {
            access_token,
            expires_at,
            refresh_token,
        } => Token::oauth(access_token.clone(), *expires_at, refresh_token.clone(), tier),
        SignInCredential::DevKeyPair => Token::dev(tier),
    }
}

/// Run one refresh-token grant for `token`.
///
/// Never fails: on success the access token, expiry and (when rotated) refresh
/// token are replaced and any error is cleared; on failure every field is kept
/// and the error flag is set. The permission tier is never touched. Dev-mode
/// tokens are returned unchanged.
pub async fn refresh(refresher: &dyn TokenRefresher, mut token: Token) -> Token {
    if token.dev_mode {
        return token;
    }

    match exchange(refresher, &token).await {
        Ok(update) => {
            token.access_token = update.access_token;
            token.expires_at = Some(update.expires_at);
            if let Some(rotated) = update.refresh_token {
                token.refresh_token = Some(rotated);
            }
            token.error = None;
            token
        }
        Err(e) => {
            warn!(error = %e, "Token refresh failed");
            token.into_failed()
        }
    }
}

/// State a token is in right after [`refresh`]
fn refreshed_state(token: &Token) -> TokenState {
    match token.error {
        Some(TokenError::RefreshFailed) => TokenState::Failed,
        None => TokenState::Refreshed,
    }
}

struct TokenUpdate {
    access_token: String,
    expires_at: DateTime<Utc>,
    refresh_token: Option<String>,
}

async fn exchange(
    refresher: &dyn TokenRefresher,
    token: &Token,
) -> Result<TokenUpdate, RefreshError> {
    let refresh_token = token
        .refresh_token()
        .ok_or(RefreshError::MissingRefreshToken)?;

    let tokens = refresher.refresh(refresh_token).await?;
    if tokens.access_token.is_empty() {
        return Err(RefreshError::Malformed("empty access_token".to_string()));
    }

    let expires_at = i64::try_from(tokens.expires_in)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| {
            RefreshError::Malformed(format!("expires_in out of range: {}", tokens.expires_in))
        })?;

    Ok(TokenUpdate {
        access_token: tokens.access_token,
        expires_at,
        refresh_token: tokens.refresh_token,
    })
}

/// Per-session token store with single-flight refresh
#[derive(Clone)]
pub struct TokenLifecycleManager {
    inner: Arc<Inner>,
}

struct Inner {
    refresher: Option<Arc<dyn TokenRefresher>>,
    resolver: PermissionResolver,
    tokens: DashMap<SessionId, Token>,
    flights: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl fmt::Debug for TokenLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenLifecycleManager")
            .field("refresher", &self.inner.refresher)
            .field("resolver", &self.inner.resolver)
            .field("sessions", &self.inner.tokens.len())
            .finish()
    }
}

impl TokenLifecycleManager {
    /// Create a manager.
    ///
    /// Without a `refresher` every token that needs a refresh fails closed.
    pub fn new(refresher: Option<Arc<dyn TokenRefresher>>, resolver: PermissionResolver) -> Self {
        Self {
            inner: Arc::new(Inner {
                refresher,
                resolver,
                tokens: DashMap::new(),
                flights: DashMap::new(),
            }),
        }
    }

    /// Issue the `Fresh` token of a sign-in and store it under `session`.
    ///
    /// The tier comes from the provider when it already knows it. Otherwise it
    /// is resolved once, here, from the issued OAuth access token; this
    /// completes (or fails closed) before the token is stored.
    pub async fn sign_in(&self, session: &SessionId, sign_in: &SignIn) -> Token {
        let tier = match (sign_in.initial_tier, &sign_in.credential) {
            (Some(tier), _) => tier,
            (None, SignInCredential::OAuth { access_token, .. }) => {
                self.inner
                    .resolver
                    .resolve_tier(&WarehouseAuth::oauth(access_token.clone()))
                    .await
            }
            (None, SignInCredential::DevKeyPair) => PermissionTier::Standard,
        };

        let token = initial_token(sign_in, tier);
        self.inner.tokens.insert(session.clone(), token.clone());
        info!(
            session = %session,
            tier = %tier,
            dev_mode = token.dev_mode,
            state = %TokenState::Fresh,
            "Issued session token"
        );
        token
    }

    /// Current token of `session`, refreshed first when it is expiring.
    ///
    /// Returns `None` for unknown sessions. Concurrent callers for the same
    /// session share one refresh.
    pub async fn current(&self, session: &SessionId) -> Option<(Token, TokenState)> {
        let token = self.inner.tokens.get(session).map(|entry| entry.clone())?;

        match assess(&token, Utc::now()) {
            TokenState::Refreshing => {}
            state => {
                debug!(session = %session, state = %state, "Token needs no refresh");
                return Some((token, state));
            }
        }

        let flight = self
            .inner
            .flights
            .entry(session.clone())
            .or_default()
            .clone();

        let manager = self.clone();
        let key = session.clone();
        let task = tokio::spawn(async move { manager.refresh_single_flight(&key, flight).await });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(session = %session, error = %e, "Refresh task aborted; failing token");
                let mut entry = self.inner.tokens.get_mut(session)?;
                let failed = entry.value().clone().into_failed();
                *entry = failed.clone();
                Some((failed, TokenState::Failed))
            }
        }
    }

    async fn refresh_single_flight(
        &self,
        session: &SessionId,
        flight: Arc<Mutex<()>>,
    ) -> Option<(Token, TokenState)> {
        let _guard = flight.lock().await;

        // Another caller may have refreshed while we waited for the guard
        let token = self.inner.tokens.get(session).map(|entry| entry.clone())?;
        match assess(&token, Utc::now()) {
            TokenState::Refreshing => {}
            state => return Some((token, state)),
        }

        let refreshed = match &self.inner.refresher {
            Some(refresher) => refresh(refresher.as_ref(), token).await,
            None => {
                warn!(session = %session, "No token endpoint configured; failing token");
                token.into_failed()
            }
        };
        let state = refreshed_state(&refreshed);

        // A session signed out mid-refresh stays signed out
        let mut entry = self.inner.tokens.get_mut(session)?;
        *entry = refreshed.clone();
        drop(entry);

        info!(session = %session, state = %state, "Token refresh completed");
        Some((refreshed, state))
    }

    /// Stored token of `session` without running the lifecycle
    pub fn peek(&self, session: &SessionId) -> Option<Token> {
        self.inner.tokens.get(session).map(|entry| entry.clone())
    }

    /// Drop the token and refresh guard of `session`
    pub fn remove(&self, session: &SessionId) -> Option<Token> {
        self.inner.flights.remove(session);
        self.inner.tokens.remove(session).map(|(_, token)| token)
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.inner.tokens.len()
    }

    /// Whether no session is live
    pub fn is_empty(&self) -> bool {
        self.inner.tokens.is_empty()
    }
}
