//! Route guard
//!
//! Sends unauthenticated requests for protected paths to the sign-in page.
//! Sign-in routes and static assets stay public.

use url::Url;

use crate::types::Session;

/// Path prefixes reachable without a session
pub const PUBLIC_PREFIXES: [&str; 4] = ["api/auth", "_next/static", "_next/image", "favicon.ico"];

/// Sign-in page, relative to the application origin
pub const SIGN_IN_PATH: &str = "/api/auth/signin";

/// Outcome of a guard check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Serve the request
    Allow,
    /// Redirect to the sign-in page
    Redirect(Url),
}

/// Guards application routes
#[derive(Debug, Clone)]
pub struct RouteGuard {
    sign_in_url: Url,
}

impl RouteGuard {
    /// Create a guard for the application served at `origin`
    ///
    /// # Errors
    ///
    /// Returns the parse error when `origin` is not an absolute URL.
    pub fn new(origin: &str) -> Result<Self, url::ParseError> {
        let sign_in_url = Url::parse(origin)?.join(SIGN_IN_PATH)?;
        Ok(Self { sign_in_url })
    }

    /// Sign-in redirect target
    pub fn sign_in_url(&self) -> &Url {
        &self.sign_in_url
    }

    /// Whether `path` is reachable without a session
    pub fn is_public(path: &str) -> bool {
        let path = path.strip_prefix('/').unwrap_or(path);
        PUBLIC_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
    }

    /// Decide how to handle a request for `path`
    pub fn check(&self, path: &str, session: Option<&Session>) -> GuardDecision {
        if session.is_some() || Self::is_public(path) {
            GuardDecision::Allow
        } else {
            GuardDecision::Redirect(self.sign_in_url.clone())
        }
    }
}
