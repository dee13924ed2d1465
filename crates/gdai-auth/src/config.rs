//! Authentication Configuration Types
//!
//! Environment-style configuration for the identity provider, the warehouse and
//! the development key-pair sign-in path. Settings are read once at process
//! start and passed by reference afterwards.

use std::path::PathBuf;

use secrecy::SecretString;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Client id of the identity provider application
pub const ENV_ENTRA_CLIENT_ID: &str = "AUTH_MICROSOFT_ENTRA_ID_ID";
/// Client secret of the identity provider application
pub const ENV_ENTRA_CLIENT_SECRET: &str = "AUTH_MICROSOFT_ENTRA_ID_SECRET";
/// Issuer URL, e.g. `https://login.microsoftonline.com/{tenant}/v2.0`
pub const ENV_ENTRA_ISSUER: &str = "AUTH_MICROSOFT_ENTRA_ID_ISSUER";
/// Warehouse account identifier
pub const ENV_WAREHOUSE_ACCOUNT: &str = "SNOWFLAKE_ACCOUNT";
/// Optional warehouse base URL override
pub const ENV_WAREHOUSE_HOST: &str = "SNOWFLAKE_HOST";
/// Development key-pair sign-in toggle (`"true"` enables)
pub const ENV_DEV_AUTH: &str = "SNOWFLAKE_DEV_AUTH";
/// Private key used by the development sign-in path
pub const ENV_PRIVATE_KEY_PATH: &str = "SNOWFLAKE_PRIVATE_KEY_PATH";
/// Passphrase of the development private key
pub const ENV_PRIVATE_KEY_PASSPHRASE: &str = "SNOWFLAKE_PRIVATE_KEY_PASSPHRASE";
/// Elevated role name override
pub const ENV_ELEVATED_ROLE: &str = "SNOWFLAKE_ELEVATED_ROLE";
/// Extra OAuth scope targeting the warehouse
pub const ENV_OAUTH_SCOPE: &str = "SNOWFLAKE_OAUTH_SCOPE";

/// Role whose presence in the warehouse session grants the elevated tier
pub const DEFAULT_ELEVATED_ROLE: &str = "GDAI_ELEVATED";

/// Scopes always requested from the identity provider
pub const BASE_SCOPES: [&str; 4] = ["openid", "profile", "email", "offline_access"];

/// Configuration errors raised while loading settings
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required key is absent
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    /// A key is present but unusable
    #[error("Invalid configuration for {key}: {reason}")]
    Invalid {
        /// Offending key
        key: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Neither sign-in provider is enabled
    #[error("No sign-in provider is configured")]
    NoProviders,
}

/// Identity provider (Microsoft Entra ID) application settings
#[derive(Debug, Clone)]
pub struct EntraConfig {
    /// Application (client) id
    pub client_id: String,
    /// Client secret
    pub client_secret: SecretString,
    /// Issuer URL; the tenant is its first path segment
    pub issuer: Option<String>,
}

/// Warehouse connection settings
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Account identifier
    pub account: Option<String>,
    /// Base URL override (scheme, host and optional port)
    pub host: Option<String>,
    /// Elevated role name, already uppercased
    pub elevated_role: String,
}

impl WarehouseConfig {
    /// Create warehouse settings for an account with the default elevated role
    pub fn for_account(account: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            host: None,
            elevated_role: DEFAULT_ELEVATED_ROLE.to_string(),
        }
    }

    /// Builder method: override the base URL
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Builder method: override the elevated role (uppercased)
    pub fn with_elevated_role(mut self, role: &str) -> Self {
        self.elevated_role = role.to_uppercase();
        self
    }

    /// Base URL of the warehouse SQL API
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when neither an account nor a host override is set,
    /// or when the resulting URL does not parse.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let raw = match (&self.host, &self.account) {
            (Some(host), _) => host.clone(),
            (None, Some(account)) => format!("https://{account}.snowflakecomputing.com"),
            (None, None) => return Err(ConfigError::Missing(ENV_WAREHOUSE_ACCOUNT)),
        };

        Url::parse(&raw).map_err(|e| ConfigError::Invalid {
            key: ENV_WAREHOUSE_HOST,
            reason: e.to_string(),
        })
    }
}

/// Development key-pair sign-in settings
#[derive(Debug, Clone)]
pub struct DevKeyPairConfig {
    /// Path of the PEM-encoded RSA private key
    pub private_key_path: PathBuf,
    /// Passphrase for an encrypted private key
    pub passphrase: Option<SecretString>,
}

/// Complete authentication settings
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// OAuth provider settings; `None` disables the OAuth sign-in path
    pub entra: Option<EntraConfig>,
    /// Warehouse settings
    pub warehouse: WarehouseConfig,
    /// Key-pair settings; `None` disables the development sign-in path
    pub dev_key_pair: Option<DevKeyPairConfig>,
    /// Extra scope appended to [`BASE_SCOPES`]
    pub oauth_scope: Option<String>,
}

impl AuthSettings {
    /// Load settings from process environment variables
    ///
    /// # Errors
    ///
    /// See [`AuthSettings::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary key lookup. Empty values count as absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when the OAuth client id is set without a
    /// secret, and [`ConfigError::NoProviders`] when neither sign-in path ends up
    /// enabled.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let entra = match get(ENV_ENTRA_CLIENT_ID) {
            Some(client_id) => {
                let secret = get(ENV_ENTRA_CLIENT_SECRET)
                    .ok_or(ConfigError::Missing(ENV_ENTRA_CLIENT_SECRET))?;
                let issuer = get(ENV_ENTRA_ISSUER);
                if issuer.is_none() {
                    warn!("{ENV_ENTRA_ISSUER} is not set; token refresh will fail closed");
                }
                Some(EntraConfig {
                    client_id,
                    client_secret: SecretString::new(secret),
                    issuer,
                })
            }
            None => None,
        };

        let warehouse = WarehouseConfig {
            account: get(ENV_WAREHOUSE_ACCOUNT),
            host: get(ENV_WAREHOUSE_HOST),
            elevated_role: get(ENV_ELEVATED_ROLE)
                .unwrap_or_else(|| DEFAULT_ELEVATED_ROLE.to_string())
                .to_uppercase(),
        };

        let dev_key_pair = if get(ENV_DEV_AUTH).as_deref() == Some("true") {
            match (get(ENV_PRIVATE_KEY_PATH), &warehouse.account) {
                (Some(path), Some(_)) => Some(DevKeyPairConfig {
                    private_key_path: PathBuf::from(path),
                    passphrase: get(ENV_PRIVATE_KEY_PASSPHRASE).map(SecretString::new),
                }),
                _ => {
                    warn!(
                        "{ENV_DEV_AUTH}=true but {ENV_PRIVATE_KEY_PATH} or {ENV_WAREHOUSE_ACCOUNT} \
                         is missing; key-pair sign-in disabled"
                    );
                    None
                }
            }
        } else {
            None
        };

        if entra.is_none() && dev_key_pair.is_none() {
            return Err(ConfigError::NoProviders);
        }

        debug!(
            oauth = entra.is_some(),
            dev_key_pair = dev_key_pair.is_some(),
            elevated_role = %warehouse.elevated_role,
            "Loaded authentication settings"
        );

        Ok(Self {
            entra,
            warehouse,
            dev_key_pair,
            oauth_scope: get(ENV_OAUTH_SCOPE),
        })
    }

    /// Space-separated scope string negotiated with the identity provider
    pub fn authorization_scope(&self) -> String {
        authorization_scope(self.oauth_scope.as_deref())
    }
}

/// Build the scope string from [`BASE_SCOPES`] plus an optional extra scope
pub fn authorization_scope(extra: Option<&str>) -> String {
    let mut scopes: Vec<&str> = BASE_SCOPES.to_vec();
    if let Some(extra) = extra.filter(|s| !s.is_empty()) {
        scopes.push(extra);
    }
    scopes.join(" ")
}
