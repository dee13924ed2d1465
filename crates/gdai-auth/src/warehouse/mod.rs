//! Downstream Query Gateway
//!
//! Scoped, unpooled connections to the data warehouse. Every connection is
//! owned by the call that opened it and is released before that call returns:
//!
//! - [`WarehouseConnector`] opens a connection from an OAuth bearer token or a
//!   key-pair credential
//! - [`WarehouseConnection`] executes one SQL statement at a time and is torn
//!   down with a best-effort [`WarehouseConnection::destroy`]
//! - [`ScopedConnection`] guarantees that teardown on every exit path,
//!   including cancellation of the owning future
//!
//! ## Submodules
//!
//! - `keypair` - RSA key loading and key-pair JWT minting
//! - `sql_api` - Connector over the warehouse's HTTP SQL API

pub mod keypair;
pub mod sql_api;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;
use tracing::debug;

pub use keypair::{KeyPairError, KeyPairSigner};
pub use sql_api::SqlApiConnector;

/// One result row, keyed by column name
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Gateway errors
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// The warehouse could not be reached or rejected the credential
    #[error("Warehouse connection failed: {0}")]
    Connection(String),

    /// The statement was rejected or its result could not be read
    #[error("Warehouse query failed: {0}")]
    Query(String),

    /// The connection was already destroyed
    #[error("Warehouse connection is closed")]
    Closed,
}

/// Key-pair credential for the development sign-in path
#[derive(Debug, Clone)]
pub struct KeyPairCredential {
    /// Warehouse user name
    pub username: String,
    /// Path of the PEM-encoded RSA private key
    pub private_key_path: PathBuf,
    /// Passphrase for an encrypted private key
    pub passphrase: Option<SecretString>,
}

/// Credential used to open a warehouse connection
#[derive(Debug, Clone)]
pub enum WarehouseAuth {
    /// OAuth access token issued by the identity provider
    OAuth {
        /// Bearer token
        token: SecretString,
    },
    /// Key-pair authentication
    KeyPair(KeyPairCredential),
}

impl WarehouseAuth {
    /// OAuth credential from a raw access token
    pub fn oauth(token: impl Into<String>) -> Self {
        Self::OAuth {
            token: SecretString::new(token.into()),
        }
    }

    /// Authenticator name reported in logs
    pub fn authenticator(&self) -> &'static str {
        match self {
            Self::OAuth { .. } => "OAUTH",
            Self::KeyPair(_) => "JWT_KEYPAIR",
        }
    }
}

/// Positional bind value
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    /// Text value
    Text(String),
    /// Integer value
    Fixed(i64),
    /// Boolean value
    Boolean(bool),
}

impl From<&str> for BindValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Opens warehouse connections
#[async_trait]
pub trait WarehouseConnector: Send + Sync + fmt::Debug {
    /// Open a connection authenticated with `auth`
    async fn connect(
        &self,
        auth: &WarehouseAuth,
    ) -> Result<Box<dyn WarehouseConnection>, WarehouseError>;
}

/// An open warehouse connection
#[async_trait]
pub trait WarehouseConnection: Send + Sync {
    /// Execute one statement; a statement without rows yields an empty vector
    async fn execute(&self, sql: &str, binds: &[BindValue]) -> Result<Vec<Row>, WarehouseError>;

    /// Tear the connection down. Best-effort: never fails, swallows its own errors.
    async fn destroy(&self);
}

/// Connection guard that releases its connection exactly once.
///
/// Call [`ScopedConnection::release`] on the normal path. If the guard is
/// dropped without release (early return, panic, cancelled future) the
/// connection is destroyed on the current tokio runtime.
pub struct ScopedConnection {
    conn: Option<Box<dyn WarehouseConnection>>,
}

impl ScopedConnection {
    /// Open a connection through `connector`
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError::Connection`] (or whatever the connector raises)
    /// when the connection cannot be established.
    pub async fn open(
        connector: &dyn WarehouseConnector,
        auth: &WarehouseAuth,
    ) -> Result<Self, WarehouseError> {
        let conn = connector.connect(auth).await?;
        debug!(authenticator = auth.authenticator(), "Opened warehouse connection");
        Ok(Self { conn: Some(conn) })
    }

    /// Wrap an already-open connection
    pub fn new(conn: Box<dyn WarehouseConnection>) -> Self {
        Self { conn: Some(conn) }
    }

    /// Borrow the open connection
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError::Closed`] after the connection was released.
    pub fn connection(&self) -> Result<&dyn WarehouseConnection, WarehouseError> {
        self.conn.as_deref().ok_or(WarehouseError::Closed)
    }

    /// Best-effort release: destroys the connection and never fails
    pub async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            conn.destroy().await;
            debug!("Released warehouse connection");
        }
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    conn.destroy().await;
                    debug!("Released warehouse connection from drop guard");
                });
            }
            Err(_) => {
                tracing::warn!("No runtime available to release warehouse connection");
            }
        }
    }
}

impl fmt::Debug for ScopedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedConnection")
            .field("open", &self.conn.is_some())
            .finish()
    }
}
