//! Common test utilities for integration tests
//!
//! Shared infrastructure for the sign-in, refresh and permission scenarios:
//! a wiremock identity provider, an in-memory warehouse that counts its
//! connections, and RSA key-pair fixtures.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use gdai_auth::config::{EntraConfig, authorization_scope};
use gdai_auth::oauth2::TokenEndpointClient;
use gdai_auth::warehouse::{
    BindValue, Row, WarehouseAuth, WarehouseConnection, WarehouseConnector, WarehouseError,
};
use gdai_auth::{Identity, PermissionResolver, PermissionTier, SignIn, SignInCredential};
use parking_lot::Mutex;
use secrecy::SecretString;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, method, path},
};

/// Tenant segment used by the mock issuer
pub const TENANT: &str = "tenant-1";

/// Identity provider mock serving the v2.0 token endpoint
pub struct MockIdentityProvider {
    pub server: MockServer,
    pub issuer: String,
    pub token_path: String,
}

impl MockIdentityProvider {
    /// Start a mock identity provider
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let issuer = format!("{}/{TENANT}/v2.0", server.uri());

        Self {
            server,
            issuer,
            token_path: format!("/{TENANT}/oauth2/v2.0/token"),
        }
    }

    /// Application settings pointing at this provider
    pub fn entra_config(&self) -> EntraConfig {
        EntraConfig {
            client_id: "client-1".to_string(),
            client_secret: SecretString::new("client-secret".to_string()),
            issuer: Some(self.issuer.clone()),
        }
    }

    /// Refresh client pointing at this provider
    pub fn client(&self) -> TokenEndpointClient {
        TokenEndpointClient::new(&self.entra_config(), authorization_scope(None))
    }

    /// Mock a successful refresh, expected exactly `times` times
    pub async fn mock_refresh_success(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        times: u64,
    ) {
        self.mock_refresh_success_delayed(access_token, refresh_token, Duration::ZERO, times)
            .await;
    }

    /// Mock a successful refresh answered after `delay`
    pub async fn mock_refresh_success_delayed(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        delay: Duration,
        times: u64,
    ) {
        let mut body = json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": 3600,
        });
        if let Some(refresh) = refresh_token {
            body["refresh_token"] = json!(refresh);
        }

        Mock::given(method("POST"))
            .and(path(self.token_path.as_str()))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(body)
                    .set_delay(delay),
            )
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Mock a rejected refresh, expected exactly `times` times
    pub async fn mock_refresh_error(&self, status: u16, error: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path(self.token_path.as_str()))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": error,
                "error_description": "AADSTS700082: The refresh token has expired",
            })))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Fail the test if any token request arrives
    pub async fn expect_no_requests(&self) {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&self.server)
            .await;
    }
}

/// How the fake warehouse answers the role query
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Rows(Vec<Row>),
    Fail,
}

/// In-memory warehouse counting connects, queries and teardowns
#[derive(Debug)]
pub struct FakeWarehouse {
    accept_connections: bool,
    outcome: QueryOutcome,
    pub connects: AtomicUsize,
    pub executes: Arc<AtomicUsize>,
    pub destroys: Arc<AtomicUsize>,
    pub last_binds: Arc<Mutex<Vec<BindValue>>>,
    pub authenticators: Mutex<Vec<&'static str>>,
}

impl FakeWarehouse {
    fn build(accept_connections: bool, outcome: QueryOutcome) -> Arc<Self> {
        Arc::new(Self {
            accept_connections,
            outcome,
            connects: AtomicUsize::new(0),
            executes: Arc::new(AtomicUsize::new(0)),
            destroys: Arc::new(AtomicUsize::new(0)),
            last_binds: Arc::new(Mutex::new(Vec::new())),
            authenticators: Mutex::new(Vec::new()),
        })
    }

    /// Warehouse where the elevated role is active
    pub fn elevated() -> Arc<Self> {
        Self::build(true, QueryOutcome::Rows(vec![elevated_row(json!(true))]))
    }

    /// Warehouse answering the role query with `rows`
    pub fn with_rows(rows: Vec<Row>) -> Arc<Self> {
        Self::build(true, QueryOutcome::Rows(rows))
    }

    /// Warehouse rejecting every statement
    pub fn failing_queries() -> Arc<Self> {
        Self::build(true, QueryOutcome::Fail)
    }

    /// Warehouse rejecting every connection
    pub fn unreachable() -> Arc<Self> {
        Self::build(false, QueryOutcome::Fail)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn executes(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    /// Resolver using this warehouse and the default role
    pub fn resolver(self: &Arc<Self>) -> PermissionResolver {
        PermissionResolver::with_default_role(self.clone())
    }
}

#[async_trait]
impl WarehouseConnector for FakeWarehouse {
    async fn connect(
        &self,
        auth: &WarehouseAuth,
    ) -> Result<Box<dyn WarehouseConnection>, WarehouseError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.authenticators.lock().push(auth.authenticator());

        if !self.accept_connections {
            return Err(WarehouseError::Connection("JWT token is invalid".to_string()));
        }

        Ok(Box::new(FakeConnection {
            outcome: self.outcome.clone(),
            executes: self.executes.clone(),
            destroys: self.destroys.clone(),
            last_binds: self.last_binds.clone(),
        }))
    }
}

struct FakeConnection {
    outcome: QueryOutcome,
    executes: Arc<AtomicUsize>,
    destroys: Arc<AtomicUsize>,
    last_binds: Arc<Mutex<Vec<BindValue>>>,
}

#[async_trait]
impl WarehouseConnection for FakeConnection {
    async fn execute(&self, _sql: &str, binds: &[BindValue]) -> Result<Vec<Row>, WarehouseError> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        *self.last_binds.lock() = binds.to_vec();
        match &self.outcome {
            QueryOutcome::Rows(rows) => Ok(rows.clone()),
            QueryOutcome::Fail => Err(WarehouseError::Query("SQL compilation error".to_string())),
        }
    }

    async fn destroy(&self) {
        self.destroys.fetch_add(1, Ordering::SeqCst);
    }
}

/// Role-query row with `value` in the `IS_ELEVATED` column
pub fn elevated_row(value: serde_json::Value) -> Row {
    let mut row = Row::new();
    row.insert("IS_ELEVATED".to_string(), value);
    row
}

/// OAuth sign-in whose access token expires `expires_in_secs` from now
pub fn oauth_sign_in(expires_in_secs: i64, tier: Option<PermissionTier>) -> SignIn {
    SignIn {
        identity: Identity::new("oid-1")
            .with_display_name("Ada Lovelace")
            .with_email("ada@example.com"),
        initial_tier: tier,
        credential: SignInCredential::OAuth {
            access_token: "a1".to_string(),
            expires_at: Some(chrono::Utc::now() + chrono::TimeDelta::seconds(expires_in_secs)),
            refresh_token: Some("r1".to_string()),
        },
    }
}

/// Generate a test RSA key pair (PEM format)
pub fn generate_test_rsa_keypair() -> (rsa::RsaPrivateKey, String) {
    use rsa::RsaPrivateKey;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};

    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("Failed to generate RSA key");
    let public_pem = private_key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .expect("Failed to encode public key");

    (private_key, public_pem)
}

/// Write `private_key` as unencrypted PKCS#8 PEM into `dir`
pub fn write_pkcs8_key(dir: &Path, private_key: &rsa::RsaPrivateKey) -> PathBuf {
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};

    let pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .expect("Failed to encode private key");
    let path = dir.join("rsa_key.p8");
    std::fs::write(&path, pem.as_bytes()).expect("Failed to write key file");
    path
}

/// Write `private_key` as passphrase-encrypted PKCS#8 PEM into `dir`
pub fn write_encrypted_key(
    dir: &Path,
    private_key: &rsa::RsaPrivateKey,
    passphrase: &str,
) -> PathBuf {
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};

    let mut rng = rand::thread_rng();
    let pem = private_key
        .to_pkcs8_encrypted_pem(&mut rng, passphrase.as_bytes(), LineEnding::LF)
        .expect("Failed to encrypt private key");
    let path = dir.join("rsa_key_encrypted.p8");
    std::fs::write(&path, pem.as_bytes()).expect("Failed to write key file");
    path
}
