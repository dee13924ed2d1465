//! End-to-end session scenarios
//!
//! Sign-in through the orchestrator, per-request session materialization,
//! refresh failure surfacing on the session, and the client watchdog
//! recovering from it with a checkpoint.

mod common;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use common::{FakeWarehouse, MockIdentityProvider};
use gdai_auth::config::{DevKeyPairConfig, authorization_scope};
use gdai_auth::oauth2::TokenRefresher;
use gdai_auth::providers::{entra, key_pair};
use gdai_auth::watchdog::CHECKPOINT_KEY;
use gdai_auth::{
    AuthError, AuthSettings, CheckpointStorage, ClientNavigator, CredentialProvider,
    EntraProvider, GuardDecision, KeyPairProvider, MemoryCheckpointStorage, OAuthAccount,
    PermissionTier, ProviderRegistry, RouteGuard, SessionOrchestrator, SessionWatchdog,
    SignInRequest, TokenError, TokenLifecycleManager,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

#[derive(Default)]
struct BrowserNavigator {
    redirects: Mutex<Vec<(String, String)>>,
}

impl ClientNavigator for BrowserNavigator {
    fn current_location(&self) -> String {
        "https://gdai.example.com/workflows/7/steps/2".to_string()
    }

    fn sign_in(&self, provider_id: &str, callback_url: &str) {
        self.redirects
            .lock()
            .push((provider_id.to_string(), callback_url.to_string()));
    }
}

fn orchestrator(idp: &MockIdentityProvider, warehouse: &Arc<FakeWarehouse>) -> SessionOrchestrator {
    let resolver = warehouse.resolver();
    let providers: Vec<Arc<dyn CredentialProvider>> = vec![
        Arc::new(KeyPairProvider::new(
            DevKeyPairConfig {
                private_key_path: PathBuf::from("/keys/rsa_key.p8"),
                passphrase: None,
            },
            resolver.clone(),
        )),
        Arc::new(EntraProvider::new(authorization_scope(None))),
    ];
    let registry = ProviderRegistry::new(providers).unwrap();
    let refresher: Arc<dyn TokenRefresher> = Arc::new(idp.client());

    SessionOrchestrator::new(registry, TokenLifecycleManager::new(Some(refresher), resolver))
}

fn callback(expires_in_secs: i64) -> SignInRequest {
    SignInRequest::OAuthCallback(OAuthAccount {
        subject: "oid-1".to_string(),
        name: Some("Ada Lovelace".to_string()),
        email: Some("ada@example.com".to_string()),
        access_token: "a1".to_string(),
        expires_at: Some(chrono::Utc::now().timestamp() + expires_in_secs),
        refresh_token: Some("r1".to_string()),
    })
}

#[tokio::test]
async fn test_oauth_sign_in_resolves_tier_once() {
    let idp = MockIdentityProvider::start().await;
    idp.expect_no_requests().await;
    let warehouse = FakeWarehouse::elevated();
    let orchestrator = orchestrator(&idp, &warehouse);

    let (session_id, session) = orchestrator
        .sign_in(entra::PROVIDER_ID, callback(3600))
        .await
        .unwrap();

    assert_eq!(session.access_token, "a1");
    assert_eq!(session.permission_tier, PermissionTier::Elevated);
    assert_eq!(session.error, None);
    assert_eq!(session.user.id, "oid-1");
    assert_eq!(session.user.name.as_deref(), Some("Ada Lovelace"));

    for _ in 0..3 {
        let current = orchestrator.session(&session_id).await.unwrap();
        assert_eq!(current, session);
    }
    assert_eq!(warehouse.connects(), 1);
    assert_eq!(warehouse.destroys(), 1);
}

#[tokio::test]
async fn test_session_record_never_carries_refresh_token() {
    let idp = MockIdentityProvider::start().await;
    let warehouse = FakeWarehouse::elevated();
    let orchestrator = orchestrator(&idp, &warehouse);

    let (_, session) = orchestrator
        .sign_in(entra::PROVIDER_ID, callback(3600))
        .await
        .unwrap();

    let wire = serde_json::to_value(&session).unwrap();
    assert_eq!(
        wire,
        serde_json::json!({
            "access_token": "a1",
            "permission_tier": "elevated",
            "user": {"id": "oid-1", "name": "Ada Lovelace", "email": "ada@example.com"}
        })
    );
}

#[tokio::test]
async fn test_dev_sign_in_session() {
    let idp = MockIdentityProvider::start().await;
    idp.expect_no_requests().await;
    let warehouse = FakeWarehouse::with_rows(Vec::new());
    let orchestrator = orchestrator(&idp, &warehouse);

    let (session_id, session) = orchestrator
        .sign_in(
            key_pair::PROVIDER_ID,
            SignInRequest::Credentials {
                username: "dev.user".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(session.permission_tier, PermissionTier::Standard);
    assert_eq!(session.user.id, "dev.user");
    assert_eq!(session.user.email.as_deref(), Some("dev.user"));
    assert!(orchestrator.session(&session_id).await.unwrap().error.is_none());
    assert_eq!(warehouse.destroys(), 1);
}

#[tokio::test]
async fn test_unknown_provider_and_wrong_request_kind() {
    let idp = MockIdentityProvider::start().await;
    let warehouse = FakeWarehouse::elevated();
    let orchestrator = orchestrator(&idp, &warehouse);

    assert!(matches!(
        orchestrator.sign_in("github", callback(3600)).await,
        Err(AuthError::UnknownProvider(_))
    ));
    assert!(matches!(
        orchestrator.sign_in(key_pair::PROVIDER_ID, callback(3600)).await,
        Err(AuthError::UnsupportedCredentials { .. })
    ));
    assert_eq!(warehouse.connects(), 0);
}

#[tokio::test]
async fn test_sign_out_forgets_session() {
    let idp = MockIdentityProvider::start().await;
    let warehouse = FakeWarehouse::elevated();
    let orchestrator = orchestrator(&idp, &warehouse);

    let (session_id, _) = orchestrator
        .sign_in(entra::PROVIDER_ID, callback(3600))
        .await
        .unwrap();

    assert!(orchestrator.sign_out(&session_id));
    assert!(orchestrator.session(&session_id).await.is_none());
    assert!(!orchestrator.sign_out(&session_id));
    assert!(orchestrator.lifecycle().is_empty());
}

#[tokio::test]
async fn test_refresh_failure_drives_watchdog_recovery() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_refresh_error(400, "invalid_grant", 1).await;
    let warehouse = FakeWarehouse::elevated();
    let orchestrator = orchestrator(&idp, &warehouse);

    let storage = Arc::new(MemoryCheckpointStorage::new());
    let navigator = Arc::new(BrowserNavigator::default());
    let watchdog = SessionWatchdog::new(storage.clone(), navigator.clone());

    let (session_id, first) = orchestrator
        .sign_in(entra::PROVIDER_ID, callback(-10))
        .await
        .unwrap();
    assert!(!watchdog.on_session_change(Some(&first)));

    // Next request finds the token expired and the refresh rejected
    let session = orchestrator.session(&session_id).await.unwrap();
    assert_eq!(session.error, Some(TokenError::RefreshFailed));
    assert_eq!(session.usable_access_token(), None);
    assert_eq!(session.permission_tier, PermissionTier::Elevated);

    assert!(watchdog.on_session_change(Some(&session)));
    let raw = storage.get(CHECKPOINT_KEY).unwrap().unwrap();
    let saved: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(saved["url"], "https://gdai.example.com/workflows/7/steps/2");
    assert!(saved["timestamp"].as_i64().unwrap() > 1_600_000_000_000);
    assert_eq!(
        navigator.redirects.lock().clone(),
        vec![(
            "azure-ad".to_string(),
            "https://gdai.example.com/workflows/7/steps/2".to_string()
        )]
    );

    // The failed state is terminal: observing it again neither refreshes nor redirects
    let again = orchestrator.session(&session_id).await.unwrap();
    assert!(!watchdog.on_session_change(Some(&again)));
    assert_eq!(navigator.redirects.lock().len(), 1);

    // After the new sign-in the checkpoint is handed back exactly once
    orchestrator.sign_out(&session_id);
    let (_, renewed) = orchestrator
        .sign_in(entra::PROVIDER_ID, callback(3600))
        .await
        .unwrap();
    assert!(!watchdog.on_session_change(Some(&renewed)));

    let restored = watchdog.restore().unwrap();
    assert_eq!(restored.url, "https://gdai.example.com/workflows/7/steps/2");
    assert!(watchdog.restore().is_none());
    assert!(storage.is_empty());
}

#[test]
fn test_route_guard_protects_application_paths() {
    let guard = RouteGuard::new("https://gdai.example.com").unwrap();

    assert!(matches!(
        guard.check("/workflows/7", None),
        GuardDecision::Redirect(url) if url.as_str() == "https://gdai.example.com/api/auth/signin"
    ));
    assert_eq!(guard.check("/api/auth/callback/azure-ad", None), GuardDecision::Allow);
}

#[test]
fn test_orchestrator_from_environment_settings() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("AUTH_MICROSOFT_ENTRA_ID_ID", "client-1"),
        ("AUTH_MICROSOFT_ENTRA_ID_SECRET", "client-secret"),
        (
            "AUTH_MICROSOFT_ENTRA_ID_ISSUER",
            "https://login.microsoftonline.com/tenant-1/v2.0",
        ),
        ("SNOWFLAKE_ACCOUNT", "acme-xy12345"),
        ("SNOWFLAKE_DEV_AUTH", "true"),
        ("SNOWFLAKE_PRIVATE_KEY_PATH", "/keys/rsa_key.p8"),
    ]);
    let settings =
        AuthSettings::from_lookup(|key| vars.get(key).map(|value| value.to_string())).unwrap();

    let orchestrator = SessionOrchestrator::from_settings(&settings).unwrap();

    assert_eq!(
        orchestrator.registry().ids(),
        vec![key_pair::PROVIDER_ID, entra::PROVIDER_ID]
    );
}
