//! Warehouse SQL API connector
//!
//! Implements [`WarehouseConnector`] over the warehouse's HTTP statement
//! endpoint (`POST /api/v2/statements`). A "connection" is a validated bearer
//! credential: OAuth access tokens are sent as-is, key-pair credentials are
//! exchanged for a freshly minted JWT. `connect` checks the credential with a
//! trivial statement so that bad credentials surface as connection errors.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use super::keypair::KeyPairSigner;
use super::{
    BindValue, Row, WarehouseAuth, WarehouseConnection, WarehouseConnector, WarehouseError,
};
use crate::config::{ConfigError, WarehouseConfig};

/// Header naming the kind of bearer token presented
const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";

/// Statement used to validate a credential at connect time
const CONNECTIVITY_CHECK: &str = "SELECT 1";

/// Server-side statement timeout in seconds
const STATEMENT_TIMEOUT_SECS: u64 = 60;

/// Connector for the warehouse SQL API
#[derive(Clone)]
pub struct SqlApiConnector {
    statements_url: Url,
    account: String,
    http_client: reqwest::Client,
}

impl fmt::Debug for SqlApiConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlApiConnector")
            .field("statements_url", &self.statements_url.as_str())
            .field("account", &self.account)
            .field("http_client", &"<reqwest::Client>")
            .finish()
    }
}

impl SqlApiConnector {
    /// Create a connector from warehouse settings
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the base URL cannot be derived or the HTTP
    /// client cannot be built.
    pub fn new(config: &WarehouseConfig) -> Result<Self, ConfigError> {
        let statements_url = config
            .base_url()?
            .join("api/v2/statements")
            .map_err(|e| ConfigError::Invalid {
                key: crate::config::ENV_WAREHOUSE_HOST,
                reason: e.to_string(),
            })?;

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(STATEMENT_TIMEOUT_SECS + 15))
            .user_agent(format!("gdai-auth/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::Invalid {
                key: crate::config::ENV_WAREHOUSE_HOST,
                reason: e.to_string(),
            })?;

        Ok(Self {
            statements_url,
            account: config.account.clone().unwrap_or_default(),
            http_client,
        })
    }

    fn bearer_for(
        &self,
        auth: &WarehouseAuth,
    ) -> Result<(SecretString, &'static str), WarehouseError> {
        match auth {
            WarehouseAuth::OAuth { token } => Ok((token.clone(), "OAUTH")),
            WarehouseAuth::KeyPair(credential) => {
                let signer = KeyPairSigner::load(
                    &credential.private_key_path,
                    credential.passphrase.as_ref(),
                )
                .map_err(|e| WarehouseError::Connection(e.to_string()))?;
                let jwt = signer
                    .mint(&self.account, &credential.username, Utc::now())
                    .map_err(|e| WarehouseError::Connection(e.to_string()))?;
                Ok((SecretString::new(jwt), "KEYPAIR_JWT"))
            }
        }
    }
}

#[async_trait]
impl WarehouseConnector for SqlApiConnector {
    async fn connect(
        &self,
        auth: &WarehouseAuth,
    ) -> Result<Box<dyn WarehouseConnection>, WarehouseError> {
        let (bearer, token_type) = self.bearer_for(auth)?;

        let conn = SqlApiConnection {
            statements_url: self.statements_url.clone(),
            http_client: self.http_client.clone(),
            bearer: Mutex::new(Some(bearer)),
            token_type,
            closed: AtomicBool::new(false),
        };

        conn.execute(CONNECTIVITY_CHECK, &[])
            .await
            .map_err(|e| WarehouseError::Connection(e.to_string()))?;

        Ok(Box::new(conn))
    }
}

/// Validated SQL API credential
struct SqlApiConnection {
    statements_url: Url,
    http_client: reqwest::Client,
    bearer: Mutex<Option<SecretString>>,
    token_type: &'static str,
    closed: AtomicBool,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    #[serde(rename = "resultSetMetaData")]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Deserialize)]
struct ResultSetMetaData {
    #[serde(rename = "rowType", default)]
    row_type: Vec<ColumnType>,
}

#[derive(Debug, Deserialize)]
struct ColumnType {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct StatementError {
    message: Option<String>,
    code: Option<String>,
}

#[async_trait]
impl WarehouseConnection for SqlApiConnection {
    async fn execute(&self, sql: &str, binds: &[BindValue]) -> Result<Vec<Row>, WarehouseError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WarehouseError::Closed);
        }
        let bearer = self
            .bearer
            .lock()
            .as_ref()
            .map(|b| b.expose_secret().clone())
            .ok_or(WarehouseError::Closed)?;

        let mut body = json!({
            "statement": sql,
            "timeout": STATEMENT_TIMEOUT_SECS,
        });
        if !binds.is_empty() {
            body["bindings"] = bindings(binds);
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let response = self
            .http_client
            .post(self.statements_url.clone())
            .query(&[("requestId", request_id.as_str())])
            .bearer_auth(bearer)
            .header(TOKEN_TYPE_HEADER, self.token_type)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| WarehouseError::Query(format!("Statement request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::ACCEPTED {
            return Err(WarehouseError::Query(
                "Statement did not complete within the timeout".to_string(),
            ));
        }
        if !status.is_success() {
            let detail = response
                .json::<StatementError>()
                .await
                .ok()
                .map(|e| {
                    format!(
                        "{} {}",
                        e.code.unwrap_or_default(),
                        e.message.unwrap_or_default()
                    )
                })
                .unwrap_or_default();
            return Err(WarehouseError::Query(format!(
                "Statement endpoint returned {status}: {}",
                detail.trim()
            )));
        }

        let parsed = response
            .json::<StatementResponse>()
            .await
            .map_err(|e| {
                WarehouseError::Query(format!("Failed to parse statement response: {e}"))
            })?;

        let rows = to_rows(parsed);
        debug!(rows = rows.len(), "Statement completed");
        Ok(rows)
    }

    async fn destroy(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            warn!("Warehouse connection destroyed twice");
            return;
        }
        self.bearer.lock().take();
    }
}

fn bindings(binds: &[BindValue]) -> Value {
    let mut map = serde_json::Map::new();
    for (index, bind) in binds.iter().enumerate() {
        let (kind, value) = match bind {
            BindValue::Text(v) => ("TEXT", v.clone()),
            BindValue::Fixed(v) => ("FIXED", v.to_string()),
            BindValue::Boolean(v) => ("BOOLEAN", v.to_string()),
        };
        map.insert(
            (index + 1).to_string(),
            json!({ "type": kind, "value": value }),
        );
    }
    Value::Object(map)
}

fn to_rows(response: StatementResponse) -> Vec<Row> {
    let columns = response
        .result_set_meta_data
        .map(|meta| meta.row_type)
        .unwrap_or_default();

    response
        .data
        .into_iter()
        .map(|cells| {
            columns
                .iter()
                .zip(cells)
                .map(|(column, cell)| (column.name.clone(), coerce(&column.kind, cell)))
                .collect()
        })
        .collect()
}

/// The SQL API returns every cell as a string; restore JSON types by column type
fn coerce(kind: &str, cell: Option<String>) -> Value {
    let Some(raw) = cell else {
        return Value::Null;
    };
    match kind.to_ascii_lowercase().as_str() {
        "boolean" => match raw.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw),
        },
        "fixed" => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(raw)),
        "real" => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(raw)),
        _ => Value::String(raw),
    }
}
