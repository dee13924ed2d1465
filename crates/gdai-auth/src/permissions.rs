//! Permission Resolver
//!
//! Derives the [`PermissionTier`] of a user by asking the warehouse whether the
//! configured elevated role is active in the user's session. Every failure
//! collapses to [`PermissionTier::Standard`]; nothing here returns an error.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::DEFAULT_ELEVATED_ROLE;
use crate::types::PermissionTier;
use crate::warehouse::{
    BindValue, ScopedConnection, WarehouseAuth, WarehouseConnection, WarehouseConnector,
    WarehouseError,
};

/// Column the role-membership statement projects
pub const ELEVATED_COLUMN: &str = "IS_ELEVATED";

/// Role-membership statement; the role name is bound, not interpolated
pub const ROLE_QUERY: &str = "SELECT IS_ROLE_IN_SESSION(?) AS IS_ELEVATED";

/// Resolves permission tiers through the warehouse
#[derive(Debug, Clone)]
pub struct PermissionResolver {
    connector: Arc<dyn WarehouseConnector>,
    elevated_role: String,
}

impl PermissionResolver {
    /// Create a resolver checking `elevated_role` (uppercased)
    pub fn new(connector: Arc<dyn WarehouseConnector>, elevated_role: &str) -> Self {
        Self {
            connector,
            elevated_role: elevated_role.to_uppercase(),
        }
    }

    /// Create a resolver checking [`DEFAULT_ELEVATED_ROLE`]
    pub fn with_default_role(connector: Arc<dyn WarehouseConnector>) -> Self {
        Self::new(connector, DEFAULT_ELEVATED_ROLE)
    }

    /// Role name checked for the elevated tier
    pub fn elevated_role(&self) -> &str {
        &self.elevated_role
    }

    /// Connector used for resolutions
    pub fn connector(&self) -> &dyn WarehouseConnector {
        self.connector.as_ref()
    }

    /// Resolve the tier with a connection owned end-to-end by this call.
    ///
    /// The connection is opened with `auth`, queried once and destroyed before
    /// returning, whatever the outcome. Fails closed.
    pub async fn resolve_tier(&self, auth: &WarehouseAuth) -> PermissionTier {
        let scoped = match ScopedConnection::open(self.connector.as_ref(), auth).await {
            Ok(scoped) => scoped,
            Err(e) => {
                warn!(
                    error = %e,
                    "Permission resolution could not connect; defaulting to standard"
                );
                return PermissionTier::Standard;
            }
        };

        let tier = match scoped.connection() {
            Ok(conn) => self.resolve_tier_on(conn).await,
            Err(_) => PermissionTier::Standard,
        };

        scoped.release().await;
        tier
    }

    /// Resolve the tier on a connection the caller owns and will destroy.
    /// Fails closed.
    pub async fn resolve_tier_on(&self, conn: &dyn WarehouseConnection) -> PermissionTier {
        match self.query_elevated(conn).await {
            Ok(tier) => {
                debug!(tier = %tier, role = %self.elevated_role, "Resolved permission tier");
                tier
            }
            Err(e) => {
                warn!(error = %e, "Permission query failed; defaulting to standard");
                PermissionTier::Standard
            }
        }
    }

    async fn query_elevated(
        &self,
        conn: &dyn WarehouseConnection,
    ) -> Result<PermissionTier, WarehouseError> {
        let rows = conn
            .execute(ROLE_QUERY, &[BindValue::Text(self.elevated_role.clone())])
            .await?;

        Ok(tier_from_rows(&rows))
    }
}

/// Only an explicit boolean `true` in the first row grants the elevated tier
pub fn tier_from_rows(rows: &[crate::warehouse::Row]) -> PermissionTier {
    match rows.first().and_then(|row| row.get(ELEVATED_COLUMN)) {
        Some(Value::Bool(true)) => PermissionTier::Elevated,
        _ => PermissionTier::Standard,
    }
}
