//! Capability checks against the `authorizations` relation
//!
//! Only write paths consult the gate. Reads (export, graph snapshots,
//! qualification) are not authorized.

use crate::context::RequestContext;
use crate::error::{AuthError, HybridResult};
use sqlx::PgPool;
use std::fmt;
use tracing::warn;

/// Permission named in an authorization grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Read access
    Read,
    /// Write access
    Write,
}

impl Permission {
    /// Value stored in the `permission` column
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the caller holds `permission` on `source`
///
/// A context without an API key fails with [`AuthError::MissingIdentity`]
/// before the database is touched.
pub async fn check_authorized(
    pool: &PgPool,
    ctx: &RequestContext,
    permission: Permission,
    source: &str,
) -> HybridResult<bool> {
    let apikey = ctx.api_key().ok_or(AuthError::MissingIdentity)?;
    let grants: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM authorizations WHERE apikey = $1 AND permission = $2 AND source = $3",
    )
    .bind(apikey.as_str())
    .bind(permission.as_str())
    .bind(source)
    .fetch_one(pool)
    .await?;
    Ok(grants > 0)
}

/// Fail with [`AuthError::Denied`] unless the caller holds `permission` on `source`
pub async fn require(
    pool: &PgPool,
    ctx: &RequestContext,
    permission: Permission,
    source: &str,
) -> HybridResult<()> {
    if check_authorized(pool, ctx, permission, source).await? {
        Ok(())
    } else {
        warn!("Cannot {permission} to source: {source}");
        Err(AuthError::Denied {
            permission: permission.to_string(),
            source_name: source.to_string(),
        }
        .into())
    }
}
