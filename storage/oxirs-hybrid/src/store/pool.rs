//! Bounded connection pool

use crate::config::DatabaseConfig;
use crate::error::HybridResult;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{info, warn};

fn connect_options(db: &DatabaseConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&db.host)
        .port(db.port)
        .username(&db.user)
        .password(&db.password)
        .database(&db.database)
        .application_name("oxirs-hybrid")
}

fn pool_options(db: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(db.max_connections)
        .idle_timeout(Some(db.idle_timeout))
        .max_lifetime(Some(db.max_lifetime))
}

/// Open a pool, failing if the database is unreachable
pub async fn connect(db: &DatabaseConfig) -> HybridResult<PgPool> {
    let pool = pool_options(db).connect_with(connect_options(db)).await?;
    info!("Connected to postgres at {}:{}", db.host, db.port);
    Ok(pool)
}

/// Build a pool that connects on first use
pub fn connect_lazy(db: &DatabaseConfig) -> PgPool {
    pool_options(db).connect_lazy_with(connect_options(db))
}

/// Startup bootstrap: retry with fixed backoff until the database answers
///
/// Only meant for process startup. Operations never call this.
pub async fn connect_with_retry(db: &DatabaseConfig) -> PgPool {
    loop {
        match connect(db).await {
            Ok(pool) => return pool,
            Err(err) => {
                warn!(
                    "Failed to connect to database ({err}); retrying in {:?}",
                    db.connect_retry_interval
                );
                tokio::time::sleep(db.connect_retry_interval).await;
            }
        }
    }
}
