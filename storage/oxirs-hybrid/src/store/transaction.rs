//! Run work inside a pooled transaction

use crate::error::{HybridError, HybridResult};
use futures::future::BoxFuture;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::error;

/// Transaction handle passed to transactional work
pub type PgTransaction = Transaction<'static, Postgres>;

/// Execute `work` in a transaction on a pooled connection
///
/// Commits when `work` succeeds and rolls back when it fails. A failed
/// rollback is reported as [`HybridError::Rollback`], carrying both errors.
///
/// ```ignore
/// let id = run_in_transaction(&pool, move |txn| {
///     Box::pin(async move {
///         let id: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&mut **txn).await?;
///         Ok(id)
///     })
/// })
/// .await?;
/// ```
pub async fn run_in_transaction<T, F>(pool: &PgPool, work: F) -> HybridResult<T>
where
    T: Send,
    F: for<'c> FnOnce(&'c mut PgTransaction) -> BoxFuture<'c, HybridResult<T>> + Send,
{
    let mut txn = pool
        .begin()
        .await
        .map_err(|e| HybridError::transaction("could not begin transaction", e))?;

    match work(&mut txn).await {
        Ok(value) => {
            txn.commit()
                .await
                .map_err(|e| HybridError::transaction("commit", e))?;
            Ok(value)
        }
        Err(err) => match txn.rollback().await {
            Ok(()) => Err(err),
            Err(rollback) => {
                error!("Could not roll back after '{err}': {rollback}");
                Err(HybridError::Rollback {
                    original: Box::new(err),
                    rollback,
                })
            }
        },
    }
}
