//! Triple log ingestion
//!
//! The triple log is append-only: re-inserting an identical
//! `(source, origin, time, s, p, o)` row is a no-op.

use super::IngestStats;
use crate::auth::{self, Permission};
use crate::context::RequestContext;
use crate::error::{HybridError, HybridResult};
use crate::model::{TripleDataset, TripleRecord};
use crate::store::copy::copy_rows;
use crate::store::run_in_transaction;
use sqlx::PgPool;
use tracing::{info, instrument};

const CREATE_STAGING: &str = "\
CREATE TEMP TABLE triples_staging (
    source TEXT NOT NULL,
    origin TEXT NOT NULL,
    time   TIMESTAMPTZ NOT NULL,
    s      TEXT NOT NULL,
    p      TEXT NOT NULL,
    o      TEXT NOT NULL
)";

const COPY_STAGING: &str = "COPY triples_staging (source, origin, time, s, p, o) FROM STDIN";

const MERGE_STAGING: &str = "\
INSERT INTO triples (source, origin, time, s, p, o)
SELECT source, origin, time, s, p, o FROM triples_staging
ON CONFLICT (source, origin, time, s, p, o) DO NOTHING";

const DROP_STAGING: &str = "DROP TABLE triples_staging";

/// Append a batch of triples to the log of `dataset.source`
///
/// Triples need no registered stream. A row with an empty term aborts the
/// whole batch.
#[instrument(skip(pool, ctx, dataset), fields(source = %dataset.source, origin = %dataset.origin))]
pub async fn add_triples<I>(
    pool: &PgPool,
    ctx: &RequestContext,
    dataset: TripleDataset<I>,
) -> HybridResult<IngestStats>
where
    I: IntoIterator<Item = TripleRecord> + Send + 'static,
    I::IntoIter: Send,
{
    dataset
        .validate()
        .map_err(|e| HybridError::validation(format!("Cannot handle invalid dataset: {e}")))?;
    auth::require(pool, ctx, Permission::Write, &dataset.source).await?;

    let TripleDataset {
        source,
        origin,
        time,
        triples,
    } = dataset;

    let stats = run_in_transaction(pool, move |txn| {
        Box::pin(async move {
            let stage =
                |what: &str| format!("Cannot insert triples for source {source} ({what})");

            sqlx::query(CREATE_STAGING)
                .execute(&mut **txn)
                .await
                .map_err(|e| HybridError::transaction(stage("temp create"), e))?;

            let staged = copy_rows(
                &mut **txn,
                COPY_STAGING,
                triples.into_iter(),
                |buf, triple: TripleRecord| {
                    triple.validate()?;
                    buf.text(&source)
                        .text(&origin)
                        .timestamp(time)
                        .text(&triple.s)
                        .text(&triple.p)
                        .text(&triple.o);
                    Ok(())
                },
            )
            .await?;

            let applied = sqlx::query(MERGE_STAGING)
                .execute(&mut **txn)
                .await
                .map_err(|e| HybridError::transaction(stage("copy over"), e))?
                .rows_affected();

            sqlx::query(DROP_STAGING)
                .execute(&mut **txn)
                .await
                .map_err(|e| HybridError::transaction(stage("drop temp"), e))?;

            Ok(IngestStats { staged, applied })
        })
    })
    .await?;

    info!(
        "Inserted {:5} triples ({} new)",
        stats.staged, stats.applied
    );
    Ok(stats)
}
