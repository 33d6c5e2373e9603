//! Historical reading ingestion

use super::IngestStats;
use crate::auth::{self, Permission};
use crate::context::RequestContext;
use crate::error::{HybridError, HybridResult};
use crate::model::{DataPoint, Dataset, StreamId};
use crate::store::copy::copy_rows;
use crate::store::run_in_transaction;
use sqlx::PgPool;
use tracing::{info, instrument};

const CREATE_STAGING: &str = "\
CREATE TEMP TABLE readings_staging (
    seq       BIGINT GENERATED ALWAYS AS IDENTITY,
    time      TIMESTAMPTZ NOT NULL,
    stream_id BIGINT NOT NULL,
    value     DOUBLE PRECISION NOT NULL
)";

const COPY_STAGING: &str = "COPY readings_staging (time, stream_id, value) FROM STDIN";

// Within one batch the last occurrence of a (time, stream) pair wins.
const MERGE_STAGING: &str = "\
INSERT INTO readings (time, stream_id, value)
SELECT DISTINCT ON (time, stream_id) time, stream_id, value
FROM readings_staging
ORDER BY time, stream_id, seq DESC
ON CONFLICT (time, stream_id) DO UPDATE SET value = EXCLUDED.value";

const DROP_STAGING: &str = "DROP TABLE readings_staging";

/// Upsert readings for an existing stream
///
/// The stream must already be registered; readings never create streams.
/// Readings are pulled from the dataset lazily while they are copied.
#[instrument(skip(pool, ctx, dataset), fields(source = %dataset.source, name = %dataset.name))]
pub async fn insert_readings<I>(
    pool: &PgPool,
    ctx: &RequestContext,
    dataset: Dataset<I>,
) -> HybridResult<IngestStats>
where
    I: IntoIterator<Item = DataPoint> + Send + 'static,
    I::IntoIter: Send,
{
    dataset
        .validate()
        .map_err(|e| HybridError::validation(format!("Cannot handle invalid dataset: {e}")))?;
    auth::require(pool, ctx, Permission::Write, &dataset.source).await?;

    let Dataset {
        source,
        name,
        readings,
    } = dataset;
    let label = format!("{source}/{name}");

    let stats = run_in_transaction(pool, move |txn| {
        Box::pin(async move {
            let stream_id: StreamId =
                sqlx::query_scalar("SELECT id FROM streams WHERE source = $1 AND name = $2")
                    .bind(&source)
                    .bind(&name)
                    .fetch_optional(&mut **txn)
                    .await
                    .map_err(|e| HybridError::transaction("resolve stream", e))?
                    .ok_or_else(|| HybridError::NotFound {
                        source_name: source.clone(),
                        name: name.clone(),
                    })?;

            let stage = |what: &str| format!("Cannot insert readings for id {stream_id} ({what})");

            sqlx::query(CREATE_STAGING)
                .execute(&mut **txn)
                .await
                .map_err(|e| HybridError::transaction(stage("temp create"), e))?;

            let staged = copy_rows(
                &mut **txn,
                COPY_STAGING,
                readings.into_iter(),
                |buf, point: DataPoint| {
                    buf.timestamp(point.timestamp)
                        .int(stream_id)
                        .float(point.value);
                    Ok(())
                },
            )
            .await?;

            let applied = sqlx::query(MERGE_STAGING)
                .execute(&mut **txn)
                .await
                .map_err(|e| HybridError::transaction(stage("merge"), e))?
                .rows_affected();

            sqlx::query(DROP_STAGING)
                .execute(&mut **txn)
                .await
                .map_err(|e| HybridError::transaction(stage("drop temp"), e))?;

            Ok(IngestStats { staged, applied })
        })
    })
    .await?;

    info!("Inserted {:5} readings: {label}", stats.staged);
    Ok(stats)
}
