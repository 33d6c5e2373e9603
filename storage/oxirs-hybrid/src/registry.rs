//! Stream identity registration
//!
//! Registration upserts `(source, name)` and, for classified streams, appends
//! the matching `rdf:type` statement to the triple log in the same
//! transaction.

use crate::auth::{self, Permission};
use crate::context::RequestContext;
use crate::error::{HybridError, HybridResult};
use crate::model::{Stream, StreamId};
use crate::store::run_in_transaction;
use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, instrument};

const UPSERT_STREAM: &str = "\
INSERT INTO streams (name, source, units, brick_uri, brick_class)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (source, name) DO UPDATE
SET units = EXCLUDED.units,
    brick_uri = EXCLUDED.brick_uri,
    brick_class = EXCLUDED.brick_class
RETURNING id, (xmax = 0) AS inserted";

// Only asserted when the latest version of this origin does not already say it.
const INSERT_CLASSIFICATION: &str = "\
INSERT INTO triples (source, origin, time, s, p, o)
SELECT $1::text, $2::text, $3::timestamptz, $4::text, $5::text, $6::text
WHERE NOT EXISTS (
    SELECT 1 FROM triples t
    WHERE t.source = $1 AND t.origin = $2 AND t.s = $4 AND t.p = $5 AND t.o = $6
      AND t.time = (SELECT MAX(time) FROM triples WHERE source = $1 AND origin = $2)
)
ON CONFLICT DO NOTHING";

/// Register or update `stream`, returning its id
///
/// The id is assigned on first registration and never changes; units and
/// classification are overwritten on re-registration.
#[instrument(skip(pool, ctx, stream), fields(source = %stream.source, name = %stream.name))]
pub async fn register_stream(
    pool: &PgPool,
    ctx: &RequestContext,
    stream: Stream,
) -> HybridResult<StreamId> {
    let stream = stream.normalized();
    stream
        .validate()
        .map_err(|e| HybridError::validation(format!("Cannot register invalid stream: {e}")))?;

    info!("Register stream {stream}");
    auth::require(pool, ctx, Permission::Write, &stream.source).await?;

    let description = stream.to_string();
    let (id, inserted, classified) = run_in_transaction(pool, move |txn| {
        Box::pin(async move {
            let (id, inserted): (StreamId, bool) = sqlx::query_as(UPSERT_STREAM)
                .bind(&stream.name)
                .bind(&stream.source)
                .bind(&stream.units)
                .bind(&stream.brick_uri)
                .bind(&stream.brick_class)
                .fetch_one(&mut **txn)
                .await
                .map_err(|e| HybridError::transaction("Could not register stream", e))?;

            let mut classified = false;
            if let Some(triple) = stream.classification_triple() {
                let res = sqlx::query(INSERT_CLASSIFICATION)
                    .bind(&stream.source)
                    .bind(stream.registration_origin())
                    .bind(Utc::now())
                    .bind(&triple.s)
                    .bind(&triple.p)
                    .bind(&triple.o)
                    .execute(&mut **txn)
                    .await
                    .map_err(|e| {
                        HybridError::transaction("Could not register stream classification", e)
                    })?;
                classified = res.rows_affected() > 0;
            }
            Ok((id, inserted, classified))
        })
    })
    .await?;

    if inserted {
        info!("Registered stream {description} as id {id}");
    } else {
        info!("Updated stream {description} (id {id})");
    }
    if classified {
        info!("Asserted classification for stream id {id}");
    }
    Ok(id)
}
