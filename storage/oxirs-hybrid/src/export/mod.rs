//! Streaming export of readings
//!
//! An export resolves the requested streams, writes one metadata frame and
//! then streams matching readings into data frames, all inside a single LZ4
//! stream owned by the call. Rows are pulled from the database one at a time
//! and at most `flush_rows` of them are buffered.
//!
//! Exports are not authorized: any caller may read any source.

pub mod aggregate;
pub mod frame;

pub use aggregate::{AggregationFunction, AggregationSpec};
pub use frame::{data_schema, metadata_schema, DataSummary, ExportWriter, StreamMetadata};

use crate::error::{HybridError, HybridResult};
use crate::model::{Query, Resolution, StreamId};
use crate::reasoner::SparqlEndpoint;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::postgres::types::PgInterval;
use sqlx::PgPool;
use std::io::Write;
use tracing::{debug, info, instrument};

const RAW_READINGS: &str = "\
SELECT time, value, COALESCE(brick_uri, name) AS label
FROM unified
WHERE time >= $1 AND time <= $2 AND stream_id = ANY($3)
ORDER BY stream_id, time";

const STREAM_METADATA: &str = "\
SELECT DISTINCT id, brick_class, brick_uri, units, name
FROM streams WHERE id = ANY($1)
ORDER BY id";

/// What an export wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Resolved stream ids
    pub stream_ids: Vec<StreamId>,
    /// Rows in the metadata frame
    pub metadata_rows: usize,
    /// Rows across all data frames
    pub data_rows: u64,
    /// Number of data frames, including the final one
    pub data_frames: u64,
}

/// SQL function that assigns rows to fixed-width buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucketing {
    /// TimescaleDB `time_bucket`
    TimeBucket,
    /// Core PostgreSQL `date_bin`, anchored where `time_bucket` anchors
    DateBin,
}

impl Bucketing {
    fn expression(self) -> &'static str {
        match self {
            Self::TimeBucket => "time_bucket($4, time)",
            Self::DateBin => "date_bin($4, time, TIMESTAMPTZ '2000-01-03 00:00:00+00')",
        }
    }

    /// `time_bucket` when TimescaleDB is installed, `date_bin` otherwise
    pub async fn detect(pool: &PgPool) -> HybridResult<Self> {
        let timescale: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'timescaledb')",
        )
        .fetch_one(pool)
        .await?;
        Ok(if timescale {
            Self::TimeBucket
        } else {
            Self::DateBin
        })
    }
}

fn aggregated_readings(aggregation: &AggregationSpec, bucketing: Bucketing) -> String {
    format!(
        "SELECT {} AS bucket, {} AS value, COALESCE(brick_uri, name) AS label
FROM unified
WHERE time >= $1 AND time <= $2 AND stream_id = ANY($3)
GROUP BY bucket, stream_id, brick_uri, name
ORDER BY stream_id, bucket",
        bucketing.expression(),
        aggregation.function.to_sql("value")
    )
}

/// Stream ids whose name or entity URI matches one of `uris`
pub async fn resolve_uris(
    pool: &PgPool,
    uris: &[String],
    sources: &[String],
) -> HybridResult<Vec<StreamId>> {
    if uris.is_empty() {
        return Ok(Vec::new());
    }
    let ids = if sources.is_empty() {
        sqlx::query_scalar(
            "SELECT id FROM streams WHERE (name = ANY($1) OR brick_uri = ANY($1)) ORDER BY id",
        )
        .bind(uris)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query_scalar(
            "SELECT id FROM streams WHERE (name = ANY($1) OR brick_uri = ANY($1)) AND source = ANY($2) ORDER BY id",
        )
        .bind(uris)
        .bind(sources)
        .fetch_all(pool)
        .await?
    };
    Ok(ids)
}

/// Resolve the streams an export covers
///
/// SPARQL text wins over explicit URIs, which win over explicit ids. A query
/// with none of them resolves to no streams.
pub async fn resolve_stream_ids(
    pool: &PgPool,
    reasoner: &dyn SparqlEndpoint,
    query: &Query,
) -> HybridResult<Vec<StreamId>> {
    match query.resolution() {
        Resolution::Sparql {
            graph,
            query: text,
            sources,
        } => {
            let uris = reasoner.query(graph, text).await?.uri_values();
            debug!("SPARQL query on graph {graph} bound {} uris", uris.len());
            resolve_uris(pool, &uris, sources).await
        }
        Resolution::Uris { uris, sources } => resolve_uris(pool, uris, sources).await,
        Resolution::Ids(ids) => Ok(ids.to_vec()),
        Resolution::Empty => Ok(Vec::new()),
    }
}

/// Identity and classification of the given streams, ordered by id
pub async fn fetch_metadata(pool: &PgPool, ids: &[StreamId]) -> HybridResult<Vec<StreamMetadata>> {
    let rows: Vec<(
        StreamId,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
    )> = sqlx::query_as(STREAM_METADATA)
        .bind(ids)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(id, brick_class, brick_uri, units, name)| StreamMetadata {
            id,
            brick_class,
            brick_uri,
            units,
            name,
        })
        .collect())
}

/// Write the export for `query` into `sink`
#[instrument(skip(pool, reasoner, query, sink), fields(start = %query.start, end = %query.end))]
pub async fn export<W>(
    pool: &PgPool,
    reasoner: &dyn SparqlEndpoint,
    query: &Query,
    sink: W,
    flush_rows: usize,
) -> HybridResult<ExportSummary>
where
    W: Write + Send,
{
    query.validate()?;
    if let Some(aggregation) = &query.aggregation {
        aggregation.validate()?;
    }

    let stream_ids = resolve_stream_ids(pool, reasoner, query).await?;
    debug!("Resolved {} stream ids", stream_ids.len());
    let metadata = fetch_metadata(pool, &stream_ids).await?;

    let aggregated = match &query.aggregation {
        Some(aggregation) => {
            let bucketing = Bucketing::detect(pool).await?;
            debug!("Aggregating with {bucketing:?}");
            Some(aggregated_readings(aggregation, bucketing))
        }
        None => None,
    };

    let mut writer = ExportWriter::new(sink, flush_rows);
    writer.write_metadata(&metadata)?;

    let mut frames = writer.data_frames()?;
    let mut rows = match (&query.aggregation, aggregated.as_deref()) {
        (Some(aggregation), Some(sql)) => {
            let window = PgInterval::try_from(aggregation.window).map_err(|e| {
                HybridError::validation(format!("aggregation window out of range: {e}"))
            })?;
            sqlx::query_as::<_, (DateTime<Utc>, f64, String)>(sql)
                .bind(query.start)
                .bind(query.end)
                .bind(&stream_ids)
                .bind(window)
                .fetch(pool)
        }
        _ => sqlx::query_as::<_, (DateTime<Utc>, f64, String)>(RAW_READINGS)
            .bind(query.start)
            .bind(query.end)
            .bind(&stream_ids)
            .fetch(pool),
    };

    while let Some((time, value, label)) = rows.try_next().await? {
        frames.push(time, value, &label)?;
    }
    drop(rows);

    let data = frames.finish()?;
    writer.finish()?;

    info!(
        "Exported {} rows in {} frames for {} streams",
        data.rows,
        data.frames,
        stream_ids.len()
    );
    Ok(ExportSummary {
        metadata_rows: metadata.len(),
        data_rows: data.rows,
        data_frames: data.frames,
        stream_ids,
    })
}
