//! Shared helpers for tests against a live PostgreSQL
//!
//! Tests connect to `OXIRS_HYBRID_TEST_DATABASE_URL` and skip when it is
//! unset. Every test works in its own uniquely named sources.
#![allow(dead_code)]

use arrow::array::{Array, Float64Array, Int64Array, StringArray, TimestampNanosecondArray};
use arrow::ipc::reader::StreamReader;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use lz4_flex::frame::FrameDecoder;
use oxirs_hybrid::reasoner::SparqlBinding;
use oxirs_hybrid::{
    HybridConfig, HybridDatabase, HybridResult, Permission, SparqlEndpoint, SparqlResults,
    SparqlValue,
};
use sqlx::postgres::PgPoolOptions;
use std::io::{self, Read};
use std::sync::Arc;

pub const TEST_DATABASE_URL: &str = "OXIRS_HYBRID_TEST_DATABASE_URL";

/// Connect with `max_connections` and bootstrap the schema, or skip
pub async fn database_with(
    config: HybridConfig,
    reasoner: Arc<dyn SparqlEndpoint>,
    max_connections: u32,
) -> Option<HybridDatabase> {
    let Ok(url) = std::env::var(TEST_DATABASE_URL) else {
        eprintln!("{TEST_DATABASE_URL} not set; skipping");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&url)
        .await
        .expect("connect to test database");
    let db = HybridDatabase::from_parts(pool, reasoner, config);
    db.ensure_schema().await.expect("bootstrap schema");
    Some(db)
}

pub async fn database() -> Option<HybridDatabase> {
    database_with(HybridConfig::default(), Arc::new(StaticEndpoint::default()), 5).await
}

pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

/// Grant `permission` on `source` to `apikey`
pub async fn grant(db: &HybridDatabase, apikey: &str, permission: Permission, source: &str) {
    sqlx::query("INSERT INTO authorizations (apikey, permission, source) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING")
        .bind(apikey)
        .bind(permission.as_str())
        .bind(source)
        .execute(db.pool())
        .await
        .expect("insert grant");
}

pub async fn count(db: &HybridDatabase, sql: &str, source: &str) -> i64 {
    sqlx::query_scalar(sql)
        .bind(source)
        .fetch_one(db.pool())
        .await
        .expect("count rows")
}

/// Binds `uris` as `?point`; query `i` (as text) yields `i + 1` solutions otherwise
#[derive(Default)]
pub struct StaticEndpoint {
    pub uris: Vec<String>,
}

#[async_trait]
impl SparqlEndpoint for StaticEndpoint {
    async fn query(&self, _graph: &str, query: &str) -> HybridResult<SparqlResults> {
        let bindings = match query.trim().parse::<usize>() {
            Ok(index) => vec![SparqlBinding::new(); index + 1],
            Err(_) => self
                .uris
                .iter()
                .map(|uri| {
                    let mut binding = SparqlBinding::new();
                    binding.insert("point".to_string(), SparqlValue::uri(uri.clone()));
                    binding
                })
                .collect(),
        };
        Ok(SparqlResults::from_bindings(
            vec!["point".to_string()],
            bindings,
        ))
    }
}

struct OneByte<R>(R);

impl<R: Read> Read for OneByte<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match buf.first_mut() {
            Some(slot) => self.0.read(std::slice::from_mut(slot)),
            None => Ok(0),
        }
    }
}

/// Decompress an export into (metadata batches, data batches)
pub fn decode_export(bytes: &[u8]) -> (Vec<RecordBatch>, Vec<RecordBatch>) {
    let mut decoder = OneByte(FrameDecoder::new(bytes));
    let metadata = StreamReader::try_new(&mut decoder, None)
        .expect("metadata stream")
        .collect::<Result<Vec<_>, _>>()
        .expect("metadata batches");
    let data = StreamReader::try_new(&mut decoder, None)
        .expect("data stream")
        .collect::<Result<Vec<_>, _>>()
        .expect("data batches");
    (metadata, data)
}

/// `(nanos, value, label)` rows across all data batches
pub fn data_rows(batches: &[RecordBatch]) -> Vec<(i64, f64, String)> {
    let mut rows = Vec::new();
    for batch in batches {
        let times = batch
            .column(0)
            .as_any()
            .downcast_ref::<TimestampNanosecondArray>()
            .expect("time column");
        let values = batch
            .column(1)
            .as_any()
            .downcast_ref::<Float64Array>()
            .expect("value column");
        let labels = batch
            .column(2)
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("id column");
        for i in 0..batch.num_rows() {
            rows.push((times.value(i), values.value(i), labels.value(i).to_string()));
        }
    }
    rows
}

/// Stream ids listed in the metadata batches
pub fn metadata_ids(batches: &[RecordBatch]) -> Vec<i64> {
    let mut ids = Vec::new();
    for batch in batches {
        let column = batch
            .column(4)
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("stream_id column");
        ids.extend((0..column.len()).map(|i| column.value(i)));
    }
    ids
}
