//! Relational schema
//!
//! ```text
//! streams(id, name, source, units, brick_uri, brick_class)   UNIQUE (source, name)
//! readings(time, stream_id, value)                           UNIQUE (time, stream_id)
//! triples(source, origin, time, s, p, o)                     UNIQUE (all six)
//! authorizations(apikey, permission, source)
//! unified = readings JOIN streams
//! ```

use crate::error::{HybridError, HybridResult};
use sqlx::PgPool;
use tracing::info;

// Serializes concurrent bootstraps of the same database.
const SCHEMA_LOCK_KEY: i64 = 0x6f78_6879_6272_6964;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS streams (
    id          BIGSERIAL PRIMARY KEY,
    name        TEXT NOT NULL,
    source      TEXT NOT NULL,
    units       TEXT,
    brick_uri   TEXT,
    brick_class TEXT,
    UNIQUE (source, name)
);

CREATE INDEX IF NOT EXISTS streams_brick_uri_idx ON streams (brick_uri);

CREATE TABLE IF NOT EXISTS readings (
    time      TIMESTAMPTZ NOT NULL,
    stream_id BIGINT NOT NULL REFERENCES streams (id),
    value     DOUBLE PRECISION NOT NULL,
    UNIQUE (time, stream_id)
);

CREATE TABLE IF NOT EXISTS triples (
    source TEXT NOT NULL,
    origin TEXT NOT NULL,
    time   TIMESTAMPTZ NOT NULL,
    s      TEXT NOT NULL,
    p      TEXT NOT NULL,
    o      TEXT NOT NULL,
    UNIQUE (source, origin, time, s, p, o)
);

CREATE INDEX IF NOT EXISTS triples_source_origin_time_idx ON triples (source, origin, time);

CREATE TABLE IF NOT EXISTS authorizations (
    apikey     TEXT NOT NULL,
    permission TEXT NOT NULL,
    source     TEXT NOT NULL,
    UNIQUE (apikey, permission, source)
);

CREATE OR REPLACE VIEW unified AS
    SELECT r.time, r.value, r.stream_id, s.name, s.source, s.units, s.brick_uri, s.brick_class
    FROM readings r JOIN streams s ON s.id = r.stream_id;

DO $$
BEGIN
    IF EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'timescaledb') THEN
        PERFORM create_hypertable('readings', 'time', if_not_exists => TRUE, migrate_data => TRUE);
    END IF;
END
$$;
"#;

/// Create tables, constraints and the `unified` view if missing
pub async fn ensure_schema(pool: &PgPool) -> HybridResult<()> {
    let mut txn = pool
        .begin()
        .await
        .map_err(|e| HybridError::transaction("schema: begin", e))?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *txn)
        .await
        .map_err(|e| HybridError::transaction("schema: lock", e))?;
    sqlx::raw_sql(SCHEMA)
        .execute(&mut *txn)
        .await
        .map_err(|e| HybridError::transaction("schema: create", e))?;
    txn.commit()
        .await
        .map_err(|e| HybridError::transaction("schema: commit", e))?;
    info!("Hybrid schema ready");
    Ok(())
}
