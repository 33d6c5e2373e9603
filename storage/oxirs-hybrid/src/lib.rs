//! Hybrid time-series and RDF metadata storage for OxiRS
//!
//! This crate puts a transactional PostgreSQL (optionally TimescaleDB)
//! reading store and an append-only RDF triple log behind one API, and
//! delegates graph queries to an external SPARQL reasoner.
//!
//! # Features
//!
//! - **Stream registry** - `(source, name)` identities with stable ids and
//!   automatic `rdf:type` assertions for classified streams
//! - **Staged bulk ingestion** - readings and triples are `COPY`ed into
//!   transaction-local staging tables and merged atomically
//! - **Streaming export** - Arrow IPC frames inside a single LZ4 stream,
//!   optionally aggregated into fixed-width time buckets
//! - **As-of graphs** - snapshots derived from the triple log per origin
//! - **Qualification** - queries fanned out over every named graph by a
//!   bounded worker pool with partial-failure results
//! - **Write authorization** - per-source API key grants
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   HybridDatabase                     │
//! ├──────────────────────────────────────────────────────┤
//! │  registry   ingest   export   graph   qualify        │
//! │      │         │        │       │         │          │
//! │      └────┬────┘        │       │         │          │
//! │       auth gate         │       │         │          │
//! │           │             │       │         │          │
//! │  ┌────────▼─────────────▼───────▼──┐  ┌───▼───────┐  │
//! │  │ PgPool: streams, readings,      │  │ Reasoner  │  │
//! │  │ triples, authorizations         │  │ (SPARQL)  │  │
//! │  └─────────────────────────────────┘  └───────────┘  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use chrono::{Duration, Utc};
//! use oxirs_hybrid::{
//!     DataPoint, Dataset, HybridConfig, HybridDatabase, Query, RequestContext, Stream,
//! };
//!
//! # async fn run() -> oxirs_hybrid::HybridResult<()> {
//! let db = HybridDatabase::connect(HybridConfig::insecure_defaults()).await?;
//! db.ensure_schema().await?;
//!
//! let ctx = RequestContext::with_api_key("my-key");
//! let id = db
//!     .register_stream(&ctx, Stream::new("bldg1", "temp1").with_units("F"))
//!     .await?;
//!
//! let t0 = Utc::now();
//! db.insert_readings(&ctx, Dataset::new("bldg1", "temp1", vec![DataPoint::new(t0, 70.1)]))
//!     .await?;
//!
//! let mut out = Vec::new();
//! let query = Query::for_ids(vec![id], t0 - Duration::seconds(1), t0 + Duration::seconds(1));
//! db.export(&ctx, &query, &mut out).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Export wire format
//!
//! One LZ4 frame stream holding two Arrow IPC streams: a metadata stream with
//! a single batch (`brick_class`, `brick_uri`, `units`, `name`, `stream_id`)
//! followed by a data stream of `(time, value, id)` batches of at most
//! `export.flush_rows` rows, always ending with one final batch.

/// Write authorization against the `authorizations` relation.
pub mod auth;
/// Configuration for the database, reasoner and operation deadlines.
pub mod config;
/// Per-call identity, cancellation and deadlines.
pub mod context;
/// Error types and result aliases.
pub mod error;
/// Arrow/LZ4 export of readings.
pub mod export;
/// As-of graph snapshots from the triple log.
pub mod graph;
/// The `HybridDatabase` facade.
pub mod hybrid;
/// Staged bulk ingestion of readings and triples.
pub mod ingest;
/// Streams, readings, triple batches and requests.
pub mod model;
/// Query fan-out across named graphs.
pub mod qualify;
/// SPARQL reasoner client.
pub mod reasoner;
/// Stream registration.
pub mod registry;
/// Connection pool, transactions, schema and COPY staging.
pub mod store;

// Re-exports
pub use auth::Permission;
pub use config::{
    DatabaseConfig, ExportConfig, HybridConfig, QualifyConfig, ReasonerConfig, TimeoutConfig,
};
pub use context::{ApiKey, OperationKind, RequestContext};
pub use error::{AuthError, ErrorKind, HybridError, HybridResult};
pub use export::{AggregationFunction, AggregationSpec, ExportSummary};
pub use graph::GraphFormat;
pub use hybrid::HybridDatabase;
pub use ingest::IngestStats;
pub use model::{
    DataPoint, Dataset, ModelRequest, Query, Stream, StreamId, TripleDataset, TripleRecord,
};
pub use qualify::{QualifyCounts, QualifyEngine, QualifyFailure, QueryJob};
pub use reasoner::{ReasonerClient, SparqlEndpoint, SparqlResults, SparqlValue};
