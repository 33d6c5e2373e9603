//! `HybridDatabase`: one handle over the relational store and the reasoner
//!
//! The facade composes a pooled Postgres connection set with a
//! [`SparqlEndpoint`]. Every operation runs under the caller's
//! [`RequestContext`] and the deadline of its category.

use crate::auth::{self, Permission};
use crate::config::HybridConfig;
use crate::context::{OperationKind, RequestContext};
use crate::error::HybridResult;
use crate::export::{self, ExportSummary};
use crate::graph::{self, GraphFormat};
use crate::ingest::{self, IngestStats};
use crate::model::{
    DataPoint, Dataset, ModelRequest, Query, Stream, StreamId, TripleDataset, TripleRecord,
    DEFAULT_GRAPH,
};
use crate::qualify::{QualifyCounts, QualifyEngine};
use crate::reasoner::{ReasonerClient, SparqlEndpoint, SparqlResults};
use crate::registry;
use crate::store::{self, transaction::PgTransaction};
use futures::future::BoxFuture;
use sqlx::PgPool;
use std::fmt;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use tracing::{info, instrument};

/// Hybrid time-series and metadata graph store
#[derive(Clone)]
pub struct HybridDatabase {
    pool: PgPool,
    reasoner: Arc<dyn SparqlEndpoint>,
    config: Arc<HybridConfig>,
}

impl fmt::Debug for HybridDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridDatabase")
            .field("pool_size", &self.pool.size())
            .field("reasoner", &self.config.reasoner.address)
            .finish_non_exhaustive()
    }
}

impl HybridDatabase {
    /// Connect to the database and build a reasoner client
    pub async fn connect(config: HybridConfig) -> HybridResult<Self> {
        config.validate()?;
        let pool = store::connect(&config.database).await?;
        let reasoner = Arc::new(ReasonerClient::new(&config.reasoner)?);
        Ok(Self::from_parts(pool, reasoner, config))
    }

    /// Like [`connect`](Self::connect), but wait for the database to come up
    ///
    /// For process startup only.
    pub async fn connect_with_retry(config: HybridConfig) -> HybridResult<Self> {
        config.validate()?;
        let reasoner = Arc::new(ReasonerClient::new(&config.reasoner)?);
        let pool = store::connect_with_retry(&config.database).await;
        Ok(Self::from_parts(pool, reasoner, config))
    }

    /// Assemble from an existing pool and endpoint
    pub fn from_parts(
        pool: PgPool,
        reasoner: Arc<dyn SparqlEndpoint>,
        config: HybridConfig,
    ) -> Self {
        Self {
            pool,
            reasoner,
            config: Arc::new(config),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &HybridConfig {
        &self.config
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Closed hybrid database pool");
    }

    /// Create the relational schema if missing
    pub async fn ensure_schema(&self) -> HybridResult<()> {
        store::ensure_schema(&self.pool).await
    }

    /// Run `work` in a transaction on a pooled connection
    pub async fn run_in_transaction<T, F>(&self, work: F) -> HybridResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgTransaction) -> BoxFuture<'c, HybridResult<T>> + Send,
    {
        store::run_in_transaction(&self.pool, work).await
    }

    async fn scoped<T, F>(&self, ctx: &RequestContext, kind: OperationKind, fut: F) -> HybridResult<T>
    where
        F: Future<Output = HybridResult<T>>,
    {
        ctx.scoped(kind, &self.config.timeouts, fut).await
    }

    /// Whether the caller holds `permission` on `source`
    pub async fn check_authorized(
        &self,
        ctx: &RequestContext,
        permission: Permission,
        source: &str,
    ) -> HybridResult<bool> {
        self.scoped(
            ctx,
            OperationKind::Registry,
            auth::check_authorized(&self.pool, ctx, permission, source),
        )
        .await
    }

    /// Register or update a stream, returning its id
    pub async fn register_stream(
        &self,
        ctx: &RequestContext,
        stream: Stream,
    ) -> HybridResult<StreamId> {
        self.scoped(
            ctx,
            OperationKind::Registry,
            registry::register_stream(&self.pool, ctx, stream),
        )
        .await
    }

    /// Upsert readings for a registered stream
    pub async fn insert_readings<I>(
        &self,
        ctx: &RequestContext,
        dataset: Dataset<I>,
    ) -> HybridResult<IngestStats>
    where
        I: IntoIterator<Item = DataPoint> + Send + 'static,
        I::IntoIter: Send,
    {
        self.scoped(
            ctx,
            OperationKind::BulkWrite,
            ingest::insert_readings(&self.pool, ctx, dataset),
        )
        .await
    }

    /// Append a triple batch to the log
    pub async fn add_triples<I>(
        &self,
        ctx: &RequestContext,
        dataset: TripleDataset<I>,
    ) -> HybridResult<IngestStats>
    where
        I: IntoIterator<Item = TripleRecord> + Send + 'static,
        I::IntoIter: Send,
    {
        self.scoped(
            ctx,
            OperationKind::BulkWrite,
            ingest::add_triples(&self.pool, ctx, dataset),
        )
        .await
    }

    /// Stream the compressed export for `query` into `sink`
    pub async fn export<W>(
        &self,
        ctx: &RequestContext,
        query: &Query,
        sink: W,
    ) -> HybridResult<ExportSummary>
    where
        W: Write + Send,
    {
        self.scoped(
            ctx,
            OperationKind::BulkRead,
            export::export(
                &self.pool,
                self.reasoner.as_ref(),
                query,
                sink,
                self.config.export.flush_rows,
            ),
        )
        .await
    }

    /// Run SPARQL against `graph` (or the default graph) and decode the results
    #[instrument(skip(self, ctx, query))]
    pub async fn query_sparql(
        &self,
        ctx: &RequestContext,
        graph: &str,
        query: &str,
    ) -> HybridResult<SparqlResults> {
        let graph = or_default_graph(graph);
        self.scoped(ctx, OperationKind::BulkRead, self.reasoner.query(graph, query))
            .await
    }

    /// Run SPARQL against `graph` and copy the raw response into `sink`
    #[instrument(skip(self, ctx, query, sink))]
    pub async fn query_sparql_raw(
        &self,
        ctx: &RequestContext,
        graph: &str,
        query: &str,
        sink: &mut (dyn Write + Send),
    ) -> HybridResult<u64> {
        let graph = or_default_graph(graph);
        self.scoped(
            ctx,
            OperationKind::BulkRead,
            self.reasoner.query_to_writer(graph, query, sink),
        )
        .await
    }

    /// Serialize the snapshot selected by `req` into `sink`
    pub async fn graph_as_of<W>(
        &self,
        ctx: &RequestContext,
        req: &ModelRequest,
        format: GraphFormat,
        sink: W,
    ) -> HybridResult<u64>
    where
        W: Write + Send,
    {
        self.scoped(
            ctx,
            OperationKind::BulkRead,
            graph::write_as_of(&self.pool, req, format, sink),
        )
        .await
    }

    /// Stored rows of the snapshot selected by `req`, ordered by `(s, p, o)`
    pub async fn triples_as_of(
        &self,
        ctx: &RequestContext,
        req: &ModelRequest,
    ) -> HybridResult<Vec<TripleRecord>> {
        self.scoped(ctx, OperationKind::BulkRead, graph::load_as_of(&self.pool, req))
            .await
    }

    /// Named graphs present in the triple log
    pub async fn graphs(&self, ctx: &RequestContext) -> HybridResult<Vec<String>> {
        self.scoped(ctx, OperationKind::BulkRead, graph::graphs(&self.pool))
            .await
    }

    /// Count solutions of each query on every named graph
    ///
    /// Each reasoner call gets the bulk read deadline on its own.
    pub async fn qualify(
        &self,
        ctx: &RequestContext,
        queries: &[String],
    ) -> HybridResult<QualifyCounts> {
        let graphs = self.graphs(ctx).await?;
        let engine = QualifyEngine::new(
            Arc::clone(&self.reasoner),
            self.config.qualify.workers,
            self.config.timeouts.data_read,
        );
        engine.run(ctx, &graphs, queries).await
    }
}

fn or_default_graph(graph: &str) -> &str {
    if graph.is_empty() {
        DEFAULT_GRAPH
    } else {
        graph
    }
}
