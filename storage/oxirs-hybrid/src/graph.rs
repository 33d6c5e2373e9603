//! As-of snapshots of named graphs from the triple log
//!
//! A graph's state at time `T` is, per origin, the batch of triples carrying
//! that origin's latest assertion time not after `T`. Snapshots are derived
//! on every call and never stored.
//!
//! Stored rows are canonicalized on the way out: each row is rendered as a
//! single N-Triples statement, decoded into an [`oxrdf::Triple`] and then
//! re-encoded in the requested syntax.

use crate::error::{HybridError, HybridResult};
use crate::model::{ModelRequest, TripleRecord, BRICK_NS};
use futures::TryStreamExt;
use oxrdf::Triple;
use oxttl::turtle::WriterTurtleSerializer;
use oxttl::TurtleSerializer;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::io::Write;
use tracing::{debug, error, info, instrument};

const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

const AS_OF: &str = "\
WITH latest AS (
    SELECT source, origin, MAX(time) AS time
    FROM triples
    WHERE time <= $1 AND source = $2
    GROUP BY source, origin
)
SELECT t.s, t.p, t.o
FROM triples t JOIN latest USING (source, origin, time)
ORDER BY t.s, t.p, t.o";

/// Output syntax of a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphFormat {
    /// Turtle with `rdf:` and `brick:` prefixes
    #[default]
    Turtle,
    /// One statement per line
    NTriples,
}

enum Emitter<W: Write> {
    Turtle(WriterTurtleSerializer<W>),
    NTriples(W),
}

/// Re-encodes stored rows through a single structured representation
pub struct Canonicalizer<W: Write> {
    emitter: Emitter<W>,
    count: u64,
}

impl<W: Write> Canonicalizer<W> {
    /// Emit into `sink` using `format`
    pub fn new(sink: W, format: GraphFormat) -> HybridResult<Self> {
        let emitter = match format {
            GraphFormat::Turtle => {
                let serializer = TurtleSerializer::new()
                    .with_prefix("rdf", RDF_NS)
                    .and_then(|s| s.with_prefix("brick", BRICK_NS))
                    .map_err(|e| HybridError::Rdf(format!("invalid prefix: {e}")))?;
                Emitter::Turtle(serializer.for_writer(sink))
            }
            GraphFormat::NTriples => Emitter::NTriples(sink),
        };
        Ok(Self { emitter, count: 0 })
    }

    /// Decode one stored row and emit it
    pub fn push(&mut self, record: &TripleRecord) -> HybridResult<()> {
        let triple = record.decode().map_err(|e| {
            let err = HybridError::Rdf(format!(
                "Could not decode triple from database ({}): {e}",
                self.count
            ));
            error!("{err}");
            err
        })?;
        self.emit(&triple)?;
        self.count += 1;
        Ok(())
    }

    fn emit(&mut self, triple: &Triple) -> HybridResult<()> {
        match &mut self.emitter {
            Emitter::Turtle(serializer) => serializer.serialize_triple(triple)?,
            Emitter::NTriples(sink) => writeln!(sink, "{triple} .")?,
        }
        Ok(())
    }

    /// Statements emitted so far
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Flush the syntax trailer and return the sink
    pub fn finish(self) -> HybridResult<W> {
        let mut sink = match self.emitter {
            Emitter::Turtle(serializer) => serializer.finish()?,
            Emitter::NTriples(sink) => sink,
        };
        sink.flush()?;
        Ok(sink)
    }
}

/// Stored rows of `req.graph` as of `req.timestamp`, ordered by `(s, p, o)`
pub async fn load_as_of(pool: &PgPool, req: &ModelRequest) -> HybridResult<Vec<TripleRecord>> {
    let rows: Vec<(String, String, String)> = sqlx::query_as(AS_OF)
        .bind(req.timestamp)
        .bind(&req.graph)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(s, p, o)| TripleRecord { s, p, o })
        .collect())
}

/// Serialize the snapshot of `req.graph` as of `req.timestamp` into `sink`
///
/// Returns the number of statements written.
#[instrument(skip(pool, sink), fields(graph = %req.graph, timestamp = %req.timestamp))]
pub async fn write_as_of<W>(
    pool: &PgPool,
    req: &ModelRequest,
    format: GraphFormat,
    sink: W,
) -> HybridResult<u64>
where
    W: Write + Send,
{
    info!("Get graph {} as of {}", req.graph, req.timestamp);
    let mut canonical = Canonicalizer::new(sink, format)?;
    let mut rows = sqlx::query_as::<_, (String, String, String)>(AS_OF)
        .bind(req.timestamp)
        .bind(&req.graph)
        .fetch(pool);
    while let Some((s, p, o)) = rows.try_next().await? {
        canonical.push(&TripleRecord { s, p, o })?;
    }
    drop(rows);

    let count = canonical.count();
    canonical.finish()?;
    debug!("Wrote {count} triples");
    Ok(count)
}

/// Every named graph present in the triple log
pub async fn graphs(pool: &PgPool) -> HybridResult<Vec<String>> {
    let graphs = sqlx::query_scalar("SELECT DISTINCT source FROM triples ORDER BY source")
        .fetch_all(pool)
        .await?;
    Ok(graphs)
}
