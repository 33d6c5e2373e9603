//! Stream identity, readings, triple batches and export requests
//!
//! Triple terms (`s`, `p`, `o`) are stored in their N-Triples surface form:
//! IRIs in angle brackets, literals quoted with optional datatype or language
//! tag, blank nodes as `_:label`.

use crate::error::{HybridError, HybridResult};
use crate::export::aggregate::AggregationSpec;
use chrono::{DateTime, Utc};
use oxrdf::Triple;
use oxttl::NTriplesParser;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric stream identifier, assigned on first registration
pub type StreamId = i64;

/// `rdf:type`
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// Brick namespace
pub const BRICK_NS: &str = "https://brickschema.org/schema/Brick#";

/// Class asserted for classified streams that name no explicit class
pub const BRICK_POINT: &str = "https://brickschema.org/schema/Brick#Point";

/// Graph queried when none is named
pub const DEFAULT_GRAPH: &str = "default";

/// Origin prefix for triples written by stream registration
pub const REGISTRATION_ORIGIN: &str = "stream_registration";

/// A time series identified by `(source, name)`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    /// Named graph the stream belongs to
    pub source: String,
    /// Name, unique within the source
    pub name: String,
    /// Engineering units
    pub units: Option<String>,
    /// Ontology entity URI of the point
    pub brick_uri: Option<String>,
    /// Ontology class URI of the point
    pub brick_class: Option<String>,
}

impl Stream {
    /// Unclassified stream
    pub fn new(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set units
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    /// Set the entity URI
    pub fn with_brick_uri(mut self, uri: impl Into<String>) -> Self {
        self.brick_uri = Some(uri.into());
        self
    }

    /// Set the class URI
    pub fn with_brick_class(mut self, class: impl Into<String>) -> Self {
        self.brick_class = Some(class.into());
        self
    }

    /// Name and source are required
    pub fn validate(&self) -> HybridResult<()> {
        if self.name.is_empty() {
            return Err(HybridError::validation("stream has no name"));
        }
        if self.source.is_empty() {
            return Err(HybridError::validation(format!(
                "stream {} has no source",
                self.name
            )));
        }
        if let Some(triple) = self.classification_triple() {
            triple.validate()?;
        }
        Ok(())
    }

    /// Treat empty optional strings as absent
    pub fn normalized(mut self) -> Self {
        for field in [&mut self.units, &mut self.brick_uri, &mut self.brick_class] {
            if field.as_deref().is_some_and(str::is_empty) {
                *field = None;
            }
        }
        self
    }

    /// `rdf:type` assertion implied by the classification, in N-Triples terms
    pub fn classification_triple(&self) -> Option<TripleRecord> {
        let uri = self.brick_uri.as_deref().filter(|u| !u.is_empty())?;
        let class = self
            .brick_class
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(BRICK_POINT);
        Some(TripleRecord::new(
            format!("<{uri}>"),
            format!("<{RDF_TYPE}>"),
            format!("<{class}>"),
        ))
    }

    /// Provenance tag of this stream's registration triple
    pub fn registration_origin(&self) -> String {
        format!("{REGISTRATION_ORIGIN}:{}", self.name)
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Stream source={} name={}", self.source, self.name)?;
        if let Some(units) = &self.units {
            write!(f, " units={units}")?;
        }
        if let Some(uri) = &self.brick_uri {
            write!(f, " uri={uri}")?;
        }
        if let Some(class) = &self.brick_class {
            write!(f, " class={class}")?;
        }
        f.write_str(">")
    }
}

/// A single reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Reading time
    pub timestamp: DateTime<Utc>,
    /// Reading value
    pub value: f64,
}

impl DataPoint {
    /// Create a reading
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

impl From<(DateTime<Utc>, f64)> for DataPoint {
    fn from((timestamp, value): (DateTime<Utc>, f64)) -> Self {
        Self { timestamp, value }
    }
}

/// Readings for one stream, consumed once and lazily
#[derive(Debug, Clone)]
pub struct Dataset<I> {
    /// Source of the target stream
    pub source: String,
    /// Name of the target stream
    pub name: String,
    /// Readings; never collected up front
    pub readings: I,
}

impl<I> Dataset<I>
where
    I: IntoIterator<Item = DataPoint>,
{
    /// Readings for the stream `(source, name)`
    pub fn new(source: impl Into<String>, name: impl Into<String>, readings: I) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
            readings,
        }
    }

    /// Source and name are required
    pub fn validate(&self) -> HybridResult<()> {
        if self.source.is_empty() {
            return Err(HybridError::validation("dataset has no source"));
        }
        if self.name.is_empty() {
            return Err(HybridError::validation(format!(
                "dataset for source {} has no stream name",
                self.source
            )));
        }
        Ok(())
    }
}

/// One `(s, p, o)` statement in N-Triples term syntax
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TripleRecord {
    /// Subject term
    pub s: String,
    /// Predicate term
    pub p: String,
    /// Object term
    pub o: String,
}

impl TripleRecord {
    /// Create a statement
    pub fn new(s: impl Into<String>, p: impl Into<String>, o: impl Into<String>) -> Self {
        Self {
            s: s.into(),
            p: p.into(),
            o: o.into(),
        }
    }

    /// Every term must be present and the row must read back as one N-Triples statement
    pub fn validate(&self) -> HybridResult<()> {
        if self.s.trim().is_empty() || self.p.trim().is_empty() || self.o.trim().is_empty() {
            return Err(HybridError::validation(format!(
                "triple has an empty term: ({}, {}, {})",
                self.s, self.p, self.o
            )));
        }
        self.decode().map_err(|e| {
            HybridError::validation(format!(
                "malformed triple ({}, {}, {}): {e}",
                self.s, self.p, self.o
            ))
        })?;
        Ok(())
    }

    /// Parse the row as exactly one N-Triples statement
    pub fn decode(&self) -> HybridResult<Triple> {
        let line = format!("{} {} {} .\n", self.s, self.p, self.o);
        let mut statements = NTriplesParser::new().for_reader(line.as_bytes());
        let triple = match statements.next() {
            Some(Ok(triple)) => triple,
            Some(Err(e)) => return Err(HybridError::Rdf(e.to_string())),
            None => return Err(HybridError::Rdf("no statement".to_string())),
        };
        if statements.next().is_some() {
            return Err(HybridError::Rdf(
                "terms span more than one statement".to_string(),
            ));
        }
        Ok(triple)
    }
}

/// One assertion batch for a named graph, consumed once and lazily
#[derive(Debug, Clone)]
pub struct TripleDataset<I> {
    /// Named graph receiving the triples
    pub source: String,
    /// Provenance of this batch
    pub origin: String,
    /// Assertion time of this batch
    pub time: DateTime<Utc>,
    /// Statements
    pub triples: I,
}

impl<I> TripleDataset<I>
where
    I: IntoIterator<Item = TripleRecord>,
{
    /// Batch for `source` from `origin` asserted at `time`
    pub fn new(
        source: impl Into<String>,
        origin: impl Into<String>,
        time: DateTime<Utc>,
        triples: I,
    ) -> Self {
        Self {
            source: source.into(),
            origin: origin.into(),
            time,
            triples,
        }
    }

    /// Source and origin are required; rows are checked as they stream
    pub fn validate(&self) -> HybridResult<()> {
        if self.source.is_empty() {
            return Err(HybridError::validation("triple dataset has no source"));
        }
        if self.origin.is_empty() {
            return Err(HybridError::validation(format!(
                "triple dataset for source {} has no origin",
                self.source
            )));
        }
        Ok(())
    }
}

/// Export request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// Range start (inclusive)
    pub start: DateTime<Utc>,
    /// Range end (inclusive)
    pub end: DateTime<Utc>,
    /// SPARQL text selecting stream URIs
    #[serde(default)]
    pub sparql: Option<String>,
    /// Graph the SPARQL text runs against
    #[serde(default)]
    pub graph: Option<String>,
    /// Explicit stream names or entity URIs
    #[serde(default)]
    pub uris: Vec<String>,
    /// Restrict URI matches to these sources
    #[serde(default)]
    pub sources: Vec<String>,
    /// Explicit stream ids
    #[serde(default)]
    pub ids: Vec<StreamId>,
    /// Optional time-bucket aggregation
    #[serde(default)]
    pub aggregation: Option<AggregationSpec>,
}

/// How an export query selects its streams, by priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// Run SPARQL, then match URI bindings against names and entity URIs
    Sparql {
        /// Graph to query
        graph: &'a str,
        /// Query text
        query: &'a str,
        /// Optional source filter
        sources: &'a [String],
    },
    /// Match the given URIs against names and entity URIs
    Uris {
        /// Names or entity URIs
        uris: &'a [String],
        /// Optional source filter
        sources: &'a [String],
    },
    /// Use these ids verbatim
    Ids(&'a [StreamId]),
    /// Nothing to resolve; exports no streams
    Empty,
}

impl Query {
    /// Query over explicit ids
    pub fn for_ids(ids: Vec<StreamId>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            sparql: None,
            graph: None,
            uris: Vec::new(),
            sources: Vec::new(),
            ids,
            aggregation: None,
        }
    }

    /// Query over explicit names or entity URIs
    pub fn for_uris(uris: Vec<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            uris,
            ..Self::for_ids(Vec::new(), start, end)
        }
    }

    /// Query over the streams a SPARQL query selects
    pub fn for_sparql(sparql: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            sparql: Some(sparql.into()),
            ..Self::for_ids(Vec::new(), start, end)
        }
    }

    /// Restrict URI matches to the given sources
    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    /// Aggregate into fixed-width buckets
    pub fn with_aggregation(mut self, aggregation: AggregationSpec) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// The range must not be inverted
    pub fn validate(&self) -> HybridResult<()> {
        if self.start > self.end {
            return Err(HybridError::validation(format!(
                "query start {} is after end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// The single resolution path this query takes
    pub fn resolution(&self) -> Resolution<'_> {
        if let Some(query) = self.sparql.as_deref().filter(|q| !q.trim().is_empty()) {
            let graph = self
                .graph
                .as_deref()
                .filter(|g| !g.is_empty())
                .unwrap_or(DEFAULT_GRAPH);
            Resolution::Sparql {
                graph,
                query,
                sources: &self.sources,
            }
        } else if !self.uris.is_empty() {
            Resolution::Uris {
                uris: &self.uris,
                sources: &self.sources,
            }
        } else if !self.ids.is_empty() {
            Resolution::Ids(&self.ids)
        } else {
            Resolution::Empty
        }
    }
}

/// Selects an as-of snapshot of a named graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Named graph
    pub graph: String,
    /// Snapshot time
    pub timestamp: DateTime<Utc>,
}

impl ModelRequest {
    /// Snapshot of `graph` as of `timestamp`
    pub fn new(graph: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            graph: graph.into(),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_stream_validation() {
        assert!(Stream::new("bldg1", "temp1").validate().is_ok());
        assert!(Stream::new("", "temp1").validate().is_err());
        assert!(Stream::new("bldg1", "").validate().is_err());
    }

    #[test]
    fn test_classification_defaults_to_point() {
        let stream = Stream::new("bldg1", "temp1").with_brick_uri("urn:bldg1#temp1");
        let triple = stream.classification_triple().unwrap();
        assert_eq!(triple.s, "<urn:bldg1#temp1>");
        assert_eq!(triple.p, format!("<{RDF_TYPE}>"));
        assert_eq!(triple.o, format!("<{BRICK_POINT}>"));

        let typed = stream.with_brick_class(format!("{BRICK_NS}Air_Temperature_Sensor"));
        assert_eq!(
            typed.classification_triple().unwrap().o,
            "<https://brickschema.org/schema/Brick#Air_Temperature_Sensor>"
        );
    }

    #[test]
    fn test_unclassified_stream_has_no_triple() {
        assert!(Stream::new("bldg1", "temp1")
            .with_units("F")
            .classification_triple()
            .is_none());
        let blank = Stream::new("bldg1", "temp1").with_brick_uri("").normalized();
        assert!(blank.brick_uri.is_none());
        assert!(blank.classification_triple().is_none());
    }

    #[test]
    fn test_registration_origin_is_per_stream() {
        let a = Stream::new("bldg1", "temp1");
        let b = Stream::new("bldg1", "temp2");
        assert_ne!(a.registration_origin(), b.registration_origin());
    }

    #[test]
    fn test_triple_validation() {
        assert!(TripleRecord::new("<urn:a>", "<urn:b>", "\"c\"")
            .validate()
            .is_ok());
        assert!(TripleRecord::new("<urn:a>", " ", "<urn:c>")
            .validate()
            .is_err());
    }

    #[test]
    fn test_undecodable_terms_rejected() {
        for bad in [
            TripleRecord::new("urn:bare", "<urn:p>", "<urn:o>"),
            TripleRecord::new("<urn:s>", "\"label\"", "<urn:o>"),
            TripleRecord::new("<urn:s>", "<urn:p>", "\"unterminated"),
            TripleRecord::new("<urn:s>", "<urn:p>", "<urn:o> .\n<urn:x> <urn:y> <urn:z>"),
        ] {
            let err = bad.validate().unwrap_err();
            assert!(matches!(err, HybridError::Validation(_)), "{bad:?}: {err}");
        }
        let triple = TripleRecord::new("<urn:s>", "<urn:p>", "\"42\"^^<http://www.w3.org/2001/XMLSchema#integer>")
            .decode()
            .unwrap();
        assert_eq!(triple.subject.to_string(), "<urn:s>");
    }

    #[test]
    fn test_unparseable_brick_uri_rejected() {
        let stream = Stream::new("bldg1", "temp1").with_brick_uri("bldg 1 temp");
        assert!(matches!(stream.validate(), Err(HybridError::Validation(_))));
        assert!(Stream::new("bldg1", "temp1")
            .with_brick_uri("urn:bldg1#temp1")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_resolution_priority() {
        let now = Utc::now();
        let mut q = Query::for_ids(vec![1, 2], now, now);
        assert_eq!(q.resolution(), Resolution::Ids(&[1, 2]));

        q.uris = vec!["urn:x".to_string()];
        assert!(matches!(q.resolution(), Resolution::Uris { .. }));

        q.sparql = Some("SELECT ?x WHERE { ?x a ?c }".to_string());
        match q.resolution() {
            Resolution::Sparql { graph, .. } => assert_eq!(graph, DEFAULT_GRAPH),
            other => panic!("unexpected resolution {other:?}"),
        }

        let empty = Query::for_ids(Vec::new(), now, now);
        assert_eq!(empty.resolution(), Resolution::Empty);
    }

    #[test]
    fn test_inverted_range_rejected() {
        let now = Utc::now();
        let q = Query::for_ids(vec![1], now, now - Duration::seconds(1));
        assert!(q.validate().is_err());
    }

    #[test]
    fn test_dataset_validation() {
        let ds = Dataset::new("bldg1", "", Vec::<DataPoint>::new());
        assert!(ds.validate().is_err());
        let ts = TripleDataset::new("bldg1", "", Utc::now(), Vec::<TripleRecord>::new());
        assert!(ts.validate().is_err());
    }
}
