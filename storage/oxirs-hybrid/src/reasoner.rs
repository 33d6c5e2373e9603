//! Client for the external graph reasoner
//!
//! The reasoner answers SPARQL queries per named graph at
//! `POST http://{address}/query/{graph}`. Two modes are exposed: decoded
//! SPARQL JSON results, and raw pass-through of the response body.

use crate::config::ReasonerConfig;
use crate::error::{HybridError, HybridResult};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use tracing::debug;

const SPARQL_QUERY_MIME: &str = "application/sparql-query";
const SPARQL_RESULTS_MIME: &str = "application/sparql-results+json";

/// SPARQL query results in the W3C JSON format
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparqlResults {
    /// Result head
    #[serde(default)]
    pub head: SparqlHead,
    /// Bindings of a SELECT query
    #[serde(default)]
    pub results: SparqlResultsData,
    /// Answer of an ASK query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean: Option<bool>,
}

/// SPARQL results head
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparqlHead {
    /// Projected variables
    #[serde(default)]
    pub vars: Vec<String>,
}

/// SPARQL results data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparqlResultsData {
    /// One map per solution
    #[serde(default)]
    pub bindings: Vec<SparqlBinding>,
}

/// A single solution (variable -> value mapping)
pub type SparqlBinding = HashMap<String, SparqlValue>;

/// A bound RDF term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparqlValue {
    /// `uri`, `literal`, `typed-literal` or `bnode`
    #[serde(rename = "type")]
    pub value_type: String,
    /// Lexical value
    pub value: String,
    /// Literal datatype
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    /// Literal language tag
    #[serde(
        default,
        rename = "xml:lang",
        skip_serializing_if = "Option::is_none"
    )]
    pub lang: Option<String>,
}

impl SparqlValue {
    /// IRI term
    pub fn uri(value: impl Into<String>) -> Self {
        Self {
            value_type: "uri".to_string(),
            value: value.into(),
            datatype: None,
            lang: None,
        }
    }

    /// Plain literal term
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            value_type: "literal".to_string(),
            value: value.into(),
            datatype: None,
            lang: None,
        }
    }

    /// Whether this term is an IRI
    pub fn is_uri(&self) -> bool {
        self.value_type == "uri"
    }
}

impl SparqlResults {
    /// Results of a SELECT query with the given solutions
    pub fn from_bindings(vars: Vec<String>, bindings: Vec<SparqlBinding>) -> Self {
        Self {
            head: SparqlHead { vars },
            results: SparqlResultsData { bindings },
            boolean: None,
        }
    }

    /// Number of solutions; an ASK answer counts as one solution when true
    pub fn solution_count(&self) -> usize {
        match self.boolean {
            Some(answer) => usize::from(answer),
            None => self.results.bindings.len(),
        }
    }

    /// Every IRI bound in any column of any solution, deduplicated and sorted
    pub fn uri_values(&self) -> Vec<String> {
        self.results
            .bindings
            .iter()
            .flat_map(|binding| binding.values())
            .filter(|value| value.is_uri())
            .map(|value| value.value.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// A SPARQL endpoint addressable per named graph
#[async_trait]
pub trait SparqlEndpoint: Send + Sync {
    /// Run `query` against `graph` and decode the solutions
    async fn query(&self, graph: &str, query: &str) -> HybridResult<SparqlResults>;

    /// Run `query` against `graph` and copy the response body into `sink`
    ///
    /// Returns the number of bytes written.
    async fn query_to_writer(
        &self,
        graph: &str,
        query: &str,
        sink: &mut (dyn Write + Send),
    ) -> HybridResult<u64> {
        let results = self.query(graph, query).await?;
        let body = serde_json::to_vec(&results)
            .map_err(|e| HybridError::upstream(format!("Could not encode results: {e}")))?;
        sink.write_all(&body)?;
        Ok(body.len() as u64)
    }
}

/// HTTP client for the reasoner service
#[derive(Debug, Clone)]
pub struct ReasonerClient {
    client: Client,
    base: Url,
}

impl ReasonerClient {
    /// Build a client for the reasoner at `config.address`
    pub fn new(config: &ReasonerConfig) -> HybridResult<Self> {
        let base = Url::parse(&format!("http://{}/", config.address)).map_err(|e| {
            HybridError::Config(format!("invalid reasoner address {}: {e}", config.address))
        })?;
        if base.cannot_be_a_base() {
            return Err(HybridError::Config(format!(
                "invalid reasoner address {}",
                config.address
            )));
        }
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| HybridError::Config(format!("Could not build reasoner client: {e}")))?;
        Ok(Self { client, base })
    }

    /// Query URL for `graph`
    pub fn query_url(&self, graph: &str) -> HybridResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| HybridError::Config(format!("reasoner address {} has no path", self.base)))?
            .pop_if_empty()
            .extend(["query", graph]);
        Ok(url)
    }

    async fn send(&self, graph: &str, query: &str) -> HybridResult<reqwest::Response> {
        let url = self.query_url(graph)?;
        debug!("Querying reasoner at {url}");
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, SPARQL_QUERY_MIME)
            .header(ACCEPT, SPARQL_RESULTS_MIME)
            .body(query.to_string())
            .send()
            .await
            .map_err(|e| HybridError::upstream(format!("Could not query graph {graph}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HybridError::upstream(format!(
                "Reasoner returned {status} for graph {graph}: {body}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl SparqlEndpoint for ReasonerClient {
    async fn query(&self, graph: &str, query: &str) -> HybridResult<SparqlResults> {
        let response = self.send(graph, query).await?;
        response.json::<SparqlResults>().await.map_err(|e| {
            HybridError::upstream(format!("Malformed results from graph {graph}: {e}"))
        })
    }

    async fn query_to_writer(
        &self,
        graph: &str,
        query: &str,
        sink: &mut (dyn Write + Send),
    ) -> HybridResult<u64> {
        let mut response = self.send(graph, query).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            sink.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }
}
