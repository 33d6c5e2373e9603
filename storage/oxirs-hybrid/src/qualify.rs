//! Qualification: fan a set of queries out over every named graph
//!
//! Each `(query, graph)` pair is one job. A fixed pool of workers drains a
//! bounded job queue and runs jobs one at a time against the reasoner. A
//! worker that hits an error reports it and stops; the others keep draining.
//! The caller collects every result first and only then looks at failures,
//! so counts from completed jobs are always returned.

use crate::context::RequestContext;
use crate::error::{HybridError, HybridResult};
use crate::reasoner::SparqlEndpoint;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info, instrument};

/// Solution counts per graph, one entry per query in submission order
pub type QualifyCounts = BTreeMap<String, Vec<usize>>;

/// One query evaluated against one graph
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryJob {
    /// Named graph the query runs against
    pub graph: String,
    /// Position of the query in the submitted list
    pub query_index: usize,
}

/// A job (or worker) that did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifyFailure {
    /// Worker that reported the failure
    pub worker: usize,
    /// Job being evaluated, if the failure is tied to one
    pub job: Option<QueryJob>,
    /// Rendered error
    pub error: String,
}

impl fmt::Display for QualifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.job {
            Some(job) => write!(
                f,
                "worker {}: query {} on graph {}: {}",
                self.worker, job.query_index, job.graph, self.error
            ),
            None => write!(f, "worker {}: {}", self.worker, self.error),
        }
    }
}

struct JobResult {
    job: QueryJob,
    solutions: usize,
}

/// Bounded worker pool evaluating queries across graphs
#[derive(Clone)]
pub struct QualifyEngine {
    endpoint: Arc<dyn SparqlEndpoint>,
    workers: usize,
    job_timeout: Duration,
}

impl QualifyEngine {
    /// Pool of `workers` workers; each job gets `job_timeout`
    pub fn new(endpoint: Arc<dyn SparqlEndpoint>, workers: usize, job_timeout: Duration) -> Self {
        Self {
            endpoint,
            workers: workers.max(1),
            job_timeout,
        }
    }

    /// Count solutions of every query on every graph
    ///
    /// Fails with [`HybridError::PartialFailure`] when any job failed; the
    /// error still carries the counts of every job that completed.
    #[instrument(skip_all, fields(graphs = graphs.len(), queries = queries.len()))]
    pub async fn run(
        &self,
        ctx: &RequestContext,
        graphs: &[String],
        queries: &[String],
    ) -> HybridResult<QualifyCounts> {
        let mut counts = QualifyCounts::new();
        let num_jobs = graphs.len() * queries.len();
        if num_jobs == 0 {
            return Ok(counts);
        }

        let (job_tx, job_rx) = mpsc::channel::<QueryJob>(num_jobs);
        let (result_tx, mut result_rx) = mpsc::channel::<JobResult>(num_jobs);
        let (error_tx, mut error_rx) = mpsc::channel::<QualifyFailure>(self.workers);

        for query_index in 0..queries.len() {
            for graph in graphs {
                job_tx
                    .send(QueryJob {
                        graph: graph.clone(),
                        query_index,
                    })
                    .await
                    .map_err(|_| HybridError::Cancelled)?;
            }
        }
        drop(job_tx);

        let jobs = Arc::new(Mutex::new(job_rx));
        let queries: Arc<[String]> = queries.into();
        let spawned = self.workers.min(num_jobs);
        let mut pool = JoinSet::new();
        for worker in 0..spawned {
            let work = run_worker(
                worker,
                ctx.child(),
                Arc::clone(&self.endpoint),
                self.job_timeout,
                Arc::clone(&queries),
                Arc::clone(&jobs),
                result_tx.clone(),
                error_tx.clone(),
            );
            pool.spawn(async move {
                work.await;
                worker
            });
        }
        drop(result_tx);
        drop(error_tx);

        // Drain everything the workers produced before looking at failures.
        while let Some(JobResult { job, solutions }) = result_rx.recv().await {
            counts
                .entry(job.graph)
                .or_insert_with(|| vec![0; queries.len()])[job.query_index] = solutions;
        }

        // Counted completion: every spawned worker is accounted for.
        let mut finished = vec![false; spawned];
        let mut aborted = Vec::new();
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(worker) => finished[worker] = true,
                Err(err) => aborted.push(err.to_string()),
            }
        }
        let missing = finished.iter().enumerate().filter(|(_, done)| !**done);
        let mut failures: Vec<QualifyFailure> = missing
            .zip(aborted)
            .map(|((worker, _), error)| {
                error!("Qualify worker {worker} did not finish: {error}");
                QualifyFailure {
                    worker,
                    job: None,
                    error,
                }
            })
            .collect();
        while let Ok(failure) = error_rx.try_recv() {
            failures.push(failure);
        }

        info!("Qualify result: {counts:?}");
        if failures.is_empty() {
            Ok(counts)
        } else {
            failures.sort_by_key(|f| f.worker);
            Err(HybridError::PartialFailure { counts, failures })
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    worker: usize,
    ctx: RequestContext,
    endpoint: Arc<dyn SparqlEndpoint>,
    job_timeout: Duration,
    queries: Arc<[String]>,
    jobs: Arc<Mutex<mpsc::Receiver<QueryJob>>>,
    results: mpsc::Sender<JobResult>,
    errors: mpsc::Sender<QualifyFailure>,
) {
    loop {
        let next = jobs.lock().await.recv().await;
        let Some(job) = next else { break };

        let query = &queries[job.query_index];
        info!("Querying graph {} with query {query}", job.graph);
        let outcome = ctx
            .with_deadline("qualify job", job_timeout, endpoint.query(&job.graph, query))
            .await;
        match outcome {
            Ok(res) => {
                let solutions = res.solution_count();
                info!(
                    "Worker {worker}: Graph {}, Query {}, # results {solutions}",
                    job.graph, job.query_index
                );
                if results.send(JobResult { job, solutions }).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                error!("Could not evaluate query {query}: {err}");
                let _ = errors
                    .send(QualifyFailure {
                        worker,
                        job: Some(job),
                        error: err.to_string(),
                    })
                    .await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::reasoner::{SparqlBinding, SparqlResults};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers query `i` on any graph with `i + graph.len()` solutions
    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        fail_on: Option<(&'static str, usize)>,
    }

    #[async_trait]
    impl SparqlEndpoint for Counting {
        async fn query(&self, graph: &str, query: &str) -> HybridResult<SparqlResults> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let index: usize = query.parse().unwrap();
            if self.fail_on == Some((graph, index)) {
                return Err(HybridError::upstream("reasoner exploded"));
            }
            let bindings = vec![SparqlBinding::new(); index + graph.len()];
            Ok(SparqlResults::from_bindings(Vec::new(), bindings))
        }
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_counts_every_query_on_every_graph() {
        let endpoint = Arc::new(Counting::default());
        let engine = QualifyEngine::new(endpoint.clone(), 4, Duration::from_secs(5));
        let graphs = names(&["a", "bb", "ccc"]);
        let queries = names(&["0", "1"]);

        let counts = engine
            .run(&RequestContext::anonymous(), &graphs, &queries)
            .await
            .unwrap();

        assert_eq!(counts.len(), 3);
        assert_eq!(counts["a"], vec![1, 2]);
        assert_eq!(counts["bb"], vec![2, 3]);
        assert_eq!(counts["ccc"], vec![3, 4]);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_failure_keeps_completed_counts() {
        let endpoint = Arc::new(Counting {
            fail_on: Some(("bb", 1)),
            ..Counting::default()
        });
        let engine = QualifyEngine::new(endpoint.clone(), 4, Duration::from_secs(5));
        let graphs = names(&["a", "bb", "ccc"]);
        let queries = names(&["0", "1", "2"]);

        let err = engine
            .run(&RequestContext::anonymous(), &graphs, &queries)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialFailure);
        let HybridError::PartialFailure { counts, failures } = err else {
            panic!("expected partial failure");
        };

        assert_eq!(failures.len(), 1);
        assert_eq!(
            failures[0].job,
            Some(QueryJob {
                graph: "bb".to_string(),
                query_index: 1
            })
        );
        // The three remaining workers drain every other job.
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 9);
        assert_eq!(counts["a"], vec![1, 2, 3]);
        assert_eq!(counts["ccc"], vec![3, 4, 5]);
        assert_eq!(counts["bb"], vec![2, 0, 4]);
        assert!(counts.values().all(|v| v.len() == queries.len()));
    }

    #[tokio::test]
    async fn test_no_graphs_is_empty() {
        let engine = QualifyEngine::new(Arc::new(Counting::default()), 4, Duration::from_secs(5));
        let counts = engine
            .run(&RequestContext::anonymous(), &[], &names(&["0"]))
            .await
            .unwrap();
        assert!(counts.is_empty());
    }

    struct Hanging;

    #[async_trait]
    impl SparqlEndpoint for Hanging {
        async fn query(&self, _graph: &str, _query: &str) -> HybridResult<SparqlResults> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_reaches_every_worker() {
        let engine = QualifyEngine::new(Arc::new(Hanging), 4, Duration::from_secs(3600));
        let ctx = RequestContext::anonymous();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let graphs = names(&["a", "b", "c", "d", "e"]);
        let err = engine
            .run(&ctx, &graphs, &names(&["0", "1"]))
            .await
            .unwrap_err();
        let HybridError::PartialFailure { counts, failures } = err else {
            panic!("expected partial failure");
        };
        assert!(counts.is_empty());
        assert_eq!(failures.len(), 4);
        assert!(failures.iter().all(|f| f.error.contains("cancelled")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_timeout_is_a_job_failure() {
        let engine = QualifyEngine::new(Arc::new(Hanging), 2, Duration::from_secs(1));
        let err = engine
            .run(&RequestContext::anonymous(), &names(&["a"]), &names(&["0"]))
            .await
            .unwrap_err();
        let HybridError::PartialFailure { failures, .. } = err else {
            panic!("expected partial failure");
        };
        assert_eq!(failures.len(), 1);
        assert!(failures[0].error.contains("timed out"));
    }
}
