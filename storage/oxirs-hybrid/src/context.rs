//! Per-request identity and cancellation scope
//!
//! Every public operation takes a [`RequestContext`]. It carries the caller's
//! API key (the capability checked by the write gate) and a cancellation
//! token. Child contexts share the identity and are cancelled together with
//! their parent, which is how cancellation reaches fanned-out reasoner and
//! database calls.

use crate::config::TimeoutConfig;
use crate::error::{HybridError, HybridResult};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Opaque capability token identifying the caller
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a raw key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Raw key, for binding into authorization lookups
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keys end up in spans; never print them.
impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Deadline category of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Export, graph materialization, reasoner queries
    BulkRead,
    /// Reading and triple ingestion
    BulkWrite,
    /// Stream registration and authorization lookups
    Registry,
}

impl OperationKind {
    /// Deadline configured for this category
    pub fn deadline(self, timeouts: &TimeoutConfig) -> Duration {
        match self {
            Self::BulkRead => timeouts.data_read,
            Self::BulkWrite => timeouts.data_write,
            Self::Registry => timeouts.registry,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::BulkRead => "bulk read",
            Self::BulkWrite => "bulk write",
            Self::Registry => "registry",
        }
    }
}

/// Identity and cancellation scope of one call
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    api_key: Option<ApiKey>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Context without an identity; write operations will be refused
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Context carrying the given API key
    pub fn with_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(ApiKey::new(key)),
            cancel: CancellationToken::new(),
        }
    }

    /// Caller identity, if any
    pub fn api_key(&self) -> Option<&ApiKey> {
        self.api_key.as_ref()
    }

    /// Derive a scope that is cancelled whenever this one is
    pub fn child(&self) -> Self {
        Self {
            api_key: self.api_key.clone(),
            cancel: self.cancel.child_token(),
        }
    }

    /// Cancel this scope and every child derived from it
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether this scope has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that resolves on cancellation
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `fut` under this scope's cancellation and the category deadline
    ///
    /// The future is dropped on cancellation or timeout, which rolls back
    /// any transaction it holds.
    pub async fn scoped<T, F>(
        &self,
        kind: OperationKind,
        timeouts: &TimeoutConfig,
        fut: F,
    ) -> HybridResult<T>
    where
        F: Future<Output = HybridResult<T>>,
    {
        self.with_deadline(kind.name(), kind.deadline(timeouts), fut)
            .await
    }

    /// Run `fut` under this scope's cancellation and an explicit deadline
    pub async fn with_deadline<T, F>(
        &self,
        operation: &str,
        deadline: Duration,
        fut: F,
    ) -> HybridResult<T>
    where
        F: Future<Output = HybridResult<T>>,
    {
        if self.is_cancelled() {
            return Err(HybridError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(HybridError::Cancelled),
            res = tokio::time::timeout(deadline, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(HybridError::Timeout {
                    operation: operation.to_string(),
                    elapsed: deadline,
                }),
            },
        }
    }
}
