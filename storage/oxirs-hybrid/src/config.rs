use crate::error::{HybridError, HybridResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hybrid store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HybridConfig {
    /// Relational backend connection settings
    pub database: DatabaseConfig,

    /// External reasoner settings
    pub reasoner: ReasonerConfig,

    /// Per-category operation deadlines
    pub timeouts: TimeoutConfig,

    /// Export pipeline settings
    pub export: ExportConfig,

    /// Qualification engine settings
    pub qualify: QualifyConfig,
}

/// Relational backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database host
    pub host: String,

    /// Database name
    pub database: String,

    /// Login user
    pub user: String,

    /// Login password
    pub password: String,

    /// Database port
    pub port: u16,

    /// Maximum pooled connections
    pub max_connections: u32,

    /// Idle connections are closed after this long
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Connections are recycled after this long regardless of use
    #[serde(with = "humantime_serde")]
    pub max_lifetime: Duration,

    /// Fixed backoff of the startup connect loop
    #[serde(with = "humantime_serde")]
    pub connect_retry_interval: Duration,
}

/// External reasoner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerConfig {
    /// `host:port` of the reasoner HTTP service
    pub address: String,

    /// Per-request timeout for reasoner calls
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

/// Deadlines applied per operation category
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bulk reads: export, graph materialization, qualification jobs
    #[serde(with = "humantime_serde")]
    pub data_read: Duration,

    /// Bulk writes: reading and triple ingestion
    #[serde(with = "humantime_serde")]
    pub data_write: Duration,

    /// Stream registration and other small metadata writes
    #[serde(with = "humantime_serde")]
    pub registry: Duration,
}

/// Export pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Rows per data frame before a flush
    pub flush_rows: usize,
}

/// Qualification engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualifyConfig {
    /// Size of the fixed worker pool
    pub workers: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            database: "mortar".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            port: 5432,
            max_connections: 50,
            idle_timeout: Duration::from_secs(15 * 60),
            max_lifetime: Duration::from_secs(15 * 60),
            connect_retry_interval: Duration::from_secs(5),
        }
    }
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:3030".to_string(),
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            data_read: Duration::from_secs(300),
            data_write: Duration::from_secs(300),
            registry: Duration::from_secs(30),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            flush_rows: 2_000_000,
        }
    }
}

impl Default for QualifyConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

impl HybridConfig {
    /// Local development settings: postgres on localhost:5434 with placeholder credentials
    pub fn insecure_defaults() -> Self {
        Self {
            database: DatabaseConfig {
                host: "localhost".to_string(),
                database: "mortar".to_string(),
                user: "mortarchangeme".to_string(),
                password: "mortarpasswordchangeme".to_string(),
                port: 5434,
                ..DatabaseConfig::default()
            },
            ..Self::default()
        }
    }

    /// Reject settings the store cannot run with
    pub fn validate(&self) -> HybridResult<()> {
        let db = &self.database;
        if db.host.is_empty() {
            return Err(HybridError::Config("database host is empty".to_string()));
        }
        if db.database.is_empty() {
            return Err(HybridError::Config("database name is empty".to_string()));
        }
        if db.user.is_empty() {
            return Err(HybridError::Config("database user is empty".to_string()));
        }
        if db.port == 0 {
            return Err(HybridError::Config("database port is 0".to_string()));
        }
        if db.max_connections == 0 {
            return Err(HybridError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.reasoner.address.is_empty() {
            return Err(HybridError::Config("reasoner address is empty".to_string()));
        }
        if self.export.flush_rows == 0 {
            return Err(HybridError::Config(
                "export flush_rows must be at least 1".to_string(),
            ));
        }
        if self.qualify.workers == 0 {
            return Err(HybridError::Config(
                "qualify workers must be at least 1".to_string(),
            ));
        }
        let t = &self.timeouts;
        if t.data_read.is_zero() || t.data_write.is_zero() || t.registry.is_zero() {
            return Err(HybridError::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }
}
