//! Staged bulk ingestion
//!
//! Both pipelines follow the same shape: validate, authorize, then inside a
//! single transaction COPY the rows into a transaction-local staging table,
//! merge into the durable table and drop the staging table. Any failure
//! rolls the whole batch back.

pub mod readings;
pub mod triples;

pub use readings::insert_readings;
pub use triples::add_triples;

/// Row counts of one ingestion call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Rows copied into staging
    pub staged: u64,
    /// Rows inserted or updated in the durable table
    pub applied: u64,
}
