//! Relational backend: pooled connections, transactions, schema and COPY staging

pub mod copy;
pub mod pool;
pub mod schema;
pub mod transaction;

pub use pool::{connect, connect_lazy, connect_with_retry};
pub use schema::ensure_schema;
pub use transaction::run_in_transaction;
