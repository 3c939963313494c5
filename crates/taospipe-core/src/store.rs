//! The seam between the pipeline and the physical database connection

use std::sync::Arc;

use crate::error::StoreError;

/// One result row: column label → value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Something that can run statement text against the time-series store.
///
/// Implementations are shared by every worker thread, so both calls take
/// `&self` and must be safe to invoke concurrently.
pub trait Store: Send + Sync + 'static {
    /// Run a write statement, returning the affected row count
    fn execute(&self, sql: &str) -> Result<u64, StoreError>;

    /// Run a read statement, returning every result row
    fn query(&self, sql: &str) -> Result<Vec<Row>, StoreError>;
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn execute(&self, sql: &str) -> Result<u64, StoreError> {
        (**self).execute(sql)
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>, StoreError> {
        (**self).query(sql)
    }
}

impl<S: Store + ?Sized> Store for Box<S> {
    fn execute(&self, sql: &str) -> Result<u64, StoreError> {
        (**self).execute(sql)
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>, StoreError> {
        (**self).query(sql)
    }
}
