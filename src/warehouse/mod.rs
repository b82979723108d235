//! Query warehouse abstraction for the function-calling loop.
//!
//! Provides a trait-based interface over an analytics backend with datasets,
//! tables and a cost-bounded query engine.

mod bigquery;

pub use bigquery::BigQueryWarehouse;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Description of a single table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Fully qualified table ID.
    pub table_id: String,
    pub description: Option<String>,
    pub column_names: Vec<String>,
    pub num_rows: Option<u64>,
}

/// Trait for warehouse implementations.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// IDs of every dataset in the project.
    async fn list_datasets(&self) -> Result<Vec<String>>;

    /// IDs of the tables in a dataset.
    async fn list_tables(&self, dataset_id: &str) -> Result<Vec<String>>;

    /// Description and columns of a table.
    async fn get_table(&self, table_id: &str) -> Result<TableInfo>;

    /// Run a SQL query, refusing to bill more than `max_bytes_billed`.
    ///
    /// Rows are returned as JSON objects keyed by column name.
    async fn run_query(&self, sql: &str, max_bytes_billed: u64) -> Result<Vec<Value>>;
}
