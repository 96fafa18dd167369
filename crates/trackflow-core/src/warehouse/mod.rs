//! Warehouse access for load jobs, row counts and dashboard queries.
//!
//! # Backends
//!
//! ```text
//!              ┌────────────────────┐
//!  load / ────►│  dyn Warehouse      │
//!  dashboard   └─────────┬──────────┘
//!                        │
//!          ┌─────────────┴─────────────┐
//!          ▼                           ▼
//!   BigQueryClient                LocalWarehouse
//!   (REST v2, bearer token)       (in-process, Parquet from object stores)
//! ```

pub mod bigquery;
pub mod local;
pub mod token;

pub use bigquery::BigQueryClient;
pub use local::LocalWarehouse;
pub use token::TokenProvider;

use crate::error::Result;
use crate::frame::QueryFrame;
use crate::sql::Query;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// `project.dataset.table`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(project: &str, dataset: &str, table: &str) -> Self {
        Self {
            project: project.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceFormat {
    Parquet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WriteDisposition {
    /// Existing rows are discarded before the load commits.
    #[serde(rename = "WRITE_TRUNCATE")]
    Truncate,
    #[serde(rename = "WRITE_APPEND")]
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJobSpec {
    pub source_uri: String,
    pub destination: TableRef,
    pub source_format: SourceFormat,
    pub autodetect: bool,
    pub write_disposition: WriteDisposition,
}

impl LoadJobSpec {
    /// Parquet source, schema autodetection, table replaced.
    pub fn replace_from_parquet(source_uri: impl Into<String>, destination: TableRef) -> Self {
        Self {
            source_uri: source_uri.into(),
            destination,
            source_format: SourceFormat::Parquet,
            autodetect: true,
            write_disposition: WriteDisposition::Truncate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub project: String,
    pub job_id: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed(JobFailure),
}

#[async_trait]
pub trait Warehouse: Send + Sync + fmt::Debug {
    async fn submit_load(&self, spec: &LoadJobSpec) -> Result<JobHandle>;

    async fn job_state(&self, job: &JobHandle) -> Result<JobState>;

    async fn table_row_count(&self, table: &TableRef) -> Result<u64>;

    async fn query(&self, query: &Query) -> Result<QueryFrame>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_spec_uses_truncate_and_autodetect() {
        let table = TableRef::new("p", "d", "t");
        let spec = LoadJobSpec::replace_from_parquet("gs://b/k.parquet", table.clone());
        assert_eq!(spec.write_disposition, WriteDisposition::Truncate);
        assert!(spec.autodetect);
        assert_eq!(spec.source_format, SourceFormat::Parquet);
        assert_eq!(table.to_string(), "p.d.t");
        assert_eq!(
            serde_json::to_value(spec.write_disposition).unwrap(),
            serde_json::json!("WRITE_TRUNCATE")
        );
        assert_eq!(
            serde_json::to_value(spec.source_format).unwrap(),
            serde_json::json!("PARQUET")
        );
    }
}
