use super::{JobFailure, JobHandle, JobState, LoadJobSpec, TableRef, Warehouse, WriteDisposition};
use crate::error::{PipelineError, Result};
use crate::frame::QueryFrame;
use crate::sql::Query;
use crate::upload::ObjectLocation;
use arrow_array::RecordBatch;
use async_trait::async_trait;
use object_store::ObjectStore;
use parking_lot::{Mutex, RwLock};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
struct LocalJob {
    polls: u32,
    outcome: JobState,
}

/// In-process warehouse over registered object stores.
///
/// Load jobs execute at submission; the first poll reports `Running` and every
/// later poll the final state, so callers exercise their polling loop.
#[derive(Debug, Default)]
pub struct LocalWarehouse {
    buckets: RwLock<HashMap<String, Arc<dyn ObjectStore>>>,
    tables: RwLock<HashMap<TableRef, Vec<RecordBatch>>>,
    jobs: Mutex<HashMap<String, LocalJob>>,
    next_job: AtomicU64,
}

impl LocalWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `gs://<bucket>/...` URIs against `store`.
    pub fn register_bucket(&self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) {
        self.buckets.write().insert(bucket.into(), store);
    }

    pub fn with_bucket(self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.register_bucket(bucket, store);
        self
    }

    /// Column names of a loaded table.
    pub fn table_columns(&self, table: &TableRef) -> Option<Vec<String>> {
        let tables = self.tables.read();
        let batches = tables.get(table)?;
        let first = batches.first()?;
        Some(
            first
                .schema()
                .fields()
                .iter()
                .map(|f| f.name().clone())
                .collect(),
        )
    }

    async fn execute(&self, spec: &LoadJobSpec) -> std::result::Result<u64, JobFailure> {
        let location: ObjectLocation = spec.source_uri.parse().map_err(|e: PipelineError| JobFailure {
            reason: "invalid".into(),
            message: e.to_string(),
        })?;
        let store = self
            .buckets
            .read()
            .get(&location.bucket)
            .cloned()
            .ok_or_else(|| JobFailure {
                reason: "notFound".into(),
                message: format!("Not found: bucket {}", location.bucket),
            })?;
        let path = location.object_path().map_err(|e| JobFailure {
            reason: "invalid".into(),
            message: e.to_string(),
        })?;

        let bytes = match store.get(&path).await {
            Ok(result) => result.bytes().await.map_err(|e| JobFailure {
                reason: "backendError".into(),
                message: e.to_string(),
            })?,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(JobFailure {
                    reason: "notFound".into(),
                    message: format!("Not found: URI {}", spec.source_uri),
                })
            }
            Err(e) => {
                return Err(JobFailure {
                    reason: "backendError".into(),
                    message: e.to_string(),
                })
            }
        };

        let invalid = |e: parquet::errors::ParquetError| JobFailure {
            reason: "invalid".into(),
            message: format!("Error while reading data: {e}"),
        };
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
            .map_err(invalid)?
            .build()
            .map_err(invalid)?;
        let batches = reader
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| JobFailure {
                reason: "invalid".into(),
                message: format!("Error while reading data: {e}"),
            })?;
        let rows: u64 = batches.iter().map(|b| b.num_rows() as u64).sum();

        let mut tables = self.tables.write();
        match spec.write_disposition {
            WriteDisposition::Truncate => {
                tables.insert(spec.destination.clone(), batches);
            }
            WriteDisposition::Append => {
                tables
                    .entry(spec.destination.clone())
                    .or_default()
                    .extend(batches);
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl Warehouse for LocalWarehouse {
    async fn submit_load(&self, spec: &LoadJobSpec) -> Result<JobHandle> {
        let job_id = format!("local_job_{}", self.next_job.fetch_add(1, Ordering::Relaxed) + 1);
        let outcome = match self.execute(spec).await {
            Ok(rows) => {
                info!(%job_id, rows, destination = %spec.destination, "local load committed");
                JobState::Succeeded
            }
            Err(failure) => {
                debug!(%job_id, reason = %failure.reason, "local load failed");
                JobState::Failed(failure)
            }
        };
        self.jobs
            .lock()
            .insert(job_id.clone(), LocalJob { polls: 0, outcome });
        Ok(JobHandle {
            project: spec.destination.project.clone(),
            job_id,
            location: Some("local".into()),
        })
    }

    async fn job_state(&self, job: &JobHandle) -> Result<JobState> {
        let mut jobs = self.jobs.lock();
        let entry = jobs
            .get_mut(&job.job_id)
            .ok_or_else(|| PipelineError::NotFound(format!("job {}", job.job_id)))?;
        entry.polls += 1;
        if entry.polls == 1 {
            return Ok(JobState::Running);
        }
        Ok(entry.outcome.clone())
    }

    async fn table_row_count(&self, table: &TableRef) -> Result<u64> {
        self.tables
            .read()
            .get(table)
            .map(|batches| batches.iter().map(|b| b.num_rows() as u64).sum())
            .ok_or_else(|| PipelineError::NotFound(format!("table {table}")))
    }

    async fn query(&self, query: &Query) -> Result<QueryFrame> {
        Err(PipelineError::Query(format!(
            "{}: the local warehouse does not execute SQL",
            query.label
        )))
    }
}
