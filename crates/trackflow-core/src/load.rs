use crate::error::{PipelineError, Result};
use crate::warehouse::{JobState, LoadJobSpec, TableRef, Warehouse};
use std::time::Duration;
use tracing::{debug, info};

/// Replace `table` with the Parquet object at `source_uri` and return the
/// table's row count once the job has finished.
///
/// The job is polled every `poll_interval` until it reaches a terminal state;
/// there is no client-side deadline.
pub async fn load(
    warehouse: &dyn Warehouse,
    table: &TableRef,
    source_uri: &str,
    poll_interval: Duration,
) -> Result<u64> {
    if source_uri.trim().is_empty() {
        return Err(PipelineError::InvalidArgument("source uri cannot be empty".into()));
    }
    println!("Starting job to load data from {source_uri} into {table}...");
    let spec = LoadJobSpec::replace_from_parquet(source_uri, table.clone());
    let job = warehouse.submit_load(&spec).await?;
    info!(job_id = %job.job_id, %table, source_uri, "load job started");

    let mut polls = 0u32;
    loop {
        polls += 1;
        match warehouse.job_state(&job).await? {
            JobState::Succeeded => break,
            JobState::Failed(failure) => {
                if failure.reason == "notFound" {
                    return Err(PipelineError::NotFound(failure.message));
                }
                return Err(PipelineError::LoadJob {
                    job_id: job.job_id,
                    reason: failure.reason,
                    message: failure.message,
                });
            }
            state => {
                debug!(job_id = %job.job_id, ?state, polls, "load job in progress");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    let rows = warehouse.table_row_count(table).await?;
    info!(job_id = %job.job_id, %table, rows, polls, "load job finished");
    println!("Loaded {rows} rows into {table}.");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::QueryFrame;
    use crate::sql::Query;
    use crate::warehouse::{JobFailure, JobHandle};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays a fixed sequence of job states.
    #[derive(Debug)]
    struct Scripted {
        states: Mutex<VecDeque<JobState>>,
        rows: u64,
        submitted: Mutex<Vec<LoadJobSpec>>,
    }

    impl Scripted {
        fn new(states: Vec<JobState>, rows: u64) -> Self {
            Self {
                states: Mutex::new(states.into()),
                rows,
                submitted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Warehouse for Scripted {
        async fn submit_load(&self, spec: &LoadJobSpec) -> Result<JobHandle> {
            self.submitted.lock().push(spec.clone());
            Ok(JobHandle {
                project: spec.destination.project.clone(),
                job_id: "job_1".into(),
                location: None,
            })
        }

        async fn job_state(&self, _job: &JobHandle) -> Result<JobState> {
            Ok(self.states.lock().pop_front().unwrap_or(JobState::Succeeded))
        }

        async fn table_row_count(&self, _table: &TableRef) -> Result<u64> {
            Ok(self.rows)
        }

        async fn query(&self, _query: &Query) -> Result<QueryFrame> {
            Ok(QueryFrame::default())
        }
    }

    #[tokio::test]
    async fn polls_until_done_then_counts() {
        let wh = Scripted::new(vec![JobState::Pending, JobState::Running, JobState::Succeeded], 42);
        let table = TableRef::new("p", "spotify", "tracks");
        let rows = load(&wh, &table, "gs://b/tracks.parquet", Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(rows, 42);
        assert!(wh.states.lock().is_empty());
        let submitted = wh.submitted.lock();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].source_uri, "gs://b/tracks.parquet");
        assert_eq!(submitted[0].destination, table);
    }

    #[tokio::test]
    async fn failed_job_surfaces_reason() {
        let wh = Scripted::new(
            vec![JobState::Failed(JobFailure {
                reason: "invalid".into(),
                message: "Error while reading data".into(),
            })],
            0,
        );
        let err = load(&wh, &TableRef::new("p", "d", "t"), "gs://b/k", Duration::from_millis(1))
            .await
            .unwrap_err();
        match err {
            PipelineError::LoadJob { job_id, reason, .. } => {
                assert_eq!(job_id, "job_1");
                assert_eq!(reason, "invalid");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_found_reason_maps_to_not_found() {
        let wh = Scripted::new(
            vec![JobState::Failed(JobFailure {
                reason: "notFound".into(),
                message: "Not found: URI gs://b/k".into(),
            })],
            0,
        );
        let err = load(&wh, &TableRef::new("p", "d", "t"), "gs://b/k", Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
