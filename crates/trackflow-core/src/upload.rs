use crate::config::validate_chunk_size;
use crate::error::{PipelineError, Result};
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjPath;
use object_store::{MultipartUpload, ObjectStore, PutPayload};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant as Deadline};
use tracing::{debug, info, warn};

/// Parts allowed in flight before the reader waits for the store to catch up.
const MAX_PARTS_IN_FLIGHT: usize = 4;
/// Extra time an abort may take after the deadline.
const ABORT_GRACE: Duration = Duration::from_secs(1);

/// A blob address: `gs://bucket/key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn object_path(&self) -> Result<ObjPath> {
        ObjPath::parse(&self.key)
            .map_err(|e| PipelineError::InvalidArgument(format!("invalid object key '{}': {e}", self.key)))
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.key)
    }
}

impl FromStr for ObjectLocation {
    type Err = PipelineError;

    fn from_str(uri: &str) -> Result<Self> {
        let rest = uri.strip_prefix("gs://").ok_or_else(|| {
            PipelineError::InvalidArgument(format!("'{uri}' is not a gs:// URI"))
        })?;
        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok(Self::new(bucket, key))
            }
            _ => Err(PipelineError::InvalidArgument(format!(
                "'{uri}' must name both a bucket and an object"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub local_path: PathBuf,
    pub destination_key: String,
    pub project: String,
    pub chunk_size_bytes: usize,
    /// Bound on the whole transfer, not on individual parts.
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct UploadReport {
    pub location: ObjectLocation,
    pub bytes: u64,
    pub parts: usize,
    pub elapsed: Duration,
}

/// Pushes local files into one bucket.
///
/// The deadline covers opening the session, reading the file and sending
/// every part. A transfer that misses it is never committed: the multipart
/// session is aborted and whatever was at the key before stays in place.
/// Once every part is acknowledged the upload is committed with a single
/// completion request, which is atomic on the store and runs to its end so
/// the reported outcome always matches what the key holds.
#[derive(Debug, Clone)]
pub struct Uploader {
    bucket: String,
    store: Arc<dyn ObjectStore>,
}

impl Uploader {
    /// Google Cloud Storage client for `bucket` using ambient credentials
    /// (`GOOGLE_SERVICE_ACCOUNT`, `GOOGLE_APPLICATION_CREDENTIALS`, or the
    /// instance metadata server).
    pub fn for_gcs(bucket: &str, project: &str) -> Result<Self> {
        if bucket.trim().is_empty() {
            return Err(PipelineError::InvalidArgument("bucket name cannot be empty".into()));
        }
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| {
                PipelineError::Auth(format!(
                    "cannot build storage client for project {project}: {e}"
                ))
            })?;
        debug!(bucket, project, "storage client ready");
        Ok(Self::with_store(bucket, Arc::new(store)))
    }

    pub fn with_store(bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket: bucket.into(),
            store,
        }
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store)
    }

    pub async fn upload(&self, req: &UploadRequest) -> Result<UploadReport> {
        validate_chunk_size(req.chunk_size_bytes)?;
        if req.timeout.is_zero() {
            return Err(PipelineError::InvalidArgument("timeout must be positive".into()));
        }
        let location = ObjectLocation::new(&self.bucket, &req.destination_key);
        let path = location.object_path()?;
        let started = Instant::now();
        let deadline = Deadline::now() + req.timeout;

        let mut file = tokio::fs::File::open(&req.local_path)
            .await
            .map_err(|e| read_err(&req.local_path, e))?;
        let local_size = file
            .metadata()
            .await
            .map_err(|e| read_err(&req.local_path, e))?
            .len();

        info!(
            project = %req.project,
            source = %req.local_path.display(),
            destination = %location,
            bytes = local_size,
            chunk_size = req.chunk_size_bytes,
            "starting upload"
        );

        let parts = if local_size == 0 {
            self.store.put(&path, PutPayload::new()).await?;
            0
        } else {
            self.stream_parts(&mut file, &path, req, deadline).await?
        };

        let meta = self.store.head(&path).await?;
        if meta.size as u64 != local_size {
            return Err(PipelineError::Write(format!(
                "{location} holds {} bytes after upload, expected {local_size}",
                meta.size
            )));
        }

        let elapsed = started.elapsed();
        info!(destination = %location, bytes = local_size, parts, ?elapsed, "upload complete");
        println!("Uploaded {} to {}", req.local_path.display(), location);
        Ok(UploadReport {
            location,
            bytes: local_size,
            parts,
            elapsed,
        })
    }

    async fn stream_parts(
        &self,
        file: &mut tokio::fs::File,
        path: &ObjPath,
        req: &UploadRequest,
        deadline: Deadline,
    ) -> Result<usize> {
        let mut upload = within(deadline, req.timeout, self.store.put_multipart(path)).await??;
        let mut in_flight = JoinSet::new();
        let parts = match send_parts(file, &mut *upload, &mut in_flight, req, deadline).await {
            Ok(parts) => parts,
            Err(e) => {
                in_flight.abort_all();
                abort(&mut *upload, path).await;
                return Err(e);
            }
        };
        upload.complete().await?;
        Ok(parts)
    }
}

/// Read `req.local_path` in chunk-sized parts and wait until the store has
/// acknowledged every one of them.
async fn send_parts(
    file: &mut tokio::fs::File,
    upload: &mut dyn MultipartUpload,
    in_flight: &mut JoinSet<object_store::Result<()>>,
    req: &UploadRequest,
    deadline: Deadline,
) -> Result<usize> {
    let mut parts = 0usize;
    loop {
        let mut buf = vec![0u8; req.chunk_size_bytes];
        let filled = within(deadline, req.timeout, read_chunk(file, &mut buf))
            .await?
            .map_err(|e| read_err(&req.local_path, e))?;
        if filled == 0 {
            break;
        }
        buf.truncate(filled);
        while in_flight.len() >= MAX_PARTS_IN_FLIGHT {
            join_part(in_flight, deadline, req.timeout).await?;
        }
        in_flight.spawn(upload.put_part(PutPayload::from(buf)));
        parts += 1;
        debug!(part = parts, bytes = filled, "queued part");
    }
    while !in_flight.is_empty() {
        join_part(in_flight, deadline, req.timeout).await?;
    }
    Ok(parts)
}

async fn join_part(
    in_flight: &mut JoinSet<object_store::Result<()>>,
    deadline: Deadline,
    budget: Duration,
) -> Result<()> {
    match within(deadline, budget, in_flight.join_next()).await? {
        Some(Ok(sent)) => Ok(sent?),
        Some(Err(e)) => Err(PipelineError::Write(format!("part upload task failed: {e}"))),
        None => Ok(()),
    }
}

/// `upload(bucket, local_path, destination_key, project, chunk_size_bytes, timeout_seconds)`
/// against Google Cloud Storage.
pub async fn upload_to_gcs(
    bucket: &str,
    local_path: &Path,
    destination_key: &str,
    project: &str,
    chunk_size_bytes: usize,
    timeout_seconds: u64,
) -> Result<UploadReport> {
    let uploader = Uploader::for_gcs(bucket, project)?;
    uploader
        .upload(&UploadRequest {
            local_path: local_path.to_path_buf(),
            destination_key: destination_key.to_string(),
            project: project.to_string(),
            chunk_size_bytes,
            timeout: Duration::from_secs(timeout_seconds),
        })
        .await
}

async fn within<F, T>(deadline: Deadline, budget: Duration, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    timeout_at(deadline, fut).await.map_err(|_| {
        PipelineError::Timeout(format!("upload exceeded {}s", budget.as_secs_f64()))
    })
}

async fn read_chunk(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Abort is best effort and bounded on its own, since the deadline has
/// usually passed already when it runs.
async fn abort(upload: &mut dyn MultipartUpload, path: &ObjPath) {
    match tokio::time::timeout(ABORT_GRACE, upload.abort()).await {
        Ok(Ok(())) => warn!(%path, "multipart upload aborted"),
        Ok(Err(e)) => warn!(%path, error = %e, "failed to abort multipart upload"),
        Err(_) => warn!(
            %path,
            grace = ?ABORT_GRACE,
            "abort did not finish in time, leaving the session to expire uncommitted"
        ),
    }
}

fn read_err(path: &Path, e: std::io::Error) -> PipelineError {
    if e.kind() == std::io::ErrorKind::NotFound {
        PipelineError::Read(format!("{} does not exist", path.display()))
    } else {
        PipelineError::Read(format!("read {} failed: {e}", path.display()))
    }
}
