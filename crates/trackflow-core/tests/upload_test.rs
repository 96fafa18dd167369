use async_trait::async_trait;
use futures::stream::BoxStream;
use object_store::memory::InMemory;
use object_store::path::Path as ObjPath;
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore, PutMultipartOpts,
    PutOptions, PutPayload, PutResult, UploadPart,
};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use trackflow_core::config::UPLOAD_CHUNK_UNIT;
use trackflow_core::{PipelineError, UploadRequest, Uploader};

/// Stalls injected into each step of a multipart session.
#[derive(Debug, Clone, Copy, Default)]
struct Delays {
    open: Duration,
    part: Duration,
    /// Applied after the object has been committed.
    complete: Duration,
    abort: Duration,
}

/// Delegates to an in-memory store with scripted stalls around multipart
/// uploads.
#[derive(Debug)]
struct SlowStore {
    inner: InMemory,
    delays: Delays,
}

impl SlowStore {
    fn new(delays: Delays) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemory::new(),
            delays,
        })
    }
}

impl fmt::Display for SlowStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlowStore({:?})", self.delays)
    }
}

#[derive(Debug)]
struct SlowUpload {
    inner: Box<dyn MultipartUpload>,
    delays: Delays,
}

#[async_trait]
impl MultipartUpload for SlowUpload {
    fn put_part(&mut self, data: PutPayload) -> UploadPart {
        let sent = self.inner.put_part(data);
        let delay = self.delays.part;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            sent.await
        })
    }

    async fn complete(&mut self) -> object_store::Result<PutResult> {
        let committed = self.inner.complete().await?;
        tokio::time::sleep(self.delays.complete).await;
        Ok(committed)
    }

    async fn abort(&mut self) -> object_store::Result<()> {
        tokio::time::sleep(self.delays.abort).await;
        self.inner.abort().await
    }
}

#[async_trait]
impl ObjectStore for SlowStore {
    async fn put_opts(
        &self,
        location: &ObjPath,
        payload: PutPayload,
        opts: PutOptions,
    ) -> object_store::Result<PutResult> {
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &ObjPath,
        opts: PutMultipartOpts,
    ) -> object_store::Result<Box<dyn MultipartUpload>> {
        tokio::time::sleep(self.delays.open).await;
        let inner = self.inner.put_multipart_opts(location, opts).await?;
        Ok(Box::new(SlowUpload {
            inner,
            delays: self.delays,
        }))
    }

    async fn get_opts(
        &self,
        location: &ObjPath,
        options: GetOptions,
    ) -> object_store::Result<GetResult> {
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &ObjPath) -> object_store::Result<()> {
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&ObjPath>) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(
        &self,
        prefix: Option<&ObjPath>,
    ) -> object_store::Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &ObjPath, to: &ObjPath) -> object_store::Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &ObjPath, to: &ObjPath) -> object_store::Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}

fn request(local: &std::path::Path, key: &str, chunk: usize, timeout: Duration) -> UploadRequest {
    UploadRequest {
        local_path: local.to_path_buf(),
        destination_key: key.to_string(),
        project: "test-project".to_string(),
        chunk_size_bytes: chunk,
        timeout,
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn multipart_upload_matches_local_file() {
    let dir = tempdir().unwrap();
    let local = dir.path().join("tracks.parquet");
    let data = payload(2 * UPLOAD_CHUNK_UNIT + 1000);
    std::fs::write(&local, &data).unwrap();

    let store = Arc::new(InMemory::new());
    let uploader = Uploader::with_store("bucket", store.clone());
    let report = uploader
        .upload(&request(&local, "tracks.parquet", UPLOAD_CHUNK_UNIT, Duration::from_secs(30)))
        .await
        .unwrap();

    assert_eq!(report.bytes, data.len() as u64);
    assert_eq!(report.parts, 3);
    assert_eq!(report.location.to_string(), "gs://bucket/tracks.parquet");

    let stored = store
        .get(&ObjPath::from("tracks.parquet"))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(stored.as_ref(), data.as_slice());
}

#[tokio::test]
async fn reupload_replaces_object() {
    let dir = tempdir().unwrap();
    let local = dir.path().join("tracks.parquet");
    let store = Arc::new(InMemory::new());
    let uploader = Uploader::with_store("bucket", store.clone());

    std::fs::write(&local, payload(UPLOAD_CHUNK_UNIT * 2)).unwrap();
    uploader
        .upload(&request(&local, "k.parquet", UPLOAD_CHUNK_UNIT, Duration::from_secs(30)))
        .await
        .unwrap();
    std::fs::write(&local, payload(10)).unwrap();
    let report = uploader
        .upload(&request(&local, "k.parquet", UPLOAD_CHUNK_UNIT, Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(report.parts, 1);

    let meta = store.head(&ObjPath::from("k.parquet")).await.unwrap();
    assert_eq!(meta.size, 10);
}

#[tokio::test]
async fn empty_file_uploads_empty_object() {
    let dir = tempdir().unwrap();
    let local = dir.path().join("empty.parquet");
    std::fs::write(&local, b"").unwrap();
    let store = Arc::new(InMemory::new());
    let report = Uploader::with_store("bucket", store.clone())
        .upload(&request(&local, "empty.parquet", UPLOAD_CHUNK_UNIT, Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(report.bytes, 0);
    assert_eq!(report.parts, 0);
    assert_eq!(store.head(&ObjPath::from("empty.parquet")).await.unwrap().size, 0);
}

#[tokio::test]
async fn chunk_size_must_be_multiple_of_unit() {
    let dir = tempdir().unwrap();
    let local = dir.path().join("tracks.parquet");
    std::fs::write(&local, payload(100)).unwrap();
    let store = Arc::new(InMemory::new());
    let uploader = Uploader::with_store("bucket", store.clone());

    for bad in [0, 1000, UPLOAD_CHUNK_UNIT + 1] {
        let err = uploader
            .upload(&request(&local, "k", bad, Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument(_)), "{bad}: {err}");
    }
    assert!(store.head(&ObjPath::from("k")).await.is_err());
}

#[tokio::test]
async fn missing_local_file_is_read_error() {
    let dir = tempdir().unwrap();
    let err = Uploader::with_store("bucket", Arc::new(InMemory::new()))
        .upload(&request(
            &dir.path().join("absent.parquet"),
            "k",
            UPLOAD_CHUNK_UNIT,
            Duration::from_secs(5),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Read(_)));
}

#[tokio::test]
async fn timeout_keeps_previous_object() {
    let dir = tempdir().unwrap();
    let local = dir.path().join("tracks.parquet");
    std::fs::write(&local, payload(UPLOAD_CHUNK_UNIT * 2)).unwrap();

    let store = SlowStore::new(Delays {
        open: Duration::from_secs(2),
        ..Default::default()
    });
    store
        .put(&ObjPath::from("k.parquet"), PutPayload::from_static(b"previous"))
        .await
        .unwrap();

    let err = Uploader::with_store("bucket", store.clone())
        .upload(&request(&local, "k.parquet", UPLOAD_CHUNK_UNIT, Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Timeout(_)), "{err}");

    let kept = store
        .get(&ObjPath::from("k.parquet"))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(kept.as_ref(), b"previous");
}

async fn stored_bytes(store: &SlowStore, key: &str) -> Vec<u8> {
    store
        .get(&ObjPath::from(key))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn stalled_parts_time_out_within_abort_grace() {
    let dir = tempdir().unwrap();
    let local = dir.path().join("tracks.parquet");
    std::fs::write(&local, payload(UPLOAD_CHUNK_UNIT * 2)).unwrap();

    let store = SlowStore::new(Delays {
        part: Duration::from_secs(5),
        abort: Duration::from_secs(3),
        ..Default::default()
    });
    store
        .put(&ObjPath::from("k.parquet"), PutPayload::from_static(b"previous"))
        .await
        .unwrap();

    let started = Instant::now();
    let err = Uploader::with_store("bucket", store.clone())
        .upload(&request(&local, "k.parquet", UPLOAD_CHUNK_UNIT, Duration::from_millis(200)))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, PipelineError::Timeout(_)), "{err}");
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    assert_eq!(stored_bytes(&store, "k.parquet").await, b"previous");
}

#[tokio::test]
async fn slow_commit_reports_the_committed_object() {
    let dir = tempdir().unwrap();
    let local = dir.path().join("tracks.parquet");
    let data = payload(UPLOAD_CHUNK_UNIT * 2);
    std::fs::write(&local, &data).unwrap();

    let store = SlowStore::new(Delays {
        complete: Duration::from_millis(500),
        ..Default::default()
    });
    store
        .put(&ObjPath::from("k.parquet"), PutPayload::from_static(b"previous"))
        .await
        .unwrap();

    // The commit lands before the deadline passes and returns after it.
    let report = Uploader::with_store("bucket", store.clone())
        .upload(&request(&local, "k.parquet", UPLOAD_CHUNK_UNIT, Duration::from_millis(200)))
        .await
        .unwrap();

    assert_eq!(report.bytes, data.len() as u64);
    assert_eq!(report.parts, 2);
    assert!(report.elapsed >= Duration::from_millis(500));
    assert_eq!(stored_bytes(&store, "k.parquet").await, data);
}
