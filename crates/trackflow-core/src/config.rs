use crate::error::{PipelineError, Result};
use crate::warehouse::TableRef;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PROJECT: &str = "data-engineering-spotify";
pub const DEFAULT_BUCKET: &str = "spotify-data-engineering-spotify";
pub const DEFAULT_DATASET: &str = "spotify";
pub const DEFAULT_TABLE: &str = "cleaned_tracks_features";
pub const DEFAULT_ANALYSIS_VIEW: &str =
    "data-engineering-spotify.dbt_spotify.spotify_music_analysis";

/// Smallest unit the object store accepts for resumable uploads.
pub const UPLOAD_CHUNK_UNIT: usize = 256 * 1024;
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Settings for the one-shot pipeline stages.
///
/// Values come from defaults, then an optional TOML file, then command line
/// overrides applied through the `with_*` methods.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub project: String,
    pub bucket: String,
    pub dataset: String,
    pub table: String,
    /// Object key for the uploaded artifact; defaults to the artifact file name.
    pub destination_key: Option<String>,
    pub chunk_size_bytes: usize,
    pub upload_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub delimiter: char,
    /// Override for the warehouse REST endpoint (emulators, tests)
    pub warehouse_endpoint: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            project: DEFAULT_PROJECT.to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            dataset: DEFAULT_DATASET.to_string(),
            table: DEFAULT_TABLE.to_string(),
            destination_key: None,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            upload_timeout_secs: DEFAULT_UPLOAD_TIMEOUT_SECS,
            poll_interval_ms: 1000,
            delimiter: ',',
            warehouse_endpoint: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(contents)
            .map_err(|e| PipelineError::Configuration(format!("invalid config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!("read {} failed: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load `path` when given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("project", &self.project),
            ("bucket", &self.bucket),
            ("dataset", &self.dataset),
            ("table", &self.table),
        ] {
            if value.trim().is_empty() {
                return Err(PipelineError::Configuration(format!(
                    "{name} must not be empty"
                )));
            }
        }
        validate_chunk_size(self.chunk_size_bytes)?;
        if self.upload_timeout_secs == 0 {
            return Err(PipelineError::Configuration(
                "upload_timeout_secs must be positive".into(),
            ));
        }
        if !self.delimiter.is_ascii() {
            return Err(PipelineError::Configuration(
                "delimiter must be a single ASCII character".into(),
            ));
        }
        Ok(())
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = dataset.into();
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_destination_key(mut self, key: impl Into<String>) -> Self {
        self.destination_key = Some(key.into());
        self
    }

    pub fn with_chunk_size_bytes(mut self, bytes: usize) -> Self {
        self.chunk_size_bytes = bytes;
        self
    }

    pub fn with_upload_timeout_secs(mut self, secs: u64) -> Self {
        self.upload_timeout_secs = secs;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_warehouse_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.warehouse_endpoint = Some(endpoint.into());
        self
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.project, &self.dataset, &self.table)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Object key used for `artifact`: the configured key, or the file name.
    pub fn destination_key_for(&self, artifact: &Path) -> Result<String> {
        if let Some(key) = &self.destination_key {
            return Ok(key.clone());
        }
        artifact
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                PipelineError::InvalidArgument(format!(
                    "cannot derive object key from {}",
                    artifact.display()
                ))
            })
    }
}

/// Chunk sizes must be positive multiples of [`UPLOAD_CHUNK_UNIT`].
pub fn validate_chunk_size(bytes: usize) -> Result<()> {
    if bytes == 0 || bytes % UPLOAD_CHUNK_UNIT != 0 {
        return Err(PipelineError::InvalidArgument(format!(
            "chunk size {bytes} is not a positive multiple of {UPLOAD_CHUNK_UNIT} bytes"
        )));
    }
    Ok(())
}

/// Settings for the dashboard process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub project: String,
    /// Fully qualified `project.dataset.view` the panels query.
    pub analysis_view: String,
    pub bind_addr: String,
    pub cache_ttl_secs: u64,
    pub sample_limit: usize,
    pub min_artist_tracks: u32,
    pub warehouse_endpoint: Option<String>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            project: DEFAULT_PROJECT.to_string(),
            analysis_view: DEFAULT_ANALYSIS_VIEW.to_string(),
            bind_addr: "127.0.0.1:8501".to_string(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            sample_limit: 5000,
            min_artist_tracks: 5,
            warehouse_endpoint: None,
        }
    }
}

impl DashboardConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(contents)
            .map_err(|e| PipelineError::Configuration(format!("invalid config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let contents = std::fs::read_to_string(p).map_err(|e| {
                    PipelineError::Configuration(format!("read {} failed: {e}", p.display()))
                })?;
                Self::from_toml_str(&contents)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let parts: Vec<&str> = self.analysis_view.split('.').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(PipelineError::Configuration(format!(
                "analysis_view must be project.dataset.view, got '{}'",
                self.analysis_view
            )));
        }
        if self
            .analysis_view
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(PipelineError::Configuration(format!(
                "analysis_view contains unsupported characters: '{}'",
                self.analysis_view
            )));
        }
        if self.cache_ttl_secs == 0 {
            return Err(PipelineError::Configuration(
                "cache_ttl_secs must be positive".into(),
            ));
        }
        if self.sample_limit == 0 {
            return Err(PipelineError::Configuration(
                "sample_limit must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
