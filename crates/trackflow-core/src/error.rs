use thiserror::Error;

/// Errors raised by the pipeline stages and the dashboard model.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("read error: {0}")]
    Read(String),
    #[error("write error: {0}")]
    Write(String),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("load job {job_id} failed ({reason}): {message}")]
    LoadJob {
        job_id: String,
        reason: String,
        message: String,
    },
    #[error("query error: {0}")]
    Query(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("remote error: {0}")]
    Remote(String),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

impl PipelineError {
    /// True for failures caused by missing or rejected ambient credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, PipelineError::Auth(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::NotFound(_))
    }

    /// Failures that mean the warehouse is unreachable as a whole rather than
    /// a single statement going wrong.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, PipelineError::Auth(_) | PipelineError::Remote(_))
    }
}

impl From<object_store::Error> for PipelineError {
    fn from(e: object_store::Error) -> Self {
        match e {
            object_store::Error::NotFound { path, .. } => PipelineError::NotFound(path),
            object_store::Error::PermissionDenied { path, source } => {
                PipelineError::Auth(format!("permission denied for {path}: {source}"))
            }
            object_store::Error::Unauthenticated { path, source } => {
                PipelineError::Auth(format!("unauthenticated access to {path}: {source}"))
            }
            object_store::Error::NotImplemented => {
                PipelineError::Configuration("operation not supported by object store".into())
            }
            other => PipelineError::Write(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PipelineError::Timeout(e.to_string())
        } else if e.is_decode() {
            PipelineError::Remote(format!("malformed response: {e}"))
        } else {
            PipelineError::Remote(e.to_string())
        }
    }
}
