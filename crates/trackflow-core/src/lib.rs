pub mod cache;
pub mod config;
pub mod convert;
pub mod dashboard;
pub mod error;
pub mod frame;
pub mod load;
pub mod sql;
pub mod upload;
pub mod warehouse;

pub use cache::{CacheStats, TtlCache};
pub use config::{DashboardConfig, PipelineConfig};
pub use convert::{artifact_path_for, convert, ArtifactCompression, ConvertOptions, ConvertReport};
pub use dashboard::{Dashboard, Page, Panel, PanelBody, Selection};
pub use error::{PipelineError, Result};
pub use frame::{Cell, QueryFrame};
pub use load::load;
pub use sql::{ParamValue, Query};
pub use upload::{upload_to_gcs, ObjectLocation, UploadReport, UploadRequest, Uploader};
pub use warehouse::{
    BigQueryClient, JobHandle, JobState, LoadJobSpec, LocalWarehouse, TableRef, TokenProvider,
    Warehouse,
};
