use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use object_store::local::LocalFileSystem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use trackflow_core::upload::ObjectLocation;
use trackflow_core::{
    artifact_path_for, convert, load, ArtifactCompression, BigQueryClient, ConvertOptions,
    ConvertReport, LocalWarehouse, PipelineConfig, UploadReport, UploadRequest, Uploader,
};

#[derive(Parser, Debug)]
#[command(name = "trackflow")]
#[command(about = "Convert CSV to Parquet, upload to GCS and load into BigQuery", long_about = None)]
struct Cli {
    /// TOML file with pipeline settings. Flags override file values.
    #[arg(short, long, global = true, env = "TRACKFLOW_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Debug, Default)]
struct Overrides {
    /// Cloud project that owns the bucket and dataset
    #[arg(long)]
    project: Option<String>,
    #[arg(long)]
    bucket: Option<String>,
    #[arg(long)]
    dataset: Option<String>,
    #[arg(long)]
    table: Option<String>,
    /// Object key for the artifact (default: artifact file name)
    #[arg(long)]
    key: Option<String>,
    /// Upload part size; must be a multiple of 262144
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Upload deadline in seconds for the whole transfer
    #[arg(long)]
    timeout: Option<u64>,
    /// Load job poll interval in milliseconds
    #[arg(long)]
    poll_ms: Option<u64>,
    /// Warehouse REST endpoint (emulators)
    #[arg(long)]
    warehouse_endpoint: Option<String>,
}

#[derive(Args, Clone, Debug)]
struct ConvertArgs {
    #[arg(long)]
    delimiter: Option<char>,
    #[arg(long, value_enum, default_value_t = Codec::Snappy)]
    compression: Codec,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Codec {
    None,
    Snappy,
    Zstd,
}

impl From<Codec> for ArtifactCompression {
    fn from(c: Codec) -> Self {
        match c {
            Codec::None => ArtifactCompression::None,
            Codec::Snappy => ArtifactCompression::Snappy,
            Codec::Zstd => ArtifactCompression::Zstd,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert a CSV file into a Parquet artifact next to it
    Convert {
        csv: PathBuf,
        /// Destination path (default: same base name, .parquet)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        opts: ConvertArgs,
    },
    /// Upload a local file to the bucket
    Upload {
        file: PathBuf,
        /// Use a directory as the bucket instead of GCS
        #[arg(long)]
        local: Option<PathBuf>,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Replace the destination table with a gs:// Parquet object
    Load {
        uri: String,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Convert, upload and load in order
    ///
    /// With --local the bucket is a directory and the warehouse runs
    /// in-process; nothing leaves the machine.
    Run {
        csv: PathBuf,
        #[arg(long)]
        local: Option<PathBuf>,
        #[command(flatten)]
        opts: ConvertArgs,
        #[command(flatten)]
        overrides: Overrides,
    },
}

fn init_tracing() {
    let log_format = std::env::var("TRACKFLOW_LOG_FORMAT").unwrap_or_default();
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    execute(cli).await
}

async fn execute(cli: Cli) -> Result<()> {
    let base = PipelineConfig::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Convert { csv, output, opts } => {
            let output = output.unwrap_or_else(|| artifact_path_for(&csv));
            run_convert(&base, &csv, &output, &opts).await?;
        }
        Commands::Upload {
            file,
            local,
            overrides,
        } => {
            let cfg = apply(base, &overrides)?;
            let uploader = uploader_for(&cfg, local.as_deref())?;
            run_upload(&cfg, &uploader, &file).await?;
        }
        Commands::Load { uri, overrides } => {
            let cfg = apply(base, &overrides)?;
            uri.parse::<ObjectLocation>()?;
            let warehouse = bigquery_for(&cfg)?;
            load(&warehouse, &cfg.table_ref(), &uri, cfg.poll_interval()).await?;
        }
        Commands::Run {
            csv,
            local,
            opts,
            overrides,
        } => {
            let cfg = apply(base, &overrides)?;
            run_pipeline(&cfg, &csv, local.as_deref(), &opts).await?;
        }
    }
    Ok(())
}

fn apply(mut cfg: PipelineConfig, o: &Overrides) -> Result<PipelineConfig> {
    if let Some(v) = &o.project {
        cfg = cfg.with_project(v.clone());
    }
    if let Some(v) = &o.bucket {
        cfg = cfg.with_bucket(v.clone());
    }
    if let Some(v) = &o.dataset {
        cfg = cfg.with_dataset(v.clone());
    }
    if let Some(v) = &o.table {
        cfg = cfg.with_table(v.clone());
    }
    if let Some(v) = &o.key {
        cfg = cfg.with_destination_key(v.clone());
    }
    if let Some(v) = o.chunk_size {
        cfg = cfg.with_chunk_size_bytes(v);
    }
    if let Some(v) = o.timeout {
        cfg = cfg.with_upload_timeout_secs(v);
    }
    if let Some(v) = o.poll_ms {
        cfg = cfg.with_poll_interval_ms(v);
    }
    if let Some(v) = &o.warehouse_endpoint {
        cfg = cfg.with_warehouse_endpoint(v.clone());
    }
    cfg.validate()?;
    Ok(cfg)
}

async fn run_convert(
    cfg: &PipelineConfig,
    csv: &Path,
    output: &Path,
    opts: &ConvertArgs,
) -> Result<ConvertReport> {
    let delimiter = opts.delimiter.unwrap_or(cfg.delimiter);
    if !delimiter.is_ascii() {
        return Err(anyhow!("delimiter must be a single ASCII character"));
    }
    let options = ConvertOptions::default()
        .with_delimiter(delimiter as u8)
        .with_compression(opts.compression.into());
    let (csv, output) = (csv.to_path_buf(), output.to_path_buf());
    let report = tokio::task::spawn_blocking(move || convert(&csv, &output, &options))
        .await
        .context("conversion task panicked")??;
    Ok(report)
}

fn uploader_for(cfg: &PipelineConfig, local: Option<&Path>) -> Result<Uploader> {
    match local {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create {}", dir.display()))?;
            let store = LocalFileSystem::new_with_prefix(dir)
                .with_context(|| format!("open {} as a bucket", dir.display()))?;
            Ok(Uploader::with_store(cfg.bucket.clone(), Arc::new(store)))
        }
        None => Ok(Uploader::for_gcs(&cfg.bucket, &cfg.project)?),
    }
}

fn bigquery_for(cfg: &PipelineConfig) -> Result<BigQueryClient> {
    let client = BigQueryClient::from_env(cfg.project.clone())?;
    Ok(match &cfg.warehouse_endpoint {
        Some(endpoint) => client.with_endpoint(endpoint.clone()),
        None => client,
    })
}

async fn run_upload(cfg: &PipelineConfig, uploader: &Uploader, file: &Path) -> Result<UploadReport> {
    let report = uploader
        .upload(&UploadRequest {
            local_path: file.to_path_buf(),
            destination_key: cfg.destination_key_for(file)?,
            project: cfg.project.clone(),
            chunk_size_bytes: cfg.chunk_size_bytes,
            timeout: cfg.upload_timeout(),
        })
        .await?;
    Ok(report)
}

/// All three stages; returns the loaded row count.
async fn run_pipeline(
    cfg: &PipelineConfig,
    csv: &Path,
    local: Option<&Path>,
    opts: &ConvertArgs,
) -> Result<u64> {
    let artifact = artifact_path_for(csv);
    let converted = run_convert(cfg, csv, &artifact, opts).await?;
    let uploader = uploader_for(cfg, local)?;
    let uploaded = run_upload(cfg, &uploader, &artifact).await?;

    let table = cfg.table_ref();
    let source_uri = uploaded.location.to_string();
    let rows = match local {
        Some(_) => {
            let warehouse = LocalWarehouse::new().with_bucket(cfg.bucket.clone(), uploader.store());
            load(&warehouse, &table, &source_uri, cfg.poll_interval()).await?
        }
        None => {
            let warehouse = bigquery_for(cfg)?;
            load(&warehouse, &table, &source_uri, cfg.poll_interval()).await?
        }
    };
    if rows != converted.rows as u64 {
        return Err(anyhow!(
            "{table} reports {rows} rows, artifact has {}",
            converted.rows
        ));
    }
    info!(%table, rows, "pipeline complete");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_convert_flags() -> ConvertArgs {
        ConvertArgs {
            delimiter: None,
            compression: Codec::Snappy,
        }
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "trackflow",
            "upload",
            "data.parquet",
            "--bucket",
            "other-bucket",
            "--chunk-size",
            "524288",
            "--timeout",
            "30",
        ])
        .unwrap();
        let Commands::Upload { overrides, .. } = cli.command else {
            panic!("expected upload");
        };
        let cfg = apply(PipelineConfig::default(), &overrides).unwrap();
        assert_eq!(cfg.bucket, "other-bucket");
        assert_eq!(cfg.chunk_size_bytes, 524_288);
        assert_eq!(cfg.upload_timeout_secs, 30);
        assert_eq!(cfg.project, "data-engineering-spotify");
    }

    #[test]
    fn bad_chunk_size_is_rejected() {
        let overrides = Overrides {
            chunk_size: Some(1000),
            ..Default::default()
        };
        assert!(apply(PipelineConfig::default(), &overrides).is_err());
    }

    #[tokio::test]
    async fn local_run_loads_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("tracks.csv");
        std::fs::write(
            &csv,
            ",title,year,danceability\n0,Song A,1999,0.61\n1,Song B,2004,0.72\n2,Song C,2011,0.55\n",
        )
        .unwrap();
        let bucket_dir = dir.path().join("bucket");
        let cfg = PipelineConfig::default().with_poll_interval_ms(1);

        let rows = run_pipeline(&cfg, &csv, Some(&bucket_dir), &no_convert_flags())
            .await
            .unwrap();
        assert_eq!(rows, 3);
        assert!(bucket_dir.join("tracks.parquet").exists());
        assert!(dir.path().join("tracks.parquet").exists());
    }
}
