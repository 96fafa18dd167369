//! CSV to Parquet conversion.
//!
//! The whole source file is read into memory, column types are inferred from
//! every row, and the typed batches are written out as a single Parquet file.
//! Row-number columns left behind by dataframe exports are not carried over.

use crate::error::{PipelineError, Result};
use arrow_array::RecordBatch;
use arrow_csv::reader::Format;
use arrow_csv::ReaderBuilder;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ARTIFACT_EXTENSION: &str = "parquet";
const CSV_BATCH_ROWS: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactCompression {
    None,
    #[default]
    Snappy,
    Zstd,
}

impl ArtifactCompression {
    fn codec(self) -> Compression {
        match self {
            ArtifactCompression::None => Compression::UNCOMPRESSED,
            ArtifactCompression::Snappy => Compression::SNAPPY,
            ArtifactCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub delimiter: u8,
    pub compression: ArtifactCompression,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            compression: ArtifactCompression::default(),
        }
    }
}

impl ConvertOptions {
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_compression(mut self, compression: ArtifactCompression) -> Self {
        self.compression = compression;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertReport {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub rows: usize,
    pub columns: Vec<String>,
    pub dropped_columns: Vec<String>,
    pub bytes: u64,
}

/// Artifact path next to `source`: same base name, `.parquet` extension.
pub fn artifact_path_for(source: &Path) -> PathBuf {
    source.with_extension(ARTIFACT_EXTENSION)
}

/// Header names that denote a serialized row index rather than data.
pub fn is_row_index_column(name: &str) -> bool {
    let trimmed = name.trim();
    trimmed.is_empty()
        || trimmed
            .strip_prefix("Unnamed: ")
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Convert the CSV at `source` into a Parquet artifact at `destination`.
pub fn convert(source: &Path, destination: &Path, opts: &ConvertOptions) -> Result<ConvertReport> {
    let csv_bytes = fs::read(source)
        .map_err(|e| PipelineError::Read(format!("read {} failed: {e}", source.display())))?;
    if csv_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(PipelineError::Read(format!(
            "{} is empty; a header row is required",
            source.display()
        )));
    }

    let inferred = infer_schema(&csv_bytes, opts.delimiter)
        .map_err(|e| PipelineError::Read(format!("{}: {e}", source.display())))?;

    let mut keep = Vec::with_capacity(inferred.fields().len());
    let mut dropped = Vec::new();
    for (idx, field) in inferred.fields().iter().enumerate() {
        if is_row_index_column(field.name()) {
            dropped.push(field.name().clone());
        } else {
            keep.push(idx);
        }
    }
    if keep.is_empty() {
        return Err(PipelineError::Read(format!(
            "{} has no data columns",
            source.display()
        )));
    }
    if !dropped.is_empty() {
        debug!(columns = ?dropped, "dropping row index columns");
    }

    let batches = read_batches(&csv_bytes, inferred.clone(), opts.delimiter, keep)
        .map_err(|e| PipelineError::Read(format!("{}: {e}", source.display())))?;
    let schema = match batches.first() {
        Some(b) => b.schema(),
        None => Arc::new(project_schema(&inferred, &dropped)),
    };

    let bytes = write_parquet(destination, schema.clone(), &batches, opts.compression)?;
    let rows = batches.iter().map(|b| b.num_rows()).sum();

    info!(
        source = %source.display(),
        destination = %destination.display(),
        rows,
        bytes,
        "converted csv to parquet"
    );
    println!("Converted {} to {}", source.display(), destination.display());

    Ok(ConvertReport {
        source: source.to_path_buf(),
        destination: destination.to_path_buf(),
        rows,
        columns: schema.fields().iter().map(|f| f.name().clone()).collect(),
        dropped_columns: dropped,
        bytes,
    })
}

fn infer_schema(csv_bytes: &[u8], delimiter: u8) -> Result<Schema, String> {
    let format = Format::default()
        .with_delimiter(delimiter)
        .with_header(true);
    let (schema, _) = format
        .infer_schema(Cursor::new(csv_bytes), None)
        .map_err(|e| format!("schema inference failed: {e}"))?;
    if schema.fields().is_empty() {
        return Err("no header row".into());
    }
    // Columns with no values at all infer as Null; store them as nullable text.
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|f| match f.data_type() {
            DataType::Null => Field::new(f.name(), DataType::Utf8, true),
            _ => f.as_ref().clone().with_nullable(true),
        })
        .collect();
    Ok(Schema::new(fields))
}

fn project_schema(schema: &Schema, dropped: &[String]) -> Schema {
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .filter(|f| !dropped.contains(f.name()))
        .map(|f| f.as_ref().clone())
        .collect();
    Schema::new(fields)
}

fn read_batches(
    csv_bytes: &[u8],
    schema: Schema,
    delimiter: u8,
    projection: Vec<usize>,
) -> Result<Vec<RecordBatch>, String> {
    let reader = ReaderBuilder::new(Arc::new(schema))
        .with_header(true)
        .with_delimiter(delimiter)
        .with_batch_size(CSV_BATCH_ROWS)
        .with_projection(projection)
        .build(Cursor::new(csv_bytes))
        .map_err(|e| e.to_string())?;
    let mut batches = Vec::new();
    for batch in reader {
        let b = batch.map_err(|e| e.to_string())?;
        if b.num_rows() > 0 {
            batches.push(b);
        }
    }
    Ok(batches)
}

fn write_parquet(
    destination: &Path,
    schema: SchemaRef,
    batches: &[RecordBatch],
    compression: ArtifactCompression,
) -> Result<u64> {
    let write_err =
        |e: &dyn std::fmt::Display| PipelineError::Write(format!("{}: {e}", destination.display()));

    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| write_err(&e))?;
    }
    let tmp_path = destination.with_extension("parquet.tmp");
    {
        let file = File::create(&tmp_path).map_err(|e| write_err(&e))?;
        let props = WriterProperties::builder()
            .set_compression(compression.codec())
            .build();
        let mut writer = ArrowWriter::try_new(BufWriter::new(file), schema, Some(props))
            .map_err(|e| write_err(&e))?;
        for batch in batches {
            writer.write(batch).map_err(|e| write_err(&e))?;
        }
        let mut inner = writer.into_inner().map_err(|e| write_err(&e))?;
        inner.flush().map_err(|e| write_err(&e))?;
        inner
            .get_ref()
            .sync_all()
            .map_err(|e| write_err(&e))?;
    }
    fs::rename(&tmp_path, destination).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        write_err(&e)
    })?;
    let bytes = fs::metadata(destination).map_err(|e| write_err(&e))?.len();
    Ok(bytes)
}
