use super::token::TokenProvider;
use super::{
    JobFailure, JobHandle, JobState, LoadJobSpec, SourceFormat, TableRef, Warehouse,
    WriteDisposition,
};
use crate::error::{PipelineError, Result};
use crate::frame::{Cell, QueryFrame};
use crate::sql::{ParamValue, Query};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";
const DEFAULT_QUERY_WAIT: Duration = Duration::from_secs(30);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// BigQuery REST v2 client.
#[derive(Debug)]
pub struct BigQueryClient {
    http: reqwest::Client,
    endpoint: String,
    project: String,
    tokens: TokenProvider,
}

impl BigQueryClient {
    pub fn new(project: impl Into<String>, tokens: TokenProvider) -> Result<Self> {
        let project = project.into();
        if project.trim().is_empty() {
            return Err(PipelineError::InvalidArgument("project cannot be empty".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            http,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            project,
            tokens,
        })
    }

    /// Client for `project` using ambient credentials.
    pub fn from_env(project: impl Into<String>) -> Result<Self> {
        Self::new(project, TokenProvider::from_env())
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    async fn call<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        other: fn(String) -> PipelineError,
    ) -> Result<T> {
        let token = self.tokens.token(&self.http).await?;
        let resp = req.bearer_auth(token).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status, &body, other))
    }

    async fn query_page(
        &self,
        job: &WireJobReference,
        page_token: Option<&str>,
    ) -> Result<WireQueryResponse> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.endpoint, job.project_id, job.job_id
        );
        let mut params: Vec<(&str, String)> =
            vec![("timeoutMs", DEFAULT_QUERY_WAIT.as_millis().to_string())];
        if let Some(location) = &job.location {
            params.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        self.call(self.http.get(url).query(&params), PipelineError::Query)
            .await
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn submit_load(&self, spec: &LoadJobSpec) -> Result<JobHandle> {
        let url = format!("{}/projects/{}/jobs", self.endpoint, self.project);
        let body = load_request_body(spec);
        let job: WireJob = self
            .call(self.http.post(url).json(&body), PipelineError::Remote)
            .await?;
        info!(job_id = %job.job_reference.job_id, destination = %spec.destination, "load job submitted");
        Ok(JobHandle {
            project: job.job_reference.project_id,
            job_id: job.job_reference.job_id,
            location: job.job_reference.location,
        })
    }

    async fn job_state(&self, job: &JobHandle) -> Result<JobState> {
        let url = format!("{}/projects/{}/jobs/{}", self.endpoint, job.project, job.job_id);
        let mut req = self.http.get(url);
        if let Some(location) = &job.location {
            req = req.query(&[("location", location)]);
        }
        let resource: WireJob = self.call(req, PipelineError::Remote).await?;
        Ok(job_state_from(resource.status.as_ref()))
    }

    async fn table_row_count(&self, table: &TableRef) -> Result<u64> {
        let url = format!(
            "{}/projects/{}/datasets/{}/tables/{}",
            self.endpoint, table.project, table.dataset, table.table
        );
        let resource: WireTable = self.call(self.http.get(url), PipelineError::Remote).await?;
        match resource.num_rows {
            Some(n) => n
                .parse()
                .map_err(|e| PipelineError::Remote(format!("bad numRows '{n}': {e}"))),
            None => Ok(0),
        }
    }

    async fn query(&self, query: &Query) -> Result<QueryFrame> {
        let url = format!("{}/projects/{}/queries", self.endpoint, self.project);
        let body = WireQueryRequest {
            query: &query.sql,
            use_legacy_sql: false,
            parameter_mode: "NAMED",
            query_parameters: query.params.iter().map(|p| wire_param(&p.name, &p.value)).collect(),
            timeout_ms: DEFAULT_QUERY_WAIT.as_millis() as u64,
        };
        let mut resp: WireQueryResponse = self
            .call(self.http.post(url).json(&body), PipelineError::Query)
            .await?;

        let job = resp.job_reference.clone().ok_or_else(|| {
            PipelineError::Query(format!("{}: response carried no job reference", query.label))
        })?;
        while !resp.job_complete {
            debug!(label = %query.label, job_id = %job.job_id, "waiting for query job");
            resp = self.query_page(&job, None).await?;
        }

        let (schema, mut frame) = first_page(&query.label, &mut resp)?;
        let mut page_token = resp.page_token.take();
        while let Some(token) = page_token {
            let mut page = self.query_page(&job, Some(&token)).await?;
            append_rows(&mut frame, &schema, std::mem::take(&mut page.rows))?;
            page_token = page.page_token.take();
        }
        debug!(label = %query.label, rows = frame.len(), "query complete");
        Ok(frame)
    }
}

/// Frame from a completed query response. Failed jobs surface as HTTP
/// errors; `errors` on a completed job only carries warnings.
fn first_page(label: &str, resp: &mut WireQueryResponse) -> Result<(WireSchema, QueryFrame)> {
    for warning in &resp.errors {
        warn!(label, reason = %warning.reason, message = %warning.message, "query completed with warning");
    }
    let schema = resp.schema.take().unwrap_or_default();
    let mut frame = QueryFrame::new(schema.fields.iter().map(|f| f.name.clone()).collect());
    append_rows(&mut frame, &schema, std::mem::take(&mut resp.rows))?;
    Ok((schema, frame))
}

fn status_error(status: StatusCode, body: &str, other: fn(String) -> PipelineError) -> PipelineError {
    let message = serde_json::from_str::<WireErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(512).collect());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            PipelineError::Auth(format!("{status}: {message}"))
        }
        StatusCode::NOT_FOUND => PipelineError::NotFound(message),
        _ => other(format!("{status}: {message}")),
    }
}

fn job_state_from(status: Option<&WireJobStatus>) -> JobState {
    let Some(status) = status else {
        return JobState::Pending;
    };
    match status.state.as_str() {
        "DONE" => match &status.error_result {
            Some(err) => JobState::Failed(JobFailure {
                reason: err.reason.clone(),
                message: err.message.clone(),
            }),
            None => JobState::Succeeded,
        },
        "RUNNING" => JobState::Running,
        _ => JobState::Pending,
    }
}

fn load_request_body(spec: &LoadJobSpec) -> WireJobInsert<'_> {
    WireJobInsert {
        configuration: WireJobConfiguration {
            load: WireLoadConfiguration {
                source_uris: vec![spec.source_uri.as_str()],
                destination_table: WireTableReference {
                    project_id: &spec.destination.project,
                    dataset_id: &spec.destination.dataset,
                    table_id: &spec.destination.table,
                },
                source_format: spec.source_format,
                autodetect: spec.autodetect,
                write_disposition: spec.write_disposition,
            },
        },
    }
}

fn wire_param(name: &str, value: &ParamValue) -> WireParam {
    let (parameter_type, parameter_value) = match value {
        ParamValue::String(s) => (WireParamType::scalar("STRING"), WireParamValue::scalar(s.clone())),
        ParamValue::Int64(v) => (WireParamType::scalar("INT64"), WireParamValue::scalar(v.to_string())),
        ParamValue::StringArray(items) => (
            WireParamType {
                kind: "ARRAY",
                array_type: Some(Box::new(WireParamType::scalar("STRING"))),
            },
            WireParamValue {
                value: None,
                array_values: Some(items.iter().cloned().map(WireParamValue::scalar).collect()),
            },
        ),
    };
    WireParam {
        name: name.to_string(),
        parameter_type,
        parameter_value,
    }
}

fn append_rows(frame: &mut QueryFrame, schema: &WireSchema, rows: Vec<WireRow>) -> Result<()> {
    for row in rows {
        let cells = row
            .f
            .into_iter()
            .zip(schema.fields.iter())
            .map(|(cell, field)| convert_cell(cell.v, &field.kind))
            .collect();
        frame.push_row(cells)?;
    }
    Ok(())
}

fn convert_cell(v: Value, kind: &str) -> Cell {
    match v {
        Value::Null => Cell::Null,
        Value::String(s) => match kind {
            "INTEGER" | "INT64" => s.parse().map(Cell::Int).unwrap_or(Cell::Text(s)),
            "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => {
                s.parse().map(Cell::Float).unwrap_or(Cell::Text(s))
            }
            "BOOLEAN" | "BOOL" => match s.as_str() {
                "true" => Cell::Bool(true),
                "false" => Cell::Bool(false),
                _ => Cell::Text(s),
            },
            _ => Cell::Text(s),
        },
        Value::Bool(b) => Cell::Bool(b),
        other => Cell::Text(other.to_string()),
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireJobInsert<'a> {
    configuration: WireJobConfiguration<'a>,
}

#[derive(Serialize)]
struct WireJobConfiguration<'a> {
    load: WireLoadConfiguration<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireLoadConfiguration<'a> {
    source_uris: Vec<&'a str>,
    destination_table: WireTableReference<'a>,
    source_format: SourceFormat,
    autodetect: bool,
    write_disposition: WriteDisposition,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTableReference<'a> {
    project_id: &'a str,
    dataset_id: &'a str,
    table_id: &'a str,
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct WireJobReference {
    project_id: String,
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireJob {
    job_reference: WireJobReference,
    #[serde(default)]
    status: Option<WireJobStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireJobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<WireErrorProto>,
}

#[derive(Deserialize)]
struct WireErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct WireErrorEnvelope {
    error: WireErrorProto,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTable {
    #[serde(default)]
    num_rows: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireQueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    parameter_mode: &'static str,
    query_parameters: Vec<WireParam>,
    timeout_ms: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireParam {
    name: String,
    parameter_type: WireParamType,
    parameter_value: WireParamValue,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireParamType {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_type: Option<Box<WireParamType>>,
}

impl WireParamType {
    fn scalar(kind: &'static str) -> Self {
        Self {
            kind,
            array_type: None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireParamValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_values: Option<Vec<WireParamValue>>,
}

impl WireParamValue {
    fn scalar(value: String) -> Self {
        Self {
            value: Some(value),
            array_values: None,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WireQueryResponse {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    job_reference: Option<WireJobReference>,
    #[serde(default)]
    schema: Option<WireSchema>,
    #[serde(default)]
    rows: Vec<WireRow>,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default)]
    errors: Vec<WireErrorProto>,
}

#[derive(Deserialize, Default)]
struct WireSchema {
    #[serde(default)]
    fields: Vec<WireField>,
}

#[derive(Deserialize)]
struct WireField {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct WireRow {
    f: Vec<WireCell>,
}

#[derive(Deserialize)]
struct WireCell {
    v: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_body_matches_rest_shape() {
        let spec = LoadJobSpec::replace_from_parquet(
            "gs://bucket/tracks.parquet",
            TableRef::new("proj", "spotify", "tracks"),
        );
        let body = serde_json::to_value(load_request_body(&spec)).unwrap();
        assert_eq!(
            body,
            json!({
                "configuration": {
                    "load": {
                        "sourceUris": ["gs://bucket/tracks.parquet"],
                        "destinationTable": {
                            "projectId": "proj",
                            "datasetId": "spotify",
                            "tableId": "tracks"
                        },
                        "sourceFormat": "PARQUET",
                        "autodetect": true,
                        "writeDisposition": "WRITE_TRUNCATE"
                    }
                }
            })
        );
    }

    #[test]
    fn array_params_use_named_array_type() {
        let param = wire_param(
            "decades",
            &ParamValue::StringArray(vec!["1990s".into(), "2000s".into()]),
        );
        assert_eq!(
            serde_json::to_value(param).unwrap(),
            json!({
                "name": "decades",
                "parameterType": {"type": "ARRAY", "arrayType": {"type": "STRING"}},
                "parameterValue": {"arrayValues": [{"value": "1990s"}, {"value": "2000s"}]}
            })
        );
    }

    #[test]
    fn job_status_maps_to_states() {
        let done: WireJob = serde_json::from_value(json!({
            "jobReference": {"projectId": "p", "jobId": "j"},
            "status": {"state": "DONE"}
        }))
        .unwrap();
        assert_eq!(job_state_from(done.status.as_ref()), JobState::Succeeded);

        let failed: WireJob = serde_json::from_value(json!({
            "jobReference": {"projectId": "p", "jobId": "j", "location": "US"},
            "status": {"state": "DONE", "errorResult": {"reason": "notFound", "message": "Not found: URI gs://b/k"}}
        }))
        .unwrap();
        assert_eq!(failed.job_reference.location.as_deref(), Some("US"));
        assert_eq!(
            job_state_from(failed.status.as_ref()),
            JobState::Failed(JobFailure {
                reason: "notFound".into(),
                message: "Not found: URI gs://b/k".into()
            })
        );

        assert_eq!(job_state_from(None), JobState::Pending);
    }

    #[test]
    fn query_rows_convert_by_field_type() {
        let resp: WireQueryResponse = serde_json::from_value(json!({
            "jobComplete": true,
            "jobReference": {"projectId": "p", "jobId": "q1"},
            "schema": {"fields": [
                {"name": "decade", "type": "STRING"},
                {"name": "track_count", "type": "INTEGER"},
                {"name": "avg_energy", "type": "FLOAT"},
                {"name": "explicit", "type": "BOOLEAN"}
            ]},
            "rows": [
                {"f": [{"v": "1990s"}, {"v": "12"}, {"v": "0.5"}, {"v": "false"}]},
                {"f": [{"v": null}, {"v": "3"}, {"v": null}, {"v": "true"}]}
            ]
        }))
        .unwrap();
        let schema = resp.schema.unwrap();
        let mut frame = QueryFrame::new(schema.fields.iter().map(|f| f.name.clone()).collect());
        append_rows(&mut frame, &schema, resp.rows).unwrap();
        assert_eq!(frame.columns, vec!["decade", "track_count", "avg_energy", "explicit"]);
        assert_eq!(
            frame.rows[0],
            vec![Cell::Text("1990s".into()), Cell::Int(12), Cell::Float(0.5), Cell::Bool(false)]
        );
        assert_eq!(frame.rows[1][0], Cell::Null);
    }

    #[test]
    fn completed_query_with_warnings_keeps_rows() {
        let mut resp: WireQueryResponse = serde_json::from_value(json!({
            "jobComplete": true,
            "jobReference": {"projectId": "p", "jobId": "q2"},
            "schema": {"fields": [{"name": "decade", "type": "STRING"}]},
            "rows": [{"f": [{"v": "1990s"}]}, {"f": [{"v": "2000s"}]}],
            "errors": [{"reason": "warning", "message": "Query truncated a long string"}]
        }))
        .unwrap();
        let (schema, frame) = first_page("decades", &mut resp).unwrap();
        assert_eq!(schema.fields.len(), 1);
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.rows[1][0], Cell::Text("2000s".into()));
    }

    #[test]
    fn http_status_classification() {
        let body = r#"{"error": {"code": 403, "message": "Access Denied", "reason": "accessDenied"}}"#;
        let err = status_error(StatusCode::FORBIDDEN, body, PipelineError::Remote);
        assert!(err.is_auth());
        assert!(err.to_string().contains("Access Denied"));

        let err = status_error(StatusCode::NOT_FOUND, "{}", PipelineError::Remote);
        assert!(err.is_not_found());

        let err = status_error(StatusCode::BAD_REQUEST, "Syntax error", PipelineError::Query);
        assert!(matches!(err, PipelineError::Query(_)));
    }
}
