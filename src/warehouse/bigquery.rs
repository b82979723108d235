//! BigQuery warehouse over the REST API.

use super::{TableInfo, Warehouse};
use crate::config::WarehouseSettings;
use crate::deadline::{transport_error, transport_timeout};
use crate::error::{PilotError, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, instrument};

/// How long the server may hold a query request before reporting it incomplete.
const QUERY_WAIT_MS: u64 = 10_000;

/// BigQuery-backed warehouse.
pub struct BigQueryWarehouse {
    client: reqwest::Client,
    api_base: String,
    project_id: String,
    location: Option<String>,
    access_token: String,
    timeout: Duration,
}

impl BigQueryWarehouse {
    /// Create a warehouse from settings, reading the access token from the configured env var.
    ///
    /// `timeout` is the deadline each capability call runs under.
    pub fn from_settings(settings: &WarehouseSettings, timeout: Duration) -> Result<Self> {
        if settings.project_id.is_empty() {
            return Err(PilotError::Config(
                "warehouse.project_id is not set".to_string(),
            ));
        }
        let access_token = match std::env::var(&settings.access_token_env) {
            Ok(token) if !token.is_empty() => token,
            _ => {
                return Err(PilotError::Config(format!(
                    "{} not set. Set it with: export {}=\"$(gcloud auth print-access-token)\"",
                    settings.access_token_env, settings.access_token_env
                )))
            }
        };

        let client = reqwest::Client::builder()
            .timeout(transport_timeout(timeout))
            .build()
            .map_err(|e| PilotError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            project_id: settings.project_id.clone(),
            location: settings.location.clone(),
            access_token,
            timeout,
        })
    }

    fn project_url(&self, project: &str) -> String {
        format!("{}/projects/{}", self.api_base, project)
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value> {
        debug!("GET {}", url);
        let request = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(query);
        self.exchange(request).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        debug!("POST {}", url);
        let request = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(body);
        self.exchange(request).await
    }

    async fn exchange(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let sent = async {
            let response = request.send().await?;
            let status = response.status();
            Ok::<_, reqwest::Error>((status, response.text().await?))
        };
        let (status, text) = sent
            .await
            .map_err(|e| transport_error(e, "warehouse request", self.timeout))?;
        read_response(status, text)
    }

    /// URL and base query parameters for reading back a query job's results.
    fn job_results(&self, result: &Value) -> Result<(String, Vec<(&'static str, String)>)> {
        let job_id = result
            .pointer("/jobReference/jobId")
            .and_then(Value::as_str)
            .ok_or_else(|| PilotError::Warehouse("query job has no id".to_string()))?;
        let mut query = vec![("timeoutMs", QUERY_WAIT_MS.to_string())];
        if let Some(location) = result.pointer("/jobReference/location").and_then(Value::as_str) {
            query.push(("location", location.to_string()));
        }
        let url = format!("{}/queries/{}", self.project_url(&self.project_id), job_id);
        Ok((url, query))
    }

    /// Collect every page of a list endpoint.
    async fn list_all(&self, url: &str, key: &str) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let query: Vec<(&str, String)> = page_token
                .iter()
                .map(|t| ("pageToken", t.clone()))
                .collect();
            let page = self.get_json(url, &query).await?;

            if let Some(entries) = page.get(key).and_then(Value::as_array) {
                items.extend(entries.iter().cloned());
            }

            match page.get("nextPageToken").and_then(Value::as_str) {
                Some(token) => page_token = Some(token.to_string()),
                None => return Ok(items),
            }
        }
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    #[instrument(skip(self))]
    async fn list_datasets(&self) -> Result<Vec<String>> {
        let url = format!("{}/datasets", self.project_url(&self.project_id));
        let datasets = self.list_all(&url, "datasets").await?;
        Ok(datasets
            .iter()
            .filter_map(|d| d.pointer("/datasetReference/datasetId").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Table ids are qualified with the dataset id as given.
    #[instrument(skip(self))]
    async fn list_tables(&self, dataset_id: &str) -> Result<Vec<String>> {
        let (project, dataset) = split_dataset_id(dataset_id, &self.project_id)?;
        let url = format!("{}/datasets/{}/tables", self.project_url(&project), dataset);
        let tables = self.list_all(&url, "tables").await?;
        Ok(tables
            .iter()
            .filter_map(|t| t.pointer("/tableReference/tableId").and_then(Value::as_str))
            .map(|table| format!("{}.{}", dataset_id, table))
            .collect())
    }

    #[instrument(skip(self))]
    async fn get_table(&self, table_id: &str) -> Result<TableInfo> {
        let (project, dataset, table) = split_table_id(table_id, &self.project_id)?;
        let url = format!(
            "{}/datasets/{}/tables/{}",
            self.project_url(&project),
            dataset,
            table
        );
        let resource = self.get_json(&url, &[]).await?;
        Ok(table_info(table_id, &resource))
    }

    #[instrument(skip(self, sql))]
    async fn run_query(&self, sql: &str, max_bytes_billed: u64) -> Result<Vec<Value>> {
        let mut body = json!({
            "query": sql,
            "useLegacySql": false,
            "maximumBytesBilled": max_bytes_billed.to_string(),
            "timeoutMs": QUERY_WAIT_MS,
        });
        if let Some(location) = &self.location {
            body["location"] = json!(location);
        }

        let url = format!("{}/queries", self.project_url(&self.project_id));
        let mut result = self.post_json(&url, &body).await?;

        // Long-running jobs are polled; the caller's deadline bounds the wait.
        while !result.get("jobComplete").and_then(Value::as_bool).unwrap_or(false) {
            let (poll_url, query) = self.job_results(&result)?;
            result = self.get_json(&poll_url, &query).await?;
        }

        let columns = column_names(&result);
        let mut rows = rows_from_result(&result, &columns);

        while let Some(token) = result.get("pageToken").and_then(Value::as_str) {
            let (page_url, mut query) = self.job_results(&result)?;
            query.push(("pageToken", token.to_string()));
            result = self.get_json(&page_url, &query).await?;
            rows.extend(rows_from_result(&result, &columns));
        }

        debug!(
            "Query returned {} rows (totalRows {})",
            rows.len(),
            result.get("totalRows").and_then(serde_json::Value::as_str).unwrap_or("?")
        );
        Ok(rows)
    }
}

fn read_response(status: reqwest::StatusCode, text: String) -> Result<Value> {
    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(text);
        return Err(PilotError::Warehouse(format!("{}: {}", status, message)));
    }

    Ok(serde_json::from_str(&text)?)
}

/// Split `project.dataset` (or a bare `dataset`) into its parts.
fn split_dataset_id(dataset_id: &str, default_project: &str) -> Result<(String, String)> {
    let normalized = dataset_id.replace(':', ".");
    let parts: Vec<&str> = normalized.split('.').collect();
    match parts.as_slice() {
        [dataset] if !dataset.is_empty() => Ok((default_project.to_string(), dataset.to_string())),
        [project, dataset] if !project.is_empty() && !dataset.is_empty() => {
            Ok((project.to_string(), dataset.to_string()))
        }
        _ => Err(PilotError::Warehouse(format!("invalid dataset id '{}'", dataset_id))),
    }
}

/// Split `project.dataset.table` (or `dataset.table`) into its parts.
fn split_table_id(table_id: &str, default_project: &str) -> Result<(String, String, String)> {
    let normalized = table_id.replace(':', ".");
    let parts: Vec<&str> = normalized.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(PilotError::Warehouse(format!("invalid table id '{}'", table_id)));
    }
    match parts.as_slice() {
        [dataset, table] => Ok((
            default_project.to_string(),
            dataset.to_string(),
            table.to_string(),
        )),
        [project, dataset, table] => Ok((
            project.to_string(),
            dataset.to_string(),
            table.to_string(),
        )),
        _ => Err(PilotError::Warehouse(format!("invalid table id '{}'", table_id))),
    }
}

fn table_info(table_id: &str, resource: &Value) -> TableInfo {
    TableInfo {
        table_id: table_id.to_string(),
        description: resource
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        column_names: resource
            .pointer("/schema/fields")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|f| f.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        num_rows: resource
            .get("numRows")
            .and_then(Value::as_str)
            .and_then(|n| n.parse().ok()),
    }
}

fn column_names(result: &Value) -> Vec<String> {
    result
        .pointer("/schema/fields")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(|f| f.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Zip the `f`/`v` row cells of one result page with the column names.
fn rows_from_result(result: &Value, columns: &[String]) -> Vec<Value> {
    result
        .get("rows")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    let cells = row.get("f").and_then(Value::as_array);
                    let mut object = Map::new();
                    for (i, column) in columns.iter().enumerate() {
                        let value = cells
                            .and_then(|c| c.get(i))
                            .and_then(|cell| cell.get("v"))
                            .cloned()
                            .unwrap_or(Value::Null);
                        object.insert(column.clone(), value);
                    }
                    Value::Object(object)
                })
                .collect()
        })
        .unwrap_or_default()
}
