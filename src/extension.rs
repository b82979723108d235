//! Extensions: externally hosted capabilities described by an OpenAPI document.
//!
//! An extension exposes its API document (used to build registry entries)
//! and executes operations by identifier.

use crate::deadline::{transport_error, transport_timeout};
use crate::error::{PilotError, Result};
use crate::registry::openapi::{ApiIndex, ParameterLocation};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

/// A capability backend the agent can invoke.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Identifier of the backing extension (its document source).
    fn id(&self) -> &str;

    /// The OpenAPI-shaped document describing the available operations.
    async fn api_spec(&self) -> Result<Value>;

    /// Execute an operation with the given parameters.
    async fn execute(&self, operation_id: &str, params: &Map<String, Value>) -> Result<Value>;
}

/// Extension that performs operations as HTTP requests against the server
/// declared in its OpenAPI document.
pub struct HttpExtension {
    id: String,
    client: reqwest::Client,
    index: ApiIndex,
    base_url: Option<String>,
    timeout: Duration,
}

impl HttpExtension {
    /// Load the document from a local path (`~` is expanded) or an http(s) URL.
    ///
    /// JSON documents are recognised by a `.json` suffix; anything else is
    /// parsed as YAML. `timeout` is the deadline calls to the extension run
    /// under.
    #[instrument(skip(timeout))]
    pub async fn load(source: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(transport_timeout(timeout))
            .build()
            .map_err(|e| PilotError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let is_remote = source.starts_with("http://") || source.starts_with("https://");
        let text = if is_remote {
            let fetch = async {
                client
                    .get(source)
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await
            };
            fetch.await.map_err(|e| transport_error(e, source, timeout))?
        } else {
            let path = shellexpand::tilde(source).to_string();
            std::fs::read_to_string(&path)?
        };

        let document: Value = if source.ends_with(".json") {
            serde_json::from_str(&text)?
        } else {
            serde_yaml::from_str(&text)?
        };

        let mut extension = Self::from_document(source, document, client)?;
        extension.timeout = timeout;

        // Relative server URLs resolve against the location the document came from.
        if is_remote {
            if let Some(base) = &extension.base_url {
                if Url::parse(base).is_err() {
                    let resolved = Url::parse(source)
                        .and_then(|s| s.join(base))
                        .map_err(|e| PilotError::Config(format!("Invalid server URL '{}': {}", base, e)))?;
                    extension.base_url = Some(resolved.to_string());
                }
            }
        }

        info!(
            "Loaded extension '{}' with operations {:?}",
            extension.index.info().title,
            extension.index.operation_ids()
        );
        Ok(extension)
    }

    /// Build an extension from an already parsed document.
    pub fn from_document(id: &str, document: Value, client: reqwest::Client) -> Result<Self> {
        let index = ApiIndex::from_document(document)?;
        let base_url = index.servers().first().cloned();
        Ok(Self {
            id: id.to_string(),
            client,
            index,
            base_url,
            timeout: Duration::from_secs(60),
        })
    }

    /// Build the request URL, consuming path and query parameters.
    ///
    /// Returns the URL, header parameters, and the parameters left for the body.
    fn build_request(
        &self,
        operation_id: &str,
        params: &Map<String, Value>,
    ) -> Result<(String, Url, Vec<(String, String)>, Map<String, Value>)> {
        let operation = self.index.operation(operation_id)?;
        let base = self.base_url.as_deref().ok_or_else(|| {
            PilotError::ToolInvocation(format!("'{}' declares no server URL", self.id))
        })?;

        let mut remaining = params.clone();
        let mut path = operation.path.clone();
        let mut query = Vec::new();
        let mut headers = Vec::new();

        for parameter in &operation.parameters {
            let value = match remaining.remove(&parameter.name) {
                Some(value) => value,
                None if parameter.required => {
                    return Err(PilotError::ToolInvocation(format!(
                        "missing required parameter '{}' for {}",
                        parameter.name, operation_id
                    )))
                }
                None => continue,
            };
            let text = value_to_param(&value);
            match parameter.location {
                ParameterLocation::Path => {
                    path = path.replace(&format!("{{{}}}", parameter.name), &encode_segment(&text));
                }
                ParameterLocation::Query => query.push((parameter.name.clone(), text)),
                ParameterLocation::Header => headers.push((parameter.name.clone(), text)),
                ParameterLocation::Cookie => {
                    debug!("Ignoring cookie parameter '{}'", parameter.name);
                }
            }
        }

        // Without a declared body, undeclared parameters travel on the query string.
        if operation.request_body.is_none() && operation.method == "GET" {
            for (name, value) in std::mem::take(&mut remaining) {
                query.push((name, value_to_param(&value)));
            }
        }

        let mut url = Url::parse(&format!("{}{}", base.trim_end_matches('/'), path))
            .map_err(|e| PilotError::ToolInvocation(format!("invalid request URL: {}", e)))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &query {
                pairs.append_pair(name, value);
            }
        }

        Ok((operation.method.clone(), url, headers, remaining))
    }
}

#[async_trait]
impl Extension for HttpExtension {
    fn id(&self) -> &str {
        &self.id
    }

    async fn api_spec(&self) -> Result<Value> {
        Ok(self.index.document().clone())
    }

    async fn execute(&self, operation_id: &str, params: &Map<String, Value>) -> Result<Value> {
        let (method, url, headers, body) = self.build_request(operation_id, params)?;
        debug!("{} {}", method, url);

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| PilotError::ToolInvocation(e.to_string()))?;
        let mut request = self.client.request(method, url.clone());
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if !body.is_empty() {
            request = request.json(&body);
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            Ok::<_, reqwest::Error>((status, response.text().await?))
        };
        let (status, text) = exchange
            .await
            .map_err(|e| transport_error(e, operation_id, self.timeout))?;

        if !status.is_success() {
            return Err(PilotError::ToolInvocation(format!(
                "{} returned {}: {}",
                url, status, text
            )));
        }

        match serde_json::from_str(&text) {
            Ok(value) => Ok(value),
            Err(e) => {
                debug!("{} returned a non-JSON body ({}), passing it on as text", url, e);
                Ok(Value::String(text))
            }
        }
    }
}

fn value_to_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
