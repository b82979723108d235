//! Typed index over an OpenAPI document.
//!
//! Operations are indexed by `operationId` when the document is loaded, so
//! lookups never depend on mapping iteration order. A document that declares
//! the same identifier twice is rejected.

use crate::error::{PilotError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

const METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// Top-level `info` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiInfo {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Where a parameter is carried in the HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
}

/// A single declared operation parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "in")]
    pub location: ParameterLocation,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// A resolved operation with its HTTP binding.
#[derive(Debug, Clone)]
pub struct Operation {
    pub operation_id: String,
    /// Uppercase HTTP method.
    pub method: String,
    pub path: String,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub parameters: Vec<Parameter>,
    pub request_body: Option<Value>,
    pub responses: Option<Value>,
}

impl Operation {
    /// The operation's description, falling back to its summary.
    pub fn describe(&self) -> Option<&str> {
        self.description
            .as_deref()
            .or(self.summary.as_deref())
            .filter(|d| !d.trim().is_empty())
    }

    /// Structured description of the accepted input.
    pub fn input_schema(&self) -> Value {
        let parameters = serde_json::to_value(&self.parameters).unwrap_or(Value::Null);
        match &self.request_body {
            Some(body) => serde_json::json!({
                "parameters": parameters,
                "requestBody": body,
            }),
            None => parameters,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOperation {
    operation_id: Option<String>,
    description: Option<String>,
    summary: Option<String>,
    #[serde(default)]
    parameters: Vec<Value>,
    request_body: Option<Value>,
    responses: Option<Value>,
}

/// Operation lookup table built from a parsed document.
#[derive(Debug, Clone)]
pub struct ApiIndex {
    info: ApiInfo,
    servers: Vec<String>,
    operations: HashMap<String, Operation>,
    document: Value,
}

impl ApiIndex {
    /// Index every operation in `document`.
    pub fn from_document(document: Value) -> Result<Self> {
        let info: ApiInfo = document
            .get("info")
            .cloned()
            .ok_or_else(|| PilotError::SchemaResolution("document has no info block".to_string()))
            .and_then(|v| {
                serde_json::from_value(v).map_err(|e| {
                    PilotError::SchemaResolution(format!("invalid info block: {}", e))
                })
            })?;

        let servers = document
            .get("servers")
            .and_then(Value::as_array)
            .map(|servers| {
                servers
                    .iter()
                    .filter_map(|s| s.get("url").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut operations = HashMap::new();
        let paths: BTreeMap<String, Value> = match document.get("paths") {
            Some(paths) => serde_json::from_value(paths.clone()).map_err(|e| {
                PilotError::SchemaResolution(format!("invalid paths block: {}", e))
            })?,
            None => BTreeMap::new(),
        };

        for (path, item) in &paths {
            let shared = item
                .get("parameters")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for method in METHODS {
                let Some(raw) = item.get(method) else {
                    continue;
                };
                let raw: RawOperation = serde_json::from_value(raw.clone()).map_err(|e| {
                    PilotError::SchemaResolution(format!(
                        "invalid operation {} {}: {}",
                        method.to_uppercase(),
                        path,
                        e
                    ))
                })?;
                let Some(operation_id) = raw.operation_id else {
                    continue;
                };

                let mut parameters = Vec::new();
                for value in shared.iter().chain(raw.parameters.iter()) {
                    let parameter = resolve_parameter(&document, value)?;
                    // Operation-level parameters override path-level ones.
                    parameters.retain(|p: &Parameter| {
                        !(p.name == parameter.name && p.location == parameter.location)
                    });
                    parameters.push(parameter);
                }

                let operation = Operation {
                    operation_id: operation_id.clone(),
                    method: method.to_uppercase(),
                    path: path.clone(),
                    description: raw.description,
                    summary: raw.summary,
                    parameters,
                    request_body: raw.request_body,
                    responses: raw.responses,
                };

                if operations.insert(operation_id.clone(), operation).is_some() {
                    return Err(PilotError::SchemaResolution(format!(
                        "operation id '{}' is declared more than once",
                        operation_id
                    )));
                }
            }
        }

        Ok(Self {
            info,
            servers,
            operations,
            document,
        })
    }

    pub fn info(&self) -> &ApiInfo {
        &self.info
    }

    /// Server URLs in declaration order.
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Look up an operation by identifier.
    pub fn operation(&self, operation_id: &str) -> Result<&Operation> {
        self.operations.get(operation_id).ok_or_else(|| {
            PilotError::SchemaResolution(format!(
                "operation '{}' not found in '{}'",
                operation_id, self.info.title
            ))
        })
    }

    /// Look up a named schema under `components.schemas`.
    pub fn schema(&self, name: &str) -> Result<&Value> {
        self.document
            .get("components")
            .and_then(|c| c.get("schemas"))
            .and_then(|s| s.get(name))
            .ok_or_else(|| {
                PilotError::SchemaResolution(format!(
                    "schema '{}' not found in '{}'",
                    name, self.info.title
                ))
            })
    }

    /// Identifiers of every indexed operation, sorted.
    pub fn operation_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

/// Parse a parameter, following a local `#/components/parameters/...` reference.
fn resolve_parameter(document: &Value, value: &Value) -> Result<Parameter> {
    let value = match value.get("$ref").and_then(Value::as_str) {
        Some(reference) => {
            let pointer = reference.strip_prefix('#').ok_or_else(|| {
                PilotError::SchemaResolution(format!("external reference '{}' is not supported", reference))
            })?;
            document.pointer(pointer).ok_or_else(|| {
                PilotError::SchemaResolution(format!("dangling reference '{}'", reference))
            })?
        }
        None => value,
    };

    serde_json::from_value(value.clone())
        .map_err(|e| PilotError::SchemaResolution(format!("invalid parameter: {}", e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn exchange_rate_document() -> Value {
        json!({
            "openapi": "3.0.0",
            "info": {
                "title": "Exchange Rates",
                "description": "Get current and historical currency exchange rates"
            },
            "servers": [{"url": "https://api.frankfurter.app"}],
            "paths": {
                "/latest": {
                    "get": {
                        "operationId": "get_exchange_rate",
                        "description": "Get the exchange rate between two currencies",
                        "parameters": [
                            {"name": "currency_from", "in": "query", "required": true,
                             "schema": {"type": "string"}},
                            {"name": "currency_to", "in": "query", "required": true,
                             "schema": {"type": "string"}},
                            {"$ref": "#/components/parameters/Date"}
                        ],
                        "responses": {"200": {"description": "Rates"}}
                    }
                }
            },
            "components": {
                "parameters": {
                    "Date": {"name": "currency_date", "in": "query", "schema": {"type": "string"}}
                },
                "schemas": {
                    "Result": {
                        "type": "object",
                        "properties": {
                            "base": {"type": "string"},
                            "date": {"type": "string"},
                            "rates": {"type": "object"}
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn test_indexes_operation_with_parameters() {
        let index = ApiIndex::from_document(exchange_rate_document()).unwrap();
        let op = index.operation("get_exchange_rate").unwrap();

        assert_eq!(op.method, "GET");
        assert_eq!(op.path, "/latest");
        assert_eq!(op.parameters.len(), 3);
        assert_eq!(op.parameters[2].name, "currency_date");
        assert!(op.parameters[0].required);
        assert_eq!(index.servers(), ["https://api.frankfurter.app".to_string()]);
        assert_eq!(index.info().title, "Exchange Rates");
    }

    #[test]
    fn test_missing_operation_is_schema_error() {
        let index = ApiIndex::from_document(exchange_rate_document()).unwrap();
        let err = index.operation("get_weather").unwrap_err();
        assert!(matches!(err, PilotError::SchemaResolution(_)));
    }

    #[test]
    fn test_duplicate_operation_id_is_rejected() {
        let doc = json!({
            "info": {"title": "Dup"},
            "paths": {
                "/a": {"get": {"operationId": "fetch"}},
                "/b": {"post": {"operationId": "fetch"}}
            }
        });
        let err = ApiIndex::from_document(doc).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_document_without_info_is_rejected() {
        let err = ApiIndex::from_document(json!({"paths": {}})).unwrap_err();
        assert!(matches!(err, PilotError::SchemaResolution(_)));
    }

    #[test]
    fn test_operation_level_parameter_overrides_path_level() {
        let doc = json!({
            "info": {"title": "Items"},
            "paths": {
                "/items/{id}": {
                    "parameters": [
                        {"name": "id", "in": "path", "required": true, "description": "shared"}
                    ],
                    "get": {
                        "operationId": "get_item",
                        "summary": "Fetch one item",
                        "parameters": [
                            {"name": "id", "in": "path", "required": true, "description": "own"}
                        ]
                    }
                }
            }
        });
        let index = ApiIndex::from_document(doc).unwrap();
        let op = index.operation("get_item").unwrap();
        assert_eq!(op.parameters.len(), 1);
        assert_eq!(op.parameters[0].description.as_deref(), Some("own"));
        assert_eq!(op.describe(), Some("Fetch one item"));
    }

    #[test]
    fn test_named_schema_lookup() {
        let index = ApiIndex::from_document(exchange_rate_document()).unwrap();
        assert!(index.schema("Result").is_ok());
        assert!(index.schema("Missing").is_err());
    }
}
