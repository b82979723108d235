//! Capabilities the function-calling agent can invoke against the warehouse.

use crate::deadline::with_deadline;
use crate::error::{PilotError, Result};
use crate::llm::FunctionDeclaration;
use crate::warehouse::Warehouse;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Available capabilities for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Capability {
    /// Enumerate datasets.
    ListDatasets,

    /// List tables in a dataset.
    ListTables { dataset_id: String },

    /// Describe a table.
    GetTable { table_id: String },

    /// Run a SQL query.
    SqlQuery { query: String },
}

impl Capability {
    /// The function name the model uses for this capability.
    pub fn name(&self) -> &'static str {
        match self {
            Capability::ListDatasets => "list_datasets",
            Capability::ListTables { .. } => "list_tables",
            Capability::GetTable { .. } => "get_table",
            Capability::SqlQuery { .. } => "sql_query",
        }
    }

    /// Read-only metadata calls are safe to repeat; query execution bills and is not.
    pub fn is_idempotent(&self) -> bool {
        !matches!(self, Capability::SqlQuery { .. })
    }

    /// The arguments as a JSON object.
    pub fn arguments(&self) -> Value {
        match self {
            Capability::ListDatasets => json!({}),
            Capability::ListTables { dataset_id } => json!({ "dataset_id": dataset_id }),
            Capability::GetTable { table_id } => json!({ "table_id": table_id }),
            Capability::SqlQuery { query } => json!({ "query": query }),
        }
    }
}

/// Execution context with access to the warehouse.
pub struct CapabilityContext {
    warehouse: Arc<dyn Warehouse>,
    max_bytes_billed: u64,
    timeout: Duration,
}

impl CapabilityContext {
    /// Create a new capability context.
    pub fn new(warehouse: Arc<dyn Warehouse>, max_bytes_billed: u64, timeout: Duration) -> Self {
        Self {
            warehouse,
            max_bytes_billed,
            timeout,
        }
    }

    /// Execute a capability, retrying idempotent calls once on a transient failure.
    pub async fn execute(&self, capability: &Capability) -> Result<Value> {
        match self.execute_once(capability).await {
            Err(e) if capability.is_idempotent() && e.is_transient() => {
                warn!("Retrying {} after transient failure: {}", capability.name(), e);
                self.execute_once(capability).await
            }
            other => other,
        }
    }

    async fn execute_once(&self, capability: &Capability) -> Result<Value> {
        with_deadline(self.timeout, capability.name(), self.dispatch(capability)).await
    }

    async fn dispatch(&self, capability: &Capability) -> Result<Value> {
        match capability {
            Capability::ListDatasets => Ok(json!(self.warehouse.list_datasets().await?)),
            Capability::ListTables { dataset_id } => {
                Ok(json!(self.warehouse.list_tables(dataset_id).await?))
            }
            Capability::GetTable { table_id } => {
                Ok(serde_json::to_value(self.warehouse.get_table(table_id).await?)?)
            }
            Capability::SqlQuery { query } => Ok(json!(
                self.warehouse
                    .run_query(query, self.max_bytes_billed)
                    .await?
            )),
        }
    }
}

/// Function declarations offered to the model.
pub fn function_declarations() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration {
            name: "sql_query".to_string(),
            description: "Get information from data in BigQuery using SQL queries".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "SQL query that will help answer the user's question when run on a BigQuery dataset and table. In the SQL query, always use the fully qualified dataset and table names."
                    }
                },
                "required": ["query"]
            }),
        },
        FunctionDeclaration {
            name: "list_datasets".to_string(),
            description: "Get a list of datasets that will help answer the user's question"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
        },
        FunctionDeclaration {
            name: "list_tables".to_string(),
            description: "List tables in a dataset that will help answer the user's question"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "dataset_id": {
                        "type": "string",
                        "description": "Fully qualified ID of the dataset to fetch tables from"
                    }
                },
                "required": ["dataset_id"]
            }),
        },
        FunctionDeclaration {
            name: "get_table".to_string(),
            description: "Get information about a table, including the description, schema, and number of rows that will help answer the user's question.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "table_id": {
                        "type": "string",
                        "description": "Fully qualified ID of the table to get information about"
                    }
                },
                "required": ["table_id"]
            }),
        },
    ]
}

/// Parse a call directive into a typed capability.
///
/// Unknown names fail with [`PilotError::UnknownFunction`]; unparseable or
/// incomplete arguments fail with [`PilotError::MalformedCall`].
pub fn parse_function_call(name: &str, arguments: &str) -> Result<Capability> {
    let args: Value = if arguments.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(arguments).map_err(|e| {
            PilotError::MalformedCall(format!("invalid arguments for {}: {}", name, e))
        })?
    };
    if !args.is_object() {
        return Err(PilotError::MalformedCall(format!(
            "arguments for {} are not an object",
            name
        )));
    }

    let string_arg = |key: &str| -> Result<String> {
        args[key]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PilotError::MalformedCall(format!("missing '{}' argument for {}", key, name)))
    };

    match name {
        "list_datasets" => Ok(Capability::ListDatasets),
        "list_tables" => Ok(Capability::ListTables {
            dataset_id: string_arg("dataset_id")?,
        }),
        "get_table" => Ok(Capability::GetTable {
            table_id: string_arg("table_id")?,
        }),
        "sql_query" => Ok(Capability::SqlQuery {
            query: string_arg("query")?,
        }),
        _ => Err(PilotError::UnknownFunction(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryWarehouse;

    #[test]
    fn test_parse_list_tables() {
        let capability = parse_function_call("list_tables", r#"{"dataset_id": "thelook"}"#).unwrap();
        assert_eq!(
            capability,
            Capability::ListTables {
                dataset_id: "thelook".to_string()
            }
        );
    }

    #[test]
    fn test_parse_list_datasets_without_arguments() {
        assert_eq!(parse_function_call("list_datasets", "").unwrap(), Capability::ListDatasets);
        assert_eq!(parse_function_call("list_datasets", "{}").unwrap(), Capability::ListDatasets);
    }

    #[test]
    fn test_unknown_function_is_typed_error() {
        let err = parse_function_call("drop_table", "{}").unwrap_err();
        assert!(matches!(err, PilotError::UnknownFunction(name) if name == "drop_table"));
    }

    #[test]
    fn test_malformed_arguments() {
        assert!(matches!(
            parse_function_call("sql_query", "{not json").unwrap_err(),
            PilotError::MalformedCall(_)
        ));
        assert!(matches!(
            parse_function_call("get_table", r#"{"query": "x"}"#).unwrap_err(),
            PilotError::MalformedCall(_)
        ));
        assert!(matches!(
            parse_function_call("get_table", "[1]").unwrap_err(),
            PilotError::MalformedCall(_)
        ));
    }

    #[test]
    fn test_declarations_cover_every_capability() {
        let names: Vec<String> = function_declarations().into_iter().map(|d| d.name).collect();
        for capability in [
            Capability::ListDatasets,
            Capability::ListTables { dataset_id: String::new() },
            Capability::GetTable { table_id: String::new() },
            Capability::SqlQuery { query: String::new() },
        ] {
            assert!(names.iter().any(|n| n == capability.name()));
        }
    }

    #[tokio::test]
    async fn test_query_passes_byte_ceiling() {
        let warehouse = Arc::new(MemoryWarehouse::sample());
        let context = CapabilityContext::new(warehouse.clone(), 1_000, Duration::from_secs(5));

        let result = context
            .execute(&Capability::SqlQuery {
                query: "SELECT 1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(result, json!([{"n": 1}]));
        assert_eq!(warehouse.last_max_bytes(), Some(1_000));
    }

    #[tokio::test]
    async fn test_idempotent_call_is_retried_once() {
        let warehouse = Arc::new(MemoryWarehouse::sample().failing_transiently(1));
        let context = CapabilityContext::new(warehouse.clone(), 1_000, Duration::from_secs(5));

        let result = context.execute(&Capability::ListDatasets).await.unwrap();
        assert_eq!(result, json!(["thelook"]));
        assert_eq!(warehouse.calls(), 2);
    }

    #[tokio::test]
    async fn test_query_is_not_retried() {
        let warehouse = Arc::new(MemoryWarehouse::sample().failing_transiently(1));
        let context = CapabilityContext::new(warehouse.clone(), 1_000, Duration::from_secs(5));

        let err = context
            .execute(&Capability::SqlQuery {
                query: "SELECT 1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(warehouse.calls(), 1);
    }
}
