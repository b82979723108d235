//! Tool registry.
//!
//! Holds one [`ToolInfo`] per invocable operation, resolved from the
//! extension's API document when the registry is built. The registry is
//! immutable after construction and can be shared between concurrent readers.

pub mod openapi;

use crate::error::{PilotError, Result};
use crate::extension::{Extension, HttpExtension};
use openapi::ApiIndex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Configuration entry naming one operation of one extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Path or URL of the extension's OpenAPI document.
    pub source: String,
    /// Operation to expose as a tool.
    pub operation_id: String,
    /// Named schema under `components.schemas` describing the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
    /// Few-shot examples to bias parameter extraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_examples: Option<String>,
}

impl ToolSpec {
    pub fn new(source: &str, operation_id: &str) -> Self {
        Self {
            source: source.to_string(),
            operation_id: operation_id.to_string(),
            output_type: None,
            invocation_examples: None,
        }
    }

    pub fn with_output_type(mut self, output_type: &str) -> Self {
        self.output_type = Some(output_type.to_string());
        self
    }

    pub fn with_invocation_examples(mut self, examples: &str) -> Self {
        self.invocation_examples = Some(examples.to_string());
        self
    }
}

/// Metadata for one registered tool.
#[derive(Clone)]
pub struct ToolInfo {
    /// Unique name, `"{extension_title}/{operation_id}"`.
    pub name: String,
    pub operation_id: String,
    pub operation_description: String,
    pub extension_description: String,
    /// Operation description followed by the extension description.
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub invocation_examples: Option<String>,
    /// Backend used to perform the call.
    pub handle: Arc<dyn Extension>,
}

impl std::fmt::Debug for ToolInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolInfo")
            .field("name", &self.name)
            .field("operation_id", &self.operation_id)
            .field("description", &self.description)
            .field("extension", &self.handle.id())
            .finish_non_exhaustive()
    }
}

impl ToolInfo {
    /// Resolve a tool from its extension's API document.
    ///
    /// Fails with [`PilotError::SchemaResolution`] when the operation (or the
    /// requested output type) is absent, or when the operation has no
    /// description; a partially filled entry is never produced.
    pub async fn resolve(handle: Arc<dyn Extension>, spec: &ToolSpec) -> Result<Self> {
        let index = ApiIndex::from_document(handle.api_spec().await?)?;
        let operation = index.operation(&spec.operation_id)?;

        let operation_description = operation
            .describe()
            .ok_or_else(|| {
                PilotError::SchemaResolution(format!(
                    "operation '{}' has no description",
                    spec.operation_id
                ))
            })?
            .to_string();
        let extension_description = index.info().description.clone().unwrap_or_default();

        let output_schema = match &spec.output_type {
            Some(output_type) => index.schema(output_type)?.clone(),
            None => operation
                .responses
                .clone()
                .unwrap_or_else(|| index.document().clone()),
        };

        let description = if extension_description.is_empty() {
            operation_description.clone()
        } else {
            format!("{}\n{}", operation_description, extension_description)
        };

        Ok(Self {
            name: format!("{}/{}", index.info().title, spec.operation_id),
            operation_id: spec.operation_id.clone(),
            operation_description,
            extension_description,
            description,
            input_schema: operation.input_schema(),
            output_schema,
            invocation_examples: spec.invocation_examples.clone(),
            handle,
        })
    }
}

/// The set of tools available to the agent.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolInfo>,
}

impl ToolRegistry {
    /// Resolve every binding into a [`ToolInfo`].
    pub async fn build(bindings: Vec<(Arc<dyn Extension>, ToolSpec)>) -> Result<Self> {
        let resolved = futures::future::try_join_all(
            bindings
                .iter()
                .map(|(handle, spec)| ToolInfo::resolve(handle.clone(), spec)),
        )
        .await?;

        let registry = Self::from_tools(resolved)?;
        info!("Registered {} tool(s): {:?}", registry.len(), registry.names());
        Ok(registry)
    }

    /// Load each distinct extension document once over HTTP or from disk,
    /// then resolve every configured tool against it.
    pub async fn load(specs: &[ToolSpec], timeout: Duration) -> Result<Self> {
        let mut extensions: HashMap<&str, Arc<dyn Extension>> = HashMap::new();
        let mut bindings = Vec::with_capacity(specs.len());
        for spec in specs {
            let handle = match extensions.get(spec.source.as_str()) {
                Some(handle) => handle.clone(),
                None => {
                    let handle: Arc<dyn Extension> =
                        Arc::new(HttpExtension::load(&spec.source, timeout).await?);
                    extensions.insert(spec.source.as_str(), handle.clone());
                    handle
                }
            };
            bindings.push((handle, spec.clone()));
        }
        Self::build(bindings).await
    }

    /// Build a registry from already resolved tools, enforcing unique names.
    pub fn from_tools(tools: Vec<ToolInfo>) -> Result<Self> {
        let mut seen = HashSet::new();
        for tool in &tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(PilotError::SchemaResolution(format!(
                    "tool '{}' is registered more than once",
                    tool.name
                )));
            }
        }
        Ok(Self { tools })
    }

    /// Find a tool by its exact name.
    pub fn lookup_by_name(&self, name: &str) -> Result<&ToolInfo> {
        self.tools
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| PilotError::ToolNotFound(name.to_string()))
    }

    /// Human-readable listing of every tool, as shown to the selection prompt.
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .enumerate()
            .map(|(i, tool)| {
                format!(
                    "{}. tool_name: {}\n   tool_description:\n      {}\n      {}",
                    i + 1,
                    tool.name,
                    tool.operation_description,
                    tool.extension_description
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn tools(&self) -> &[ToolInfo] {
        &self.tools
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
