//! Single-action agent orchestrator.
//!
//! Runs one query through four stages: select a tool, derive its parameters,
//! invoke it, and synthesize an answer from its output. Any stage failure
//! aborts the query.

use crate::config::{Prompts, Settings, REFUSAL};
use crate::deadline::with_deadline;
use crate::error::{PilotError, Result};
use crate::llm::{GenerationOptions, LanguageModel, OpenAILanguageModel};
use crate::registry::{ToolInfo, ToolRegistry};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Everything one query produced, stage by stage.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub tool_name: String,
    pub parameters: Map<String, Value>,
    pub tool_output: Value,
    pub response: String,
}

/// The single-action agent.
pub struct Orchestrator {
    model: Arc<dyn LanguageModel>,
    registry: Arc<ToolRegistry>,
    prompts: Prompts,
    options: GenerationOptions,
    raw_options: GenerationOptions,
    model_timeout: Duration,
    tool_timeout: Duration,
}

impl Orchestrator {
    /// Create an orchestrator over an already built registry.
    pub fn new(model: Arc<dyn LanguageModel>, registry: Arc<ToolRegistry>, prompts: Prompts) -> Self {
        Self {
            model,
            registry,
            prompts,
            options: GenerationOptions::default(),
            raw_options: GenerationOptions {
                max_tokens: 1024,
                temperature: 0.9,
                top_p: 1.0,
                top_k: 40,
            },
            model_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(60),
        }
    }

    /// Set generation options for the pipeline stages and the raw answer.
    pub fn with_options(mut self, options: GenerationOptions, raw_options: GenerationOptions) -> Self {
        self.options = options;
        self.raw_options = raw_options;
        self
    }

    /// Set the deadlines for model and tool calls.
    pub fn with_timeouts(mut self, model_timeout: Duration, tool_timeout: Duration) -> Self {
        self.model_timeout = model_timeout;
        self.tool_timeout = tool_timeout;
        self
    }

    /// Build the OpenAI-backed orchestrator described by `settings`.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        if settings.tools.is_empty() {
            return Err(PilotError::Config(
                "No tools configured. Add a [[tools]] entry to the config file.".to_string(),
            ));
        }

        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let tool_timeout = settings.agent.tool_timeout();
        let registry = ToolRegistry::load(&settings.tools, tool_timeout).await?;

        let model = OpenAILanguageModel::new(&settings.llm.model, settings.llm.timeout())?;

        Ok(Self::new(Arc::new(model), Arc::new(registry), prompts)
            .with_options(
                settings.llm.generation_options(),
                settings.llm.raw_generation_options(),
            )
            .with_timeouts(settings.llm.timeout(), tool_timeout))
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Answer a query with exactly one tool call.
    pub async fn query(&self, text: &str) -> Result<String> {
        Ok(self.run(text).await?.response)
    }

    /// Answer a query, keeping every intermediate result.
    #[instrument(skip(self), fields(query = %text))]
    pub async fn run(&self, text: &str) -> Result<QueryOutcome> {
        let tool = self.select_tool(text).await?;
        let parameters = self.predict_params(text, tool).await?;
        let tool_output = self.invoke(tool, &parameters).await?;
        let response = self.synthesize(text, tool, &tool_output).await?;

        Ok(QueryOutcome {
            tool_name: tool.name.clone(),
            parameters,
            tool_output,
            response,
        })
    }

    /// Answer a query directly from the model, without any tool.
    #[instrument(skip(self), fields(query = %text))]
    pub async fn raw_query(&self, text: &str) -> Result<String> {
        self.generate(text, &self.raw_options).await
    }

    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        with_deadline(
            self.model_timeout,
            "language model call",
            self.model.generate(prompt, options),
        )
        .await
    }

    /// Ask the model for a tool name and validate it against the registry.
    async fn select_tool(&self, query: &str) -> Result<&ToolInfo> {
        let mut vars = HashMap::new();
        vars.insert("tool_descriptions".to_string(), self.registry.describe());
        vars.insert("query".to_string(), query.to_string());
        let prompt = self
            .prompts
            .render_with_custom(&self.prompts.single_action.tool_selection, &vars);

        let selected = self.generate(&prompt, &self.options).await?;
        info!("Selected tool: {}", selected.trim());

        self.registry.lookup_by_name(selected.trim())
    }

    /// Ask the model for the tool's input parameters as a JSON object.
    async fn predict_params(&self, query: &str, tool: &ToolInfo) -> Result<Map<String, Value>> {
        let mut vars = HashMap::new();
        vars.insert(
            "input_params".to_string(),
            serde_json::to_string_pretty(&tool.input_schema)?,
        );
        vars.insert(
            "invocation_examples".to_string(),
            tool.invocation_examples.clone().unwrap_or_default(),
        );
        vars.insert("query".to_string(), query.to_string());
        let prompt = self
            .prompts
            .render_with_custom(&self.prompts.single_action.tool_invocation, &vars);

        let raw = self.generate(&prompt, &self.options).await?;
        info!("Predicted params string: {}", raw);

        let parameters = parse_parameters(&raw)?;
        let shown = Value::Object(parameters.clone());
        info!("Parsed tool params: {}", shown);
        Ok(parameters)
    }

    async fn invoke(&self, tool: &ToolInfo, parameters: &Map<String, Value>) -> Result<Value> {
        let output = with_deadline(
            self.tool_timeout,
            &tool.name,
            tool.handle.execute(&tool.operation_id, parameters),
        )
        .await
        .map_err(|e| match e {
            e @ (PilotError::Timeout { .. } | PilotError::ToolInvocation(_)) => e,
            other => PilotError::ToolInvocation(other.to_string()),
        })?;
        info!("Tool response: {}", output);
        Ok(output)
    }

    async fn synthesize(&self, query: &str, tool: &ToolInfo, output: &Value) -> Result<String> {
        let mut vars = HashMap::new();
        vars.insert(
            "output_params".to_string(),
            serde_json::to_string_pretty(&tool.output_schema)?,
        );
        vars.insert("output".to_string(), output.to_string());
        vars.insert("query".to_string(), query.to_string());
        let prompt = self
            .prompts
            .render_with_custom(&self.prompts.single_action.response, &vars);

        let response = self.generate(&prompt, &self.options).await?;
        info!("Response: {}", response);

        if response.trim().is_empty() {
            debug!("Empty synthesis, answering with refusal");
            return Ok(REFUSAL.to_string());
        }
        Ok(response)
    }
}

/// Parse model output strictly as a JSON object.
fn parse_parameters(raw: &str) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(raw.trim()).map_err(|e| PilotError::ParameterParse {
        raw: raw.to_string(),
        reason: e.to_string(),
    })?;

    match value {
        Value::Object(map) => Ok(map),
        other => Err(PilotError::ParameterParse {
            raw: raw.to_string(),
            reason: format!("expected a JSON object, got {}", json_kind(&other)),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::openapi::tests::exchange_rate_document;
    use crate::extension::Extension;
    use crate::registry::ToolSpec;
    use crate::testing::{RecordingExtension, ScriptedModel};
    use serde_json::json;

    const TOOL: &str = "Exchange Rates/get_exchange_rate";

    async fn orchestrator(
        model: Arc<ScriptedModel>,
        extension: Arc<RecordingExtension>,
    ) -> Orchestrator {
        let registry = ToolRegistry::build(vec![(
            extension as Arc<dyn Extension>,
            ToolSpec::new("rates.yaml", "get_exchange_rate").with_output_type("Result"),
        )])
        .await
        .unwrap();
        Orchestrator::new(model, Arc::new(registry), Prompts::default())
    }

    fn rate_payload() -> Value {
        json!({"base": "USD", "date": "2024-01-31", "rates": {"EUR": 0.9245}})
    }

    #[tokio::test]
    async fn test_exchange_rate_query_end_to_end() {
        let model = Arc::new(ScriptedModel::new(vec![
            TOOL,
            r#"{"currency_from": "USD", "currency_to": "EUR"}"#,
            "1 USD is worth 0.9245 EUR as of 2024-01-31.",
        ]));
        let extension = Arc::new(RecordingExtension::new(exchange_rate_document(), rate_payload()));
        let agent = orchestrator(model.clone(), extension.clone()).await;

        let outcome = agent.run("What is the exchange rate from USD to EUR?").await.unwrap();

        assert_eq!(outcome.tool_name, TOOL);
        assert_eq!(outcome.parameters["currency_from"], "USD");
        assert_eq!(outcome.parameters["currency_to"], "EUR");
        assert_eq!(outcome.tool_output, rate_payload());
        assert!(outcome.response.contains("0.9245"));

        let calls = extension.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "get_exchange_rate");

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].contains("tool_name: Exchange Rates/get_exchange_rate"));
        assert!(prompts[0].contains("USER QUERY: What is the exchange rate from USD to EUR?"));
        assert!(prompts[1].contains("currency_from"));
        assert!(prompts[2].contains("0.9245"));
        assert!(prompts[2].contains("\"rates\""));
    }

    #[tokio::test]
    async fn test_selection_output_is_trimmed() {
        let model = Arc::new(ScriptedModel::new(vec![
            "  Exchange Rates/get_exchange_rate\n",
            r#"{"currency_from": "USD", "currency_to": "EUR"}"#,
            "About 0.92.",
        ]));
        let extension = Arc::new(RecordingExtension::new(exchange_rate_document(), rate_payload()));
        let answer = orchestrator(model, extension).await.query("USD to EUR?").await.unwrap();
        assert_eq!(answer, "About 0.92.");
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_without_invoking() {
        let model = Arc::new(ScriptedModel::new(vec!["Weather/get_forecast"]));
        let extension = Arc::new(RecordingExtension::new(exchange_rate_document(), rate_payload()));
        let agent = orchestrator(model.clone(), extension.clone()).await;

        let err = agent.query("Will it rain?").await.unwrap_err();

        assert!(matches!(err, PilotError::ToolNotFound(name) if name == "Weather/get_forecast"));
        assert!(extension.calls().is_empty());
        assert_eq!(model.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_parameters_fail_without_invoking() {
        for bad in ["currency_from=USD", "{\"currency_from\": \"USD\"", "[\"USD\", \"EUR\"]"] {
            let model = Arc::new(ScriptedModel::new(vec![TOOL, bad]));
            let extension =
                Arc::new(RecordingExtension::new(exchange_rate_document(), rate_payload()));
            let agent = orchestrator(model, extension.clone()).await;

            let err = agent.query("USD to EUR?").await.unwrap_err();

            assert!(matches!(err, PilotError::ParameterParse { .. }), "input {bad}");
            assert!(extension.calls().is_empty());
        }
    }

    #[tokio::test]
    async fn test_invocation_failure_aborts_query() {
        let model = Arc::new(ScriptedModel::new(vec![
            TOOL,
            r#"{"currency_from": "USD", "currency_to": "XXX"}"#,
        ]));
        let extension = Arc::new(
            RecordingExtension::new(exchange_rate_document(), rate_payload())
                .failing_with("404 Not Found"),
        );
        let agent = orchestrator(model.clone(), extension).await;

        let err = agent.query("USD to XXX?").await.unwrap_err();

        assert!(matches!(err, PilotError::ToolInvocation(_)));
        assert_eq!(model.prompts().len(), 2);
    }

    #[tokio::test]
    async fn test_irrelevant_query_returns_refusal() {
        let model = Arc::new(ScriptedModel::new(vec![
            TOOL,
            r#"{"currency_from": "USD", "currency_to": "EUR"}"#,
            REFUSAL,
        ]));
        let extension = Arc::new(RecordingExtension::new(exchange_rate_document(), json!({})));
        let agent = orchestrator(model.clone(), extension).await;

        let answer = agent.query("Who won the 1998 World Cup?").await.unwrap();

        assert_eq!(answer, REFUSAL);
        let prompts = model.prompts();
        assert!(prompts[2].contains("just reply \"Sorry I don't know\""));
        assert!(prompts[2].contains("USER QUERY: Who won the 1998 World Cup?"));
    }

    #[tokio::test]
    async fn test_blank_synthesis_becomes_refusal() {
        let model = Arc::new(ScriptedModel::new(vec![
            TOOL,
            r#"{"currency_from": "USD", "currency_to": "EUR"}"#,
            "   ",
        ]));
        let extension = Arc::new(RecordingExtension::new(exchange_rate_document(), json!({})));
        let answer = orchestrator(model, extension).await.query("?").await.unwrap();
        assert_eq!(answer, REFUSAL);
    }

    #[tokio::test]
    async fn test_slow_tool_is_timeout() {
        let model = Arc::new(ScriptedModel::new(vec![
            TOOL,
            r#"{"currency_from": "USD", "currency_to": "EUR"}"#,
        ]));
        let extension = Arc::new(
            RecordingExtension::new(exchange_rate_document(), rate_payload())
                .with_delay(Duration::from_secs(5)),
        );
        let agent = orchestrator(model, extension)
            .await
            .with_timeouts(Duration::from_secs(5), Duration::from_millis(20));

        let err = agent.query("USD to EUR?").await.unwrap_err();
        assert!(matches!(err, PilotError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_unresponsive_extension_server_is_timeout() {
        let addr = crate::testing::stalled_server().await;
        let mut doc = exchange_rate_document();
        doc["servers"] = json!([{"url": format!("http://{}", addr)}]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rates.json");
        std::fs::write(&path, doc.to_string()).unwrap();

        let tool_timeout = Duration::from_millis(300);
        let spec = ToolSpec::new(path.to_str().unwrap(), "get_exchange_rate");
        let registry = ToolRegistry::load(&[spec], tool_timeout).await.unwrap();
        let model = Arc::new(ScriptedModel::new(vec![
            TOOL,
            r#"{"currency_from": "USD", "currency_to": "EUR"}"#,
        ]));
        let agent = Orchestrator::new(model, Arc::new(registry), Prompts::default())
            .with_timeouts(Duration::from_secs(5), tool_timeout);

        let err = agent.query("USD to EUR?").await.unwrap_err();
        assert!(matches!(err, PilotError::Timeout { after, .. } if after == tool_timeout));
    }

    #[tokio::test]
    async fn test_parsed_parameters_reach_the_tool() {
        let model = Arc::new(ScriptedModel::new(vec![
            TOOL,
            r#"{"currency_from": "GBP", "currency_to": "JPY", "currency_date": "2024-01-02"}"#,
            "Done.",
        ]));
        let extension = Arc::new(RecordingExtension::new(exchange_rate_document(), rate_payload()));
        let agent = orchestrator(model, extension.clone()).await;

        let outcome = agent.run("GBP to JPY on Jan 2nd?").await.unwrap();

        assert_eq!(outcome.parameters.len(), 3);
        let calls = extension.calls();
        assert_eq!(calls[0].1, outcome.parameters);
    }

    #[tokio::test]
    async fn test_raw_query_uses_raw_options() {
        let model = Arc::new(ScriptedModel::new(vec!["Roughly 0.92 euros."]));
        let extension = Arc::new(RecordingExtension::new(exchange_rate_document(), rate_payload()));
        let agent = orchestrator(model.clone(), extension).await;

        let answer = agent.raw_query("USD to EUR?").await.unwrap();

        assert_eq!(answer, "Roughly 0.92 euros.");
        assert_eq!(model.prompts(), vec!["USD to EUR?".to_string()]);
        assert_eq!(model.options()[0].max_tokens, 1024);
    }

    #[test]
    fn test_parse_parameters_tolerates_surrounding_whitespace() {
        let params = parse_parameters("\n {\"currency_from\": \"USD\"} \n").unwrap();
        assert_eq!(params["currency_from"], "USD");
    }
}
