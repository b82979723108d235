//! Prompt templates for Toolpilot.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.
//! Placeholders use the `{{name}}` syntax.

use crate::error::{PilotError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern is valid"));

/// Answer returned when the tool output holds nothing relevant to the query.
pub const REFUSAL: &str = "Sorry I don't know";

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Prompts {
    pub single_action: SingleActionPrompts,
    pub function_calling: FunctionCallingPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// The three templates driving the single-action pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SingleActionPrompts {
    pub tool_selection: String,
    pub tool_invocation: String,
    pub response: String,
}

impl Default for SingleActionPrompts {
    fn default() -> Self {
        Self {
            tool_selection: r#"You need to select one of the tools which can resolve this user query.
You should output the tool_name that you select.

TOOLs: {{tool_descriptions}}

USER QUERY: {{query}}
SELECTED tool_name:
"#
            .to_string(),

            tool_invocation: r#"Given a user query and a tool, you need to predict input parameters as a JSON to trigger this tool which can answer this user query.

TOOL INPUT FORMAT:
{{input_params}}

{{invocation_examples}}
USER QUERY: {{query}}
RESPONSE:
"#
            .to_string(),

            response: r#"You should understand the format of this json OUTPUT by the following TOOL OUTPUT FORMAT,
and then use this json OUTPUT, find relevant information, summarize, answer the user query and reply in RESPONSE.
Your RESPONSE must answer the user query. If you don't find relevant information from OUTPUT, just reply "Sorry I don't know".
Your RESPONSE must be related to the OUTPUT.
If the user query is related to code and the output contains code, your response should also contain the code snippets.

Your RESPONSE should be informative, and simple for users to follow and understand.

TOOL OUTPUT FORMAT:
{{output_params}}

OUTPUT:
{{output}}

USER QUERY: {{query}}

RESPONSE:
"#
            .to_string(),
        }
    }
}

/// Prompts for the multi-step function-calling loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionCallingPrompts {
    /// Appended to every user question before the loop starts.
    pub provenance: String,
}

impl Default for FunctionCallingPrompts {
    fn default() -> Self {
        Self {
            provenance: r#"Please give a concise, high-level summary followed by detail in
plain language about where the information in your response is
coming from in the database. Only use information that you learn
from BigQuery, do not make up information."#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let single_action_path = custom_path.join("single_action.toml");
            if single_action_path.exists() {
                let content = std::fs::read_to_string(&single_action_path)?;
                prompts.single_action = toml::from_str(&content)?;
            }

            let function_calling_path = custom_path.join("function_calling.toml");
            if function_calling_path.exists() {
                let content = std::fs::read_to_string(&function_calling_path)?;
                prompts.function_calling = toml::from_str(&content)?;
            }
        }

        prompts.validate()?;
        Ok(prompts)
    }

    /// Check that every template still carries the placeholders the pipeline fills.
    pub fn validate(&self) -> Result<()> {
        let required: [(&str, &str, &[&str]); 3] = [
            (
                "tool_selection",
                &self.single_action.tool_selection,
                &["tool_descriptions", "query"],
            ),
            (
                "tool_invocation",
                &self.single_action.tool_invocation,
                &["input_params", "invocation_examples", "query"],
            ),
            (
                "response",
                &self.single_action.response,
                &["output_params", "output", "query"],
            ),
        ];

        for (name, template, placeholders) in required {
            let present = placeholders_in(template);
            if let Some(missing) = placeholders.iter().find(|p| !present.contains(**p)) {
                return Err(PilotError::Config(format!(
                    "Prompt '{}' is missing the {{{{{}}}}} placeholder",
                    name, missing
                )));
            }
        }
        Ok(())
    }

    /// Render a prompt template with the given variables.
    ///
    /// Substitution is single-pass, so placeholder syntax inside a value is
    /// left as-is. Unknown placeholders are kept verbatim.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &regex::Captures<'_>| match vars.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}

fn placeholders_in(template: &str) -> std::collections::HashSet<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}
