//! Query command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;
use serde_json::Value;

/// Run the query command.
pub async fn run_query(text: &str, compare: bool, settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Query, &settings) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let spinner = Output::spinner("Loading tools...");
    let orchestrator = match Orchestrator::from_settings(&settings).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            spinner.finish_and_clear();
            Output::error(&format!("Failed to build tool registry: {}", e));
            return Err(e.into());
        }
    };

    spinner.set_message("Thinking...");
    let outcome = orchestrator.run(text).await;
    spinner.finish_and_clear();

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            Output::error(&format!("Query failed: {}", e));
            return Err(e.into());
        }
    };

    println!("\n{}\n", outcome.response);
    Output::kv("Tool", &outcome.tool_name);
    Output::kv("Parameters", &Value::Object(outcome.parameters).to_string());

    if compare {
        let spinner = Output::spinner("Asking without tools...");
        let raw = orchestrator.raw_query(text).await;
        spinner.finish_and_clear();

        Output::header("Without tools");
        println!("\n{}\n", raw?);
    }

    Ok(())
}
