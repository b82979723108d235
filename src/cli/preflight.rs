//! Pre-flight checks before expensive operations.
//!
//! Validates that credentials and configuration are available before
//! starting operations that would otherwise fail on their first remote call.

use crate::config::Settings;
use crate::error::{PilotError, Result};

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Single-action queries need the model key and at least one tool.
    Query,
    /// The warehouse loop needs the model key, a project and a token.
    Sql,
    /// Serving needs everything a query needs.
    Serve,
    /// Listing tools only loads documents.
    Tools,
}

/// Run pre-flight checks for the given operation.
pub fn check(operation: Operation, settings: &Settings) -> Result<()> {
    match operation {
        Operation::Query | Operation::Serve => {
            check_api_key()?;
            check_tools(settings)?;
        }
        Operation::Sql => {
            check_api_key()?;
            check_warehouse(settings)?;
        }
        Operation::Tools => {
            check_tools(settings)?;
        }
    }
    Ok(())
}

/// Check if OpenAI API key is configured.
fn check_api_key() -> Result<()> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(()),
        Ok(_) => Err(PilotError::Config(
            "OPENAI_API_KEY is empty. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
        Err(_) => Err(PilotError::Config(
            "OPENAI_API_KEY not set. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
    }
}

fn check_tools(settings: &Settings) -> Result<()> {
    if settings.tools.is_empty() {
        return Err(PilotError::Config(format!(
            "No tools configured. Add a [[tools]] entry to {}",
            Settings::default_config_path().display()
        )));
    }
    Ok(())
}

fn check_warehouse(settings: &Settings) -> Result<()> {
    let warehouse = &settings.warehouse;
    if warehouse.project_id.is_empty() {
        return Err(PilotError::Config(
            "warehouse.project_id is not set".to_string(),
        ));
    }
    match std::env::var(&warehouse.access_token_env) {
        Ok(token) if !token.is_empty() => Ok(()),
        _ => Err(PilotError::Config(format!(
            "{} not set. Export an OAuth access token for the warehouse.",
            warehouse.access_token_env
        ))),
    }
}
