//! Tools command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::registry::ToolRegistry;
use anyhow::Result;

/// Run the tools command.
pub async fn run_tools(settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Tools, &settings) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let spinner = Output::spinner("Loading tools...");
    let registry = ToolRegistry::load(&settings.tools, settings.agent.tool_timeout()).await;
    spinner.finish_and_clear();
    let registry = registry?;

    Output::header(&format!("Registered tools ({})", registry.len()));
    for (i, tool) in registry.tools().iter().enumerate() {
        Output::tool(i + 1, &tool.name, &tool.description);
    }
    println!();

    Ok(())
}
