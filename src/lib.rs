//! toolpilot - Tool-calling agents over OpenAPI extensions and a query warehouse
//!
//! # Overview
//!
//! toolpilot answers natural-language questions in two ways:
//! - A single-action agent picks one registered tool, asks the model for its
//!   parameters, invokes it once and turns the result into an answer
//! - A function-calling agent lets the model explore a data warehouse with
//!   repeated calls until it can answer, bounded by an iteration cap
//!
//! # Architecture
//!
//! - `config` - Settings and prompt templates
//! - `llm` - Language model and chat model abstractions
//! - `extension` - OpenAPI-described HTTP extensions
//! - `registry` - Tool metadata resolved from extension documents
//! - `orchestrator` - The single-action pipeline
//! - `warehouse` - Query warehouse abstraction
//! - `agent` - The function-calling loop
//! - `session` - Interactive conversation history
//!
//! # Example
//!
//! ```rust,no_run
//! use toolpilot::config::Settings;
//! use toolpilot::orchestrator::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = Orchestrator::from_settings(&settings).await?;
//!
//!     let answer = orchestrator
//!         .query("What is the exchange rate from USD to EUR?")
//!         .await?;
//!     println!("{}", answer);
//!
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod cli;
pub mod config;
pub mod deadline;
pub mod error;
pub mod extension;
pub mod llm;
pub mod openai;
pub mod orchestrator;
pub mod registry;
pub mod session;
pub mod warehouse;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{PilotError, Result};
