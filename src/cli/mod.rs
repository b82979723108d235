//! CLI module for toolpilot.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// toolpilot - Tool-calling agents over OpenAPI extensions and a query warehouse
///
/// Answers questions by letting a language model pick one tool and fill in its
/// parameters, or by letting it explore a data warehouse with repeated calls.
#[derive(Parser, Debug)]
#[command(name = "toolpilot")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "TOOLPILOT_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Answer a question with exactly one tool call
    Query {
        /// The question to answer
        text: String,

        /// Also print the model's answer without any tool
        #[arg(long)]
        compare: bool,
    },

    /// Chat with the data warehouse through the function-calling loop
    Sql {
        /// Ask a single question and exit instead of starting a session
        question: Option<String>,
    },

    /// List registered tools as the model sees them
    Tools,

    /// Start the HTTP API server
    Serve {
        /// Host to bind to (defaults to server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (defaults to server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
