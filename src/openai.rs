//! OpenAI client construction.

use crate::deadline::transport_timeout;
use crate::error::{PilotError, Result};
use async_openai::{config::OpenAIConfig, Client};
use std::time::Duration;

/// Create an OpenAI client for calls that run under a `deadline`.
///
/// The transport timeout sits [`TRANSPORT_MARGIN`](crate::deadline::TRANSPORT_MARGIN)
/// past the deadline, which stays the one that fires.
pub fn create_client_with_timeout(deadline: Duration) -> Result<Client<OpenAIConfig>> {
    let http_client = reqwest::Client::builder()
        .timeout(transport_timeout(deadline))
        .build()
        .map_err(|e| PilotError::Config(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Client::with_config(OpenAIConfig::default()).with_http_client(http_client))
}
