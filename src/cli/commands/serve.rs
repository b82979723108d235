//! HTTP API server for integration with other systems.
//!
//! Exposes the single-action orchestrator behind one prompt endpoint.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Shared application state.
struct AppState {
    orchestrator: Orchestrator,
}

/// Run the HTTP API server.
pub async fn run_serve(host: Option<String>, port: Option<u16>, settings: Settings) -> anyhow::Result<()> {
    if let Err(e) = preflight::check(Operation::Serve, &settings) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let spinner = Output::spinner("Loading tools...");
    let orchestrator = Orchestrator::from_settings(&settings).await;
    spinner.finish_and_clear();
    let orchestrator = orchestrator?;
    let tool_count = orchestrator.registry().len();

    let app = router(Arc::new(AppState { orchestrator }));

    let host = host.unwrap_or_else(|| settings.server.host.clone());
    let port = port.unwrap_or(settings.server.port);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("toolpilot API Server");
    println!();
    Output::success(&format!("Listening on http://{} with {} tool(s)", addr, tool_count));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /");
    Output::kv("Prompt", "POST /");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(health).post(prompt))
        .layer(cors)
        .with_state(state)
}

// === Request/Response Types ===

#[derive(Deserialize)]
struct PromptRequest {
    #[serde(default)]
    prompt: Option<String>,
}

#[derive(Serialize)]
struct PromptResponse {
    response: String,
    raw_response: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: String) -> axum::response::Response {
    (status, Json(ErrorResponse { error })).into_response()
}

// === Handlers ===

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn prompt(State(state): State<Arc<AppState>>, Json(req): Json<PromptRequest>) -> impl IntoResponse {
    let Some(prompt) = req.prompt else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'prompt' field".to_string());
    };
    info!("Prompt: {}", prompt);

    let response = match state.orchestrator.query(&prompt).await {
        Ok(response) => response,
        Err(e) => {
            error!("Query failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let raw_response = match state.orchestrator.raw_query(&prompt).await {
        Ok(raw) => raw,
        Err(e) => {
            error!("Raw query failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    Json(PromptResponse {
        response,
        raw_response,
    })
    .into_response()
}
