//! Agent runner with the function-calling loop.

use super::tools::{function_declarations, parse_function_call, CapabilityContext};
use crate::config::FunctionCallingPrompts;
use crate::deadline::with_deadline;
use crate::error::{PilotError, Result};
use crate::llm::{CallDirective, ChatMessage, ChatModel, ModelTurn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Where the loop currently stands.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    /// Waiting for the model's next turn.
    AwaitingModel,
    /// Running the function the model asked for.
    ExecutingCall(CallDirective),
    /// The model answered in plain text.
    Done(String),
}

/// Agent that answers questions by letting the model drive warehouse calls.
pub struct FunctionCallingAgent {
    model: Arc<dyn ChatModel>,
    tools: CapabilityContext,
    prompts: FunctionCallingPrompts,
    max_iterations: usize,
    model_timeout: Duration,
}

impl FunctionCallingAgent {
    /// Create a new agent with the given model and capability context.
    pub fn new(model: Arc<dyn ChatModel>, tools: CapabilityContext) -> Self {
        Self {
            model,
            tools,
            prompts: FunctionCallingPrompts::default(),
            max_iterations: 25,
            model_timeout: Duration::from_secs(120),
        }
    }

    /// Set custom prompts.
    pub fn with_prompts(mut self, prompts: FunctionCallingPrompts) -> Self {
        self.prompts = prompts;
        self
    }

    /// Set maximum model calls for one run.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the deadline for each model call.
    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    /// Run the loop for one user question.
    pub async fn run(&self, question: &str) -> Result<AgentResponse> {
        let mut trace = Vec::new();
        self.run_with_trace(question, &mut trace).await
    }

    /// Run the loop, recording every call into `trace` as it happens.
    ///
    /// When the run fails, `trace` keeps the calls made so far, including
    /// the one that ended the run.
    #[instrument(skip(self, trace), fields(question = %question))]
    pub async fn run_with_trace(
        &self,
        question: &str,
        trace: &mut Vec<ToolCallRecord>,
    ) -> Result<AgentResponse> {
        let functions = function_declarations();
        let mut messages = vec![ChatMessage::User(format!(
            "{}\n\n{}",
            question, self.prompts.provenance
        ))];
        let mut iterations = 0;
        let mut state = LoopState::AwaitingModel;

        loop {
            state = match state {
                LoopState::AwaitingModel => {
                    if iterations >= self.max_iterations {
                        return Err(PilotError::LoopBudgetExceeded(self.max_iterations));
                    }
                    iterations += 1;
                    debug!("Agent iteration {}", iterations);

                    let turn = with_deadline(
                        self.model_timeout,
                        "model turn",
                        self.model.respond(&messages, &functions),
                    )
                    .await?;

                    match turn {
                        ModelTurn::Text(text) => LoopState::Done(text),
                        ModelTurn::Call(call) => LoopState::ExecutingCall(call),
                    }
                }
                LoopState::ExecutingCall(call) => {
                    let record = match self.execute_call(&call).await? {
                        CallOutcome::Completed(record) => record,
                        CallOutcome::Aborted(record, e) => {
                            trace.push(record);
                            warn!("Agent run aborted: {} (calls: {})", e, render_trace(trace));
                            return Err(e);
                        }
                    };

                    messages.push(ChatMessage::FunctionCall(call.clone()));
                    messages.push(ChatMessage::FunctionResponse {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        content: record.result.clone(),
                    });
                    trace.push(record);

                    LoopState::AwaitingModel
                }
                LoopState::Done(content) => {
                    info!(
                        "Agent finished after {} iteration(s) and {} call(s)",
                        iterations,
                        trace.len()
                    );
                    return Ok(AgentResponse {
                        content,
                        tool_calls: std::mem::take(trace),
                        iterations,
                    });
                }
            };
        }
    }

    /// Execute one call directive and record it.
    ///
    /// Capability failures become an error payload for the model; malformed
    /// directives, unknown functions and timeouts end the run. Either way
    /// the call is recorded.
    async fn execute_call(&self, call: &CallDirective) -> Result<CallOutcome> {
        info!("Agent calling tool: {} with args: {}", call.name, call.arguments);

        let (arguments, executed) = match parse_function_call(&call.name, &call.arguments) {
            Ok(capability) => (capability.arguments(), self.tools.execute(&capability).await),
            Err(e) => (raw_arguments(&call.arguments), Err(e)),
        };
        let (payload, fatal) = match executed {
            Ok(content) => (FunctionPayload::Content(content), None),
            Err(
                e @ (PilotError::Timeout { .. }
                | PilotError::UnknownFunction(_)
                | PilotError::MalformedCall(_)),
            ) => (FunctionPayload::Error(e.to_string()), Some(e)),
            Err(e) => {
                warn!("Tool {} failed: {}", call.name, e);
                (FunctionPayload::Error(e.to_string()), None)
            }
        };
        let result = serde_json::to_string(&payload)?;
        debug!("Tool {} returned {} bytes", call.name, result.len());

        let record = ToolCallRecord {
            name: call.name.clone(),
            arguments,
            result,
        };
        Ok(match fatal {
            Some(e) => CallOutcome::Aborted(record, e),
            None => CallOutcome::Completed(record),
        })
    }
}

/// What became of one call directive.
enum CallOutcome {
    /// The result goes back to the model.
    Completed(ToolCallRecord),
    /// The run ends with this error.
    Aborted(ToolCallRecord, PilotError),
}

fn raw_arguments(arguments: &str) -> Value {
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::String(arguments.to_string()))
}

fn render_trace(trace: &[ToolCallRecord]) -> String {
    trace
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Body of the synthetic function-response message.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum FunctionPayload {
    Content(Value),
    Error(String),
}

/// Response from an agent run.
#[derive(Debug)]
pub struct AgentResponse {
    /// The final response content from the agent.
    pub content: String,
    /// Record of all tool calls made during execution.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Number of iterations (model calls) used.
    pub iterations: usize,
}

/// Record of a tool call made by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Name of the tool called.
    pub name: String,
    /// Arguments passed to the tool.
    pub arguments: Value,
    /// Serialized result exactly as it was fed back to the model.
    pub result: String,
}

impl std::fmt::Display for ToolCallRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.arguments)
    }
}

impl ToolCallRecord {
    /// Whether the capability reported a failure.
    pub fn is_error(&self) -> bool {
        serde_json::from_str::<Value>(&self.result)
            .map(|v| v.get("error").is_some())
            .unwrap_or(false)
    }
}
