//! OpenAI-backed language models.

use super::{
    CallDirective, ChatMessage, ChatModel, FunctionDeclaration, GenerationOptions, LanguageModel,
    ModelTurn,
};
use crate::error::{PilotError, Result};
use crate::openai::create_client_with_timeout;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolType,
    CreateChatCompletionRequestArgs, FunctionCall, FunctionObject,
};
use async_openai::Client;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Text generation through the chat completions endpoint.
pub struct OpenAILanguageModel {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAILanguageModel {
    pub fn new(model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: create_client_with_timeout(timeout)?,
            model: model.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAILanguageModel {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        // The chat completions API has no top-k sampling; the option is accepted and ignored.
        debug!(
            "Generating with {} (max_tokens={}, temperature={}, top_p={}, top_k={} ignored)",
            self.model, options.max_tokens, options.temperature, options.top_p, options.top_k
        );

        let message: ChatCompletionRequestMessage = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| PilotError::Model(e.to_string()))?
            .into();

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![message])
            .max_completion_tokens(options.max_tokens)
            .temperature(options.temperature)
            .top_p(options.top_p)
            .build()
            .map_err(|e| PilotError::Model(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| request_error(e, "Completion request failed", self.timeout))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PilotError::Model("Empty response from model".to_string()))
    }
}

/// Function-calling chat model.
pub struct OpenAIChatModel {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl OpenAIChatModel {
    pub fn new(model: &str, temperature: f32, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: create_client_with_timeout(timeout)?,
            model: model.to_string(),
            temperature,
            timeout,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    async fn respond(
        &self,
        messages: &[ChatMessage],
        functions: &[FunctionDeclaration],
    ) -> Result<ModelTurn> {
        let messages = messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>>>()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(messages)
            .temperature(self.temperature);
        if !functions.is_empty() {
            args.tools(functions.iter().map(to_tool).collect::<Vec<_>>())
                .parallel_tool_calls(false);
        }
        let request = args.build().map_err(|e| PilotError::Model(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| request_error(e, "Chat request failed", self.timeout))?;

        let message = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| PilotError::Model("No response from model".to_string()))?;

        // Parallel calls are disabled, so only the first directive is honoured.
        if let Some(call) = message.tool_calls.and_then(|calls| calls.into_iter().next()) {
            return Ok(ModelTurn::Call(CallDirective {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            }));
        }

        Ok(ModelTurn::Text(message.content.unwrap_or_default()))
    }
}

/// Transport timeouts keep their meaning; every other failure is a model error.
fn request_error(err: OpenAIError, context: &str, timeout: Duration) -> PilotError {
    match err {
        OpenAIError::Reqwest(e) if e.is_timeout() => PilotError::Timeout {
            what: "language model call".to_string(),
            after: timeout,
        },
        other => PilotError::Model(format!("{}: {}", context, other)),
    }
}

fn to_tool(declaration: &FunctionDeclaration) -> ChatCompletionTool {
    ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: declaration.name.clone(),
            description: Some(declaration.description.clone()),
            parameters: Some(declaration.parameters.clone()),
            strict: None,
        },
    }
}

fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
    let built: ChatCompletionRequestMessage = match message {
        ChatMessage::User(text) => ChatCompletionRequestUserMessageArgs::default()
            .content(text.as_str())
            .build()
            .map_err(|e| PilotError::Model(e.to_string()))?
            .into(),
        ChatMessage::FunctionCall(call) => ChatCompletionRequestAssistantMessageArgs::default()
            .tool_calls(vec![ChatCompletionMessageToolCall {
                id: call.id.clone(),
                r#type: ChatCompletionToolType::Function,
                function: FunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            }])
            .build()
            .map_err(|e| PilotError::Model(e.to_string()))?
            .into(),
        ChatMessage::FunctionResponse {
            call_id, content, ..
        } => ChatCompletionRequestToolMessageArgs::default()
            .tool_call_id(call_id.as_str())
            .content(content.as_str())
            .build()
            .map_err(|e| PilotError::Model(e.to_string()))?
            .into(),
    };
    Ok(built)
}
