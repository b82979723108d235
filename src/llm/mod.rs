//! Language model abstraction.
//!
//! Two capabilities are modelled separately: plain text generation for the
//! single-action pipeline, and a function-calling chat turn for the
//! multi-step loop. Both are swappable so the pipeline can be driven by
//! scripted doubles in tests.

mod openai;

pub use openai::{OpenAIChatModel, OpenAILanguageModel};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Sampling options for a single generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.1,
            top_p: 0.8,
            top_k: 40,
        }
    }
}

/// Stateless text generation: prompt in, text out.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for a fully rendered prompt.
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;
}

/// A function the model may ask to call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: serde_json::Value,
}

/// A structured request from the model to invoke a named function.
#[derive(Debug, Clone, PartialEq)]
pub struct CallDirective {
    /// Provider-assigned identifier tying the response back to this call.
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as emitted by the model.
    pub arguments: String,
}

/// One message in a function-calling conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    User(String),
    /// The model's own call directive, replayed so the provider sees the full exchange.
    FunctionCall(CallDirective),
    /// Synthetic message carrying a serialized function result back to the model.
    FunctionResponse {
        call_id: String,
        name: String,
        content: String,
    },
}

/// What the model produced on its turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    /// Plain text: the model considers the task complete.
    Text(String),
    /// The model wants a function executed before continuing.
    Call(CallDirective),
}

/// A chat model that supports function calling.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce the next turn given the conversation so far.
    async fn respond(
        &self,
        messages: &[ChatMessage],
        functions: &[FunctionDeclaration],
    ) -> Result<ModelTurn>;
}
