//! Configuration module for Toolpilot.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{FunctionCallingPrompts, Prompts, SingleActionPrompts, REFUSAL};
pub use settings::{
    AgentSettings, GeneralSettings, LlmSettings, PromptSettings, RawAnswerSettings,
    ServerSettings, Settings, WarehouseSettings,
};
