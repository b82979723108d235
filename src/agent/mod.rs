//! Multi-step function-calling agent.
//!
//! The model repeatedly emits call directives against a fixed set of
//! warehouse capabilities until it answers in plain text. Capability
//! failures are reported back to the model; the loop itself is bounded by an
//! iteration cap and per-call deadlines.

mod runner;
mod tools;

pub use runner::{AgentResponse, FunctionCallingAgent, LoopState, ToolCallRecord};
pub use tools::{function_declarations, parse_function_call, Capability, CapabilityContext};
