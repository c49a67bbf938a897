//! # SpendGuard Insight
//!
//! Typed contract for the remote extraction/insight service, plus adapters.
//!
//! Orchestration code only ever sees [`InsightProvider`]; the concrete
//! backend ([`GeminiProvider`] or [`ScriptedProvider`]) is picked at startup.

pub mod gemini;
pub mod prompts;
pub mod provider;
pub mod scripted;
mod wire;

pub use gemini::{GeminiConfig, GeminiProvider};
pub use provider::InsightProvider;
pub use scripted::{ProviderCall, ScriptedProvider};
