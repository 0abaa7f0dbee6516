//! Draft generation across LLM providers (OpenAI-compatible, Gemini).
//!
//! Provides the `ProviderAdapter` trait, `DynProvider` wrapper, the
//! `ProviderRouter` that falls back across providers in configured order,
//! and the `BatchJobOrchestrator` for bulk generation.

mod batch;
mod config;
mod gemini;
mod http;
mod json;
mod openai;
mod provider;
mod router;
mod types;

pub use batch::*;
pub use config::*;
pub use gemini::GeminiAdapter;
pub use http::{map_http_error, rate_limit_wait_ms, send_error, DEFAULT_RATE_LIMIT_WAIT_MS};
pub use json::{parse_draft, parse_json_relaxed};
pub use openai::{chat_completion_body, completion_text, OpenAiCompatibleAdapter, CHAT_COMPLETIONS_PATH};
pub use provider::*;
pub use router::*;
pub use types::*;
