#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! The seven stage agents of the provisioning pipeline.
//!
//! Each agent is a single-purpose transformer: it takes the pipeline
//! state accumulated so far and returns a superset of it. Agents are
//! plain async functions rather than trait objects — there is no
//! dynamic dispatch between stages, only within the LLM provider and
//! job-store seams.

pub mod capi_instructions;
pub mod data_modeling;
pub mod demo_story;
pub mod infrastructure;
pub mod research;
pub mod synthetic_data;
pub mod validation;

use async_trait::async_trait;
use capi_demo_llm::providers::{LlmProvider, Message};
use capi_demo_llm::LlmError;
use capi_demo_models::{LogLevel, SchemaError};
use thiserror::Error;

/// Errors raised by stage agents.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The LLM provider or a tool-layer call failed.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// The model's response was not valid JSON, or didn't match the
    /// expected shape.
    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    /// A generated schema violated a hard constraint.
    #[error("schema violation: {0}")]
    Schema(#[from] SchemaError),

    /// Synthetic-data generation violated a hard constraint.
    #[error("data generation error: {0}")]
    DataGeneration(String),

    /// BigQuery/CAPI infrastructure provisioning failed.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// A runtime safeguard refused to proceed.
    #[error("safeguard error: {0}")]
    Safeguard(String),
}

/// Sink for the free-text progress lines a stage wants surfaced to the
/// job log and, through it, to SSE subscribers. Kept as a trait (rather
/// than a direct `JobStore` dependency) so stage agents stay storage-agnostic.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Records one log line at the given severity.
    async fn log(&self, level: LogLevel, message: &str);
}

/// A [`ProgressReporter`] that discards everything, for tests and for
/// the validation stage's offline unit tests.
pub struct NullProgress;

#[async_trait]
impl ProgressReporter for NullProgress {
    async fn log(&self, _level: LogLevel, _message: &str) {}
}

/// Sends a single-turn prompt to the model and parses its text response
/// as JSON into `T`.
///
/// Strips a leading/trailing markdown code fence if the model wrapped
/// its JSON in one, since plain-text chat completions (as opposed to
/// tool-forced output) commonly do.
///
/// # Errors
///
/// Returns [`AgentError::Llm`] if the request fails, or
/// [`AgentError::MalformedOutput`] if the response has no text content
/// or the text isn't valid JSON for `T`.
pub async fn call_structured<T: serde::de::DeserializeOwned>(
    provider: &dyn LlmProvider,
    system_prompt: &str,
    user_prompt: &str,
) -> Result<T, AgentError> {
    let messages = [Message::user(user_prompt)];
    let response = provider.chat(system_prompt, &messages, &[]).await?;

    let text = response
        .content
        .iter()
        .find_map(|block| match block {
            capi_demo_llm::providers::ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .ok_or_else(|| AgentError::MalformedOutput("model returned no text content".to_string()))?;

    serde_json::from_str(strip_code_fence(text))
        .map_err(|e| AgentError::MalformedOutput(format!("{e}: {text}")))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest).trim_start();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_code_fence_removes_json_fence() {
        let fenced = "```json\n{\"a\":1}\n```";
        assert_eq!(strip_code_fence(fenced), "{\"a\":1}");
    }

    #[test]
    fn strip_code_fence_passes_through_plain_json() {
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
    }
}
