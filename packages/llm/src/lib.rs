#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! LLM provider abstraction, bounded web crawler, and hand-rolled
//! BigQuery/Conversational Analytics API REST clients.
//!
//! Supports Anthropic Claude and AWS Bedrock (feature-gated) behind a
//! common [`providers::LlmProvider`] trait, resolved per
//! [`capi_demo_models::ModelTier`] from environment configuration at
//! startup rather than hard-coded per call site.

pub mod bigquery;
pub mod capi;
pub mod crawler;
pub mod providers;
pub mod retry;

use capi_demo_models::ModelTier;
use thiserror::Error;

/// Errors from LLM, crawl, or infrastructure-client operations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request to an upstream service failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Provider-specific error returned by the LLM API.
    #[error("provider error: {message}")]
    Provider {
        /// Description of what went wrong.
        message: String,
    },

    /// Configuration error (missing env var, unknown provider name).
    #[error("configuration error: {message}")]
    Config {
        /// Description.
        message: String,
    },

    /// The crawl produced no usable pages, or the URL could not be reached.
    #[error("crawl error: {0}")]
    Crawl(String),

    /// BigQuery or CAPI REST call failed after retries were exhausted.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

/// Resolves an abstract [`ModelTier`] to a concrete model identifier via
/// environment variables.
///
/// `Fast` reads `CAPI_DEMO_FAST_MODEL`, `Strong` reads
/// `CAPI_DEMO_STRONG_MODEL`. Both fall back to reasonable Claude model
/// names so the pipeline runs out of the box with only `ANTHROPIC_API_KEY`
/// set.
#[must_use]
pub fn resolve_model_id(tier: ModelTier) -> String {
    let (var, default) = match tier {
        ModelTier::Fast => ("CAPI_DEMO_FAST_MODEL", "claude-haiku-4-20250514"),
        ModelTier::Strong => ("CAPI_DEMO_STRONG_MODEL", "claude-sonnet-4-20250514"),
    };
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

/// Resolves the model id for one named agent, falling back to its tier
/// default when the agent-specific override isn't set.
///
/// Backs the per-agent overrides (`research_agent_model`,
/// `demo_story_agent_model`, `data_modeling_agent_model`,
/// `capi_agent_model`): each agent checks its own env var first, then
/// falls back to [`resolve_model_id`] for its tier.
#[must_use]
pub fn resolve_model_id_for(agent_override_var: &str, tier: ModelTier) -> String {
    std::env::var(agent_override_var).unwrap_or_else(|_| resolve_model_id(tier))
}

/// Creates an [`providers::LlmProvider`] for the given tier based on
/// environment variables.
///
/// Checks `AI_PROVIDER` (default: `"anthropic"`) and uses the
/// corresponding API key env var (`ANTHROPIC_API_KEY`, or AWS credentials
/// for `"bedrock"`).
///
/// # Errors
///
/// Returns [`LlmError::Config`] if the required credentials are not set,
/// or if `provider` names an unsupported backend.
pub async fn create_provider_from_env(
    tier: ModelTier,
) -> Result<Box<dyn providers::LlmProvider>, LlmError> {
    create_provider_with_model(resolve_model_id(tier)).await
}

/// Like [`create_provider_from_env`], but resolves the model id through
/// [`resolve_model_id_for`] so a per-agent override env var can pin this
/// provider to a specific model regardless of `tier`.
///
/// # Errors
///
/// Same as [`create_provider_from_env`].
pub async fn create_provider_for_agent(
    agent_override_var: &str,
    tier: ModelTier,
) -> Result<Box<dyn providers::LlmProvider>, LlmError> {
    create_provider_with_model(resolve_model_id_for(agent_override_var, tier)).await
}

async fn create_provider_with_model(model: String) -> Result<Box<dyn providers::LlmProvider>, LlmError> {
    let provider = std::env::var("AI_PROVIDER").unwrap_or_else(|_| "anthropic".to_string());

    match provider.to_lowercase().as_str() {
        "anthropic" | "claude" => {
            let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| LlmError::Config {
                message: "ANTHROPIC_API_KEY environment variable not set".to_string(),
            })?;
            Ok(Box::new(providers::anthropic::AnthropicProvider::new(
                api_key, model,
            )))
        }
        #[cfg(feature = "bedrock")]
        "bedrock" => {
            let region = std::env::var("AWS_REGION").ok();
            Ok(Box::new(
                providers::bedrock::BedrockProvider::new(model, region).await,
            ))
        }
        other => Err(LlmError::Config {
            message: format!("unknown AI provider: {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_model_id_falls_back_to_defaults() {
        assert_eq!(resolve_model_id(ModelTier::Fast), "claude-haiku-4-20250514");
        assert_eq!(
            resolve_model_id(ModelTier::Strong),
            "claude-sonnet-4-20250514"
        );
    }

    #[test]
    fn resolve_model_id_for_falls_back_to_tier_default_when_unset() {
        assert_eq!(
            resolve_model_id_for("CAPI_DEMO_NONEXISTENT_AGENT_OVERRIDE", ModelTier::Fast),
            resolve_model_id(ModelTier::Fast)
        );
    }
}
