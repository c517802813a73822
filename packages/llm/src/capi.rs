//! A thin Conversational Analytics API (CAPI) REST client.
//!
//! Same grounding as [`crate::bigquery::BigQueryClient`]: no CAPI SDK
//! appears in the retrieval pack, so this is a reqwest client in the
//! style of [`crate::providers::anthropic::AnthropicProvider`].

use serde::Deserialize;
use serde_json::json;

use crate::retry::with_retry;
use crate::LlmError;

/// CAPI REST client bound to one dataset's analytics agent.
pub struct CapiClient {
    base_url: String,
    client: reqwest::Client,
    access_token: String,
}

impl CapiClient {
    /// Creates a client, reading the API base URL from
    /// `CAPI_API_BASE_URL` (default `https://geminidataanalytics.googleapis.com/v1beta`)
    /// and the bearer token from `CAPI_ACCESS_TOKEN`. Token minting is
    /// out of scope; an external process keeps it current.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Config`] if `CAPI_ACCESS_TOKEN` is not set.
    pub fn from_env() -> Result<Self, LlmError> {
        let access_token = std::env::var("CAPI_ACCESS_TOKEN").map_err(|_| LlmError::Config {
            message: "CAPI_ACCESS_TOKEN environment variable not set".to_string(),
        })?;
        let base_url = std::env::var("CAPI_API_BASE_URL")
            .unwrap_or_else(|_| "https://geminidataanalytics.googleapis.com/v1beta".to_string());

        Ok(Self {
            base_url,
            client: reqwest::Client::new(),
            access_token,
        })
    }

    /// Creates an agent bound to `dataset_id`, returning its opaque id.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Infrastructure`] if the create fails after retries.
    pub async fn create_agent(&self, dataset_id: &str, display_name: &str) -> Result<String, LlmError> {
        #[derive(Deserialize)]
        struct CreateAgentResponse {
            name: String,
        }

        let body = json!({
            "displayName": display_name,
            "datasetReferences": [{ "datasetId": dataset_id }],
        });

        let response: CreateAgentResponse =
            with_retry(|| self.post("/agents", &body), is_transient).await?;

        Ok(response.name)
    }

    /// Publishes the YAML system-instruction document as the agent's
    /// published context.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Infrastructure`] if the update fails after retries.
    pub async fn set_instructions(&self, agent_id: &str, yaml: &str) -> Result<(), LlmError> {
        let body = json!({ "publishedContext": { "systemInstructionYaml": yaml } });

        with_retry(
            || self.patch(&format!("/agents/{agent_id}"), &body),
            is_transient,
        )
        .await?;
        Ok(())
    }

    /// Asks a natural-language question against the agent, used by the
    /// disabled-by-default validation stage.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Infrastructure`] if the call fails after retries.
    pub async fn ask(&self, agent_id: &str, question: &str) -> Result<String, LlmError> {
        #[derive(Deserialize)]
        struct AskResponse {
            answer: String,
        }

        let body = json!({ "question": question });
        let response: AskResponse = with_retry(
            || self.post(&format!("/agents/{agent_id}:chat"), &body),
            is_transient,
        )
        .await?;
        Ok(response.answer)
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, LlmError> {
        let resp = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;
        parse_response(resp).await
    }

    async fn patch<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, LlmError> {
        let resp = self
            .client
            .patch(format!("{}{path}", self.base_url))
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;
        parse_response(resp).await
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, LlmError> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(LlmError::Infrastructure(format!(
            "CAPI error (HTTP {status}): {body}"
        )));
    }

    serde_json::from_str(&body).map_err(LlmError::from)
}

fn is_transient(err: &LlmError) -> bool {
    match err {
        LlmError::Http(e) => e.is_timeout() || e.is_connect(),
        LlmError::Infrastructure(msg) => {
            msg.contains("HTTP 429") || msg.contains("HTTP 500") || msg.contains("HTTP 503")
        }
        _ => false,
    }
}
