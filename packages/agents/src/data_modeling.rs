//! Data-modeling agent: schema design.
//!
//! One call to the strong model, with a prompt that explicitly forbids
//! repeated/array field modes — the downstream BigQuery load path uses
//! NDJSON and cannot safely round-trip array-typed fields. The response
//! is validated and, on violation, retried once before failing.

use capi_demo_llm::providers::LlmProvider;
use capi_demo_models::{DemoStory, LogLevel, ResearchOutput, Schema, SchemaError};

use crate::{call_structured, AgentError, ProgressReporter};

const SYSTEM_PROMPT: &str = r#"You are a data architect designing a BigQuery
schema for a conversational-analytics demo. Given a research summary and a
demo story with golden queries, design a normalized schema of 5-20 tables
that makes every golden query answerable. Every foreign-key field must name
the parent table and field it references. Field types are restricted to
STRING, INTEGER, FLOAT, NUMERIC, BOOLEAN, DATE, TIMESTAMP. Field modes are
restricted to "nullable" and "required" — repeated/array fields are strictly
forbidden and will be rejected. Respond with JSON matching this shape
exactly, and nothing else:
{
  "tables": [
    {
      "name": string,
      "description": string,
      "row_count_hint": integer,
      "fields": [
        {
          "name": string,
          "field_type": "STRING" | "INTEGER" | "FLOAT" | "NUMERIC" | "BOOLEAN" | "DATE" | "TIMESTAMP",
          "mode": "nullable" | "required",
          "description": string,
          "references": { "table": string, "field": string } | null
        }
      ]
    }
  ]
}"#;

/// Designs a [`Schema`] satisfying every golden query in `story`.
///
/// # Errors
///
/// Returns [`AgentError::Schema`] if the model's schema still violates
/// an invariant after one retry, [`AgentError::Llm`] on request
/// failure, or [`AgentError::MalformedOutput`] on invalid JSON.
pub async fn run(
    provider: &dyn LlmProvider,
    reporter: &dyn ProgressReporter,
    research: &ResearchOutput,
    story: &DemoStory,
) -> Result<Schema, AgentError> {
    let prompt = build_prompt(research, story)?;

    reporter.log(LogLevel::Info, "designing schema").await;
    match attempt(provider, &prompt).await {
        Ok(schema) => {
            reporter
                .log(LogLevel::Info, &format!("schema has {} tables", schema.tables.len()))
                .await;
            Ok(schema)
        }
        Err(first_err) => {
            reporter
                .log(
                    LogLevel::Warn,
                    &format!("schema violated an invariant ({first_err}), retrying once"),
                )
                .await;
            let schema = attempt(provider, &prompt).await?;
            reporter
                .log(LogLevel::Info, &format!("schema has {} tables", schema.tables.len()))
                .await;
            Ok(schema)
        }
    }
}

async fn attempt(provider: &dyn LlmProvider, prompt: &str) -> Result<Schema, AgentError> {
    let schema: Schema = call_structured(provider, SYSTEM_PROMPT, prompt).await?;
    validate(&schema)?;
    Ok(schema)
}

fn validate(schema: &Schema) -> Result<(), SchemaError> {
    schema.validate()
}

fn build_prompt(research: &ResearchOutput, story: &DemoStory) -> Result<String, AgentError> {
    let payload = serde_json::json!({ "research": research, "demo_story": story });
    serde_json::to_string_pretty(&payload).map_err(|e| AgentError::MalformedOutput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_delegates_to_schema_validate() {
        let schema = Schema::default();
        assert_eq!(validate(&schema), Ok(()));
    }
}
