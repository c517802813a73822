//! CAPI-instructions agent: synthesizes the published-context YAML
//! document for the analytics agent.
//!
//! The document's structural sections (`tables`, `golden_queries`) are
//! built deterministically from the [`Schema`] and [`DemoStory`] so the
//! invariant "every table and every golden query appears" holds by
//! construction rather than by hoping the model reproduces them
//! faithfully. Only the free-text sections (`system_instruction`,
//! `relationships`, `glossaries`, `additional_descriptions`) are
//! generated by the model.

use capi_demo_llm::providers::LlmProvider;
use capi_demo_models::{DemoStory, LogLevel, ResearchOutput, Schema};
use serde::Deserialize;

use crate::{call_structured, AgentError, ProgressReporter};

const SYSTEM_PROMPT: &str = r#"You are writing the published-context document
for a Conversational Analytics API agent. Given a company research summary,
a demo story, and a BigQuery schema, write a clear system instruction
describing the agent's purpose and tone, a short prose description of the
relationships between tables, a glossary of 5-15 domain terms a customer
engineer might not know, and any additional table/column descriptions worth
calling out beyond what's already in the schema. Respond with JSON matching
this shape exactly, and nothing else:
{
  "system_instruction": string,
  "relationships": string,
  "glossaries": [ { "term": string, "definition": string } ],
  "additional_descriptions": [ { "table": string, "note": string } ]
}"#;

#[derive(Debug, Deserialize)]
struct NarrativeSections {
    system_instruction: String,
    relationships: String,
    glossaries: Vec<GlossaryEntry>,
    additional_descriptions: Vec<AdditionalDescription>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct GlossaryEntry {
    term: String,
    definition: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct AdditionalDescription {
    table: String,
    note: String,
}

/// Builds the full published-context YAML document.
///
/// # Errors
///
/// Returns [`AgentError::Llm`] if the request fails,
/// [`AgentError::MalformedOutput`] if the response isn't valid JSON, or
/// [`AgentError::Infrastructure`] if the assembled document fails to
/// serialize as YAML.
pub async fn run(
    provider: &dyn LlmProvider,
    reporter: &dyn ProgressReporter,
    research: &ResearchOutput,
    story: &DemoStory,
    schema: &Schema,
) -> Result<String, AgentError> {
    reporter
        .log(LogLevel::Info, "synthesizing CAPI published-context document")
        .await;

    let prompt = serde_json::to_string_pretty(&serde_json::json!({
        "research": research,
        "demo_story": story,
        "schema": schema,
    }))
    .map_err(|e| AgentError::MalformedOutput(e.to_string()))?;

    let sections: NarrativeSections = call_structured(provider, SYSTEM_PROMPT, &prompt).await?;

    let document = build_document(schema, story, &sections);
    let yaml = serde_yaml::to_string(&document)
        .map_err(|e| AgentError::Infrastructure(format!("serializing published context: {e}")))?;

    reporter
        .log(
            LogLevel::Info,
            &format!(
                "published context covers {} tables and {} golden queries",
                schema.tables.len(),
                story.golden_queries.len()
            ),
        )
        .await;

    Ok(yaml)
}

#[derive(serde::Serialize)]
struct PublishedContext {
    system_instruction: String,
    tables: Vec<TableEntry>,
    relationships: String,
    golden_queries: Vec<GoldenQueryEntry>,
    glossaries: Vec<GlossaryEntry>,
    additional_descriptions: Vec<AdditionalDescription>,
}

#[derive(serde::Serialize)]
struct TableEntry {
    name: String,
    description: String,
    fields: Vec<String>,
}

#[derive(serde::Serialize)]
struct GoldenQueryEntry {
    question: String,
    expected_sql: String,
    tables_used: Vec<String>,
}

fn build_document(
    schema: &Schema,
    story: &DemoStory,
    sections: &NarrativeSections,
) -> PublishedContext {
    PublishedContext {
        system_instruction: sections.system_instruction.clone(),
        tables: schema
            .tables
            .iter()
            .map(|t| TableEntry {
                name: t.name.clone(),
                description: t.description.clone(),
                fields: t.fields.iter().map(|f| f.name.clone()).collect(),
            })
            .collect(),
        relationships: sections.relationships.clone(),
        golden_queries: story
            .golden_queries
            .iter()
            .map(|q| GoldenQueryEntry {
                question: q.question.clone(),
                expected_sql: q.expected_sql.clone(),
                tables_used: q.tables_used.clone(),
            })
            .collect(),
        glossaries: sections.glossaries.clone(),
        additional_descriptions: sections.additional_descriptions.clone(),
    }
}

#[cfg(test)]
mod tests {
    use capi_demo_models::{Field, FieldMode, FieldType, Table};

    use super::*;

    #[test]
    fn build_document_covers_every_table_and_golden_query() {
        let schema = Schema {
            tables: vec![Table {
                name: "orders".into(),
                description: String::new(),
                fields: vec![Field {
                    name: "id".into(),
                    field_type: FieldType::Integer,
                    mode: FieldMode::Required,
                    description: String::new(),
                    references: None,
                }],
                row_count_hint: 100,
            }],
        };
        let story = DemoStory {
            title: "t".into(),
            executive_summary: String::new(),
            business_challenges: vec![],
            talking_track: String::new(),
            golden_queries: vec![capi_demo_models::GoldenQuery {
                question: "how many orders?".into(),
                expected_sql: "SELECT COUNT(*) FROM orders".into(),
                complexity: capi_demo_models::Complexity::Simple,
                business_value: String::new(),
                tables_used: vec!["orders".into()],
            }],
        };
        let sections = NarrativeSections {
            system_instruction: "be helpful".into(),
            relationships: String::new(),
            glossaries: vec![],
            additional_descriptions: vec![],
        };

        let doc = build_document(&schema, &story, &sections);
        assert_eq!(doc.tables.len(), 1);
        assert_eq!(doc.tables[0].name, "orders");
        assert_eq!(doc.golden_queries.len(), 1);
        assert_eq!(doc.golden_queries[0].question, "how many orders?");
    }
}
