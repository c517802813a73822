//! Demo-story agent: narrative design and golden-query generation.

use capi_demo_llm::providers::LlmProvider;
use capi_demo_models::{DemoStory, LogLevel, ResearchOutput};

use crate::{call_structured, AgentError, ProgressReporter};

const SYSTEM_PROMPT: &str = r#"You are a pre-sales solutions consultant writing a
conversational-analytics demo script for a prospective customer. Given a
research summary of the company and a requested golden-query count and
complexity mix, write a demo story: a title, an executive summary, a list of
business challenges the demo addresses, a talking track for the presenter,
and golden queries a customer engineer would ask an AI analytics agent. Each
golden query needs a natural-language question, a best-effort expected SQL
statement, a complexity rating in {simple, medium, complex, expert}, a
business-value sentence, and the list of table names (your best guess at a
reasonable schema) it would touch. Match the requested total count and the
requested per-complexity counts within plus-or-minus one query per bucket.
Respond with JSON matching this shape exactly, and nothing else:
{
  "title": string,
  "executive_summary": string,
  "business_challenges": string[],
  "talking_track": string,
  "golden_queries": [
    {
      "question": string,
      "expected_sql": string,
      "complexity": "simple" | "medium" | "complex" | "expert",
      "business_value": string,
      "tables_used": string[]
    }
  ]
}"#;

/// The four golden-query complexity buckets, in the order reported by
/// [`DemoStoryConfig::complexity_mix`].
const COMPLEXITY_BUCKETS: [&str; 4] = ["simple", "medium", "complex", "expert"];

/// Target golden-query count and complexity-bucket mix for the
/// demo-story agent, resolved by the caller from job/environment
/// configuration (`demo_num_queries`).
#[derive(Debug, Clone, Copy)]
pub struct DemoStoryConfig {
    /// Total number of golden queries requested.
    pub num_golden_queries: u32,
    /// Target count per bucket, in `[simple, medium, complex, expert]` order.
    pub complexity_mix: [u32; 4],
}

impl DemoStoryConfig {
    /// Builds a config for `num_golden_queries`, spreading them evenly
    /// across the four complexity buckets (any remainder goes to the
    /// earlier buckets).
    #[must_use]
    pub fn even_mix(num_golden_queries: u32) -> Self {
        let num_golden_queries = num_golden_queries.max(1);
        let base = num_golden_queries / 4;
        let rem = num_golden_queries % 4;
        let mut complexity_mix = [base; 4];
        for slot in complexity_mix.iter_mut().take(rem as usize) {
            *slot += 1;
        }
        Self {
            num_golden_queries,
            complexity_mix,
        }
    }
}

impl Default for DemoStoryConfig {
    fn default() -> Self {
        Self::even_mix(8)
    }
}

/// Produces a [`DemoStory`] from a [`ResearchOutput`], targeting
/// `config`'s golden-query count and complexity mix.
///
/// # Errors
///
/// Returns [`AgentError::Llm`] if the request fails, or
/// [`AgentError::MalformedOutput`] if the response still isn't valid
/// JSON after one retry with a stricter schema reminder.
pub async fn run(
    provider: &dyn LlmProvider,
    reporter: &dyn ProgressReporter,
    research: &ResearchOutput,
    config: &DemoStoryConfig,
) -> Result<DemoStory, AgentError> {
    reporter
        .log(LogLevel::Info, "designing demo narrative and golden queries")
        .await;

    let prompt = build_prompt(research, config)?;

    let story = match call_structured::<DemoStory>(provider, SYSTEM_PROMPT, &prompt).await {
        Ok(story) => story,
        Err(first_err) => {
            reporter
                .log(
                    LogLevel::Warn,
                    &format!("demo story output was malformed ({first_err}), retrying once"),
                )
                .await;
            let stricter_prompt = format!(
                "{prompt}\n\nYour previous response did not match the required JSON shape \
                 exactly. Respond with ONLY the JSON object described above, no prose, no \
                 markdown fence."
            );
            call_structured(provider, SYSTEM_PROMPT, &stricter_prompt).await?
        }
    };

    reporter
        .log(
            LogLevel::Info,
            &format!("generated {} golden queries", story.golden_queries.len()),
        )
        .await;

    Ok(story)
}

fn build_prompt(research: &ResearchOutput, config: &DemoStoryConfig) -> Result<String, AgentError> {
    let mix: serde_json::Map<String, serde_json::Value> = COMPLEXITY_BUCKETS
        .iter()
        .zip(config.complexity_mix)
        .map(|(&bucket, count)| (bucket.to_string(), serde_json::json!(count)))
        .collect();

    let payload = serde_json::json!({
        "research": research,
        "requested_num_golden_queries": config.num_golden_queries,
        "requested_complexity_mix": mix,
    });
    serde_json::to_string_pretty(&payload).map_err(|e| AgentError::MalformedOutput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_mix_distributes_remainder_to_earlier_buckets() {
        let config = DemoStoryConfig::even_mix(10);
        assert_eq!(config.num_golden_queries, 10);
        assert_eq!(config.complexity_mix, [3, 3, 2, 2]);
        assert_eq!(config.complexity_mix.iter().sum::<u32>(), 10);
    }

    #[test]
    fn even_mix_floors_to_one_query() {
        let config = DemoStoryConfig::even_mix(0);
        assert_eq!(config.num_golden_queries, 1);
    }
}
