//! Research agent: crawls the customer site and synthesizes an identity
//! and domain-capability summary.

use capi_demo_llm::crawler::{CrawlLimits, Crawler};
use capi_demo_llm::providers::LlmProvider;
use capi_demo_models::{LogLevel, ResearchOutput};

use crate::{call_structured, AgentError, ProgressReporter};

const SYSTEM_PROMPT: &str = r#"You are a research analyst preparing a sales demo.
Given crawled pages from a company's website, identify the company name, its
industry/domain classification, its primary products or services, its target
audience, and its key product capabilities. Respond with JSON matching this
shape exactly, and nothing else:
{
  "company_name": string,
  "domain_classification": string,
  "products": string[],
  "audience": string[],
  "key_capabilities": string[]
}"#;

/// Crawls `customer_url` and produces a [`ResearchOutput`].
///
/// # Errors
///
/// Returns [`AgentError::Llm`] (crawl error wrapped via
/// [`capi_demo_llm::LlmError::Crawl`]) if the site is unreachable or
/// yields zero usable pages, or [`AgentError::MalformedOutput`] if the
/// model's summary isn't valid JSON.
pub async fn run(
    provider: &dyn LlmProvider,
    reporter: &dyn ProgressReporter,
    customer_url: &str,
    limits: CrawlLimits,
) -> Result<ResearchOutput, AgentError> {
    reporter
        .log(LogLevel::Info, &format!("crawling {customer_url}"))
        .await;

    let crawler = Crawler::new(limits)?;
    let pages = crawler.crawl(customer_url).await?;

    reporter
        .log(LogLevel::Info, &format!("crawled {} pages", pages.len()))
        .await;

    let mut corpus = String::new();
    for page in &pages {
        corpus.push_str(&format!(
            "--- {} ---\n{}\n\n",
            page.title.as_deref().unwrap_or(&page.url),
            truncate(&page.text, 4000)
        ));
    }

    let mut output: ResearchOutput = call_structured(provider, SYSTEM_PROMPT, &corpus).await?;
    output.source_pages = pages.into_iter().map(|p| p.url).collect();

    Ok(output)
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
