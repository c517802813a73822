//! Validation agent: runs every golden query through the live CAPI
//! agent and records whether it produced a usable answer.
//!
//! Disabled by default — the orchestrator only invokes [`run`] when the
//! job was started with validation explicitly requested. A failure here
//! is never fatal to the job: each query's outcome is recorded
//! independently, and the stage as a whole reports its own success
//! rate rather than failing the pipeline.

use capi_demo_llm::capi::CapiClient;
use capi_demo_models::{CapiAgentRef, GoldenQuery, GoldenQueryResult, LogLevel, ValidationResult};

use crate::ProgressReporter;

/// Runs every query in `queries` against `agent` and returns the
/// aggregate result. Individual query failures are captured in
/// [`GoldenQueryResult::detail`] rather than short-circuiting the loop.
pub async fn run(
    capi: &CapiClient,
    reporter: &dyn ProgressReporter,
    agent: &CapiAgentRef,
    queries: &[GoldenQuery],
) -> ValidationResult {
    reporter
        .log(LogLevel::Info, &format!("validating {} golden queries", queries.len()))
        .await;

    let mut results = Vec::with_capacity(queries.len());
    for query in queries {
        let result = match capi.ask(&agent.agent_id, &query.question).await {
            Ok(answer) => {
                reporter
                    .log(LogLevel::Info, &format!("\"{}\" -> {answer}", query.question))
                    .await;
                GoldenQueryResult {
                    question: query.question.clone(),
                    succeeded: true,
                    detail: None,
                }
            }
            Err(e) => {
                reporter
                    .log(LogLevel::Warn, &format!("\"{}\" failed: {e}", query.question))
                    .await;
                GoldenQueryResult {
                    question: query.question.clone(),
                    succeeded: false,
                    detail: Some(e.to_string()),
                }
            }
        };
        results.push(result);
    }

    let success_rate = success_rate(&results);
    reporter
        .log(LogLevel::Info, &format!("validation success rate: {:.0}%", success_rate * 100.0))
        .await;

    ValidationResult {
        results,
        success_rate,
    }
}

fn success_rate(results: &[GoldenQueryResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let succeeded = results.iter().filter(|r| r.succeeded).count() as f64;
    #[allow(clippy::cast_precision_loss)]
    let total = results.len() as f64;
    succeeded / total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_is_zero_for_empty_results() {
        assert_eq!(success_rate(&[]), 0.0);
    }

    #[test]
    fn success_rate_computes_fraction_succeeded() {
        let results = vec![
            GoldenQueryResult {
                question: "a".into(),
                succeeded: true,
                detail: None,
            },
            GoldenQueryResult {
                question: "b".into(),
                succeeded: false,
                detail: Some("boom".into()),
            },
        ];
        assert!((success_rate(&results) - 0.5).abs() < f64::EPSILON);
    }
}
