//! The forbidden synthetic-data generator.
//!
//! This module exists only so the orchestrator's safeguard has a
//! concrete, isolated marker to compare against and reject. It is never
//! wired into [`crate::synthetic_data::run`] and nothing in this crate
//! calls [`generate_keyword_fallback_rows`] — it is kept for the
//! safeguard test and as historical context for why the check exists.

use capi_demo_models::Table;

/// Identity of the keyword-filter/Faker-style fallback generator that
/// must never be bound as the active synthetic-data agent. Construction
/// of the orchestrator fails immediately if this marker is ever passed
/// as the active generator (`capi_demo_orchestrator::safeguard`).
pub const FORBIDDEN_MARKER: &str = "OptimizedKeywordFallbackGenerator";

/// Row generation with no LLM call at all: deterministic placeholder
/// values keyed off the field name. This is the behavior the safeguard
/// exists to keep out of production — it produces data fast but with no
/// grounding in the company's actual domain, which defeats the purpose
/// of a sales demo.
#[must_use]
pub fn generate_keyword_fallback_rows(table: &Table, count: u32) -> Vec<serde_json::Value> {
    (0..count)
        .map(|i| {
            let mut row = serde_json::Map::new();
            for field in &table.fields {
                row.insert(field.name.clone(), serde_json::Value::String(format!("{}_{i}", field.name)));
            }
            serde_json::Value::Object(row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_contains_optimized_for_safeguard_matching() {
        assert!(FORBIDDEN_MARKER.contains("Optimized"));
    }
}
