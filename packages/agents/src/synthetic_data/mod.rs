//! Synthetic-data agent: per-table NDJSON row generation with referential
//! integrity.
//!
//! Tables are generated strictly in [`Schema::topological_order`] so a
//! child table's foreign-key prompt can name the actual primary-key
//! values its parent rows were given — there is no post-hoc repair
//! pass. Within a table, row generation is batched into bounded-size LLM
//! calls issued concurrently (see [`MAX_CONCURRENT_BATCHES`]); across
//! tables, generation stays sequential because of the FK ordering
//! requirement.

pub mod forbidden;

use std::path::{Path, PathBuf};

use capi_demo_llm::providers::LlmProvider;
use capi_demo_models::{Field, LogLevel, Schema, SyntheticDataBatch, Table};
use futures::future::join_all;
use tokio::io::AsyncWriteExt;

use crate::{call_structured, AgentError, ProgressReporter};

/// Identity of this generator, used purely as a human-readable label in
/// logs; the safeguard check lives in the orchestrator crate and
/// compares against [`forbidden::FORBIDDEN_MARKER`], not this constant.
pub const GENERATOR_MARKER: &str = "llm_synthetic_data_generator";

/// Maximum rows requested per LLM call. Keeps prompts and responses
/// small enough to stay well under typical context/response limits
/// while still making visible progress per batch.
const ROWS_PER_BATCH: u32 = 50;

/// How many batches (for a single table) run concurrently.
const MAX_CONCURRENT_BATCHES: usize = 4;

const SYSTEM_PROMPT: &str = r#"You generate synthetic demo data for a single
BigQuery table. You will be given the table's schema (field names, types,
modes, descriptions) and, for any foreign-key field, the actual primary-key
values of already-generated parent rows to choose from. Generate realistic,
varied rows consistent with the company domain described. Every required
field must be present and non-null; every foreign-key field must use one of
the provided parent key values. Respond with a JSON array of row objects,
and nothing else: [ { "field_name": value, ... }, ... ]"#;

/// Generates and writes one NDJSON file per table in `schema`, in
/// dependency order, into `out_dir`.
///
/// # Errors
///
/// Returns [`AgentError::DataGeneration`] if a generated row is missing
/// a required field or a foreign key doesn't resolve to a known parent
/// key, [`AgentError::Infrastructure`] on file I/O failure, or
/// [`AgentError::Llm`]/[`AgentError::MalformedOutput`] on model failure.
/// Per-table generation is retried once on any of these before the
/// stage fails.
pub async fn run(
    provider: &dyn LlmProvider,
    reporter: &dyn ProgressReporter,
    schema: &Schema,
    domain_summary: &str,
    out_dir: &Path,
) -> Result<Vec<SyntheticDataBatch>, AgentError> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|e| AgentError::Infrastructure(format!("creating {}: {e}", out_dir.display())))?;

    let mut batches = Vec::with_capacity(schema.tables.len());
    let mut parent_keys: std::collections::HashMap<String, Vec<serde_json::Value>> =
        std::collections::HashMap::new();

    for table in schema.topological_order() {
        reporter
            .log(LogLevel::Info, &format!("generating synthetic data for {}", table.name))
            .await;

        let rows = match generate_table_rows(provider, table, domain_summary, &parent_keys).await {
            Ok(rows) => rows,
            Err(first_err) => {
                reporter
                    .log(
                        LogLevel::Warn,
                        &format!("generation for {} failed ({first_err}), retrying once", table.name),
                    )
                    .await;
                generate_table_rows(provider, table, domain_summary, &parent_keys).await?
            }
        };
        let batch = write_ndjson(out_dir, table, &rows).await?;

        if let Some(pk) = table.primary_key_field() {
            let keys = rows
                .iter()
                .filter_map(|row| row.get(pk).cloned())
                .collect();
            parent_keys.insert(table.name.clone(), keys);
        }

        reporter
            .log(
                LogLevel::Info,
                &format!("wrote {} rows for {}", batch.row_count, table.name),
            )
            .await;
        batches.push(batch);
    }

    Ok(batches)
}

async fn generate_table_rows(
    provider: &dyn LlmProvider,
    table: &Table,
    domain_summary: &str,
    parent_keys: &std::collections::HashMap<String, Vec<serde_json::Value>>,
) -> Result<Vec<serde_json::Value>, AgentError> {
    let target = table.row_count_hint.max(1);
    let batch_count = target.div_ceil(ROWS_PER_BATCH);
    let prompt = build_prompt(table, domain_summary, parent_keys);

    let mut rows = Vec::with_capacity(target as usize);
    let mut batch_sizes = Vec::with_capacity(batch_count as usize);
    let mut remaining = target;
    for _ in 0..batch_count {
        let size = remaining.min(ROWS_PER_BATCH);
        batch_sizes.push(size);
        remaining -= size;
    }

    for chunk in batch_sizes.chunks(MAX_CONCURRENT_BATCHES) {
        let prompts: Vec<String> = chunk
            .iter()
            .map(|&size| format!("{prompt}\n\nGenerate exactly {size} rows."))
            .collect();
        let futs = prompts
            .iter()
            .map(|p| call_structured::<Vec<serde_json::Value>>(provider, SYSTEM_PROMPT, p));
        for result in join_all(futs).await {
            rows.extend(result?);
        }
    }

    validate_rows(table, &rows, parent_keys)?;
    Ok(rows)
}

fn validate_rows(
    table: &Table,
    rows: &[serde_json::Value],
    parent_keys: &std::collections::HashMap<String, Vec<serde_json::Value>>,
) -> Result<(), AgentError> {
    for row in rows {
        let Some(obj) = row.as_object() else {
            return Err(AgentError::DataGeneration(format!(
                "{}: row is not a JSON object",
                table.name
            )));
        };
        for field in &table.fields {
            check_field(table, field, obj, parent_keys)?;
        }
    }
    Ok(())
}

fn check_field(
    table: &Table,
    field: &Field,
    obj: &serde_json::Map<String, serde_json::Value>,
    parent_keys: &std::collections::HashMap<String, Vec<serde_json::Value>>,
) -> Result<(), AgentError> {
    let value = obj.get(&field.name);
    let is_required = matches!(field.mode, capi_demo_models::FieldMode::Required);
    let is_missing = value.is_none_or(serde_json::Value::is_null);

    if is_required && is_missing {
        return Err(AgentError::DataGeneration(format!(
            "{}.{} is required but missing",
            table.name, field.name
        )));
    }

    if let (Some(fk), Some(value)) = (&field.references, value) {
        if !value.is_null() {
            let known = parent_keys.get(&fk.table);
            let resolves = known.is_some_and(|keys| keys.contains(value));
            if !resolves {
                return Err(AgentError::DataGeneration(format!(
                    "{}.{} references an unknown {}.{} value",
                    table.name, field.name, fk.table, fk.field
                )));
            }
        }
    }

    Ok(())
}

fn build_prompt(
    table: &Table,
    domain_summary: &str,
    parent_keys: &std::collections::HashMap<String, Vec<serde_json::Value>>,
) -> String {
    let schema_json = serde_json::to_string_pretty(table).unwrap_or_default();
    let mut fk_context = serde_json::Map::new();
    for field in &table.fields {
        if let Some(fk) = &field.references {
            if let Some(keys) = parent_keys.get(&fk.table) {
                fk_context.insert(field.name.clone(), serde_json::Value::Array(keys.clone()));
            }
        }
    }

    format!(
        "Company/domain context:\n{domain_summary}\n\nTable schema:\n{schema_json}\n\n\
         Available parent key values by field:\n{}",
        serde_json::Value::Object(fk_context)
    )
}

async fn write_ndjson(
    out_dir: &Path,
    table: &Table,
    rows: &[serde_json::Value],
) -> Result<SyntheticDataBatch, AgentError> {
    let path: PathBuf = out_dir.join(format!("{}.ndjson", table.name));
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| AgentError::Infrastructure(format!("creating {}: {e}", path.display())))?;

    for row in rows {
        let mut line = serde_json::to_string(row)
            .map_err(|e| AgentError::Infrastructure(format!("serializing row: {e}")))?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AgentError::Infrastructure(format!("writing {}: {e}", path.display())))?;
    }

    Ok(SyntheticDataBatch {
        table_name: table.name.clone(),
        file_path: path.display().to_string(),
        row_count: rows.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use capi_demo_models::{FieldMode, FieldType, ForeignKeyRef};

    use super::*;

    fn customers_table() -> Table {
        Table {
            name: "customers".into(),
            description: String::new(),
            fields: vec![Field {
                name: "id".into(),
                field_type: FieldType::Integer,
                mode: FieldMode::Required,
                description: String::new(),
                references: None,
            }],
            row_count_hint: 10,
        }
    }

    fn orders_table() -> Table {
        Table {
            name: "orders".into(),
            description: String::new(),
            fields: vec![
                Field {
                    name: "id".into(),
                    field_type: FieldType::Integer,
                    mode: FieldMode::Required,
                    description: String::new(),
                    references: None,
                },
                Field {
                    name: "customer_id".into(),
                    field_type: FieldType::Integer,
                    mode: FieldMode::Required,
                    description: String::new(),
                    references: Some(ForeignKeyRef {
                        table: "customers".into(),
                        field: "id".into(),
                    }),
                },
            ],
            row_count_hint: 10,
        }
    }

    #[test]
    fn check_field_rejects_missing_required_field() {
        let table = customers_table();
        let obj = serde_json::Map::new();
        let parents = std::collections::HashMap::new();
        let err = check_field(&table, &table.fields[0], &obj, &parents).unwrap_err();
        assert!(matches!(err, AgentError::DataGeneration(_)));
    }

    #[test]
    fn check_field_rejects_unresolved_foreign_key() {
        let table = orders_table();
        let mut obj = serde_json::Map::new();
        obj.insert("id".into(), serde_json::json!(1));
        obj.insert("customer_id".into(), serde_json::json!(999));
        let mut parents = std::collections::HashMap::new();
        parents.insert("customers".to_string(), vec![serde_json::json!(1), serde_json::json!(2)]);
        let err = check_field(&table, &table.fields[1], &obj, &parents).unwrap_err();
        assert!(matches!(err, AgentError::DataGeneration(_)));
    }

    #[test]
    fn check_field_accepts_resolved_foreign_key() {
        let table = orders_table();
        let mut obj = serde_json::Map::new();
        obj.insert("id".into(), serde_json::json!(1));
        obj.insert("customer_id".into(), serde_json::json!(2));
        let mut parents = std::collections::HashMap::new();
        parents.insert("customers".to_string(), vec![serde_json::json!(1), serde_json::json!(2)]);
        assert!(check_field(&table, &table.fields[1], &obj, &parents).is_ok());
    }
}
