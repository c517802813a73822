//! Infrastructure agent: BigQuery dataset/table provisioning and CAPI
//! agent creation.
//!
//! Table creation and NDJSON loading both fan out across tables
//! concurrently since there's no ordering dependency once the dataset
//! exists. A failure in either stage triggers a best-effort dataset
//! rollback. CAPI agent creation is a separate, later sub-step: its
//! failure is reported but does not roll back the dataset, since the
//! warehouse side is already usable on its own.

use capi_demo_llm::bigquery::BigQueryClient;
use capi_demo_llm::capi::CapiClient;
use capi_demo_models::{CapiAgentRef, LogLevel, ProvisionedDataset, Schema, SyntheticDataBatch, TableStats};
use futures::future::join_all;

use crate::{AgentError, ProgressReporter};

/// Default GCP region for provisioned datasets when none is configured.
const DEFAULT_LOCATION: &str = "US";

/// Returned when the stage fails after the dataset was already
/// provisioned, so the caller can still persist `dataset_id` on the
/// terminal job even though `agent_id` stays empty.
#[derive(Debug)]
pub struct PartialFailure {
    /// The dataset provisioned before the failure, if dataset creation,
    /// table creation, and data loading all succeeded.
    pub dataset: Option<ProvisionedDataset>,
    /// The underlying failure.
    pub source: AgentError,
}

/// Provisions a dataset for `slug`, creates one table per entry in
/// `schema`, loads each table's NDJSON batch, and creates a bound CAPI
/// agent.
///
/// # Errors
///
/// Returns a [`PartialFailure`] with `dataset: None` if dataset
/// creation, table creation, or data loading fails (the dataset is
/// rolled back first in the latter two cases). Returns a
/// [`PartialFailure`] with `dataset: Some(_)` if CAPI agent creation
/// fails after the dataset and its data were already provisioned — the
/// dataset is not rolled back in that case, since the warehouse side is
/// already usable on its own.
pub async fn run(
    bq: &BigQueryClient,
    capi: &CapiClient,
    reporter: &dyn ProgressReporter,
    schema: &Schema,
    batches: &[SyntheticDataBatch],
    slug: &str,
    company_name: &str,
) -> Result<(ProvisionedDataset, CapiAgentRef), PartialFailure> {
    let dataset_id = format!("{slug}_capi_demo_{}", chrono::Utc::now().format("%Y%m%d"));
    let location = DEFAULT_LOCATION.to_string();

    reporter
        .log(LogLevel::Info, &format!("creating dataset {dataset_id} in {location}"))
        .await;
    bq.create_dataset(&dataset_id, &location).await.map_err(|e| PartialFailure {
        dataset: None,
        source: AgentError::Infrastructure(format!("creating dataset: {e}")),
    })?;

    if let Err(e) = create_tables(bq, reporter, &dataset_id, schema).await {
        rollback(bq, reporter, &dataset_id).await;
        return Err(PartialFailure { dataset: None, source: e });
    }

    if let Err(e) = load_tables(bq, reporter, &dataset_id, batches).await {
        rollback(bq, reporter, &dataset_id).await;
        return Err(PartialFailure { dataset: None, source: e });
    }

    let mut table_stats = Vec::with_capacity(schema.tables.len());
    for table in &schema.tables {
        let stats = bq.get_stats(&dataset_id, &table.name).await.map_err(|e| PartialFailure {
            dataset: None,
            source: AgentError::Infrastructure(format!("fetching stats for {}: {e}", table.name)),
        })?;
        table_stats.push(stats);
    }

    let dataset = ProvisionedDataset {
        dataset_id: dataset_id.clone(),
        location,
        table_stats,
    };

    reporter
        .log(LogLevel::Info, &format!("creating CAPI agent for {dataset_id}"))
        .await;
    let display_name = format!("{company_name} Analytics Demo");
    let agent_id = match capi.create_agent(&dataset_id, &display_name).await {
        Ok(id) => id,
        Err(e) => {
            return Err(PartialFailure {
                dataset: Some(dataset),
                source: AgentError::Infrastructure(format!("creating CAPI agent: {e}")),
            });
        }
    };

    let agent = CapiAgentRef {
        agent_id,
        dataset_id,
    };

    Ok((dataset, agent))
}

async fn create_tables(
    bq: &BigQueryClient,
    reporter: &dyn ProgressReporter,
    dataset_id: &str,
    schema: &Schema,
) -> Result<(), AgentError> {
    let results = join_all(schema.tables.iter().map(|table| bq.create_table(dataset_id, table))).await;
    for (table, result) in schema.tables.iter().zip(results) {
        result.map_err(|e| AgentError::Infrastructure(format!("creating table {}: {e}", table.name)))?;
        reporter.log(LogLevel::Info, &format!("created table {}", table.name)).await;
    }
    Ok(())
}

async fn load_tables(
    bq: &BigQueryClient,
    reporter: &dyn ProgressReporter,
    dataset_id: &str,
    batches: &[SyntheticDataBatch],
) -> Result<(), AgentError> {
    let mut bodies = Vec::with_capacity(batches.len());
    for batch in batches {
        let body = tokio::fs::read_to_string(&batch.file_path)
            .await
            .map_err(|e| AgentError::Infrastructure(format!("reading {}: {e}", batch.file_path)))?;
        bodies.push(body);
    }

    let results = join_all(
        batches
            .iter()
            .zip(&bodies)
            .map(|(batch, body)| bq.load_ndjson(dataset_id, &batch.table_name, body)),
    )
    .await;

    for (batch, result) in batches.iter().zip(results) {
        result.map_err(|e| AgentError::Infrastructure(format!("loading {}: {e}", batch.table_name)))?;
        reporter
            .log(LogLevel::Info, &format!("loaded {} rows into {}", batch.row_count, batch.table_name))
            .await;
    }
    Ok(())
}

async fn rollback(bq: &BigQueryClient, reporter: &dyn ProgressReporter, dataset_id: &str) {
    reporter
        .log(LogLevel::Warn, &format!("rolling back dataset {dataset_id} after provisioning failure"))
        .await;
    if let Err(e) = bq.delete_dataset(dataset_id).await {
        reporter
            .log(LogLevel::Error, &format!("rollback of {dataset_id} failed: {e}"))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_all_preserves_order() {
        let results = join_all((0..5).map(|i| async move { i * 2 })).await;
        assert_eq!(results, vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn table_stats_placeholder_compiles() {
        let _stats = TableStats {
            table_name: "x".into(),
            rows_loaded: 0,
            storage_bytes: None,
        };
    }
}
