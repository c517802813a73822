//! Transient pipeline state and the artifact types agents produce
//! 

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Company identity, domain classification, and capabilities extracted
/// from a crawl + LLM synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutput {
    /// The customer's company name.
    pub company_name: String,
    /// A short industry/domain classification (e.g. "e-commerce platform").
    pub domain_classification: String,
    /// Primary products or services offered.
    pub products: Vec<String>,
    /// The company's target audience/customer segments.
    pub audience: Vec<String>,
    /// Key capabilities surfaced by the crawl.
    pub key_capabilities: Vec<String>,
    /// URLs of pages that contributed to this summary.
    pub source_pages: Vec<String>,
}

/// Complexity tag for a golden query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    /// Single-table aggregate.
    Simple,
    /// A join or a filtered aggregate.
    Medium,
    /// Multiple joins, window functions, or subqueries.
    Complex,
    /// Multi-step reasoning across several tables.
    Expert,
}

/// A curated natural-language question paired with an expected SQL and a
/// business rationale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenQuery {
    /// The natural-language question a pre-sales CE would ask.
    pub question: String,
    /// Best-effort expected SQL; CAPI may refine this at runtime.
    pub expected_sql: String,
    /// Complexity bucket.
    pub complexity: Complexity,
    /// Why this query matters to a prospective customer.
    pub business_value: String,
    /// Tables this query touches, as named by the data-modeling prompt.
    pub tables_used: Vec<String>,
}

/// The generated narrative for the demo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoStory {
    /// Demo title.
    pub title: String,
    /// One-paragraph executive summary.
    pub executive_summary: String,
    /// Business challenges the demo addresses.
    pub business_challenges: Vec<String>,
    /// A narrative talking track for presenters.
    pub talking_track: String,
    /// Ordered golden queries.
    pub golden_queries: Vec<GoldenQuery>,
}

/// A restricted set of BigQuery-compatible scalar field types.
///
/// Deliberately excludes any repeated/array representation — see
/// [`FieldMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    /// UTF-8 text.
    String,
    /// 64-bit signed integer.
    Integer,
    /// Double-precision float.
    Float,
    /// Fixed-point decimal.
    Numeric,
    /// Boolean.
    Boolean,
    /// Calendar date.
    Date,
    /// Timestamp with timezone.
    Timestamp,
}

/// Nullability of a [`Field`]. There is intentionally no `Repeated`
/// variant: array-typed fields are forbidden by contract because the
/// NDJSON load path cannot round-trip them safely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldMode {
    /// May be `NULL`.
    Nullable,
    /// Must always be present.
    Required,
}

/// One column of a [`Table`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    /// Column name.
    pub name: String,
    /// Scalar type.
    pub field_type: FieldType,
    /// Nullability.
    pub mode: FieldMode,
    /// Human-readable description, also used as a generation hint.
    pub description: String,
    /// If set, this field is a foreign key referencing
    /// `{table}.{field}` elsewhere in the same schema.
    pub references: Option<ForeignKeyRef>,
}

/// A foreign-key reference from one field to a parent table's field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    /// The parent table name.
    pub table: String,
    /// The parent field name (usually a primary key).
    pub field: String,
}

/// One table in a generated [`Schema`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Table name, must be unique within the schema.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Ordered columns.
    pub fields: Vec<Field>,
    /// Order-of-magnitude hint for synthetic row count (e.g. `500`,
    /// `5000`); the synthetic-data agent treats this as a default,
    /// scaling larger for fact-like tables named in the description.
    pub row_count_hint: u32,
}

impl Table {
    /// Returns the name of this table's primary key field, if one is
    /// named `id` or `{table}_id`.
    #[must_use]
    pub fn primary_key_field(&self) -> Option<&str> {
        let expected = format!("{}_id", self.name.trim_end_matches('s'));
        self.fields
            .iter()
            .find(|f| f.name == "id" || f.name == expected)
            .map(|f| f.name.as_str())
    }
}

/// An ordered set of tables proposed by the data-modeling agent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Schema {
    /// Tables, in the order they should be created/loaded.
    pub tables: Vec<Table>,
}

/// Errors raised by [`Schema::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Two tables share a name.
    #[error("duplicate table name: {0}")]
    DuplicateTable(String),
    /// A foreign key referenced a table or field that does not exist.
    #[error("unresolved foreign key {table}.{field} -> {ref_table}.{ref_field}")]
    UnresolvedForeignKey {
        /// The table owning the referencing field.
        table: String,
        /// The referencing field.
        field: String,
        /// The referenced table.
        ref_table: String,
        /// The referenced field.
        ref_field: String,
    },
    /// Array/repeated modes are forbidden; this variant is reserved for
    /// the day a `FieldMode::Repeated` is ever reintroduced by mistake
    /// and rejected by validation rather than by the type system alone.
    #[error("field {table}.{field} uses a forbidden repeated/array mode")]
    RepeatedFieldMode {
        /// The owning table.
        table: String,
        /// The offending field.
        field: String,
    },
}

impl Schema {
    /// Validates schema invariants: no duplicate table names, and every
    /// foreign key resolves.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaError`] found.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.as_str()) {
                return Err(SchemaError::DuplicateTable(table.name.clone()));
            }
        }

        for table in &self.tables {
            for field in &table.fields {
                let Some(fk) = &field.references else {
                    continue;
                };
                let resolves = self.tables.iter().any(|t| {
                    t.name == fk.table && t.fields.iter().any(|f| f.name == fk.field)
                });
                if !resolves {
                    return Err(SchemaError::UnresolvedForeignKey {
                        table: table.name.clone(),
                        field: field.name.clone(),
                        ref_table: fk.table.clone(),
                        ref_field: fk.field.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Returns tables in an order where every table appears after all
    /// tables its foreign keys reference (parents before children).
    ///
    /// # Panics
    ///
    /// Panics if the schema contains a foreign-key cycle; `validate`
    /// should be called first and the data-modeling agent's prompt
    /// forbids cycles, so this is an invariant violation rather than a
    /// runtime condition.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&Table> {
        let mut ordered = Vec::with_capacity(self.tables.len());
        let mut placed: HashSet<&str> = HashSet::new();

        while ordered.len() < self.tables.len() {
            let mut progressed = false;
            for table in &self.tables {
                if placed.contains(table.name.as_str()) {
                    continue;
                }
                let parents_ready = table.fields.iter().all(|f| {
                    f.references
                        .as_ref()
                        .is_none_or(|fk| fk.table == table.name || placed.contains(fk.table.as_str()))
                });
                if parents_ready {
                    ordered.push(table);
                    placed.insert(table.name.as_str());
                    progressed = true;
                }
            }
            assert!(progressed, "foreign-key cycle in schema");
        }

        ordered
    }
}

/// Per-table NDJSON generation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticDataBatch {
    /// Table name this batch belongs to.
    pub table_name: String,
    /// Path to the newline-delimited-JSON file on disk.
    pub file_path: String,
    /// Number of rows written.
    pub row_count: u64,
}

/// Per-table load statistics captured during infrastructure provisioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStats {
    /// Table name.
    pub table_name: String,
    /// Rows loaded.
    pub rows_loaded: u64,
    /// Storage size in bytes, if reported by BigQuery.
    pub storage_bytes: Option<u64>,
}

/// The output of the infrastructure agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedDataset {
    /// Fully-qualified dataset id: `{slug}_capi_demo_{yyyymmdd}`.
    pub dataset_id: String,
    /// The GCP region the dataset was created in.
    pub location: String,
    /// Per-table load statistics.
    pub table_stats: Vec<TableStats>,
}

/// A reference to a provisioned CAPI agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapiAgentRef {
    /// Opaque agent id assigned by CAPI.
    pub agent_id: String,
    /// The dataset this agent is bound to.
    pub dataset_id: String,
}

/// Per-query result from the (disabled-by-default) validation stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenQueryResult {
    /// The question that was run.
    pub question: String,
    /// Whether CAPI returned a usable answer.
    pub succeeded: bool,
    /// Error detail, if `succeeded` is false.
    pub detail: Option<String>,
}

/// Aggregate output of the validation stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Per-query outcomes.
    pub results: Vec<GoldenQueryResult>,
    /// `results.iter().filter(|r| r.succeeded).count() as f64 / results.len()`.
    pub success_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_field(name: &str) -> Field {
        Field {
            name: name.to_string(),
            field_type: FieldType::String,
            mode: FieldMode::Required,
            description: String::new(),
            references: None,
        }
    }

    #[test]
    fn validate_rejects_duplicate_table_names() {
        let schema = Schema {
            tables: vec![
                Table {
                    name: "orders".into(),
                    description: String::new(),
                    fields: vec![simple_field("id")],
                    row_count_hint: 100,
                },
                Table {
                    name: "orders".into(),
                    description: String::new(),
                    fields: vec![simple_field("id")],
                    row_count_hint: 100,
                },
            ],
        };

        assert_eq!(
            schema.validate(),
            Err(SchemaError::DuplicateTable("orders".into()))
        );
    }

    #[test]
    fn validate_rejects_unresolved_foreign_key() {
        let schema = Schema {
            tables: vec![Table {
                name: "orders".into(),
                description: String::new(),
                fields: vec![Field {
                    references: Some(ForeignKeyRef {
                        table: "customers".into(),
                        field: "id".into(),
                    }),
                    ..simple_field("customer_id")
                }],
                row_count_hint: 100,
            }],
        };

        assert!(matches!(
            schema.validate(),
            Err(SchemaError::UnresolvedForeignKey { .. })
        ));
    }

    #[test]
    fn validate_accepts_resolved_foreign_key() {
        let schema = Schema {
            tables: vec![
                Table {
                    name: "customers".into(),
                    description: String::new(),
                    fields: vec![simple_field("id")],
                    row_count_hint: 100,
                },
                Table {
                    name: "orders".into(),
                    description: String::new(),
                    fields: vec![Field {
                        references: Some(ForeignKeyRef {
                            table: "customers".into(),
                            field: "id".into(),
                        }),
                        ..simple_field("customer_id")
                    }],
                    row_count_hint: 500,
                },
            ],
        };

        assert_eq!(schema.validate(), Ok(()));
    }

    #[test]
    fn topological_order_places_parents_first() {
        let schema = Schema {
            tables: vec![
                Table {
                    name: "orders".into(),
                    description: String::new(),
                    fields: vec![Field {
                        references: Some(ForeignKeyRef {
                            table: "customers".into(),
                            field: "id".into(),
                        }),
                        ..simple_field("customer_id")
                    }],
                    row_count_hint: 500,
                },
                Table {
                    name: "customers".into(),
                    description: String::new(),
                    fields: vec![simple_field("id")],
                    row_count_hint: 100,
                },
            ],
        };

        let order: Vec<&str> = schema
            .topological_order()
            .into_iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(order, vec!["customers", "orders"]);
    }
}
