//! Live destination schema and the column reconciliation applied to every
//! batch before load.

use std::collections::BTreeSet;

use anyhow::Context;
use sqlx::{MySqlPool, Row};
use tracing::warn;
use vij_core::RowBatch;

/// Column set of one destination table, read from the live database at job
/// startup so schema drift shows up immediately instead of mid-load.
#[derive(Debug, Clone)]
pub struct DestinationSchema {
    table: String,
    columns: BTreeSet<String>,
}

impl DestinationSchema {
    pub fn new(table: impl Into<String>, columns: impl IntoIterator<Item = String>) -> Self {
        Self {
            table: table.into(),
            columns: columns.into_iter().collect(),
        }
    }

    pub async fn fetch(pool: &MySqlPool, table: &str) -> anyhow::Result<Self> {
        let rows = sqlx::query(
            "SELECT COLUMN_NAME FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ?",
        )
        .bind(table)
        .fetch_all(pool)
        .await
        .with_context(|| format!("reading schema of {table}"))?;
        let columns: BTreeSet<String> = rows
            .into_iter()
            .map(|row| row.try_get::<String, _>(0))
            .collect::<Result<_, _>>()
            .with_context(|| format!("decoding column names of {table}"))?;
        anyhow::ensure!(!columns.is_empty(), "destination table {table} not found");
        Ok(Self::new(table, columns))
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains(column)
    }
}

/// Drops batch columns the destination does not have, warning once per
/// column name per artifact rather than once per batch.
pub struct Reconciler<'a> {
    schema: &'a DestinationSchema,
    warned: BTreeSet<String>,
}

impl<'a> Reconciler<'a> {
    pub fn new(schema: &'a DestinationSchema) -> Self {
        Self {
            schema,
            warned: BTreeSet::new(),
        }
    }

    pub fn apply(&mut self, batch: &mut RowBatch) {
        let dropped = batch.retain_columns(|c| self.schema.contains(c));
        for column in dropped {
            if self.warned.insert(column.clone()) {
                warn!(
                    table = self.schema.table(),
                    column, "column absent from destination, dropping"
                );
            }
        }
    }

    /// Column names dropped so far, for the end-of-artifact report.
    pub fn dropped_columns(&self) -> &BTreeSet<String> {
        &self.warned
    }
}
