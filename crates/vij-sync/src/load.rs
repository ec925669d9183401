//! Batch append into the destination table. The ledger row is written in the
//! same transaction as the data, so a half-loaded artifact rolls back to
//! nothing and gets retried whole on the next run.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::{debug, info};
use vij_core::{LedgerEntry, RowBatch};

use crate::ledger::insert_ledger_entry;

/// Rows are sub-chunked so one statement never exceeds this many bind
/// parameters; MySQL caps prepared statements at 65535 and the enrollment
/// table is 55 columns wide.
const MAX_BIND_PARAMS: usize = 10_000;

pub fn rows_per_statement(column_count: usize) -> usize {
    (MAX_BIND_PARAMS / column_count.max(1)).max(1)
}

/// Backtick-quote an identifier that came from a file header or the registry.
pub fn quote_ident(name: &str) -> anyhow::Result<String> {
    anyhow::ensure!(
        !name.is_empty() && !name.contains('`'),
        "unquotable identifier {name:?}"
    );
    Ok(format!("`{name}`"))
}

fn build_insert<'args>(
    table_sql: &str,
    columns_sql: &str,
    rows: &'args [Vec<String>],
) -> QueryBuilder<'args, MySql> {
    let mut builder =
        QueryBuilder::new(format!("INSERT INTO {table_sql} ({columns_sql}) "));
    builder.push_values(rows, |mut b, row| {
        for value in row {
            b.push_bind(value.as_str());
        }
    });
    builder
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub batches: usize,
    pub rows: u64,
}

/// Consumes a batch stream and persists it together with the artifact's
/// ledger entry, atomically.
#[async_trait]
pub trait ArtifactLoader: Send + Sync {
    async fn load_artifact(
        &self,
        table: &str,
        batches: &mut (dyn Iterator<Item = anyhow::Result<RowBatch>> + Send),
        entry: &LedgerEntry,
    ) -> anyhow::Result<LoadOutcome>;
}

pub struct SqlLoader {
    pool: MySqlPool,
}

impl SqlLoader {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtifactLoader for SqlLoader {
    async fn load_artifact(
        &self,
        table: &str,
        batches: &mut (dyn Iterator<Item = anyhow::Result<RowBatch>> + Send),
        entry: &LedgerEntry,
    ) -> anyhow::Result<LoadOutcome> {
        let table_sql = quote_ident(table)?;
        let mut tx = self.pool.begin().await.context("starting load transaction")?;
        let mut outcome = LoadOutcome::default();

        for batch in batches {
            let batch = batch?;
            if batch.is_empty() {
                continue;
            }
            let columns_sql = batch
                .columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<anyhow::Result<Vec<_>>>()?
                .join(", ");
            for chunk in batch.rows.chunks(rows_per_statement(batch.columns.len())) {
                let mut builder = build_insert(&table_sql, &columns_sql, chunk);
                builder
                    .build()
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("inserting into {table}"))?;
            }
            outcome.batches += 1;
            outcome.rows += batch.len() as u64;
            debug!(table, rows = batch.len(), "batch appended");
        }

        insert_ledger_entry(&mut *tx, entry)
            .await
            .with_context(|| format!("recording ledger entry for {}", entry.file_name))?;
        tx.commit().await.context("committing load transaction")?;
        info!(
            table,
            file_name = entry.file_name,
            batches = outcome.batches,
            rows = outcome.rows,
            "artifact loaded"
        );
        Ok(outcome)
    }
}
