//! Completion ledger: one row per fully loaded artifact, consulted before
//! any download happens.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::MySqlPool;
use vij_core::LedgerEntry;

/// Read side of the ledger. The write side lives inside the loader's
/// transaction so an artifact is either fully loaded and ledgered or neither.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn contains(&self, job_name: &str, file_name: &str) -> anyhow::Result<bool>;
}

pub struct SqlLedger {
    pool: MySqlPool,
}

impl SqlLedger {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for SqlLedger {
    async fn contains(&self, job_name: &str, file_name: &str) -> anyhow::Result<bool> {
        let hit = sqlx::query(
            "SELECT 1 FROM ingest_ledger WHERE job_name = ? AND file_name = ? LIMIT 1",
        )
        .bind(job_name)
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("checking ledger for {job_name}/{file_name}"))?;
        Ok(hit.is_some())
    }
}

/// Insert the ledger row on the caller's executor, normally the load
/// transaction.
pub async fn insert_ledger_entry<'e, E>(executor: E, entry: &LedgerEntry) -> sqlx::Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::MySql>,
{
    sqlx::query(
        "INSERT INTO ingest_ledger (job_name, file_name, exec_date, preprocessed_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(&entry.job_name)
    .bind(&entry.file_name)
    .bind(entry.processed_at)
    .bind(entry.discovered_at)
    .execute(executor)
    .await?;
    Ok(())
}
