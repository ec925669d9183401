//! Graduates ingestion: per-career graduate counts aggregated from the
//! ministry's yearly archives, classified as technical or professional.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use sqlx::{MySql, MySqlPool, Row, Transaction};
use tracing::{error, info, warn};
use uuid::Uuid;
use vij_adapters::table::{ChunkedTableReader, TableError};
use vij_core::{Artifact, LedgerEntry, RowBatch};
use vij_storage::{ArchiveExtractor, HttpFetcher};

use crate::config::Config;
use crate::ledger::{insert_ledger_entry, LedgerStore, SqlLedger};
use crate::pipeline::{
    ArchiveArtifactFetcher, ArtifactDiscovery, ArtifactFetcher, HttpDiscovery, RunSummary,
};
use crate::registry::{JobRegistry, JobSpec};
use crate::report;

pub const JOB_NAME: &str = "graduated";

const CAREER_COLUMN: &str = "area_carrera_generica_n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CareerKind {
    Tecnica,
    Profesional,
}

impl CareerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tecnica => "Técnica",
            Self::Profesional => "Profesional",
        }
    }
}

/// Technical when the name contains the whole word "Técnico" or "Analista",
/// case-insensitively; professional otherwise.
pub fn classify_career(name: &str) -> CareerKind {
    let technical = name
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| {
            let word = word.to_lowercase();
            word == "técnico" || word == "tecnico" || word == "analista"
        });
    if technical {
        CareerKind::Tecnica
    } else {
        CareerKind::Profesional
    }
}

/// Count rows per career name across a batch stream. Blank career values are
/// ignored.
pub fn tally_careers<I>(batches: I) -> anyhow::Result<BTreeMap<String, u64>>
where
    I: IntoIterator<Item = Result<RowBatch, TableError>>,
{
    let mut counts = BTreeMap::new();
    for batch in batches {
        let batch = batch?;
        let idx = batch
            .columns
            .iter()
            .position(|c| c == CAREER_COLUMN)
            .with_context(|| format!("column {CAREER_COLUMN} missing from table"))?;
        for row in &batch.rows {
            let value = row.get(idx).map(|v| v.trim()).unwrap_or("");
            if !value.is_empty() {
                *counts.entry(value.to_string()).or_insert(0) += 1;
            }
        }
    }
    Ok(counts)
}

pub async fn run(config: &Config, num_files: usize) -> anyhow::Result<RunSummary> {
    let registry = JobRegistry::load(&config.jobs_file)?;
    let spec = registry.job(JOB_NAME)?;
    let pool = config.connect().await?;

    let http = Arc::new(HttpFetcher::new(config.http_config())?);
    let discovery = HttpDiscovery::new(
        http.clone(),
        spec.index_url()?,
        spec.archive_extension.clone(),
        spec.year_policy.unwrap_or_default(),
    );
    let fetcher = ArchiveArtifactFetcher::new(
        http,
        ArchiveExtractor::new(&config.unrar_path),
        config.work_dir.clone(),
        spec.table_extension.clone(),
    );
    let ledger = SqlLedger::new(pool.clone());

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!(%run_id, job = JOB_NAME, num_files, "run started");

    let artifacts = match discovery.discover().await {
        Ok(artifacts) => artifacts,
        Err(err) => {
            error!(job = JOB_NAME, error = format!("{err:#}"), "discovery failed, nothing to do");
            Vec::new()
        }
    };

    let mut summary = RunSummary {
        run_id,
        job_name: JOB_NAME.to_string(),
        started_at,
        finished_at: started_at,
        discovered: artifacts.len(),
        skipped: 0,
        loaded: 0,
        failed: 0,
        rows_loaded: 0,
    };

    let mut processed = 0;
    for artifact in &artifacts {
        if processed >= num_files {
            break;
        }
        if ledger.contains(JOB_NAME, &artifact.file_name).await? {
            summary.skipped += 1;
            continue;
        }
        processed += 1;
        match process_artifact(config, &pool, &fetcher, spec, artifact).await {
            Ok(careers) => {
                summary.loaded += 1;
                summary.rows_loaded += careers as u64;
            }
            Err(err) => {
                warn!(
                    file_name = artifact.file_name,
                    error = format!("{err:#}"),
                    "artifact failed, continuing with the next one"
                );
                summary.failed += 1;
            }
        }
    }

    summary.finished_at = Utc::now();
    info!(
        %run_id,
        discovered = summary.discovered,
        skipped = summary.skipped,
        loaded = summary.loaded,
        failed = summary.failed,
        careers = summary.rows_loaded,
        "run finished"
    );
    Ok(summary)
}

async fn process_artifact(
    config: &Config,
    pool: &MySqlPool,
    fetcher: &ArchiveArtifactFetcher,
    spec: &JobSpec,
    artifact: &Artifact,
) -> anyhow::Result<usize> {
    let fetched = fetcher.fetch(artifact).await?;
    let mut counts = BTreeMap::new();
    for path in fetched.tables() {
        let reader = ChunkedTableReader::open(
            path,
            super::reader_config(spec),
            artifact.partition_key,
            artifact.discovered_at,
        )
        .with_context(|| format!("opening table {}", path.display()))?;
        for (career, count) in tally_careers(reader)? {
            *counts.entry(career).or_insert(0) += count;
        }
    }
    anyhow::ensure!(!counts.is_empty(), "no careers counted in {}", artifact.file_name);

    let entry = LedgerEntry::for_artifact(JOB_NAME, artifact);
    persist_counts(pool, &counts, artifact.partition_key, &entry).await?;

    let rows: Vec<Vec<String>> = counts
        .iter()
        .map(|(career, count)| {
            vec![
                career.clone(),
                count.to_string(),
                classify_career(career).as_str().to_string(),
            ]
        })
        .collect();
    report::write_csv(&config.output_csv, &["Carrera", "Cantidad", "Tipo"], &rows)?;
    Ok(counts.len())
}

/// Per-career counts, the careers they reference and the ledger entry all
/// commit together.
async fn persist_counts(
    pool: &MySqlPool,
    counts: &BTreeMap<String, u64>,
    year: i32,
    entry: &LedgerEntry,
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await.context("starting graduates transaction")?;
    let executed_at = Utc::now();
    for (career, count) in counts {
        let career_id = upsert_career(&mut tx, career, classify_career(career)).await?;
        sqlx::query(
            "INSERT INTO titulados_carrera (id_carrera, cantidad_titulados, fecha_ejecucion, anno) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(career_id)
        .bind(*count as i64)
        .bind(executed_at)
        .bind(year)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("inserting graduate count for {career}"))?;
    }
    insert_ledger_entry(&mut *tx, entry)
        .await
        .with_context(|| format!("recording ledger entry for {}", entry.file_name))?;
    tx.commit().await.context("committing graduates transaction")?;
    Ok(())
}

async fn upsert_career(
    tx: &mut Transaction<'_, MySql>,
    name: &str,
    kind: CareerKind,
) -> anyhow::Result<u64> {
    let existing = sqlx::query("SELECT id FROM carreras WHERE nombre = ?")
        .bind(name)
        .fetch_optional(&mut **tx)
        .await
        .with_context(|| format!("looking up career {name}"))?;
    if let Some(row) = existing {
        let id: i32 = row.try_get(0)?;
        return Ok(id as u64);
    }
    let inserted = sqlx::query("INSERT INTO carreras (nombre, tipo) VALUES (?, ?)")
        .bind(name)
        .bind(kind.as_str())
        .execute(&mut **tx)
        .await
        .with_context(|| format!("inserting career {name}"))?;
    Ok(inserted.last_insert_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_word_tecnico_or_analista_is_technical() {
        assert_eq!(classify_career("Técnico en Enfermería"), CareerKind::Tecnica);
        assert_eq!(classify_career("TECNICO EN REDES"), CareerKind::Tecnica);
        assert_eq!(classify_career("Analista de Sistemas"), CareerKind::Tecnica);
        assert_eq!(classify_career("Ingeniería Civil"), CareerKind::Profesional);
        // Substring matches do not count.
        assert_eq!(classify_career("Politécnico Industrial"), CareerKind::Profesional);
    }

    #[test]
    fn tally_counts_rows_per_career_and_skips_blanks() {
        let batch = |rows: &[&str]| -> Result<RowBatch, TableError> {
            Ok(RowBatch {
                columns: vec!["mrun".to_string(), CAREER_COLUMN.to_string()],
                rows: rows
                    .iter()
                    .enumerate()
                    .map(|(i, career)| vec![i.to_string(), career.to_string()])
                    .collect(),
                partition_key: 2023,
                discovered_at: Utc::now(),
                processed_at: Utc::now(),
            })
        };
        let counts = tally_careers([
            batch(&["Enfermería", "Técnico en Redes", "Enfermería"]),
            batch(&["", "Enfermería"]),
        ])
        .unwrap();
        assert_eq!(counts.get("Enfermería"), Some(&3));
        assert_eq!(counts.get("Técnico en Redes"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn tally_fails_without_the_career_column() {
        let batch = RowBatch {
            columns: vec!["mrun".to_string()],
            rows: vec![vec!["1".to_string()]],
            partition_key: 2023,
            discovered_at: Utc::now(),
            processed_at: Utc::now(),
        };
        assert!(tally_careers([Ok(batch)]).is_err());
    }
}
