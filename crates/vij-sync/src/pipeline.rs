//! Per-job orchestration: discover archives, skip the already-ledgered ones,
//! then fetch, read, reconcile and load each remaining artifact. One
//! artifact's failure never aborts the run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vij_adapters::discover::discover_archive_links;
use vij_adapters::table::{ChunkedTableReader, TableReadConfig};
use vij_core::{Artifact, ColumnMapping, LedgerEntry, MetadataColumns, RowBatch, YearPolicy};
use vij_storage::{ArchiveExtractor, ArtifactWorkspace, HttpFetcher};

use crate::ledger::LedgerStore;
use crate::load::{ArtifactLoader, LoadOutcome};
use crate::schema::{DestinationSchema, Reconciler};

#[async_trait]
pub trait ArtifactDiscovery: Send + Sync {
    async fn discover(&self) -> anyhow::Result<Vec<Artifact>>;
}

/// Table files ready to read, plus the scratch workspace keeping them alive.
pub struct FetchedTables {
    tables: Vec<PathBuf>,
    _workspace: Option<ArtifactWorkspace>,
}

impl FetchedTables {
    pub fn new(tables: Vec<PathBuf>, workspace: ArtifactWorkspace) -> Self {
        Self {
            tables,
            _workspace: Some(workspace),
        }
    }

    /// Tables that live outside any scratch workspace.
    pub fn unmanaged(tables: Vec<PathBuf>) -> Self {
        Self {
            tables,
            _workspace: None,
        }
    }

    pub fn tables(&self) -> &[PathBuf] {
        &self.tables
    }
}

#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, artifact: &Artifact) -> anyhow::Result<FetchedTables>;
}

/// Discovery over a live index page of archive links.
pub struct HttpDiscovery {
    http: Arc<HttpFetcher>,
    index_url: String,
    extension: String,
    policy: YearPolicy,
}

impl HttpDiscovery {
    pub fn new(
        http: Arc<HttpFetcher>,
        index_url: impl Into<String>,
        extension: impl Into<String>,
        policy: YearPolicy,
    ) -> Self {
        Self {
            http,
            index_url: index_url.into(),
            extension: extension.into(),
            policy,
        }
    }
}

#[async_trait]
impl ArtifactDiscovery for HttpDiscovery {
    async fn discover(&self) -> anyhow::Result<Vec<Artifact>> {
        let page = self
            .http
            .fetch_bytes(&self.index_url)
            .await
            .with_context(|| format!("fetching index page {}", self.index_url))?;
        let artifacts = discover_archive_links(
            &page.text(),
            &self.index_url,
            &self.extension,
            self.policy,
            Utc::now(),
        )?;
        Ok(artifacts)
    }
}

/// Download the archive into a scratch workspace, run the external extractor
/// and locate the table files inside.
pub struct ArchiveArtifactFetcher {
    http: Arc<HttpFetcher>,
    extractor: ArchiveExtractor,
    work_dir: PathBuf,
    table_extension: String,
}

impl ArchiveArtifactFetcher {
    pub fn new(
        http: Arc<HttpFetcher>,
        extractor: ArchiveExtractor,
        work_dir: impl Into<PathBuf>,
        table_extension: impl Into<String>,
    ) -> Self {
        Self {
            http,
            extractor,
            work_dir: work_dir.into(),
            table_extension: table_extension.into(),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for ArchiveArtifactFetcher {
    async fn fetch(&self, artifact: &Artifact) -> anyhow::Result<FetchedTables> {
        let workspace = ArtifactWorkspace::create(&self.work_dir)
            .with_context(|| format!("creating workspace under {}", self.work_dir.display()))?;
        let archive = workspace.archive_path(&artifact.file_name);
        self.http
            .download_to_file(&artifact.source_url, &archive)
            .await
            .with_context(|| format!("downloading {}", artifact.source_url))?;
        let dest = workspace.extract_dir();
        self.extractor
            .extract(&archive, &dest)
            .await
            .with_context(|| format!("extracting {}", artifact.file_name))?;
        let tables = vij_storage::locate_tables(&dest, &self.table_extension);
        anyhow::ensure!(
            !tables.is_empty(),
            "no {} files inside {}",
            self.table_extension,
            artifact.file_name
        );
        Ok(FetchedTables::new(tables, workspace))
    }
}

/// Outcome of one job run, logged at the end and used for the exit code.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub discovered: usize,
    pub skipped: usize,
    pub loaded: usize,
    pub failed: usize,
    pub rows_loaded: u64,
}

impl RunSummary {
    pub fn had_failures(&self) -> bool {
        self.failed > 0
    }
}

pub struct IngestPipeline {
    job_name: String,
    schema: DestinationSchema,
    discovery: Box<dyn ArtifactDiscovery>,
    fetcher: Box<dyn ArtifactFetcher>,
    ledger: Box<dyn LedgerStore>,
    loader: Box<dyn ArtifactLoader>,
    table_config: TableReadConfig,
    mapping: ColumnMapping,
    metadata: MetadataColumns,
}

impl IngestPipeline {
    pub fn new(
        job_name: impl Into<String>,
        schema: DestinationSchema,
        discovery: Box<dyn ArtifactDiscovery>,
        fetcher: Box<dyn ArtifactFetcher>,
        ledger: Box<dyn LedgerStore>,
        loader: Box<dyn ArtifactLoader>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            schema,
            discovery,
            fetcher,
            ledger,
            loader,
            table_config: TableReadConfig::default(),
            mapping: ColumnMapping::default(),
            metadata: MetadataColumns::default(),
        }
    }

    pub fn with_table_config(mut self, table_config: TableReadConfig) -> Self {
        self.table_config = table_config;
        self
    }

    pub fn with_mapping(mut self, mapping: ColumnMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn with_metadata_columns(mut self, metadata: MetadataColumns) -> Self {
        self.metadata = metadata;
        self
    }

    /// Run the job over at most `max_artifacts` not-yet-ledgered artifacts.
    /// Ledgered artifacts are skipped without counting against the cap.
    pub async fn run(&self, max_artifacts: usize) -> anyhow::Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, job = self.job_name, max_artifacts, "run started");

        let artifacts = match self.discovery.discover().await {
            Ok(artifacts) => artifacts,
            Err(err) => {
                error!(job = self.job_name, error = format!("{err:#}"), "discovery failed, nothing to do");
                Vec::new()
            }
        };

        let mut summary = RunSummary {
            run_id,
            job_name: self.job_name.clone(),
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
            if processed >= max_artifacts {
                break;
            }
            if self
                .ledger
                .contains(&self.job_name, &artifact.file_name)
                .await?
            {
                debug!(file_name = artifact.file_name, "already ledgered, skipping");
                summary.skipped += 1;
                continue;
            }
            processed += 1;
            match self.process_artifact(artifact).await {
                Ok(outcome) => {
                    summary.loaded += 1;
                    summary.rows_loaded += outcome.rows;
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
            job = summary.job_name,
            discovered = summary.discovered,
            skipped = summary.skipped,
            loaded = summary.loaded,
            failed = summary.failed,
            rows = summary.rows_loaded,
            "run finished"
        );
        Ok(summary)
    }

    async fn process_artifact(&self, artifact: &Artifact) -> anyhow::Result<LoadOutcome> {
        let fetched = self.fetcher.fetch(artifact).await?;
        let mut readers = Vec::new();
        for path in fetched.tables() {
            let reader = ChunkedTableReader::open(
                path,
                self.table_config.clone(),
                artifact.partition_key,
                artifact.discovered_at,
            )
            .with_context(|| format!("opening table {}", path.display()))?;
            readers.push(reader);
        }
        anyhow::ensure!(
            !readers.is_empty(),
            "no tables to read for {}",
            artifact.file_name
        );

        if !self.mapping.is_empty() {
            let report = self
                .mapping
                .validate(readers[0].columns(), self.schema.columns());
            if !report.is_clean() {
                warn!(
                    file_name = artifact.file_name,
                    missing_sources = ?report.missing_sources,
                    unknown_destinations = ?report.unknown_destinations,
                    "column mapping does not line up"
                );
            }
        }

        let mut reconciler = Reconciler::new(&self.schema);
        let mapping = &self.mapping;
        let metadata = &self.metadata;
        let mut stream = readers.into_iter().flatten().map(
            |result| -> anyhow::Result<RowBatch> {
                let mut batch = result?;
                batch.rename_columns(mapping);
                batch.append_metadata_columns(metadata);
                reconciler.apply(&mut batch);
                Ok(batch)
            },
        );

        let entry = LedgerEntry::for_artifact(&self.job_name, artifact);
        self.loader
            .load_artifact(self.schema.table(), &mut stream, &entry)
            .await
    }
}
