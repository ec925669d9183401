//! Declarative job registry, loaded from `jobs.yaml`. Everything that varies
//! per job but not per run lives here: index pages, selectors, destination
//! tables, reader settings.

use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;
use vij_adapters::salary::SalaryCardSelectors;
use vij_adapters::table::MalformedRowPolicy;
use vij_core::{MetadataColumns, YearPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct JobRegistry {
    pub jobs: Vec<JobSpec>,
}

/// How a job acquires its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Index page of archive links; download, extract, load tables.
    Archive,
    /// One HTML page scraped directly.
    Page,
    /// A JSON search API queried directly.
    Search,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    pub job_name: String,
    pub mode: JobMode,
    #[serde(default)]
    pub index_url: Option<String>,
    #[serde(default = "default_archive_extension")]
    pub archive_extension: String,
    #[serde(default = "default_table_extension")]
    pub table_extension: String,
    #[serde(default)]
    pub destination_table: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub malformed_rows: MalformedRowPolicy,
    #[serde(default)]
    pub year_policy: Option<YearPolicy>,
    #[serde(default)]
    pub metadata_columns: Option<MetadataColumns>,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub selectors: Option<SalaryCardSelectors>,
    #[serde(default)]
    pub link_base_url: Option<String>,
    #[serde(default)]
    pub search: Option<SearchParams>,
}

/// Query parameters for a `Search` mode job, SerpAPI conventions.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_search_engine")]
    pub engine: String,
    pub query: String,
    pub location: String,
    pub google_domain: String,
    pub gl: String,
    pub hl: String,
    #[serde(default = "default_search_tbm")]
    pub tbm: String,
    #[serde(default = "default_search_num")]
    pub num: u32,
}

fn default_archive_extension() -> String {
    ".rar".to_string()
}

fn default_table_extension() -> String {
    ".csv".to_string()
}

fn default_batch_size() -> usize {
    2000
}

fn default_delimiter() -> char {
    ';'
}

fn default_search_endpoint() -> String {
    "https://serpapi.com/search.json".to_string()
}

fn default_search_engine() -> String {
    "google".to_string()
}

fn default_search_tbm() -> String {
    "nws".to_string()
}

fn default_search_num() -> u32 {
    50
}

impl JobRegistry {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading job registry {}", path.display()))?;
        let registry: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing job registry {}", path.display()))?;
        if registry.jobs.is_empty() {
            bail!("job registry {} declares no jobs", path.display());
        }
        Ok(registry)
    }

    pub fn job(&self, name: &str) -> anyhow::Result<&JobSpec> {
        self.jobs
            .iter()
            .find(|j| j.job_name == name)
            .with_context(|| format!("job {name:?} is not in the registry"))
    }
}

impl JobSpec {
    pub fn index_url(&self) -> anyhow::Result<&str> {
        self.index_url
            .as_deref()
            .with_context(|| format!("job {:?} declares no index_url", self.job_name))
    }

    pub fn destination_table(&self) -> anyhow::Result<&str> {
        self.destination_table
            .as_deref()
            .with_context(|| format!("job {:?} declares no destination_table", self.job_name))
    }
}
