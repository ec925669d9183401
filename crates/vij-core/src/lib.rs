//! Core domain model for the VIJ ingestion jobs.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "vij-core";

/// A downloadable archive discovered on an index page. Ephemeral: produced by
/// discovery, consumed by fetch, never persisted beyond the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub source_url: String,
    pub file_name: String,
    pub partition_key: i32,
    pub discovered_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(
        source_url: impl Into<String>,
        partition_key: i32,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        let source_url = source_url.into();
        let file_name = file_name_from_url(&source_url);
        Self {
            source_url,
            file_name,
            partition_key,
            discovered_at,
        }
    }
}

/// Final path segment of a URL, query string and fragment stripped.
pub fn file_name_from_url(url: &str) -> String {
    let trimmed = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .trim_end_matches('/');
    trimmed
        .rsplit('/')
        .next()
        .unwrap_or(trimmed)
        .to_string()
}

/// One row of the completion ledger. Append-only; unique on
/// `(job_name, file_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub job_name: String,
    pub file_name: String,
    pub discovered_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn for_artifact(job_name: impl Into<String>, artifact: &Artifact) -> Self {
        Self {
            job_name: job_name.into(),
            file_name: artifact.file_name.clone(),
            discovered_at: artifact.discovered_at,
            processed_at: Utc::now(),
        }
    }
}

/// A batch of raw string rows sharing one header, annotated with the
/// partition metadata that every row it produces must carry. `processed_at`
/// is stamped once per batch, not per row, and is not monotonic across
/// batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub partition_key: i32,
    pub discovered_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

/// Names of the metadata columns appended to every batch before load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataColumns {
    pub partition: String,
    pub discovered: String,
    pub processed: String,
}

impl Default for MetadataColumns {
    fn default() -> Self {
        Self {
            partition: "year".to_string(),
            discovered: "preprocessed_at".to_string(),
            processed: "processed_at".to_string(),
        }
    }
}

const SQL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

impl RowBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rename header fields through the declared mapping; unmapped columns
    /// keep their source name.
    pub fn rename_columns(&mut self, mapping: &ColumnMapping) {
        for column in &mut self.columns {
            if let Some(renamed) = mapping.rename(column) {
                *column = renamed.to_string();
            }
        }
    }

    /// Materialize the batch metadata as ordinary trailing columns so the
    /// loader can treat them like any other field.
    pub fn append_metadata_columns(&mut self, names: &MetadataColumns) {
        let partition = self.partition_key.to_string();
        let discovered = self.discovered_at.format(SQL_DATETIME_FORMAT).to_string();
        let processed = self.processed_at.format(SQL_DATETIME_FORMAT).to_string();
        self.columns.push(names.partition.clone());
        self.columns.push(names.discovered.clone());
        self.columns.push(names.processed.clone());
        for row in &mut self.rows {
            row.push(partition.clone());
            row.push(discovered.clone());
            row.push(processed.clone());
        }
    }

    /// Keep only the columns `keep` accepts, projecting every row to match.
    /// Returns the dropped column names in header order.
    pub fn retain_columns(&mut self, keep: impl Fn(&str) -> bool) -> Vec<String> {
        let kept: Vec<usize> = (0..self.columns.len())
            .filter(|&i| keep(&self.columns[i]))
            .collect();
        if kept.len() == self.columns.len() {
            return Vec::new();
        }
        let dropped = self
            .columns
            .iter()
            .filter(|c| !keep(c))
            .cloned()
            .collect();
        self.columns = kept.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.rows {
            *row = kept
                .iter()
                .map(|&i| row.get(i).cloned().unwrap_or_default())
                .collect();
        }
        dropped
    }
}

/// Declared source-column → destination-column rename table, validated at
/// startup instead of applied as an ad-hoc dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    pairs: Vec<(String, String)>,
}

/// Startup validation outcome: mismatches are surfaced, not silently dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MappingReport {
    /// Mapping entries whose source column is absent from the file header.
    pub missing_sources: Vec<String>,
    /// Mapping entries whose destination column is absent from the live table.
    pub unknown_destinations: Vec<String>,
}

impl MappingReport {
    pub fn is_clean(&self) -> bool {
        self.missing_sources.is_empty() && self.unknown_destinations.is_empty()
    }
}

impl ColumnMapping {
    pub fn new<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(s, d)| (s.to_string(), d.to_string()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn rename(&self, source: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(s, _)| s == source)
            .map(|(_, d)| d.as_str())
    }

    pub fn validate(&self, header: &[String], destination: &BTreeSet<String>) -> MappingReport {
        let mut report = MappingReport::default();
        for (source, dest) in &self.pairs {
            if !header.iter().any(|h| h == source) {
                report.missing_sources.push(source.clone());
            }
            if !destination.contains(dest) {
                report.unknown_destinations.push(dest.clone());
            }
        }
        report
    }
}

/// Partition-key extraction policy. The filename is split into maximal digit
/// runs; `RangedFourDigit` (the default) takes the first run of exactly four
/// digits whose value falls in the inclusive range, `FirstDigitRun` loosely
/// takes the leading four digits of the first run of four or more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum YearPolicy {
    RangedFourDigit { min: i32, max: i32 },
    FirstDigitRun,
}

impl Default for YearPolicy {
    fn default() -> Self {
        Self::RangedFourDigit {
            min: 1990,
            max: 2099,
        }
    }
}

impl YearPolicy {
    pub fn extract(&self, name: &str) -> Option<i32> {
        match *self {
            Self::RangedFourDigit { min, max } => digit_runs(name)
                .filter(|run| run.len() == 4)
                .filter_map(|run| run.parse::<i32>().ok())
                .find(|year| (min..=max).contains(year)),
            Self::FirstDigitRun => digit_runs(name)
                .find(|run| run.len() >= 4)
                .and_then(|run| run[..4].parse::<i32>().ok()),
        }
    }
}

fn digit_runs(input: &str) -> impl Iterator<Item = &str> {
    input
        .split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 28, 10, 0, 0).single().unwrap()
    }

    fn batch(columns: &[&str], rows: &[&[&str]]) -> RowBatch {
        RowBatch {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|v| v.to_string()).collect())
                .collect(),
            partition_key: 2023,
            discovered_at: ts(),
            processed_at: ts(),
        }
    }

    #[test]
    fn ranged_policy_skips_date_stamp_and_finds_year() {
        let policy = YearPolicy::default();
        assert_eq!(policy.extract("20240628_Data_2023_WEB.rar"), Some(2023));
    }

    #[test]
    fn ranged_policy_accepts_bare_year_filename() {
        let policy = YearPolicy::default();
        assert_eq!(policy.extract("2023.rar"), Some(2023));
    }

    #[test]
    fn ranged_policy_rejects_names_without_a_year() {
        let policy = YearPolicy::default();
        assert_eq!(policy.extract("notas_tecnicas.rar"), None);
        assert_eq!(policy.extract("v1_2_3.rar"), None);
    }

    #[test]
    fn loose_policy_takes_leading_digits_of_first_long_run() {
        let policy = YearPolicy::FirstDigitRun;
        assert_eq!(policy.extract("20240628_Data_2023_WEB.rar"), Some(2024));
        assert_eq!(policy.extract("2023.rar"), Some(2023));
    }

    #[test]
    fn file_name_strips_path_and_query() {
        assert_eq!(
            file_name_from_url("https://example.cl/files/2023.rar?dl=1"),
            "2023.rar"
        );
        assert_eq!(file_name_from_url("/relative/path/2022.rar"), "2022.rar");
    }

    #[test]
    fn mapping_validation_reports_both_mismatch_directions() {
        let mapping = ColumnMapping::new([("cat_periodo", "periodo"), ("gone", "legacy_col")]);
        let header = vec!["cat_periodo".to_string(), "mrun".to_string()];
        let destination: BTreeSet<String> =
            ["periodo", "mrun"].iter().map(|s| s.to_string()).collect();
        let report = mapping.validate(&header, &destination);
        assert_eq!(report.missing_sources, vec!["gone"]);
        assert_eq!(report.unknown_destinations, vec!["legacy_col"]);
        assert!(!report.is_clean());
    }

    #[test]
    fn rename_leaves_unmapped_columns_alone() {
        let mapping = ColumnMapping::new([("cat_periodo", "periodo")]);
        let mut b = batch(&["cat_periodo", "mrun"], &[&["2023-1", "77"]]);
        b.rename_columns(&mapping);
        assert_eq!(b.columns, vec!["periodo", "mrun"]);
    }

    #[test]
    fn metadata_columns_are_appended_to_header_and_rows() {
        let mut b = batch(&["mrun"], &[&["77"], &["78"]]);
        b.append_metadata_columns(&MetadataColumns::default());
        assert_eq!(b.columns, vec!["mrun", "year", "preprocessed_at", "processed_at"]);
        assert_eq!(b.rows[0][1], "2023");
        assert_eq!(b.rows[1][2], "2024-06-28 10:00:00");
    }

    #[test]
    fn retain_columns_projects_rows_and_reports_drops() {
        let mut b = batch(
            &["periodo", "legacy_col", "mrun"],
            &[&["2023-1", "x", "77"]],
        );
        let dropped = b.retain_columns(|c| c != "legacy_col");
        assert_eq!(dropped, vec!["legacy_col"]);
        assert_eq!(b.columns, vec!["periodo", "mrun"]);
        assert_eq!(b.rows, vec![vec!["2023-1".to_string(), "77".to_string()]]);
    }

    #[test]
    fn retain_columns_is_a_no_op_when_everything_matches() {
        let mut b = batch(&["periodo", "mrun"], &[&["2023-1", "77"]]);
        let before = b.clone();
        let dropped = b.retain_columns(|_| true);
        assert!(dropped.is_empty());
        assert_eq!(b, before);
    }
}
