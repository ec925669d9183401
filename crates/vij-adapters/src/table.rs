//! Bounded-memory chunked reader for large delimited table files.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;
use vij_core::RowBatch;

/// What to do with a row whose field count does not match the header.
/// `SkipWithWarning` is the documented default; `ZipPad` truncates extra
/// fields and pads missing ones with empty strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedRowPolicy {
    #[default]
    SkipWithWarning,
    ZipPad,
}

#[derive(Debug, Clone)]
pub struct TableReadConfig {
    pub delimiter: char,
    pub batch_size: usize,
    pub malformed_rows: MalformedRowPolicy,
}

impl Default for TableReadConfig {
    fn default() -> Self {
        Self {
            delimiter: ';',
            batch_size: 2000,
            malformed_rows: MalformedRowPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is empty, no header line")]
    EmptyFile { path: PathBuf },
}

/// Lazy, finite, non-restartable sequence of [`RowBatch`]es over one file.
/// The first line defines the field names; every batch carries the artifact's
/// partition key and discovery timestamp plus a per-batch `processed_at`.
pub struct ChunkedTableReader {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    columns: Vec<String>,
    config: TableReadConfig,
    partition_key: i32,
    discovered_at: DateTime<Utc>,
    line_no: u64,
    exhausted: bool,
}

impl ChunkedTableReader {
    pub fn open(
        path: &Path,
        config: TableReadConfig,
        partition_key: i32,
        discovered_at: DateTime<Utc>,
    ) -> Result<Self, TableError> {
        let io_err = |source| TableError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(&io_err)?;
        let mut lines = BufReader::new(file).lines();
        let header = match lines.next() {
            Some(line) => line.map_err(&io_err)?,
            None => {
                return Err(TableError::EmptyFile {
                    path: path.to_path_buf(),
                })
            }
        };
        let columns = split_fields(&header, config.delimiter);
        Ok(Self {
            path: path.to_path_buf(),
            lines,
            columns,
            config,
            partition_key,
            discovered_at,
            line_no: 1,
            exhausted: false,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_batch(&mut self) -> Result<Option<RowBatch>, TableError> {
        if self.exhausted {
            return Ok(None);
        }
        let mut rows = Vec::with_capacity(self.config.batch_size);
        while rows.len() < self.config.batch_size {
            match self.lines.next() {
                Some(line) => {
                    let line = line.map_err(|source| TableError::Io {
                        path: self.path.clone(),
                        source,
                    })?;
                    self.line_no += 1;
                    if let Some(row) = self.accept_row(&line) {
                        rows.push(row);
                    }
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(RowBatch {
            columns: self.columns.clone(),
            rows,
            partition_key: self.partition_key,
            discovered_at: self.discovered_at,
            processed_at: Utc::now(),
        }))
    }

    fn accept_row(&self, line: &str) -> Option<Vec<String>> {
        let mut fields = split_fields(line, self.config.delimiter);
        let expected = self.columns.len();
        if fields.len() == expected {
            return Some(fields);
        }
        match self.config.malformed_rows {
            MalformedRowPolicy::SkipWithWarning => {
                warn!(
                    path = %self.path.display(),
                    line = self.line_no,
                    got = fields.len(),
                    expected,
                    "malformed row skipped"
                );
                None
            }
            MalformedRowPolicy::ZipPad => {
                fields.truncate(expected);
                fields.resize(expected, String::new());
                Some(fields)
            }
        }
    }
}

impl Iterator for ChunkedTableReader {
    type Item = Result<RowBatch, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}

fn split_fields(line: &str, delimiter: char) -> Vec<String> {
    line.trim_end_matches('\r')
        .split(delimiter)
        .map(|f| f.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_table(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        for line in lines {
            writeln!(file, "{line}").expect("write line");
        }
        file
    }

    fn reader(file: &NamedTempFile, batch_size: usize) -> ChunkedTableReader {
        ChunkedTableReader::open(
            file.path(),
            TableReadConfig {
                batch_size,
                ..TableReadConfig::default()
            },
            2023,
            Utc::now(),
        )
        .expect("open")
    }

    #[test]
    fn ten_rows_with_batch_size_four_yield_4_4_2() {
        let mut lines = vec!["a;b"];
        let rows: Vec<String> = (0..10).map(|i| format!("{i};x")).collect();
        lines.extend(rows.iter().map(|s| s.as_str()));
        let file = write_table(&lines);

        let sizes: Vec<usize> = reader(&file, 4)
            .map(|b| b.expect("batch").len())
            .collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn concatenated_batches_round_trip_the_file() {
        let file = write_table(&["a;b", "1;uno", "2;dos", "3;tres"]);
        let all: Vec<Vec<String>> = reader(&file, 2)
            .flat_map(|b| b.expect("batch").rows)
            .collect();
        assert_eq!(
            all,
            vec![
                vec!["1".to_string(), "uno".to_string()],
                vec!["2".to_string(), "dos".to_string()],
                vec!["3".to_string(), "tres".to_string()],
            ]
        );
    }

    #[test]
    fn header_defines_columns_and_crlf_is_tolerated() {
        let file = write_table(&["cat_periodo;mrun\r", "2023-1;77\r"]);
        let r = reader(&file, 10);
        assert_eq!(r.columns(), ["cat_periodo", "mrun"]);
        let batch = r.map(|b| b.unwrap()).next().unwrap();
        assert_eq!(batch.rows, vec![vec!["2023-1".to_string(), "77".to_string()]]);
    }

    #[test]
    fn skip_policy_drops_short_and_long_rows() {
        let file = write_table(&["a;b", "1;uno", "solo_un_campo", "1;dos;extra", "2;dos"]);
        let total: usize = reader(&file, 10).map(|b| b.expect("batch").len()).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn zip_pad_policy_truncates_and_pads_instead() {
        let file = write_table(&["a;b", "solo", "1;dos;extra"]);
        let mut r = ChunkedTableReader::open(
            file.path(),
            TableReadConfig {
                malformed_rows: MalformedRowPolicy::ZipPad,
                ..TableReadConfig::default()
            },
            2023,
            Utc::now(),
        )
        .expect("open");
        let batch = r.next().expect("some").expect("batch");
        assert_eq!(
            batch.rows,
            vec![
                vec!["solo".to_string(), String::new()],
                vec!["1".to_string(), "dos".to_string()],
            ]
        );
    }

    #[test]
    fn batches_carry_partition_metadata() {
        let file = write_table(&["a;b", "1;uno"]);
        let batch = reader(&file, 10).next().expect("some").expect("batch");
        assert_eq!(batch.partition_key, 2023);
        assert!(batch.processed_at >= batch.discovered_at);
    }

    #[test]
    fn empty_file_is_an_error() {
        let file = NamedTempFile::new().expect("temp file");
        let err = ChunkedTableReader::open(file.path(), TableReadConfig::default(), 2023, Utc::now())
            .err()
            .expect("empty file error");
        assert!(matches!(err, TableError::EmptyFile { .. }));
    }
}
