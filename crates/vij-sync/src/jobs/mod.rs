//! The concrete jobs. `enrolled` and `graduated` ingest ministry archives,
//! `salaries` and `subareas` scrape the salary aggregator, `news` queries a
//! search API.

pub mod enrolled;
pub mod graduated;
pub mod news;
pub mod salaries;
pub mod subareas;

use vij_adapters::table::TableReadConfig;

use crate::registry::JobSpec;

pub(crate) fn reader_config(spec: &JobSpec) -> TableReadConfig {
    TableReadConfig {
        delimiter: spec.delimiter,
        batch_size: spec.batch_size,
        malformed_rows: spec.malformed_rows,
    }
}
