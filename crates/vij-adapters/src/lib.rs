//! Source-format parsing for the VIJ jobs: index-page link discovery,
//! chunked delimited tables, salary cards and news search results.

use thiserror::Error;

pub mod discover;
pub mod news;
pub mod salary;
pub mod table;

pub const CRATE_NAME: &str = "vij-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}
