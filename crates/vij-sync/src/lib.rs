//! Job orchestration for the VIJ ingestion suite: configuration, the job
//! registry, the completion ledger and the pipelines behind each CLI command.

pub mod config;
pub mod jobs;
pub mod ledger;
pub mod load;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod schema;

pub const CRATE_NAME: &str = "vij-sync";

pub use config::Config;
pub use pipeline::RunSummary;

use anyhow::Context;
use sqlx::MySqlPool;

pub async fn run_migrations(pool: &MySqlPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .context("running database migrations")
}
