use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;
use vij_sync::{jobs, Config, RunSummary};

#[derive(Debug, Parser)]
#[command(name = "vij")]
#[command(about = "Vocational Insight ingestion jobs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest enrollment archives into registro_matriculas.
    Enrolled {
        /// How many not-yet-processed archives to take this run.
        #[arg(long, default_value_t = 1)]
        num_files: usize,
    },
    /// Aggregate graduate counts per career from the yearly archives.
    Graduated {
        #[arg(long, default_value_t = 1)]
        num_files: usize,
    },
    /// Scrape the salary-by-category page.
    Salaries,
    /// Scrape sub-area salaries behind each area's most recent link.
    Subareas,
    /// Pull and store fresh news articles.
    News,
    /// Apply pending database migrations.
    Migrate,
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if let Ok(dir) = std::env::var("LOG_DIRECTORY") {
        let file_name =
            std::env::var("LOG_FILENAME").unwrap_or_else(|_| "vij.log".to_string());
        let path = PathBuf::from(dir).join(file_name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {}", parent.display()))?;
        }
        let file = File::create(&path)
            .with_context(|| format!("creating log file {}", path.display()))?;
        builder.with_ansi(false).with_writer(Arc::new(file)).init();
    } else {
        builder.init();
    }
    Ok(())
}

fn summary_exit(summary: RunSummary) -> ExitCode {
    println!(
        "{}: run_id={} discovered={} skipped={} loaded={} failed={} rows={}",
        summary.job_name,
        summary.run_id,
        summary.discovered,
        summary.skipped,
        summary.loaded,
        summary.failed,
        summary.rows_loaded
    );
    if summary.had_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn dispatch(command: Commands, config: &Config) -> Result<ExitCode> {
    let code = match command {
        Commands::Enrolled { num_files } => {
            summary_exit(jobs::enrolled::run(config, num_files).await?)
        }
        Commands::Graduated { num_files } => {
            summary_exit(jobs::graduated::run(config, num_files).await?)
        }
        Commands::Salaries => {
            jobs::salaries::run(config).await?;
            ExitCode::SUCCESS
        }
        Commands::Subareas => {
            jobs::subareas::run(config).await?;
            ExitCode::SUCCESS
        }
        Commands::News => {
            jobs::news::run(config).await?;
            ExitCode::SUCCESS
        }
        Commands::Migrate => {
            let pool = config.connect().await?;
            vij_sync::run_migrations(&pool).await?;
            println!("migrations applied");
            ExitCode::SUCCESS
        }
    };
    Ok(code)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    if let Err(err) = init_tracing() {
        eprintln!("failed to initialize logging: {err:#}");
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    match dispatch(cli.command, &config).await {
        Ok(code) => code,
        Err(err) => {
            error!("job failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
