//! Salary scrape: one observation per category card on the aggregator page,
//! stamped with the scrape month.

use anyhow::Context;
use chrono::Utc;
use sqlx::{MySql, Row, Transaction};
use tracing::info;
use vij_adapters::salary::{category_link, parse_salary_cards};
use vij_storage::HttpFetcher;

use crate::config::Config;
use crate::registry::JobRegistry;

pub const JOB_NAME: &str = "salaries";

pub async fn run(config: &Config) -> anyhow::Result<()> {
    let registry = JobRegistry::load(&config.jobs_file)?;
    let spec = registry.job(JOB_NAME)?;
    let page_url = spec
        .page_url
        .as_deref()
        .context("salaries job declares no page_url")?;
    let selectors = spec
        .selectors
        .as_ref()
        .context("salaries job declares no selectors")?;
    let link_base = spec.link_base_url.as_deref().unwrap_or(page_url);

    let http = HttpFetcher::new(config.http_config())?;
    let page = http
        .fetch_bytes(page_url)
        .await
        .with_context(|| format!("fetching salary page {page_url}"))?;
    let cards = parse_salary_cards(&page.text(), selectors)?;
    anyhow::ensure!(!cards.is_empty(), "no salary cards found at {page_url}");
    info!(cards = cards.len(), "salary cards parsed");

    let pool = config.connect().await?;
    let mut tx = pool.begin().await.context("starting salary transaction")?;
    let now = Utc::now();
    let executed_at = now.format("%Y-%m-%d %H:%M:%S").to_string();
    let month = now.date_naive();
    for card in &cards {
        let area_id = upsert_area(&mut tx, &card.category).await?;
        sqlx::query(
            "INSERT INTO laborum_areas_links \
             (area_id, salario_promedio, salarios_basados, link_area, executed_at, month) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(area_id)
        .bind(card.average_salary)
        .bind(card.sample_size)
        .bind(category_link(link_base, &card.category))
        .bind(&executed_at)
        .bind(month)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("inserting salary observation for {}", card.category))?;
    }
    tx.commit().await.context("committing salary transaction")?;
    info!(areas = cards.len(), "salary observations recorded");
    Ok(())
}

async fn upsert_area(tx: &mut Transaction<'_, MySql>, name: &str) -> anyhow::Result<u64> {
    let existing = sqlx::query("SELECT id FROM laborum_areas WHERE nombre_area = ?")
        .bind(name)
        .fetch_optional(&mut **tx)
        .await
        .with_context(|| format!("looking up area {name}"))?;
    if let Some(row) = existing {
        let id: i32 = row.try_get(0)?;
        return Ok(id as u64);
    }
    let inserted = sqlx::query("INSERT INTO laborum_areas (nombre_area) VALUES (?)")
        .bind(name)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("inserting area {name}"))?;
    Ok(inserted.last_insert_id())
}
