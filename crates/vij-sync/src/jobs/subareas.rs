//! Second-level salary scrape: follow the most recent per-area link recorded
//! by the `salaries` job and store one observation per sub-area card.

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use sqlx::{MySql, MySqlPool, Row, Transaction};
use tracing::{info, warn};
use vij_adapters::salary::{parse_salary_cards, SalaryCardSelectors};
use vij_storage::HttpFetcher;

use crate::config::Config;
use crate::registry::JobRegistry;

pub const JOB_NAME: &str = "subareas";

struct AreaLink {
    area_id: i32,
    link_area: String,
}

pub async fn run(config: &Config) -> anyhow::Result<()> {
    let registry = JobRegistry::load(&config.jobs_file)?;
    let spec = registry.job(JOB_NAME)?;
    let selectors = spec
        .selectors
        .as_ref()
        .context("subareas job declares no selectors")?;

    let pool = config.connect().await?;
    let links = latest_area_links(&pool).await?;
    anyhow::ensure!(
        !links.is_empty(),
        "no area links recorded yet, run the salaries job first"
    );
    info!(areas = links.len(), "following latest area links");

    let http = HttpFetcher::new(config.http_config())?;
    let mut subareas = 0usize;
    let mut failed = 0usize;
    for link in &links {
        match process_area(&pool, &http, selectors, link).await {
            Ok(count) => subareas += count,
            Err(err) => {
                warn!(
                    area_id = link.area_id,
                    link = link.link_area,
                    error = format!("{err:#}"),
                    "area failed, continuing with the next one"
                );
                failed += 1;
            }
        }
    }
    info!(areas = links.len(), failed, subareas, "subarea observations recorded");
    anyhow::ensure!(failed == 0, "{failed} of {} areas failed", links.len());
    Ok(())
}

/// The most recent recorded link for each area. Observations are
/// append-only, so the highest row id per area is the latest one.
async fn latest_area_links(pool: &MySqlPool) -> anyhow::Result<Vec<AreaLink>> {
    let rows = sqlx::query(
        "SELECT l.area_id, l.link_area FROM laborum_areas_links l \
         JOIN (SELECT area_id, MAX(id) AS max_id FROM laborum_areas_links GROUP BY area_id) latest \
         ON latest.max_id = l.id \
         ORDER BY l.area_id",
    )
    .fetch_all(pool)
    .await
    .context("reading latest area links")?;
    rows.into_iter()
        .map(|row| {
            Ok(AreaLink {
                area_id: row.try_get(0)?,
                link_area: row.try_get(1)?,
            })
        })
        .collect()
}

/// All sub-area cards of one area page commit together; a failure rolls the
/// whole area back so it retries whole next run.
async fn process_area(
    pool: &MySqlPool,
    http: &HttpFetcher,
    selectors: &SalaryCardSelectors,
    link: &AreaLink,
) -> anyhow::Result<usize> {
    let page = http
        .fetch_bytes(&link.link_area)
        .await
        .with_context(|| format!("fetching area page {}", link.link_area))?;
    let cards = parse_salary_cards(&page.text(), selectors)?;
    anyhow::ensure!(!cards.is_empty(), "no sub-area cards at {}", link.link_area);

    let mut tx = pool.begin().await.context("starting subarea transaction")?;
    let now = Utc::now();
    let month = now.date_naive();
    for card in &cards {
        let subarea_id = upsert_subarea(&mut tx, link.area_id, &card.category, month).await?;
        sqlx::query(
            "INSERT INTO laborum_subareas_links \
             (id_subarea, salario_promedio, salarios_basados, executed_at, month) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(subarea_id)
        .bind(card.average_salary)
        .bind(card.sample_size)
        .bind(now)
        .bind(month)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("inserting sub-area observation for {}", card.category))?;
    }
    tx.commit().await.context("committing subarea transaction")?;
    Ok(cards.len())
}

/// Sub-area names are unique per area, not globally.
async fn upsert_subarea(
    tx: &mut Transaction<'_, MySql>,
    area_id: i32,
    name: &str,
    created_at: NaiveDate,
) -> anyhow::Result<u64> {
    let existing =
        sqlx::query("SELECT id FROM laborum_subareas WHERE id_area = ? AND nombre_subarea = ?")
            .bind(area_id)
            .bind(name)
            .fetch_optional(&mut **tx)
            .await
            .with_context(|| format!("looking up sub-area {name}"))?;
    if let Some(row) = existing {
        let id: i32 = row.try_get(0)?;
        return Ok(id as u64);
    }
    let inserted = sqlx::query(
        "INSERT INTO laborum_subareas (id_area, nombre_subarea, created_at) VALUES (?, ?, ?)",
    )
    .bind(area_id)
    .bind(name)
    .bind(created_at)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("inserting sub-area {name}"))?;
    Ok(inserted.last_insert_id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vij_adapters::salary::SalaryCard;

    // The area pages ship the same card shape as the top-level salary page,
    // so the sub-area scrape reuses the card parser with its own selectors.
    #[test]
    fn sub_area_cards_parse_with_registry_style_selectors() {
        let selectors = SalaryCardSelectors {
            card: "div[class*='subarea-card']".to_string(),
            category: "div[class*='subarea-name']".to_string(),
            average: "div[class*='average-salary']".to_string(),
            sample: "div[class*='based-on']".to_string(),
        };
        let page = r#"
            <div class="subarea-card x1">
              <div class="subarea-name y2">Desarrollo de Software</div>
              <div class="average-salary z3">$1.450.000</div>
              <div class="based-on w4">basado en 812 salarios pretendidos</div>
            </div>
            <div class="subarea-card x1">
              <div class="subarea-name y2">Redes</div>
              <div class="average-salary z3"></div>
              <div class="based-on w4">basado en 3 salarios</div>
            </div>
        "#;
        let cards = parse_salary_cards(page, &selectors).unwrap();
        assert_eq!(
            cards,
            vec![SalaryCard {
                category: "Desarrollo de Software".to_string(),
                average_salary: 1_450_000,
                sample_size: 812,
            }]
        );
    }
}
