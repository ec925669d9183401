//! News sync: query the search API, drop articles whose URL is already
//! stored, batch insert the rest.

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, info};
use vij_adapters::news::parse_news_results;
use vij_storage::{HttpFetcher, Url};

use crate::config::Config;
use crate::registry::{JobRegistry, SearchParams};

pub const JOB_NAME: &str = "news";

pub async fn run(config: &Config) -> anyhow::Result<()> {
    let registry = JobRegistry::load(&config.jobs_file)?;
    let spec = registry.job(JOB_NAME)?;
    let search = spec
        .search
        .as_ref()
        .context("news job declares no search parameters")?;
    let api_key = config
        .serpapi_key
        .as_deref()
        .context("SERPAPI_KEY is not set")?;

    let url = search_url(search, api_key)?;
    let http = HttpFetcher::new(config.http_config())?;
    let response = http
        .fetch_bytes(url.as_str())
        .await
        .context("querying the news search api")?;
    let articles = parse_news_results(&response.body, Utc::now())?;
    info!(articles = articles.len(), "search results parsed");

    let pool = config.connect().await?;
    let mut tx = pool.begin().await.context("starting news transaction")?;
    let mut added = 0usize;
    let mut existing = 0usize;
    for article in &articles {
        let hit = sqlx::query("SELECT 1 FROM noticias WHERE link_noticia = ? LIMIT 1")
            .bind(&article.link)
            .fetch_optional(&mut *tx)
            .await
            .with_context(|| format!("checking for existing article {}", article.link))?;
        if hit.is_some() {
            debug!(link = article.link, "article already stored, skipping");
            existing += 1;
            continue;
        }
        sqlx::query(
            "INSERT INTO noticias \
             (titulo, contenido, fecha_publicacion, link_noticia, imagen_noticia) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&article.title)
        .bind(&article.snippet)
        .bind(article.published_at)
        .bind(&article.link)
        .bind(article.thumbnail.as_deref().unwrap_or(""))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("inserting article {}", article.link))?;
        added += 1;
    }
    tx.commit().await.context("committing news transaction")?;
    info!(added, existing, "news stored");
    Ok(())
}

fn search_url(search: &SearchParams, api_key: &str) -> anyhow::Result<Url> {
    let num = search.num.to_string();
    Url::parse_with_params(
        &search.endpoint,
        [
            ("api_key", api_key),
            ("engine", search.engine.as_str()),
            ("q", search.query.as_str()),
            ("location", search.location.as_str()),
            ("google_domain", search.google_domain.as_str()),
            ("gl", search.gl.as_str()),
            ("hl", search.hl.as_str()),
            ("tbm", search.tbm.as_str()),
            ("num", num.as_str()),
        ],
    )
    .with_context(|| format!("building search url from {}", search.endpoint))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_url_carries_every_parameter() {
        let search = SearchParams {
            endpoint: "https://serpapi.com/search.json".to_string(),
            engine: "google".to_string(),
            query: "educacion superior en chile".to_string(),
            location: "Chile".to_string(),
            google_domain: "google.cl".to_string(),
            gl: "cl".to_string(),
            hl: "es".to_string(),
            tbm: "nws".to_string(),
            num: 50,
        };
        let url = search_url(&search, "k123").unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("api_key=k123"));
        assert!(query.contains("q=educacion+superior+en+chile"));
        assert!(query.contains("google_domain=google.cl"));
        assert!(query.contains("tbm=nws"));
        assert!(query.contains("num=50"));
    }
}
