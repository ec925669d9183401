//! News search API response parsing, including the Spanish relative dates
//! the API returns ("hace 3 días", "hace 2 horas", ...).

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::AdapterError;

/// One article as staged for insertion. `published_at` is `None` when the
/// raw date could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsArticle {
    pub title: String,
    pub snippet: String,
    pub link: String,
    pub thumbnail: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    news_results: Vec<RawNewsResult>,
}

#[derive(Debug, Deserialize)]
struct RawNewsResult {
    title: String,
    link: String,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
}

/// Parse a search API response body into staged articles, resolving each
/// raw date against `now`.
pub fn parse_news_results(
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<Vec<NewsArticle>, AdapterError> {
    let response: SearchResponse = serde_json::from_slice(body)?;
    Ok(response
        .news_results
        .into_iter()
        .map(|raw| {
            let published_at = raw.date.as_deref().and_then(|d| {
                let resolved = resolve_published_date(d, now);
                if resolved.is_none() {
                    warn!(date = d, link = raw.link, "unparseable article date");
                }
                resolved
            });
            NewsArticle {
                title: raw.title,
                snippet: raw.snippet.unwrap_or_default(),
                link: raw.link,
                thumbnail: raw.thumbnail,
                published_at,
            }
        })
        .collect())
}

/// Interpret `raw` either as an absolute `dd-mm-YYYY` date or as a Spanish
/// relative phrase `hace <n> <unidad>` measured back from `now`.
pub fn resolve_published_date(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%d-%m-%Y") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }

    let rest = raw.strip_prefix("hace ")?;
    let mut parts = rest.split_whitespace();
    let amount: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?.to_lowercase();

    let offset = if unit.starts_with("segundo") {
        Duration::seconds(amount)
    } else if unit.starts_with("min") {
        Duration::minutes(amount)
    } else if unit.starts_with("hora") {
        Duration::hours(amount)
    } else if unit.starts_with("día") || unit.starts_with("dia") {
        Duration::days(amount)
    } else if unit.starts_with("semana") {
        Duration::days(7 * amount)
    } else if unit.starts_with("mes") {
        Duration::days(30 * amount)
    } else {
        return None;
    };
    Some(now - offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 28, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn absolute_dates_parse_at_midnight() {
        let resolved = resolve_published_date("15-03-2024", now()).unwrap();
        assert_eq!(resolved, Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn relative_phrases_subtract_from_now() {
        let cases = [
            ("hace 3 días", Duration::days(3)),
            ("hace 1 día", Duration::days(1)),
            ("hace 2 horas", Duration::hours(2)),
            ("hace 45 mins", Duration::minutes(45)),
            ("hace 10 segundos", Duration::seconds(10)),
            ("hace 2 semanas", Duration::days(14)),
            ("hace 1 mes", Duration::days(30)),
            ("hace 3 meses", Duration::days(90)),
        ];
        for (raw, offset) in cases {
            assert_eq!(
                resolve_published_date(raw, now()),
                Some(now() - offset),
                "case {raw:?}"
            );
        }
    }

    #[test]
    fn garbage_dates_resolve_to_none() {
        assert_eq!(resolve_published_date("ayer", now()), None);
        assert_eq!(resolve_published_date("hace muchos años", now()), None);
        assert_eq!(resolve_published_date("2024-03-15", now()), None);
    }

    #[test]
    fn response_body_parses_into_articles() {
        let body = r#"{
            "news_results": [
                {
                    "title": "Educación superior en Chile",
                    "snippet": "Nuevo informe...",
                    "date": "hace 2 horas",
                    "link": "https://noticias.cl/a",
                    "thumbnail": "https://noticias.cl/a.jpg"
                },
                {
                    "title": "Sin fecha ni snippet",
                    "date": "quién sabe",
                    "link": "https://noticias.cl/b"
                }
            ]
        }"#
        .as_bytes();
        let articles = parse_news_results(body, now()).unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title, "Educación superior en Chile");
        assert_eq!(
            articles[0].published_at,
            Some(now() - Duration::hours(2))
        );
        assert_eq!(articles[1].snippet, "");
        assert_eq!(articles[1].thumbnail, None);
        assert_eq!(articles[1].published_at, None);
    }

    #[test]
    fn missing_news_results_key_yields_empty_list() {
        let articles = parse_news_results(b"{}", now()).unwrap();
        assert!(articles.is_empty());
    }
}
