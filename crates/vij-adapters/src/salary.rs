//! Salary-by-category card parsing for the salary aggregator page.

use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::warn;

use crate::AdapterError;

/// CSS selectors for one salary card. The aggregator ships generated class
/// names that rotate between deploys, so the selectors live in the job
/// registry rather than in code.
#[derive(Debug, Clone, Deserialize)]
pub struct SalaryCardSelectors {
    pub card: String,
    pub category: String,
    pub average: String,
    pub sample: String,
}

/// One parsed salary card: a category, its average salary and the number of
/// reported salaries the average is based on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalaryCard {
    pub category: String,
    pub average_salary: i64,
    pub sample_size: i64,
}

/// Parse every salary card on the page. Cards missing any of the three
/// values are logged and dropped rather than failing the scrape.
pub fn parse_salary_cards(
    html: &str,
    selectors: &SalaryCardSelectors,
) -> Result<Vec<SalaryCard>, AdapterError> {
    let card_sel = parse_selector(&selectors.card)?;
    let category_sel = parse_selector(&selectors.category)?;
    let average_sel = parse_selector(&selectors.average)?;
    let sample_sel = parse_selector(&selectors.sample)?;

    let document = Html::parse_document(html);
    let mut cards = Vec::new();
    for (idx, card) in document.select(&card_sel).enumerate() {
        let category = card
            .select(&category_sel)
            .next()
            .map(|n| n.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());
        let average = card
            .select(&average_sel)
            .next()
            .and_then(|n| digits_only(&n.text().collect::<String>()));
        let sample = card
            .select(&sample_sel)
            .next()
            .and_then(|n| first_digit_run(&n.text().collect::<String>()));

        match (category, average, sample) {
            (Some(category), Some(average_salary), Some(sample_size)) => cards.push(SalaryCard {
                category,
                average_salary,
                sample_size,
            }),
            (category, average, sample) => {
                warn!(
                    card = idx + 1,
                    has_category = category.is_some(),
                    has_average = average.is_some(),
                    has_sample = sample.is_some(),
                    "incomplete salary card dropped"
                );
            }
        }
    }
    Ok(cards)
}

fn parse_selector(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector)
        .map_err(|e| AdapterError::Message(format!("bad selector {selector:?}: {e}")))
}

/// All digits in the text concatenated, e.g. "$1.119.921" -> 1119921.
fn digits_only(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// First contiguous digit run, e.g. "basado en 3.206 salarios" -> 3.
fn first_digit_run(text: &str) -> Option<i64> {
    text.split(|c: char| !c.is_ascii_digit())
        .find(|run| !run.is_empty())
        .and_then(|run| run.parse().ok())
}

/// Build the per-category detail link the way the site does: accents folded,
/// commas removed, whitespace collapsed to hyphens, lowercase.
pub fn category_link(base_url: &str, category: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), slugify(category))
}

pub fn slugify(text: &str) -> String {
    let folded: String = text
        .chars()
        .map(|c| match c {
            'á' | 'Á' => 'a',
            'é' | 'É' => 'e',
            'í' | 'Í' => 'i',
            'ó' | 'Ó' => 'o',
            'ú' | 'Ú' => 'u',
            other => other,
        })
        .filter(|&c| c != ',')
        .collect();
    folded
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}
