//! Archive link discovery on a fetched index page.

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use tracing::{info, warn};
use url::Url;
use vij_core::{file_name_from_url, Artifact, YearPolicy};

use crate::AdapterError;

/// Extract every `a[href]` target ending in `extension` from `html`,
/// deriving the partition key from the filename. Relative, root-relative and
/// protocol-relative links all resolve against `page_url`. Links without an
/// extractable key are discarded with a warning; page order is preserved.
pub fn discover_archive_links(
    html: &str,
    page_url: &str,
    extension: &str,
    policy: YearPolicy,
    discovered_at: DateTime<Utc>,
) -> Result<Vec<Artifact>, AdapterError> {
    let selector =
        Selector::parse("a[href]").map_err(|e| AdapterError::Message(e.to_string()))?;
    let base = Url::parse(page_url)
        .map_err(|e| AdapterError::Message(format!("bad page url {page_url:?}: {e}")))?;
    let document = Html::parse_document(html);
    let extension = extension.to_ascii_lowercase();

    let mut artifacts = Vec::new();
    for node in document.select(&selector) {
        let Some(href) = node.value().attr("href") else {
            continue;
        };
        if !href.to_ascii_lowercase().ends_with(&extension) {
            continue;
        }
        let url = match base.join(href) {
            Ok(url) => String::from(url),
            Err(e) => {
                warn!(href, error = %e, "unresolvable archive link, discarding");
                continue;
            }
        };
        let file_name = file_name_from_url(&url);
        match policy.extract(&file_name) {
            Some(year) => artifacts.push(Artifact::new(url, year, discovered_at)),
            None => {
                warn!(file_name, "no partition key in archive link, discarding");
            }
        }
    }
    info!(
        page_url,
        count = artifacts.len(),
        "discovered archive links"
    );
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PAGE_URL: &str = "https://datosabiertos.mineduc.cl/matricula-en-educacion-superior/";

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 28, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn discovers_rar_links_with_partition_keys_in_page_order() {
        let html = r#"
            <html><body>
              <a href="/usuarios/20240628_Data_2023_WEB.rar">2023</a>
              <a href="https://cdn.mineduc.cl/files/2022.rar">2022</a>
              <a href="/docs/notas_tecnicas.pdf">notes</a>
            </body></html>
        "#;
        let artifacts =
            discover_archive_links(html, PAGE_URL, ".rar", YearPolicy::default(), ts()).unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].partition_key, 2023);
        assert_eq!(
            artifacts[0].source_url,
            "https://datosabiertos.mineduc.cl/usuarios/20240628_Data_2023_WEB.rar"
        );
        assert_eq!(artifacts[0].file_name, "20240628_Data_2023_WEB.rar");
        assert_eq!(artifacts[1].partition_key, 2022);
    }

    #[test]
    fn link_without_year_is_discarded_without_affecting_the_rest() {
        let html = r#"
            <a href="/files/sin_anno.rar">?</a>
            <a href="/files/2021.rar">2021</a>
        "#;
        let artifacts =
            discover_archive_links(html, PAGE_URL, ".rar", YearPolicy::default(), ts()).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].partition_key, 2021);
    }

    #[test]
    fn protocol_relative_and_parent_links_resolve_against_the_page() {
        let html = r#"
            <a href="//cdn.mineduc.cl/files/2022.rar">2022</a>
            <a href="../usuarios/2021.rar">2021</a>
        "#;
        let artifacts =
            discover_archive_links(html, PAGE_URL, ".rar", YearPolicy::default(), ts()).unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(
            artifacts[0].source_url,
            "https://cdn.mineduc.cl/files/2022.rar"
        );
        assert_eq!(
            artifacts[1].source_url,
            "https://datosabiertos.mineduc.cl/usuarios/2021.rar"
        );
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let html = r#"<a href="/files/2020.RAR">2020</a>"#;
        let artifacts =
            discover_archive_links(html, PAGE_URL, ".rar", YearPolicy::default(), ts()).unwrap();
        assert_eq!(artifacts.len(), 1);
    }
}
