// Citation extraction

use crate::domain::{Citation, MAX_CITATIONS, MAX_TITLE_CHARS};
use crate::port::{DriverError, LinkInfo, PageDriver};
use std::collections::HashSet;
use url::Url;

/// Host without a leading `www.`
pub fn domain_of(url: &Url) -> Option<String> {
    url.host_str()
        .map(|h| h.strip_prefix("www.").unwrap_or(h).to_lowercase())
}

fn is_same_site(domain: &str, host: &str) -> bool {
    let host = host.strip_prefix("www.").unwrap_or(host);
    domain == host || domain.ends_with(&format!(".{}", host))
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Turn raw anchors into citations: http(s) only, fragment dropped,
/// unique by url in first-encounter order, at most `MAX_CITATIONS`.
/// Links back to `exclude_host` (and its subdomains) are skipped.
pub fn build_citations(links: &[LinkInfo], exclude_host: Option<&str>) -> Vec<Citation> {
    let mut seen = HashSet::new();
    let mut citations = Vec::new();

    for link in links {
        if citations.len() >= MAX_CITATIONS {
            break;
        }
        let Ok(mut url) = Url::parse(link.href.trim()) else {
            continue;
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            continue;
        }
        let Some(domain) = domain_of(&url) else {
            continue;
        };
        if exclude_host.is_some_and(|host| is_same_site(&domain, host)) {
            continue;
        }
        url.set_fragment(None);
        let href = url.to_string();
        if !seen.insert(href.clone()) {
            continue;
        }

        let title = link
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| link.text.trim());
        let title = if title.is_empty() {
            domain.clone()
        } else {
            truncate_chars(&collapse_whitespace(title), MAX_TITLE_CHARS)
        };

        citations.push(Citation {
            position: citations.len() as u32 + 1,
            url: href,
            title,
            domain,
        });
    }
    citations
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Shared fallback: outbound links inside the answer region
pub async fn default_extract(
    page: &dyn PageDriver,
    response_selectors: &[&str],
    own_host: &str,
) -> Result<Vec<Citation>, DriverError> {
    for scope in response_selectors {
        let links = page.links_within(scope).await?;
        let citations = build_citations(&links, Some(own_host));
        if !citations.is_empty() {
            return Ok(citations);
        }
    }
    Ok(Vec::new())
}
