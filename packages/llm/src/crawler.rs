//! Bounded breadth-first web crawler used by the research stage.
//!
//! Shaped after the scraper crate's `fetch_page` + `scrape_all` loop:
//! one fetch at a time, caps enforced by the caller rather than the
//! fetch primitive, and a simple in-memory visited set instead of a
//! pagination cursor.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use scraper::{Html, Selector};
use url::Url;

use crate::LlmError;

/// Hard caps on crawl scope.
#[derive(Debug, Clone, Copy)]
pub struct CrawlLimits {
    /// Maximum number of pages to fetch.
    pub max_pages: u32,
    /// Maximum link-following depth from the seed URL.
    pub max_depth: u32,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for CrawlLimits {
    fn default() -> Self {
        Self {
            max_pages: 20,
            max_depth: 2,
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl CrawlLimits {
    /// Builds crawl limits from `v2_max_pages`/`v2_max_depth` environment
    /// overrides, falling back to [`CrawlLimits::default`] for either one
    /// that isn't set or doesn't parse.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_pages: env_u32("V2_MAX_PAGES").unwrap_or(defaults.max_pages),
            max_depth: env_u32("V2_MAX_DEPTH").unwrap_or(defaults.max_depth),
            ..defaults
        }
    }
}

fn env_u32(var: &str) -> Option<u32> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

/// One successfully fetched and parsed page.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    /// The final URL fetched (after redirects).
    pub url: String,
    /// The page title, if present.
    pub title: Option<String>,
    /// Visible text content, whitespace-normalized.
    pub text: String,
}

/// A same-origin, robots.txt-respecting bounded crawler.
pub struct Crawler {
    client: reqwest::Client,
    limits: CrawlLimits,
}

impl Crawler {
    /// Creates a crawler with the given limits.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Crawl`] if the HTTP client cannot be built.
    pub fn new(limits: CrawlLimits) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(limits.request_timeout)
            .user_agent("capi-demo-crawler/0.1 (+research stage)")
            .build()
            .map_err(|e| LlmError::Crawl(e.to_string()))?;

        Ok(Self { client, limits })
    }

    /// Crawls from `seed_url`, staying on the same host, following links
    /// breadth-first up to `max_depth`, and stopping at `max_pages`.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Crawl`] if the seed URL is invalid/unreachable
    /// or the crawl produced zero usable pages.
    pub async fn crawl(&self, seed_url: &str) -> Result<Vec<CrawledPage>, LlmError> {
        let seed =
            Url::parse(seed_url).map_err(|e| LlmError::Crawl(format!("invalid URL: {e}")))?;
        let host = seed
            .host_str()
            .ok_or_else(|| LlmError::Crawl("URL has no host".to_string()))?
            .to_string();

        if is_disallowed_by_robots(&self.client, &seed).await {
            return Err(LlmError::Crawl(format!(
                "{host} disallows crawling via robots.txt"
            )));
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back((seed, 0u32));
        visited.insert(normalize(&queue[0].0));

        let mut pages = Vec::new();

        while let Some((url, depth)) = queue.pop_front() {
            if pages.len() as u32 >= self.limits.max_pages {
                break;
            }

            let Ok(resp) = self.client.get(url.clone()).send().await else {
                continue;
            };
            let Ok(body) = resp.text().await else {
                continue;
            };

            let document = Html::parse_document(&body);
            let page = CrawledPage {
                url: url.to_string(),
                title: extract_title(&document),
                text: extract_text(&document),
            };

            if depth < self.limits.max_depth {
                for link in extract_links(&document, &url) {
                    if link.host_str() == Some(host.as_str()) {
                        let key = normalize(&link);
                        if visited.insert(key) {
                            queue.push_back((link, depth + 1));
                        }
                    }
                }
            }

            pages.push(page);
        }

        if pages.is_empty() {
            return Err(LlmError::Crawl(format!(
                "{seed_url} produced zero usable pages"
            )));
        }

        Ok(pages)
    }
}

fn normalize(url: &Url) -> String {
    let mut s = url.as_str().trim_end_matches('/').to_string();
    s.make_ascii_lowercase();
    s
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

fn extract_text(document: &Html) -> String {
    let Ok(selector) = Selector::parse("body") else {
        return String::new();
    };
    document
        .select(&selector)
        .next()
        .map(|el| {
            el.text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

fn extract_links(document: &Html, base: &Url) -> Vec<Url> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .collect()
}

/// Checks `/robots.txt` for a blanket `Disallow: /` under `User-agent: *`.
///
/// This is a minimal check, not a full robots.txt parser: it is a gate
/// against crawling sites that opt out entirely, not a path-level rule
/// engine.
async fn is_disallowed_by_robots(client: &reqwest::Client, seed: &Url) -> bool {
    let Ok(mut robots_url) = seed.join("/robots.txt") else {
        return false;
    };
    robots_url.set_query(None);

    let Ok(resp) = client.get(robots_url).send().await else {
        return false;
    };
    let Ok(body) = resp.text().await else {
        return false;
    };

    let mut applies_to_all = false;
    for line in body.lines() {
        let line = line.trim();
        if let Some(agent) = line.strip_prefix("User-agent:") {
            applies_to_all = agent.trim() == "*";
        } else if applies_to_all {
            if let Some(rule) = line.strip_prefix("Disallow:") {
                if rule.trim() == "/" {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_trailing_slash_and_lowercases() {
        let a = Url::parse("https://Example.com/Path/").unwrap();
        let b = Url::parse("https://example.com/path").unwrap();
        assert_eq!(normalize(&a), normalize(&b));
    }

    #[test]
    fn extract_title_and_text_from_document() {
        let html = "<html><head><title>Hello</title></head><body><p>World  there</p></body></html>";
        let doc = Html::parse_document(html);
        assert_eq!(extract_title(&doc).as_deref(), Some("Hello"));
        assert_eq!(extract_text(&doc), "World there");
    }

    #[test]
    fn extract_links_resolves_relative_urls() {
        let html = r#"<html><body><a href="/about">About</a><a href="https://other.test/x">Other</a></body></html>"#;
        let doc = Html::parse_document(html);
        let base = Url::parse("https://example.test/").unwrap();
        let links = extract_links(&doc, &base);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].as_str(), "https://example.test/about");
    }
}
