//! Söz Sanal Market (afyonsoz.com): category paths discovered breadth-first
//! from the home page, products read from heading + price text blocks.

use crate::http::{self, FetchError, RetryPolicy, ACCEPT_HTML, WINDOWS_USER_AGENT};
use crate::models::Source;
use crate::pagination::page_cap;
use crate::price::parse_price;
use crate::scrapers::traits::ScraperTrait;
use crate::scrapers::types::ScrapeOptions;
use crate::scrapers::{css, text_of};
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

const BASE_URL: &str = "https://www.afyonsoz.com";
const PAGE_DELAY: Duration = Duration::from_millis(250);
const MAX_PAGES: usize = 500;
const NON_PRODUCT_TITLES: [&str; 2] = ["alt kategoriler", "kategoriler"];

static LINKS: LazyLock<Selector> = LazyLock::new(|| css("a[href]"));
static HEADINGS: LazyLock<Selector> = LazyLock::new(|| css("h4, h3"));
static PATH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/hesabim\?path=(\d+)").expect("valid regex"));
static PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d{1,3}(?:\.\d{3})*,\d{2})\s*TL").expect("valid regex"));
static TOTAL_PAGES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\((\d+)\s*Sayfa\)").expect("valid regex"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SozProduct {
    #[serde(rename = "ID")]
    pub id: usize,
    #[serde(rename = "Product Name")]
    pub name: String,
    #[serde(rename = "Price")]
    pub price: f64,
}

/// What one category path yielded
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PathScrape {
    /// `(name, price text)` in page order
    pub products: Vec<(String, String)>,
    /// Category paths linked from any of its pages
    pub discovered: BTreeSet<u64>,
}

pub fn category_url(path_id: u64, page: usize) -> String {
    if page <= 1 {
        format!("{}/hesabim?path={}", BASE_URL, path_id)
    } else {
        format!("{}/hesabim?page={}&path={}", BASE_URL, page, path_id)
    }
}

fn page_text(document: &Html) -> String {
    document
        .root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Page count from the "(N Sayfa)" label, at least 1
pub fn total_pages(html: &str) -> usize {
    let document = Html::parse_document(html);
    TOTAL_PAGES_RE
        .captures(&page_text(&document))
        .and_then(|c| c[1].parse::<usize>().ok())
        .map_or(1, |n| n.max(1))
}

pub fn discover_paths(html: &str) -> BTreeSet<u64> {
    let document = Html::parse_document(html);
    document
        .select(&LINKS)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| PATH_RE.captures(href)?[1].parse().ok())
        .collect()
}

/// Headings with a "1.234,56 TL" price in their parent block, once per page
pub fn parse_products(html: &str) -> Vec<(String, String)> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut products = Vec::new();

    for heading in document.select(&HEADINGS) {
        let name = text_of(heading);
        if name.chars().count() < 2 || NON_PRODUCT_TITLES.contains(&name.to_lowercase().as_str()) {
            continue;
        }
        let Some(container) = heading.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        let Some(price) = PRICE_RE.captures(&text_of(container)).map(|c| c[1].to_string()) else {
            continue;
        };

        if seen.insert((name.clone(), price.clone())) {
            products.push((name, price));
        }
    }

    products
}

/// Breadth-first walk over category paths, deduplicating on (name, price).
/// A path that fails is logged and skipped.
pub async fn crawl<F, Fut>(seeds: BTreeSet<u64>, mut scrape_path: F) -> (Vec<SozProduct>, usize)
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<PathScrape>>,
{
    let mut queue: VecDeque<u64> = seeds.into_iter().collect();
    let mut visited = HashSet::new();
    let mut seen = HashSet::new();
    let mut rows = Vec::new();

    while let Some(path_id) = queue.pop_front() {
        if !visited.insert(path_id) {
            continue;
        }

        info!("Scraping path={} ...", path_id);
        let scraped = match scrape_path(path_id).await {
            Ok(scraped) => scraped,
            Err(e) => {
                warn!("  !! Failed path={}: {:#}", path_id, e);
                continue;
            }
        };
        info!("  -> {} items found on this path", scraped.products.len());

        queue.extend(scraped.discovered.into_iter().filter(|p| !visited.contains(p)));

        for (name, price_text) in scraped.products {
            if !seen.insert((name.clone(), price_text.clone())) {
                continue;
            }
            let price = parse_price(&price_text).unwrap_or(0.0);
            rows.push(SozProduct { id: rows.len() + 1, name, price });
        }
    }

    (rows, visited.len())
}

/// Share of rows priced at zero
pub fn zero_price_ratio(rows: &[SozProduct]) -> (usize, f64) {
    let zero = rows.iter().filter(|r| r.price == 0.0).count();
    let ratio = if rows.is_empty() { 0.0 } else { zero as f64 / rows.len() as f64 };
    (zero, ratio)
}

/// Söz scraper implementation
pub struct SozScraper {
    client: Client,
    delay: Duration,
    max_pages: usize,
}

impl SozScraper {
    pub fn new(options: &ScrapeOptions) -> Result<Self> {
        let headers = http::headers(&[("accept", ACCEPT_HTML)]);
        let client = http::build_client(WINDOWS_USER_AGENT, headers, Duration::from_secs(30))?;
        Ok(Self {
            client,
            delay: options.delay_or(PAGE_DELAY),
            max_pages: page_cap(MAX_PAGES, options.max_pages),
        })
    }

    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        http::get_text(&self.client, url, RetryPolicy::new(1, Duration::ZERO)).await
    }

    async fn scrape_path(&self, path_id: u64) -> Result<PathScrape> {
        let first = self.fetch(&category_url(path_id, 1)).await?;
        let pages = total_pages(&first).min(self.max_pages);

        let mut scraped = PathScrape { products: parse_products(&first), discovered: discover_paths(&first) };

        for page in 2..=pages {
            let html = self.fetch(&category_url(path_id, page)).await?;
            scraped.discovered.extend(discover_paths(&html));
            scraped.products.extend(parse_products(&html));
            tokio::time::sleep(self.delay).await;
        }

        Ok(scraped)
    }
}

#[async_trait]
impl ScraperTrait for SozScraper {
    type Row = SozProduct;

    async fn scrape(&self) -> Result<Vec<SozProduct>> {
        let home = self
            .fetch(&format!("{}/", BASE_URL))
            .await
            .context("Could not load the home page")?;
        let seeds = discover_paths(&home);
        info!("Seed paths from homepage: {}", seeds.len());

        let (rows, visited) = crawl(seeds, |path_id| self.scrape_path(path_id)).await;
        info!("Done. Visited paths: {}", visited);

        let (zero, ratio) = zero_price_ratio(&rows);
        info!("Zero-price rows: {} ({:.6} of {})", zero, ratio, rows.len());
        Ok(rows)
    }

    fn source(&self) -> Source {
        Source::SozSanal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    const PAGE: &str = r#"<html><body>
        <nav><a href="/hesabim?path=12">Meyve</a><a href="/hesabim?path=7&x=1">Süt</a><a href="/sepet">Sepet</a></nav>
        <h3>Alt Kategoriler</h3>
        <div class="urun"><h4>Domates</h4><span>1.250,00 TL</span></div>
        <div class="urun"><h4>Domates</h4><span>1.250,00 TL</span></div>
        <div class="urun"><h4>Biber</h4><span>34,90 TL</span></div>
        <div class="urun"><h4>X</h4><span>1,00 TL</span></div>
        <div class="urun"><h4>Fiyatsız</h4><span>Stokta yok</span></div>
        <p>(3 Sayfa)</p>
    </body></html>"#;

    #[test]
    fn urls_and_page_count() {
        assert_eq!(category_url(12, 1), "https://www.afyonsoz.com/hesabim?path=12");
        assert_eq!(category_url(12, 2), "https://www.afyonsoz.com/hesabim?page=2&path=12");
        assert_eq!(total_pages(PAGE), 3);
        assert_eq!(total_pages("<p>yok</p>"), 1);
    }

    #[test]
    fn finds_paths_and_products() {
        assert_eq!(discover_paths(PAGE), BTreeSet::from([7, 12]));
        assert_eq!(
            parse_products(PAGE),
            vec![
                ("Domates".to_string(), "1.250,00".to_string()),
                ("Biber".to_string(), "34,90".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn crawl_follows_discovered_paths_and_skips_failures() {
        let mut calls = Vec::new();
        let (rows, visited) = crawl(BTreeSet::from([1, 2]), |path| {
            calls.push(path);
            let result = match path {
                1 => Ok(PathScrape {
                    products: vec![("Elma".into(), "10,00".into()), ("Armut".into(), "0,00".into())],
                    discovered: BTreeSet::from([2, 3]),
                }),
                2 => Err(anyhow!("timeout")),
                _ => Ok(PathScrape {
                    products: vec![("Elma".into(), "10,00".into()), ("Elma".into(), "11,00".into())],
                    discovered: BTreeSet::from([1]),
                }),
            };
            async move { result }
        })
        .await;

        assert_eq!(calls, vec![1, 2, 3]);
        assert_eq!(visited, 3);
        let names: Vec<_> = rows.iter().map(|r| (r.id, r.name.as_str(), r.price)).collect();
        assert_eq!(names, vec![(1, "Elma", 10.0), (2, "Armut", 0.0), (3, "Elma", 11.0)]);
        assert_eq!(zero_price_ratio(&rows).0, 1);
    }
}
