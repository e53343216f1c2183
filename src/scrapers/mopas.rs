//! Mopaş: category links discovered on the home page, `?page=N` listings from 0.
//!
//! Past the last page the site serves the final page again.

use crate::http::{self, RetryPolicy, ACCEPT_HTML, WINDOWS_USER_AGENT};
use crate::models::Source;
use crate::pagination::{page_cap, RepeatGuard};
use crate::price::parse_price;
use crate::scrapers::traits::ScraperTrait;
use crate::scrapers::types::ScrapeOptions;
use crate::scrapers::{css, select_text};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::info;

const BASE_URL: &str = "https://mopas.com.tr";
const PAGE_DELAY: Duration = Duration::from_secs(2);
const MAX_PAGES: usize = 500;

static LINKS: LazyLock<Selector> = LazyLock::new(|| css("a[href]"));
static CARD: LazyLock<Selector> = LazyLock::new(|| css("div.card"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| css("a.product-title"));
static PRICE: LazyLock<Selector> = LazyLock::new(|| css("span.sale-price"));
static QUANTITY: LazyLock<Selector> = LazyLock::new(|| css("p.quantity"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MopasProduct {
    pub name: String,
    pub price: Option<f64>,
}

/// Absolute category URLs (`/c/` links), in page order without repeats
pub fn category_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    document
        .select(&LINKS)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| href.contains("/c/"))
        .map(|href| {
            if href.starts_with("http") {
                href.to_string()
            } else {
                format!("{}{}", BASE_URL, href)
            }
        })
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

pub fn page_url(category_url: &str, page: usize) -> String {
    format!("{}?q=%3Arelevance&page={}", category_url, page)
}

/// Cards on one listing page; `None` when the page has no cards at all
pub fn parse_cards(html: &str) -> Option<Vec<MopasProduct>> {
    let document = Html::parse_document(html);
    let cards: Vec<_> = document.select(&CARD).collect();
    if cards.is_empty() {
        return None;
    }

    let products = cards
        .into_iter()
        .filter_map(|card| {
            let title = select_text(card, &TITLE).filter(|t| !t.is_empty())?;
            let quantity = select_text(card, &QUANTITY).unwrap_or_default();
            let price = select_text(card, &PRICE).and_then(|p| parse_price(&p));
            Some(MopasProduct { name: format!("{} {}", title, quantity).trim().to_string(), price })
        })
        .collect();
    Some(products)
}

/// Page through one category (pages counted from 0)
pub async fn collect_category<F, Fut>(max_pages: usize, mut fetch_page: F) -> Vec<MopasProduct>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Option<String>>,
{
    let mut guard = RepeatGuard::new();
    let mut products = Vec::new();

    for page in 0..max_pages {
        let Some(html) = fetch_page(page).await else {
            info!("  Failed to load page {}. Moving to next category.", page + 1);
            break;
        };
        let Some(cards) = parse_cards(&html) else {
            info!("  No more items found on page {}. Category finished.", page + 1);
            break;
        };

        let names: Vec<String> = cards.iter().map(|c| c.name.clone()).collect();
        if guard.is_repeat(names) {
            info!("  Page {} repeats the previous one. End of category.", page + 1);
            break;
        }

        info!("  Scraped {} items.", cards.len());
        products.extend(cards);
    }

    products
}

/// First occurrence of each name wins
pub fn dedup_by_name(products: Vec<MopasProduct>) -> Vec<MopasProduct> {
    let mut seen = HashSet::new();
    products.into_iter().filter(|p| seen.insert(p.name.clone())).collect()
}

/// Mopaş scraper implementation
pub struct MopasScraper {
    client: Client,
    delay: Duration,
    max_pages: usize,
}

impl MopasScraper {
    pub fn new(options: &ScrapeOptions) -> Result<Self> {
        let headers = http::headers(&[("accept", ACCEPT_HTML)]);
        let client = http::build_client(WINDOWS_USER_AGENT, headers, Duration::from_secs(20))?;
        Ok(Self {
            client,
            delay: options.delay_or(PAGE_DELAY),
            max_pages: page_cap(MAX_PAGES, options.max_pages),
        })
    }

    async fn fetch_page(&self, category_url: &str, page: usize) -> Option<String> {
        if page > 0 {
            tokio::time::sleep(self.delay).await;
        }
        http::get_text(&self.client, &page_url(category_url, page), RetryPolicy::new(1, Duration::ZERO))
            .await
            .ok()
    }
}

#[async_trait]
impl ScraperTrait for MopasScraper {
    type Row = MopasProduct;

    async fn scrape(&self) -> Result<Vec<MopasProduct>> {
        let home = http::get_text(&self.client, BASE_URL, RetryPolicy::new(1, Duration::ZERO))
            .await
            .context("Failed to load homepage")?;
        let categories = category_links(&home);
        info!("Found {} categories.", categories.len());

        let mut all = Vec::new();
        for (i, url) in categories.iter().enumerate() {
            info!("--- Scanning Category {}/{}: {} ---", i + 1, categories.len(), url);
            all.extend(collect_category(self.max_pages, |page| self.fetch_page(url, page)).await);
        }

        let unique = dedup_by_name(all);
        info!("Scraped a total of {} unique items.", unique.len());
        Ok(unique)
    }

    fn source(&self) -> Source {
        Source::Mopas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(title: &str, qty: &str, price: &str) -> String {
        format!(
            r#"<div class="card"><a class="product-title" href="/p">{title}</a>
               <p class="quantity">{qty}</p><span class="sale-price">{price}</span></div>"#
        )
    }

    #[test]
    fn discovers_category_links_once() {
        let html = r#"<nav>
            <a href="/meyve-sebze/c/101">Meyve</a>
            <a href="https://mopas.com.tr/sut/c/202">Süt</a>
            <a href="/meyve-sebze/c/101">Meyve</a>
            <a href="/kampanyalar">Kampanya</a>
        </nav>"#;
        assert_eq!(
            category_links(html),
            vec!["https://mopas.com.tr/meyve-sebze/c/101", "https://mopas.com.tr/sut/c/202"]
        );
        assert_eq!(
            page_url("https://mopas.com.tr/sut/c/202", 0),
            "https://mopas.com.tr/sut/c/202?q=%3Arelevance&page=0"
        );
    }

    #[test]
    fn joins_title_and_quantity() {
        let html = format!("{}{}", card("Pınar Süt", "1\u{a0}L", "₺42,50"), card("", "1 Kg", "₺10"));
        let cards = parse_cards(&html).unwrap();
        assert_eq!(cards, vec![MopasProduct { name: "Pınar Süt 1 L".into(), price: Some(42.5) }]);
        assert_eq!(parse_cards("<div class=\"list\"></div>"), None);
    }

    #[tokio::test]
    async fn stops_on_repeated_page() {
        let mut requested = Vec::new();
        let products = collect_category(500, |page| {
            requested.push(page);
            let html = match page {
                0 => card("Elma", "1 Kg", "₺30,00"),
                _ => card("Armut", "1 Kg", "₺45,00"),
            };
            async move { Some(html) }
        })
        .await;

        assert_eq!(requested, vec![0, 1, 2]);
        assert_eq!(products.len(), 2);
    }

    #[test]
    fn dedup_keeps_first_name() {
        let p = |price| MopasProduct { name: "Elma 1 Kg".into(), price: Some(price) };
        assert_eq!(dedup_by_name(vec![p(30.0), p(25.0)]), vec![p(30.0)]);
    }
}
