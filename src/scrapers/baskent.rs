//! Başkent Market: one "all products" listing paged with `?tp=N`.
//!
//! Past the last page the site keeps serving the final page, so a repeated
//! page is the stop signal.

use crate::http::{self, RetryPolicy, ACCEPT_HTML, WINDOWS_USER_AGENT};
use crate::models::Source;
use crate::pagination::{page_cap, RepeatGuard};
use crate::price::parse_price;
use crate::scrapers::traits::ScraperTrait;
use crate::scrapers::types::ScrapeOptions;
use crate::scrapers::{css, select_text};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

const LISTING_URL: &str = "https://www.baskentmarket.com.tr/kategori/tum-urunler";
const MAX_PAGES: usize = 1000;

static SHOWCASE: LazyLock<Selector> = LazyLock::new(|| css("div.showcase"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| css(".showcase-title"));
static PRICE: LazyLock<Selector> = LazyLock::new(|| css(".showcase-price"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaskentProduct {
    #[serde(rename = "ID")]
    pub id: usize,
    #[serde(rename = "Product Name")]
    pub name: String,
    #[serde(rename = "Price")]
    pub price: Option<f64>,
}

pub fn page_url(page: usize) -> String {
    if page <= 1 {
        LISTING_URL.to_string()
    } else {
        format!("{}?tp={}", LISTING_URL, page)
    }
}

/// `(name, price text)` for every showcase card that has both
pub fn parse_showcases(html: &str) -> Vec<(String, String)> {
    let document = Html::parse_document(html);
    document
        .select(&SHOWCASE)
        .filter_map(|card| Some((select_text(card, &TITLE)?, select_text(card, &PRICE)?)))
        .collect()
}

/// Walk the listing until a page fails, comes back empty, or repeats the previous one
pub async fn collect_listing<F, Fut>(max_pages: usize, mut fetch_page: F) -> Vec<BaskentProduct>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Option<String>>,
{
    let mut guard = RepeatGuard::new();
    let mut products = Vec::new();

    for page in 1..=max_pages {
        let Some(html) = fetch_page(page).await else {
            break;
        };
        let cards = parse_showcases(&html);
        if cards.is_empty() || guard.is_repeat(cards.clone()) {
            break;
        }

        for (name, price_text) in cards {
            let price = parse_price(&price_text);
            if price.is_none() {
                warn!("Unparsed price '{}' for {}", price_text, name);
            }
            products.push(BaskentProduct { id: products.len() + 1, name, price });
        }
        info!("Page {}: {} products so far", page, products.len());
    }

    products
}

/// Başkent Market scraper implementation
pub struct BaskentScraper {
    client: Client,
    max_pages: usize,
}

impl BaskentScraper {
    pub fn new(options: &ScrapeOptions) -> Result<Self> {
        let headers = http::headers(&[("accept", ACCEPT_HTML)]);
        let client = http::build_client(WINDOWS_USER_AGENT, headers, Duration::from_secs(20))?;
        Ok(Self { client, max_pages: page_cap(MAX_PAGES, options.max_pages) })
    }

    async fn fetch_page(&self, page: usize) -> Option<String> {
        let url = page_url(page);
        match http::get_text(&self.client, &url, RetryPolicy::new(1, Duration::ZERO)).await {
            Ok(html) => Some(html),
            Err(e) => {
                info!("Stopping at {}: {}", url, e);
                None
            }
        }
    }
}

#[async_trait]
impl ScraperTrait for BaskentScraper {
    type Row = BaskentProduct;

    async fn scrape(&self) -> Result<Vec<BaskentProduct>> {
        let products = collect_listing(self.max_pages, |page| self.fetch_page(page)).await;
        info!("Success: {} items", products.len());
        Ok(products)
    }

    fn source(&self) -> Source {
        Source::Baskent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(names: &[&str]) -> String {
        names
            .iter()
            .map(|n| {
                format!(
                    r#"<div class="showcase"><div class="showcase-title"> {n} </div>
                       <div class="showcase-price">  24,75
                       TL</div></div>"#
                )
            })
            .collect()
    }

    #[test]
    fn page_urls() {
        assert_eq!(page_url(1), LISTING_URL);
        assert_eq!(page_url(2), "https://www.baskentmarket.com.tr/kategori/tum-urunler?tp=2");
    }

    #[test]
    fn cards_need_name_and_price() {
        let html = format!("{}<div class=\"showcase\"><div class=\"showcase-title\">Yarım</div></div>", page(&["Un 1 Kg"]));
        let cards = parse_showcases(&html);
        assert_eq!(cards, vec![("Un 1 Kg".to_string(), "24,75 TL".to_string())]);
    }

    #[tokio::test]
    async fn stops_on_repeated_page() {
        let products = collect_listing(1000, |p| {
            let html = match p {
                1 => page(&["Un", "Şeker"]),
                2 => page(&["Çay"]),
                _ => page(&["Çay"]),
            };
            async move { Some(html) }
        })
        .await;

        let ids: Vec<_> = products.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(products[2].name, "Çay");
        assert_eq!(products[2].price, Some(24.75));
    }

    #[tokio::test]
    async fn stops_on_failed_request() {
        let products = collect_listing(1000, |p| {
            let html = (p == 1).then(|| page(&["Un"]));
            async move { html }
        })
        .await;
        assert_eq!(products.len(), 1);
    }
}
