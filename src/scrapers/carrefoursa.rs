//! CarrefourSA: the listings only render in a browser.
//!
//! Each top-level category page links to its sub-category listings; every
//! listing is an infinite scroll read once it stops growing.

use crate::http::WINDOWS_USER_AGENT;
use crate::models::Source;
use crate::price::round_to;
use crate::scrapers::browser::BrowserSession;
use crate::scrapers::traits::ScraperTrait;
use crate::scrapers::types::ScrapeOptions;
use crate::scrapers::{css, select_text};
use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

const MARKET_URL: &str = "https://www.carrefoursa.com";
const PAGE_SETTLE: Duration = Duration::from_secs(5);
const SCROLL_PAUSE: Duration = Duration::from_secs(3);

pub const CATEGORIES: [&str; 16] = [
    "/meyve-sebze/c/1014",
    "/et-tavuk-balik/c/1044",
    "/sut-urunleri/c/1310",
    "/kahvaltilik-urunler/c/1363",
    "/temel-gida/c/1110",
    "/atistirmalik/c/1493",
    "/hazir-yemek-donuk-urunler/c/1064",
    "/firin/c/1275",
    "/icecekler/c/1409",
    "/saglikli-yasam/c/1938",
    "/dondurma/c/1260",
    "/bebek-urunleri/c/1846",
    "/pet-shop/c/2054",
    "/temizlik-urunleri/c/1556",
    "/kisisel-bakim/c/1674",
    "/elektronik/c/2286",
];

static SUBCATEGORY: LazyLock<Selector> = LazyLock::new(|| css("span.cat-title a[href]"));
static CARD: LazyLock<Selector> = LazyLock::new(|| css("div.product-card"));
static NAME: LazyLock<Selector> = LazyLock::new(|| css("h3.item-name"));
static PRICE: LazyLock<Selector> = LazyLock::new(|| css("span.item-price[content]"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CarrefourProduct {
    pub product_name: String,
    #[serde(rename = "price (TL)")]
    pub price: f64,
}

/// Absolute links to the full listing of each sub-category
pub fn subcategory_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&SUBCATEGORY)
        .filter_map(|a| a.value().attr("href"))
        .map(|href| {
            if href.starts_with('/') {
                format!("{}{}", MARKET_URL, href)
            } else {
                href.to_string()
            }
        })
        .collect()
}

/// Cards with a name and a non-zero machine-readable price
pub fn parse_cards(html: &str) -> Vec<CarrefourProduct> {
    let document = Html::parse_document(html);
    document
        .select(&CARD)
        .filter_map(|card| {
            let name = select_text(card, &NAME).filter(|n| !n.is_empty())?;
            let price: f64 = card.select(&PRICE).next()?.value().attr("content")?.trim().parse().ok()?;
            let price = round_to(price, 2);
            (price != 0.0).then_some(CarrefourProduct { product_name: name, price })
        })
        .collect()
}

fn read_listing(session: &BrowserSession, url: &str, settle: Duration) -> Result<String> {
    session.goto(url, settle)?;
    session.scroll_to_bottom(SCROLL_PAUSE)?;
    session.html()
}

fn scrape_blocking(headed: bool, settle: Duration) -> Result<Vec<CarrefourProduct>> {
    let session = BrowserSession::launch(headed, WINDOWS_USER_AGENT)?;
    let mut products = Vec::new();

    for category in CATEGORIES {
        let html = match read_listing(&session, &format!("{}{}", MARKET_URL, category), settle) {
            Ok(html) => html,
            Err(e) => {
                warn!("⚠️ {}: {:#}", category, e);
                continue;
            }
        };

        let links = subcategory_links(&html);
        info!("count categories for {}: {}", category, links.len());

        for url in links {
            match read_listing(&session, &url, settle) {
                Ok(html) => products.extend(parse_cards(&html)),
                Err(e) => warn!("⚠️ {}: {:#}", url, e),
            }
        }
        info!("📦 {} products so far", products.len());
    }

    Ok(products)
}

/// CarrefourSA scraper implementation
pub struct CarrefourSaScraper {
    headed: bool,
    settle: Duration,
}

impl CarrefourSaScraper {
    pub fn new(options: &ScrapeOptions) -> Self {
        Self {
            headed: options.headed,
            settle: options.delay_or(PAGE_SETTLE),
        }
    }
}

#[async_trait]
impl ScraperTrait for CarrefourSaScraper {
    type Row = CarrefourProduct;

    async fn scrape(&self) -> Result<Vec<CarrefourProduct>> {
        let (headed, settle) = (self.headed, self.settle);
        tokio::task::spawn_blocking(move || scrape_blocking(headed, settle))
            .await
            .context("Browser task panicked")?
    }

    fn source(&self) -> Source {
        Source::CarrefourSa
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_category_links_are_absolute() {
        let html = r#"<div>
            <span class="cat-title"><a href="/taze-meyve/c/1015">Meyve</a></span>
            <span class="cat-title"><a href="https://www.carrefoursa.com/sebze/c/1025">Sebze</a></span>
            <span class="cat-title">Başlık</span>
        </div>"#;
        assert_eq!(
            subcategory_links(html),
            vec![
                "https://www.carrefoursa.com/taze-meyve/c/1015",
                "https://www.carrefoursa.com/sebze/c/1025"
            ]
        );
    }

    #[test]
    fn cards_need_name_and_price() {
        let html = r#"
            <div class="product-card"><h3 class="item-name"> Muz
                Yerli Kg </h3><span class="item-price" content=" 64.906 ">64,90 TL</span></div>
            <div class="product-card"><h3 class="item-name">Tükendi</h3><span class="item-price" content="0"></span></div>
            <div class="product-card"><h3 class="item-name">Bozuk</h3><span class="item-price" content="abc"></span></div>
            <div class="product-card"><span class="item-price" content="10.00"></span></div>
        "#;
        assert_eq!(
            parse_cards(html),
            vec![CarrefourProduct { product_name: "Muz Yerli Kg".into(), price: 64.91 }]
        );
    }

    #[test]
    fn csv_header_matches_snapshot_format() {
        let mut writer = csv::Writer::from_writer(vec![]);
        writer.serialize(CarrefourProduct { product_name: "Muz".into(), price: 64.9 }).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text.lines().next(), Some("product_name,price (TL)"));
    }
}
