//! Gurmar: plain HTML category pages with `?page=N` pagination.

use crate::http::{self, RetryPolicy, ACCEPT_HTML, WINDOWS_USER_AGENT};
use crate::models::Source;
use crate::pagination::page_cap;
use crate::price::parse_price;
use crate::scrapers::traits::ScraperTrait;
use crate::scrapers::types::ScrapeOptions;
use crate::scrapers::{css, text_of};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{error, info, warn};

const BASE_URL: &str = "https://www.gurmar.com.tr";
/// A full page shows this many product links
const FULL_PAGE: usize = 25;
const MAX_PAGES: usize = 200;
const PAGE_DELAY: Duration = Duration::from_millis(500);
const CATEGORY_DELAY: Duration = Duration::from_secs(1);

pub const CATEGORIES: [(&str, &str); 12] = [
    ("Meyve ve Sebze", "meyve-ve-sebze-c"),
    ("Et ve Tavuk", "et-ve-tavuk-urunleri-c"),
    ("Süt, Kahvaltılık, Sark.", "sut-kahvaltiliklar-sarkuteri-c"),
    ("Temel Gıda", "temel-gida-c"),
    ("İçecekler", "icecekler-c"),
    ("Atıştırmalıklar", "atistirmaliklar-c"),
    ("Bebek Ürünleri", "bebek-urunleri-c"),
    ("Deterjan ve Temizlik", "deterjan-temizlik-c"),
    ("Kişisel Bakım", "kisisel-bakim-ve-hijyen-c"),
    ("Ev ve Yaşam", "ev-yasam-c"),
    ("Kitap, Kırtasiye", "kitap-kirtasiye-oyuncak-c"),
    ("Petshop", "petshop-c"),
];

static LINKS: LazyLock<Selector> = LazyLock::new(|| css("a[href]"));
static HEADING: LazyLock<Selector> = LazyLock::new(|| css("h4"));
static PRODUCT_HREF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/[\w\-]+-\d+-p$").expect("valid regex"));
static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GurmarProduct {
    pub tarih: String,
    pub kategori: String,
    pub product_name: String,
    pub product_price: Option<f64>,
    pub eski_fiyat: Option<f64>,
    pub url: String,
}

/// A product link as it appears on a listing page
#[derive(Debug, Clone, PartialEq)]
pub struct ProductCard {
    pub href: String,
    pub name: String,
    pub price: Option<f64>,
    pub old_price: Option<f64>,
}

/// Count from the "N ürün listeleniyor" banner
pub fn expected_count(html: &str) -> Option<usize> {
    let document = Html::parse_document(html);
    let banner = document
        .root_element()
        .text()
        .find(|t| t.to_lowercase().contains("ürün listeleniyor"))?;
    DIGITS.find(banner)?.as_str().parse().ok()
}

fn price_texts(card: ElementRef<'_>) -> Vec<String> {
    card.text()
        .map(str::trim)
        .filter(|t| !t.is_empty() && t.contains('₺'))
        .map(str::to_string)
        .collect()
}

/// Product links (`/<slug>-<id>-p` holding an `<h4>`) with prices from the surrounding card
pub fn parse_cards(html: &str) -> Vec<ProductCard> {
    let document = Html::parse_document(html);
    let mut cards = Vec::new();

    for link in document.select(&LINKS) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if !PRODUCT_HREF.is_match(href) {
            continue;
        }
        let Some(heading) = link.select(&HEADING).next() else {
            continue;
        };

        let card = link.parent().and_then(ElementRef::wrap).unwrap_or(link);
        let prices = price_texts(card);

        cards.push(ProductCard {
            href: href.to_string(),
            name: text_of(heading),
            price: prices.first().and_then(|p| parse_price(p)),
            old_price: prices.get(1).and_then(|p| parse_price(p)),
        });
    }

    cards
}

/// Page through one category until a page brings nothing new or comes up short
pub async fn collect_category<F, Fut>(category: &str, date: &str, max_pages: usize, mut fetch_page: F) -> Vec<GurmarProduct>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Option<String>>,
{
    let mut seen = HashSet::new();
    let mut products = Vec::new();
    let mut expected = None;

    for page in 1..=max_pages {
        let Some(html) = fetch_page(page).await else {
            break;
        };

        if page == 1 {
            expected = expected_count(&html);
            if let Some(n) = expected {
                info!("  📦 Expected: {}", n);
            }
        }

        let cards = parse_cards(&html);
        let link_count = cards.len();
        let fresh: Vec<_> = cards.into_iter().filter(|c| seen.insert(c.href.clone())).collect();
        if fresh.is_empty() {
            break;
        }

        info!("  📄 Page {}: {} products", page, fresh.len());
        products.extend(fresh.into_iter().filter(|c| !c.name.is_empty()).map(|c| GurmarProduct {
            tarih: date.to_string(),
            kategori: category.to_string(),
            product_name: c.name,
            product_price: c.price,
            eski_fiyat: c.old_price,
            url: format!("{}{}", BASE_URL, c.href),
        }));

        if link_count < FULL_PAGE {
            break;
        }
    }

    match expected {
        Some(n) if n == products.len() => info!("  ✅ {} products", n),
        Some(n) => warn!("  ⚠️ Mismatch! Expected: {} | Scraped: {}", n, products.len()),
        None => {}
    }
    products
}

/// Gurmar scraper implementation
pub struct GurmarScraper {
    client: Client,
    delay: Duration,
    max_pages: usize,
    date: String,
}

impl GurmarScraper {
    pub fn new(options: &ScrapeOptions) -> Result<Self> {
        let headers = http::headers(&[("accept", ACCEPT_HTML)]);
        let client = http::build_client(WINDOWS_USER_AGENT, headers, Duration::from_secs(15))?;
        Ok(Self {
            client,
            delay: options.delay_or(PAGE_DELAY),
            max_pages: page_cap(MAX_PAGES, options.max_pages),
            date: options.date_str(),
        })
    }

    async fn fetch_page(&self, url: &str, page: usize) -> Option<String> {
        if page > 1 {
            tokio::time::sleep(self.delay).await;
        }
        let url = format!("{}?page={}", url, page);
        match http::get_text(&self.client, &url, RetryPolicy::new(1, Duration::ZERO)).await {
            Ok(html) => Some(html),
            Err(e) => {
                error!("  ❌ Error ({}): {}", url, e);
                None
            }
        }
    }
}

#[async_trait]
impl ScraperTrait for GurmarScraper {
    type Row = GurmarProduct;

    async fn scrape(&self) -> Result<Vec<GurmarProduct>> {
        let mut all = Vec::new();

        for (name, slug) in CATEGORIES {
            info!("🔍 Processing: {}", name);
            let url = format!("{}/{}", BASE_URL, slug);
            let products = collect_category(name, &self.date, self.max_pages, |page| {
                let url = url.clone();
                async move { self.fetch_page(&url, page).await }
            })
            .await;
            all.extend(products);
            tokio::time::sleep(CATEGORY_DELAY).await;
        }

        info!("Total {} products", all.len());
        Ok(all)
    }

    fn source(&self) -> Source {
        Source::Gurmar
    }
}
