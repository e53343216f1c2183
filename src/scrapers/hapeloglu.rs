//! Hapeloglu: server-rendered category pages behind Cloudflare.
//!
//! The "N Ürün" total is rendered by JavaScript and usually absent from the raw
//! HTML, so pagination is driven by what each page returns: an empty page, a
//! short page, or the site wrapping back to page 1.

use crate::http::{self, FetchError, RetryPolicy, ACCEPT_HTML, CHROME_USER_AGENT};
use crate::models::Source;
use crate::pagination::{page_cap, SeenIds};
use crate::price::{discount_pct, parse_price};
use crate::scrapers::traits::ScraperTrait;
use crate::scrapers::types::ScrapeOptions;
use crate::scrapers::{css, select_text, text_of};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{error, info, warn};

pub const BASE_URL: &str = "https://www.hapeloglu.com";
pub const PRODUCTS_PER_PAGE: usize = 80;
const MAX_PAGES: usize = 50;
const MAX_RETRIES: u32 = 3;
const REQUEST_DELAY: Duration = Duration::from_millis(1500);
const CHALLENGE_WAIT: Duration = Duration::from_secs(5);

/// Main categories from the sidebar (depth 1)
pub const CATEGORIES: [(&str, &str); 13] = [
    ("Meyve, Sebze", "/meyve-sebze"),
    ("Et, Tavuk, Balık", "/et-tavuk-balik"),
    ("Süt, Kahvaltılık", "/sut-kahvaltilik"),
    ("İçecek", "/icecek"),
    ("Temel Gıda", "/temel-gida"),
    ("Fırın, Pastane", "/firin-pastane"),
    ("Atıştırmalık", "/atistirmalik"),
    ("Deterjan, Temizlik", "/deterjan-temizlik"),
    ("Kağıt, Islak Mendil", "/kagit-islak-mendil"),
    ("Kişisel Bakım, Kozmetik", "/kisisel-bakim-kozmetik"),
    ("Bebek", "/bebek"),
    ("Ev, Yaşam", "/ev-yasam"),
    ("Evcil Hayvan", "/evcil-hayvan"),
];

static ITEM: LazyLock<Selector> = LazyLock::new(|| css(".productItem"));
static NAME: LazyLock<Selector> = LazyLock::new(|| css(".productName"));
static PRICE: LazyLock<Selector> = LazyLock::new(|| css(".discountPriceSpan"));
static REGULAR: LazyLock<Selector> = LazyLock::new(|| css(".regularPriceSpan"));
static LINK: LazyLock<Selector> = LazyLock::new(|| css("a.detailLink"));
static IMAGE: LazyLock<Selector> = LazyLock::new(|| css(".productImage img"));
static OUT_OF_STOCK: LazyLock<Selector> =
    LazyLock::new(|| css(".outOfStock, .tukendi, [class*='tukendi']"));
static COUNT_HOLDERS: LazyLock<Selector> = LazyLock::new(|| css("span, div, p"));
static COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s*Ürün").expect("valid regex"));

/// One product card
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HapelogluProduct {
    pub product_id: String,
    pub name: String,
    pub current_price: Option<f64>,
    pub regular_price: Option<f64>,
    pub is_discounted: bool,
    pub discount_pct: Option<f64>,
    pub category: String,
    pub product_url: Option<String>,
    pub image_url: Option<String>,
    pub in_stock: bool,
    pub scrape_date: String,
    pub scrape_timestamp: String,
}

/// Parse all `.productItem` cards from a single page.
/// Cards without a name or product id are skipped.
pub fn extract_products(html: &str, category: &str) -> Vec<HapelogluProduct> {
    let document = Html::parse_document(html);
    let mut products = Vec::new();

    for item in document.select(&ITEM) {
        let name = select_text(item, &NAME).filter(|n| !n.is_empty());
        let link = item.select(&LINK).next();
        let product_id = link.and_then(|l| l.value().attr("data-id")).map(str::to_string);

        let (Some(name), Some(product_id)) = (name, product_id) else {
            continue;
        };

        let current_price = select_text(item, &PRICE).and_then(|t| parse_price(&t));
        let regular_price = select_text(item, &REGULAR).and_then(|t| parse_price(&t));
        let discount = match (current_price, regular_price) {
            (Some(current), Some(regular)) => discount_pct(current, regular),
            _ => None,
        };

        let href = link.and_then(|l| l.value().attr("href")).unwrap_or("");
        let image_url = item.select(&IMAGE).next().and_then(|img| {
            img.value()
                .attr("data-original")
                .or_else(|| img.value().attr("src"))
                .map(str::to_string)
        });

        products.push(HapelogluProduct {
            product_id,
            name,
            current_price,
            regular_price,
            is_discounted: discount.is_some(),
            discount_pct: discount,
            category: category.to_string(),
            product_url: (!href.is_empty()).then(|| format!("{}{}", BASE_URL, href)),
            image_url,
            in_stock: item.select(&OUT_OF_STOCK).next().is_none(),
            scrape_date: String::new(),
            scrape_timestamp: String::new(),
        });
    }

    products
}

/// Total product count from an "N Ürün" label, 0 when the page doesn't carry one
pub fn total_product_count(html: &str) -> usize {
    let document = Html::parse_document(html);
    document
        .select(&COUNT_HOLDERS)
        .map(text_of)
        .filter(|text| text.chars().count() < 50)
        .find_map(|text| COUNT_RE.captures(&text).and_then(|c| c[1].parse().ok()))
        .unwrap_or(0)
}

pub fn page_url(slug: &str, page: usize) -> String {
    if page > 1 {
        format!("{}{}?sayfa={}", BASE_URL, slug, page)
    } else {
        format!("{}{}", BASE_URL, slug)
    }
}

/// Walk one category page by page until it runs dry.
///
/// Stops on a failed fetch, an empty page, a page shorter than
/// [`PRODUCTS_PER_PAGE`], a wrap-around to already seen ids, or `max_pages`.
pub async fn collect_category<F, Fut>(category: &str, max_pages: usize, mut fetch_page: F) -> Vec<HapelogluProduct>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Option<String>>,
{
    let mut seen = SeenIds::new();
    let mut products = Vec::new();
    let mut page = 1;

    while page <= max_pages {
        let Some(html) = fetch_page(page).await else {
            break;
        };

        let page_products = extract_products(&html, category);
        info!("  Page {}: {} products", page, page_products.len());

        let Some(first) = page_products.first() else {
            break;
        };
        if seen.wrapped_around(&first.product_id) {
            info!("  Wrap-around detected at page {}, stopping.", page);
            break;
        }

        seen.extend(page_products.iter().map(|p| p.product_id.as_str()));
        let full_page = page_products.len() >= PRODUCTS_PER_PAGE;
        products.extend(page_products);

        if !full_page {
            break;
        }
        page += 1;
    }

    info!("  Total: {} from {} ({} pages)", products.len(), category, page.min(max_pages));
    products
}

/// Drop repeated product ids (first wins), sort by category and name, and
/// stamp every row with the run's date and timestamp
pub fn finalize(mut products: Vec<HapelogluProduct>, date: &str, timestamp: &str) -> Vec<HapelogluProduct> {
    let before = products.len();
    let mut ids = HashSet::new();
    products.retain(|p| ids.insert(p.product_id.clone()));

    let dupes = before - products.len();
    if dupes > 0 {
        info!("Removed {} duplicates ({} -> {})", dupes, before, products.len());
    }

    products.sort_by(|a, b| a.category.cmp(&b.category).then_with(|| a.name.cmp(&b.name)));
    for p in &mut products {
        p.scrape_date = date.to_string();
        p.scrape_timestamp = timestamp.to_string();
    }
    products
}

/// Fetch one page, up to [`MAX_RETRIES`] attempts.
///
/// Every attempt waits `delay` first. A challenge page waits `challenge_wait`
/// before the next try, other retryable errors `delay * attempt`.
pub async fn fetch_with_retries<F, Fut>(url: &str, delay: Duration, challenge_wait: Duration, mut fetch: F) -> Option<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, FetchError>>,
{
    for attempt in 1..=MAX_RETRIES {
        tokio::time::sleep(delay).await;
        let e = match fetch().await.and_then(|html| http::reject_challenge(url, html)) {
            Ok(html) => return Some(html),
            Err(e) => e,
        };

        if !e.is_retryable() {
            error!("  {}", e);
            return None;
        }
        if let FetchError::Challenge(_) = e {
            warn!("  Cloudflare challenge on attempt {}", attempt);
            tokio::time::sleep(challenge_wait).await;
        } else {
            warn!("  Attempt {}/{} failed for {}: {}", attempt, MAX_RETRIES, url, e);
            if attempt < MAX_RETRIES {
                tokio::time::sleep(delay * attempt).await;
            }
        }
    }

    error!("  FAILED after {} attempts: {}", MAX_RETRIES, url);
    None
}

/// Hapeloglu scraper implementation
pub struct HapelogluScraper {
    client: Client,
    delay: Duration,
    max_pages: usize,
    date: String,
}

impl HapelogluScraper {
    pub fn new(options: &ScrapeOptions) -> Result<Self> {
        let mut headers = http::storefront_headers(&format!("{}/", BASE_URL), ACCEPT_HTML);
        headers.extend(http::headers(&[("connection", "keep-alive")]));
        let client = http::build_client(CHROME_USER_AGENT, headers, Duration::from_secs(15))?;

        Ok(Self {
            client,
            delay: options.delay_or(REQUEST_DELAY),
            max_pages: page_cap(MAX_PAGES, options.max_pages),
            date: options.date_str(),
        })
    }

    async fn fetch_page(&self, url: &str) -> Option<String> {
        let single = RetryPolicy::new(1, Duration::ZERO);
        fetch_with_retries(url, self.delay, CHALLENGE_WAIT, || http::get_text(&self.client, url, single)).await
    }
}

#[async_trait]
impl ScraperTrait for HapelogluScraper {
    type Row = HapelogluProduct;

    async fn scrape(&self) -> Result<Vec<HapelogluProduct>> {
        let mut all = Vec::new();

        for (name, slug) in CATEGORIES {
            info!("Category: {} ({})", name, slug);
            let products = collect_category(name, self.max_pages, |page| {
                let url = page_url(slug, page);
                async move { self.fetch_page(&url).await }
            })
            .await;
            all.extend(products);
        }

        if all.is_empty() {
            warn!("No products scraped!");
            return Ok(all);
        }

        let timestamp = format!("{}T{}", self.date, Local::now().format("%H:%M:%S%:z"));
        let products = finalize(all, &self.date, &timestamp);

        let categories: HashSet<_> = products.iter().map(|p| p.category.as_str()).collect();
        info!("DONE - {} unique products across {} categories", products.len(), categories.len());
        Ok(products)
    }

    fn source(&self) -> Source {
        Source::Hapeloglu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: &str, name: &str) -> String {
        format!(
            r#"<div class="productItem"><div class="productName">{name}</div>
               <span class="discountPriceSpan">10,00 TL</span>
               <a class="detailLink" data-id="{id}" href="/{id}"></a></div>"#
        )
    }

    fn page(ids: std::ops::Range<usize>) -> String {
        ids.map(|i| card(&i.to_string(), &format!("Urun {}", i))).collect()
    }

    #[test]
    fn page_url_omits_first_page_param() {
        assert_eq!(page_url("/bebek", 1), "https://www.hapeloglu.com/bebek");
        assert_eq!(page_url("/bebek", 3), "https://www.hapeloglu.com/bebek?sayfa=3");
    }

    #[test]
    fn skips_cards_without_id() {
        let html = r#"<div class="productItem"><div class="productName">Adsız</div></div>"#;
        assert!(extract_products(html, "X").is_empty());
    }

    #[tokio::test]
    async fn stops_on_wrap_around() {
        let mut requested = Vec::new();
        let products = collect_category("Meyve", 50, |p| {
            requested.push(p);
            // Page 3 wraps back to page 1
            let html = match p {
                1 | 3 => page(0..80),
                2 => page(80..160),
                _ => String::new(),
            };
            async move { Some(html) }
        })
        .await;

        assert_eq!(products.len(), 160);
        assert_eq!(requested, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn stops_on_short_page() {
        let products = collect_category("Meyve", 50, |p| {
            let html = if p == 1 { page(0..80) } else { page(80..85) };
            async move { Some(html) }
        })
        .await;
        assert_eq!(products.len(), 85);
    }

    #[tokio::test]
    async fn respects_page_cap_and_failed_fetch() {
        let products = collect_category("Meyve", 2, |p| {
            let html = page(p * 100..p * 100 + 80);
            async move { Some(html) }
        })
        .await;
        assert_eq!(products.len(), 160);

        let products = collect_category("Meyve", 50, |_| async { None }).await;
        assert!(products.is_empty());
    }

    #[test]
    fn finalize_dedups_and_sorts() {
        let mut a = extract_products(&card("1", "Zeytin"), "Temel Gıda");
        a.extend(extract_products(&card("2", "Ayran"), "İçecek"));
        a.extend(extract_products(&card("1", "Zeytin"), "Bebek"));
        a.extend(extract_products(&card("3", "Bal"), "İçecek"));

        let done = finalize(a, "2026-01-05", "2026-01-05T09:30:00+03:00");
        let names: Vec<_> = done.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Ayran", "Bal", "Zeytin"]);
        assert!(done.iter().all(|p| p.scrape_date == "2026-01-05"));
        assert_eq!(done[0].scrape_timestamp, "2026-01-05T09:30:00+03:00");
    }

    const CHALLENGE: &str = "<html><head><title>Just a moment...</title></head></html>";

    /// Answers from a canned list, counting calls
    async fn fetch_from(responses: Vec<Result<String, FetchError>>) -> (Option<String>, usize) {
        let mut responses = responses.into_iter();
        let mut calls = 0;
        let page = fetch_with_retries("https://www.hapeloglu.com/bebek", Duration::ZERO, Duration::ZERO, || {
            calls += 1;
            let next = responses.next().unwrap_or_else(|| Ok(CHALLENGE.to_string()));
            async move { next }
        })
        .await;
        (page, calls)
    }

    #[tokio::test]
    async fn challenge_page_is_retried() {
        let (page, calls) = fetch_from(vec![Ok(CHALLENGE.to_string()), Ok(card("1", "Bal"))]).await;
        assert_eq!(page, Some(card("1", "Bal")));
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn persistent_challenge_gives_up() {
        let (page, calls) = fetch_from(vec![]).await;
        assert_eq!(page, None);
        assert_eq!(calls, MAX_RETRIES as usize);
    }

    #[tokio::test]
    async fn forbidden_is_not_retried() {
        let (page, calls) = fetch_from(vec![Err(FetchError::Forbidden("x".into()))]).await;
        assert_eq!(page, None);
        assert_eq!(calls, 1);
    }

    #[test]
    fn rows_carry_the_configured_date() {
        let options = ScrapeOptions { date: chrono::NaiveDate::from_ymd_opt(2026, 1, 5), ..Default::default() };
        assert_eq!(HapelogluScraper::new(&options).unwrap().date, "2026-01-05");
    }
}
