//! Onur Market (onur360.com): one supermarket listing, read from whatever the
//! page offers first.
//!
//! Order of attempts: embedded state JSON, the HTML product cards, the paged
//! HTML listing, then JSON endpoints linked from the page.

use crate::http::{self, RetryPolicy, ACCEPT_HTML, ACCEPT_JSON, WINDOWS_USER_AGENT};
use crate::models::Source;
use crate::pagination::{page_cap, EmptyStreak};
use crate::price::parse_price;
use crate::scrapers::traits::ScraperTrait;
use crate::scrapers::types::ScrapeOptions;
use crate::scrapers::{css, select_text};
use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

const BASE_URL: &str = "https://www.onur360.com/supermarket";
/// Fewer products than this and the next strategy is tried
const MIN_PRODUCTS: usize = 50;
const WARN_MIN_PRODUCTS: usize = 500;
const ENOUGH_FROM_ENDPOINTS: usize = 900;
const MAX_PAGES: usize = 200;

const NAME_KEYS: [&str; 5] = ["productName", "name", "title", "displayName", "urunAdi"];
const BRAND_KEYS: [&str; 4] = ["brand", "brandName", "manufacturer", "marka"];
const PRICE_KEYS: [&str; 5] = ["price", "currentPrice", "salePrice", "finalPrice", "urunFiyat"];
const PRICE_TEXT_KEYS: [&str; 4] = ["formatted", "display", "priceText", "text"];
const PRICE_VALUE_KEYS: [&str; 6] = ["value", "amount", "price", "current", "sale", "final"];

static STATE_SCRIPTS: LazyLock<Selector> = LazyLock::new(|| css("script#__NEXT_DATA__, script#initial-state"));
static WINDOW_STATE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["window.__INITIAL_STATE__", "window.__NUXT__"]
        .iter()
        .map(|var| Regex::new(&format!(r"(?s){}\s*=\s*(\{{.*?\}});", regex::escape(var))).expect("valid regex"))
        .collect()
});
static CARD: LazyLock<Selector> = LazyLock::new(|| css(".productItem"));
static NAME_TITLED: LazyLock<Selector> = LazyLock::new(|| css(".productName a[title], a[title]"));
static NAME_LINK: LazyLock<Selector> = LazyLock::new(|| css(".productName a"));
static PRICE_TEXT: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [".discountPriceSpan", ".discountPrice", ".newPriceSpan", ".newPrice", ".productPrice"]
        .into_iter()
        .map(css)
        .collect()
});
static PRICE_ATTRS: LazyLock<Vec<(Selector, &'static str)>> = LazyLock::new(|| {
    [
        ("[itemprop='price']", "content"),
        ("[data-price]", "data-price"),
        ("[data-product-price]", "data-product-price"),
        ("[data-lastprice]", "data-lastprice"),
    ]
    .into_iter()
    .map(|(sel, attr)| (css(sel), attr))
    .collect()
});
static BRAND_TEXT: LazyLock<Selector> = LazyLock::new(|| css(".productBrand, .brand"));
static BRAND_ATTR: LazyLock<Selector> = LazyLock::new(|| css("[data-brand]"));
static CURRENCY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"₺\s*[\d.,]+").expect("valid regex"));
static BARCODE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*[-–]\s*\d{8,14}$").expect("valid regex"));
static TOTAL_PAGES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)totalPages\s*[:=]\s*(\d+)",
        r#"(?i)data-totalpages\s*=\s*"(\d+)""#,
        r"(?i)pageCount\s*[:=]\s*(\d+)",
        r"(?i)[?&](?:sayfa|page)=(\d+)",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});
static URLS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>]+"#).expect("valid regex"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OnurProduct {
    #[serde(rename = "Brand")]
    pub brand: String,
    #[serde(rename = "productName")]
    pub name: String,
    #[serde(rename = "Price")]
    pub price: f64,
}

/// Collapse whitespace and drop a trailing barcode ("Çay 1 Kg - 8690000000000")
pub fn clean_name(name: &str) -> String {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    BARCODE_SUFFIX.replace(&collapsed, "").trim().to_string()
}

/// Price from a JSON value that may be a number, a text, or an object wrapping either
pub fn normalize_price(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_price(s),
        Value::Object(map) => PRICE_TEXT_KEYS
            .iter()
            .chain(PRICE_VALUE_KEYS.iter())
            .find_map(|k| map.get(*k))
            .and_then(normalize_price),
        _ => None,
    }
}

fn choose<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find(|v| !v.is_null() && v.as_str() != Some(""))
}

fn product_from_object(map: &Map<String, Value>) -> Option<OnurProduct> {
    let name = clean_name(choose(map, &NAME_KEYS)?.as_str()?);
    if name.is_empty() {
        return None;
    }
    let brand = match choose(map, &BRAND_KEYS) {
        Some(Value::Object(b)) => choose(b, &["name", "title"]).and_then(Value::as_str),
        Some(v) => v.as_str(),
        None => None,
    }
    .unwrap_or_default()
    .trim()
    .to_string();
    let price = normalize_price(choose(map, &PRICE_KEYS)?)?;

    Some(OnurProduct { brand, name, price })
}

/// Every object in the tree that looks like a product
pub fn products_from_json(data: &Value) -> Vec<OnurProduct> {
    fn walk(node: &Value, found: &mut Vec<OnurProduct>) {
        match node {
            Value::Object(map) => {
                if let Some(product) = product_from_object(map) {
                    found.push(product);
                }
                for value in map.values() {
                    walk(value, found);
                }
            }
            Value::Array(items) => items.iter().for_each(|item| walk(item, found)),
            _ => {}
        }
    }

    let mut found = Vec::new();
    walk(data, &mut found);
    found
}

/// State blobs embedded in the page by the frontend framework
pub fn embedded_state(html: &str) -> Vec<Value> {
    let document = Html::parse_document(html);
    let mut sources: Vec<Value> = document
        .select(&STATE_SCRIPTS)
        .filter_map(|script| serde_json::from_str(script.inner_html().trim()).ok())
        .collect();

    for re in WINDOW_STATE.iter() {
        if let Some(state) = re.captures(html).and_then(|c| serde_json::from_str(c[1].trim()).ok()) {
            sources.push(state);
        }
    }
    sources
}

/// Attribute on the card itself or the first descendant carrying it
fn card_attr<'a>(card: ElementRef<'a>, selector: &Selector, attr: &str) -> Option<&'a str> {
    card.value()
        .attr(attr)
        .or_else(|| card.select(selector).next()?.value().attr(attr))
}

fn card_price(card: ElementRef<'_>) -> Option<f64> {
    let from_text = PRICE_TEXT.iter().filter_map(|sel| select_text(card, sel)).filter_map(|t| parse_price(&t));
    let from_attrs = PRICE_ATTRS
        .iter()
        .filter_map(|(sel, attr)| card_attr(card, sel, attr))
        .filter_map(parse_price);

    from_text
        .chain(from_attrs)
        .find(|p| *p > 0.0)
        .or_else(|| {
            let text = card.text().collect::<String>();
            CURRENCY.find(&text).and_then(|m| parse_price(m.as_str())).filter(|p| *p > 0.0)
        })
}

fn card_brand(card: ElementRef<'_>, name: &str) -> String {
    card_attr(card, &BRAND_ATTR, "data-brand")
        .map(str::to_string)
        .or_else(|| select_text(card, &BRAND_TEXT))
        .filter(|b| !b.trim().is_empty())
        .unwrap_or_else(|| name.split(' ').next().unwrap_or_default().to_string())
}

/// `.productItem` cards from a listing page
pub fn products_from_html(html: &str) -> Vec<OnurProduct> {
    let document = Html::parse_document(html);
    let mut products = Vec::new();

    for card in document.select(&CARD) {
        let titled = card.select(&NAME_TITLED).next().and_then(|a| a.value().attr("title")).map(clean_name);
        let name = titled
            .filter(|n| !n.is_empty())
            .or_else(|| select_text(card, &NAME_LINK).map(|n| clean_name(&n)))
            .filter(|n| !n.is_empty());
        let Some(name) = name else {
            continue;
        };
        let Some(price) = card_price(card) else {
            continue;
        };
        let brand = card_brand(card, &name);
        products.push(OnurProduct { brand, name, price });
    }

    products
}

/// Highest page number the page mentions anywhere
pub fn total_pages(html: &str) -> Option<usize> {
    TOTAL_PAGES
        .iter()
        .flat_map(|re| re.captures_iter(html).filter_map(|c| c[1].parse().ok()))
        .max()
}

pub fn page_url(page: usize) -> String {
    if page <= 1 {
        BASE_URL.to_string()
    } else {
        format!("{}?sayfa={}", BASE_URL, page)
    }
}

/// Links in the page that look like catalog endpoints
pub fn candidate_urls(html: &str) -> Vec<String> {
    let mut urls: Vec<String> = URLS
        .find_iter(html)
        .map(|m| m.as_str().to_string())
        .filter(|url| {
            let lower = url.to_lowercase();
            ["api", "product", "urun", "catalog", "search", "listing"].iter().any(|k| lower.contains(k))
        })
        .collect();
    urls.sort();
    urls.dedup();
    urls
}

/// Page through the HTML listing, giving up after two empty pages in a row
pub async fn paginate<F, Fut>(first_html: &str, max_pages: usize, mut fetch_page: F) -> Vec<OnurProduct>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Option<String>>,
{
    let pages = total_pages(first_html).map_or(max_pages, |n| n.min(max_pages));
    let mut streak = EmptyStreak::new(2);
    let mut products = Vec::new();

    for page in 1..=pages {
        let page_products = if page == 1 {
            products_from_html(first_html)
        } else {
            match fetch_page(page).await {
                Some(html) => products_from_html(&html),
                None => Vec::new(),
            }
        };
        let count = page_products.len();
        products.extend(page_products);
        if streak.observe(count) {
            break;
        }
    }

    products
}

/// Drop exact (brand, name, price) repeats, first wins
pub fn dedup(products: Vec<OnurProduct>) -> Vec<OnurProduct> {
    let mut seen = HashSet::new();
    products
        .into_iter()
        .filter(|p| seen.insert((p.brand.clone(), p.name.clone(), p.price.to_bits())))
        .collect()
}

/// Onur scraper implementation
pub struct OnurScraper {
    client: Client,
    max_pages: usize,
}

impl OnurScraper {
    pub fn new(options: &ScrapeOptions) -> Result<Self> {
        let headers = http::storefront_headers(&format!("{}/", BASE_URL), ACCEPT_HTML);
        let client = http::build_client(WINDOWS_USER_AGENT, headers, Duration::from_secs(30))?;
        Ok(Self { client, max_pages: page_cap(MAX_PAGES, options.max_pages) })
    }

    async fn fetch_page(&self, page: usize) -> Option<String> {
        match http::get_text(&self.client, &page_url(page), RetryPolicy::new(1, Duration::ZERO)).await {
            Ok(html) => Some(html),
            Err(e) => {
                debug!("Page {} failed: {}", page, e);
                None
            }
        }
    }

    async fn fetch_json(&self, url: &str) -> Option<Value> {
        let response = self.client.get(url).header("accept", ACCEPT_JSON).send().await.ok()?;
        let text = response.error_for_status().ok()?.text().await.ok()?;
        let text = text.trim();
        if text.starts_with('{') || text.starts_with('[') {
            serde_json::from_str(text).ok()
        } else {
            None
        }
    }
}

#[async_trait]
impl ScraperTrait for OnurScraper {
    type Row = OnurProduct;

    async fn scrape(&self) -> Result<Vec<OnurProduct>> {
        let html = http::get_text(&self.client, BASE_URL, RetryPolicy::default()).await?;

        let mut products: Vec<_> = embedded_state(&html).iter().flat_map(products_from_json).collect();
        info!("Embedded state: {} products", products.len());

        if products.len() < MIN_PRODUCTS {
            products = products_from_html(&html);
            info!("Product cards: {} products", products.len());
        }

        if products.len() < WARN_MIN_PRODUCTS {
            let paginated = paginate(&html, self.max_pages, |page| self.fetch_page(page)).await;
            info!("Paged listing: {} products", paginated.len());
            if paginated.len() > products.len() {
                products = paginated;
            }
        }

        if products.len() < MIN_PRODUCTS {
            for url in candidate_urls(&html) {
                let Some(data) = self.fetch_json(&url).await else {
                    continue;
                };
                let found = products_from_json(&data);
                debug!("{}: {} products", url, found.len());
                if found.len() > products.len() {
                    products = found;
                }
                if products.len() >= ENOUGH_FROM_ENDPOINTS {
                    break;
                }
            }
        }

        let products = dedup(products);
        if products.is_empty() {
            bail!("Could not extract any products from the page.");
        }
        if products.len() < WARN_MIN_PRODUCTS {
            warn!("Only {} products extracted from the page.", products.len());
        }
        Ok(products)
    }

    fn source(&self) -> Source {
        Source::Onur
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cleans_barcode_suffix() {
        assert_eq!(clean_name("  Çaykur   Rize Çay 1 Kg - 8690000000000 "), "Çaykur Rize Çay 1 Kg");
        assert_eq!(clean_name("Süt – 12345678"), "Süt");
        assert_eq!(clean_name("Kola 2,5 L - 42"), "Kola 2,5 L - 42");
    }

    #[test]
    fn normalizes_nested_prices() {
        assert_eq!(normalize_price(&json!(12.5)), Some(12.5));
        assert_eq!(normalize_price(&json!("1.249,90 TL")), Some(1249.9));
        assert_eq!(normalize_price(&json!({"formatted": "₺34,90", "value": 1})), Some(34.9));
        assert_eq!(normalize_price(&json!({"amount": 7})), Some(7.0));
        assert_eq!(normalize_price(&Value::Null), None);
    }

    #[test]
    fn walks_state_for_products() {
        let state = json!({"props": {"pageProps": {"listing": {"items": [
            {"productName": "Ülker Çikolata - 8690504000000", "brand": {"name": "Ülker"}, "price": {"text": "24,50 TL"}},
            {"name": "Eti Burçak", "brandName": "Eti", "salePrice": 19.9},
            {"name": "Kategori", "children": []}
        ]}}}});

        let products = products_from_json(&state);
        assert_eq!(
            products,
            vec![
                OnurProduct { brand: "Ülker".into(), name: "Ülker Çikolata".into(), price: 24.5 },
                OnurProduct { brand: "Eti".into(), name: "Eti Burçak".into(), price: 19.9 },
            ]
        );
    }

    #[test]
    fn reads_next_data_script() {
        let html = r#"<html><head><script id="__NEXT_DATA__" type="application/json">
            {"items": [{"title": "Pınar Süt 1 L", "currentPrice": 39.95}]}
        </script></head><body><script>window.__NUXT__ = {"a": [{"name": "Ayran", "price": 12}]};</script></body></html>"#;

        let products: Vec<_> = embedded_state(html).iter().flat_map(products_from_json).collect();
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].name, "Pınar Süt 1 L");
        assert_eq!(products[0].brand, "");
        assert_eq!(products[1].price, 12.0);
    }

    #[test]
    fn parses_cards_with_fallbacks() {
        let html = r#"
            <div class="productItem" data-brand="Torku">
                <div class="productName"><a href="/p1" title="Torku Banada 400 G - 8690000111111">x</a></div>
                <span class="discountPriceSpan">₺89,90</span>
            </div>
            <div class="productItem">
                <div class="productName"><a href="/p2">Domates Kg</a></div>
                <span itemprop="price" content="29.95"></span>
            </div>
            <div class="productItem">
                <div class="productName"><a href="/p3">Fiyatsız Ürün</a></div>
            </div>
        "#;

        let products = products_from_html(html);
        assert_eq!(products.len(), 2);
        assert_eq!(products[0], OnurProduct { brand: "Torku".into(), name: "Torku Banada 400 G".into(), price: 89.9 });
        assert_eq!(products[1].brand, "Domates");
        assert_eq!(products[1].price, 29.95);
    }

    #[test]
    fn currency_fallback_skips_zero_prices() {
        let html = r#"
            <div class="productItem">
                <div class="productName"><a href="/p4">Ayran 1 L</a></div>
                <p>Sepette ₺15,75</p>
            </div>
            <div class="productItem">
                <div class="productName"><a href="/p5">Tükenen Ürün</a></div>
                <p>₺0,00</p>
            </div>
        "#;

        let products = products_from_html(html);
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name, "Ayran 1 L");
        assert_eq!(products[0].price, 15.75);
    }

    #[test]
    fn total_pages_takes_the_maximum() {
        let html = r#"<a href="?sayfa=2">2</a><a href="?sayfa=12">12</a><div data-totalpages="9"></div>"#;
        assert_eq!(total_pages(html), Some(12));
        assert_eq!(total_pages("<p>tek sayfa</p>"), None);
    }

    #[test]
    fn candidate_urls_filter_by_keyword() {
        let html = r#"<script src="https://cdn.onur360.com/app.js"></script>
            <a href="https://www.onur360.com/api/products?page=1">x</a>"#;
        assert_eq!(candidate_urls(html), vec!["https://www.onur360.com/api/products?page=1".to_string()]);
    }

    #[tokio::test]
    async fn paginate_stops_after_two_empty_pages() {
        let card = |n: usize| {
            format!(r#"<div class="productItem"><div class="productName"><a title="Ürün {n}">u</a></div><span class="newPrice">{n},00 TL</span></div>"#)
        };
        let first = format!("{}<a href=\"?sayfa=50\">50</a>", card(1));

        let mut requested = Vec::new();
        let products = paginate(&first, 200, |page| {
            requested.push(page);
            let html = if page == 3 { card(3) } else { String::new() };
            async move { Some(html) }
        })
        .await;

        assert_eq!(products.len(), 2);
        assert_eq!(requested, vec![2, 3, 4, 5]);
    }

    #[test]
    fn dedup_on_all_three_fields() {
        let p = |price: f64| OnurProduct { brand: "Eti".into(), name: "Burçak".into(), price };
        assert_eq!(dedup(vec![p(1.0), p(1.0), p(2.0)]).len(), 2);
    }
}
