//! Macrocenter: same REST search API family as Migros, walked with a few
//! categories in flight at once.

use crate::http::{self, RetryPolicy, WINDOWS_USER_AGENT};
use crate::models::Source;
use crate::pagination::page_cap;
use crate::price::kurus_to_tl;
use crate::scrapers::traits::ScraperTrait;
use crate::scrapers::types::ScrapeOptions;
use crate::scrapers::{first_of, first_string, value_f64, value_string};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

const SEARCH_URL: &str = "https://www.macrocenter.com.tr/rest/products/search";
const PAGE_SIZE: usize = 100;
const MAX_WORKERS: usize = 5;
const MAX_PAGES: usize = 100;
const PAGE_DELAY: Duration = Duration::from_millis(100);

/// Category id -> top-level category name
pub const CATEGORIES: [(u64, &str); 15] = [
    (30000000071332, "Meyve & Sebze"),
    (30000000071351, "Süt Ürünleri & Kahvaltılık"),
    (30000000070965, "Et & Tavuk & Balık"),
    (30000000071031, "Temel Gıda"),
    (30000000070760, "Atıştırmalık"),
    (30000000071352, "Dondurma"),
    (30000000070802, "İçecek"),
    (30000000071422, "Unlu Mamul & Tatlı"),
    (30000000071209, "Homemade by Macrocenter"),
    (30000000071219, "Temizlik"),
    (30000000071625, "Kozmetik"),
    (30000000071280, "Bebek Ürünleri"),
    (30000000071467, "Ev & Yaşam & Evcil Hayvan"),
    (30000000071325, "Çiçek & Bahçe"),
    (30000000070871, "Elektronik"),
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MacrocenterProduct {
    pub category: String,
    pub subcategory: String,
    pub name: String,
    pub brand: String,
    #[serde(rename = "SKU")]
    pub sku: String,
    pub price: f64,
    pub regular_price: f64,
    pub discount_rate: f64,
    pub unit_price: String,
    pub status: String,
    pub date: String,
}

/// `(pageCount, storeProductInfos)` from a search response's `data` block
pub fn page_data(response: &Value) -> (usize, &[Value]) {
    let data = response.get("data");
    let page_count = data
        .and_then(|d| d.get("pageCount"))
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(1);
    let items = data
        .and_then(|d| d.get("storeProductInfos"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    (page_count, items)
}

pub fn parse_product(item: &Value, category: &str, date: &str) -> MacrocenterProduct {
    let kurus = |key: &str| item.get(key).and_then(value_f64).map(kurus_to_tl).unwrap_or(0.0);

    MacrocenterProduct {
        category: category.to_string(),
        subcategory: item.pointer("/category/name").map(value_string).unwrap_or_default(),
        name: first_string(item, &["name"]),
        brand: item.pointer("/brand/name").map(value_string).unwrap_or_default(),
        sku: first_string(item, &["sku"]),
        price: kurus("shownPrice"),
        regular_price: kurus("regularPrice"),
        discount_rate: first_of(item, &["discountRate"]).and_then(value_f64).unwrap_or(0.0),
        unit_price: first_string(item, &["unitPrice"]),
        status: first_string(item, &["status"]),
        date: date.to_string(),
    }
}

/// Walk one category: page 0, then the rest of its `pageCount`, at most `max_pages` pages.
///
/// A failed page comes back as `Value::Null`; on page 0 that means no products.
pub async fn collect_category<F, Fut>(
    name: &str,
    date: &str,
    max_pages: usize,
    delay: Duration,
    mut fetch_page: F,
) -> Vec<MacrocenterProduct>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Value>,
{
    let first = fetch_page(0).await;
    let has_data = first.get("data").and_then(Value::as_object).is_some_and(|d| !d.is_empty());
    if !has_data {
        return Vec::new();
    }

    let (page_count, items) = page_data(&first);
    let page_count = page_count.min(max_pages);
    let mut products: Vec<_> = items.iter().map(|item| parse_product(item, name, date)).collect();

    for page in 1..page_count {
        let response = fetch_page(page).await;
        let (_, items) = page_data(&response);
        products.extend(items.iter().map(|item| parse_product(item, name, date)));
        tokio::time::sleep(delay).await;
    }

    info!("  OK {}: {} products ({} pages)", name, products.len(), page_count);
    products
}

/// Macrocenter scraper implementation
pub struct MacrocenterScraper {
    client: Client,
    workers: usize,
    delay: Duration,
    max_pages: usize,
    date: String,
}

impl MacrocenterScraper {
    pub fn new(options: &ScrapeOptions) -> Result<Self> {
        let headers = http::headers(&[
            ("accept", "application/json"),
            ("referer", "https://www.macrocenter.com.tr/"),
        ]);
        let client = http::build_client(WINDOWS_USER_AGENT, headers, Duration::from_secs(15))?;
        Ok(Self {
            client,
            workers: MAX_WORKERS,
            delay: options.delay_or(PAGE_DELAY),
            max_pages: page_cap(MAX_PAGES, options.max_pages),
            date: options.date_str(),
        })
    }

    /// One page's `data` block; a failed page reads as empty
    async fn fetch_page(&self, category_id: u64, page: usize) -> Value {
        let params = [
            ("category-id", category_id.to_string()),
            ("page-size", PAGE_SIZE.to_string()),
            ("page", page.to_string()),
        ];
        match http::get_json(&self.client, SEARCH_URL, &params, RetryPolicy::new(1, Duration::ZERO)).await {
            Ok(response) => response,
            Err(e) => {
                warn!("  ! Page error (category={}, page={}): {}", category_id, page, e);
                Value::Null
            }
        }
    }

    async fn scrape_category(&self, category_id: u64, name: &str) -> Vec<MacrocenterProduct> {
        info!("  -> Started: {} (ID: {})", name, category_id);
        collect_category(name, &self.date, self.max_pages, self.delay, |page| {
            self.fetch_page(category_id, page)
        })
        .await
    }
}

#[async_trait]
impl ScraperTrait for MacrocenterScraper {
    type Row = MacrocenterProduct;

    async fn scrape(&self) -> Result<Vec<MacrocenterProduct>> {
        info!("{} categories to scan ({} in parallel)", CATEGORIES.len(), self.workers);

        let per_category: Vec<Vec<MacrocenterProduct>> = stream::iter(
            CATEGORIES
                .into_iter()
                .map(|(id, name)| self.scrape_category(id, name))
                .collect::<Vec<_>>(),
        )
            .buffered(self.workers)
            .collect()
            .await;

        let products: Vec<_> = per_category.into_iter().flatten().collect();
        if products.is_empty() {
            warn!("No products found.");
        }
        Ok(products)
    }

    fn source(&self) -> Source {
        Source::Macrocenter
    }
}
