//! Migros Türkiye via its storefront REST search API.
//!
//! Top-level category ids are fixed; sub-categories come from the
//! `kategoriler` aggregation group of each top-level search response.

use crate::http::{self, FetchError, RetryPolicy, ACCEPT_JSON, CHROME_USER_AGENT};
use crate::models::{Category, Source};
use crate::price::kurus_to_tl;
use crate::scrapers::catalog::CatalogSource;
use crate::scrapers::{first_of, first_string, value_f64, value_string};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const BASE_URL: &str = "https://www.migros.com.tr";
const SEARCH_URL: &str = "https://www.migros.com.tr/rest/products/search";
const DEFAULT_SORT: &str = "onerilenler";
const RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(2));
const CATEGORY_PAUSE: Duration = Duration::from_millis(300);

/// Top-level ids that answer the search endpoint directly
pub const TOP_LEVEL_CATEGORIES: [(&str, &str); 13] = [
    ("2", "Meyve, Sebze"),
    ("3", "Et, Tavuk, Balık"),
    ("4", "Süt, Kahvaltılık"),
    ("5", "Temel Gıda"),
    ("6", "İçecek"),
    ("7", "Deterjan, Temizlik"),
    ("8", "Kişisel Bakım, Kozmetik, Sağlık"),
    ("9", "Bebek"),
    ("10", "Ev, Yaşam"),
    ("158", "Oyuncak"),
    ("160", "Evcil Hayvan"),
    ("165", "Kitap, Dergi, Gazete"),
    ("166", "Elektronik"),
];

const IMAGE_PRIORITY: [&str; 3] = ["PRODUCT_LIST", "PRODUCT_DETAIL", "PRODUCT_HD"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MigrosProduct {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub brand: String,
    pub category: String,
    pub regular_price: f64,
    pub shown_price: f64,
    pub discount_rate: f64,
    pub unit: String,
    pub status: String,
    pub image_url: String,
    pub product_url: String,
}

/// Sub-categories listed in a top-level search response
pub fn parse_subcategories(response: &Value, parent_id: &str, parent_name: &str) -> Vec<Category> {
    let groups = response
        .pointer("/data/aggregationGroups")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    groups
        .iter()
        .filter(|g| g.get("requestParamKey").and_then(Value::as_str) == Some("kategoriler"))
        .flat_map(|g| g.get("aggregationInfos").and_then(Value::as_array).into_iter().flatten())
        .filter_map(|info| {
            let id = first_of(info, &["requestParameter", "id"]).map(value_string)?;
            let count = info.get("count").and_then(Value::as_u64).unwrap_or(0);
            if count == 0 {
                return None;
            }
            let name = first_string(info, &["label"]);
            let mut category = Category::new(id, name).with_parent(parent_id, parent_name);
            category.product_count = Some(count);
            Some(category)
        })
        .collect()
}

/// Product array wherever this response version keeps it
pub fn product_list(response: &Value) -> &[Value] {
    [
        response.pointer("/data/storeProductInfos"),
        response.get("storeProductInfos"),
        response.pointer("/data/products"),
        response.get("products"),
    ]
    .into_iter()
    .flatten()
    .filter_map(Value::as_array)
    .find(|list| !list.is_empty())
    .map(Vec::as_slice)
    .unwrap_or_default()
}

fn pick_image(raw: &Value) -> String {
    let images = raw.get("images").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    let url_of = |img: &Value| img.get("url").and_then(Value::as_str).map(str::to_string);

    IMAGE_PRIORITY
        .iter()
        .find_map(|kind| {
            images
                .iter()
                .find(|img| img.get("imageType").and_then(Value::as_str) == Some(*kind))
                .and_then(url_of)
        })
        .or_else(|| images.first().and_then(url_of))
        .unwrap_or_default()
}

fn price_tl(raw: &Value, keys: &[&str]) -> f64 {
    first_of(raw, keys).and_then(value_f64).map(kurus_to_tl).unwrap_or(0.0)
}

/// Normalize one raw product; prices arrive in kuruş
pub fn parse_product(raw: &Value, category_name: &str) -> MigrosProduct {
    let brand = match raw.get("brand") {
        Some(Value::Object(b)) => b.get("name").map(value_string).unwrap_or_default(),
        Some(Value::Null) | None => String::new(),
        Some(other) => value_string(other),
    };
    let category = raw
        .pointer("/category/name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .unwrap_or(category_name)
        .to_string();
    let pretty_name = first_string(raw, &["prettyName"]);

    MigrosProduct {
        id: first_string(raw, &["id", "sku"]),
        sku: first_string(raw, &["sku"]),
        name: first_string(raw, &["name"]),
        brand,
        category,
        regular_price: price_tl(raw, &["regularPrice", "shownPrice"]),
        shown_price: price_tl(raw, &["shownPrice", "regularPrice"]),
        discount_rate: first_of(raw, &["discountRate"]).and_then(value_f64).unwrap_or(0.0),
        unit: first_string(raw, &["unit"]),
        status: first_string(raw, &["status", "saleStatus"]),
        image_url: pick_image(raw),
        product_url: if pretty_name.is_empty() {
            String::new()
        } else {
            format!("{}/{}", BASE_URL, pretty_name)
        },
    }
}

/// Search parameters for a (sub-)category; the page is appended per request
pub fn base_params(category: &Category) -> Vec<(&'static str, String)> {
    match &category.parent_id {
        Some(parent) => vec![
            ("category-id", parent.clone()),
            ("kategoriler", category.id.clone()),
            ("sirala", DEFAULT_SORT.to_string()),
        ],
        None => vec![("category-id", category.id.clone()), ("sirala", DEFAULT_SORT.to_string())],
    }
}

/// Page through one category from `sayfa=1` until an empty page, a failed
/// request, or `page_limit` pages (0 = unlimited)
pub async fn collect_products<F, Fut>(category: &Category, delay: Duration, page_limit: usize, mut fetch_page: F) -> Vec<MigrosProduct>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Value, FetchError>>,
{
    let mut products = Vec::new();
    let mut page = 1;

    loop {
        if page_limit > 0 && page > page_limit {
            break;
        }

        let response = match fetch_page(page).await {
            Ok(response) => response,
            Err(e @ FetchError::Forbidden(_)) => {
                warn!("{} - try increasing --delay", e);
                break;
            }
            Err(e) => {
                error!("All attempts failed for '{}' page {}: {}", category.name, page, e);
                break;
            }
        };

        let raw = product_list(&response);
        if raw.is_empty() {
            break;
        }
        products.extend(raw.iter().map(|p| parse_product(p, &category.name)));
        debug!("Category '{}' - page {} -> {} products (total: {})", category.name, page, raw.len(), products.len());

        page += 1;
        tokio::time::sleep(delay).await;
    }

    products
}

pub struct MigrosCatalog {
    client: Client,
}

impl MigrosCatalog {
    pub fn new() -> Result<Self> {
        let mut headers = http::storefront_headers(&format!("{}/", BASE_URL), ACCEPT_JSON);
        headers.extend(http::headers(&[
            ("x-device-pwa", "true"),
            ("x-forwarded-rest", "true"),
            ("x-pwa", "true"),
            ("origin", BASE_URL),
        ]));
        let client = http::build_client(CHROME_USER_AGENT, headers, Duration::from_secs(30))?;
        Ok(Self { client })
    }

    async fn search(&self, params: &[(&str, String)]) -> Result<Value, FetchError> {
        http::get_json(&self.client, SEARCH_URL, params, RETRY).await
    }

    async fn subcategories(&self, parent_id: &str, parent_name: &str) -> Vec<Category> {
        let params = [
            ("category-id", parent_id.to_string()),
            ("sayfa", "1".to_string()),
            ("sirala", DEFAULT_SORT.to_string()),
        ];
        match self.search(&params).await {
            Ok(response) => {
                let subs = parse_subcategories(&response, parent_id, parent_name);
                debug!("Top-level category '{}' (id={}): {} subcategories", parent_name, parent_id, subs.len());
                subs
            }
            Err(e) => {
                error!("Failed to fetch aggregations for top-level category {}: {}", parent_id, e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl CatalogSource for MigrosCatalog {
    type Product = MigrosProduct;
    type CsvRow = MigrosProduct;

    fn source(&self) -> Source {
        Source::Migros
    }

    fn default_delay(&self) -> Duration {
        Duration::from_millis(500)
    }

    fn dedup_column(&self) -> &'static str {
        "id"
    }

    fn csv_row(&self, product: &MigrosProduct) -> MigrosProduct {
        product.clone()
    }

    async fn categories(&self) -> Result<Vec<Category>> {
        let mut all = Vec::new();
        let mut seen = HashSet::new();

        for (id, name) in TOP_LEVEL_CATEGORIES {
            info!("Fetching subcategories for '{}' (id={})...", name, id);
            let subs = self.subcategories(id, name).await;
            tokio::time::sleep(CATEGORY_PAUSE).await;

            if subs.is_empty() {
                // Scrape the top-level section without a sub filter
                if seen.insert(id.to_string()) {
                    all.push(Category::new(id, name));
                }
                continue;
            }
            for sub in subs {
                if seen.insert(sub.id.clone()) {
                    all.push(sub);
                }
            }
        }

        info!("Total scrapable categories: {}", all.len());
        Ok(all)
    }

    async fn products(&self, category: &Category, delay: Duration, page_limit: usize) -> Result<Vec<MigrosProduct>> {
        let base = base_params(category);
        let products = collect_products(category, delay, page_limit, |page| {
            let mut params = base.clone();
            params.push(("sayfa", page.to_string()));
            async move { self.search(&params).await }
        })
        .await;
        Ok(products)
    }
}
