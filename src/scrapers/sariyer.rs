//! Sarıyer Market: nopCommerce category tree plus the AJAX product filter endpoint.

use crate::http::{self, FetchError, RetryPolicy, ACCEPT_HTML, CHROME_USER_AGENT};
use crate::models::{Category, Source};
use crate::price::round_to;
use crate::scrapers::catalog::CatalogSource;
use crate::scrapers::{first_of, first_string, value_f64};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const BASE_URL: &str = "https://www.sariyermarket.com";
const CATEGORY_URL: &str = "https://www.sariyermarket.com/OBComponents/GetHomePageCategories";
const PRODUCT_URL: &str = "https://www.sariyermarket.com/Catalog/OBAjaxFilterProducts";
pub const PAGE_SIZE: usize = 24;
const RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(2));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SariyerProduct {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub brand: String,
    pub category: String,
    pub category_id: String,
    pub regular_price: f64,
    pub shown_price: f64,
    pub discount_rate: i64,
    pub unit: String,
    pub status: String,
    pub image_url: String,
    pub product_url: String,
}

/// The CSV keeps only what the price series needs
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SariyerCsvRow {
    pub name: String,
    pub shown_price: f64,
}

/// Flatten the category tree, parents before their children
pub fn parse_categories(response: &Value) -> Result<Vec<Category>> {
    let roots = match response {
        Value::Array(list) => list.as_slice(),
        Value::Object(_) => first_of(response, &["categories", "data", "items"])
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        other => bail!("Unexpected category response: {}", other),
    };

    let mut categories = Vec::new();
    let mut seen = HashSet::new();
    walk(roots, None, &mut seen, &mut categories);

    if categories.is_empty() {
        bail!("No categories found");
    }
    Ok(categories)
}

fn walk(nodes: &[Value], parent: Option<(&str, &str)>, seen: &mut HashSet<String>, out: &mut Vec<Category>) {
    for node in nodes.iter().filter(|n| n.is_object()) {
        let id = first_string(node, &["Id", "id"]);
        let name = match first_string(node, &["Name", "name"]) {
            n if n.is_empty() => id.clone(),
            n => n,
        };

        if !id.is_empty() && seen.insert(id.clone()) {
            let mut category = Category::new(&id, &name)
                .with_url(format!("{}/search?cid={}&adv=True&isc=True&sid=True", BASE_URL, id));
            if let Some((parent_id, parent_name)) = parent {
                category = category.with_parent(parent_id, parent_name);
            }
            category.product_count = first_of(node, &["ProductCount", "productCount"]).and_then(Value::as_u64);
            out.push(category);
        }

        if let Some(children) = first_of(node, &["SubCategories", "children"]).and_then(Value::as_array) {
            walk(children, Some((id.as_str(), name.as_str())), seen, out);
        }
    }
}

/// Form body for one (0-indexed) page of a category
pub fn filter_form(category_id: &str, page: usize) -> Vec<(&'static str, String)> {
    vec![
        ("q", String::new()),
        ("cid", category_id.to_string()),
        ("isc", "true".into()),
        ("mid", "0".into()),
        ("vid", "0".into()),
        ("sid", "true".into()),
        ("adv", "true".into()),
        ("asv", "false".into()),
        ("PagingFilteringContext[PageNumber]", page.to_string()),
        ("PagingFilteringContext[PageSize]", PAGE_SIZE.to_string()),
    ]
}

/// Products on a page and, when the site says so, the total page count
pub fn product_page(response: &Value) -> (&[Value], Option<usize>) {
    match response {
        Value::Array(list) => (list.as_slice(), None),
        Value::Object(_) => {
            let products = first_of(response, &["products", "Products", "items"])
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let total_pages = first_of(response, &["totalPages", "TotalPages"])
                .and_then(value_f64)
                .map(|n| n as usize);
            (products, total_pages)
        }
        _ => (&[][..], None),
    }
}

fn price(raw: &Value, keys: &[&str]) -> f64 {
    first_of(raw, keys).and_then(value_f64).map(|p| round_to(p, 2)).unwrap_or(0.0)
}

pub fn parse_product(raw: &Value, category: &Category) -> SariyerProduct {
    let shown = price(raw, &["Price"]);
    let regular = match price(raw, &["OldPrice", "Price"]) {
        r if r == 0.0 => shown,
        r => r,
    };
    let discount_rate = if regular > shown && shown > 0.0 {
        ((regular - shown) / regular * 100.0).round() as i64
    } else {
        0
    };

    let mut image_url = first_string(raw, &["PictureThumbnailUrl", "PictureUrl"]);
    if !image_url.is_empty() && !image_url.starts_with("http") {
        image_url = format!("{}{}", BASE_URL, image_url);
    }
    let slug = first_string(raw, &["SeName", "seName"]);
    let in_stock = raw.get("InStock").and_then(Value::as_bool).unwrap_or(false);

    SariyerProduct {
        id: first_string(raw, &["Id", "id"]),
        sku: first_string(raw, &["Sku", "sku"]),
        name: first_string(raw, &["Name", "name"]),
        brand: first_string(raw, &["BrandName", "brandName"]),
        category: category.name.clone(),
        category_id: category.id.clone(),
        regular_price: regular,
        shown_price: shown,
        discount_rate,
        unit: first_string(raw, &["QuantityUnitName"]),
        status: if in_stock { "IN_STOCK" } else { "OUT_OF_STOCK" }.to_string(),
        image_url,
        product_url: if slug.is_empty() {
            String::new()
        } else {
            format!("{}/{}", BASE_URL, slug)
        },
    }
}

/// Page through one category from page 0.
///
/// Stops at `page_limit` pages (0 = unlimited), on an empty page, on a failed
/// request, once `totalPages` is reached, or after a short page.
pub async fn collect_products<F, Fut>(category: &Category, delay: Duration, page_limit: usize, mut fetch_page: F) -> Vec<SariyerProduct>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Value, FetchError>>,
{
    let mut products = Vec::new();
    let mut page = 0;

    loop {
        if page_limit > 0 && page >= page_limit {
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

        let (raw, total_pages) = product_page(&response);
        if raw.is_empty() {
            break;
        }
        products.extend(raw.iter().map(|p| parse_product(p, category)));
        debug!("Category '{}' - page {} -> {} products (total: {})", category.name, page, raw.len(), products.len());

        if total_pages.is_some_and(|total| page + 1 >= total) || raw.len() < PAGE_SIZE {
            break;
        }
        page += 1;
        tokio::time::sleep(delay).await;
    }

    products
}

pub struct SariyerCatalog {
    client: Client,
}

impl SariyerCatalog {
    pub fn new() -> Result<Self> {
        let mut headers = http::storefront_headers(&format!("{}/", BASE_URL), ACCEPT_HTML);
        headers.extend(http::headers(&[("origin", BASE_URL)]));
        let client = http::build_client(CHROME_USER_AGENT, headers, Duration::from_secs(30))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CatalogSource for SariyerCatalog {
    type Product = SariyerProduct;
    type CsvRow = SariyerCsvRow;

    fn source(&self) -> Source {
        Source::Sariyer
    }

    fn default_delay(&self) -> Duration {
        Duration::from_millis(700)
    }

    fn dedup_column(&self) -> &'static str {
        "name"
    }

    fn csv_row(&self, product: &SariyerProduct) -> SariyerCsvRow {
        SariyerCsvRow { name: product.name.clone(), shown_price: product.shown_price }
    }

    fn matches(&self, category: &Category, wanted: &str) -> bool {
        category.id == wanted || category.name == wanted
    }

    async fn categories(&self) -> Result<Vec<Category>> {
        let response = http::get_json(&self.client, CATEGORY_URL, &[], RETRY)
            .await
            .context("Could not fetch the category list")?;
        let categories = parse_categories(&response)?;
        info!("Total categories: {}", categories.len());
        Ok(categories)
    }

    async fn products(&self, category: &Category, delay: Duration, page_limit: usize) -> Result<Vec<SariyerProduct>> {
        let products = collect_products(category, delay, page_limit, |page| {
            let form = filter_form(&category.id, page);
            async move { http::post_form_json(&self.client, PRODUCT_URL, &form, RETRY).await }
        })
        .await;
        Ok(products)
    }
}
