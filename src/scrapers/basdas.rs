//! Başdaş Online: product groups rendered by an AJAX endpoint, one POST per group id.
//!
//! Rows accumulate in a daily file; a row is only added when its
//! (timestamp, group, name) key is new to that file.

use crate::http::{self, RetryPolicy};
use crate::models::Source;
use crate::pagination::page_cap;
use crate::price::parse_price;
use crate::scrapers::traits::ScraperTrait;
use crate::scrapers::types::{ScrapeOptions, WriteMode};
use crate::scrapers::{css, select_text};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

const BASE_URL: &str = "https://basdasonline.com";
const LIST_URL: &str = "https://basdasonline.com/tab-lists.asp";
/// Group ids 0..=100 are tried
const GROUP_COUNT: usize = 101;
const POST_DELAY: Duration = Duration::ZERO;

static CARD: LazyLock<Selector> = LazyLock::new(|| css(".urun-kutusu"));
static NAME: LazyLock<Selector> = LazyLock::new(|| css("h2 a.kutu-link"));
static PRICE: LazyLock<Selector> = LazyLock::new(|| css("div.urun-fiyat span"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BasdasRow {
    pub tarih: String,
    pub grup_id: u32,
    pub urun_adi: String,
    pub fiyat: f64,
}

/// `(name, price)` for each card with a name and a readable price
pub fn parse_products(html: &str) -> Vec<(String, f64)> {
    let document = Html::parse_document(html);
    document
        .select(&CARD)
        .filter_map(|card| {
            let name = select_text(card, &NAME).filter(|n| !n.is_empty())?;
            let price = select_text(card, &PRICE).and_then(|p| parse_price(&p))?;
            Some((name, price))
        })
        .collect()
}

/// POST every group id in `0..groups` and stamp the rows with `tarih`.
/// A failed group is logged and skipped.
pub async fn collect_groups<F, Fut>(groups: usize, tarih: &str, delay: Duration, mut fetch_group: F) -> Vec<BasdasRow>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<String>>,
{
    let mut rows = Vec::new();

    for group in 0..groups as u32 {
        if group > 0 {
            tokio::time::sleep(delay).await;
        }
        let Some(html) = fetch_group(group).await else {
            continue;
        };

        let products = parse_products(&html);
        if !products.is_empty() {
            info!("[OK] grupID={} -> {} products", group, products.len());
        }
        rows.extend(products.into_iter().map(|(name, price)| BasdasRow {
            tarih: tarih.to_string(),
            grup_id: group,
            urun_adi: name,
            fiyat: price,
        }));
    }

    info!("Total rows found: {}", rows.len());
    rows
}

/// Başdaş scraper implementation
pub struct BasdasScraper {
    client: Client,
    delay: Duration,
    groups: usize,
    date: String,
}

impl BasdasScraper {
    pub fn new(options: &ScrapeOptions) -> Result<Self> {
        let origin = format!("{}/", BASE_URL);
        let headers = http::headers(&[
            ("accept", "*/*"),
            ("x-requested-with", "XMLHttpRequest"),
            ("referer", origin.as_str()),
            ("origin", BASE_URL),
        ]);
        let client = http::build_client("Mozilla/5.0", headers, Duration::from_secs(25))?;
        Ok(Self {
            client,
            delay: options.delay_or(POST_DELAY),
            groups: page_cap(GROUP_COUNT, options.max_pages),
            date: options.date_str(),
        })
    }

    async fn fetch_group(&self, group: u32) -> Option<String> {
        let form = [("grupID", group.to_string())];
        let response = self.client.post(LIST_URL).form(&form).send().await;
        let html = match response {
            Ok(r) => r.text().await,
            Err(e) => Err(e),
        };
        match html {
            Ok(html) => Some(html),
            Err(e) => {
                warn!("[ERR] grupID={} -> {}", group, e);
                None
            }
        }
    }
}

#[async_trait]
impl ScraperTrait for BasdasScraper {
    type Row = BasdasRow;

    async fn scrape(&self) -> Result<Vec<BasdasRow>> {
        // The session cookie from the home page is required by the list endpoint
        http::get_text(&self.client, &format!("{}/", BASE_URL), RetryPolicy::new(1, Duration::ZERO))
            .await
            .context("Could not open a session on the home page")?;

        let tarih = format!("{} {}", self.date, Local::now().format("%H:%M:%S"));
        Ok(collect_groups(self.groups, &tarih, self.delay, |group| self.fetch_group(group)).await)
    }

    fn source(&self) -> Source {
        Source::Basdas
    }

    fn write_mode(&self) -> WriteMode {
        WriteMode::AppendUnique { key_columns: 3 }
    }
}
