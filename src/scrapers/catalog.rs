//! Resumable category-by-category scraping for the JSON catalog sites.
//!
//! Products are appended to the day's CSV/JSON after every category and the
//! category is checkpointed, so an interrupted run loses at most one category.

use crate::checkpoint::CheckpointFile;
use crate::config::RunConfig;
use crate::models::{Category, Source};
use crate::output;
use anyhow::{bail, Result};
use async_trait::async_trait;
use clap::ValueEnum;
use serde::Serialize;
use std::fs;
use std::time::Duration;
use tracing::{error, info, warn};

/// Which of the day's files a run writes: the CSV rows, the JSON array, or both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
    #[default]
    Both,
}

impl OutputFormat {
    pub fn writes_csv(self) -> bool {
        matches!(self, OutputFormat::Csv | OutputFormat::Both)
    }

    pub fn writes_json(self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Both)
    }
}

/// Options for one catalog run
#[derive(Debug, Clone, Default)]
pub struct CatalogOptions {
    pub list_categories: bool,
    /// Only scrape the category with this id (or name, where the site allows it)
    pub category: Option<String>,
    pub output: OutputFormat,
    /// Seconds between page requests
    pub delay: Option<f64>,
    /// Pages per category, 0 = unlimited
    pub limit: usize,
    pub resume: bool,
}

/// A site with a category tree and a paged JSON product endpoint
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Full product record, written to the JSON file
    type Product: Serialize + Send + Sync;
    /// Row written to the CSV file
    type CsvRow: Serialize + Send + Sync;

    fn source(&self) -> Source;

    fn default_delay(&self) -> Duration;

    /// Column the final CSV/JSON dedup keys on
    fn dedup_column(&self) -> &'static str;

    fn csv_row(&self, product: &Self::Product) -> Self::CsvRow;

    fn matches(&self, category: &Category, wanted: &str) -> bool {
        category.id == wanted
    }

    async fn categories(&self) -> Result<Vec<Category>>;

    /// Every product of one category; `page_limit` 0 means unlimited
    async fn products(&self, category: &Category, delay: Duration, page_limit: usize) -> Result<Vec<Self::Product>>;
}

/// Outcome of a catalog run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSummary {
    pub categories_scraped: usize,
    pub unique_products: usize,
}

pub fn print_categories(categories: &[Category]) {
    println!("{:<12} {:<45} {:<10} {}", "ID", "Name", "Parent", "Products");
    println!("{}", "-".repeat(80));
    for c in categories {
        println!(
            "{:<12} {:<45} {:<10} {}",
            c.id,
            c.name,
            c.parent_id.as_deref().unwrap_or("-"),
            c.product_count.map(|n| n.to_string()).unwrap_or_else(|| "-".into())
        );
    }
    println!("\nTotal: {} categories", categories.len());
}

/// Keep only the categories the run should visit
pub fn select_categories<C: CatalogSource>(
    catalog: &C,
    categories: Vec<Category>,
    wanted: Option<&str>,
    checkpoint: &CheckpointFile,
) -> Result<Vec<Category>> {
    let categories = match wanted {
        Some(wanted) => {
            let filtered: Vec<_> = categories.into_iter().filter(|c| catalog.matches(c, wanted)).collect();
            if filtered.is_empty() {
                bail!("Category '{}' not found. Use --list-categories to see available ids.", wanted);
            }
            filtered
        }
        None => categories,
    };

    Ok(categories.into_iter().filter(|c| !checkpoint.is_done(&c.id)).collect())
}

pub async fn run<C: CatalogSource>(catalog: &C, options: &CatalogOptions, config: &RunConfig) -> Result<Option<CatalogSummary>> {
    let source = catalog.source();

    info!("Fetching category list...");
    let categories = catalog.categories().await?;
    if categories.is_empty() {
        bail!("No categories found for {}", source);
    }

    if options.list_categories {
        print_categories(&categories);
        return Ok(None);
    }

    let csv_path = config.snapshot_path(source, "csv");
    let json_path = config.snapshot_path(source, "json");
    let checkpoint_path = config.checkpoint_path(source);

    let mut checkpoint = if options.resume {
        CheckpointFile::load(checkpoint_path)?
    } else {
        for path in [&csv_path, &json_path] {
            if path.exists() {
                fs::remove_file(path)?;
                info!("Cleared old output file: {}", path.display());
            }
        }
        CheckpointFile::fresh(checkpoint_path)
    };

    let todo = select_categories(catalog, categories, options.category.as_deref(), &checkpoint)?;
    if todo.is_empty() {
        info!("All categories already scraped. Run without --resume to start fresh.");
        return Ok(None);
    }

    let format = options.output;
    let mut total = 0;
    let count_path = if format.writes_csv() { &csv_path } else { &json_path };
    if options.resume && count_path.exists() {
        let counted = if format.writes_csv() {
            output::count_rows(count_path)
        } else {
            output::count_json(count_path)
        };
        match counted {
            Ok(n) => {
                total = n;
                info!("Resuming: {} products already saved in {}", n, count_path.display());
            }
            Err(e) => warn!("Could not count existing products: {}", e),
        }
    }

    let delay = options
        .delay
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(catalog.default_delay());
    info!("Scraping {} categories...", todo.len());

    let mut scraped = 0;
    for (i, category) in todo.iter().enumerate() {
        info!("[{}/{}] {} (id={})", i + 1, todo.len(), category.name, category.id);

        let products = match catalog.products(category, delay, options.limit).await {
            Ok(products) => products,
            Err(e) => {
                error!("Category '{}' failed, left out of the checkpoint: {:#}", category.name, e);
                continue;
            }
        };

        if !products.is_empty() {
            if format.writes_csv() {
                let rows: Vec<_> = products.iter().map(|p| catalog.csv_row(p)).collect();
                output::append_csv(&csv_path, &rows)?;
            }
            if format.writes_json() {
                output::append_json(&json_path, &products)?;
            }
            total += products.len();
            info!("Category '{}': +{} products (total so far: {})", category.name, products.len(), total);
        }

        checkpoint.mark_done(&category.id)?;
        scraped += 1;
    }

    info!("Running final deduplication...");
    let mut unique = 0;
    if format.writes_json() {
        unique = output::dedup_json(&json_path, catalog.dedup_column())?;
    }
    if format.writes_csv() {
        unique = output::dedup_csv(&csv_path, catalog.dedup_column())?;
    }

    info!("✅ Done! Total unique products: {}", unique);
    if format.writes_csv() {
        info!("💾 Output -> {}", csv_path.display());
    }
    if format.writes_json() {
        info!("💾 Output -> {}", json_path.display());
    }

    Ok(Some(CatalogSummary { categories_scraped: scraped, unique_products: unique }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde::Serialize;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Serialize)]
    struct Item {
        id: String,
        name: String,
        price: f64,
    }

    #[derive(Serialize)]
    struct Row {
        name: String,
        price: f64,
    }

    /// Three categories; "b" fails once, and "c" repeats an item from "a"
    struct Fake {
        calls: Mutex<Vec<String>>,
        fail_b: bool,
    }

    impl Fake {
        fn new(fail_b: bool) -> Self {
            Self { calls: Mutex::new(Vec::new()), fail_b }
        }
    }

    fn item(id: &str, name: &str) -> Item {
        Item { id: id.into(), name: name.into(), price: 1.0 }
    }

    #[async_trait]
    impl CatalogSource for Fake {
        type Product = Item;
        type CsvRow = Row;

        fn source(&self) -> Source {
            Source::Migros
        }

        fn default_delay(&self) -> Duration {
            Duration::ZERO
        }

        fn dedup_column(&self) -> &'static str {
            "name"
        }

        fn csv_row(&self, p: &Item) -> Row {
            Row { name: p.name.clone(), price: p.price }
        }

        fn matches(&self, category: &Category, wanted: &str) -> bool {
            category.id == wanted || category.name == wanted
        }

        async fn categories(&self) -> Result<Vec<Category>> {
            Ok(vec![Category::new("a", "Meyve"), Category::new("b", "Sebze"), Category::new("c", "Süt")])
        }

        async fn products(&self, category: &Category, _delay: Duration, _limit: usize) -> Result<Vec<Item>> {
            self.calls.lock().unwrap().push(category.id.clone());
            match category.id.as_str() {
                "a" => Ok(vec![item("1", "Elma"), item("2", "Armut")]),
                "b" if self.fail_b => bail!("boom"),
                "b" => Ok(vec![item("3", "Domates")]),
                _ => Ok(vec![item("1", "Elma"), item("4", "Ayran")]),
            }
        }
    }

    fn config(dir: &TempDir) -> RunConfig {
        RunConfig::new(dir.path().join("Datas"), dir.path().join("cp"), NaiveDate::from_ymd_opt(2026, 10, 16))
    }

    #[tokio::test]
    async fn full_run_dedups_and_checkpoints() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let fake = Fake::new(false);

        let summary = run(&fake, &CatalogOptions::default(), &config).await.unwrap().unwrap();
        assert_eq!(summary, CatalogSummary { categories_scraped: 3, unique_products: 4 });

        let csv = config.snapshot_path(Source::Migros, "csv");
        let header = &output::read_records(&csv).unwrap()[0];
        assert_eq!(header.iter().collect::<Vec<_>>(), vec!["name", "price"]);

        let json: Vec<serde_json::Value> =
            serde_json::from_str(&fs::read_to_string(config.snapshot_path(Source::Migros, "json")).unwrap()).unwrap();
        assert_eq!(json.len(), 4);
        assert!(json[0].get("id").is_some());
    }

    #[tokio::test]
    async fn resume_skips_finished_categories() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);

        let first = Fake::new(true);
        let summary = run(&first, &CatalogOptions::default(), &config).await.unwrap().unwrap();
        assert_eq!(summary.categories_scraped, 2);

        let second = Fake::new(false);
        let options = CatalogOptions { resume: true, ..Default::default() };
        let summary = run(&second, &options, &config).await.unwrap().unwrap();

        assert_eq!(*second.calls.lock().unwrap(), vec!["b".to_string()]);
        assert_eq!(summary.unique_products, 4);
    }

    #[tokio::test]
    async fn unknown_category_is_an_error() {
        let dir = TempDir::new().unwrap();
        let options = CatalogOptions { category: Some("zzz".into()), ..Default::default() };
        assert!(run(&Fake::new(false), &options, &config(&dir)).await.is_err());
    }

    #[tokio::test]
    async fn category_filter_accepts_name() {
        let dir = TempDir::new().unwrap();
        let fake = Fake::new(false);
        let options = CatalogOptions { category: Some("Sebze".into()), output: OutputFormat::Csv, ..Default::default() };
        let summary = run(&fake, &options, &config(&dir)).await.unwrap().unwrap();

        assert_eq!(summary.unique_products, 1);
        assert!(!config(&dir).snapshot_path(Source::Migros, "json").exists());
    }

    #[tokio::test]
    async fn json_only_run_writes_no_csv() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let options = CatalogOptions { output: OutputFormat::Json, ..Default::default() };

        let summary = run(&Fake::new(false), &options, &config).await.unwrap().unwrap();

        assert_eq!(summary, CatalogSummary { categories_scraped: 3, unique_products: 4 });
        assert!(!config.snapshot_path(Source::Migros, "csv").exists());
        assert_eq!(output::count_json(&config.snapshot_path(Source::Migros, "json")).unwrap(), 4);
    }
}
