use crate::config::RunConfig;
use crate::output;
use crate::scrapers::types::WriteMode;
use crate::scrapers::ScraperTrait;
use anyhow::Result;
use chrono::Local;
use std::path::PathBuf;
use tracing::{info, warn};

/// Run one scraper and write its dated snapshot.
/// Returns the file written, or `None` when the site gave nothing back.
pub async fn run<S: ScraperTrait>(scraper: &S, config: &RunConfig) -> Result<Option<PathBuf>> {
    let source = scraper.source();
    let started = Local::now();
    info!("Starting {} scrape", source);

    let rows = scraper.scrape().await?;
    if rows.is_empty() {
        warn!("No rows scraped from {} - nothing written", source);
        return Ok(None);
    }

    let path = config.snapshot_path(source, "csv");
    match scraper.write_mode() {
        WriteMode::Replace => {
            output::write_csv(&path, &rows)?;
            info!("💾 Saved {} rows to {}", rows.len(), path.display());
        }
        WriteMode::AppendUnique { key_columns } => {
            let added = output::append_unique(&path, &rows, key_columns)?;
            info!("💾 Appended {} new of {} rows to {}", added, rows.len(), path.display());
        }
    }

    let elapsed = Local::now() - started;
    info!("✅ {} finished in {}s", source, elapsed.num_seconds());
    Ok(Some(path))
}
