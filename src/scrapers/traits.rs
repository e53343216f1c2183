use crate::models::Source;
use crate::scrapers::types::WriteMode;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Common trait for the single-snapshot scrapers.
/// Each site keeps its own row type, so the CSV columns stay site-specific.
#[async_trait]
pub trait ScraperTrait: Send + Sync {
    type Row: Serialize + Send + Sync;

    /// Scrape every row the site offers today
    async fn scrape(&self) -> Result<Vec<Self::Row>>;

    /// Which site this is
    fn source(&self) -> Source;

    fn write_mode(&self) -> WriteMode {
        WriteMode::Replace
    }
}
