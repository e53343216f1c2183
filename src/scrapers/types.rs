use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Knobs shared by the single-snapshot scrapers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeOptions {
    /// Seconds to wait between page requests; each site has its own default
    pub delay: Option<f64>,
    /// Maximum pages per category (0 or none = site default cap)
    pub max_pages: Option<usize>,
    /// Run browser-based scrapers without headless mode
    pub headed: bool,
    /// Date stamped on emitted rows (none = today)
    pub date: Option<NaiveDate>,
}

impl ScrapeOptions {
    /// Requested delay, or the site's own default
    pub fn delay_or(&self, default: Duration) -> Duration {
        self.delay
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(default)
    }

    /// Snapshot date as `YYYY-MM-DD`
    pub fn date_str(&self) -> String {
        self.date
            .unwrap_or_else(|| Local::now().date_naive())
            .format("%Y-%m-%d")
            .to_string()
    }
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            delay: None,
            max_pages: None,
            headed: false,
            date: None,
        }
    }
}

/// How a snapshot file is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Overwrite the dated file
    Replace,
    /// Append rows whose first `key_columns` fields are new to the file
    AppendUnique { key_columns: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_override_falls_back_on_bad_values() {
        let default = Duration::from_millis(1500);
        assert_eq!(ScrapeOptions::default().delay_or(default), default);

        let opts = ScrapeOptions { delay: Some(0.25), ..Default::default() };
        assert_eq!(opts.delay_or(default), Duration::from_millis(250));

        let opts = ScrapeOptions { delay: Some(-1.0), ..Default::default() };
        assert_eq!(opts.delay_or(default), default);
    }

    #[test]
    fn date_str_uses_the_configured_date() {
        let opts = ScrapeOptions { date: NaiveDate::from_ymd_opt(2026, 1, 5), ..Default::default() };
        assert_eq!(opts.date_str(), "2026-01-05");
    }
}
