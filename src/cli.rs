use crate::scrapers::catalog::{CatalogOptions, OutputFormat};
use crate::scrapers::ScrapeOptions;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Daily price snapshots from Turkish grocery and rental sites
#[derive(Parser, Debug)]
#[command(name = "market-scout")]
#[command(version)]
pub struct Cli {
    #[arg(long, env = "MARKET_SCOUT_DATA_DIR", default_value = "Datas", global = true)]
    pub data_dir: PathBuf,

    #[arg(long, env = "MARKET_SCOUT_CHECKPOINT_DIR", default_value = "checkpoints", global = true)]
    pub checkpoint_dir: PathBuf,

    /// Snapshot date used in file names (defaults to today)
    #[arg(long, global = true)]
    pub date: Option<NaiveDate>,

    #[arg(short, long, global = true, help = "Debug logging")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Take today's snapshot of one site
    Scrape {
        #[arg(value_enum)]
        site: Site,

        #[command(flatten)]
        args: ScrapeArgs,

        #[arg(long, env = "SAHIBINDEN_EMAIL", hide_env_values = true)]
        email: Option<String>,

        #[arg(long, env = "SAHIBINDEN_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Migros catalog, category by category
    Migros(CatalogArgs),

    /// Sarıyer Market catalog, category by category
    Sariyer(CatalogArgs),

    /// Convert Turkish price text in the third column of every CSV in a directory
    FixPrices { dir: PathBuf },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Site {
    Hapeloglu,
    Macrocenter,
    Gurmar,
    Baskent,
    Basdas,
    Soz,
    Onur,
    Mopas,
    Carrefoursa,
    Sahibinden,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ScrapeArgs {
    #[arg(long, help = "Seconds between page requests (site default when omitted)")]
    pub delay: Option<f64>,

    #[arg(long, help = "Page cap per category")]
    pub max_pages: Option<usize>,

    #[arg(long, help = "Show the browser window for browser-driven sites")]
    pub headed: bool,
}

impl From<ScrapeArgs> for ScrapeOptions {
    fn from(args: ScrapeArgs) -> Self {
        Self {
            delay: args.delay,
            max_pages: args.max_pages,
            headed: args.headed,
            date: None,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CatalogArgs {
    #[arg(long, help = "Print the category list and exit")]
    pub list_categories: bool,

    #[arg(long, help = "Scrape only this category (id, or name where the site allows)")]
    pub category: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Both)]
    pub output: OutputFormat,

    #[arg(long, help = "Seconds between requests (site default when omitted)")]
    pub delay: Option<f64>,

    #[arg(long, default_value_t = 0, help = "Page limit per category, 0 = no limit")]
    pub limit: usize,

    #[arg(long, help = "Skip categories finished earlier today")]
    pub resume: bool,
}

impl From<CatalogArgs> for CatalogOptions {
    fn from(args: CatalogArgs) -> Self {
        Self {
            list_categories: args.list_categories,
            category: args.category,
            output: args.output,
            delay: args.delay,
            limit: args.limit,
            resume: args.resume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scrape_with_globals() {
        let cli = Cli::try_parse_from([
            "market-scout",
            "scrape",
            "gurmar",
            "--max-pages",
            "3",
            "--date",
            "2026-10-16",
            "--data-dir",
            "/tmp/d",
        ])
        .unwrap();

        assert_eq!(cli.data_dir, PathBuf::from("/tmp/d"));
        assert_eq!(cli.date, NaiveDate::from_ymd_opt(2026, 10, 16));
        let Commands::Scrape { site, args, .. } = cli.command else {
            panic!("expected scrape");
        };
        assert_eq!(site, Site::Gurmar);
        assert_eq!(ScrapeOptions::from(args).max_pages, Some(3));
    }

    #[test]
    fn parses_catalog_flags() {
        let cli = Cli::try_parse_from([
            "market-scout",
            "sariyer",
            "--category",
            "Meyve",
            "--output",
            "csv",
            "--limit",
            "2",
            "--resume",
        ])
        .unwrap();

        let Commands::Sariyer(args) = cli.command else {
            panic!("expected sariyer");
        };
        let options = CatalogOptions::from(args);
        assert_eq!(options.category.as_deref(), Some("Meyve"));
        assert_eq!(options.output, OutputFormat::Csv);
        assert_eq!(options.limit, 2);
        assert!(options.resume);
    }

    #[test]
    fn rejects_unknown_site() {
        assert!(Cli::try_parse_from(["market-scout", "scrape", "a101"]).is_err());
    }
}
