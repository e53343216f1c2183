use anyhow::Result;
use clap::Parser;
use market_scout::cli::{Cli, Commands, Site};
use market_scout::config::{Credentials, RunConfig};
use market_scout::models::Source;
use market_scout::scrapers::catalog::{self, CatalogOptions};
use market_scout::scrapers::{
    BasdasScraper, BaskentScraper, CarrefourSaScraper, GurmarScraper, HapelogluScraper, MacrocenterScraper,
    MigrosCatalog, MopasScraper, OnurScraper, SahibindenScraper, SariyerCatalog, ScrapeOptions, SozScraper,
};
use market_scout::{logging, price_fixer, runner};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = RunConfig::new(cli.data_dir, cli.checkpoint_dir, cli.date);
    info!("🛒 Market Scout - {}", config.date_str());

    match cli.command {
        Commands::Scrape { site, args, email, password } => {
            let options = ScrapeOptions { date: Some(config.date), ..ScrapeOptions::from(args) };
            match site {
                Site::Hapeloglu => runner::run(&HapelogluScraper::new(&options)?, &config).await?,
                Site::Macrocenter => runner::run(&MacrocenterScraper::new(&options)?, &config).await?,
                Site::Gurmar => runner::run(&GurmarScraper::new(&options)?, &config).await?,
                Site::Baskent => runner::run(&BaskentScraper::new(&options)?, &config).await?,
                Site::Basdas => runner::run(&BasdasScraper::new(&options)?, &config).await?,
                Site::Soz => runner::run(&SozScraper::new(&options)?, &config).await?,
                Site::Onur => runner::run(&OnurScraper::new(&options)?, &config).await?,
                Site::Mopas => runner::run(&MopasScraper::new(&options)?, &config).await?,
                Site::Carrefoursa => runner::run(&CarrefourSaScraper::new(&options), &config).await?,
                Site::Sahibinden => {
                    let credentials = Credentials::new(email, password);
                    let debug_dir = config.source_dir(Source::Sahibinden);
                    let scraper = SahibindenScraper::new(&options, credentials, &debug_dir)?;
                    runner::run(&scraper, &config).await?
                }
            };
        }
        Commands::Migros(args) => {
            let summary = catalog::run(&MigrosCatalog::new()?, &CatalogOptions::from(args), &config).await?;
            report(summary);
        }
        Commands::Sariyer(args) => {
            let summary = catalog::run(&SariyerCatalog::new()?, &CatalogOptions::from(args), &config).await?;
            report(summary);
        }
        Commands::FixPrices { dir } => {
            price_fixer::fix_dir(&dir)?;
        }
    }

    Ok(())
}

fn report(summary: Option<catalog::CatalogSummary>) {
    if let Some(summary) = summary {
        info!(
            "✅ {} categories, {} unique products",
            summary.categories_scraped, summary.unique_products
        );
    }
}
