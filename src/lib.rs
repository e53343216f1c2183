pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod http;
pub mod logging;
pub mod models;
pub mod output;
pub mod pagination;
pub mod price;
pub mod price_fixer;
pub mod runner;
pub mod scrapers;
