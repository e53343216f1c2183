pub mod basdas;
pub mod baskent;
pub mod browser;
pub mod carrefoursa;
pub mod catalog;
pub mod gurmar;
pub mod hapeloglu;
pub mod macrocenter;
pub mod migros;
pub mod mopas;
pub mod onur;
pub mod sahibinden;
pub mod sariyer;
pub mod soz;
pub mod traits;
pub mod types;

pub use basdas::BasdasScraper;
pub use baskent::BaskentScraper;
pub use carrefoursa::CarrefourSaScraper;
pub use catalog::CatalogSource;
pub use gurmar::GurmarScraper;
pub use hapeloglu::HapelogluScraper;
pub use macrocenter::MacrocenterScraper;
pub use migros::MigrosCatalog;
pub use mopas::MopasScraper;
pub use onur::OnurScraper;
pub use sahibinden::SahibindenScraper;
pub use sariyer::SariyerCatalog;
pub use soz::SozScraper;
pub use traits::ScraperTrait;
pub use types::{ScrapeOptions, WriteMode};

use scraper::{ElementRef, Selector};
use serde_json::Value;

/// Parse a selector known at compile time
pub(crate) fn css(selector: &'static str) -> Selector {
    Selector::parse(selector).expect("static selector must parse")
}

/// Element text with whitespace runs collapsed to single spaces
pub(crate) fn text_of(element: ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

/// Text of the first match under `element`, if any
pub(crate) fn select_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element.select(selector).next().map(text_of)
}

/// Null, false, zero and empty values count as missing in the JSON APIs
pub(crate) fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// First present value among `keys`, tried in order
pub(crate) fn first_of<'a>(object: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| object.get(*k)).find(|v| is_present(v))
}

/// Strings as-is, everything else in its JSON form
pub(crate) fn value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Number, or a numeric string with either decimal mark
pub(crate) fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

pub(crate) fn first_string(object: &Value, keys: &[&str]) -> String {
    first_of(object, keys).map(value_string).unwrap_or_default()
}
