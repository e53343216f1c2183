//! Turkish price text helpers.
//!
//! Sites print prices as `1.250,00 TL`, `₺134,90` or `88,50 TL KDV Dahil`:
//! dot for thousands, comma for decimals. A few JSON APIs report kuruş.

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(KDV\s*Dahil|TL|₺)").expect("valid regex"));
static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d[\d.,]*").expect("valid regex"));

/// Parse a localized price string into TL.
///
/// `"134,90 TL"` -> `134.9`, `"1.250,00 TL"` -> `1250.0`. Returns `None` when
/// the text holds no number.
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned = NOISE.replace_all(text, " ");
    let token = NUMBER.find(&cleaned)?.as_str();
    let value = normalize_number(token.trim_end_matches(['.', ',']));
    if value.is_none() {
        debug!("Could not parse price: '{}'", text);
    }
    value
}

fn normalize_number(token: &str) -> Option<f64> {
    let normalized = if token.contains(',') {
        token.replace('.', "").replace(',', ".")
    } else if token.matches('.').count() > 1 {
        token.replace('.', "")
    } else if let Some((_, frac)) = token.split_once('.') {
        // A lone dot followed by exactly three digits is a thousands separator
        if frac.len() == 3 {
            token.replace('.', "")
        } else {
            token.to_string()
        }
    } else {
        token.to_string()
    };
    normalized.parse().ok()
}

/// Round to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Kuruş (1/100 TL) to TL with two decimals.
pub fn kurus_to_tl(kurus: f64) -> f64 {
    round_to(kurus / 100.0, 2)
}

/// Percentage saved against the regular price, one decimal.
pub fn discount_pct(current: f64, regular: f64) -> Option<f64> {
    if regular > current && regular > 0.0 {
        Some(round_to((1.0 - current / regular) * 100.0, 1))
    } else {
        None
    }
}

/// Debug formatting keeps the `.0` on whole numbers, matching the CSV writer.
pub fn format_price(value: f64) -> String {
    format!("{:?}", value)
}
