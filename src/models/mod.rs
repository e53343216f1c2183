use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level folder a site's snapshots land in under the data directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataGroup {
    Markets,
    HousesRent,
}

impl DataGroup {
    pub fn dir_name(self) -> &'static str {
        match self {
            DataGroup::Markets => "Markets",
            DataGroup::HousesRent => "HousesRent",
        }
    }
}

/// Site a snapshot was scraped from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Source {
    Hapeloglu,
    Migros,
    Sariyer,
    Macrocenter,
    Gurmar,
    Baskent,
    Basdas,
    SozSanal,
    Onur,
    Mopas,
    CarrefourSa,
    Sahibinden,
}

impl Source {
    /// Directory name under the data group
    pub fn name(self) -> &'static str {
        match self {
            Source::Hapeloglu => "Hapeloglu",
            Source::Migros => "Migros",
            Source::Sariyer => "Sariyer",
            Source::Macrocenter => "Macrocenter",
            Source::Gurmar => "Gurmar",
            Source::Baskent => "Baskent",
            Source::Basdas => "Basdas",
            Source::SozSanal => "SozSanal",
            Source::Onur => "Onur",
            Source::Mopas => "Mopas",
            Source::CarrefourSa => "CarrefourSA",
            Source::Sahibinden => "Sahibinden",
        }
    }

    pub fn group(self) -> DataGroup {
        match self {
            Source::Sahibinden => DataGroup::HousesRent,
            _ => DataGroup::Markets,
        }
    }

    /// File name prefix; the scrape date is appended to it
    pub fn file_prefix(self) -> &'static str {
        match self {
            Source::Hapeloglu => "hapeloglu",
            Source::Migros => "migros",
            Source::Sariyer => "sariyermarket",
            Source::Macrocenter => "macrocenter_prices",
            Source::Gurmar => "gurmar",
            Source::Baskent => "baskent",
            Source::Basdas => "basdas_fiyat_takip",
            Source::SozSanal => "soz",
            Source::Onur => "onur",
            Source::Mopas => "mopas_prices",
            Source::CarrefourSa => "carrefourSA",
            Source::Sahibinden => "sahibinden_kiralik",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A product category (or, for rental sites, a city) to walk through
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    pub parent_id: Option<String>,
    pub parent_name: Option<String>,
    pub product_count: Option<u64>,
}

impl Category {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: None,
            parent_id: None,
            parent_name: None,
            product_count: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_parent(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.parent_id = Some(id.into());
        self.parent_name = Some(name.into());
        self
    }
}

/// Core rental listing data model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Listing {
    pub city: String,
    pub district: String,
    pub neighbourhood: String,
    pub title: String,
    pub room_count: String,
    #[serde(rename = "SizeM2")]
    pub size_m2: String,
    pub price: f64,
    pub listing_date: String,
    #[serde(rename = "URL")]
    pub url: String,
    pub scrape_date: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rental_sites_go_to_houses_rent() {
        assert_eq!(Source::Sahibinden.group(), DataGroup::HousesRent);
        assert_eq!(Source::Migros.group(), DataGroup::Markets);
    }

    #[test]
    fn category_builder_sets_parent() {
        let cat = Category::new("101", "Meyve").with_parent("2", "Meyve, Sebze");
        assert_eq!(cat.parent_id.as_deref(), Some("2"));
        assert_eq!(cat.parent_name.as_deref(), Some("Meyve, Sebze"));
        assert!(cat.url.is_none());
    }
}
