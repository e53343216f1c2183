//! Sahibinden: rental flats per city, read through a logged-in browser.
//!
//! The site bounces anonymous or expired sessions to `/giris`; the page
//! fetcher logs in again and retries once when that happens.

use crate::config::Credentials;
use crate::http::WINDOWS_USER_AGENT;
use crate::models::{Category, Listing, Source};
use crate::pagination::{page_cap, EmptyStreak};
use crate::price::parse_price;
use crate::scrapers::browser::BrowserSession;
use crate::scrapers::traits::ScraperTrait;
use crate::scrapers::types::ScrapeOptions;
use crate::scrapers::{css, select_text, text_of};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::Rng;
use scraper::{Html, Selector};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

const BASE_URL: &str = "https://www.sahibinden.com";
const LOGIN_URL: &str = "https://www.sahibinden.com/giris";
const PAGE_SIZE: usize = 50;
const MAX_PAGES: usize = 50;
const READY_TIMEOUT: Duration = Duration::from_secs(25);

const PAGE_PAUSE: Range<f64> = 2.0..5.0;
const SETTLE_PAUSE: Range<f64> = 2.0..4.0;
const TYPING_PAUSE: Range<f64> = 0.5..1.5;
const CITY_PAUSE: Range<f64> = 8.0..15.0;

const EMAIL_INPUT: &str = "input[name='username'], input[type='email'], #username, #email";
const PASSWORD_INPUT: &str = "input[name='password'], input[type='password'], #password";
const SUBMIT_BUTTON: &str = "button[type='submit'], input[type='submit'], .login-btn, #login-button";

pub const CITIES: [(&str, &str); 4] = [
    ("bursa", "Bursa"),
    ("kutahya", "Kütahya"),
    ("bilecik", "Bilecik"),
    ("yalova", "Yalova"),
];

static ROW: LazyLock<Selector> = LazyLock::new(|| css("tr.searchResultsItem"));
static PRICE: LazyLock<Selector> = LazyLock::new(|| css("td.searchResultsPriceValue"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| css("td.searchResultsTitleValue a"));
static LOCATION: LazyLock<Selector> = LazyLock::new(|| css("td.searchResultsLocationValue"));
static ATTRIBUTE: LazyLock<Selector> = LazyLock::new(|| css("td.searchResultsAttributeValue"));
static DATE: LazyLock<Selector> = LazyLock::new(|| css("td.searchResultsDateValue"));
static RESULT_COUNT: LazyLock<Selector> =
    LazyLock::new(|| css("strong.resultCount, span.resultCount strong, .resultCount"));

pub fn cities() -> Vec<Category> {
    CITIES.iter().map(|(slug, name)| Category::new(*slug, *name)).collect()
}

pub fn page_url(city_slug: &str, offset: usize) -> String {
    format!(
        "{}/kiralik-daire/{}?pagingOffset={}&pagingSize={}&sorting=date_desc",
        BASE_URL, city_slug, offset, PAGE_SIZE
    )
}

/// True when the site served its login form instead of the requested page
pub fn is_login_page(html: &str, url: &str) -> bool {
    html.contains("individual-login-body") || url.contains("giris")
}

/// Total listing count shown above the results
pub fn result_count(html: &str) -> Option<u64> {
    let document = Html::parse_document(html);
    let text = document.select(&RESULT_COUNT).next().map(text_of)?;
    text.replace(['.', ','], "").trim().parse().ok()
}

/// Split "Bursa / Nilüfer / Görükle" into (district, neighbourhood)
fn split_location(parts: &[String]) -> (String, String) {
    let district = parts.get(1).or_else(|| parts.first()).cloned().unwrap_or_default();
    let neighbourhood = parts.get(2).cloned().unwrap_or_default();
    (district, neighbourhood)
}

pub fn parse_listings(html: &str, city: &str, scrape_date: &str) -> Vec<Listing> {
    let document = Html::parse_document(html);

    document
        .select(&ROW)
        .map(|row| {
            let title_link = row.select(&TITLE).next();
            let url = title_link
                .and_then(|a| a.value().attr("href"))
                .map(|href| {
                    let absolute = if href.starts_with('/') { format!("{}{}", BASE_URL, href) } else { href.to_string() };
                    absolute.split('?').next().unwrap_or_default().to_string()
                })
                .unwrap_or_default();

            let location: Vec<String> = row
                .select(&LOCATION)
                .next()
                .map(|td| {
                    td.text()
                        .flat_map(|t| t.split('/'))
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let (district, neighbourhood) = split_location(&location);

            let attributes: Vec<String> = row.select(&ATTRIBUTE).map(text_of).collect();

            Listing {
                city: city.to_string(),
                district,
                neighbourhood,
                title: title_link.map(text_of).unwrap_or_default(),
                room_count: attributes.get(1).cloned().unwrap_or_default(),
                size_m2: attributes.first().cloned().unwrap_or_default(),
                price: select_text(row, &PRICE).and_then(|p| parse_price(&p)).unwrap_or(0.0),
                listing_date: select_text(row, &DATE).unwrap_or_default(),
                url,
                scrape_date: scrape_date.to_string(),
            }
        })
        .collect()
}

/// Walk one city by offset until a page fails or two come back empty in a row
pub fn collect_city<F>(city: &str, scrape_date: &str, max_pages: usize, mut fetch_page: F) -> Vec<Listing>
where
    F: FnMut(usize) -> Option<String>,
{
    let mut streak = EmptyStreak::new(2);
    let mut listings = Vec::new();

    for page in 0..max_pages {
        let Some(html) = fetch_page(page * PAGE_SIZE) else {
            break;
        };

        if page == 0 {
            if let Some(total) = result_count(&html) {
                info!("  Total listings: ~{}", total);
            }
        }

        let found = parse_listings(&html, city, scrape_date);
        let count = found.len();
        if streak.observe(count) {
            break;
        }
        if count == 0 {
            info!("  Page {}: empty", page + 1);
        } else {
            listings.extend(found);
            info!("  Page {}: {} listings ({} total)", page + 1, count, listings.len());
        }
    }

    listings
}

fn pause(range: Range<f64>) {
    let secs = rand::thread_rng().gen_range(range);
    thread::sleep(Duration::from_secs_f64(secs));
}

/// Browser-side state of one run
struct Session<'a> {
    browser: BrowserSession,
    credentials: &'a Credentials,
    screenshot_path: &'a Path,
}

impl Session<'_> {
    fn try_login(&self) -> Result<bool> {
        self.browser.goto(LOGIN_URL, Duration::ZERO)?;
        self.browser.fill(EMAIL_INPUT, &self.credentials.username)?;
        pause(TYPING_PAUSE);
        self.browser.fill(PASSWORD_INPUT, &self.credentials.password)?;
        pause(TYPING_PAUSE);
        self.browser.click(SUBMIT_BUTTON)?;
        self.browser.wait_until_navigated()?;
        pause(SETTLE_PAUSE);
        Ok(!self.browser.current_url().contains("giris"))
    }

    fn login(&self) -> bool {
        info!("Logging in to Sahibinden...");
        match self.try_login() {
            Ok(true) => {
                info!("  ✓ Logged in. URL: {}", self.browser.current_url());
                true
            }
            Ok(false) => {
                warn!("  ! Login failed. Check the email/password.");
                false
            }
            Err(e) => {
                warn!("  ! Login error: {:#}", e);
                match self.browser.screenshot(self.screenshot_path) {
                    Ok(()) => info!("  → Screenshot: {}", self.screenshot_path.display()),
                    Err(e) => warn!("  ! Could not save screenshot: {:#}", e),
                }
                false
            }
        }
    }

    fn load(&self, url: &str) -> Result<String> {
        self.browser.goto(url, Duration::ZERO)?;
        self.browser.wait_ready(READY_TIMEOUT)?;
        pause(SETTLE_PAUSE);
        self.browser.html()
    }

    fn fetch_page(&self, city_slug: &str, offset: usize) -> Option<String> {
        let url = page_url(city_slug, offset);
        let result = self.load(&url).and_then(|html| {
            if !is_login_page(&html, &self.browser.current_url()) {
                return Ok(Some(html));
            }
            warn!("  ! Session expired, logging in again...");
            if !self.login() {
                return Ok(None);
            }
            self.load(&url).map(Some)
        });

        pause(PAGE_PAUSE);
        match result {
            Ok(html) => html,
            Err(e) => {
                warn!("  ! Page error (city={}, offset={}): {:#}", city_slug, offset, e);
                None
            }
        }
    }
}

fn scrape_blocking(
    credentials: Credentials,
    screenshot_path: PathBuf,
    headed: bool,
    max_pages: usize,
    scrape_date: String,
) -> Result<Vec<Listing>> {
    let browser = BrowserSession::launch(headed, WINDOWS_USER_AGENT)?;
    let session = Session {
        browser,
        credentials: &credentials,
        screenshot_path: &screenshot_path,
    };

    session.browser.goto(&format!("{}/", BASE_URL), Duration::ZERO)?;
    pause(SETTLE_PAUSE);
    if !session.login() {
        bail!("Could not log in to Sahibinden, stopping");
    }

    let mut listings = Vec::new();

    for city in cities() {
        info!("→ Started: {}", city.name);
        let found = collect_city(&city.name, &scrape_date, max_pages, |offset| session.fetch_page(&city.id, offset));
        info!("  ✓ {}: {} listings", city.name, found.len());
        listings.extend(found);
        pause(CITY_PAUSE);
    }

    Ok(listings)
}

/// Sahibinden rental scraper implementation
pub struct SahibindenScraper {
    credentials: Credentials,
    screenshot_path: PathBuf,
    headed: bool,
    max_pages: usize,
    date: String,
}

impl SahibindenScraper {
    /// `debug_dir` receives a screenshot when the login form misbehaves
    pub fn new(options: &ScrapeOptions, credentials: Option<Credentials>, debug_dir: &Path) -> Result<Self> {
        let credentials = credentials
            .context("Sahibinden credentials missing: set SAHIBINDEN_EMAIL and SAHIBINDEN_PASSWORD")?;
        Ok(Self {
            credentials,
            screenshot_path: debug_dir.join("debug_login.png"),
            headed: options.headed,
            max_pages: page_cap(MAX_PAGES, options.max_pages),
            date: options.date_str(),
        })
    }
}

#[async_trait]
impl ScraperTrait for SahibindenScraper {
    type Row = Listing;

    async fn scrape(&self) -> Result<Vec<Listing>> {
        let credentials = self.credentials.clone();
        let screenshot_path = self.screenshot_path.clone();
        let (headed, max_pages, date) = (self.headed, self.max_pages, self.date.clone());

        tokio::task::spawn_blocking(move || scrape_blocking(credentials, screenshot_path, headed, max_pages, date))
            .await
            .context("Browser task panicked")?
    }

    fn source(&self) -> Source {
        Source::Sahibinden
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <div><span class="resultCount"><strong>1.234</strong></span></div>
        <table><tbody>
        <tr class="searchResultsItem">
            <td class="searchResultsTitleValue"><a href="/ilan/emlak-konut-kiralik-3-1-daire/123?from=list"> Merkezde 3+1
                Daire </a></td>
            <td class="searchResultsAttributeValue">140</td>
            <td class="searchResultsAttributeValue">3+1</td>
            <td class="searchResultsPriceValue"><span>18.500 TL</span></td>
            <td class="searchResultsDateValue"><span>12 Ekim</span><br><span>2026</span></td>
            <td class="searchResultsLocationValue">Bursa<br>Nilüfer<br>Görükle Mh.</td>
        </tr>
        <tr class="searchResultsItem">
            <td class="searchResultsTitleValue"><a href="https://www.sahibinden.com/ilan/9">Stüdyo</a></td>
            <td class="searchResultsPriceValue">Fiyat sorunuz</td>
            <td class="searchResultsLocationValue">Osmangazi</td>
        </tr>
        </tbody></table>
    </body></html>"#;

    #[test]
    fn urls_and_cities() {
        assert_eq!(
            page_url("bursa", 100),
            "https://www.sahibinden.com/kiralik-daire/bursa?pagingOffset=100&pagingSize=50&sorting=date_desc"
        );
        let cities = cities();
        assert_eq!(cities.len(), 4);
        assert_eq!((cities[1].id.as_str(), cities[1].name.as_str()), ("kutahya", "Kütahya"));
    }

    #[test]
    fn detects_login_bounce() {
        assert!(is_login_page("<body class=\"individual-login-body\">", "https://www.sahibinden.com/"));
        assert!(is_login_page("<body>", "https://secure.sahibinden.com/giris"));
        assert!(!is_login_page("<body>", &page_url("bursa", 0)));
    }

    #[test]
    fn parses_rows() {
        assert_eq!(result_count(PAGE), Some(1234));

        let listings = parse_listings(PAGE, "Bursa", "2026-10-16");
        assert_eq!(listings.len(), 2);

        let first = &listings[0];
        assert_eq!(first.title, "Merkezde 3+1 Daire");
        assert_eq!(first.url, "https://www.sahibinden.com/ilan/emlak-konut-kiralik-3-1-daire/123");
        assert_eq!(first.size_m2, "140");
        assert_eq!(first.room_count, "3+1");
        assert_eq!(first.price, 18500.0);
        assert_eq!(first.listing_date, "12 Ekim 2026");
        assert_eq!((first.district.as_str(), first.neighbourhood.as_str()), ("Nilüfer", "Görükle Mh."));

        let second = &listings[1];
        assert_eq!(second.price, 0.0);
        assert_eq!(second.district, "Osmangazi");
        assert_eq!(second.room_count, "");
    }

    #[test]
    fn city_walk_stops_after_two_empty_pages() {
        let mut offsets = Vec::new();
        let listings = collect_city("Bursa", "2026-10-16", 50, |offset| {
            offsets.push(offset);
            Some(if offset == 0 || offset == 100 { PAGE.to_string() } else { String::new() })
        });

        assert_eq!(offsets, vec![0, 50, 100, 150, 200]);
        assert_eq!(listings.len(), 4);
        assert!(listings.iter().all(|l| l.city == "Bursa"));
    }

    #[test]
    fn city_walk_stops_on_failed_page() {
        let listings = collect_city("Yalova", "2026-10-16", 50, |offset| (offset == 0).then(|| PAGE.to_string()));
        assert_eq!(listings.len(), 2);
    }

    #[test]
    fn missing_credentials_abort() {
        let dir = PathBuf::from("Datas/HousesRent/Sahibinden");
        assert!(SahibindenScraper::new(&ScrapeOptions::default(), None, &dir).is_err());
    }

    #[test]
    fn listings_carry_the_configured_date() {
        let options = ScrapeOptions { date: chrono::NaiveDate::from_ymd_opt(2026, 1, 5), ..Default::default() };
        let credentials = Credentials::new(Some("a@b.c".into()), Some("secret".into()));
        let scraper = SahibindenScraper::new(&options, credentials, Path::new("debug")).unwrap();
        assert_eq!(scraper.date, "2026-01-05");

        let listings = collect_city("Bursa", &scraper.date, 1, |_| Some(PAGE.to_string()));
        assert!(listings.iter().all(|l| l.scrape_date == "2026-01-05"));
    }
}
