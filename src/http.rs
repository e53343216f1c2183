use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";
pub const WINDOWS_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
pub const ACCEPT_JSON: &str = "application/json, text/plain, */*";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("403 Forbidden for {0}")]
    Forbidden(String),

    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },

    #[error("challenge page served for {0}")]
    Challenge(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl FetchError {
    /// A 403 means the site wants us gone; hammering it again won't help
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Forbidden(_))
    }
}

/// Fixed number of attempts with a linear backoff (`backoff * attempt`)
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Build a header map from static pairs, skipping anything reqwest rejects
pub fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                map.insert(HeaderName::from_static(name), value);
            }
            Err(_) => warn!("Dropping invalid header value for {}", name),
        }
    }
    map
}

/// Browser-like headers for a Turkish storefront
pub fn storefront_headers(referer: &str, accept: &str) -> HeaderMap {
    headers(&[
        ("accept", accept),
        ("accept-language", "tr-TR,tr;q=0.9,en-US;q=0.8,en;q=0.7"),
        ("referer", referer),
    ])
}

/// Create an HTTP client with a desktop user agent and the given default headers
pub fn build_client(user_agent: &str, default_headers: HeaderMap, timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .default_headers(default_headers)
        .cookie_store(true)
        .build()
        .context("Failed to create HTTP client")
}

async fn send_once(request: RequestBuilder) -> Result<Response, FetchError> {
    let response = request.send().await?;
    let status = response.status();
    let url = response.url().to_string();

    if status == StatusCode::FORBIDDEN {
        return Err(FetchError::Forbidden(url));
    }
    if !status.is_success() {
        return Err(FetchError::Status { url, status });
    }
    Ok(response)
}

/// Send a request built fresh for every attempt, retrying transient failures
pub async fn send_with_retry<F>(policy: RetryPolicy, mut build: F) -> Result<Response, FetchError>
where
    F: FnMut() -> RequestBuilder + Send,
{
    let mut attempt = 1;
    loop {
        match send_once(build()).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() && attempt < policy.attempts => {
                let wait = policy.delay_for(attempt);
                warn!("Attempt {}/{} failed ({}). Retrying in {:?}", attempt, policy.attempts, e, wait);
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => {
                if attempt > 1 {
                    error!("Giving up after {} attempts: {}", attempt, e);
                }
                return Err(e);
            }
        }
    }
}

/// GET a page body as text
pub async fn get_text(client: &Client, url: &str, policy: RetryPolicy) -> Result<String, FetchError> {
    let response = send_with_retry(policy, || client.get(url)).await?;
    Ok(response.text().await?)
}

/// GET a JSON document with query parameters
pub async fn get_json(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
    policy: RetryPolicy,
) -> Result<serde_json::Value, FetchError> {
    let response = send_with_retry(policy, || client.get(url).query(query)).await?;
    Ok(response.json().await?)
}

/// POST a urlencoded form and decode the JSON answer
pub async fn post_form_json(
    client: &Client,
    url: &str,
    form: &[(&str, String)],
    policy: RetryPolicy,
) -> Result<serde_json::Value, FetchError> {
    let response = send_with_retry(policy, || client.post(url).form(form)).await?;
    Ok(response.json().await?)
}

/// True for the "Just a moment..." interstitial Cloudflare serves instead of content
pub fn is_challenge_page(html: &str) -> bool {
    let lower = html.to_lowercase();
    match (lower.find("<title"), lower.find("</title>")) {
        (Some(start), Some(end)) if start < end => lower[start..end].contains("just a moment"),
        _ => false,
    }
}

/// Pass a real page through; a challenge interstitial becomes [`FetchError::Challenge`]
pub fn reject_challenge(url: &str, html: String) -> Result<String, FetchError> {
    if is_challenge_page(&html) {
        return Err(FetchError::Challenge(url.to_string()));
    }
    Ok(html)
}
