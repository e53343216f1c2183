//! Headless Chrome session for the sites that only render in a browser.
//!
//! Everything here blocks; callers run it inside `tokio::task::spawn_blocking`.

use anyhow::{bail, Context, Result};
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Longest scroll loop before giving up on an endless feed
const MAX_SCROLLS: usize = 200;

/// One browser with a single working tab
pub struct BrowserSession {
    // Dropping the browser closes Chrome
    _browser: Browser,
    tab: Arc<Tab>,
}

impl BrowserSession {
    pub fn launch(headed: bool, user_agent: &str) -> Result<Self> {
        info!("Launching {} Chrome...", if headed { "visible" } else { "headless" });

        let options = LaunchOptions::default_builder()
            .headless(!headed)
            .window_size(Some((1920, 1080)))
            .idle_browser_timeout(Duration::from_secs(300))
            .args(vec![
                OsStr::new("--no-sandbox"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
            ])
            .build()
            .context("Failed to build launch options")?;

        let browser = Browser::new(options).context("Failed to launch Chrome browser")?;
        let tab = browser.new_tab().context("Failed to open a tab")?;
        tab.set_user_agent(user_agent, Some("tr-TR,tr;q=0.9"), None)
            .context("Failed to set user agent")?;

        Ok(Self { _browser: browser, tab })
    }

    /// Navigate and give the page `settle` to run its scripts
    pub fn goto(&self, url: &str, settle: Duration) -> Result<()> {
        debug!("Opening {}", url);
        self.tab
            .navigate_to(url)
            .with_context(|| format!("Failed to open {}", url))?
            .wait_until_navigated()
            .with_context(|| format!("Navigation to {} did not finish", url))?;
        thread::sleep(settle);
        Ok(())
    }

    pub fn current_url(&self) -> String {
        self.tab.get_url()
    }

    fn eval(&self, script: &str) -> Result<Option<Value>> {
        let result = self.tab.evaluate(script, false).context("Script evaluation failed")?;
        Ok(result.value)
    }

    /// Current DOM, as rendered
    pub fn html(&self) -> Result<String> {
        match self.eval("document.documentElement.outerHTML")? {
            Some(Value::String(html)) => Ok(html),
            _ => bail!("Could not read page HTML"),
        }
    }

    /// Poll `document.readyState` until the page reports complete
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        loop {
            if self.eval("document.readyState")?.as_ref().and_then(Value::as_str) == Some("complete") {
                return Ok(());
            }
            if started.elapsed() > timeout {
                bail!("Page did not finish loading within {}s", timeout.as_secs());
            }
            thread::sleep(Duration::from_millis(250));
        }
    }

    fn scroll_height(&self) -> Result<f64> {
        Ok(self
            .eval("document.body.scrollHeight")?
            .as_ref()
            .and_then(Value::as_f64)
            .unwrap_or_default())
    }

    /// Keep scrolling until the page stops growing
    pub fn scroll_to_bottom(&self, pause: Duration) -> Result<()> {
        let mut last = self.scroll_height()?;
        for _ in 0..MAX_SCROLLS {
            self.eval("window.scrollTo(0, document.body.scrollHeight)")?;
            thread::sleep(pause);
            let height = self.scroll_height()?;
            if height == last {
                return Ok(());
            }
            last = height;
        }
        debug!("Stopped scrolling after {} rounds", MAX_SCROLLS);
        Ok(())
    }

    /// Replace the value of the first input matching `selector`
    pub fn fill(&self, selector: &str, text: &str) -> Result<()> {
        let input = self
            .tab
            .wait_for_element(selector)
            .with_context(|| format!("No element matches {}", selector))?;
        input.click()?;
        input.call_js_fn("function() { this.value = ''; }", vec![], false)?;
        input.type_into(text)?;
        Ok(())
    }

    pub fn click(&self, selector: &str) -> Result<()> {
        self.tab
            .find_element(selector)
            .with_context(|| format!("No element matches {}", selector))?
            .click()?;
        Ok(())
    }

    pub fn wait_until_navigated(&self) -> Result<()> {
        self.tab.wait_until_navigated()?;
        Ok(())
    }

    pub fn screenshot(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let png = self
            .tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
            .context("Failed to capture screenshot")?;
        std::fs::write(path, png)?;
        Ok(())
    }
}
