//! Native browser management using `chromiumoxide`.
//!
//! This module is the chromiumoxide-backed [`PageDriver`]:
//! * Finding a usable browser executable (Brave → Chrome → Chromium, cross-platform).
//! * `ChromiumDriver`: one lazily launched browser, one tab per station.
//! * `ChromiumSession`: the per-station tab, implementing [`PageSession`].
//! * `wait_until_stable`: readyState + resource-count quiet period after navigation.
//!
//! The TCDS pages are old server-rendered ASP with inline `onclick` handlers,
//! so element state (visibility, `disabled`) is probed with small JS functions
//! called on the element itself.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::element::Element;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use rand::seq::IndexedRandom;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::config::{BrowserSettings, SiteConfig};
use crate::core::error::DriverError;
use crate::core::types::StationId;
use crate::scraping::driver::{Locator, PageDriver, PageSession};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

// ── User-Agent pool ──────────────────────────────────────────────────────────

const DESKTOP_USER_AGENTS: &[&str] = &[
    // Chrome 132 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 132 – macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 131 – Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    // Edge 132 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36 Edg/132.0.0.0",
];

/// Returns a randomly-chosen desktop Chromium User-Agent string.
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    DESKTOP_USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(DESKTOP_USER_AGENTS[0])
}

// ── Browser executable discovery ─────────────────────────────────────────────

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (explicit override)
/// 2. PATH scan – finds package-manager installs on all platforms.
/// 3. OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(p) = std::env::var(crate::core::config::ENV_CHROME_EXECUTABLE) {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
            "brave-browser",
            "brave",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/local/bin/chromium",
            "/usr/bin/brave-browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

// ── Browser config builder ───────────────────────────────────────────────────

/// Build a `BrowserConfig` for the harvest browser. Headless unless
/// `settings.headless` is off, in which case a visible window is opened.
pub fn build_browser_config(exe: &str, settings: &BrowserSettings) -> Result<BrowserConfig, DriverError> {
    let ua = random_user_agent();

    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width: settings.window_width,
            height: settings.window_height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(settings.window_width, settings.window_height)
        .arg("--disable-gpu")
        .arg("--no-sandbox") // often required in CI / restricted environments
        .arg("--disable-dev-shm-usage") // avoids /dev/shm OOM in constrained environments
        .arg("--disable-extensions")
        .arg("--disable-sync")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--mute-audio")
        .arg("--disable-blink-features=AutomationControlled")
        .arg(format!("--user-agent={}", ua));

    if !settings.headless {
        builder = builder.with_head();
    }

    builder
        .build()
        .map_err(|e| DriverError::Launch(format!("failed to build browser config: {}", e)))
}

/// Expand the station URL template. The ID is percent-encoded.
pub fn station_url(template: &str, station: &StationId) -> Result<String, DriverError> {
    let encoded: String = url::form_urlencoded::byte_serialize(station.as_str().as_bytes()).collect();
    let raw = template.replace("{id}", &encoded);
    url::Url::parse(&raw)
        .map(|u| u.to_string())
        .map_err(|e| DriverError::Navigation {
            station: station.to_string(),
            reason: format!("invalid station URL '{}': {}", raw, e),
        })
}

// ── Smart wait ───────────────────────────────────────────────────────────────

/// Wait until the page network goes idle (no new resource entries for `quiet_ms`
/// consecutive ms with `document.readyState == "complete"`) or until
/// `timeout_ms` has elapsed.
pub async fn wait_until_stable(page: &Page, quiet_ms: u64, timeout_ms: u64) {
    let start = Instant::now();
    let mut last_count: u64 = 0;
    let mut stable_since = Instant::now();

    loop {
        if start.elapsed().as_millis() as u64 >= timeout_ms {
            debug!("wait_until_stable: timeout after {}ms", timeout_ms);
            break;
        }

        let count: u64 = page
            .evaluate("performance.getEntriesByType('resource').length")
            .await
            .ok()
            .and_then(|v| v.into_value::<serde_json::Value>().ok())
            .and_then(|j| j.as_u64())
            .unwrap_or(0);

        let ready_complete: bool = page
            .evaluate("document.readyState")
            .await
            .ok()
            .and_then(|v| v.into_value::<serde_json::Value>().ok())
            .and_then(|j| j.as_str().map(|s| s == "complete"))
            .unwrap_or(false);

        if !ready_complete || count != last_count {
            last_count = count;
            stable_since = Instant::now();
        } else if stable_since.elapsed().as_millis() as u64 >= quiet_ms {
            debug!(
                "wait_until_stable: idle after {}ms ({} resources)",
                start.elapsed().as_millis(),
                count
            );
            break;
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

// ── Driver ───────────────────────────────────────────────────────────────────

/// A long-lived browser that hands out one tab per station.
///
/// The browser is launched on the first `open()` and relaunched transparently
/// if it has died in between stations.
pub struct ChromiumDriver {
    exe: String,
    settings: BrowserSettings,
    site: SiteConfig,
    inner: Mutex<Option<Browser>>,
}

impl ChromiumDriver {
    /// Resolve the browser binary (config override, then auto-discovery).
    pub fn new(settings: BrowserSettings, site: SiteConfig) -> Result<Self, DriverError> {
        let exe = settings
            .chrome_executable
            .clone()
            .filter(|p| Path::new(p).exists())
            .or_else(find_chrome_executable)
            .ok_or_else(|| {
                DriverError::Launch(
                    "no browser found; install Chrome or Chromium, or set CHROME_EXECUTABLE"
                        .to_string(),
                )
            })?;
        Ok(Self {
            exe,
            settings,
            site,
            inner: Mutex::new(None),
        })
    }

    async fn new_tab(&self) -> Result<Page, DriverError> {
        let mut guard = self.inner.lock().await;

        if let Some(browser) = guard.as_mut() {
            match browser.new_page("about:blank").await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    warn!("🔄 Browser instance dead ({}), restarting...", e);
                    if let Some(mut old) = guard.take() {
                        let _ = old.close().await;
                    }
                }
            }
        }

        info!(
            "🚀 Launching browser ({}, {})",
            self.exe,
            if self.settings.headless { "headless" } else { "visible" }
        );
        let config = build_browser_config(&self.exe, &self.settings)?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Launch(format!("failed to launch ({}): {}", self.exe, e)))?;
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {}", e);
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Launch(format!("failed to open tab: {}", e)))?;
        *guard = Some(browser);
        Ok(page)
    }

    /// Gracefully close the browser instance.
    pub async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(mut b) = guard.take() {
            let _ = b.close().await;
            info!("🛑 Browser shut down");
        }
    }
}

impl Drop for ChromiumDriver {
    fn drop(&mut self) {
        // Drop cannot await; hand the close to the runtime if there is one.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if let Ok(mut guard) = self.inner.try_lock() {
            if let Some(mut browser) = guard.take() {
                handle.spawn(async move {
                    let _ = browser.close().await;
                });
            }
        }
    }
}

#[async_trait]
impl PageDriver for ChromiumDriver {
    type Session = ChromiumSession;

    async fn open(&self, station: &StationId) -> Result<ChromiumSession, DriverError> {
        let url = station_url(&self.site.station_url_template, station)?;
        let nav_err = |reason: String| DriverError::Navigation {
            station: station.to_string(),
            reason,
        };

        let page = self.new_tab().await.map_err(|e| nav_err(e.to_string()))?;

        debug!("🌐 Navigating to {}", url);
        let timeout = Duration::from_millis(self.site.navigation_timeout_ms);
        let navigated = tokio::time::timeout(timeout, page.goto(url.as_str()))
            .await
            .map(|r| r.map(|_| ()));
        match navigated {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = page.close().await;
                return Err(nav_err(e.to_string()));
            }
            Err(_) => {
                let _ = page.close().await;
                return Err(nav_err(format!("no response within {}ms", timeout.as_millis())));
            }
        }

        wait_until_stable(&page, self.site.settle_quiet_ms, self.site.navigation_timeout_ms).await;

        Ok(ChromiumSession {
            page,
            hit_counter: AtomicU64::new(0),
        })
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

const VISIBLE_PROBE: &str = "function() { \
    const r = this.getBoundingClientRect(); \
    const s = window.getComputedStyle(this); \
    return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'; \
}";

const ENABLED_PROBE: &str = "function() { return !this.disabled; }";

pub struct ChromiumSession {
    page: Page,
    hit_counter: AtomicU64,
}

impl ChromiumSession {
    async fn locate_one(&self, locator: &Locator) -> Result<Element, DriverError> {
        let found = match locator {
            Locator::Css(sel) => self.page.find_element(sel.as_str()).await,
            Locator::Xpath(xp) => self.page.find_xpath(xp.as_str()).await,
        };
        found.map_err(|e| DriverError::NotFound(format!("{}: {}", locator, e)))
    }

    async fn probe(&self, element: &Element, function: &str) -> Result<bool, DriverError> {
        let ret = element
            .call_js_fn(function, false)
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        Ok(ret
            .result
            .value
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    /// Element-scoped XPath: evaluate in-page from `scope`, tag the hits with a
    /// one-off attribute, then collect them with a CSS attribute selector.
    async fn scoped_xpath(&self, scope: &Element, xpath: &str) -> Result<Vec<Element>, DriverError> {
        let token = self.hit_counter.fetch_add(1, Ordering::Relaxed);
        let literal = serde_json::to_string(xpath).map_err(|e| DriverError::Protocol(e.to_string()))?;
        let function = format!(
            "function() {{ \
                const r = document.evaluate({literal}, this, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); \
                for (let i = 0; i < r.snapshotLength; i++) {{ \
                    const n = r.snapshotItem(i); \
                    if (n.nodeType === 1) n.setAttribute('data-aadt-hit', '{token}'); \
                }} \
                return r.snapshotLength; \
            }}"
        );
        scope
            .call_js_fn(function, false)
            .await
            .map_err(|e| DriverError::Protocol(format!("xpath {}: {}", xpath, e)))?;
        scope
            .find_elements(format!("[data-aadt-hit='{token}']"))
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl PageSession for ChromiumSession {
    type Element = Element;

    async fn wait_visible(&mut self, locator: &Locator, timeout: Duration) -> Result<Element, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(el) = self.locate_one(locator).await {
                if self.probe(&el, VISIBLE_PROBE).await.unwrap_or(false) {
                    return Ok(el);
                }
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    what: format!("visible {}", locator),
                    after: timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_present(&mut self, locator: &Locator, timeout: Duration) -> Result<Element, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(el) = self.locate_one(locator).await {
                return Ok(el);
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    what: format!("present {}", locator),
                    after: timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn find_all(&mut self, scope: Option<&Element>, locator: &Locator) -> Result<Vec<Element>, DriverError> {
        let found = match (scope, locator) {
            (Some(el), Locator::Css(sel)) => el.find_elements(sel.as_str()).await,
            (None, Locator::Css(sel)) => self.page.find_elements(sel.as_str()).await,
            (Some(el), Locator::Xpath(xp)) => return self.scoped_xpath(el, xp).await,
            (None, Locator::Xpath(xp)) => self.page.find_xpaths(xp.as_str()).await,
        };
        // CDP reports "no node" as an error; for a multi-match lookup that is just empty.
        Ok(found.unwrap_or_default())
    }

    async fn click(&mut self, element: &Element) -> Result<(), DriverError> {
        element
            .click()
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Protocol(format!("click: {}", e)))
    }

    async fn attribute(&mut self, element: &Element, name: &str) -> Result<Option<String>, DriverError> {
        element
            .attribute(name)
            .await
            .map_err(|e| DriverError::Protocol(format!("attribute {}: {}", name, e)))
    }

    async fn inner_html(&mut self, element: &Element) -> Result<Option<String>, DriverError> {
        element
            .inner_html()
            .await
            .map_err(|e| DriverError::Protocol(format!("innerHTML: {}", e)))
    }

    async fn is_enabled(&mut self, element: &Element) -> Result<bool, DriverError> {
        self.probe(element, ENABLED_PROBE).await
    }

    async fn close(self) -> Result<(), DriverError> {
        self.page
            .close()
            .await
            .map_err(|e| DriverError::Protocol(format!("close tab: {}", e)))
    }
}
