use anyhow::{Context, anyhow};
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::DriverError;

pub type DriverResult<T> = Result<T, DriverError>;

/// One open browser tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabInfo {
    pub index: usize,
    pub title: String,
    pub url: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Down,
    Up,
    Top,
    Bottom,
}

impl ScrollDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrollDirection::Down => "down",
            ScrollDirection::Up => "up",
            ScrollDirection::Top => "top",
            ScrollDirection::Bottom => "bottom",
        }
    }

    pub fn script(&self, pixels: u32) -> String {
        match self {
            ScrollDirection::Down => format!("window.scrollBy(0, {pixels})"),
            ScrollDirection::Up => format!("window.scrollBy(0, -{pixels})"),
            ScrollDirection::Top => "window.scrollTo(0, 0)".to_string(),
            ScrollDirection::Bottom => {
                "window.scrollTo(0, document.body.scrollHeight)".to_string()
            }
        }
    }
}

/// Element state a selector wait resolves on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitState {
    Attached,
    #[default]
    Visible,
    Hidden,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Attached => "attached",
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
        }
    }
}

/// Primitive browser capabilities the agent is built on.
///
/// Every call is synchronous and either succeeds or returns a [`DriverError`].
/// Calls that touch an element carry an explicit timeout.
pub trait BrowserDriver: Send {
    fn navigate(&mut self, url: &str, timeout: Duration) -> DriverResult<()>;
    fn url(&mut self) -> DriverResult<String>;
    fn title(&mut self) -> DriverResult<String>;
    fn go_back(&mut self, timeout: Duration) -> DriverResult<()>;
    fn click(&mut self, selector: &str, timeout: Duration) -> DriverResult<()>;
    fn fill(&mut self, selector: &str, text: &str, timeout: Duration) -> DriverResult<()>;
    fn hover(&mut self, selector: &str, timeout: Duration) -> DriverResult<()>;
    fn press_key(&mut self, key: &str) -> DriverResult<()>;
    fn scroll(&mut self, direction: ScrollDirection, pixels: u32) -> DriverResult<()>;
    fn evaluate(&mut self, script: &str) -> DriverResult<Value>;
    fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
        state: WaitState,
    ) -> DriverResult<bool>;
    fn screenshot(&mut self, path: &Path, full_page: bool) -> DriverResult<()>;
    fn tabs(&mut self) -> DriverResult<Vec<TabInfo>>;
    fn switch_tab(&mut self, index: usize) -> DriverResult<()>;
    fn close_tab(&mut self, index: usize) -> DriverResult<()>;
    fn wait(&mut self, duration: Duration);
    fn shutdown(&mut self) -> DriverResult<()>;
}

/// Close every item, logging each failure; returns how many failed.
fn close_each<T, E: std::fmt::Display>(
    items: &[T],
    mut close: impl FnMut(&T) -> Result<(), E>,
) -> usize {
    let mut failed = 0;
    for (index, item) in items.iter().enumerate() {
        if let Err(e) = close(item) {
            warn!(index, error = %e, "closing tab failed");
            failed += 1;
        }
    }
    failed
}

/// Index of the tab that is active after closing `closing`, expressed in the
/// post-close numbering. Closing the active tab moves to its right neighbour,
/// or its left neighbour when it was the last one.
pub fn active_after_close(count: usize, active: usize, closing: usize) -> DriverResult<usize> {
    if count <= 1 {
        return Err(DriverError::OnlyTab);
    }
    if closing >= count {
        return Err(DriverError::InvalidTab {
            index: closing,
            count,
        });
    }
    let next = if closing == active {
        if closing + 1 < count { closing } else { closing - 1 }
    } else if closing < active {
        active - 1
    } else {
        active
    };
    Ok(next)
}

#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub headless: bool,
    pub user_data_dir: PathBuf,
    pub chrome_path: Option<PathBuf>,
    pub attach_port: Option<u16>,
}

/// Chrome driven over CDP through `headless_chrome`.
pub struct ChromeDriver {
    browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeDriver {
    pub fn launch(options: &ChromeOptions) -> anyhow::Result<Self> {
        if let Some(port) = options.attach_port {
            info!(port, "attempting to attach to existing Chrome");
            match Browser::connect(format!("http://127.0.0.1:{port}")) {
                Ok(browser) => {
                    let existing = {
                        let tabs = browser
                            .get_tabs()
                            .lock()
                            .map_err(|_| anyhow!("tab list lock poisoned"))?;
                        tabs.first().cloned()
                    };
                    let tab = match existing {
                        Some(t) => {
                            debug!("using existing tab");
                            t
                        }
                        None => browser.new_tab()?,
                    };
                    info!("attached to existing Chrome");
                    return Ok(Self { browser, tab });
                }
                Err(e) => warn!(error = %e, "could not attach, launching a new browser"),
            }
        }

        std::fs::create_dir_all(&options.user_data_dir).with_context(|| {
            format!("creating user data dir {}", options.user_data_dir.display())
        })?;

        let launch = LaunchOptions {
            headless: options.headless,
            path: options.chrome_path.clone(),
            user_data_dir: Some(options.user_data_dir.clone()),
            window_size: Some((1280, 720)),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        info!(headless = options.headless, profile = %options.user_data_dir.display(), "starting Chrome");
        let browser = Browser::new(launch).map_err(|e| anyhow!("Browser launch failed: {e}"))?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome ready");

        Ok(Self { browser, tab })
    }

    fn all_tabs(&self) -> DriverResult<Vec<Arc<Tab>>> {
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .map_err(|_| anyhow!("tab list lock poisoned"))?;
        Ok(tabs.clone())
    }

    fn find(&self, selector: &str, timeout: Duration) -> DriverResult<Element<'_>> {
        self.tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map_err(|e| classify_wait_error(e, selector, timeout))
    }

    fn poll(&self, script: &str, timeout: Duration) -> DriverResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let hit = self
                .tab
                .evaluate(script, false)
                .ok()
                .and_then(|r| r.value)
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if hit {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }
}

/// headless_chrome reports a missed wait as an opaque error; map it onto the
/// timeout variant so callers can tell it apart.
fn classify_wait_error(e: anyhow::Error, selector: &str, timeout: Duration) -> DriverError {
    let msg = e.to_string();
    if msg.contains("never came") || msg.to_lowercase().contains("timeout") {
        DriverError::Timeout {
            what: selector.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if msg.contains("No element found") || msg.contains("NoElementFound") {
        DriverError::ElementNotFound(selector.to_string())
    } else {
        DriverError::Other(e)
    }
}

impl BrowserDriver for ChromeDriver {
    fn navigate(&mut self, url: &str, timeout: Duration) -> DriverResult<()> {
        self.tab.set_default_timeout(timeout);
        let result = self
            .tab
            .navigate_to(url)
            .and_then(|t| t.wait_until_navigated())
            .map(|_| ())
            .map_err(|e| classify_wait_error(e, url, timeout));
        self.tab
            .set_default_timeout(Duration::from_millis(crate::types::NAVIGATION_TIMEOUT_MS));
        result
    }

    fn url(&mut self) -> DriverResult<String> {
        Ok(self.tab.get_url())
    }

    fn title(&mut self) -> DriverResult<String> {
        Ok(self.tab.get_title()?)
    }

    fn go_back(&mut self, timeout: Duration) -> DriverResult<()> {
        self.tab.evaluate("history.back()", false)?;
        std::thread::sleep(Duration::from_millis(200));
        self.tab.set_default_timeout(timeout);
        let result = self
            .tab
            .wait_until_navigated()
            .map(|_| ())
            .map_err(|e| classify_wait_error(e, "history.back()", timeout));
        self.tab
            .set_default_timeout(Duration::from_millis(crate::types::NAVIGATION_TIMEOUT_MS));
        result
    }

    fn click(&mut self, selector: &str, timeout: Duration) -> DriverResult<()> {
        let element = self.find(selector, timeout)?;
        if let Err(e) = element.click() {
            debug!(selector, error = %e, "native click failed, retrying via script");
            element
                .call_js_fn("function () { this.click(); }", vec![], false)
                .map_err(|js| anyhow!("Failed to click {selector}: {e} ({js})"))?;
        }
        Ok(())
    }

    fn fill(&mut self, selector: &str, text: &str, timeout: Duration) -> DriverResult<()> {
        let element = self.find(selector, timeout)?;
        element.click()?;
        element.call_js_fn(
            "function () { if ('value' in this) { this.value = ''; } }",
            vec![],
            false,
        )?;
        element.type_into(text)?;
        Ok(())
    }

    fn hover(&mut self, selector: &str, timeout: Duration) -> DriverResult<()> {
        self.find(selector, timeout)?.move_mouse_over()?;
        Ok(())
    }

    fn press_key(&mut self, key: &str) -> DriverResult<()> {
        self.tab.press_key(key)?;
        Ok(())
    }

    fn scroll(&mut self, direction: ScrollDirection, pixels: u32) -> DriverResult<()> {
        self.tab.evaluate(&direction.script(pixels), false)?;
        Ok(())
    }

    fn evaluate(&mut self, script: &str) -> DriverResult<Value> {
        let result = self
            .tab
            .evaluate(script, false)
            .map_err(|e| DriverError::Script(e.to_string()))?;
        Ok(result.value.unwrap_or(Value::Null))
    }

    fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
        state: WaitState,
    ) -> DriverResult<bool> {
        let sel = serde_json::to_string(selector).map_err(anyhow::Error::from)?;
        let script = format!(
            r#"(() => {{
  const el = document.querySelector({sel});
  const state = "{state}";
  if (state === "attached") return !!el;
  const visible = !!el && (() => {{
    const s = getComputedStyle(el);
    const r = el.getBoundingClientRect();
    return s.display !== 'none' && s.visibility !== 'hidden' && r.width > 0 && r.height > 0;
  }})();
  return state === "visible" ? visible : !visible;
}})()"#,
            state = state.as_str()
        );
        self.poll(&script, timeout)
    }

    fn screenshot(&mut self, path: &Path, full_page: bool) -> DriverResult<()> {
        let png = self
            .tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, full_page)?;
        std::fs::write(path, &png)
            .with_context(|| format!("writing screenshot to {}", path.display()))?;
        Ok(())
    }

    fn tabs(&mut self) -> DriverResult<Vec<TabInfo>> {
        let tabs = self.all_tabs()?;
        Ok(tabs
            .iter()
            .enumerate()
            .map(|(index, tab)| TabInfo {
                index,
                title: tab.get_title().unwrap_or_default(),
                url: tab.get_url(),
                active: Arc::ptr_eq(tab, &self.tab),
            })
            .collect())
    }

    fn switch_tab(&mut self, index: usize) -> DriverResult<()> {
        let tabs = self.all_tabs()?;
        let tab = tabs.get(index).ok_or(DriverError::InvalidTab {
            index,
            count: tabs.len(),
        })?;
        self.tab = Arc::clone(tab);
        if let Err(e) = self.tab.activate() {
            debug!(error = %e, "bring-to-front failed");
        }
        Ok(())
    }

    fn close_tab(&mut self, index: usize) -> DriverResult<()> {
        let tabs = self.all_tabs()?;
        let active = tabs
            .iter()
            .position(|t| Arc::ptr_eq(t, &self.tab))
            .unwrap_or(0);
        let next_active = active_after_close(tabs.len(), active, index)?;
        let closing = Arc::clone(&tabs[index]);

        closing.close(true)?;
        {
            let mut list = self
                .browser
                .get_tabs()
                .lock()
                .map_err(|_| anyhow!("tab list lock poisoned"))?;
            list.retain(|t| !Arc::ptr_eq(t, &closing));
        }

        let remaining = self.all_tabs()?;
        if let Some(tab) = remaining.get(next_active) {
            self.tab = Arc::clone(tab);
            if let Err(e) = self.tab.activate() {
                debug!(error = %e, "bring-to-front failed");
            }
        }
        Ok(())
    }

    fn wait(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn shutdown(&mut self) -> DriverResult<()> {
        info!("shutting down browser");
        let tabs = self.all_tabs()?;
        let failed = close_each(&tabs, |tab| tab.close(false).map(|_| ()));
        if failed > 0 {
            warn!(failed, total = tabs.len(), "some tabs did not close cleanly");
        }
        Ok(())
    }
}
