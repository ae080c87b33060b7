//! The fixed tool table the model acts through.
//!
//! Every handler returns text for the model. Failures are caught here and
//! rendered with a consistent prefix; nothing a handler does can unwind into
//! the agent loop. The three signal tools come back as tagged
//! [`ToolOutput`] variants for the loop to interpret.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::dom::discover::{self, DiscoveryHit, ElementFilter};
use crate::dom::{PageContext, eval_json, script_call};
use crate::error::{ActionError, DriverError};
use crate::hands::{BrowserDriver, ScrollDirection, TabInfo, WaitState};
use crate::session::BrowserSession;
use crate::types::{
    DEFAULT_ACTION_TIMEOUT_MS, HTML_DUMP_MAX_CHARS, NAVIGATION_TIMEOUT_MS, PageSnapshot,
    RiskLevel, ToolOutput, truncate_chars,
};

/// Tools after which the loop refreshes the page snapshot.
pub const NAVIGATION_TOOLS: &[&str] = &["click_element", "navigate_url", "scroll_page", "switch_tab"];

pub fn is_navigation_tool(name: &str) -> bool {
    NAVIGATION_TOOLS.contains(&name)
}

const LINK_LIST_LIMIT: usize = 20;
const MAX_WAIT_SECONDS: f64 = 10.0;

fn default_element_type() -> String {
    "any".to_string()
}

fn default_pixels() -> u32 {
    500
}

fn default_wait_ms() -> u64 {
    DEFAULT_ACTION_TIMEOUT_MS
}

fn default_load_secs() -> f64 {
    5.0
}

/// A parsed tool call. The tool name is the serde tag.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum Action {
    ObservePage,
    DiscoverElement {
        search_text: String,
        #[serde(default = "default_element_type")]
        element_type: String,
    },
    ExtractLinks {
        #[serde(default)]
        filter_text: Option<String>,
    },
    ClickElement {
        selector: String,
        #[serde(default)]
        description: String,
    },
    TypeText {
        selector: String,
        text: String,
        #[serde(default)]
        press_enter: bool,
    },
    HoverElement {
        selector: String,
        #[serde(default)]
        description: String,
    },
    PressKey {
        key: String,
    },
    NavigateUrl {
        url: String,
    },
    NavigateBack,
    ScrollPage {
        direction: ScrollDirection,
        #[serde(default = "default_pixels")]
        pixels: u32,
    },
    WaitForElement {
        selector: String,
        #[serde(default = "default_wait_ms")]
        timeout: u64,
        #[serde(default)]
        state: WaitState,
    },
    WaitSeconds {
        seconds: f64,
    },
    CheckModals,
    GetPageHtml,
    WaitForPageLoad {
        #[serde(default = "default_load_secs")]
        timeout: f64,
    },
    ListTabs,
    SwitchTab {
        tab_index: usize,
    },
    CloseTab {
        tab_index: usize,
    },
    TakeScreenshot {
        #[serde(default)]
        full_page: bool,
        #[serde(default)]
        filename: Option<String>,
    },
    RequestHumanHelp {
        description: String,
    },
    RequestConfirmation {
        action_description: String,
        risk_level: RiskLevel,
    },
    TaskComplete {
        summary: String,
    },
}

impl Action {
    pub fn parse(name: &str, arguments: &Value) -> Result<Self, ActionError> {
        if !tool_catalog().iter().any(|t| t.name == name) {
            return Err(ActionError::UnknownTool(name.to_string()));
        }
        let mut object = arguments.as_object().cloned().unwrap_or_default();
        object.insert("tool".to_string(), Value::String(name.to_string()));
        serde_json::from_value(Value::Object(object)).map_err(|e| ActionError::InvalidArguments {
            tool: name.to_string(),
            reason: e.to_string(),
        })
    }
}

/// One entry of the tool catalog sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

fn tool(name: &'static str, description: &'static str, input_schema: Value) -> ToolSpec {
    ToolSpec {
        name,
        description,
        input_schema,
    }
}

fn no_args() -> Value {
    json!({ "type": "object", "properties": {}, "required": [] })
}

pub fn tool_catalog() -> Vec<ToolSpec> {
    vec![
        tool(
            "observe_page",
            "Get text-based snapshot of current page. Use this FIRST to understand page structure before taking actions.",
            no_args(),
        ),
        tool(
            "discover_element",
            "Find elements by visible text (STEP 1 of interaction). Returns selectors for found elements. ALWAYS use this before clicking or typing!",
            json!({
                "type": "object",
                "properties": {
                    "search_text": { "type": "string", "description": "Visible text to search for (e.g., 'Login', 'Submit', 'Search')" },
                    "element_type": { "type": "string", "enum": ["button", "link", "input", "any"], "description": "Type of element to find. Use 'any' if unsure." }
                },
                "required": ["search_text"]
            }),
        ),
        tool(
            "extract_links",
            "Extract all links with their text and URLs. Useful to find specific links when discover_element fails.",
            json!({
                "type": "object",
                "properties": {
                    "filter_text": { "type": "string", "description": "Optional: filter links containing this text (case-insensitive)" }
                },
                "required": []
            }),
        ),
        tool(
            "click_element",
            "Click an element (STEP 2 of interaction). Use selector from discover_element. NEVER guess selectors!",
            json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "CSS selector from discover_element result" },
                    "description": { "type": "string", "description": "What you're clicking (for logging)" }
                },
                "required": ["selector", "description"]
            }),
        ),
        tool(
            "type_text",
            "Type text into an input field. Use selector from discover_element.",
            json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "CSS selector from discover_element" },
                    "text": { "type": "string", "description": "Text to type" },
                    "press_enter": { "type": "boolean", "description": "Press Enter after typing (for search boxes)", "default": false }
                },
                "required": ["selector", "text"]
            }),
        ),
        tool(
            "hover_element",
            "Hover over an element to reveal dropdown menus, tooltips, or hidden content. Use selector from discover_element.",
            json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "CSS selector from discover_element" },
                    "description": { "type": "string", "description": "What you're hovering over (for logging)" }
                },
                "required": ["selector", "description"]
            }),
        ),
        tool(
            "press_key",
            "Press a keyboard key. Useful for Enter, Escape, Tab, arrows, etc.",
            json!({
                "type": "object",
                "properties": {
                    "key": { "type": "string", "description": "Key to press: Enter, Escape, Tab, Space, ArrowUp, ArrowDown, ArrowLeft, ArrowRight, Backspace, Delete, PageUp, PageDown, Home, End" }
                },
                "required": ["key"]
            }),
        ),
        tool(
            "navigate_url",
            "Navigate to a specific URL.",
            json!({
                "type": "object",
                "properties": { "url": { "type": "string", "description": "Full URL to navigate to" } },
                "required": ["url"]
            }),
        ),
        tool(
            "navigate_back",
            "Navigate back to the previous page in browser history.",
            no_args(),
        ),
        tool(
            "scroll_page",
            "Scroll the page to load more content or navigate.",
            json!({
                "type": "object",
                "properties": {
                    "direction": { "type": "string", "enum": ["down", "up", "top", "bottom"], "description": "Scroll direction" },
                    "pixels": { "type": "integer", "description": "Amount to scroll (for down/up)", "default": 500 }
                },
                "required": ["direction"]
            }),
        ),
        tool(
            "wait_for_element",
            "Wait for a specific element to appear on the page. Use selector from discover_element or a known selector. Set state to 'hidden' to wait for a spinner or overlay to go away.",
            json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "CSS selector to wait for" },
                    "timeout": { "type": "integer", "description": "Timeout in milliseconds (default 5000)", "default": 5000 },
                    "state": {
                        "type": "string",
                        "enum": ["visible", "attached", "hidden"],
                        "description": "Element state to wait for (default visible)",
                        "default": "visible"
                    }
                },
                "required": ["selector"]
            }),
        ),
        tool(
            "wait_seconds",
            "Wait for page to load. Use SHORT waits (1-2 sec). Only use longer waits for slow pages.",
            json!({
                "type": "object",
                "properties": {
                    "seconds": { "type": "number", "description": "Seconds to wait (1-5 recommended)", "minimum": 1, "maximum": 10 }
                },
                "required": ["seconds"]
            }),
        ),
        tool(
            "check_modals",
            "Check for modal windows, popups, or overlays on the page. Use this after clicking buttons or navigating to detect any modals that may have appeared.",
            no_args(),
        ),
        tool(
            "list_tabs",
            "List all open browser tabs with their titles, URLs, and active status. Use before switching or closing tabs.",
            no_args(),
        ),
        tool(
            "switch_tab",
            "Switch to a different browser tab by index. Use list_tabs first to see available tabs.",
            json!({
                "type": "object",
                "properties": { "tab_index": { "type": "integer", "description": "Zero-based tab index (0 = first tab, 1 = second, etc.)" } },
                "required": ["tab_index"]
            }),
        ),
        tool(
            "close_tab",
            "Close a browser tab by index. Cannot close the only remaining tab. Use list_tabs first.",
            json!({
                "type": "object",
                "properties": { "tab_index": { "type": "integer", "description": "Zero-based tab index to close" } },
                "required": ["tab_index"]
            }),
        ),
        tool(
            "wait_for_page_load",
            "Wait for page to fully load including dynamic content. Use when page seems empty or elements are missing after navigation.",
            json!({
                "type": "object",
                "properties": { "timeout": { "type": "number", "description": "Maximum seconds to wait (default: 5)" } },
                "required": []
            }),
        ),
        tool(
            "get_page_html",
            "Get raw HTML of the page body (truncated to 5000 chars). Use when observe_page doesn't show expected elements. ONLY use when stuck.",
            no_args(),
        ),
        tool(
            "take_screenshot",
            "Save a PNG screenshot of the current page to disk for the operator. Does not change what you perceive.",
            json!({
                "type": "object",
                "properties": {
                    "full_page": { "type": "boolean", "description": "Capture the whole scrollable page", "default": false },
                    "filename": { "type": "string", "description": "Optional file name (saved under the screenshot directory)" }
                },
                "required": []
            }),
        ),
        tool(
            "request_human_help",
            "Request human intervention for tasks requiring manual action (CAPTCHA, 2FA, login, etc.). Use when you detect security barriers.",
            json!({
                "type": "object",
                "properties": { "description": { "type": "string", "description": "Clear instructions for what the user needs to do manually" } },
                "required": ["description"]
            }),
        ),
        tool(
            "request_confirmation",
            "Request user confirmation before destructive/financial/communication actions. ALWAYS use before: purchasing, deleting, payment, canceling subscriptions, sending messages/emails, job applications, posting content.",
            json!({
                "type": "object",
                "properties": {
                    "action_description": { "type": "string", "description": "Clear description of the action (e.g., 'Complete purchase for $99', 'Delete account')" },
                    "risk_level": { "type": "string", "enum": ["financial", "deletion", "irreversible"], "description": "Risk category" }
                },
                "required": ["action_description", "risk_level"]
            }),
        ),
        tool(
            "task_complete",
            "Mark the task as FULLY COMPLETE with a summary. Use ONLY when task is accomplished and verified. DO NOT use to ask for information.",
            json!({
                "type": "object",
                "properties": { "summary": { "type": "string", "description": "Detailed summary of what was accomplished" } },
                "required": ["summary"]
            }),
        ),
    ]
}

const LINK_TARGET_JS: &str = r#"const el = document.querySelector(args.selector);
if (!el) return JSON.stringify(null);
const link = (el.tagName.toLowerCase() === 'a' && el.href) ? el : el.querySelector('a[href]');
if (!link) return JSON.stringify({ isLink: false });
return JSON.stringify({ isLink: true, href: link.href, target: link.target || '_self' });"#;

const LINKS_JS: &str = r#"const links = [];
document.querySelectorAll('a[href]').forEach(el => {
  const rect = el.getBoundingClientRect();
  const style = getComputedStyle(el);
  if (style.display === 'none' || style.visibility === 'hidden' || rect.width === 0 || rect.height === 0) return;
  const text = (el.innerText || el.textContent || '').trim();
  const href = el.getAttribute('href');
  if (text && href) links.push({ text: text.substring(0, 100), href });
});
return JSON.stringify(links);"#;

const MODALS_JS: &str = r#"const SELECTORS = ['[role="dialog"]', '[role="alertdialog"]', '[class*="modal"]', '[class*="popup"]',
  '[class*="dialog"]', '[class*="overlay"]', '[id*="modal"]', '[id*="popup"]', '[id*="dialog"]'];
const visible = el => {
  const s = getComputedStyle(el);
  return s.display !== 'none' && s.visibility !== 'hidden';
};
const short = (el, fallback) => {
  const first = typeof el.className === 'string' ? el.className.split(' ')[0] : '';
  return el.id ? '#' + el.id : (first ? '.' + first : fallback);
};
const seen = new Set();
const modals = [];
for (const sel of SELECTORS) {
  for (const el of document.querySelectorAll(sel)) {
    const rect = el.getBoundingClientRect();
    const style = getComputedStyle(el);
    if (!visible(el) || style.opacity === '0' || rect.width <= 0 || rect.height <= 0) continue;
    const key = [rect.top, rect.left, rect.width, rect.height].join('-');
    if (seen.has(key)) continue;
    seen.add(key);
    const buttons = [];
    el.querySelectorAll('button, [role="button"], input[type="submit"], input[type="button"]').forEach(b => {
      if (!visible(b)) return;
      const text = (b.innerText || b.textContent || b.value || '').trim();
      if (text) buttons.push({ text, id: b.id || '', className: typeof b.className === 'string' ? b.className : '' });
    });
    const closeButtons = [];
    el.querySelectorAll('[aria-label*="close" i], [title*="close" i], .close, .modal-close, button[aria-label*="закрыть" i]').forEach(b => {
      if (!visible(b)) return;
      closeButtons.push({ selector: short(b, 'button'), text: (b.innerText || b.textContent || b.getAttribute('aria-label') || '').trim() });
    });
    modals.push({ selector: short(el, sel), text: (el.innerText || el.textContent || '').trim().substring(0, 300), buttons, closeButtons });
  }
}
return JSON.stringify(modals);"#;

const HTML_JS: &str = r#"const root = (document.body || document.documentElement).cloneNode(true);
root.querySelectorAll('script, style, meta, link, noscript').forEach(el => el.remove());
return JSON.stringify(root.outerHTML);"#;

const READY_STATE_JS: &str = "return JSON.stringify(document.readyState);";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LinkTarget {
    is_link: bool,
    href: Option<String>,
    target: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageLink {
    pub text: String,
    pub href: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModalButton {
    pub text: String,
    pub id: String,
    pub class_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CloseButton {
    pub selector: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModalInfo {
    pub selector: String,
    pub text: String,
    pub buttons: Vec<ModalButton>,
    pub close_buttons: Vec<CloseButton>,
}

const NO_MODALS: &str = "✅ No modal windows detected";

/// Name → handler dispatch over one [`BrowserSession`].
#[derive(Debug, Clone)]
pub struct ActionTable {
    context: PageContext,
    screenshot_dir: PathBuf,
}

impl ActionTable {
    pub fn new(token_limit: usize, screenshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            context: PageContext::new(token_limit),
            screenshot_dir: screenshot_dir.into(),
        }
    }

    pub fn snapshot(&self, session: &mut BrowserSession) -> Result<PageSnapshot, ActionError> {
        Ok(self.context.capture(session.driver())?)
    }

    /// Run one tool call. Never fails; errors become prefixed text.
    pub fn execute(&self, session: &mut BrowserSession, name: &str, arguments: &Value) -> ToolOutput {
        let action = match Action::parse(name, arguments) {
            Ok(action) => action,
            Err(e) => {
                warn!(tool = name, error = %e, "rejected tool call");
                return ToolOutput::Text(e.to_failure(&format!("Error executing {name}")));
            }
        };
        debug!(tool = name, ?action, "executing tool");
        self.run(session, action)
    }

    pub fn run(&self, session: &mut BrowserSession, action: Action) -> ToolOutput {
        let text = match action {
            Action::ObservePage => report(self.observe_page(session), "Failed to observe page"),
            Action::DiscoverElement {
                search_text,
                element_type,
            } => report(
                self.discover_element(session, &search_text, &element_type),
                "Discovery failed",
            ),
            Action::ExtractLinks { filter_text } => report(
                self.extract_links(session, filter_text.as_deref()),
                "Failed to extract links",
            ),
            Action::ClickElement {
                selector,
                description,
            } => report(
                self.click_element(session, &selector, &description),
                &format!("Failed to click '{description}'"),
            ),
            Action::TypeText {
                selector,
                text,
                press_enter,
            } => report(
                self.type_text(session, &selector, &text, press_enter),
                "Failed to type",
            ),
            Action::HoverElement {
                selector,
                description,
            } => report(
                self.hover_element(session, &selector, &description),
                "Failed to hover",
            ),
            Action::PressKey { key } => {
                report(self.press_key(session, &key), "Failed to press key")
            }
            Action::NavigateUrl { url } => {
                report(self.navigate_url(session, &url), "Failed to navigate")
            }
            Action::NavigateBack => report(self.navigate_back(session), "Failed to go back"),
            Action::ScrollPage { direction, pixels } => report(
                self.scroll_page(session, direction, pixels),
                "Failed to scroll",
            ),
            Action::WaitForElement {
                selector,
                timeout,
                state,
            } => report(
                self.wait_for_element(session, &selector, timeout, state),
                "Wait failed",
            ),
            Action::WaitSeconds { seconds } => self.wait_seconds(session, seconds),
            Action::CheckModals => report(
                self.check_modals(session.driver()),
                "Failed to check modals",
            ),
            Action::GetPageHtml => report(self.get_page_html(session), "Failed to get HTML"),
            Action::WaitForPageLoad { timeout } => report(
                self.wait_for_page_load(session, timeout),
                "Page load wait failed",
            ),
            Action::ListTabs => report(self.list_tabs(session), "Failed to list tabs"),
            Action::SwitchTab { tab_index } => {
                report(self.switch_tab(session, tab_index), "Failed to switch tab")
            }
            Action::CloseTab { tab_index } => {
                report(self.close_tab(session, tab_index), "Failed to close tab")
            }
            Action::TakeScreenshot {
                full_page,
                filename,
            } => report(
                self.take_screenshot(session, full_page, filename.as_deref()),
                "Failed to take screenshot",
            ),
            Action::RequestHumanHelp { description } => {
                return ToolOutput::HumanHelp { description };
            }
            Action::RequestConfirmation {
                action_description,
                risk_level,
            } => {
                return ToolOutput::Confirmation {
                    risk: risk_level,
                    action: action_description,
                };
            }
            Action::TaskComplete { summary } => return ToolOutput::Complete { summary },
        };
        ToolOutput::Text(text)
    }

    fn observe_page(&self, session: &mut BrowserSession) -> Result<String, ActionError> {
        let driver = session.driver();
        driver.wait(Duration::from_millis(200));
        let snapshot = self.context.capture(driver)?;

        let mut out = format!("📄 Current Page State:\n\n{}", snapshot.rendered_text);
        if snapshot.truncated {
            let _ = write!(
                out,
                "\n\n⚠️ Note: Snapshot truncated (using {} tokens)",
                snapshot.estimated_tokens
            );
        }

        let tabs = driver.tabs()?;
        if tabs.len() > 1 {
            let _ = writeln!(out, "\n\n📑 Open Tabs ({} total):", tabs.len());
            for tab in &tabs {
                let marker = if tab.active { "→ " } else { "  " };
                let _ = writeln!(out, "{marker}{}. {}", tab.index, truncate_chars(&tab.title, 60));
            }
            out.push_str("\n💡 Use switch_tab(index) to switch between tabs");
        }
        Ok(out)
    }

    fn discover_element(
        &self,
        session: &mut BrowserSession,
        search_text: &str,
        element_type: &str,
    ) -> Result<String, ActionError> {
        let filter = ElementFilter::parse(element_type);
        let hits = discover::discover(
            session.driver.as_mut(),
            &mut session.selectors,
            search_text,
            &filter,
        )?;
        info!(search_text, element_type, found = hits.len(), "discover_element");
        Ok(format_discovery(search_text, &hits))
    }

    fn extract_links(
        &self,
        session: &mut BrowserSession,
        filter_text: Option<&str>,
    ) -> Result<String, ActionError> {
        let links: Vec<PageLink> = eval_json(session.driver(), &script_call("links", &json!({}), LINKS_JS))?;
        if links.is_empty() {
            return Ok("❌ No links found on page".to_string());
        }
        let links: Vec<PageLink> = match filter_text.filter(|f| !f.trim().is_empty()) {
            Some(f) => {
                let needle = f.to_lowercase();
                links
                    .into_iter()
                    .filter(|l| l.text.to_lowercase().contains(&needle))
                    .collect()
            }
            None => links,
        };
        if links.is_empty() {
            return Ok(format!(
                "❌ No links found containing '{}'",
                filter_text.unwrap_or_default()
            ));
        }
        Ok(format_links(&links))
    }

    fn click_element(
        &self,
        session: &mut BrowserSession,
        selector: &str,
        description: &str,
    ) -> Result<String, ActionError> {
        session.ensure_live(selector)?;
        let timeout = Duration::from_millis(DEFAULT_ACTION_TIMEOUT_MS);

        let link: Option<LinkTarget> = eval_json(
            session.driver(),
            &script_call("link_target", &json!({ "selector": selector }), LINK_TARGET_JS),
        )?;
        if let Some(LinkTarget {
            is_link: true,
            href: Some(href),
            target,
        }) = link
        {
            let same_tab = target.as_deref().unwrap_or("_self") == "_self";
            if same_tab && !href.trim_start().starts_with("javascript:") {
                info!(href = %href, "following link directly instead of clicking");
                // A failed navigation may still have left the page.
                session.invalidate_selectors();
                let driver = session.driver();
                driver.navigate(&href, Duration::from_millis(NAVIGATION_TIMEOUT_MS))?;
                driver.wait(Duration::from_millis(500));

                let url = session.driver().url()?;
                let mut out = format!("✅ Navigated via link: {description}\nCurrent URL: {url}");
                self.append_modals(session.driver(), &mut out);
                return Ok(out);
            }
        }

        let driver = session.driver();
        let tabs_before = driver.tabs()?.len();
        let initial_url = driver.url()?;
        driver.click(selector, timeout)?;
        driver.wait(Duration::from_millis(500));

        let tabs_after = driver.tabs()?;
        let current_url = driver.url()?;
        let opened = tabs_after.len().saturating_sub(tabs_before);
        let navigated = current_url != initial_url;

        let mut out = format!("✅ Clicked: {description}\n");
        if opened > 0 {
            let _ = writeln!(out, "🆕 {opened} new tab(s) opened!");
            let _ = writeln!(out, "Current tab URL: {current_url}\n");
            out.push_str("New tabs:\n");
            for tab in &tabs_after[tabs_after.len() - opened..] {
                let _ = writeln!(out, "  - Tab {}: {}", tab.index, truncate_chars(&tab.title, 50));
                let _ = writeln!(out, "    URL: {}", truncate_chars(&tab.url, 70));
            }
            if let Some(newest) = tabs_after.last() {
                let _ = write!(
                    out,
                    "\n💡 Use switch_tab({}) to switch to the newest tab",
                    newest.index
                );
            }
        } else {
            let _ = write!(out, "Current URL: {current_url}");
            if navigated {
                out.push_str(" (navigated)");
            }
        }
        if opened > 0 || navigated {
            session.invalidate_selectors();
        }

        self.append_modals(session.driver(), &mut out);
        Ok(out)
    }

    fn append_modals(&self, driver: &mut dyn BrowserDriver, out: &mut String) {
        match self.check_modals(driver) {
            Ok(report) if !report.starts_with("✅ No modal") => {
                out.push_str("\n\n");
                out.push_str(&report);
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "modal check after click failed"),
        }
    }

    fn type_text(
        &self,
        session: &mut BrowserSession,
        selector: &str,
        text: &str,
        press_enter: bool,
    ) -> Result<String, ActionError> {
        session.ensure_live(selector)?;
        let driver = session.driver();
        driver.fill(selector, text, Duration::from_millis(DEFAULT_ACTION_TIMEOUT_MS))?;
        if !press_enter {
            return Ok(format!("✅ Typed into field: {text}"));
        }
        let before = driver.url()?;
        driver.press_key("Enter")?;
        if session.driver().url()? != before {
            session.invalidate_selectors();
        }
        Ok(format!("✅ Typed '{text}' and pressed Enter"))
    }

    fn hover_element(
        &self,
        session: &mut BrowserSession,
        selector: &str,
        description: &str,
    ) -> Result<String, ActionError> {
        session.ensure_live(selector)?;
        session
            .driver()
            .hover(selector, Duration::from_millis(DEFAULT_ACTION_TIMEOUT_MS))?;
        Ok(format!("✅ Hovered over: {description}"))
    }

    fn press_key(&self, session: &mut BrowserSession, key: &str) -> Result<String, ActionError> {
        let before = session.driver().url()?;
        session.driver().press_key(key)?;
        if session.driver().url()? != before {
            session.invalidate_selectors();
        }
        Ok(format!("✅ Pressed key: {key}"))
    }

    fn navigate_url(&self, session: &mut BrowserSession, url: &str) -> Result<String, ActionError> {
        session.invalidate_selectors();
        session
            .driver()
            .navigate(url, Duration::from_millis(NAVIGATION_TIMEOUT_MS))?;
        let title = session.driver().title()?;
        Ok(format!("✅ Navigated to: {url}\nPage title: {title}"))
    }

    fn navigate_back(&self, session: &mut BrowserSession) -> Result<String, ActionError> {
        session.invalidate_selectors();
        session
            .driver()
            .go_back(Duration::from_millis(NAVIGATION_TIMEOUT_MS))?;
        let url = session.driver().url()?;
        Ok(format!("✅ Navigated back to: {url}"))
    }

    fn scroll_page(
        &self,
        session: &mut BrowserSession,
        direction: ScrollDirection,
        pixels: u32,
    ) -> Result<String, ActionError> {
        session.driver().scroll(direction, pixels)?;
        Ok(format!("✅ Scrolled {}", direction.as_str()))
    }

    fn wait_for_element(
        &self,
        session: &mut BrowserSession,
        selector: &str,
        timeout_ms: u64,
        state: WaitState,
    ) -> Result<String, ActionError> {
        session.ensure_live(selector)?;
        let reached = session.driver().wait_for_selector(
            selector,
            Duration::from_millis(timeout_ms),
            state,
        )?;
        if !reached {
            return Err(DriverError::Timeout {
                what: format!("{selector} ({})", state.as_str()),
                timeout_ms,
            }
            .into());
        }
        Ok(match state {
            WaitState::Visible => format!("✅ Element appeared: {selector}"),
            WaitState::Attached => format!("✅ Element attached: {selector}"),
            WaitState::Hidden => format!("✅ Element gone: {selector}"),
        })
    }

    fn wait_seconds(&self, session: &mut BrowserSession, seconds: f64) -> String {
        let seconds = if seconds.is_finite() {
            seconds.clamp(0.0, MAX_WAIT_SECONDS)
        } else {
            0.0
        };
        session.driver().wait(Duration::from_secs_f64(seconds));
        format!("⏱️ Waited {seconds} seconds")
    }

    fn check_modals(&self, driver: &mut dyn BrowserDriver) -> Result<String, ActionError> {
        let modals: Vec<ModalInfo> = eval_json(driver, &script_call("modals", &json!({}), MODALS_JS))?;
        Ok(format_modals(&modals))
    }

    fn get_page_html(&self, session: &mut BrowserSession) -> Result<String, ActionError> {
        let html: String = eval_json(session.driver(), &script_call("html", &json!({}), HTML_JS))?;
        let shown = truncate_chars(&html, HTML_DUMP_MAX_CHARS);
        let mut out = format!("📄 Page HTML:\n\n{shown}");
        if shown.len() < html.len() {
            let _ = write!(
                out,
                "\n\n... [TRUNCATED - showing first {HTML_DUMP_MAX_CHARS} chars]"
            );
        }
        Ok(out)
    }

    fn wait_for_page_load(
        &self,
        session: &mut BrowserSession,
        timeout_secs: f64,
    ) -> Result<String, ActionError> {
        let timeout_secs = if timeout_secs.is_finite() {
            timeout_secs.clamp(0.0, MAX_WAIT_SECONDS * 3.0)
        } else {
            default_load_secs()
        };
        let timeout = Duration::from_secs_f64(timeout_secs);
        let script = script_call("ready_state", &json!({}), READY_STATE_JS);
        let driver = session.driver();

        let start = Instant::now();
        loop {
            let state: String = eval_json(driver, &script)?;
            if state == "complete" {
                break;
            }
            if start.elapsed() >= timeout {
                return Err(DriverError::Timeout {
                    what: format!("page load (readyState={state})"),
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into());
            }
            driver.wait(Duration::from_millis(100));
        }
        // Let scripts render after the load event.
        driver.wait(Duration::from_millis(300));
        Ok(format!("✅ Page fully loaded (waited up to {timeout_secs}s)"))
    }

    fn list_tabs(&self, session: &mut BrowserSession) -> Result<String, ActionError> {
        let tabs = session.driver().tabs()?;
        if tabs.is_empty() {
            return Ok("❌ No tabs found".to_string());
        }
        Ok(format_tab_list(&tabs))
    }

    fn switch_tab(&self, session: &mut BrowserSession, index: usize) -> Result<String, ActionError> {
        session.driver().switch_tab(index)?;
        session.invalidate_selectors();
        let tabs = session.driver().tabs()?;
        let tab = tabs.get(index).ok_or(DriverError::InvalidTab {
            index,
            count: tabs.len(),
        })?;
        Ok(format!(
            "✅ Switched to tab {index}:\n   {}\n   URL: {}",
            truncate_chars(&tab.title, 50),
            truncate_chars(&tab.url, 60)
        ))
    }

    fn close_tab(&self, session: &mut BrowserSession, index: usize) -> Result<String, ActionError> {
        let tabs = session.driver().tabs()?;
        let closing = tabs.get(index).cloned().ok_or(DriverError::InvalidTab {
            index,
            count: tabs.len(),
        })?;
        if tabs.len() == 1 {
            return Err(DriverError::OnlyTab.into());
        }
        session.driver().close_tab(index)?;
        if closing.active {
            session.invalidate_selectors();
        }

        let mut out = format!(
            "✅ Closed tab {index}: {}",
            truncate_chars(&closing.title, 50)
        );
        if let Some(active) = session.driver().tabs()?.into_iter().find(|t| t.active) {
            let _ = write!(
                out,
                "\nActive tab: {}. {}",
                active.index,
                truncate_chars(&active.title, 50)
            );
        }
        Ok(out)
    }

    fn take_screenshot(
        &self,
        session: &mut BrowserSession,
        full_page: bool,
        filename: Option<&str>,
    ) -> Result<String, ActionError> {
        std::fs::create_dir_all(&self.screenshot_dir)
            .map_err(|e| anyhow::anyhow!("creating {}: {e}", self.screenshot_dir.display()))?;
        let name = match filename.map(str::trim).filter(|f| !f.is_empty()) {
            // Only the file name; never let the model pick a directory.
            Some(f) => std::path::Path::new(f)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(screenshot_name),
            None => screenshot_name(),
        };
        let path = self.screenshot_dir.join(name);
        session.driver().screenshot(&path, full_page)?;
        info!(path = %path.display(), full_page, "saved screenshot");
        Ok(format!("📸 Screenshot saved: {}", path.display()))
    }
}

fn screenshot_name() -> String {
    format!("screenshot_{}.png", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

fn report(result: Result<String, ActionError>, context: &str) -> String {
    result.unwrap_or_else(|e| {
        warn!(context, error = %e, "tool failed");
        e.to_failure(context)
    })
}

pub fn format_discovery(search_text: &str, hits: &[DiscoveryHit]) -> String {
    match hits {
        [] => format!("❌ No elements found with text '{search_text}'"),
        [hit] => format!(
            "✅ Found 1 element:\n  Selector: {}\n  Text: {}\n  Tag: <{}>",
            hit.selector,
            truncate_chars(&hit.display_text, 80),
            hit.tag_name
        ),
        _ => {
            let mut out = format!("✅ Found {} elements:", hits.len());
            for (i, hit) in hits.iter().enumerate() {
                let _ = write!(
                    out,
                    "\n\n{}. Selector: {}\n   Text: {}\n   Tag: <{}>",
                    i + 1,
                    hit.selector,
                    truncate_chars(&hit.display_text, 60),
                    hit.tag_name
                );
            }
            out.push_str("\n\n💡 Use the selector from the list above for click_element or type_text");
            out
        }
    }
}

pub fn format_links(links: &[PageLink]) -> String {
    let mut out = format!("🔗 Found {} link(s):\n", links.len());
    for (i, link) in links.iter().take(LINK_LIST_LIMIT).enumerate() {
        let _ = write!(
            out,
            "\n{}. {}\n   URL: {}\n",
            i + 1,
            truncate_chars(&link.text, 60),
            truncate_chars(&link.href, 80)
        );
    }
    if links.len() > LINK_LIST_LIMIT {
        let _ = write!(out, "\n... and {} more links", links.len() - LINK_LIST_LIMIT);
    }
    out.push_str("\n💡 Use navigate_url with the URL to open the link");
    out
}

pub fn format_modals(modals: &[ModalInfo]) -> String {
    if modals.is_empty() {
        return NO_MODALS.to_string();
    }
    let mut out = format!("🪟 Detected {} modal window(s):\n", modals.len());
    for (i, modal) in modals.iter().enumerate() {
        let _ = write!(out, "\n--- Modal {} ---\nSelector: {}", i + 1, modal.selector);
        if !modal.text.is_empty() {
            let preview = truncate_chars(&modal.text, 200);
            let ellipsis = if preview.len() < modal.text.len() { "..." } else { "" };
            let _ = write!(out, "\nContent preview: {preview}{ellipsis}");
        }
        if !modal.buttons.is_empty() {
            let _ = write!(out, "\n\nButtons found ({}):", modal.buttons.len());
            for b in modal.buttons.iter().take(5) {
                let detail = if !b.id.is_empty() {
                    format!(" (id='{}')", b.id)
                } else if !b.class_name.is_empty() {
                    format!(" (class='{}')", b.class_name)
                } else {
                    String::new()
                };
                let _ = write!(out, "\n  - {}{detail}", b.text);
            }
        }
        if !modal.close_buttons.is_empty() {
            out.push_str("\n\nClose buttons:");
            for b in modal.close_buttons.iter().take(3) {
                let _ = write!(out, "\n  - Selector: {}", b.selector);
                if !b.text.is_empty() {
                    let _ = write!(out, "\n    Text: {}", b.text);
                }
            }
        }
    }
    out.push_str(
        "\n\n💡 Use discover_element to find specific buttons in the modal, then click_element to click them.",
    );
    out
}

pub fn format_tab_list(tabs: &[TabInfo]) -> String {
    let mut out = format!("📑 Found {} open tab(s):\n", tabs.len());
    for tab in tabs {
        let active = if tab.active { " [ACTIVE]" } else { "" };
        let _ = write!(
            out,
            "\n{}. {}\n   URL: {}{active}",
            tab.index,
            truncate_chars(&tab.title, 50),
            truncate_chars(&tab.url, 60)
        );
    }
    out
}
