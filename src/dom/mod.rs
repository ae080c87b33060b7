//! Page perception.
//!
//! The live DOM is read through one probe script that walks every element in
//! document order and emits a flat list of [`DomNode`] facts. Everything after
//! that (classification, rendering, budgeting, discovery ranking) is plain
//! Rust over those facts, so it runs the same against a real page or a
//! synthetic one.

pub mod budget;
pub mod classify;
pub mod discover;
pub mod render;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::debug;

use crate::error::DriverError;
use crate::hands::{BrowserDriver, DriverResult};
use crate::types::PageSnapshot;

pub use budget::ContextBudget;
pub use discover::{DiscoveryHit, SelectorCheck, SelectorTable};
pub use render::RenderLimits;

/// Attribute carrying the per-page discovery slot (`0..9`).
pub const DISCOVER_ATTR: &str = "data-vision-discover";
/// Scratch attribute the probe leaves on matched nodes until marking is done.
pub const PROBE_ATTR: &str = "data-vision-probe";

/// Tags that accept input even when laid out at zero size.
const FORM_TAGS: &[&str] = &["input", "textarea", "select", "form"];
/// Intrinsically interactive tags.
pub const INTERACTIVE_TAGS: &[&str] = &["button", "a", "input", "select", "textarea"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ComputedStyle {
    pub display: String,
    pub visibility: String,
    pub opacity: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rect {
    pub width: f64,
    pub height: f64,
}

/// Facts about one element, as emitted by the probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DomNode {
    /// Document-order position among all probed elements.
    pub index: usize,
    pub parent: Option<usize>,
    pub parent_tag: Option<String>,
    pub parent_role: Option<String>,
    pub tag: String,
    pub id: Option<String>,
    pub class_name: String,
    pub role: Option<String>,
    pub attrs: HashMap<String, String>,
    pub inner_text: String,
    pub text_content: String,
    /// Concatenated direct text-node children only.
    pub own_text: String,
    /// Full `textContent` length before the probe capped the text fields.
    pub text_length: usize,
    pub value: Option<String>,
    pub style: ComputedStyle,
    pub rect: Rect,
}

impl DomNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn class_lower(&self) -> String {
        self.class_name.to_lowercase()
    }

    pub fn class_tokens(&self, max: usize) -> Vec<String> {
        self.class_name
            .split_whitespace()
            .take(max)
            .map(str::to_string)
            .collect()
    }

    pub fn is_form_control(&self) -> bool {
        FORM_TAGS.contains(&self.tag.as_str())
    }

    pub fn is_interactive_tag(&self) -> bool {
        INTERACTIVE_TAGS.contains(&self.tag.as_str())
    }

    pub fn has_interactive_role(&self) -> bool {
        matches!(self.role.as_deref(), Some("button") | Some("link"))
    }

    /// True when the immediate parent is a clickable control.
    pub fn parent_is_interactive(&self) -> bool {
        let tag = self.parent_tag.as_deref().unwrap_or("");
        INTERACTIVE_TAGS.contains(&tag)
            || matches!(self.parent_role.as_deref(), Some("button") | Some("link"))
    }

    /// Narrower than [`Self::parent_is_interactive`]: only button parents.
    pub fn parent_is_button(&self) -> bool {
        self.parent_tag.as_deref() == Some("button") || self.parent_role.as_deref() == Some("button")
    }

    /// Hidden by computed style; form controls are exempt from the zero-size
    /// check since custom widgets often collapse the native control.
    pub fn is_visible(&self) -> bool {
        if self.style.display == "none"
            || self.style.visibility == "hidden"
            || self.style.opacity.trim() == "0"
        {
            return false;
        }
        let has_size = self.rect.width > 0.0 && self.rect.height > 0.0;
        has_size || self.is_form_control()
    }

    /// First non-blank of the usual text sources, trimmed.
    pub fn text_fallback(&self, sources: &[TextSource]) -> Option<String> {
        sources
            .iter()
            .filter_map(|s| s.read(self))
            .map(str::trim)
            .find(|t| !t.is_empty())
            .map(str::to_string)
    }
}

/// Places an element's human-readable text can come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    InnerText,
    TextContent,
    Value,
    Placeholder,
    AriaLabel,
    Title,
    Alt,
    Name,
}

impl TextSource {
    fn read<'a>(&self, node: &'a DomNode) -> Option<&'a str> {
        match self {
            TextSource::InnerText => Some(node.inner_text.as_str()),
            TextSource::TextContent => Some(node.text_content.as_str()),
            TextSource::Value => node.value.as_deref(),
            TextSource::Placeholder => node.attr("placeholder"),
            TextSource::AriaLabel => node.attr("aria-label"),
            TextSource::Title => node.attr("title"),
            TextSource::Alt => node.attr("alt"),
            TextSource::Name => node.attr("name"),
        }
    }
}

/// Wrap a script body so it receives `args` and is recognisable by name.
pub fn script_call(name: &str, args: &Value, body: &str) -> String {
    format!("// probe:{name}\n(() => {{\nconst args = {args};\n{body}\n}})()")
}

/// Reverse of [`script_call`]: the probe name and its arguments.
pub fn parse_script_call(script: &str) -> Option<(String, Value)> {
    let mut lines = script.lines();
    let name = lines.next()?.strip_prefix("// probe:")?.to_string();
    let args_line = lines.find_map(|l| l.strip_prefix("const args = "))?;
    let args = serde_json::from_str(args_line.strip_suffix(';')?).ok()?;
    Some((name, args))
}

/// Run a probe whose body returns `JSON.stringify(...)` and decode it.
pub fn eval_json<T: DeserializeOwned>(
    driver: &mut dyn BrowserDriver,
    script: &str,
) -> DriverResult<T> {
    let value = driver.evaluate(script)?;
    let raw = match value {
        Value::String(s) => s,
        Value::Null => "null".to_string(),
        other => other.to_string(),
    };
    serde_json::from_str(&raw).map_err(|e| DriverError::Script(format!("bad probe output: {e}")))
}

const NODES_JS: &str = r#"const SKIP = new Set(['SCRIPT','STYLE','NOSCRIPT','SVG','LINK','META','TEMPLATE']);
const ATTRS = ['href','placeholder','aria-label','title','alt','name','type','target',
  'contenteditable','data-product-id','data-price','data-testid','data-qa','onclick'];
const cap = args.cap;
const needle = args.needle ? args.needle.toLowerCase() : null;
document.querySelectorAll('[data-vision-probe]').forEach(el => el.removeAttribute('data-vision-probe'));
const ids = new Map();
const out = [];
let n = 0;
const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_ELEMENT, {
  acceptNode: el => SKIP.has(el.tagName.toUpperCase()) ? NodeFilter.FILTER_REJECT : NodeFilter.FILTER_ACCEPT
});
let el;
while ((el = walker.nextNode())) {
  const i = n++;
  ids.set(el, i);
  const attrs = {};
  for (const a of ATTRS) {
    const v = el.getAttribute(a);
    if (v !== null) attrs[a] = v.slice(0, cap);
  }
  const inner = el.innerText || '';
  const content = el.textContent || '';
  if (needle) {
    const hay = [inner, content, attrs['placeholder'], attrs['aria-label'], attrs['title'], attrs['alt'], attrs['name']];
    if (!hay.some(h => h && h.toLowerCase().includes(needle))) continue;
    if (args.tag) el.setAttribute('data-vision-probe', String(i));
  }
  const own = Array.from(el.childNodes)
    .filter(c => c.nodeType === Node.TEXT_NODE)
    .map(c => c.textContent.trim())
    .filter(t => t)
    .join(' ');
  const cls = typeof el.className === 'string' ? el.className : ((el.className && el.className.baseVal) || '');
  const parent = el.parentElement;
  const style = getComputedStyle(el);
  const rect = el.getBoundingClientRect();
  out.push({
    index: i,
    parent: parent && ids.has(parent) ? ids.get(parent) : null,
    parentTag: parent ? parent.tagName.toLowerCase() : null,
    parentRole: parent ? parent.getAttribute('role') : null,
    tag: el.tagName.toLowerCase(),
    id: el.id || null,
    className: cls,
    role: el.getAttribute('role'),
    attrs,
    innerText: inner.slice(0, cap),
    textContent: content.slice(0, cap),
    ownText: own.slice(0, cap),
    textLength: content.length,
    value: ('value' in el && typeof el.value === 'string') ? el.value.slice(0, cap) : null,
    style: { display: style.display, visibility: style.visibility, opacity: style.opacity },
    rect: { width: rect.width, height: rect.height }
  });
}
return JSON.stringify(out);"#;

/// Text cap for the full-page probe.
const SNAPSHOT_TEXT_CAP: usize = 300;
/// Discovery matches on text, so it keeps more of it.
const DISCOVERY_TEXT_CAP: usize = 2000;

/// Read every element on the page.
pub fn probe_nodes(driver: &mut dyn BrowserDriver) -> DriverResult<Vec<DomNode>> {
    let script = script_call(
        "nodes",
        &json!({ "needle": null, "tag": false, "cap": SNAPSHOT_TEXT_CAP }),
        NODES_JS,
    );
    let nodes: Vec<DomNode> = eval_json(driver, &script)?;
    debug!(count = nodes.len(), "probed page nodes");
    Ok(nodes)
}

/// Read only elements whose text sources contain `needle`, leaving the
/// scratch probe attribute on each so a later [`mark_nodes`] can find them.
pub fn probe_matching(driver: &mut dyn BrowserDriver, needle: &str) -> DriverResult<Vec<DomNode>> {
    let script = script_call(
        "nodes",
        &json!({ "needle": needle, "tag": true, "cap": DISCOVERY_TEXT_CAP }),
        NODES_JS,
    );
    eval_json(driver, &script)
}

const MARK_JS: &str = r#"document.querySelectorAll('[data-vision-discover]').forEach(el => el.removeAttribute('data-vision-discover'));
let marked = 0;
for (const [probe, slot] of args.slots) {
  const el = document.querySelector('[data-vision-probe="' + probe + '"]');
  if (el) {
    el.setAttribute('data-vision-discover', String(slot));
    marked++;
  }
}
document.querySelectorAll('[data-vision-probe]').forEach(el => el.removeAttribute('data-vision-probe'));
return JSON.stringify(marked);"#;

/// Burn discovery slots onto probed nodes, clearing any earlier slots first.
/// `slots` pairs a probe index with its slot number.
pub fn mark_nodes(driver: &mut dyn BrowserDriver, slots: &[(usize, usize)]) -> DriverResult<usize> {
    let script = script_call("mark", &json!({ "slots": slots }), MARK_JS);
    eval_json(driver, &script)
}

/// Turns the live page into a budgeted [`PageSnapshot`].
#[derive(Debug, Clone)]
pub struct PageContext {
    budget: ContextBudget,
    limits: RenderLimits,
}

impl PageContext {
    pub fn new(token_limit: usize) -> Self {
        Self {
            budget: ContextBudget::new(token_limit),
            limits: RenderLimits::default(),
        }
    }

    pub fn capture(&self, driver: &mut dyn BrowserDriver) -> DriverResult<PageSnapshot> {
        let url = driver.url()?;
        let title = driver.title()?;
        let nodes = probe_nodes(driver)?;
        let records = classify::classify(&nodes);
        let rendered = render::render(&url, &title, &records, &self.limits);

        let (rendered_text, truncated) = self.budget.fit(&rendered);
        // Re-estimate: the pre-truncation figure no longer applies.
        let estimated_tokens = self.budget.estimate(&rendered_text);
        debug!(
            elements = records.len(),
            estimated_tokens, truncated, "captured page snapshot"
        );

        Ok(PageSnapshot {
            url,
            title,
            rendered_text,
            estimated_tokens,
            truncated,
        })
    }
}
