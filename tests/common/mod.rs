//! In-memory stand-ins for the browser, the model and the operator.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use text_vision_agent::actions::ToolSpec;
use text_vision_agent::brain::ModelBackend;
use text_vision_agent::dom::discover::parse_slot;
use text_vision_agent::dom::{ComputedStyle, DomNode, Rect, parse_script_call};
use text_vision_agent::error::{DriverError, ModelError};
use text_vision_agent::hands::{
    BrowserDriver, DriverResult, ScrollDirection, TabInfo, WaitState, active_after_close,
};
use text_vision_agent::operator::{Operator, OperatorReply};
use text_vision_agent::types::{ModelResponse, StopReason, ToolInvocation, Turn};

/// A synthetic page: a flat node list in document order.
#[derive(Debug, Clone)]
pub struct FakePage {
    pub url: String,
    pub title: String,
    pub nodes: Vec<DomNode>,
}

impl FakePage {
    pub fn new(url: &str, title: &str) -> Self {
        let mut page = Self {
            url: url.to_string(),
            title: title.to_string(),
            nodes: Vec::new(),
        };
        page.el(None, "body", "");
        page
    }

    /// Append an element under `parent` (0 is `<body>`). `own_text` also
    /// flows into the inner text of every ancestor.
    pub fn el(&mut self, parent: Option<usize>, tag: &str, own_text: &str) -> usize {
        let index = self.nodes.len();
        let (parent_tag, parent_role) = match parent {
            Some(p) => (Some(self.nodes[p].tag.clone()), self.nodes[p].role.clone()),
            None => (None, None),
        };
        self.nodes.push(DomNode {
            index,
            parent,
            parent_tag,
            parent_role,
            tag: tag.to_string(),
            own_text: own_text.to_string(),
            style: ComputedStyle {
                display: "block".into(),
                visibility: "visible".into(),
                opacity: "1".into(),
            },
            rect: Rect {
                width: 120.0,
                height: 24.0,
            },
            ..Default::default()
        });

        if !own_text.is_empty() {
            let mut cursor = Some(index);
            while let Some(i) = cursor {
                let node = &mut self.nodes[i];
                if !node.inner_text.is_empty() {
                    node.inner_text.push(' ');
                    node.text_content.push(' ');
                }
                node.inner_text.push_str(own_text);
                node.text_content.push_str(own_text);
                node.text_length = node.text_content.chars().count();
                cursor = node.parent;
            }
        }
        index
    }

    pub fn attr(&mut self, index: usize, name: &str, value: &str) -> &mut Self {
        self.nodes[index]
            .attrs
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn set_id(&mut self, index: usize, id: &str) -> &mut Self {
        self.nodes[index].id = Some(id.to_string());
        self
    }

    pub fn set_class(&mut self, index: usize, class: &str) -> &mut Self {
        self.nodes[index].class_name = class.to_string();
        self
    }

    pub fn hide(&mut self, index: usize) -> &mut Self {
        self.nodes[index].style.display = "none".into();
        self
    }

    /// Shorthand for `<a href>` with a text label.
    pub fn link(&mut self, parent: Option<usize>, text: &str, href: &str) -> usize {
        let a = self.el(parent, "a", text);
        self.attr(a, "href", href);
        a
    }

    fn is_within(&self, index: usize, ancestor: usize) -> bool {
        let mut cursor = Some(index);
        while let Some(i) = cursor {
            if i == ancestor {
                return true;
            }
            cursor = self.nodes[i].parent;
        }
        false
    }
}

#[derive(Debug, Clone)]
struct FakeTab {
    history: Vec<String>,
    /// Discovery slot to node index.
    marks: HashMap<usize, usize>,
    probed: HashSet<usize>,
}

impl FakeTab {
    fn at(url: &str) -> Self {
        Self {
            history: vec![url.to_string()],
            marks: HashMap::new(),
            probed: HashSet::new(),
        }
    }

    fn url(&self) -> &str {
        self.history.last().map(String::as_str).unwrap_or("about:blank")
    }
}

/// Browser over a fixed set of [`FakePage`]s. Answers the probe scripts by
/// name instead of running them.
pub struct FakeDriver {
    pages: HashMap<String, FakePage>,
    tabs: Vec<FakeTab>,
    active: usize,
    /// Navigations to these URLs time out and leave the tab where it was.
    hanging: HashSet<String>,
    /// Every driver-level effect, for assertions after the driver is boxed.
    pub events: Arc<Mutex<Vec<String>>>,
}

impl FakeDriver {
    pub fn new(pages: Vec<FakePage>, start: &str) -> Self {
        Self {
            pages: pages.into_iter().map(|p| (p.url.clone(), p)).collect(),
            tabs: vec![FakeTab::at(start)],
            active: 0,
            hanging: HashSet::new(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn hang_on(mut self, url: &str) -> Self {
        self.hanging.insert(url.to_string());
        self
    }

    /// Open extra tabs in the background; the first tab stays active.
    pub fn with_tabs(mut self, urls: &[&str]) -> Self {
        self.tabs.extend(urls.iter().map(|u| FakeTab::at(u)));
        self
    }

    pub fn events(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.events)
    }

    fn log(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn tab(&self) -> &FakeTab {
        &self.tabs[self.active]
    }

    fn tab_mut(&mut self) -> &mut FakeTab {
        &mut self.tabs[self.active]
    }

    fn page(&self) -> Option<&FakePage> {
        self.pages.get(self.tab().url())
    }

    fn resolve(&self, selector: &str) -> Option<usize> {
        let page = self.page()?;
        if let Some(slot) = parse_slot(selector) {
            return self.tab().marks.get(&slot).copied();
        }
        let selector = selector.trim();
        if let Some(id) = selector.strip_prefix('#') {
            return page
                .nodes
                .iter()
                .find(|n| n.id.as_deref() == Some(id))
                .map(|n| n.index);
        }
        page.nodes.iter().find(|n| n.tag == selector).map(|n| n.index)
    }

    /// The link an element is or contains, as (absolute href, target).
    fn link_for(&self, index: usize) -> Option<(String, String)> {
        let page = self.page()?;
        let is_link = |n: &DomNode| n.tag == "a" && n.attr("href").is_some();
        let node = &page.nodes[index];
        let link = if is_link(node) {
            node
        } else {
            page.nodes
                .iter()
                .find(|n| n.index != index && page.is_within(n.index, index) && is_link(*n))?
        };
        let href = absolute(&page.url, link.attr("href")?);
        let target = link.attr("target").unwrap_or("_self").to_string();
        Some((href, target))
    }

    fn load(&mut self, url: &str) {
        let tab = self.tab_mut();
        tab.history.push(url.to_string());
        tab.marks.clear();
        tab.probed.clear();
    }

    fn probe_nodes(&mut self, args: &Value) -> Value {
        let needle = args["needle"].as_str().map(str::to_lowercase);
        let tag = args["tag"].as_bool().unwrap_or(false);
        let nodes: Vec<DomNode> = match self.page() {
            Some(page) => page
                .nodes
                .iter()
                .filter(|n| match &needle {
                    Some(needle) => haystack(n).iter().any(|h| h.to_lowercase().contains(needle)),
                    None => true,
                })
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        if needle.is_some() && tag {
            self.tab_mut().probed = nodes.iter().map(|n| n.index).collect();
        }
        Value::String(serde_json::to_string(&nodes).unwrap())
    }

    fn mark(&mut self, args: &Value) -> Value {
        let tab = self.tab_mut();
        tab.marks.clear();
        let mut marked = 0;
        for pair in args["slots"].as_array().cloned().unwrap_or_default() {
            let probe = pair[0].as_u64().unwrap() as usize;
            let slot = pair[1].as_u64().unwrap() as usize;
            if tab.probed.contains(&probe) {
                tab.marks.insert(slot, probe);
                marked += 1;
            }
        }
        tab.probed.clear();
        Value::String(marked.to_string())
    }

    fn link_target(&self, args: &Value) -> Value {
        let selector = args["selector"].as_str().unwrap_or_default();
        let body = match self.resolve(selector) {
            None => json!(null),
            Some(index) => match self.link_for(index) {
                Some((href, target)) => json!({ "isLink": true, "href": href, "target": target }),
                None => json!({ "isLink": false }),
            },
        };
        Value::String(body.to_string())
    }

    fn links(&self) -> Value {
        let links: Vec<Value> = self
            .page()
            .map(|page| {
                page.nodes
                    .iter()
                    .filter(|n| n.tag == "a" && n.is_visible() && !n.inner_text.trim().is_empty())
                    .filter_map(|n| {
                        Some(json!({ "text": n.inner_text.trim(), "href": n.attr("href")? }))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Value::String(Value::Array(links).to_string())
    }

    fn html(&self) -> Value {
        let body = self
            .page()
            .map(|p| format!("<body>{}</body>", p.nodes[0].inner_text))
            .unwrap_or_else(|| "<body></body>".to_string());
        Value::String(Value::String(body).to_string())
    }
}

fn haystack(node: &DomNode) -> Vec<&str> {
    let mut out = vec![node.inner_text.as_str(), node.text_content.as_str()];
    for key in ["placeholder", "aria-label", "title", "alt", "name"] {
        if let Some(v) = node.attr(key) {
            out.push(v);
        }
    }
    out
}

fn absolute(base: &str, href: &str) -> String {
    if href.contains("://") {
        return href.to_string();
    }
    let origin = match base.find("://") {
        Some(scheme_end) => match base[scheme_end + 3..].find('/') {
            Some(path_start) => &base[..scheme_end + 3 + path_start],
            None => base,
        },
        None => base,
    };
    format!("{origin}/{}", href.trim_start_matches('/'))
}

impl BrowserDriver for FakeDriver {
    fn navigate(&mut self, url: &str, timeout: Duration) -> DriverResult<()> {
        self.log(format!("navigate {url}"));
        if self.hanging.contains(url) {
            return Err(DriverError::Timeout {
                what: format!("navigation to {url}"),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        self.load(url);
        Ok(())
    }

    fn url(&mut self) -> DriverResult<String> {
        Ok(self.tab().url().to_string())
    }

    fn title(&mut self) -> DriverResult<String> {
        Ok(self.page().map(|p| p.title.clone()).unwrap_or_default())
    }

    fn go_back(&mut self, _timeout: Duration) -> DriverResult<()> {
        let tab = self.tab_mut();
        if tab.history.len() < 2 {
            return Err(DriverError::Other(anyhow::anyhow!("no history to go back to")));
        }
        tab.history.pop();
        tab.marks.clear();
        self.log("back".to_string());
        Ok(())
    }

    fn click(&mut self, selector: &str, _timeout: Duration) -> DriverResult<()> {
        let index = self
            .resolve(selector)
            .ok_or_else(|| DriverError::ElementNotFound(selector.to_string()))?;
        self.log(format!("click {selector}"));
        if let Some((href, target)) = self.link_for(index) {
            if target == "_blank" {
                self.tabs.push(FakeTab::at(&href));
            } else {
                self.load(&href);
            }
        }
        Ok(())
    }

    fn fill(&mut self, selector: &str, text: &str, _timeout: Duration) -> DriverResult<()> {
        self.resolve(selector)
            .ok_or_else(|| DriverError::ElementNotFound(selector.to_string()))?;
        self.log(format!("fill {selector} {text}"));
        Ok(())
    }

    fn hover(&mut self, selector: &str, _timeout: Duration) -> DriverResult<()> {
        self.resolve(selector)
            .ok_or_else(|| DriverError::ElementNotFound(selector.to_string()))?;
        self.log(format!("hover {selector}"));
        Ok(())
    }

    fn press_key(&mut self, key: &str) -> DriverResult<()> {
        self.log(format!("key {key}"));
        Ok(())
    }

    fn scroll(&mut self, direction: ScrollDirection, pixels: u32) -> DriverResult<()> {
        self.log(format!("scroll {} {pixels}", direction.as_str()));
        Ok(())
    }

    fn evaluate(&mut self, script: &str) -> DriverResult<Value> {
        let (name, args) = parse_script_call(script)
            .ok_or_else(|| DriverError::Script("unrecognised script".to_string()))?;
        Ok(match name.as_str() {
            "nodes" => self.probe_nodes(&args),
            "mark" => self.mark(&args),
            "link_target" => self.link_target(&args),
            "links" => self.links(),
            "modals" => Value::String("[]".to_string()),
            "html" => self.html(),
            "ready_state" => Value::String("\"complete\"".to_string()),
            other => return Err(DriverError::Script(format!("no fake for probe {other}"))),
        })
    }

    fn wait_for_selector(
        &mut self,
        selector: &str,
        _timeout: Duration,
        state: WaitState,
    ) -> DriverResult<bool> {
        let visible = |i: usize| self.page().is_some_and(|p| p.nodes[i].is_visible());
        Ok(match (state, self.resolve(selector)) {
            (WaitState::Attached, found) => found.is_some(),
            (WaitState::Visible, found) => found.is_some_and(visible),
            (WaitState::Hidden, found) => !found.is_some_and(visible),
        })
    }

    fn screenshot(&mut self, path: &Path, _full_page: bool) -> DriverResult<()> {
        self.log(format!("screenshot {}", path.display()));
        Ok(())
    }

    fn tabs(&mut self) -> DriverResult<Vec<TabInfo>> {
        Ok(self
            .tabs
            .iter()
            .enumerate()
            .map(|(index, tab)| TabInfo {
                index,
                title: self
                    .pages
                    .get(tab.url())
                    .map(|p| p.title.clone())
                    .unwrap_or_default(),
                url: tab.url().to_string(),
                active: index == self.active,
            })
            .collect())
    }

    fn switch_tab(&mut self, index: usize) -> DriverResult<()> {
        if index >= self.tabs.len() {
            return Err(DriverError::InvalidTab {
                index,
                count: self.tabs.len(),
            });
        }
        self.active = index;
        Ok(())
    }

    fn close_tab(&mut self, index: usize) -> DriverResult<()> {
        let next = active_after_close(self.tabs.len(), self.active, index)?;
        self.tabs.remove(index);
        self.active = next;
        self.log(format!("close_tab {index}"));
        Ok(())
    }

    fn wait(&mut self, _duration: Duration) {}

    fn shutdown(&mut self) -> DriverResult<()> {
        Ok(())
    }
}

/// Two linked pages: a listing with a "Next" pagination link and page two.
pub fn paginated_site() -> Vec<FakePage> {
    let mut first = FakePage::new("https://shop.test/page1", "Results - Page 1");
    let nav = first.el(Some(0), "nav", "");
    first.link(Some(nav), "Home", "/");
    let list = first.el(Some(0), "ul", "");
    for name in ["Red kettle", "Steel kettle"] {
        let item = first.el(Some(list), "li", "");
        first.el(Some(item), "h3", name);
    }
    let pager = first.el(Some(0), "div", "");
    first.set_class(pager, "pagination");
    let next = first.link(Some(pager), "", "/page2");
    first.el(Some(next), "span", "Next");
    let search = first.el(Some(0), "input", "");
    first.attr(search, "placeholder", "Search products");
    first.set_id(search, "q");

    let mut second = FakePage::new("https://shop.test/page2", "Results - Page 2");
    let list = second.el(Some(0), "ul", "");
    let item = second.el(Some(list), "li", "");
    second.el(Some(item), "h3", "Copper kettle");
    second.link(Some(0), "Previous", "/page1");

    vec![first, second]
}

/// Model stand-in that replays a fixed script and records what it was sent.
pub struct ScriptedBrain {
    replies: Mutex<VecDeque<Result<ModelResponse, String>>>,
    fallback: Option<ModelResponse>,
    pub seen: Arc<Mutex<Vec<Vec<Turn>>>>,
}

impl ScriptedBrain {
    pub fn new(replies: Vec<ModelResponse>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            fallback: None,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Keep answering with `reply` once the script runs out.
    pub fn then_forever(mut self, reply: ModelResponse) -> Self {
        self.fallback = Some(reply);
        self
    }

    pub fn fail_first(self, message: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_front(Err(message.to_string()));
        self
    }

    pub fn seen(&self) -> Arc<Mutex<Vec<Vec<Turn>>>> {
        Arc::clone(&self.seen)
    }
}

#[async_trait]
impl ModelBackend for ScriptedBrain {
    async fn chat(
        &self,
        _system: &str,
        turns: &[Turn],
        _tools: &[ToolSpec],
    ) -> Result<ModelResponse, ModelError> {
        self.seen.lock().unwrap().push(turns.to_vec());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(ModelError::Decode(message)),
            None => Ok(self.fallback.clone().unwrap_or_else(|| say("Nothing left to do."))),
        }
    }
}

pub fn say(text: &str) -> ModelResponse {
    ModelResponse {
        text_blocks: vec![text.to_string()],
        tool_calls: Vec::new(),
        stop_reason: StopReason::EndTurn,
    }
}

pub fn call(id: &str, name: &str, arguments: Value) -> ModelResponse {
    ModelResponse {
        text_blocks: Vec::new(),
        tool_calls: vec![ToolInvocation {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }],
        stop_reason: StopReason::ToolUse,
    }
}

/// Operator that answers prompts from a queue and then hangs up.
pub struct ScriptedOperator {
    replies: VecDeque<OperatorReply>,
    pub prompts: Arc<Mutex<Vec<String>>>,
    pub notices: Arc<Mutex<Vec<String>>>,
}

impl ScriptedOperator {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: replies
                .iter()
                .map(|r| OperatorReply::Line(r.to_string()))
                .collect(),
            prompts: Arc::new(Mutex::new(Vec::new())),
            notices: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Operator for ScriptedOperator {
    fn prompt(&mut self, message: &str) -> OperatorReply {
        self.prompts.lock().unwrap().push(message.to_string());
        self.replies.pop_front().unwrap_or(OperatorReply::Interrupted)
    }

    fn notify(&mut self, message: &str) {
        self.notices.lock().unwrap().push(message.to_string());
    }
}
