//! Discovery: free text to ranked, addressable selectors.
//!
//! Matching nodes come back from the probe tagged with a scratch attribute;
//! ranking happens here, then the top results get a slot attribute
//! (`data-vision-discover="N"`) that the action layer targets directly.

use tracing::debug;

use super::{DISCOVER_ATTR, DomNode, TextSource, mark_nodes, probe_matching};
use crate::hands::{BrowserDriver, DriverResult};
use crate::types::{DISCOVERY_MAX_RESULTS, collapse_whitespace, truncate_chars};

const HIT_TEXT_MAX_CHARS: usize = 100;

/// Optional element-type restriction for a discovery call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementFilter {
    Any,
    Button,
    Link,
    Input,
    Tag(String),
}

impl ElementFilter {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "" | "any" => ElementFilter::Any,
            "button" => ElementFilter::Button,
            "link" => ElementFilter::Link,
            "input" => ElementFilter::Input,
            other => ElementFilter::Tag(other.to_string()),
        }
    }

    pub fn matches(&self, node: &DomNode) -> bool {
        let tag = node.tag.as_str();
        let role = node.role.as_deref();
        match self {
            ElementFilter::Any => true,
            ElementFilter::Button => {
                tag == "button"
                    || (tag == "input" && matches!(node.attr("type"), Some("button" | "submit")))
                    || role == Some("button")
            }
            ElementFilter::Link => tag == "a" || role == Some("link"),
            ElementFilter::Input => {
                matches!(tag, "input" | "textarea" | "select") || node.has_attr("contenteditable")
            }
            ElementFilter::Tag(t) => tag == t,
        }
    }
}

/// Match/interactivity score. Higher is better.
pub fn score(node: &DomNode, needle: &str) -> f64 {
    let mut score = 0.0;
    if node.is_interactive_tag() {
        score += 100.0;
    }
    if node.has_interactive_role() {
        score += 80.0;
    }
    if !needle.is_empty() && node.own_text.to_lowercase().contains(needle) {
        score += 50.0;
    }
    // A label inside a clickable parent must never outrank the parent.
    if matches!(node.tag.as_str(), "span" | "div" | "p") && node.parent_is_interactive() {
        score -= 200.0;
    }
    if matches!(node.tag.as_str(), "div" | "span" | "body" | "html") {
        score -= 20.0;
    }
    score - (node.text_length as f64 / 100.0).min(30.0)
}

#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub node: &'a DomNode,
    pub score: f64,
}

/// Filter, score and order matched nodes. Ties keep document order.
pub fn rank<'a>(nodes: &'a [DomNode], needle: &str, filter: &ElementFilter) -> Vec<Candidate<'a>> {
    let needle = needle.to_lowercase();
    let mut candidates: Vec<Candidate<'a>> = nodes
        .iter()
        .filter(|n| n.is_visible() && filter.matches(n))
        .map(|node| Candidate {
            node,
            score: score(node, &needle),
        })
        .collect();
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates.truncate(DISCOVERY_MAX_RESULTS);
    candidates
}

/// One addressable discovery result.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryHit {
    pub selector: String,
    pub slot: usize,
    pub score: f64,
    pub display_text: String,
    pub tag_name: String,
    pub dom_id: Option<String>,
    pub class_tokens: Vec<String>,
}

pub fn slot_selector(slot: usize) -> String {
    format!("[{DISCOVER_ATTR}=\"{slot}\"]")
}

/// Inverse of [`slot_selector`]; `None` for any other selector.
pub fn parse_slot(selector: &str) -> Option<usize> {
    selector
        .trim()
        .strip_prefix(&format!("[{DISCOVER_ATTR}=\""))?
        .strip_suffix("\"]")?
        .parse()
        .ok()
}

#[derive(Debug, Clone, PartialEq)]
struct IssuedSet {
    generation: u64,
    url: String,
    /// Probe node index per slot.
    nodes: Vec<usize>,
}

/// Outcome of validating a selector before acting on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorCheck {
    /// Not a discovery selector; passed to the driver as is.
    NotDiscovery,
    Live(usize),
    Stale,
}

/// The slots issued by the last discovery call, scoped to one page.
///
/// Any page switch bumps the generation and drops the issued set, so a slot
/// selector from before the switch fails instead of hitting whatever node
/// later carries the same slot number.
#[derive(Debug, Clone, Default)]
pub struct SelectorTable {
    generation: u64,
    issued: Option<IssuedSet>,
}

impl SelectorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.issued = None;
    }

    pub fn issue(&mut self, url: &str, nodes: Vec<usize>) -> u64 {
        self.generation += 1;
        self.issued = Some(IssuedSet {
            generation: self.generation,
            url: url.to_string(),
            nodes,
        });
        self.generation
    }

    pub fn check(&self, selector: &str, current_url: &str) -> SelectorCheck {
        let Some(slot) = parse_slot(selector) else {
            return SelectorCheck::NotDiscovery;
        };
        match &self.issued {
            Some(set)
                if set.generation == self.generation
                    && set.url == current_url
                    && slot < set.nodes.len() =>
            {
                SelectorCheck::Live(slot)
            }
            _ => SelectorCheck::Stale,
        }
    }
}

fn hit_text(node: &DomNode) -> String {
    let text = node
        .text_fallback(&[
            TextSource::InnerText,
            TextSource::TextContent,
            TextSource::Placeholder,
            TextSource::AriaLabel,
            TextSource::Title,
        ])
        .map(|t| collapse_whitespace(&t))
        .unwrap_or_default();
    truncate_chars(&text, HIT_TEXT_MAX_CHARS).to_string()
}

/// Resolve `text` to at most ten slot selectors on the current page.
///
/// Zero matches is an empty list, not an error.
pub fn discover(
    driver: &mut dyn BrowserDriver,
    table: &mut SelectorTable,
    text: &str,
    filter: &ElementFilter,
) -> DriverResult<Vec<DiscoveryHit>> {
    let needle = text.trim();
    if needle.is_empty() {
        return Ok(Vec::new());
    }

    let nodes = probe_matching(driver, needle)?;
    let ranked = rank(&nodes, needle, filter);

    let pairs: Vec<(usize, usize)> = ranked
        .iter()
        .enumerate()
        .map(|(slot, c)| (c.node.index, slot))
        .collect();
    let marked = mark_nodes(driver, &pairs)?;

    let url = driver.url()?;
    let generation = table.issue(&url, ranked.iter().map(|c| c.node.index).collect());
    debug!(
        needle,
        matched = nodes.len(),
        marked,
        generation,
        "discovery resolved"
    );

    Ok(ranked
        .iter()
        .enumerate()
        .map(|(slot, c)| DiscoveryHit {
            selector: slot_selector(slot),
            slot,
            score: c.score,
            display_text: hit_text(c.node),
            tag_name: c.node.tag.clone(),
            dom_id: c.node.id.clone().filter(|s| !s.is_empty()),
            class_tokens: c.node.class_tokens(3),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{ComputedStyle, Rect};

    fn node(index: usize, tag: &str, own: &str, total: &str) -> DomNode {
        DomNode {
            index,
            tag: tag.into(),
            inner_text: total.into(),
            text_content: total.into(),
            own_text: own.into(),
            text_length: total.len(),
            style: ComputedStyle {
                display: "block".into(),
                visibility: "visible".into(),
                opacity: "1".into(),
            },
            rect: Rect {
                width: 10.0,
                height: 10.0,
            },
            ..Default::default()
        }
    }

    #[test]
    fn button_outranks_its_label_span() {
        let button = node(0, "button", "", "Submit");
        let mut span = node(1, "span", "Submit", "Submit");
        span.parent = Some(0);
        span.parent_tag = Some("button".into());

        let nodes = [span, button];
        let ranked = rank(&nodes, "Submit", &ElementFilter::Any);
        assert_eq!(ranked[0].node.tag, "button");
        assert!(ranked[1].score < 0.0);
    }

    #[test]
    fn own_text_match_beats_container_match() {
        let wrapper = node(0, "section", "", "Checkout now and more text");
        let target = node(1, "h2", "Checkout", "Checkout");
        let nodes = [wrapper, target];
        let ranked = rank(&nodes, "checkout", &ElementFilter::Any);
        assert_eq!(ranked[0].node.index, 1);
    }

    #[test]
    fn ranking_is_deterministic_with_ties_in_document_order() {
        let nodes: Vec<_> = (0..15).map(|i| node(i, "a", "Item", "Item")).collect();
        let first = rank(&nodes, "item", &ElementFilter::Any);
        let second = rank(&nodes, "item", &ElementFilter::Any);
        let order: Vec<_> = first.iter().map(|c| c.node.index).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
        assert_eq!(
            order,
            second.iter().map(|c| c.node.index).collect::<Vec<_>>()
        );
    }

    #[test]
    fn type_filter_discards_text_matches() {
        let link = node(0, "a", "Next", "Next");
        let mut role_button = node(1, "div", "Next", "Next");
        role_button.role = Some("button".into());
        let mut submit = node(2, "input", "", "");
        submit.attrs.insert("type".into(), "submit".into());

        assert!(ElementFilter::Link.matches(&link));
        assert!(!ElementFilter::Link.matches(&role_button));
        assert!(ElementFilter::Button.matches(&role_button));
        assert!(ElementFilter::Button.matches(&submit));
        assert!(ElementFilter::parse("h2").matches(&node(3, "h2", "", "")));
        assert_eq!(ElementFilter::parse("ANY"), ElementFilter::Any);
    }

    #[test]
    fn hidden_matches_are_skipped() {
        let mut hidden = node(0, "button", "Buy", "Buy");
        hidden.style.visibility = "hidden".into();
        assert!(rank(&[hidden], "buy", &ElementFilter::Any).is_empty());
    }

    #[test]
    fn slot_selectors_parse_back() {
        assert_eq!(slot_selector(3), "[data-vision-discover=\"3\"]");
        assert_eq!(parse_slot(&slot_selector(7)), Some(7));
        assert_eq!(parse_slot("#submit"), None);
    }

    #[test]
    fn selector_table_goes_stale_on_invalidate_and_url_change() {
        let mut table = SelectorTable::new();
        let sel = slot_selector(0);
        assert_eq!(table.check(&sel, "https://a.test/"), SelectorCheck::Stale);

        table.issue("https://a.test/", vec![4, 9]);
        assert_eq!(table.check(&sel, "https://a.test/"), SelectorCheck::Live(0));
        assert_eq!(table.check(&slot_selector(5), "https://a.test/"), SelectorCheck::Stale);
        assert_eq!(table.check(&sel, "https://a.test/other"), SelectorCheck::Stale);
        assert_eq!(table.check("button.go", "https://a.test/"), SelectorCheck::NotDiscovery);

        table.invalidate();
        assert_eq!(table.check(&sel, "https://a.test/"), SelectorCheck::Stale);
    }
}
