//! Element classification.
//!
//! Candidates are picked by a fixed set of tag/attribute/class patterns, then
//! typed by the first matching rule in [`RULES`]. Rules are ordered from most
//! to least specific: class heuristics beat roles, roles beat bare tags.

use std::collections::HashMap;

use super::{DomNode, TextSource};
use crate::types::{
    ELEMENT_TEXT_MAX_CHARS, ElementRecord, SemanticType, collapse_whitespace, truncate_chars,
};

/// One typing rule. `applies` sees the node and its lowercased class string.
pub struct Rule {
    pub name: &'static str,
    pub applies: fn(&DomNode, &str) -> bool,
    pub assigns: SemanticType,
}

pub static RULES: &[Rule] = &[
    Rule {
        name: "dropdown",
        applies: |n, c| c.contains("dropdown") || n.role.as_deref() == Some("listbox"),
        assigns: SemanticType::Dropdown,
    },
    Rule {
        name: "price",
        applies: |n, c| c.contains("price") || n.has_attr("data-price"),
        assigns: SemanticType::Price,
    },
    Rule {
        name: "label-class",
        applies: |n, c| c.contains("label") && n.tag != "label",
        assigns: SemanticType::Tag,
    },
    Rule {
        name: "badge",
        applies: |_, c| c.contains("badge") || c.contains("tag"),
        assigns: SemanticType::Badge,
    },
    Rule {
        name: "modal",
        applies: |n, c| {
            c.contains("modal")
                || c.contains("popup")
                || c.contains("dialog")
                || n.role.as_deref() == Some("dialog")
        },
        assigns: SemanticType::Modal,
    },
    Rule {
        name: "cart",
        applies: |_, c| c.contains("cart") && !c.contains("button"),
        assigns: SemanticType::CartItem,
    },
    Rule {
        name: "order",
        applies: |_, c| c.contains("order") && !c.contains("button"),
        assigns: SemanticType::OrderItem,
    },
    Rule {
        name: "product-card",
        applies: |n, c| {
            n.tag == "article"
                || c.contains("card")
                || c.contains("product")
                || n.has_attr("data-product-id")
        },
        assigns: SemanticType::ProductCard,
    },
    Rule {
        name: "aside",
        applies: |n, _| n.tag == "aside",
        assigns: SemanticType::Sidebar,
    },
    Rule {
        name: "section",
        applies: |n, c| n.tag == "section" && !c.trim().is_empty(),
        assigns: SemanticType::Section,
    },
    Rule {
        name: "list-item",
        applies: |n, c| n.tag == "li" && c.contains("item"),
        assigns: SemanticType::ListItem,
    },
    Rule {
        name: "list",
        applies: |n, c| n.tag == "ul" && !c.trim().is_empty(),
        assigns: SemanticType::List,
    },
    Rule {
        name: "role-tab",
        applies: |n, _| n.role.as_deref() == Some("tab"),
        assigns: SemanticType::Tab,
    },
    Rule {
        name: "role-menuitem",
        applies: |n, _| n.role.as_deref() == Some("menuitem"),
        assigns: SemanticType::MenuItem,
    },
    Rule {
        name: "menu",
        applies: |n, _| n.tag == "menu" || n.role.as_deref() == Some("menu"),
        assigns: SemanticType::Menu,
    },
    Rule {
        name: "navigation",
        applies: |n, _| n.tag == "nav" || n.role.as_deref() == Some("navigation"),
        assigns: SemanticType::Navigation,
    },
    Rule {
        name: "image",
        applies: |n, _| n.tag == "img" && n.attr("alt").is_some_and(|a| !a.is_empty()),
        assigns: SemanticType::Image,
    },
    Rule {
        name: "contenteditable",
        applies: |n, _| n.has_attr("contenteditable"),
        assigns: SemanticType::Input,
    },
    Rule {
        name: "input-button",
        applies: |n, _| {
            n.tag == "input" && matches!(n.attr("type"), Some("submit") | Some("button"))
        },
        assigns: SemanticType::Button,
    },
    Rule {
        name: "input",
        applies: |n, _| n.tag == "input",
        assigns: SemanticType::Input,
    },
    Rule {
        name: "button",
        applies: |n, _| n.tag == "button",
        assigns: SemanticType::Button,
    },
    Rule {
        name: "link",
        applies: |n, _| n.tag == "a",
        assigns: SemanticType::Link,
    },
    Rule {
        name: "heading",
        applies: |n, _| is_heading_tag(&n.tag),
        assigns: SemanticType::Heading,
    },
];

const CANDIDATE_TAGS: &[&str] = &[
    "button", "input", "select", "textarea", "form", "label", "article", "h1", "h2", "h3", "h4",
    "nav", "menu", "aside",
];
const CANDIDATE_ROLES: &[&str] = &["button", "link", "tab", "menuitem", "option"];
const CANDIDATE_ATTRS: &[&str] = &["onclick", "data-product-id", "data-testid", "data-qa"];
const CANDIDATE_CLASSES: &[&str] = &[
    "card", "item", "product", "order", "cart", "checkout", "badge", "tag", "label", "modal",
    "popup", "dialog", "dropdown",
];

fn is_heading_tag(tag: &str) -> bool {
    matches!(tag, "h1" | "h2" | "h3" | "h4")
}

/// Whether the node falls in the fixed candidate set at all.
pub fn is_candidate(node: &DomNode) -> bool {
    let class = node.class_lower();
    let has_class = !class.trim().is_empty();
    let tag = node.tag.as_str();

    CANDIDATE_TAGS.contains(&tag)
        || (tag == "a" && node.has_attr("href"))
        || (tag == "img" && node.has_attr("alt"))
        || (matches!(tag, "ul" | "section") && has_class)
        || (matches!(tag, "p" | "span" | "div") && class.contains("price"))
        || node
            .role
            .as_deref()
            .is_some_and(|r| CANDIDATE_ROLES.contains(&r))
        || CANDIDATE_ATTRS.iter().any(|a| node.has_attr(a))
        || node.attr("contenteditable") == Some("true")
        || CANDIDATE_CLASSES.iter().any(|c| class.contains(c))
}

/// Type a node by the first applicable rule; unmatched nodes keep their tag.
pub fn semantic_type(node: &DomNode) -> SemanticType {
    let class = node.class_lower();
    RULES
        .iter()
        .find(|r| (r.applies)(node, &class))
        .map(|r| r.assigns.clone())
        .unwrap_or_else(|| SemanticType::Other(node.tag.clone()))
}

/// Types that are listed even without any text.
fn always_kept(kind: &SemanticType) -> bool {
    matches!(
        kind,
        SemanticType::Heading
            | SemanticType::Navigation
            | SemanticType::Section
            | SemanticType::Modal
            | SemanticType::Price
            | SemanticType::Badge
    ) || matches!(kind, SemanticType::Other(tag) if tag == "form" || tag == "label")
}

const DISPLAY_SOURCES: &[TextSource] = &[
    TextSource::InnerText,
    TextSource::TextContent,
    TextSource::Value,
    TextSource::Placeholder,
    TextSource::AriaLabel,
    TextSource::Title,
    TextSource::Alt,
    TextSource::Name,
];

/// Flat document-order node list with parent lookups.
struct Tree<'a> {
    nodes: &'a [DomNode],
    by_index: HashMap<usize, usize>,
}

impl<'a> Tree<'a> {
    fn new(nodes: &'a [DomNode]) -> Self {
        let by_index = nodes.iter().enumerate().map(|(pos, n)| (n.index, pos)).collect();
        Self { nodes, by_index }
    }

    fn is_descendant(&self, node: &DomNode, ancestor: usize) -> bool {
        let mut cur = node.parent;
        while let Some(idx) = cur {
            if idx == ancestor {
                return true;
            }
            if idx < ancestor {
                return false;
            }
            cur = self
                .by_index
                .get(&idx)
                .and_then(|&pos| self.nodes[pos].parent);
        }
        false
    }

    /// Descendants sit contiguously after their ancestor in document order.
    fn descendants(&self, pos: usize) -> impl Iterator<Item = &'a DomNode> + '_ {
        let nodes: &'a [DomNode] = self.nodes;
        let root = nodes[pos].index;
        nodes[pos + 1..]
            .iter()
            .take_while(move |n| self.is_descendant(n, root))
    }

    fn find_within(&self, pos: usize, pred: impl Fn(&DomNode, &str) -> bool) -> Option<String> {
        self.descendants(pos)
            .find(|n| pred(*n, &n.class_lower()))
            .and_then(|n| n.text_fallback(&[TextSource::InnerText, TextSource::TextContent]))
    }
}

fn is_title_like(n: &DomNode, class: &str) -> bool {
    is_heading_tag(&n.tag) || class.contains("title") || class.contains("name")
}

/// Secondary extraction for containers: "name | price | status".
fn container_text(tree: &Tree<'_>, pos: usize, kind: &SemanticType) -> Option<String> {
    let name = tree.find_within(pos, is_title_like)?;
    let mut parts = vec![name];
    match kind {
        SemanticType::ProductCard => {
            if let Some(price) = tree.find_within(pos, |_, c| c.contains("price")) {
                parts.push(price);
            }
        }
        SemanticType::OrderItem => {
            if let Some(price) =
                tree.find_within(pos, |_, c| c.contains("price") || c.contains("total"))
            {
                parts.push(price);
            }
            if let Some(status) = tree.find_within(pos, |_, c| c.contains("status")) {
                parts.push(status);
            }
        }
        _ => return None,
    }
    Some(parts.join(" | "))
}

/// Classify one probed page into element records, in document order.
pub fn classify(nodes: &[DomNode]) -> Vec<ElementRecord> {
    let tree = Tree::new(nodes);
    let mut records = Vec::new();

    for (pos, node) in nodes.iter().enumerate() {
        if !is_candidate(node) || !node.is_visible() {
            continue;
        }
        // Label spans inside a button are part of the button, not elements.
        if matches!(node.tag.as_str(), "div" | "span" | "p") && node.parent_is_button() {
            continue;
        }

        let kind = semantic_type(node);
        let mut text = node.text_fallback(DISPLAY_SOURCES).unwrap_or_default();

        if matches!(kind, SemanticType::ProductCard | SemanticType::OrderItem) {
            if let Some(t) = container_text(&tree, pos, &kind) {
                text = t;
            }
        }
        if kind == SemanticType::Image {
            if let Some(alt) = node.attr("alt").filter(|a| !a.trim().is_empty()) {
                text = alt.trim().to_string();
            }
        }

        let mut text = collapse_whitespace(&text);
        if text.is_empty() && !node.is_form_control() && !always_kept(&kind) {
            continue;
        }
        if node.tag == "textarea" && text.is_empty() {
            text = "<empty textarea>".to_string();
        }
        if kind == SemanticType::Heading {
            text = format!("[{}] {}", node.tag.to_uppercase(), text);
        }

        records.push(ElementRecord {
            semantic_type: kind,
            display_text: truncate_chars(&text, ELEMENT_TEXT_MAX_CHARS).to_string(),
            tag_name: node.tag.clone(),
            dom_id: node.id.clone().filter(|s| !s.is_empty()),
            class_tokens: node.class_tokens(3),
            role: node.role.clone(),
            href: node.attr("href").map(str::to_string),
            placeholder: node.attr("placeholder").map(str::to_string),
            raw_index: node.index,
        });
    }

    records
}
