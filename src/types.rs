use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Semantic category assigned to a classified element.
///
/// Anything the rule table does not recognise keeps its lowercase tag name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SemanticType {
    Link,
    Button,
    Input,
    Image,
    Navigation,
    Menu,
    MenuItem,
    Tab,
    List,
    ListItem,
    Section,
    Sidebar,
    ProductCard,
    OrderItem,
    CartItem,
    Modal,
    Badge,
    Tag,
    Price,
    Dropdown,
    Heading,
    Other(String),
}

impl SemanticType {
    pub fn as_str(&self) -> &str {
        match self {
            SemanticType::Link => "link",
            SemanticType::Button => "button",
            SemanticType::Input => "input",
            SemanticType::Image => "image",
            SemanticType::Navigation => "navigation",
            SemanticType::Menu => "menu",
            SemanticType::MenuItem => "menu-item",
            SemanticType::Tab => "tab",
            SemanticType::List => "list",
            SemanticType::ListItem => "list-item",
            SemanticType::Section => "section",
            SemanticType::Sidebar => "sidebar",
            SemanticType::ProductCard => "product-card",
            SemanticType::OrderItem => "order-item",
            SemanticType::CartItem => "cart-item",
            SemanticType::Modal => "modal",
            SemanticType::Badge => "badge",
            SemanticType::Tag => "tag",
            SemanticType::Price => "price",
            SemanticType::Dropdown => "dropdown",
            SemanticType::Heading => "heading",
            SemanticType::Other(tag) => tag,
        }
    }

    /// Content-bearing groups get the wider display limit in the snapshot.
    pub fn is_content_bearing(&self) -> bool {
        matches!(
            self,
            SemanticType::ProductCard
                | SemanticType::OrderItem
                | SemanticType::Heading
                | SemanticType::Navigation
                | SemanticType::Price
                | SemanticType::Badge
                | SemanticType::CartItem
        )
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One element as seen by a single classification pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub semantic_type: SemanticType,
    pub display_text: String,
    pub tag_name: String,
    pub dom_id: Option<String>,
    pub class_tokens: Vec<String>,
    pub role: Option<String>,
    pub href: Option<String>,
    pub placeholder: Option<String>,
    pub raw_index: usize,
}

/// What the model sees of the current page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub rendered_text: String,
    pub estimated_tokens: usize,
    pub truncated: bool,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Risk category attached to a model-level confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Financial,
    Deletion,
    Irreversible,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Financial => "financial",
            RiskLevel::Deletion => "deletion",
            RiskLevel::Irreversible => "irreversible",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            RiskLevel::Financial => "💰",
            RiskLevel::Deletion => "🗑️",
            RiskLevel::Irreversible => "⚠️",
        }
    }
}

/// Result of one tool handler. The three side-channel signals are tagged
/// variants so the loop never has to sniff string prefixes.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Text(String),
    HumanHelp { description: String },
    Confirmation { risk: RiskLevel, action: String },
    Complete { summary: String },
}

impl ToolOutput {
    pub fn text(s: impl Into<String>) -> Self {
        ToolOutput::Text(s.into())
    }

    pub fn is_signal(&self) -> bool {
        !matches!(self, ToolOutput::Text(_))
    }
}

/// Transcript form; matches the wire prefixes the console shows.
impl fmt::Display for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolOutput::Text(s) => f.write_str(s),
            ToolOutput::HumanHelp { description } => {
                write!(f, "🚨 HUMAN_HELP_NEEDED: {description}")
            }
            ToolOutput::Confirmation { risk, action } => {
                write!(f, "⚠️ CONFIRMATION_REQUIRED:{}:{action}", risk.as_str())
            }
            ToolOutput::Complete { summary } => write!(f, "✅ TASK_COMPLETE: {summary}"),
        }
    }
}

/// Result content sent back to the model for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub invocation_id: String,
    pub content: String,
}

/// A turn in the conversation. Owned by the agent loop only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User { content: String },
    Assistant { text: String, tool_calls: Vec<ToolInvocation> },
    ToolResults { results: Vec<ToolResult> },
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Turn::User {
            content: content.into(),
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other(String),
}

/// What the model backend hands back for one request.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text_blocks: Vec<String>,
    pub tool_calls: Vec<ToolInvocation>,
    pub stop_reason: StopReason,
}

impl ModelResponse {
    pub fn text(&self) -> String {
        self.text_blocks.join("\n")
    }
}

pub const DEFAULT_MAX_ITERATIONS: usize = 50;
pub const DEFAULT_TOKEN_LIMIT: usize = 3000;
pub const CHARS_PER_TOKEN: usize = 4;
pub const ELEMENT_TEXT_MAX_CHARS: usize = 200;
pub const LISTING_TEXT_MAX_CHARS: usize = 150;
pub const WIDE_GROUP_LIMIT: usize = 30;
pub const NARROW_GROUP_LIMIT: usize = 15;
pub const DISCOVERY_MAX_RESULTS: usize = 10;
pub const DEFAULT_ACTION_TIMEOUT_MS: u64 = 5000;
pub const NAVIGATION_TIMEOUT_MS: u64 = 15000;
pub const HTML_DUMP_MAX_CHARS: usize = 5000;

/// Cut `s` to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Collapse runs of whitespace (including newlines) into single spaces.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
