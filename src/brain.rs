//! Model backends. Each one turns the conversation plus the tool catalog into
//! a provider request and the reply back into a [`ModelResponse`].

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use crate::actions::ToolSpec;
use crate::config::{Provider, Settings};
use crate::error::ModelError;
use crate::types::{ModelResponse, StopReason, ToolInvocation, Turn, truncate_chars};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const MAX_TOKENS: u32 = 4096;

pub const SYSTEM_PROMPT: &str = r#"You are a web automation agent. You perceive websites as structured text, not pixels: each page arrives as a snapshot listing its location, title and interactive elements grouped by purpose (links, buttons, inputs, product cards, prices, navigation and so on).

# Tools

Information:
- observe_page() - structured overview of the current page. Start here.
- discover_element(search_text, element_type) - find elements by visible text; returns selectors.
- extract_links(filter_text) - every visible link with its URL.
- check_modals() - detect dialogs, popups and overlays.
- list_tabs() / switch_tab(tab_index) / close_tab(tab_index) - tab management.
- get_page_html() - raw body HTML, only when the snapshot is missing something.

Interaction:
- click_element(selector, description) - click; reports navigation, new tabs and modals.
- type_text(selector, text, press_enter) - fill inputs and search boxes.
- hover_element(selector, description) - reveal menus and tooltips.
- press_key(key) - Enter, Escape, Tab, arrows.
- navigate_url(url), navigate_back(), scroll_page(direction, pixels).
- wait_for_element(selector, timeout), wait_for_page_load(timeout), wait_seconds(seconds).
- take_screenshot(full_page) - save a PNG for the operator.

Coordination:
- request_human_help(description) - CAPTCHA, login, 2FA or any security barrier.
- request_confirmation(action_description, risk_level) - REQUIRED before purchases, deletions, payments, sending messages or any irreversible step.
- task_complete(summary) - only when the task is actually done and verified.

# The two-step rule

Never invent selectors.
1. discover_element(search_text="Sign In", element_type="button") returns a selector such as [data-vision-discover="0"].
2. click_element(selector='[data-vision-discover="0"]', description="Sign In button").

A discovered selector is only good for the action that immediately follows. After any navigation, tab switch or new page, discover again.

# When things go wrong
- Nothing found? Try shorter text, scroll, or use extract_links and navigate_url.
- A modal is in the way? Discover its buttons, or press Escape.
- A new tab opened? switch_tab to it if you need it.
- A tool result starting with ❌ or ⏱️ means the action failed; change approach instead of repeating it.

# Style
Keep reasoning short: what you see, what you will do, then act. Keep waits short (1-2 seconds).

Before task_complete, make sure the task is really finished and give concrete evidence (URLs, data found, confirmations). Never call task_complete to ask the user a question."#;

/// A tool-calling language model.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn chat(
        &self,
        system: &str,
        turns: &[Turn],
        tools: &[ToolSpec],
    ) -> Result<ModelResponse, ModelError>;
}

/// Build the backend the settings ask for.
pub fn connect(settings: &Settings) -> Result<Box<dyn ModelBackend>, ModelError> {
    let key = settings.require_api_key()?;
    let base = settings.api_base.as_deref();
    if let Some(base) = base {
        info!(provider = ?settings.provider, api_base = base, "using custom API base");
    }
    Ok(match settings.provider {
        Provider::Anthropic => {
            let brain = AnthropicBrain::new(key, &settings.model);
            Box::new(match base {
                Some(base) => brain.with_api_base(base),
                None => brain,
            })
        }
        Provider::OpenAi => {
            let brain = OpenAiBrain::new(key, &settings.model);
            Box::new(match base {
                Some(base) => brain.with_api_base(base),
                None => brain,
            })
        }
    })
}

async fn post_json(
    request: reqwest::RequestBuilder,
    body: &Value,
    provider: &str,
) -> Result<String, ModelError> {
    let response = request
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await?;
    let status = response.status();
    let raw = response.text().await?;
    if !status.is_success() {
        error!(provider, status = %status, body = %raw, "model API error");
        return Err(ModelError::Api {
            status: status.as_u16(),
            body: raw,
        });
    }
    debug!(provider, body_len = raw.len(), "model raw response");
    Ok(raw)
}

// ---------------------------------------------------------------------------
// Anthropic Messages API
// ---------------------------------------------------------------------------

pub struct AnthropicBrain {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl AnthropicBrain {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            api_base: ANTHROPIC_API_BASE.to_string(),
            model: model.strip_prefix("anthropic/").unwrap_or(model).to_string(),
        }
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    fn convert_tools(tools: &[ToolSpec]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect()
    }

    /// Tool results travel as `user` messages of `tool_result` blocks.
    fn convert_turns(turns: &[Turn]) -> Vec<Value> {
        let messages = turns
            .iter()
            .map(|turn| match turn {
                Turn::User { content } => json!({ "role": "user", "content": content }),
                Turn::Assistant { text, tool_calls } => {
                    let mut blocks = Vec::new();
                    if !text.is_empty() {
                        blocks.push(json!({ "type": "text", "text": text }));
                    }
                    for call in tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    json!({ "role": "assistant", "content": blocks })
                }
                Turn::ToolResults { results } => {
                    let blocks: Vec<Value> = results
                        .iter()
                        .map(|r| {
                            json!({
                                "type": "tool_result",
                                "tool_use_id": r.invocation_id,
                                "content": r.content,
                            })
                        })
                        .collect();
                    json!({ "role": "user", "content": blocks })
                }
            })
            .collect();
        merge_consecutive_roles(messages)
    }

    fn parse_response(raw: &str) -> Result<ModelResponse, ModelError> {
        let resp: AnthropicResponse = serde_json::from_str(raw).map_err(|e| {
            ModelError::Decode(format!("{e}. Body: {}", truncate_chars(raw, 500)))
        })?;

        let mut text_blocks = Vec::new();
        let mut tool_calls = Vec::new();
        for block in resp.content {
            match block.block_type.as_str() {
                "text" => {
                    if let Some(text) = block.text.filter(|t| !t.is_empty()) {
                        text_blocks.push(text);
                    }
                }
                "tool_use" => {
                    if let (Some(id), Some(name)) = (block.id, block.name) {
                        tool_calls.push(ToolInvocation {
                            id,
                            name,
                            arguments: block.input.unwrap_or_else(|| Value::Object(Map::new())),
                        });
                    }
                }
                _ => {}
            }
        }

        let stop_reason = match resp.stop_reason.as_deref() {
            Some("end_turn") | None => StopReason::EndTurn,
            Some("tool_use") => StopReason::ToolUse,
            Some("max_tokens") => StopReason::MaxTokens,
            Some(other) => StopReason::Other(other.to_string()),
        };

        Ok(ModelResponse {
            text_blocks,
            tool_calls,
            stop_reason,
        })
    }
}

/// Anthropic rejects two consecutive messages with the same role.
fn merge_consecutive_roles(messages: Vec<Value>) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();
    for msg in messages {
        let same_role = result
            .last()
            .is_some_and(|last| last.get("role") == msg.get("role"));
        if !same_role {
            result.push(msg);
            continue;
        }
        if let Some(last) = result.last_mut() {
            let merged = match (last["content"].take(), msg["content"].clone()) {
                (Value::Array(mut a), Value::Array(b)) => {
                    a.extend(b);
                    Value::Array(a)
                }
                (Value::Array(mut a), Value::String(s)) => {
                    a.push(json!({ "type": "text", "text": s }));
                    Value::Array(a)
                }
                (Value::String(s1), Value::String(s2)) => Value::String(format!("{s1}\n\n{s2}")),
                (Value::String(s), Value::Array(a)) => {
                    let mut blocks = vec![json!({ "type": "text", "text": s })];
                    blocks.extend(a);
                    Value::Array(blocks)
                }
                (existing, _) => existing,
            };
            last["content"] = merged;
        }
    }
    result
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

#[async_trait]
impl ModelBackend for AnthropicBrain {
    async fn chat(
        &self,
        system: &str,
        turns: &[Turn],
        tools: &[ToolSpec],
    ) -> Result<ModelResponse, ModelError> {
        let url = format!("{}/messages", self.api_base);
        let mut request = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": system,
            "messages": Self::convert_turns(turns),
        });
        if !tools.is_empty() {
            request["tools"] = Value::Array(Self::convert_tools(tools));
        }

        info!(model = %self.model, turns = turns.len(), tools = tools.len(), "calling Anthropic API");
        let raw = post_json(
            self.client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            &request,
            "anthropic",
        )
        .await?;

        let response = Self::parse_response(&raw)?;
        info!(
            tool_calls = response.tool_calls.len(),
            stop_reason = ?response.stop_reason,
            "Anthropic response parsed"
        );
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// OpenAI Chat Completions
// ---------------------------------------------------------------------------

pub struct OpenAiBrain {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl OpenAiBrain {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            api_base: OPENAI_API_BASE.to_string(),
            model: model.to_string(),
        }
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    fn convert_tools(tools: &[ToolSpec]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect()
    }

    fn convert_turns(system: &str, turns: &[Turn]) -> Vec<Value> {
        let mut messages = vec![json!({ "role": "system", "content": system })];
        for turn in turns {
            match turn {
                Turn::User { content } => {
                    messages.push(json!({ "role": "user", "content": content }));
                }
                Turn::Assistant { text, tool_calls } => {
                    let content = if text.is_empty() {
                        Value::Null
                    } else {
                        Value::String(text.clone())
                    };
                    let mut msg = json!({ "role": "assistant", "content": content });
                    if !tool_calls.is_empty() {
                        msg["tool_calls"] = tool_calls
                            .iter()
                            .map(|c| {
                                json!({
                                    "id": c.id,
                                    "type": "function",
                                    "function": {
                                        "name": c.name,
                                        "arguments": c.arguments.to_string(),
                                    }
                                })
                            })
                            .collect();
                    }
                    messages.push(msg);
                }
                Turn::ToolResults { results } => {
                    for r in results {
                        messages.push(json!({
                            "role": "tool",
                            "tool_call_id": r.invocation_id,
                            "content": r.content,
                        }));
                    }
                }
            }
        }
        messages
    }

    fn parse_response(body: &Value) -> Result<ModelResponse, ModelError> {
        let choice = body["choices"]
            .get(0)
            .ok_or_else(|| ModelError::Decode(format!("no choices in response: {body}")))?;
        let message = &choice["message"];

        let text_blocks = message["content"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| vec![s.to_string()])
            .unwrap_or_default();

        let tool_calls = message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|c| {
                        let id = c["id"].as_str()?.to_string();
                        let name = c["function"]["name"].as_str()?.to_string();
                        let raw_args = c["function"]["arguments"].as_str().unwrap_or("{}");
                        let arguments = serde_json::from_str(raw_args).unwrap_or_else(|e| {
                            warn!(tool = %name, error = %e, "unparseable tool arguments");
                            Value::Object(Map::new())
                        });
                        Some(ToolInvocation {
                            id,
                            name,
                            arguments,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let stop_reason = match choice["finish_reason"].as_str() {
            Some("stop") | None => StopReason::EndTurn,
            Some("tool_calls") => StopReason::ToolUse,
            Some("length") => StopReason::MaxTokens,
            Some(other) => StopReason::Other(other.to_string()),
        };

        Ok(ModelResponse {
            text_blocks,
            tool_calls,
            stop_reason,
        })
    }
}

#[async_trait]
impl ModelBackend for OpenAiBrain {
    async fn chat(
        &self,
        system: &str,
        turns: &[Turn],
        tools: &[ToolSpec],
    ) -> Result<ModelResponse, ModelError> {
        let url = format!("{}/chat/completions", self.api_base);
        let mut request = json!({
            "model": self.model,
            "messages": Self::convert_turns(system, turns),
            "temperature": 0.2,
        });
        if !tools.is_empty() {
            request["tools"] = Value::Array(Self::convert_tools(tools));
        }

        info!(model = %self.model, turns = turns.len(), tools = tools.len(), "calling OpenAI API");
        let raw = post_json(
            self.client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key)),
            &request,
            "openai",
        )
        .await?;

        let body: Value = serde_json::from_str(&raw)
            .map_err(|e| ModelError::Decode(format!("{e}. Body: {}", truncate_chars(&raw, 500))))?;
        let response = Self::parse_response(&body)?;
        info!(
            tool_calls = response.tool_calls.len(),
            stop_reason = ?response.stop_reason,
            "OpenAI response parsed"
        );
        Ok(response)
    }
}
