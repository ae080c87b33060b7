use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};

use crate::error::ModelError;
use crate::types::{DEFAULT_MAX_ITERATIONS, DEFAULT_TOKEN_LIMIT};

/// Which model API to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provider {
    #[default]
    Anthropic,
    OpenAi,
}

impl Provider {
    pub fn key_var(&self) -> &'static str {
        match self {
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Anthropic => "claude-sonnet-4-5",
            Provider::OpenAi => "gpt-4o",
        }
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "openai" | "gpt" => Ok(Provider::OpenAi),
            other => Err(anyhow!("unknown AI_PROVIDER '{other}' (expected anthropic or openai)")),
        }
    }
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub provider: Provider,
    pub api_key: Option<String>,
    /// Alternate endpoint for proxies and compatible gateways.
    pub api_base: Option<String>,
    pub model: String,
    pub max_iterations: usize,
    pub token_limit: usize,
    pub headless: bool,
    pub user_data_dir: PathBuf,
    pub chrome_path: Option<PathBuf>,
    pub debug_port: Option<u16>,
    pub risk_gate: bool,
    pub debug_mode: bool,
    pub screenshot_dir: PathBuf,
}

impl Settings {
    /// Load `.env` if present, then read the environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let provider = match var("AI_PROVIDER") {
            Some(p) => p.parse()?,
            None => Provider::default(),
        };

        Ok(Self {
            provider,
            api_key: var(provider.key_var()),
            api_base: var("AI_API_BASE"),
            model: var("AI_MODEL").unwrap_or_else(|| provider.default_model().to_string()),
            max_iterations: parse_or(var("MAX_ITERATIONS"), "MAX_ITERATIONS", DEFAULT_MAX_ITERATIONS)?,
            token_limit: parse_or(var("CONTEXT_TOKEN_LIMIT"), "CONTEXT_TOKEN_LIMIT", DEFAULT_TOKEN_LIMIT)?,
            headless: flag(var("HEADLESS"), false),
            user_data_dir: var("USER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_user_data_dir),
            chrome_path: var("CHROME_PATH").map(PathBuf::from),
            debug_port: var("CHROME_DEBUG_PORT")
                .map(|p| p.parse().with_context(|| format!("CHROME_DEBUG_PORT='{p}'")))
                .transpose()?,
            risk_gate: flag(var("RISK_GATE"), true),
            debug_mode: flag(var("DEBUG_MODE"), false),
            screenshot_dir: var("SCREENSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("screenshots")),
        })
    }

    /// Switching provider resets the key and, unless one was set, the model.
    pub fn set_provider(&mut self, provider: Provider, model_was_explicit: bool) {
        if provider == self.provider {
            return;
        }
        self.provider = provider;
        self.api_key = std::env::var(provider.key_var()).ok().filter(|k| !k.trim().is_empty());
        if !model_was_explicit {
            self.model = provider.default_model().to_string();
        }
    }

    pub fn require_api_key(&self) -> Result<&str, ModelError> {
        self.api_key
            .as_deref()
            .ok_or(ModelError::MissingApiKey(self.provider.key_var()))
    }
}

fn parse_or(raw: Option<String>, key: &str, default: usize) -> Result<usize> {
    match raw {
        Some(v) => v.parse().with_context(|| format!("{key}='{v}' is not a number")),
        None => Ok(default),
    }
}

fn flag(raw: Option<String>, default: bool) -> bool {
    match raw.as_deref().map(str::to_lowercase).as_deref() {
        Some("true" | "1" | "yes" | "on") => true,
        Some("false" | "0" | "no" | "off") => false,
        _ => default,
    }
}

fn default_user_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("text-vision-agent").join("user-data"))
        .unwrap_or_else(|| PathBuf::from("./user-data"))
}
