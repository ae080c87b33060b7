use thiserror::Error;

/// Failures raised by a [`crate::hands::BrowserDriver`] call.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { what: String, timeout_ms: u64 },

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("invalid tab index: {index}. Available: 0-{}", .count.saturating_sub(1))]
    InvalidTab { index: usize, count: usize },

    #[error("cannot close the only tab")]
    OnlyTab,

    #[error("script error: {0}")]
    Script(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DriverError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout { .. })
    }
}

/// Failures inside one action handler. Never escapes the dispatch table:
/// [`ActionError::to_failure`] turns it into the text fed back to the model.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("stale selector {0}: the page changed since it was discovered")]
    StaleSelector(String),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

impl ActionError {
    /// Render as a consistently prefixed failure line. Timeouts get their own
    /// prefix so the model can tell "retry later" from "change strategy".
    pub fn to_failure(&self, context: &str) -> String {
        match self {
            ActionError::Driver(e) if e.is_timeout() => format!("⏱️ Timeout: {context}: {e}"),
            ActionError::StaleSelector(sel) => format!(
                "❌ Stale selector {sel}: the page changed since it was discovered. \
                 Run discover_element again before acting."
            ),
            ActionError::UnknownTool(name) => format!("❌ Unknown tool: {name}"),
            other => format!("❌ {context}: {other}"),
        }
    }
}

impl From<anyhow::Error> for ActionError {
    fn from(e: anyhow::Error) -> Self {
        ActionError::Driver(DriverError::Other(e))
    }
}

/// Failures talking to the language-model backend.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("{0} not set in environment")]
    MissingApiKey(&'static str),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Terminal outcomes of a task other than a result string.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("task cancelled by user: {0}")]
    Cancelled(String),
}
