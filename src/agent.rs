//! The orchestration loop.
//!
//! One model call per iteration. Tool calls from a response run in the order
//! given, one at a time, against the single browser session. Signal outputs
//! (human help, confirmation, completion) block on the operator.

use std::path::PathBuf;
use std::time::Duration;
use tokio::task;
use tracing::{error, info, warn};

use crate::actions::{ActionTable, ToolSpec, is_navigation_tool, tool_catalog};
use crate::brain::{ModelBackend, SYSTEM_PROMPT};
use crate::error::AgentError;
use crate::operator::{Operator, OperatorReply};
use crate::safety::{RiskGate, describe_click, parse_yes_no};
use crate::session::BrowserSession;
use crate::types::{
    DEFAULT_MAX_ITERATIONS, DEFAULT_TOKEN_LIMIT, RiskLevel, ToolInvocation, ToolOutput,
    ToolResult, Turn, truncate_chars,
};

const LOG_RESULT_MAX_CHARS: usize = 500;
const REFRESH_DELAY: Duration = Duration::from_millis(400);

pub const CANCELLED_BY_GATE: &str = "Action cancelled by user for security reasons.";
pub const NOT_COMPLETE: &str =
    "🚫 User says task is NOT complete yet. Continue working on the task.";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub token_limit: usize,
    pub risk_gate: bool,
    pub screenshot_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            token_limit: DEFAULT_TOKEN_LIMIT,
            risk_gate: true,
            screenshot_dir: PathBuf::from("screenshots"),
        }
    }
}

/// How one tool call ended, as far as the loop is concerned.
enum CallOutcome {
    Result(String),
    /// Result plus operator text that re-enters as a new user turn.
    FollowUp { result: String, instructions: String },
    /// The operator accepted the model's completion claim.
    Finished(String),
}

enum Review {
    Accepted,
    Rejected,
    Instructions(String),
}

pub struct Agent {
    brain: Box<dyn ModelBackend>,
    operator: Box<dyn Operator>,
    actions: ActionTable,
    risk_gate: RiskGate,
    max_iterations: usize,
    tools: Vec<ToolSpec>,
    conversation: Vec<Turn>,
}

impl Agent {
    pub fn new(brain: Box<dyn ModelBackend>, operator: Box<dyn Operator>, config: AgentConfig) -> Self {
        Self {
            brain,
            operator,
            actions: ActionTable::new(config.token_limit, config.screenshot_dir),
            risk_gate: RiskGate::new(config.risk_gate),
            max_iterations: config.max_iterations,
            tools: tool_catalog(),
            conversation: Vec::new(),
        }
    }

    pub fn conversation(&self) -> &[Turn] {
        &self.conversation
    }

    pub fn reset(&mut self) {
        self.conversation.clear();
        info!("conversation reset");
    }

    /// Work on `task` until the model stops calling tools, the operator
    /// accepts a completion, or the iteration cap is hit.
    ///
    /// Only an operator interrupt at a blocking prompt is an error.
    ///
    /// Tool calls run inside `block_in_place`, so this needs the
    /// multi-threaded runtime.
    pub async fn run(&mut self, session: &mut BrowserSession, task: &str) -> Result<String, AgentError> {
        info!(task, "starting task");
        self.conversation = vec![Turn::user(task)];

        for iteration in 1..=self.max_iterations {
            info!(iteration, max = self.max_iterations, "agent step");

            let response = match self
                .brain
                .chat(SYSTEM_PROMPT, &self.conversation, &self.tools)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    error!(error = %e, "model call failed");
                    self.conversation.push(Turn::user(format!(
                        "An error occurred: Error: {e}. Please try a different approach."
                    )));
                    continue;
                }
            };

            let text = response.text();
            if !text.is_empty() {
                info!(text = %truncate_chars(&text, LOG_RESULT_MAX_CHARS), "model says");
            }

            if response.tool_calls.is_empty() {
                info!("model finished without tool calls");
                self.conversation.push(Turn::Assistant {
                    text: text.clone(),
                    tool_calls: Vec::new(),
                });
                return Ok(text);
            }

            self.conversation.push(Turn::Assistant {
                text,
                tool_calls: response.tool_calls.clone(),
            });

            let mut results = Vec::with_capacity(response.tool_calls.len());
            let mut follow_ups = Vec::new();
            for call in &response.tool_calls {
                // CDP calls and operator prompts block the thread.
                let outcome = task::block_in_place(|| self.handle_call(session, call))?;
                let content = match outcome {
                    CallOutcome::Result(content) => content,
                    CallOutcome::FollowUp {
                        result,
                        instructions,
                    } => {
                        follow_ups.push(instructions);
                        result
                    }
                    CallOutcome::Finished(summary) => {
                        info!(summary = %summary, "task complete");
                        return Ok(summary);
                    }
                };
                info!(
                    tool = %call.name,
                    result = %truncate_chars(&content, LOG_RESULT_MAX_CHARS),
                    "tool result"
                );
                results.push(ToolResult {
                    invocation_id: call.id.clone(),
                    content,
                });
            }

            self.conversation.push(Turn::ToolResults { results });
            self.conversation
                .extend(follow_ups.into_iter().map(Turn::user));
        }

        let message = format!(
            "Reached maximum iterations ({}). Task may be incomplete.",
            self.max_iterations
        );
        warn!("{message}");
        Ok(message)
    }

    fn handle_call(
        &mut self,
        session: &mut BrowserSession,
        call: &ToolInvocation,
    ) -> Result<CallOutcome, AgentError> {
        info!(tool = %call.name, args = %call.arguments, "tool call");

        if call.name == "click_element" && !self.click_allowed(call)? {
            return Ok(CallOutcome::Result(CANCELLED_BY_GATE.to_string()));
        }

        let mut content = match self.actions.execute(session, &call.name, &call.arguments) {
            ToolOutput::Text(text) => text,
            ToolOutput::HumanHelp { description } => self.human_help(session, &description)?,
            ToolOutput::Confirmation { risk, action } => self.confirm(risk, &action)?,
            ToolOutput::Complete { summary } => match self.review_completion(&summary)? {
                Review::Accepted => return Ok(CallOutcome::Finished(summary)),
                Review::Rejected => NOT_COMPLETE.to_string(),
                Review::Instructions(instructions) => {
                    return Ok(CallOutcome::FollowUp {
                        result: format!(
                            "📝 User provided additional instructions: {instructions}\nContinue working with this new information."
                        ),
                        instructions,
                    });
                }
            },
        };

        if is_navigation_tool(&call.name) {
            session.driver().wait(REFRESH_DELAY);
            match self.actions.snapshot(session) {
                Ok(snapshot) => {
                    info!(
                        url = %snapshot.url,
                        tokens = snapshot.estimated_tokens,
                        truncated = snapshot.truncated,
                        "page refreshed"
                    );
                    content.push_str("\n🔄 Page Updated:\n");
                    content.push_str(&snapshot.rendered_text);
                }
                Err(e) => warn!(error = %e, "post-action snapshot failed"),
            }
        }

        Ok(CallOutcome::Result(content))
    }

    /// Keyword gate before a click. `false` means the operator declined.
    fn click_allowed(&mut self, call: &ToolInvocation) -> Result<bool, AgentError> {
        let arg = |key: &str| call.arguments[key].as_str().unwrap_or_default().to_string();
        let action = describe_click(&arg("selector"), &arg("description"));
        let Some(keyword) = self.risk_gate.check(&action) else {
            return Ok(true);
        };

        warn!(keyword, action = %action, "risky click detected");
        self.operator.notify(&format!(
            "\n⚠️  RISKY ACTION DETECTED (keyword: '{keyword}')\n➡️  {action}\n"
        ));
        let allowed = self.ask_yes_no("Do you want to proceed? (yes/no): ", "risk gate")?;
        if !allowed {
            warn!(action = %action, "operator blocked risky click");
        }
        Ok(allowed)
    }

    fn human_help(
        &mut self,
        session: &mut BrowserSession,
        description: &str,
    ) -> Result<String, AgentError> {
        warn!(description, "paused for human intervention");
        self.operator.notify(&format!(
            "\n⏸️  PAUSED - Human Action Required\n📋 {description}\n\n👉 Please complete this action in the browser, then press Enter to continue..."
        ));
        if self.operator.prompt("Press Enter when ready: ") == OperatorReply::Interrupted {
            return Err(AgentError::Cancelled(
                "interrupted during human intervention".to_string(),
            ));
        }
        info!("resuming after human intervention");

        // The operator may have navigated anywhere.
        session.invalidate_selectors();
        match self.actions.snapshot(session) {
            Ok(snapshot) => Ok(format!(
                "✅ Human intervention completed.\nCurrent URL: {}\nPage Title: {}\nAgent can now continue.\n\n{}",
                snapshot.url, snapshot.title, snapshot.rendered_text
            )),
            Err(e) => {
                warn!(error = %e, "snapshot after human intervention failed");
                let url = session.driver().url().unwrap_or_else(|_| "unknown".into());
                let title = session.driver().title().unwrap_or_else(|_| "unknown".into());
                Ok(format!(
                    "✅ Human intervention completed.\nCurrent URL: {url}\nPage Title: {title}\nAgent can now continue."
                ))
            }
        }
    }

    fn confirm(&mut self, risk: RiskLevel, action: &str) -> Result<String, AgentError> {
        self.operator.notify(&format!(
            "\n{}  CONFIRMATION REQUIRED - {} ACTION\n➡️  {action}\n\nThis action may be irreversible!",
            risk.emoji(),
            risk.as_str().to_uppercase()
        ));
        if self.ask_yes_no("Do you want to proceed? (yes/no): ", "confirmation")? {
            info!(action, "operator confirmed action");
            Ok(format!(
                "✅ User CONFIRMED the action. You may proceed with: {action}"
            ))
        } else {
            warn!(action, "operator declined action");
            Ok("🚫 User DECLINED the action. Do NOT proceed. Find an alternative approach or complete the task differently.".to_string())
        }
    }

    /// The model's completion claim is not trusted until the operator agrees.
    fn review_completion(&mut self, summary: &str) -> Result<Review, AgentError> {
        info!(summary, "model reports task complete");
        self.operator.notify(&format!(
            "\n📊 Agent thinks task is complete: {summary}\n\nIs the task actually complete?\n  'yes' or 'y' - Task is complete\n  'no' or 'n' - Task is NOT complete, continue working\n  Or type additional instructions to continue\n"
        ));
        match self.operator.prompt("Your response: ") {
            OperatorReply::Interrupted => Err(AgentError::Cancelled(
                "interrupted during completion review".to_string(),
            )),
            OperatorReply::Line(line) if line.trim().is_empty() => Ok(Review::Accepted),
            OperatorReply::Line(line) => Ok(match parse_yes_no(&line) {
                Some(true) => Review::Accepted,
                Some(false) => Review::Rejected,
                None => Review::Instructions(line.trim().to_string()),
            }),
        }
    }

    fn ask_yes_no(&mut self, question: &str, context: &str) -> Result<bool, AgentError> {
        loop {
            match self.operator.prompt(question) {
                OperatorReply::Interrupted => {
                    return Err(AgentError::Cancelled(format!("interrupted at {context}")));
                }
                OperatorReply::Line(line) => match parse_yes_no(&line) {
                    Some(answer) => return Ok(answer),
                    None => self.operator.notify("Please enter 'yes' or 'no'"),
                },
            }
        }
    }
}
