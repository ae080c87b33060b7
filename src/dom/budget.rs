use crate::types::{CHARS_PER_TOKEN, truncate_chars};

/// Token budget for a rendered snapshot, using a chars/4 estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    token_limit: usize,
}

impl ContextBudget {
    pub fn new(token_limit: usize) -> Self {
        Self { token_limit }
    }

    pub fn estimate(&self, text: &str) -> usize {
        text.chars().count() / CHARS_PER_TOKEN
    }

    /// Cut `text` at a line boundary so it fits, appending an omission marker.
    ///
    /// Room for the marker is reserved up front, so a fitted text always
    /// fits again and the result is never re-truncated.
    pub fn fit(&self, text: &str) -> (String, bool) {
        if self.estimate(text) <= self.token_limit {
            return (text.to_string(), false);
        }

        let max_chars = self.token_limit * CHARS_PER_TOKEN;
        let lines: Vec<&str> = text.lines().collect();
        let reserve = marker(lines.len()).chars().count() + 1;

        let mut kept: Vec<&str> = Vec::new();
        let mut used = 0;
        for line in &lines {
            let len = line.chars().count() + 1;
            if used + len + reserve > max_chars {
                break;
            }
            kept.push(line);
            used += len;
        }

        let omitted = marker(lines.len() - kept.len());
        if kept.is_empty() {
            return (truncate_chars(&omitted, max_chars).to_string(), true);
        }
        (format!("{}\n{omitted}", kept.join("\n")), true)
    }
}

fn marker(omitted: usize) -> String {
    format!("... [TRUNCATED: {omitted} lines omitted]")
}
