/// Words that mark a click as potentially destructive or financial.
pub const RISK_KEYWORDS: &[&str] = &[
    "delete",
    "удалить",
    "remove",
    "убрать",
    "pay",
    "оплатить",
    "buy",
    "купить",
    "purchase",
    "submit",
    "отправить",
    "confirm",
    "подтвердить",
    "checkout",
    "оформить",
];

/// Keyword gate checked before every click. Independent of the model's own
/// `request_confirmation` tool; either can stop an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskGate {
    enabled: bool,
}

impl RiskGate {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// The first keyword found in `action`, if the gate is on.
    pub fn check(&self, action: &str) -> Option<&'static str> {
        if !self.enabled {
            return None;
        }
        let lower = action.to_lowercase();
        RISK_KEYWORDS.iter().copied().find(|k| lower.contains(k))
    }
}

/// How a click is described to the operator and to the keyword check.
pub fn describe_click(selector: &str, description: &str) -> String {
    format!("Click on element: {selector} ({description})")
}

/// Operator answers accepted at a yes/no prompt.
pub fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.trim().to_lowercase().as_str() {
        "yes" | "y" | "да" => Some(true),
        "no" | "n" | "нет" => Some(false),
        _ => None,
    }
}
