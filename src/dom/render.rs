use std::fmt::Write;

use crate::types::{
    ElementRecord, LISTING_TEXT_MAX_CHARS, NARROW_GROUP_LIMIT, SemanticType, WIDE_GROUP_LIMIT,
    truncate_chars,
};

/// Per-group caps for the snapshot listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderLimits {
    pub content_group: usize,
    pub other_group: usize,
    pub text_chars: usize,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            content_group: WIDE_GROUP_LIMIT,
            other_group: NARROW_GROUP_LIMIT,
            text_chars: LISTING_TEXT_MAX_CHARS,
        }
    }
}

impl RenderLimits {
    fn for_type(&self, kind: &SemanticType) -> usize {
        if kind.is_content_bearing() {
            self.content_group
        } else {
            self.other_group
        }
    }
}

/// `#id` when present, else the first class as `.class`.
pub fn selector_hint(record: &ElementRecord) -> String {
    if let Some(id) = &record.dom_id {
        format!("#{id}")
    } else if let Some(class) = record.class_tokens.first() {
        format!(".{class}")
    } else {
        String::new()
    }
}

/// Group records by type (first-seen order) and render the listing.
pub fn render(url: &str, title: &str, records: &[ElementRecord], limits: &RenderLimits) -> String {
    let mut groups: Vec<(&SemanticType, Vec<&ElementRecord>)> = Vec::new();
    for record in records {
        match groups.iter_mut().find(|(k, _)| **k == record.semantic_type) {
            Some((_, items)) => items.push(record),
            None => groups.push((&record.semantic_type, vec![record])),
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "=== PAGE SNAPSHOT ===");
    let _ = writeln!(out, "URL: {url}");
    let _ = writeln!(out, "Title: {title}");
    let _ = writeln!(out);
    let _ = write!(out, "=== INTERACTIVE ELEMENTS ===");

    for (kind, items) in groups {
        let _ = write!(out, "\n\n[{}]", kind.as_str().to_uppercase());
        let limit = limits.for_type(kind);
        for (i, record) in items.iter().take(limit).enumerate() {
            let text = truncate_chars(&record.display_text, limits.text_chars);
            let _ = write!(
                out,
                "\n  {}. {} <{}>{}",
                i + 1,
                text,
                record.tag_name,
                selector_hint(record)
            );
        }
        if items.len() > limit {
            let _ = write!(out, "\n  ... (+{} more)", items.len() - limit);
        }
    }

    out
}
