//! XML-like wrapper stripping (spec §6 "Tag conventions"). Two wrappers:
//! a context-block wrapper (canonical + legacy spelling, stripped on
//! ingest and when rendering) and a `<private>` wrapper (stripped on
//! ingest; a prompt consisting solely of one is not persisted).
//!
//! Open Question (spec §9 is silent on exact tag names and the bootstrap
//! preamble; see DESIGN.md): canonical context-block tag is
//! `<session-context>`, legacy spelling `<claude-mem-context>`; the
//! observer-bootstrap preamble is the fixed string below.

const CONTEXT_BLOCK_TAGS: &[&str] = &["session-context", "claude-mem-context"];
const MAX_TAGS_PER_PAYLOAD: usize = 64;

pub const OBSERVER_BOOTSTRAP_PREAMBLE: &str = "[[observer-bootstrap]]";

pub fn is_observer_bootstrap(text: &str) -> bool {
    text.trim_start().starts_with(OBSERVER_BOOTSTRAP_PREAMBLE)
}

/// Strip every `<private>...</private>` span from `text`, idempotently.
fn strip_tag(text: &str, tag: &str) -> String {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut stripped = 0;
    while stripped < MAX_TAGS_PER_PAYLOAD {
        let Some(start) = rest.find(&open) else {
            out.push_str(rest);
            return out;
        };
        let Some(end_rel) = rest[start..].find(&close) else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..start]);
        rest = &rest[start + end_rel + close.len()..];
        stripped += 1;
    }
    out.push_str(rest);
    out
}

/// Strip every context-block wrapper (canonical and legacy spelling).
pub fn strip_context_block(text: &str) -> String {
    let mut current = text.to_string();
    for tag in CONTEXT_BLOCK_TAGS {
        current = strip_tag(&current, tag);
    }
    current
}

/// Strip every `<private>...</private>` span, independent of the
/// fully-enclosed special case handled by `extract_fully_private`. A
/// prompt with private content alongside other text keeps the other text
/// but loses the private span (spec §6: "(stripped on ingest)").
pub fn strip_private(text: &str) -> String {
    strip_tag(text, "private")
}

/// If `text`, once trimmed, is entirely one `<private>...</private>` span
/// (or becomes empty after stripping it), return the inner content.
/// Otherwise `None` — a prompt with private content alongside other text
/// is still stored as-is (only a *fully* private prompt is suppressed).
pub fn extract_fully_private(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let inner = trimmed.strip_prefix("<private>")?.strip_suffix("</private>")?;
    Some(inner.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_private_wrapper_when_prompt_is_fully_private() {
        assert_eq!(extract_fully_private("<private>secret</private>"), Some("secret".to_string()));
        assert_eq!(extract_fully_private("prefix <private>secret</private>"), None);
    }

    #[test]
    fn context_block_stripping_is_idempotent() {
        let once = strip_context_block("before <session-context>stuff</session-context> after");
        let twice = strip_context_block(&once);
        assert_eq!(once, twice);
        assert_eq!(once, "before  after");
    }

    #[test]
    fn context_block_preserves_surrounding_text() {
        let stripped = strip_context_block("keep <claude-mem-context>drop</claude-mem-context> keep");
        assert_eq!(stripped, "keep  keep");
    }

    #[test]
    fn observer_bootstrap_preamble_detected() {
        assert!(is_observer_bootstrap("[[observer-bootstrap]] tool call recorded"));
        assert!(!is_observer_bootstrap("regular tool output"));
    }

    #[test]
    fn strip_private_removes_partial_span_but_keeps_surrounding_text() {
        let stripped = strip_private("investigate this <private>sk-ant-abc123</private> bug");
        assert_eq!(stripped, "investigate this  bug");
        assert!(!stripped.contains("sk-ant"));
    }

    #[test]
    fn strip_private_is_idempotent() {
        let once = strip_private("a <private>x</private> b");
        let twice = strip_private(&once);
        assert_eq!(once, twice);
    }
}
