//! XML-tagged response parser (spec §4.3 parsing contract). Generalizes
//! the teacher's `memory_format.rs` (kept over `observe.rs`'s simpler
//! version because it tolerates attributes on the opening tag and uses
//! relative offsets) to also parse `<summary>` blocks and synthesize a
//! fallback summary from unstructured text.

use crate::db::OBSERVATION_TYPES;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedObservation {
    pub obs_type: String,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub facts: Vec<String>,
    pub narrative: Option<String>,
    pub concepts: Vec<String>,
    pub files_read: Vec<String>,
    pub files_modified: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedSummary {
    pub request: Option<String>,
    pub investigated: Option<String>,
    pub learned: Option<String>,
    pub completed: Option<String>,
    pub next_steps: Option<String>,
    pub notes: Option<String>,
}

pub fn xml_escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn extract_field(content: &str, field: &str) -> Option<String> {
    let open = format!("<{}>", field);
    let close = format!("</{}>", field);
    let start = content.find(&open)? + open.len();
    let end_rel = content[start..].find(&close)?;
    let end = start + end_rel;
    if start >= end {
        return None;
    }
    let val = content[start..end].trim().to_string();
    if val.is_empty() {
        None
    } else {
        Some(val)
    }
}

fn extract_array(content: &str, array_name: &str, element_name: &str) -> Vec<String> {
    let open = format!("<{}>", array_name);
    let close = format!("</{}>", array_name);
    let Some(start) = content.find(&open) else {
        return vec![];
    };
    let start = start + open.len();
    let Some(end_rel) = content[start..].find(&close) else {
        return vec![];
    };
    let end = start + end_rel;
    let inner = &content[start..end];

    let elem_open = format!("<{}>", element_name);
    let elem_close = format!("</{}>", element_name);
    let mut results = Vec::new();
    let mut pos = 0;
    while let Some(s) = inner[pos..].find(&elem_open) {
        let val_start = pos + s + elem_open.len();
        if let Some(e_rel) = inner[val_start..].find(&elem_close) {
            let val_end = val_start + e_rel;
            let val = inner[val_start..val_end].trim().to_string();
            if !val.is_empty() {
                results.push(val);
            }
            pos = val_end + elem_close.len();
        } else {
            break;
        }
    }
    results
}

/// Extract zero or more `<observation>` blocks. Missing required fields
/// get defaults; a block that can't locate its closing tag is skipped.
pub fn parse_observations(text: &str) -> Vec<ParsedObservation> {
    let mut observations = Vec::new();
    let mut pos = 0;

    while let Some(tag_start_rel) = text[pos..].find("<observation") {
        let tag_start = pos + tag_start_rel;
        let Some(open_end_rel) = text[tag_start..].find('>') else {
            break;
        };
        let content_start = tag_start + open_end_rel + 1;
        let Some(close_rel) = text[content_start..].find("</observation>") else {
            break;
        };
        let content_end = content_start + close_rel;
        let content = &text[content_start..content_end];

        let raw_type = extract_field(content, "type").unwrap_or_default();
        let obs_type = if OBSERVATION_TYPES.contains(&raw_type.as_str()) {
            raw_type
        } else {
            "discovery".to_string()
        };

        let mut concepts = extract_array(content, "concepts", "concept");
        concepts.retain(|c| c != &obs_type);

        observations.push(ParsedObservation {
            obs_type,
            title: extract_field(content, "title"),
            subtitle: extract_field(content, "subtitle"),
            facts: extract_array(content, "facts", "fact"),
            narrative: extract_field(content, "narrative"),
            concepts,
            files_read: extract_array(content, "files_read", "file"),
            files_modified: extract_array(content, "files_modified", "file"),
        });

        pos = content_end + "</observation>".len();
    }

    observations
}

/// Extract at most one `<summary>` block. If the turn is unstructured
/// (no well-formed `<summary>` tag), synthesize a fallback: `request` is
/// the initial user prompt, `notes` carries the raw text — the turn is
/// still usable rather than discarded (spec §4.3).
pub fn parse_summary(text: &str, initial_prompt: &str) -> ParsedSummary {
    if let Some(tag_start) = text.find("<summary") {
        if let Some(open_end_rel) = text[tag_start..].find('>') {
            let content_start = tag_start + open_end_rel + 1;
            if let Some(close_rel) = text[content_start..].find("</summary>") {
                let content_end = content_start + close_rel;
                let content = &text[content_start..content_end];
                return ParsedSummary {
                    request: extract_field(content, "request"),
                    investigated: extract_field(content, "investigated"),
                    learned: extract_field(content, "learned"),
                    completed: extract_field(content, "completed"),
                    next_steps: extract_field(content, "next_steps"),
                    notes: extract_field(content, "notes"),
                };
            }
        }
    }

    ParsedSummary {
        request: Some(initial_prompt.to_string()),
        notes: Some(text.trim().to_string()).filter(|s| !s.is_empty()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_field_scans_from_open_tag() {
        let body = "</title><title>ok</title>";
        assert_eq!(extract_field(body, "title").as_deref(), Some("ok"));
    }

    #[test]
    fn xml_escape_escapes_angle_and_amp() {
        assert_eq!(xml_escape_text(r#"a<&>"'"#), "a&lt;&amp;&gt;&quot;&apos;");
    }

    #[test]
    fn parse_observations_tolerates_attributes_on_opening_tag() {
        let text = r#"<observation id="1"><type>bugfix</type><title>fixed it</title></observation>"#;
        let obs = parse_observations(text);
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].obs_type, "bugfix");
        assert_eq!(obs[0].title.as_deref(), Some("fixed it"));
    }

    #[test]
    fn parse_observations_defaults_invalid_type_to_discovery() {
        let text = "<observation><type>not-a-real-type</type></observation>";
        let obs = parse_observations(text);
        assert_eq!(obs[0].obs_type, "discovery");
    }

    #[test]
    fn parse_observations_skips_unterminated_block() {
        let text = "<observation><type>bugfix</type>";
        assert!(parse_observations(text).is_empty());
    }

    #[test]
    fn parse_summary_extracts_structured_fields() {
        let text = "<summary><request>fix bug</request><completed>done</completed></summary>";
        let summary = parse_summary(text, "fallback prompt");
        assert_eq!(summary.request.as_deref(), Some("fix bug"));
        assert_eq!(summary.completed.as_deref(), Some("done"));
    }

    #[test]
    fn parse_summary_falls_back_on_unstructured_text() {
        let summary = parse_summary("just some prose, no tags", "original user prompt");
        assert_eq!(summary.request.as_deref(), Some("original user prompt"));
        assert_eq!(summary.notes.as_deref(), Some("just some prose, no tags"));
    }
}
