//! System-prompt templates instructing a provider how to respond to a
//! `<tool_event>` or `<summarize_request>` turn (spec §4.3 XML tag
//! contract). Compiled in so every provider sends the same instructions
//! regardless of which backend is configured.

const OBSERVATION_PROMPT: &str = include_str!("../../prompts/observation.txt");
const SUMMARY_PROMPT: &str = include_str!("../../prompts/summary.txt");

/// The combined system prompt sent with every provider call: a session's
/// turns interleave tool-event and summarize-request messages, so the
/// provider needs both sets of instructions up front rather than per-turn.
pub fn system_prompt() -> String {
    format!("{OBSERVATION_PROMPT}\n\n{SUMMARY_PROMPT}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_mentions_both_tag_contracts() {
        let prompt = system_prompt();
        assert!(prompt.contains("<observation>"));
        assert!(prompt.contains("<summary>"));
    }
}
