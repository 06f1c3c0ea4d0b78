//! System prompt assembly, context trimming, and citation formatting for
//! the agent loop.

use crate::knowledge::Citation;
use crate::llm::Message;

/// Approximate characters per token for estimation.
///
/// Intentionally conservative (overestimates) so trimming kicks in
/// before the provider's real limit does.
const CHARS_PER_TOKEN: u64 = 4;

/// Build the agent system prompt.
///
/// Sections included:
/// 1. Role and ground rules
/// 2. Tool descriptions from the registry
/// 3. Available skills
/// 4. Retrieved knowledge (first iteration only, prepended by the loop)
pub fn assemble_system_prompt(
    tool_descriptions: &str,
    skills: &[String],
    knowledge: &str,
) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(
        "You are an SRE assistant with read access to production telemetry. \
         Answer operational questions by calling tools, then summarize what \
         the data shows. Tool results are summarized; use get_full_result \
         with a result id when you need the complete body."
            .to_owned(),
    );

    sections.push(format!("## Tools\n{tool_descriptions}"));

    if !skills.is_empty() {
        sections.push(format!("## Skills\n{}", skills.join(", ")));
    }

    if !knowledge.trim().is_empty() {
        sections.push(format!("## Organizational Knowledge\n{knowledge}"));
    }

    sections.join("\n\n")
}

// ---------------------------------------------------------------------------
// Conversation trimming
// ---------------------------------------------------------------------------

/// Trim a conversation to fit within a token budget.
///
/// Strategy:
/// - Always keep the first message (the system prompt)
/// - Always keep the last message (most recent input or tool results)
/// - Drop oldest messages from the middle until under budget
pub fn trim_messages(messages: &[Message], max_context_tokens: u64) -> Vec<Message> {
    if messages.is_empty() {
        return Vec::new();
    }
    if estimate_messages_tokens(messages) <= max_context_tokens || messages.len() <= 2 {
        return messages.to_vec();
    }

    let first = &messages[0];
    let last = &messages[messages.len().saturating_sub(1)];
    let fixed_cost = estimate_message_tokens(first).saturating_add(estimate_message_tokens(last));

    if fixed_cost >= max_context_tokens {
        // Even first+last exceed budget; keep just the last message.
        return vec![last.clone()];
    }

    let mut remaining_budget = max_context_tokens.saturating_sub(fixed_cost);
    let middle = &messages[1..messages.len().saturating_sub(1)];

    // Walk backwards through the middle, keeping the most recent turns.
    let mut kept_middle: Vec<Message> = Vec::new();
    for msg in middle.iter().rev() {
        let cost = estimate_message_tokens(msg);
        if cost <= remaining_budget {
            kept_middle.push(msg.clone());
            remaining_budget = remaining_budget.saturating_sub(cost);
        } else {
            break;
        }
    }
    kept_middle.reverse();

    let mut result = Vec::with_capacity(kept_middle.len().saturating_add(2));
    result.push(first.clone());
    result.extend(kept_middle);
    result.push(last.clone());
    result
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> u64 {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate tokens for one message via the chars-per-token heuristic.
fn estimate_message_tokens(message: &Message) -> u64 {
    let text = message.content.text();
    let chars = u64::try_from(text.len()).unwrap_or(u64::MAX);
    chars
        .saturating_add(CHARS_PER_TOKEN.saturating_sub(1))
        / CHARS_PER_TOKEN
}

/// Render deduplicated citations as a trailing sources section.
///
/// Returns an empty string when there is nothing to cite.
pub fn format_citations(citations: &[Citation]) -> String {
    if citations.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\n## Sources\n");
    for citation in citations {
        match &citation.source_url {
            Some(url) => out.push_str(&format!("- {} ({url})\n", citation.title)),
            None => out.push_str(&format!("- {}\n", citation.title)),
        }
    }
    out
}
