//! Bounded conversation-history assembler (§4.D).
//!
//! A pure function: given a message slice and a set of limits, produce a
//! single prompt-ready block plus metadata about what was kept. No I/O, no
//! async — callers pull messages from the log themselves.

use crate::message::{Message, Role};

#[derive(Debug, Clone)]
pub struct HistoryOptions {
    pub max_messages: usize,
    pub max_chars: usize,
    pub message_clamp_chars: usize,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            max_messages: 80,
            max_chars: 12_000,
            message_clamp_chars: 360,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMeta {
    pub total_messages: usize,
    pub included: usize,
    pub dropped: usize,
    pub output_chars: usize,
}

/// Build the history block for `messages` (oldest first) under `opts`.
pub fn build(messages: &[Message], opts: &HistoryOptions) -> (String, HistoryMeta) {
    let total_messages = messages.len();

    let lines: Vec<String> = messages
        .iter()
        .filter_map(|m| {
            let normalized = normalize_content(m.role, &m.content, opts.message_clamp_chars);
            if normalized.is_empty() {
                None
            } else {
                Some(format!("[{}#{}] {}", m.role.as_str(), m.id, normalized))
            }
        })
        .collect();

    // Only step-3/4 truncation counts as "dropped" per §4.D step 5 — messages
    // filtered out above for having empty normalized content are excluded.
    let lines_after_filter = lines.len();

    let kept_by_count: Vec<String> = if lines.len() > opts.max_messages {
        lines[lines.len() - opts.max_messages..].to_vec()
    } else {
        lines
    };

    let mut acc: Vec<&str> = Vec::new();
    let mut running_len = 0usize;
    for line in kept_by_count.iter().rev() {
        let separator = if acc.is_empty() { 0 } else { 1 };
        let candidate_len = running_len + separator + line.len();
        if candidate_len > opts.max_chars && !acc.is_empty() {
            break;
        }
        acc.push(line.as_str());
        running_len = candidate_len;
    }
    acc.reverse();

    let included = acc.len();
    let dropped = lines_after_filter.saturating_sub(included);
    let joined = acc.join("\n");

    let output = if dropped > 0 {
        format!(
            "history_summary:\n- dropped_messages: {dropped}\n- included_messages: {included}\nrecent_history:\n{joined}"
        )
    } else {
        joined
    };

    let meta = HistoryMeta {
        total_messages,
        included,
        dropped,
        output_chars: output.len(),
    };

    (output, meta)
}

/// Collapse a message's raw content into a single display line: structured
/// assistant content becomes `text tools(name[:state], ...)`, a plain
/// `{"text": ...}` envelope is unwrapped, anything else passes through as-is.
/// Whitespace is then collapsed and the result clamped to `clamp` chars.
fn normalize_content(role: Role, raw: &str, clamp: usize) -> String {
    let trimmed = raw.trim();
    let rendered = render_structured(role, trimmed).unwrap_or_else(|| trimmed.to_string());
    let collapsed = collapse_whitespace(&rendered);
    clamp_str(&collapsed, clamp)
}

fn render_structured(role: Role, raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let map = value.as_object()?;

    if role == Role::Assistant {
        if let Some(tools) = map.get("tools").and_then(|v| v.as_array()) {
            let text = map.get("text").and_then(|v| v.as_str()).unwrap_or("");
            let tool_strs: Vec<String> = tools
                .iter()
                .filter_map(|t| {
                    let name = t.get("tool_name")?.as_str()?;
                    let state = t.get("state").and_then(|s| s.as_str()).filter(|s| !s.is_empty());
                    Some(match state {
                        Some(state) => format!("{name}:{state}"),
                        None => name.to_string(),
                    })
                })
                .collect();

            let mut out = String::new();
            if !text.is_empty() {
                out.push_str(text);
            }
            if !tool_strs.is_empty() {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(&format!("tools({})", tool_strs.join(", ")));
            }
            return Some(out);
        }
    }

    map.get("text").and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clamp_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let suffix = "...(truncated)";
    let keep = max_chars.saturating_sub(suffix.len());
    let truncated: String = s.chars().take(keep).collect();
    format!("{truncated}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageStatus;

    fn msg(id: i64, role: Role, content: &str) -> Message {
        Message {
            id,
            conversation_key: "conv-1".to_string(),
            role,
            content: content.to_string(),
            status: MessageStatus::Completed,
            error_text: None,
        }
    }

    #[test]
    fn empty_content_is_dropped() {
        let messages = vec![msg(1, Role::User, ""), msg(2, Role::User, "hello")];
        let (out, meta) = build(&messages, &HistoryOptions::default());
        assert_eq!(out, "[user#2] hello");
        assert_eq!(meta.included, 1);
    }

    #[test]
    fn assistant_structured_content_renders_text_and_tools() {
        let content = serde_json::json!({
            "text": "done",
            "tools": [{ "tool_name": "exec_command", "state": "completed" }, { "tool_name": "view_image", "state": "" }],
        })
        .to_string();
        let messages = vec![msg(1, Role::Assistant, &content)];
        let (out, _) = build(&messages, &HistoryOptions::default());
        assert_eq!(out, "[assistant#1] done tools(exec_command:completed, view_image)");
    }

    #[test]
    fn plain_text_envelope_is_unwrapped_for_any_role() {
        let content = serde_json::json!({ "text": "hi there" }).to_string();
        let messages = vec![msg(1, Role::User, &content)];
        let (out, _) = build(&messages, &HistoryOptions::default());
        assert_eq!(out, "[user#1] hi there");
    }

    #[test]
    fn long_message_is_clamped_with_suffix() {
        let long = "x".repeat(500);
        let messages = vec![msg(1, Role::User, &long)];
        let opts = HistoryOptions { message_clamp_chars: 50, ..HistoryOptions::default() };
        let (out, _) = build(&messages, &opts);
        assert!(out.ends_with("...(truncated)"));
        assert!(out.len() < 70);
    }

    #[test]
    fn message_count_overflow_wraps_with_summary() {
        let messages: Vec<Message> = (0..120)
            .map(|i| msg(i, Role::User, &"y".repeat(120)))
            .collect();
        let opts = HistoryOptions { max_messages: 30, max_chars: 2_000, message_clamp_chars: 360 };
        let (out, meta) = build(&messages, &opts);
        assert!(out.starts_with("history_summary:"));
        assert!(meta.dropped > 0);
        assert!(meta.included <= 30);
    }

    #[test]
    fn char_budget_keeps_newest_messages_first() {
        let messages: Vec<Message> = (0..10)
            .map(|i| msg(i, Role::User, &format!("message number {i}")))
            .collect();
        let opts = HistoryOptions { max_messages: 80, max_chars: 40, message_clamp_chars: 360 };
        let (out, meta) = build(&messages, &opts);
        assert!(out.contains("message number 9"));
        assert!(meta.dropped > 0);
    }

    #[test]
    fn no_drops_means_no_summary_wrapper() {
        let messages = vec![msg(1, Role::User, "hi"), msg(2, Role::Assistant, "hello")];
        let (out, meta) = build(&messages, &HistoryOptions::default());
        assert!(!out.starts_with("history_summary:"));
        assert_eq!(meta.dropped, 0);
    }

    #[test]
    fn empty_content_filtering_alone_does_not_count_as_dropped() {
        let messages: Vec<Message> = (0..50)
            .map(|i| if i % 2 == 0 { msg(i, Role::User, "") } else { msg(i, Role::User, "kept") })
            .collect();
        let (out, meta) = build(&messages, &HistoryOptions::default());
        assert!(!out.starts_with("history_summary:"));
        assert_eq!(meta.dropped, 0);
        assert_eq!(meta.included, 25);
    }
}
