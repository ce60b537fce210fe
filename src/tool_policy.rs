//! Tool profile and policy (§4.E): the base "codex-parity" tool list, the
//! deny-flag policy that filters it, and the task-agent tool-mode resolver.

/// Base tool list, in the order a fresh profile presents them. Deduplicated
/// on construction, skipping empty names, though the literal below is already
/// dedup'd — `base_tools()` runs the same dedup pass a caller-supplied
/// override would need.
pub fn codex_parity_profile() -> Vec<String> {
    dedup_preserving_order(&[
        "exec_command",
        "write_stdin",
        "apply_patch",
        "update_plan",
        "view_image",
        "request_user_input",
        "multi_tool_use.parallel",
        "web.search_query",
        "web.open",
        "web.click",
        "web.find",
        "web.screenshot",
        "web.image_query",
        "web.finance",
        "web.weather",
        "web.sports",
        "web.time",
    ])
}

fn dedup_preserving_order(names: &[&str]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for name in names {
        if name.is_empty() || !seen.insert(*name) {
            continue;
        }
        out.push(name.to_string());
    }
    out
}

/// Deny flags a conversation's scope may carry. All `false` means "every
/// base tool is allowed."
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolPolicy {
    pub deny_write: bool,
    pub deny_network: bool,
    pub deny_planning: bool,
}

impl ToolPolicy {
    pub fn allow_all() -> Self {
        Self::default()
    }

    fn is_set(&self) -> bool {
        self.deny_write || self.deny_network || self.deny_planning
    }
}

/// Filter `base` (already deduplicated, order preserved) by `policy`. With no
/// deny flags set, returns `base` unchanged.
pub fn resolve_allowed_tools(base: &[String], policy: &ToolPolicy) -> Vec<String> {
    if !policy.is_set() {
        return base.to_vec();
    }
    base.iter()
        .filter(|name| {
            if policy.deny_write && (name.as_str() == "apply_patch" || name.as_str() == "write_stdin") {
                return false;
            }
            if policy.deny_network && name.starts_with("web.") {
                return false;
            }
            if policy.deny_planning && (name.as_str() == "update_plan" || name.as_str() == "request_user_input") {
                return false;
            }
            true
        })
        .cloned()
        .collect()
}

/// Which shape of process a task-agent conversation's `currentCommand`
/// invokes, as classified by its first whitespace-separated token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolMode {
    AiAgent,
    Shell,
    Default,
}

/// Classify a task's current command into a tool-mode (§4.E).
pub fn resolve_tool_mode(current_command: &str) -> ToolMode {
    let first = current_command.split_whitespace().next();
    match first {
        None => ToolMode::Default,
        Some(token) => match token.to_ascii_lowercase().as_str() {
            "codex" | "claude" | "cursor" | "gemini" => ToolMode::AiAgent,
            "bash" | "zsh" => ToolMode::Shell,
            _ => ToolMode::Shell,
        },
    }
}

const TASK_MODE_BASE: &[&str] = &[
    "task.current.set_flag",
    "task.child.get_context",
    "task.child.get_tty_output",
    "task.child.spawn",
    "task.child.send_message",
    "task.parent.report",
];

/// Tool names available to a task-agent conversation given its current
/// command: the fixed base set plus per-mode additions (§4.E, §4.H).
pub fn tool_names_for_mode(mode: ToolMode) -> Vec<String> {
    let mut names: Vec<String> = TASK_MODE_BASE.iter().map(|s| s.to_string()).collect();
    match mode {
        ToolMode::AiAgent => names.push("task.input_prompt".to_string()),
        ToolMode::Shell => {
            names.push("exec_command".to_string());
            names.push("write_stdin".to_string());
        }
        ToolMode::Default => names.push("write_stdin".to_string()),
    }
    names
}

/// Convenience: classify `current_command` and return its tool list in one
/// call, for the executor's §4.H wiring.
pub fn resolve_tool_mode_and_names(current_command: &str) -> (ToolMode, Vec<String>) {
    let mode = resolve_tool_mode(current_command);
    let names = tool_names_for_mode(mode);
    (mode, names)
}
