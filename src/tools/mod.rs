//! Tool catalogue and dispatch.
//!
//! A closed registry of tool variants built at startup, each implementing a
//! uniform `invoke(args) -> observation` contract and looked up by name.
//! The permission gate for side-effecting tools lives here too, backed by
//! the shared tables in `safety`.

pub mod fs;
pub mod model;
pub mod proc;
pub mod web;

use crate::config::ShellConfig;
use crate::error::AgentError;
use crate::governor::ResourceGovernor;
use crate::llm::CompletionClient;
use crate::safety;
use serde_json::Value;
use std::collections::BTreeMap;

/// Shared handles a tool may need.
pub struct ToolContext<'a> {
    pub governor: &'a ResourceGovernor,
    pub client: &'a dyn CompletionClient,
    pub shell: &'a ShellConfig,
}

/// A single tool. Errors are plain messages; the executor turns them into
/// observations, never into run failures.
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    /// One-line usage shown to the model in the tool catalogue.
    fn usage(&self) -> &'static str;
    /// True for tools with filesystem, process, or shell side effects;
    /// these pass the permission gate before every invocation.
    fn side_effects(&self) -> bool {
        false
    }
    fn invoke(&self, args: &Value, ctx: &ToolContext) -> Result<String, String>;
}

/// Fixed tool table, built once at startup.
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Box<dyn Tool>>,
}

impl ToolRegistry {
    /// The built-in catalogue.
    pub fn builtin() -> Self {
        let entries: Vec<Box<dyn Tool>> = vec![
            Box::new(model::AskModel),
            Box::new(fs::ReadFile),
            Box::new(fs::WriteFile),
            Box::new(fs::ListDir),
            Box::new(fs::GlobFiles),
            Box::new(fs::SearchFiles),
            Box::new(fs::FileDiff),
            Box::new(fs::Checksum),
            Box::new(proc::RunShell),
            Box::new(proc::RunCode),
            Box::new(web::FetchUrl),
            Box::new(model::ReviewPanel),
        ];
        let mut tools = BTreeMap::new();
        for tool in entries {
            tools.insert(tool.name(), tool);
        }
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Catalogue text for the step prompt: one `name: usage` line per tool.
    pub fn catalogue(&self) -> String {
        self.tools
            .values()
            .map(|t| format!("- {}: {}", t.name(), t.usage()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Check a side-effecting tool call against the protected-path list and the
/// dangerous-pattern table. Returns the blocking error, whose reason is the
/// observation text, or `None` when the call may proceed.
pub fn gate(tool: &dyn Tool, args: &Value) -> Option<AgentError> {
    if !tool.side_effects() {
        return None;
    }

    if let Some(path) = str_arg(args, "path") {
        if safety::is_protected_path(path) {
            return Some(AgentError::ToolBlocked {
                reason: format!("blocked: protected path ({})", path),
            });
        }
    }

    for key in ["command", "code", "content"] {
        if let Some(text) = str_arg(args, key) {
            if let Some(label) = safety::match_dangerous(text) {
                return Some(AgentError::ToolBlocked {
                    reason: format!("blocked: dangerous construct ({})", label),
                });
            }
        }
    }

    None
}

/// Extract a string argument.
pub(crate) fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

/// Extract a required string argument, with a uniform error message.
pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    str_arg(args, key).ok_or_else(|| format!("missing required argument `{}`", key))
}

/// Clip output to a byte budget, marking the cut.
pub(crate) fn clip(text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... (output truncated)", &text[..end])
}
