//! Shared safety tables for the tool gate and the firewall.
//!
//! This module is the single source of truth for dangerous-command patterns,
//! protected write paths, and prompt-injection phrasing, so the executor's
//! tool gate and the firewall never drift apart.

use once_cell::sync::Lazy;
use regex::Regex;

/// A labeled dangerous-command pattern.
pub struct DangerPattern {
    pub label: &'static str,
    pub regex: Regex,
}

/// Destructive filesystem/database commands and raw code-execution
/// constructs. Matching is case-insensitive.
pub static DANGEROUS_COMMANDS: Lazy<Vec<DangerPattern>> = Lazy::new(|| {
    let table: &[(&str, &str)] = &[
        ("recursive delete", r"(?i)\brm\s+(-[a-z]*[rf][a-z]*\s+)+"),
        ("raw disk write", r"(?i)\bdd\s+if="),
        ("filesystem format", r"(?i)\bmkfs(\.\w+)?\b"),
        ("drop table", r"(?i)\bdrop\s+table\b"),
        ("truncate table", r"(?i)\btruncate\s+table\b"),
        ("dynamic eval", r"(?i)\beval\s*\("),
        ("dynamic exec", r"(?i)\bexec\s*\("),
        ("shell-out", r"(?i)\bsystem\s*\("),
        ("subshell substitution", r"\$\([^)]*\)"),
        ("fork bomb", r":\(\)\s*\{"),
    ];
    table
        .iter()
        .map(|(label, pattern)| DangerPattern {
            label,
            regex: Regex::new(pattern).expect("danger pattern must compile"),
        })
        .collect()
});

/// Privilege-escalation commands.
pub static PRIVILEGE_ESCALATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(sudo|doas)\b").expect("priv-esc pattern must compile"));

/// Prompt-injection phrasing. Matched case-insensitively as substrings.
pub const INJECTION_PHRASES: &[&str] = &[
    "ignore previous instructions",
    "ignore all previous",
    "ignore the previous",
    "disregard above",
    "disregard the above",
    "forget your instructions",
    "forget previous",
    "you are now",
    "new instructions:",
    "override your system prompt",
];

/// Marker for a sensitive but legitimate request that a human gate
/// downstream should look at.
pub const ESCALATION_MARKER: &str = "escalation:";

/// Write prefixes the agent must never touch.
pub const PROTECTED_WRITE_PATHS: &[&str] = &[
    "/etc", "/usr", "/bin", "/sbin", "/boot", "/dev", "/proc", "/sys", "/var/lib",
];

/// Protected prefixes under the home directory.
pub const PROTECTED_HOME_PATHS: &[&str] = &[".ssh", ".gnupg", ".aws", ".taskpilot"];

/// Returns the label of the first dangerous pattern matching `text`.
pub fn match_dangerous(text: &str) -> Option<&'static str> {
    DANGEROUS_COMMANDS
        .iter()
        .find(|p| p.regex.is_match(text))
        .map(|p| p.label)
}

/// Returns the first injection phrase contained in `text`, if any.
pub fn match_injection(text: &str) -> Option<&'static str> {
    let lower = text.to_ascii_lowercase();
    INJECTION_PHRASES
        .iter()
        .find(|phrase| lower.contains(*phrase))
        .copied()
}

/// True if `path` resolves under a protected write prefix.
pub fn is_protected_path(path: &str) -> bool {
    let expanded = if let Some(rest) = path.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest).to_string_lossy().into_owned(),
            None => path.to_string(),
        }
    } else {
        path.to_string()
    };

    if PROTECTED_WRITE_PATHS
        .iter()
        .any(|prefix| expanded == *prefix || expanded.starts_with(&format!("{}/", prefix)))
    {
        return true;
    }

    if let Some(home) = dirs::home_dir() {
        for sub in PROTECTED_HOME_PATHS {
            let guarded = home.join(sub);
            let guarded = guarded.to_string_lossy();
            if expanded == *guarded || expanded.starts_with(&format!("{}/", guarded)) {
                return true;
            }
        }
    }
    false
}
