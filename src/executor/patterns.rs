//! Reasoning pattern selection.
//!
//! A pattern is chosen once per run, not per step. An explicit caller
//! override always wins; otherwise a constrained classifier prompt runs on
//! a cheap model, and only when that fails (or replies outside the known
//! set) does the pure keyword heuristic decide. Two explicit code paths,
//! never silently merged.

use crate::llm::ChatMessage;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The shape of the agent's loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningPattern {
    /// Single model call, no tools.
    Direct,
    /// Interleaved thought -> action -> observation, one tool per step.
    React,
    /// Ordered plan up front, then sequential execution against it.
    PreAct,
    /// Full plan and worker calls without re-consulting the model between
    /// tool results.
    Rewoo,
    /// Execute, self-critique, retry with the critique as added context.
    Reflexion,
}

pub const ALL_PATTERNS: [ReasoningPattern; 5] = [
    ReasoningPattern::Direct,
    ReasoningPattern::React,
    ReasoningPattern::PreAct,
    ReasoningPattern::Rewoo,
    ReasoningPattern::Reflexion,
];

impl ReasoningPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningPattern::Direct => "direct",
            ReasoningPattern::React => "react",
            ReasoningPattern::PreAct => "pre_act",
            ReasoningPattern::Rewoo => "rewoo",
            ReasoningPattern::Reflexion => "reflexion",
        }
    }
}

impl std::fmt::Display for ReasoningPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReasoningPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(ReasoningPattern::Direct),
            "react" => Ok(ReasoningPattern::React),
            "pre_act" | "preact" | "pre-act" => Ok(ReasoningPattern::PreAct),
            "rewoo" => Ok(ReasoningPattern::Rewoo),
            "reflexion" | "reflection" => Ok(ReasoningPattern::Reflexion),
            other => Err(format!("unknown reasoning pattern: {}", other)),
        }
    }
}

/// Constrained classifier prompt.
pub fn classifier_messages(task_text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "Classify the task into exactly one reasoning pattern. Reply with a single word \
             from: direct, react, pre_act, rewoo, reflexion. direct = trivial, no external \
             action. react = single fact or action. pre_act = explicit multi-step sequence. \
             rewoo = explanatory or reasoning-heavy. reflexion = asks for a fix or care.",
        ),
        ChatMessage::user(task_text),
    ]
}

/// Parse the classifier's reply, tolerating surrounding prose.
pub fn parse_classifier_reply(reply: &str) -> Option<ReasoningPattern> {
    if let Ok(pattern) = reply.parse() {
        return Some(pattern);
    }
    reply
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_' && c != '-')
        .find_map(|word| word.parse().ok())
}

const GREETING_WORDS: &[&str] = &["hi", "hello", "hey", "thanks", "yo"];

const GREETING_PHRASES: &[&str] = &["thank you", "good morning", "good evening"];

const EXPLANATORY: &[&str] = &[
    "explain", "why ", "describe", "compare", "summarize", "what does", "how does",
];

/// Pure keyword fallback, used only when the classifier path fails.
pub fn heuristic(task_text: &str) -> ReasoningPattern {
    let lower = task_text.trim().to_ascii_lowercase();

    let first_word = lower
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_matches(|c: char| !c.is_ascii_alphanumeric());
    if GREETING_WORDS.contains(&first_word)
        || GREETING_PHRASES.iter().any(|g| lower.starts_with(g))
        || lower.split_whitespace().count() <= 2
    {
        return ReasoningPattern::Direct;
    }

    if lower.starts_with("fix") || lower.contains(" fix ") || lower.contains("carefully") {
        return ReasoningPattern::Reflexion;
    }

    let sequenced = (lower.contains("first") && (lower.contains("then") || lower.contains("finally")))
        || lower.contains(" and then ")
        || lower.contains("step by step")
        || (lower.contains("build") && lower.contains(" and add "));
    if sequenced {
        return ReasoningPattern::PreAct;
    }

    if EXPLANATORY.iter().any(|e| lower.starts_with(e) || lower.contains(e)) {
        return ReasoningPattern::Rewoo;
    }

    ReasoningPattern::React
}
