//! Tools backed by governed model calls.

use super::{require_str, Tool, ToolContext};
use crate::governor::Tier;
use crate::llm::{governed_complete, ChatMessage};
use serde_json::Value;

pub struct AskModel;

impl Tool for AskModel {
    fn name(&self) -> &'static str {
        "ask_model"
    }

    fn usage(&self) -> &'static str {
        "delegate a sub-question; args: {\"question\": \"...\"}"
    }

    fn invoke(&self, args: &Value, ctx: &ToolContext) -> Result<String, String> {
        let question = require_str(args, "question")?;
        let messages = [
            ChatMessage::system(
                "Answer the question directly and concisely. No preamble, no tool calls.",
            ),
            ChatMessage::user(question),
        ];
        governed_complete(ctx.governor, ctx.client, ctx.governor.tier(), &messages)
            .map(|c| c.content)
            .map_err(|e| e.to_string())
    }
}

const PERSONAS: &[(&str, &str)] = &[
    (
        "correctness",
        "You review for factual and logical correctness. List concrete problems, or say 'no issues'.",
    ),
    (
        "security",
        "You review for security hazards and unsafe instructions. List concrete problems, or say 'no issues'.",
    ),
    (
        "clarity",
        "You review for clarity and completeness. List concrete problems, or say 'no issues'.",
    ),
];

pub struct ReviewPanel;

impl Tool for ReviewPanel {
    fn name(&self) -> &'static str {
        "review_panel"
    }

    fn usage(&self) -> &'static str {
        "multi-persona review of a draft; args: {\"subject\": \"...\"}"
    }

    fn invoke(&self, args: &Value, ctx: &ToolContext) -> Result<String, String> {
        let subject = require_str(args, "subject")?;

        let mut sections = Vec::with_capacity(PERSONAS.len());
        for (persona, prompt) in PERSONAS {
            let messages = [ChatMessage::system(*prompt), ChatMessage::user(subject)];
            let section = match governed_complete(ctx.governor, ctx.client, Tier::Fast, &messages) {
                Ok(completion) => completion.content,
                Err(err) => format!("reviewer unavailable: {}", err),
            };
            sections.push(format!("## {} review\n{}", persona, section));
        }
        Ok(sections.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShellConfig;
    use crate::llm::test_support::StubClient;
    use crate::tools::test_support;
    use serde_json::json;

    #[test]
    fn test_ask_model_delegates() {
        let governor = test_support::governor();
        let client = StubClient::scripted(&["42"]);
        let shell = ShellConfig::default();
        let ctx = ToolContext {
            governor: &governor,
            client: &client,
            shell: &shell,
        };
        let answer = AskModel
            .invoke(&json!({"question": "meaning of life?"}), &ctx)
            .unwrap();
        assert_eq!(answer, "42");
    }

    #[test]
    fn test_review_panel_collects_all_personas() {
        let governor = test_support::governor();
        let client = StubClient::scripted(&["no issues", "no issues", "needs a summary"]);
        let shell = ShellConfig::default();
        let ctx = ToolContext {
            governor: &governor,
            client: &client,
            shell: &shell,
        };
        let report = ReviewPanel
            .invoke(&json!({"subject": "draft text"}), &ctx)
            .unwrap();
        assert!(report.contains("## correctness review"));
        assert!(report.contains("## security review"));
        assert!(report.contains("## clarity review"));
        assert!(report.contains("needs a summary"));
    }

    #[test]
    fn test_ask_model_surfaces_unavailability() {
        let governor = test_support::governor();
        let client = StubClient::failing();
        let shell = ShellConfig::default();
        let ctx = ToolContext {
            governor: &governor,
            client: &client,
            shell: &shell,
        };
        let err = AskModel
            .invoke(&json!({"question": "anyone home?"}), &ctx)
            .unwrap_err();
        assert!(err.contains("no model available"));
    }
}
