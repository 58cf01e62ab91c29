//! Parsing of model responses into thought and action sections.
//!
//! The structured format is forgiving: a response that matches nothing
//! becomes a default continuation instead of failing the run.

use serde_json::{json, Value};

/// Prefix a model uses to signal its final answer.
pub const ANSWER_SENTINEL: &str = "ANSWER:";

/// What the model asked the loop to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Terminate successfully with this answer.
    Final { answer: String },
    /// Dispatch a named tool with JSON arguments.
    Tool { name: String, args: Value },
    /// Nothing actionable was parsed; keep reasoning.
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStep {
    pub thought: String,
    pub action: Action,
}

/// Split a response into a thought and an action.
pub fn parse_response(text: &str) -> ParsedStep {
    let lines: Vec<&str> = text.lines().collect();

    // Final answer wins over everything else.
    for (i, line) in lines.iter().enumerate() {
        if let Some(rest) = line.trim_start().strip_prefix(ANSWER_SENTINEL) {
            let mut answer = rest.trim().to_string();
            for follow in &lines[i + 1..] {
                if !answer.is_empty() {
                    answer.push('\n');
                }
                answer.push_str(follow);
            }
            return ParsedStep {
                thought: thought_before(&lines[..i]),
                action: Action::Final {
                    answer: answer.trim().to_string(),
                },
            };
        }
    }

    for (i, line) in lines.iter().enumerate() {
        if let Some(rest) = line.trim_start().strip_prefix("Action:") {
            let rest = rest.trim();
            let (name, arg_text) = match rest.split_once(char::is_whitespace) {
                Some((name, tail)) => (name, tail.trim().to_string()),
                None => (rest, String::new()),
            };
            if name.is_empty() {
                break;
            }
            // Arguments may spill onto following lines.
            let mut full_args = arg_text;
            for follow in &lines[i + 1..] {
                full_args.push('\n');
                full_args.push_str(follow);
            }
            return ParsedStep {
                thought: thought_before(&lines[..i]),
                action: Action::Tool {
                    name: name.to_string(),
                    args: parse_args(&full_args),
                },
            };
        }
    }

    ParsedStep {
        thought: text.trim().to_string(),
        action: Action::Continue,
    }
}

fn thought_before(lines: &[&str]) -> String {
    lines
        .iter()
        .map(|l| l.trim_start().strip_prefix("Thought:").unwrap_or(l).trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn parse_args(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return json!({});
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return value;
        }
    }
    // Fall back to the first line alone; trailing prose is common.
    if let Some(first) = trimmed.lines().next() {
        if let Ok(value) = serde_json::from_str::<Value>(first.trim()) {
            if value.is_object() {
                return value;
            }
        }
    }
    json!({})
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_thought_and_tool() {
        let parsed = parse_response(
            "Thought: I should look at the file.\nAction: read_file {\"path\": \"notes.txt\"}",
        );
        assert_eq!(parsed.thought, "I should look at the file.");
        assert_eq!(
            parsed.action,
            Action::Tool {
                name: "read_file".to_string(),
                args: json!({"path": "notes.txt"}),
            }
        );
    }

    #[test]
    fn test_parse_final_answer() {
        let parsed = parse_response("Thought: done.\nANSWER: 42 is the result");
        assert_eq!(parsed.thought, "done.");
        assert_eq!(
            parsed.action,
            Action::Final {
                answer: "42 is the result".to_string()
            }
        );
    }

    #[test]
    fn test_final_answer_keeps_following_lines() {
        let parsed = parse_response("ANSWER: first line\nsecond line");
        match parsed.action {
            Action::Final { answer } => {
                assert!(answer.contains("first line"));
                assert!(answer.contains("second line"));
            }
            other => panic!("expected Final, got {:?}", other),
        }
    }

    #[test]
    fn test_answer_wins_over_action() {
        let parsed = parse_response("ANSWER: done\nAction: read_file {\"path\": \"x\"}");
        assert!(matches!(parsed.action, Action::Final { .. }));
    }

    #[test]
    fn test_unstructured_text_becomes_continuation() {
        let parsed = parse_response("I am not sure yet, let me think more.");
        assert_eq!(parsed.action, Action::Continue);
        assert!(parsed.thought.contains("not sure"));
    }

    #[test]
    fn test_action_without_args() {
        let parsed = parse_response("Action: list_dir");
        assert_eq!(
            parsed.action,
            Action::Tool {
                name: "list_dir".to_string(),
                args: json!({}),
            }
        );
    }

    #[test]
    fn test_malformed_args_default_to_empty_object() {
        let parsed = parse_response("Action: read_file {path: oops");
        assert_eq!(
            parsed.action,
            Action::Tool {
                name: "read_file".to_string(),
                args: json!({}),
            }
        );
    }

    #[test]
    fn test_multiline_args() {
        let parsed = parse_response("Action: write_file {\n  \"path\": \"a.txt\",\n  \"content\": \"hi\"\n}");
        assert_eq!(
            parsed.action,
            Action::Tool {
                name: "write_file".to_string(),
                args: json!({"path": "a.txt", "content": "hi"}),
            }
        );
    }
}
