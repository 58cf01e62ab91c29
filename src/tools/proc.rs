//! Process tools: shell commands and sandboxed code execution.
//!
//! Commands are split with `shell_words` and executed directly, never
//! through an interpreting shell, so substitution tricks in arguments stay
//! inert. Both tools enforce the configured timeout via `wait_timeout`.

use super::{clip, require_str, str_arg, Tool, ToolContext};
use serde_json::Value;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

fn run_with_timeout(mut child: Child, timeout_ms: u64, max_output: usize) -> Result<String, String> {
    let status = child
        .wait_timeout(Duration::from_millis(timeout_ms))
        .map_err(|e| format!("wait failed: {}", e))?;

    let status = match status {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(format!("timed out after {}ms", timeout_ms));
        }
    };

    let mut stdout = String::new();
    let mut stderr = String::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_string(&mut stdout);
    }
    if let Some(mut err) = child.stderr.take() {
        let _ = err.read_to_string(&mut stderr);
    }

    let mut observation = format!("exit status: {}", status.code().unwrap_or(-1));
    if !stdout.trim().is_empty() {
        observation.push_str(&format!("\nstdout:\n{}", stdout.trim_end()));
    }
    if !stderr.trim().is_empty() {
        observation.push_str(&format!("\nstderr:\n{}", stderr.trim_end()));
    }
    Ok(clip(observation, max_output))
}

pub struct RunShell;

impl Tool for RunShell {
    fn name(&self) -> &'static str {
        "run_shell"
    }

    fn usage(&self) -> &'static str {
        "run a command; args: {\"command\": \"ls -la\"}"
    }

    fn side_effects(&self) -> bool {
        true
    }

    fn invoke(&self, args: &Value, ctx: &ToolContext) -> Result<String, String> {
        let command = require_str(args, "command")?;
        let parts = shell_words::split(command).map_err(|e| format!("unparseable command: {}", e))?;
        let (program, rest) = parts
            .split_first()
            .ok_or_else(|| "empty command".to_string())?;

        let child = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("cannot start {}: {}", program, e))?;

        run_with_timeout(child, ctx.shell.timeout_ms, ctx.shell.max_output_bytes)
    }
}

pub struct RunCode;

impl Tool for RunCode {
    fn name(&self) -> &'static str {
        "run_code"
    }

    fn usage(&self) -> &'static str {
        "run a code snippet; args: {\"language\": \"python\", \"code\": \"...\"}"
    }

    fn side_effects(&self) -> bool {
        true
    }

    fn invoke(&self, args: &Value, ctx: &ToolContext) -> Result<String, String> {
        let code = require_str(args, "code")?;
        let language = str_arg(args, "language").unwrap_or("python");

        let (interpreter, extension) = match language {
            "python" | "python3" => ("python3", "py"),
            "sh" | "shell" | "bash" => ("sh", "sh"),
            other => return Err(format!("unsupported language: {}", other)),
        };

        let scratch = std::env::temp_dir().join(format!(
            "taskpilot-{}.{}",
            uuid::Uuid::new_v4(),
            extension
        ));
        std::fs::write(&scratch, code).map_err(|e| format!("cannot stage snippet: {}", e))?;

        let spawned = Command::new(interpreter)
            .arg(&scratch)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("cannot start {}: {}", interpreter, e));

        let result = match spawned {
            Ok(child) => run_with_timeout(child, ctx.shell.timeout_ms, ctx.shell.max_output_bytes),
            Err(e) => Err(e),
        };

        let _ = std::fs::remove_file(&scratch);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShellConfig;
    use crate::llm::test_support::StubClient;
    use crate::tools::test_support;
    use serde_json::json;

    fn with_ctx<F: FnOnce(&ToolContext)>(timeout_ms: u64, f: F) {
        let governor = test_support::governor();
        let client = StubClient::scripted(&[]);
        let shell = ShellConfig {
            timeout_ms,
            ..ShellConfig::default()
        };
        let ctx = ToolContext {
            governor: &governor,
            client: &client,
            shell: &shell,
        };
        f(&ctx);
    }

    #[test]
    fn test_run_shell_captures_stdout() {
        with_ctx(5_000, |ctx| {
            let out = RunShell
                .invoke(&json!({"command": "echo hello"}), ctx)
                .unwrap();
            assert!(out.contains("exit status: 0"));
            assert!(out.contains("hello"));
        });
    }

    #[test]
    fn test_run_shell_times_out() {
        with_ctx(100, |ctx| {
            let err = RunShell
                .invoke(&json!({"command": "sleep 5"}), ctx)
                .unwrap_err();
            assert!(err.contains("timed out"));
        });
    }

    #[test]
    fn test_run_shell_rejects_empty_command() {
        with_ctx(1_000, |ctx| {
            let err = RunShell.invoke(&json!({"command": ""}), ctx).unwrap_err();
            assert!(err.contains("empty command"));
        });
    }

    #[test]
    fn test_run_shell_missing_binary() {
        with_ctx(1_000, |ctx| {
            let err = RunShell
                .invoke(&json!({"command": "definitely-not-a-binary-xyz"}), ctx)
                .unwrap_err();
            assert!(err.contains("cannot start"));
        });
    }

    #[test]
    fn test_run_code_rejects_unknown_language() {
        with_ctx(1_000, |ctx| {
            let err = RunCode
                .invoke(&json!({"language": "cobol", "code": "DISPLAY 'HI'."}), ctx)
                .unwrap_err();
            assert!(err.contains("unsupported language"));
        });
    }

    #[test]
    fn test_run_code_shell_snippet() {
        with_ctx(5_000, |ctx| {
            let out = RunCode
                .invoke(&json!({"language": "sh", "code": "echo from-snippet"}), ctx)
                .unwrap();
            assert!(out.contains("from-snippet"));
        });
    }
}
