//! Error taxonomy shared across components.
//!
//! Every operation returns an explicit `Result`; nothing panics across a
//! component boundary. Only the executor decides that an error is fatal to a
//! run — everything else reports and lets the executor choose.

use std::time::Duration;

/// Errors produced by governor, firewall, tools, and model calls.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentError {
    /// Malformed task or action text. Recovered locally by synthesizing a
    /// default continuation, never fatal on its own.
    Validation(String),
    /// A tool was rejected by the permission gate. Surfaced as an
    /// observation, not fatal to the run.
    ToolBlocked { reason: String },
    /// No model passed governor selection, even after tier fallback.
    ModelUnavailable { detail: String },
    /// Transient provider failure for a specific model. Counts as a circuit
    /// breaker failure; fatal only when no fallback model exists.
    Model { model: String, message: String },
    /// The spending cap is gone. Informational until even the cheapest tier
    /// has no eligible model.
    BudgetExhausted { remaining: f64 },
    /// The firewall rejected text about to leave the loop. Always carries
    /// the reason; fatal to the step that produced the output.
    FirewallBlocked { reason: String },
    /// The persistence store misbehaved. Consumers degrade to in-memory
    /// state instead of propagating this upward.
    Store(String),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::Validation(msg) => write!(f, "validation: {}", msg),
            AgentError::ToolBlocked { reason } => write!(f, "tool blocked: {}", reason),
            AgentError::ModelUnavailable { detail } => {
                write!(f, "no model available: {}", detail)
            }
            AgentError::Model { model, message } => {
                write!(f, "model {} failed: {}", model, message)
            }
            AgentError::BudgetExhausted { remaining } => {
                write!(f, "budget exhausted (remaining ${:.4})", remaining)
            }
            AgentError::FirewallBlocked { reason } => {
                write!(f, "firewall blocked output: {}", reason)
            }
            AgentError::Store(msg) => write!(f, "store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for AgentError {}

/// Fatal outcome of an agent run.
///
/// A failed run always reports how far it got: the trace length, the elapsed
/// wall time, and the specific reason. Never a bare "failed".
#[derive(Debug, Clone)]
pub struct RunFailure {
    pub reason: AgentError,
    pub trace_len: usize,
    pub elapsed: Duration,
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "run failed after {} step(s) in {:.1}s: {}",
            self.trace_len,
            self.elapsed.as_secs_f64(),
            self.reason
        )
    }
}

impl std::error::Error for RunFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_reason() {
        let err = AgentError::FirewallBlocked {
            reason: "destructive command".to_string(),
        };
        assert!(err.to_string().contains("destructive command"));
    }

    #[test]
    fn test_run_failure_reports_trace_and_elapsed() {
        let failure = RunFailure {
            reason: AgentError::ModelUnavailable {
                detail: "all circuits open".to_string(),
            },
            trace_len: 4,
            elapsed: Duration::from_secs(12),
        };
        let text = failure.to_string();
        assert!(text.contains("4 step(s)"));
        assert!(text.contains("12.0s"));
        assert!(text.contains("all circuits open"));
    }
}
