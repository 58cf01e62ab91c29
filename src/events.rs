//! Typed event stream for observability.
//!
//! Events are structured, sequence-numbered, and fan out to registered
//! subscribers. Run, model, tool, circuit, budget, and firewall activity
//! all flow through here so operators can watch one stream.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

static EVENT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn next_sequence() -> u64 {
    EVENT_SEQUENCE.fetch_add(1, Ordering::SeqCst)
}

fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Subsystem identifiers for event categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    Model,
    Tool,
    Run,
    Circuit,
    Budget,
    Firewall,
}

impl std::fmt::Display for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Subsystem::Model => "model",
            Subsystem::Tool => "tool",
            Subsystem::Run => "run",
            Subsystem::Circuit => "circuit",
            Subsystem::Budget => "budget",
            Subsystem::Firewall => "firewall",
        };
        write!(f, "{}", s)
    }
}

/// Event payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    ModelUsage {
        model: String,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
        duration_ms: u64,
    },
    ModelError {
        model: String,
        message: String,
    },
    ToolInvoked {
        tool: String,
        ok: bool,
        duration_ms: u64,
    },
    ToolBlocked {
        tool: String,
        reason: String,
    },
    RunStarted {
        run_id: String,
        pattern: String,
    },
    RunFinished {
        run_id: String,
        steps: usize,
        truncated: bool,
        cost_usd: f64,
    },
    RunFailed {
        run_id: String,
        reason: String,
        steps: usize,
        elapsed_ms: u64,
    },
    CircuitOpened {
        model: String,
        failure_count: u32,
    },
    CircuitClosed {
        model: String,
    },
    BudgetCharged {
        model: String,
        cost_usd: f64,
        remaining_usd: f64,
    },
    FirewallBlocked {
        reason: String,
    },
}

/// A single event on the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub timestamp_ms: u64,
    pub subsystem: Subsystem,
    #[serde(flatten)]
    pub event_type: EventType,
}

impl Event {
    fn new(subsystem: Subsystem, event_type: EventType) -> Self {
        Self {
            seq: next_sequence(),
            timestamp_ms: timestamp_ms(),
            subsystem,
            event_type,
        }
    }

    pub fn model_usage(
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
        duration_ms: u64,
    ) -> Self {
        Self::new(
            Subsystem::Model,
            EventType::ModelUsage {
                model: model.to_string(),
                input_tokens,
                output_tokens,
                cost_usd,
                duration_ms,
            },
        )
    }

    pub fn model_error(model: &str, message: &str) -> Self {
        Self::new(
            Subsystem::Model,
            EventType::ModelError {
                model: model.to_string(),
                message: message.to_string(),
            },
        )
    }

    pub fn tool_invoked(tool: &str, ok: bool, duration_ms: u64) -> Self {
        Self::new(
            Subsystem::Tool,
            EventType::ToolInvoked {
                tool: tool.to_string(),
                ok,
                duration_ms,
            },
        )
    }

    pub fn tool_blocked(tool: &str, reason: &str) -> Self {
        Self::new(
            Subsystem::Tool,
            EventType::ToolBlocked {
                tool: tool.to_string(),
                reason: reason.to_string(),
            },
        )
    }

    pub fn run_started(run_id: &str, pattern: &str) -> Self {
        Self::new(
            Subsystem::Run,
            EventType::RunStarted {
                run_id: run_id.to_string(),
                pattern: pattern.to_string(),
            },
        )
    }

    pub fn run_finished(run_id: &str, steps: usize, truncated: bool, cost_usd: f64) -> Self {
        Self::new(
            Subsystem::Run,
            EventType::RunFinished {
                run_id: run_id.to_string(),
                steps,
                truncated,
                cost_usd,
            },
        )
    }

    pub fn run_failed(run_id: &str, reason: &str, steps: usize, elapsed_ms: u64) -> Self {
        Self::new(
            Subsystem::Run,
            EventType::RunFailed {
                run_id: run_id.to_string(),
                reason: reason.to_string(),
                steps,
                elapsed_ms,
            },
        )
    }

    pub fn circuit_opened(model: &str, failure_count: u32) -> Self {
        Self::new(
            Subsystem::Circuit,
            EventType::CircuitOpened {
                model: model.to_string(),
                failure_count,
            },
        )
    }

    pub fn circuit_closed(model: &str) -> Self {
        Self::new(
            Subsystem::Circuit,
            EventType::CircuitClosed {
                model: model.to_string(),
            },
        )
    }

    pub fn budget_charged(model: &str, cost_usd: f64, remaining_usd: f64) -> Self {
        Self::new(
            Subsystem::Budget,
            EventType::BudgetCharged {
                model: model.to_string(),
                cost_usd,
                remaining_usd,
            },
        )
    }

    pub fn firewall_blocked(reason: &str) -> Self {
        Self::new(
            Subsystem::Firewall,
            EventType::FirewallBlocked {
                reason: reason.to_string(),
            },
        )
    }
}

type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

/// Fan-out bus. Subscribers are called synchronously in registration order.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribers.write().unwrap().push(Box::new(handler));
    }

    pub fn emit(&self, event: Event) {
        for handler in self.subscribers.read().unwrap().iter() {
            handler(&event);
        }
    }
}

static BUS: OnceLock<EventBus> = OnceLock::new();

/// The process-wide event bus.
pub fn global() -> &'static EventBus {
    BUS.get_or_init(EventBus::new)
}

/// Emit an event on the global bus.
pub fn emit(event: Event) {
    global().emit(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Event::circuit_closed("m");
        let b = Event::circuit_closed("m");
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_bus_fans_out() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Event::firewall_blocked("test"));
        bus.emit(Event::tool_invoked("read_file", true, 3));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = Event::budget_charged("gpt-4o", 0.01, 9.99);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"budget_charged\""));
        assert!(json.contains("\"subsystem\":\"budget\""));
    }
}
