//! Per-model circuit breaker and rate limiter.
//!
//! Both share the model-id identity space. Circuit rows are seeded lazily
//! from the store on first reference and written back on every transition;
//! when the store errors the breaker fails open (circuits treated as
//! closed) — the governor must never be worse than having no breaker.

use crate::store::{AgentStore, CircuitRecord};
use crate::{events, metrics};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Breaker and rate-limiter tuning.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before a circuit opens.
    pub threshold: u32,
    /// Seconds a circuit stays open before the next call may probe it.
    pub cooldown_secs: i64,
    /// Admitted calls per model per trailing 60 seconds.
    pub calls_per_minute: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            cooldown_secs: 300,
            calls_per_minute: 30,
        }
    }
}

/// Mutable circuit record for one model.
#[derive(Debug, Clone, Default)]
pub struct CircuitState {
    pub failure_count: u32,
    pub open: bool,
    pub opened_at: Option<DateTime<Utc>>,
}

impl CircuitState {
    fn to_record(&self) -> CircuitRecord {
        CircuitRecord {
            failure_count: self.failure_count,
            open: self.open,
            opened_at_ms: self.opened_at.map(|t| t.timestamp_millis()),
        }
    }

    fn from_record(record: &CircuitRecord) -> Self {
        Self {
            failure_count: record.failure_count,
            open: record.open,
            opened_at: record
                .opened_at_ms
                .and_then(DateTime::from_timestamp_millis),
        }
    }
}

const RATE_WINDOW_SECS: i64 = 60;

pub struct CircuitBreaker {
    cfg: BreakerConfig,
    circuits: DashMap<String, CircuitState>,
    windows: DashMap<String, VecDeque<DateTime<Utc>>>,
    store: Arc<dyn AgentStore>,
}

impl CircuitBreaker {
    pub fn new(cfg: BreakerConfig, store: Arc<dyn AgentStore>) -> Self {
        Self {
            cfg,
            circuits: DashMap::new(),
            windows: DashMap::new(),
            store,
        }
    }

    /// Ensure a circuit row exists, seeding it from the store on first
    /// reference. Store errors yield a closed default.
    fn seed(&self, model: &str) {
        if self.circuits.contains_key(model) {
            return;
        }
        let state = match self.store.read_circuit(model) {
            Ok(Some(record)) => CircuitState::from_record(&record),
            _ => CircuitState::default(),
        };
        self.circuits.entry(model.to_string()).or_insert(state);
    }

    fn persist(&self, model: &str, state: &CircuitState) {
        let _ = self.store.write_circuit(model, &state.to_record());
    }

    /// True if the circuit is closed, or open with the cool-down elapsed
    /// (the next call is allowed to probe).
    pub fn circuit_closed(&self, model: &str) -> bool {
        self.seed(model);
        let state = match self.circuits.get(model) {
            Some(s) => s,
            None => return true,
        };
        if !state.open {
            return true;
        }
        match state.opened_at {
            Some(opened_at) => {
                Utc::now().signed_duration_since(opened_at).num_seconds() >= self.cfg.cooldown_secs
            }
            None => true,
        }
    }

    /// Record a successful call: failures reset to 0 and the circuit closes.
    pub fn record_success(&self, model: &str) {
        self.seed(model);
        if let Some(mut state) = self.circuits.get_mut(model) {
            let was_open = state.open;
            if state.failure_count == 0 && !was_open {
                return;
            }
            state.failure_count = 0;
            state.open = false;
            state.opened_at = None;
            let snapshot = state.clone();
            drop(state);
            self.persist(model, &snapshot);
            if was_open {
                events::emit(events::Event::circuit_closed(model));
            }
        }
    }

    /// Record a failed call. Crossing the threshold opens the circuit; a
    /// failed half-open probe resets the open timer.
    pub fn record_failure(&self, model: &str) {
        self.seed(model);
        if let Some(mut state) = self.circuits.get_mut(model) {
            state.failure_count += 1;
            if state.open {
                state.opened_at = Some(Utc::now());
            } else if state.failure_count >= self.cfg.threshold {
                state.open = true;
                state.opened_at = Some(Utc::now());
                metrics::record_circuit_trip(model);
                events::emit(events::Event::circuit_opened(model, state.failure_count));
            }
            let snapshot = state.clone();
            drop(state);
            self.persist(model, &snapshot);
        }
    }

    /// Execute `call` for `model`, recording the outcome. The result is
    /// propagated unchanged — the breaker never swallows outcomes.
    pub fn guard<T, E>(
        &self,
        model: &str,
        call: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        match call() {
            Ok(value) => {
                self.record_success(model);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(model);
                Err(err)
            }
        }
    }

    /// True if the model's rate window (pruned to the trailing 60 s) has
    /// room. Check only; the caller records the timestamp on admission.
    pub fn admit(&self, model: &str) -> bool {
        let mut window = self.windows.entry(model.to_string()).or_default();
        Self::prune(&mut window);
        window.len() < self.cfg.calls_per_minute
    }

    /// Record an admitted call's timestamp.
    pub fn record_call(&self, model: &str) {
        let mut window = self.windows.entry(model.to_string()).or_default();
        Self::prune(&mut window);
        window.push_back(Utc::now());
    }

    fn prune(window: &mut VecDeque<DateTime<Utc>>) {
        let cutoff = Utc::now() - chrono::Duration::seconds(RATE_WINDOW_SECS);
        while window.front().is_some_and(|t| *t < cutoff) {
            window.pop_front();
        }
    }

    /// Calls currently inside the model's rate window.
    pub fn window_len(&self, model: &str) -> usize {
        match self.windows.get_mut(model) {
            Some(mut window) => {
                Self::prune(&mut window);
                window.len()
            }
            None => 0,
        }
    }

    /// Current circuit rows, for operator-facing status output.
    pub fn snapshot(&self) -> Vec<(String, CircuitState)> {
        let mut rows: Vec<(String, CircuitState)> = self
            .circuits
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn breaker(cfg: BreakerConfig) -> CircuitBreaker {
        CircuitBreaker::new(cfg, Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_three_failures_open_the_circuit() {
        let b = breaker(BreakerConfig::default());
        assert!(b.circuit_closed("gpt-4o"));

        b.record_failure("gpt-4o");
        b.record_failure("gpt-4o");
        assert!(b.circuit_closed("gpt-4o"));

        b.record_failure("gpt-4o");
        assert!(!b.circuit_closed("gpt-4o"));
    }

    #[test]
    fn test_success_resets_and_closes() {
        let b = breaker(BreakerConfig::default());
        for _ in 0..3 {
            b.record_failure("gpt-4o");
        }
        assert!(!b.circuit_closed("gpt-4o"));

        b.record_success("gpt-4o");
        assert!(b.circuit_closed("gpt-4o"));
        let rows = b.snapshot();
        assert_eq!(rows[0].1.failure_count, 0);
    }

    #[test]
    fn test_cooldown_allows_half_open_probe() {
        let b = breaker(BreakerConfig {
            cooldown_secs: 0,
            ..BreakerConfig::default()
        });
        for _ in 0..3 {
            b.record_failure("gpt-4o");
        }
        // Cool-down of zero: the open circuit immediately admits a probe.
        assert!(b.circuit_closed("gpt-4o"));
        // A failed probe keeps the circuit open.
        b.record_failure("gpt-4o");
        assert!(b.snapshot()[0].1.open);
        // A successful probe closes it.
        b.record_success("gpt-4o");
        assert!(!b.snapshot()[0].1.open);
    }

    #[test]
    fn test_guard_propagates_outcomes_unchanged() {
        let b = breaker(BreakerConfig::default());
        let ok: Result<i32, String> = b.guard("m", || Ok(7));
        assert_eq!(ok.unwrap(), 7);

        let err: Result<i32, String> = b.guard("m", || Err("boom".to_string()));
        assert_eq!(err.unwrap_err(), "boom");
        assert_eq!(b.snapshot()[0].1.failure_count, 1);
    }

    #[test]
    fn test_rate_window_caps_admissions() {
        let b = breaker(BreakerConfig {
            calls_per_minute: 2,
            ..BreakerConfig::default()
        });
        assert!(b.admit("m"));
        b.record_call("m");
        assert!(b.admit("m"));
        b.record_call("m");
        assert!(!b.admit("m"));
        assert_eq!(b.window_len("m"), 2);
    }

    #[test]
    fn test_rate_windows_are_per_model() {
        let b = breaker(BreakerConfig {
            calls_per_minute: 1,
            ..BreakerConfig::default()
        });
        b.record_call("a");
        assert!(!b.admit("a"));
        assert!(b.admit("b"));
    }

    #[test]
    fn test_circuit_state_survives_restart_via_store() {
        let store = Arc::new(MemoryStore::new());
        {
            let b = CircuitBreaker::new(BreakerConfig::default(), store.clone());
            for _ in 0..3 {
                b.record_failure("gpt-4o");
            }
        }
        let fresh = CircuitBreaker::new(BreakerConfig::default(), store);
        assert!(!fresh.circuit_closed("gpt-4o"));
    }
}
