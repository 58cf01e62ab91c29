//! Observability metrics for the agent loop and governor.
//!
//! Prometheus-compatible metrics plus a JSON snapshot export for:
//! - Model request counts and latency by model/status
//! - Circuit breaker trips
//! - Token and cost totals
//! - Firewall blocks and tool invocations

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};

const MODEL_LABEL: &str = "model";
const STATUS_LABEL: &str = "status";
const DIRECTION_LABEL: &str = "direction";
const REASON_LABEL: &str = "reason";
const TOOL_LABEL: &str = "tool";

/// Metrics collector for agent operations.
pub struct MetricsCollector {
    registry: Registry,

    requests_total: CounterVec,
    requests_duration_ms: HistogramVec,
    circuit_trips_total: CounterVec,
    tokens_total: CounterVec,
    cost_usd_total: CounterVec,
    firewall_blocks_total: CounterVec,
    tool_invocations_total: CounterVec,

    json_data: Arc<RwLock<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("taskpilot_requests_total", "Total model requests"),
            &[MODEL_LABEL, STATUS_LABEL],
        )
        .expect("Failed to create requests counter");
        registry
            .register(Box::new(requests_total.clone()))
            .expect("Failed to register requests counter");

        let duration_opts = HistogramOpts::new(
            "taskpilot_requests_duration_ms",
            "Model request duration in milliseconds",
        )
        .buckets(vec![
            100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 60000.0,
        ]);
        let requests_duration_ms = HistogramVec::new(duration_opts, &[MODEL_LABEL])
            .expect("Failed to create duration histogram");
        registry
            .register(Box::new(requests_duration_ms.clone()))
            .expect("Failed to register duration histogram");

        let circuit_trips_total = CounterVec::new(
            Opts::new("taskpilot_circuit_trips_total", "Total circuit breaker trips"),
            &[MODEL_LABEL],
        )
        .expect("Failed to create circuit counter");
        registry
            .register(Box::new(circuit_trips_total.clone()))
            .expect("Failed to register circuit counter");

        let tokens_total = CounterVec::new(
            Opts::new("taskpilot_tokens_total", "Total tokens processed"),
            &[MODEL_LABEL, DIRECTION_LABEL],
        )
        .expect("Failed to create tokens counter");
        registry
            .register(Box::new(tokens_total.clone()))
            .expect("Failed to register tokens counter");

        let cost_usd_total = CounterVec::new(
            Opts::new("taskpilot_cost_usd_total", "Total cost in USD"),
            &[MODEL_LABEL],
        )
        .expect("Failed to create cost counter");
        registry
            .register(Box::new(cost_usd_total.clone()))
            .expect("Failed to register cost counter");

        let firewall_blocks_total = CounterVec::new(
            Opts::new("taskpilot_firewall_blocks_total", "Total firewall blocks"),
            &[REASON_LABEL],
        )
        .expect("Failed to create firewall counter");
        registry
            .register(Box::new(firewall_blocks_total.clone()))
            .expect("Failed to register firewall counter");

        let tool_invocations_total = CounterVec::new(
            Opts::new("taskpilot_tool_invocations_total", "Total tool invocations"),
            &[TOOL_LABEL, STATUS_LABEL],
        )
        .expect("Failed to create tool counter");
        registry
            .register(Box::new(tool_invocations_total.clone()))
            .expect("Failed to register tool counter");

        Self {
            registry,
            requests_total,
            requests_duration_ms,
            circuit_trips_total,
            tokens_total,
            cost_usd_total,
            firewall_blocks_total,
            tool_invocations_total,
            json_data: Arc::new(RwLock::new(MetricsSnapshot::default())),
        }
    }

    pub fn record_request_success(&self, model: &str, duration_ms: u64) {
        self.requests_total
            .with_label_values(&[model, "success"])
            .inc();
        self.requests_duration_ms
            .with_label_values(&[model])
            .observe(duration_ms as f64);

        let mut data = self.json_data.write().unwrap();
        data.total_requests += 1;
        data.successful_requests += 1;
        *data.requests_by_model.entry(model.to_string()).or_default() += 1;
    }

    pub fn record_request_failure(&self, model: &str, duration_ms: u64) {
        self.requests_total
            .with_label_values(&[model, "failure"])
            .inc();
        self.requests_duration_ms
            .with_label_values(&[model])
            .observe(duration_ms as f64);

        let mut data = self.json_data.write().unwrap();
        data.total_requests += 1;
        data.failed_requests += 1;
        *data.requests_by_model.entry(model.to_string()).or_default() += 1;
    }

    pub fn record_circuit_trip(&self, model: &str) {
        self.circuit_trips_total.with_label_values(&[model]).inc();

        let mut data = self.json_data.write().unwrap();
        data.circuit_trips += 1;
        *data
            .circuit_trips_by_model
            .entry(model.to_string())
            .or_default() += 1;
    }

    pub fn record_tokens(&self, model: &str, input_tokens: u64, output_tokens: u64) {
        self.tokens_total
            .with_label_values(&[model, "input"])
            .inc_by(input_tokens as f64);
        self.tokens_total
            .with_label_values(&[model, "output"])
            .inc_by(output_tokens as f64);

        let mut data = self.json_data.write().unwrap();
        data.total_input_tokens += input_tokens;
        data.total_output_tokens += output_tokens;
    }

    pub fn record_cost(&self, model: &str, cost_usd: f64) {
        self.cost_usd_total
            .with_label_values(&[model])
            .inc_by(cost_usd);

        let mut data = self.json_data.write().unwrap();
        data.total_cost_usd += cost_usd;
        *data.cost_by_model.entry(model.to_string()).or_default() += cost_usd;
    }

    pub fn record_firewall_block(&self, reason: &str) {
        self.firewall_blocks_total
            .with_label_values(&[reason])
            .inc();

        let mut data = self.json_data.write().unwrap();
        data.firewall_blocks += 1;
    }

    pub fn record_tool_invocation(&self, tool: &str, ok: bool) {
        let status = if ok { "success" } else { "failure" };
        self.tool_invocations_total
            .with_label_values(&[tool, status])
            .inc();

        let mut data = self.json_data.write().unwrap();
        data.tool_invocations += 1;
        *data.tools_by_name.entry(tool.to_string()).or_default() += 1;
    }

    /// Get Prometheus-formatted metrics.
    pub fn prometheus_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .expect("Failed to encode metrics");
        String::from_utf8(buffer).expect("Metrics should be valid UTF-8")
    }

    pub fn json_snapshot(&self) -> MetricsSnapshot {
        self.json_data.read().unwrap().clone()
    }

    /// Export metrics to a JSON file.
    pub fn export_to_json(&self, path: &PathBuf) -> anyhow::Result<()> {
        let snapshot = self.json_snapshot().with_timestamp();
        let json = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, json)?;
        Ok(())
    }

    /// Export to the default location (~/.taskpilot/metrics.json).
    pub fn export_to_default_location(&self) -> anyhow::Result<()> {
        match crate::config::app_dir() {
            Some(dir) => self.export_to_json(&dir.join("metrics.json")),
            None => Err(anyhow::anyhow!("Cannot determine home directory")),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics for JSON export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    #[serde(default)]
    pub timestamp: u64,

    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub requests_by_model: HashMap<String, u64>,

    pub total_input_tokens: u64,
    pub total_output_tokens: u64,

    pub total_cost_usd: f64,
    pub cost_by_model: HashMap<String, f64>,

    pub circuit_trips: u64,
    pub circuit_trips_by_model: HashMap<String, u64>,

    pub firewall_blocks: u64,

    pub tool_invocations: u64,
    pub tools_by_name: HashMap<String, u64>,
}

impl MetricsSnapshot {
    pub fn with_timestamp(mut self) -> Self {
        self.timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self
    }
}

static METRICS: OnceLock<MetricsCollector> = OnceLock::new();

/// Get the global metrics collector.
pub fn global() -> &'static MetricsCollector {
    METRICS.get_or_init(MetricsCollector::new)
}

pub fn record_success(model: &str, duration_ms: u64) {
    global().record_request_success(model, duration_ms);
}

pub fn record_failure(model: &str, duration_ms: u64) {
    global().record_request_failure(model, duration_ms);
}

pub fn record_tokens(model: &str, input: u64, output: u64) {
    global().record_tokens(model, input, output);
}

pub fn record_cost(model: &str, cost_usd: f64) {
    global().record_cost(model, cost_usd);
}

pub fn record_circuit_trip(model: &str) {
    global().record_circuit_trip(model);
}

pub fn record_firewall_block(reason: &str) {
    global().record_firewall_block(reason);
}

pub fn record_tool_invocation(tool: &str, ok: bool) {
    global().record_tool_invocation(tool, ok);
}

/// Get Prometheus metrics from the global collector.
pub fn prometheus() -> String {
    global().prometheus_metrics()
}

/// Get a JSON snapshot from the global collector.
pub fn snapshot() -> MetricsSnapshot {
    global().json_snapshot().with_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector() {
        let collector = MetricsCollector::new();

        collector.record_request_success("gpt-4o", 1500);
        collector.record_request_success("gpt-4o", 2000);
        collector.record_request_failure("gpt-4o-mini", 500);
        collector.record_tokens("gpt-4o", 1000, 500);
        collector.record_cost("gpt-4o", 0.05);
        collector.record_circuit_trip("gpt-4o-mini");
        collector.record_firewall_block("destructive command");
        collector.record_tool_invocation("read_file", true);

        let snapshot = collector.json_snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.successful_requests, 2);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.total_input_tokens, 1000);
        assert_eq!(snapshot.total_output_tokens, 500);
        assert_eq!(snapshot.circuit_trips, 1);
        assert_eq!(snapshot.firewall_blocks, 1);
        assert_eq!(snapshot.tool_invocations, 1);
        assert!((snapshot.total_cost_usd - 0.05).abs() < 0.001);

        let prom = collector.prometheus_metrics();
        assert!(prom.contains("taskpilot_requests_total"));
        assert!(prom.contains("taskpilot_firewall_blocks_total"));
    }

    #[test]
    fn test_snapshot_timestamp() {
        let snapshot = MetricsSnapshot::default().with_timestamp();
        assert!(snapshot.timestamp > 0);
    }
}
