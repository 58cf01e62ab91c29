//! Durable state for the governor.
//!
//! The store seeds and records two things: the cumulative spend total and
//! per-model circuit rows. Everything is best-effort — when the store
//! errors, the governor and breaker fall back to in-memory state for the
//! rest of the process instead of failing calls.

use crate::config;
use crate::error::AgentError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

/// Persisted circuit row for one model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitRecord {
    pub failure_count: u32,
    pub open: bool,
    /// Millisecond Unix timestamp of the last open transition.
    #[serde(default)]
    pub opened_at_ms: Option<i64>,
}

/// One budget charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRow {
    pub ts_ms: i64,
    pub model: String,
    pub units_in: u64,
    pub units_out: u64,
    pub cost_usd: f64,
}

/// Persistence contract the governor needs.
pub trait AgentStore: Send + Sync {
    fn read_circuit(&self, model: &str) -> Result<Option<CircuitRecord>, AgentError>;
    fn write_circuit(&self, model: &str, record: &CircuitRecord) -> Result<(), AgentError>;
    fn read_total_spend(&self) -> Result<f64, AgentError>;
    fn append_cost(
        &self,
        model: &str,
        units_in: u64,
        units_out: u64,
        cost: f64,
    ) -> Result<(), AgentError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    total_spend_usd: f64,
    #[serde(default)]
    circuits: HashMap<String, CircuitRecord>,
    #[serde(default)]
    charges: Vec<ChargeRow>,
}

/// JSON-file store under the app dot-directory.
///
/// The whole document is rewritten on each mutation; charge volume in one
/// process lifetime is far below where that matters.
pub struct JsonFileStore {
    path: PathBuf,
    doc: RwLock<StoreDocument>,
}

impl JsonFileStore {
    /// Open the store at ~/.taskpilot/state.json, creating it if missing.
    pub fn open_default() -> Result<Self, AgentError> {
        let dir = config::app_dir()
            .ok_or_else(|| AgentError::Store("cannot determine home directory".to_string()))?;
        Self::open(dir.join("state.json"))
    }

    pub fn open(path: PathBuf) -> Result<Self, AgentError> {
        let doc = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| AgentError::Store(format!("corrupt state file: {}", e)))?,
            Err(_) => StoreDocument::default(),
        };
        Ok(Self {
            path,
            doc: RwLock::new(doc),
        })
    }

    fn flush(&self, doc: &StoreDocument) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| AgentError::Store(e.to_string()))?;
        }
        let content =
            serde_json::to_string_pretty(doc).map_err(|e| AgentError::Store(e.to_string()))?;
        fs::write(&self.path, content).map_err(|e| AgentError::Store(e.to_string()))
    }
}

impl AgentStore for JsonFileStore {
    fn read_circuit(&self, model: &str) -> Result<Option<CircuitRecord>, AgentError> {
        let doc = self
            .doc
            .read()
            .map_err(|_| AgentError::Store("poisoned lock".to_string()))?;
        Ok(doc.circuits.get(model).cloned())
    }

    fn write_circuit(&self, model: &str, record: &CircuitRecord) -> Result<(), AgentError> {
        let mut doc = self
            .doc
            .write()
            .map_err(|_| AgentError::Store("poisoned lock".to_string()))?;
        doc.circuits.insert(model.to_string(), record.clone());
        self.flush(&doc)
    }

    fn read_total_spend(&self) -> Result<f64, AgentError> {
        let doc = self
            .doc
            .read()
            .map_err(|_| AgentError::Store("poisoned lock".to_string()))?;
        Ok(doc.total_spend_usd)
    }

    fn append_cost(
        &self,
        model: &str,
        units_in: u64,
        units_out: u64,
        cost: f64,
    ) -> Result<(), AgentError> {
        let mut doc = self
            .doc
            .write()
            .map_err(|_| AgentError::Store("poisoned lock".to_string()))?;
        doc.total_spend_usd += cost;
        doc.charges.push(ChargeRow {
            ts_ms: Utc::now().timestamp_millis(),
            model: model.to_string(),
            units_in,
            units_out,
            cost_usd: cost,
        });
        self.flush(&doc)
    }
}

/// In-memory store: the degraded mode when no file store is available, and
/// the default in tests.
#[derive(Default)]
pub struct MemoryStore {
    doc: RwLock<StoreDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AgentStore for MemoryStore {
    fn read_circuit(&self, model: &str) -> Result<Option<CircuitRecord>, AgentError> {
        Ok(self.doc.read().unwrap().circuits.get(model).cloned())
    }

    fn write_circuit(&self, model: &str, record: &CircuitRecord) -> Result<(), AgentError> {
        self.doc
            .write()
            .unwrap()
            .circuits
            .insert(model.to_string(), record.clone());
        Ok(())
    }

    fn read_total_spend(&self) -> Result<f64, AgentError> {
        Ok(self.doc.read().unwrap().total_spend_usd)
    }

    fn append_cost(
        &self,
        model: &str,
        units_in: u64,
        units_out: u64,
        cost: f64,
    ) -> Result<(), AgentError> {
        let mut doc = self.doc.write().unwrap();
        doc.total_spend_usd += cost;
        doc.charges.push(ChargeRow {
            ts_ms: Utc::now().timestamp_millis(),
            model: model.to_string(),
            units_in,
            units_out,
            cost_usd: cost,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.read_circuit("gpt-4o").unwrap().is_none());

        let record = CircuitRecord {
            failure_count: 2,
            open: false,
            opened_at_ms: None,
        };
        store.write_circuit("gpt-4o", &record).unwrap();
        assert_eq!(store.read_circuit("gpt-4o").unwrap().unwrap().failure_count, 2);

        store.append_cost("gpt-4o", 1000, 500, 0.05).unwrap();
        store.append_cost("gpt-4o", 1000, 500, 0.07).unwrap();
        assert!((store.read_total_spend().unwrap() - 0.12).abs() < 1e-9);
    }

    #[test]
    fn test_json_file_store_persists_across_opens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let store = JsonFileStore::open(path.clone()).unwrap();
            store.append_cost("gpt-4o-mini", 10, 5, 0.001).unwrap();
            store
                .write_circuit(
                    "gpt-4o-mini",
                    &CircuitRecord {
                        failure_count: 3,
                        open: true,
                        opened_at_ms: Some(Utc::now().timestamp_millis()),
                    },
                )
                .unwrap();
        }

        let reopened = JsonFileStore::open(path).unwrap();
        assert!((reopened.read_total_spend().unwrap() - 0.001).abs() < 1e-12);
        let circuit = reopened.read_circuit("gpt-4o-mini").unwrap().unwrap();
        assert!(circuit.open);
        assert_eq!(circuit.failure_count, 3);
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("nope.json")).unwrap();
        assert_eq!(store.read_total_spend().unwrap(), 0.0);
    }
}
