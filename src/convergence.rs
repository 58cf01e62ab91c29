//! Convergence detection for iterative refinement loops.
//!
//! Consumes a history of per-iteration metrics plus a new candidate record
//! and reports whether the loop has converged, plateaued, or is
//! oscillating. The detector never mutates its inputs and never stops a
//! loop itself — callers must honor `should_stop`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named numeric metrics for one refinement round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub metrics: BTreeMap<String, f64>,
}

impl IterationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// Why the detector says to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Converged,
}

/// Verdict for one tracked round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceVerdict {
    pub iteration: usize,
    pub should_stop: bool,
    pub reason: Option<StopReason>,
    pub plateau: bool,
    pub oscillating: bool,
}

/// Detector with a configurable plateau window (minimum 3).
#[derive(Debug, Clone)]
pub struct ConvergenceDetector {
    pub plateau_window: usize,
}

impl Default for ConvergenceDetector {
    fn default() -> Self {
        Self { plateau_window: 3 }
    }
}

impl ConvergenceDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The metric the detector watches: `violations` when present, then
    /// `score`, then the first key in sorted order.
    fn tracked_metric(records: &[&IterationRecord]) -> Option<String> {
        for preferred in ["violations", "score"] {
            if records.iter().any(|r| r.metrics.contains_key(preferred)) {
                return Some(preferred.to_string());
            }
        }
        records
            .iter()
            .flat_map(|r| r.metrics.keys())
            .next()
            .cloned()
    }

    /// Evaluate `current` against `history`.
    pub fn track(&self, history: &[IterationRecord], current: &IterationRecord) -> ConvergenceVerdict {
        let iteration = history.len() + 1;

        let converged = current.get("violations") == Some(0.0);

        let all: Vec<&IterationRecord> = history.iter().chain(std::iter::once(current)).collect();
        let metric = Self::tracked_metric(&all);

        let values: Vec<f64> = match &metric {
            Some(name) => all.iter().filter_map(|r| r.get(name)).collect(),
            None => Vec::new(),
        };

        let window = self.plateau_window.max(3);
        let plateau = values.len() >= window
            && values[values.len() - window..]
                .windows(2)
                .all(|pair| pair[0] == pair[1]);

        let oscillating = is_oscillating(&values);

        ConvergenceVerdict {
            iteration,
            should_stop: converged,
            reason: converged.then_some(StopReason::Converged),
            plateau,
            oscillating,
        }
    }

    /// Human-readable progress line: iteration count plus signed percentage
    /// improvement between the first and last recorded value. A regression
    /// reports negative improvement, never clamped to zero.
    pub fn summary(&self, history: &[IterationRecord]) -> String {
        if history.is_empty() {
            return "no iterations recorded".to_string();
        }
        let refs: Vec<&IterationRecord> = history.iter().collect();
        let metric = match Self::tracked_metric(&refs) {
            Some(m) => m,
            None => return format!("{} iteration(s), no tracked metric", history.len()),
        };
        let values: Vec<f64> = history.iter().filter_map(|r| r.get(&metric)).collect();
        let (first, last) = match (values.first(), values.last()) {
            (Some(f), Some(l)) => (*f, *l),
            _ => return format!("{} iteration(s), no tracked metric", history.len()),
        };
        let improvement = if first == 0.0 {
            0.0
        } else {
            (first - last) / first * 100.0
        };
        format!(
            "{} iteration(s): {} {} -> {} ({:+.1}% improvement)",
            history.len(),
            metric,
            first,
            last,
            improvement
        )
    }
}

/// True when the sign of consecutive deltas alternates for at least the
/// last 3 transitions (improve, regress, improve, ...).
fn is_oscillating(values: &[f64]) -> bool {
    let deltas: Vec<f64> = values
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .filter(|d| *d != 0.0)
        .collect();
    if deltas.len() < 3 {
        return false;
    }
    deltas[deltas.len() - 3..]
        .windows(2)
        .all(|pair| (pair[0] > 0.0) != (pair[1] > 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violations(v: f64) -> IterationRecord {
        IterationRecord::new().with("violations", v)
    }

    #[test]
    fn test_converged_on_zero_violations() {
        let history = vec![violations(10.0), violations(5.0), violations(2.0)];
        let verdict = ConvergenceDetector::new().track(&history, &violations(0.0));
        assert_eq!(verdict.iteration, 4);
        assert!(verdict.should_stop);
        assert_eq!(verdict.reason, Some(StopReason::Converged));
    }

    #[test]
    fn test_not_converged_while_violations_remain() {
        let verdict = ConvergenceDetector::new().track(&[violations(10.0)], &violations(3.0));
        assert!(!verdict.should_stop);
        assert!(verdict.reason.is_none());
    }

    #[test]
    fn test_plateau_on_three_identical_records() {
        let history = vec![violations(4.0), violations(4.0)];
        let verdict = ConvergenceDetector::new().track(&history, &violations(4.0));
        assert!(verdict.plateau);
        assert!(!verdict.should_stop);
    }

    #[test]
    fn test_no_plateau_when_still_moving() {
        let history = vec![violations(5.0), violations(4.0)];
        let verdict = ConvergenceDetector::new().track(&history, &violations(4.0));
        assert!(!verdict.plateau);
    }

    #[test]
    fn test_oscillation_on_alternating_scores() {
        let history = vec![
            IterationRecord::new().with("score", 90.0),
            IterationRecord::new().with("score", 80.0),
            IterationRecord::new().with("score", 90.0),
        ];
        let current = IterationRecord::new().with("score", 80.0);
        let verdict = ConvergenceDetector::new().track(&history, &current);
        assert!(verdict.oscillating);
    }

    #[test]
    fn test_monotonic_improvement_is_not_oscillation() {
        let history = vec![violations(10.0), violations(7.0), violations(4.0)];
        let verdict = ConvergenceDetector::new().track(&history, &violations(1.0));
        assert!(!verdict.oscillating);
    }

    #[test]
    fn test_inputs_are_not_mutated() {
        let history = vec![violations(10.0), violations(5.0)];
        let snapshot = history.clone();
        let current = violations(2.0);
        let _ = ConvergenceDetector::new().track(&history, &current);
        assert_eq!(history, snapshot);
        assert_eq!(current, violations(2.0));
    }

    #[test]
    fn test_summary_reports_improvement() {
        let history = vec![violations(10.0), violations(5.0), violations(1.0)];
        let summary = ConvergenceDetector::new().summary(&history);
        assert!(summary.contains("3 iteration(s)"));
        assert!(summary.contains("+90.0%"));
    }

    #[test]
    fn test_summary_reports_regression_as_negative() {
        let history = vec![violations(4.0), violations(6.0)];
        let summary = ConvergenceDetector::new().summary(&history);
        assert!(summary.contains("-50.0%"));
    }

    #[test]
    fn test_summary_empty_history() {
        assert_eq!(
            ConvergenceDetector::new().summary(&[]),
            "no iterations recorded"
        );
    }
}
