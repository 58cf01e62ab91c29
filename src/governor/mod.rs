//! LLM resource governor.
//!
//! Classifies models into price tiers, tracks cumulative spend against the
//! cap, and picks the best available model in the current affordability
//! tier, consulting the circuit breaker and rate limiter on the way.

pub mod breaker;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};

use crate::config::{Config, ModelDescriptor};
use crate::store::AgentStore;
use crate::{events, metrics};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Affordability/capability bucket a model falls into based on price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Premium,
    Strong,
    Fast,
    Cheap,
}

impl Tier {
    /// Classify an input price (USD per 1M tokens) into a tier.
    /// Absent or unparseable prices fail safe toward the cheapest option.
    pub fn for_input_price(price: Option<f64>) -> Self {
        match price {
            Some(p) if p >= 10.0 => Tier::Premium,
            Some(p) if p >= 2.0 => Tier::Strong,
            Some(p) if p >= 0.1 => Tier::Fast,
            _ => Tier::Cheap,
        }
    }

    /// The next tier down, if any.
    pub fn step_down(self) -> Option<Tier> {
        match self {
            Tier::Premium => Some(Tier::Strong),
            Tier::Strong => Some(Tier::Fast),
            Tier::Fast => Some(Tier::Cheap),
            Tier::Cheap => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::Premium => "premium",
            Tier::Strong => "strong",
            Tier::Fast => "fast",
            Tier::Cheap => "cheap",
        };
        write!(f, "{}", s)
    }
}

/// Price tier of a model.
pub fn classify_tier(model: &ModelDescriptor) -> Tier {
    Tier::for_input_price(model.input_price)
}

/// Process-wide resource governor: model catalogue, budget ledger, breaker.
///
/// One instance is owned by the process and injected into every run. Spend
/// is behind an `RwLock` and the breaker's maps are concurrent, so parallel
/// runs cannot race the counters.
pub struct ResourceGovernor {
    models: Vec<ModelDescriptor>,
    cap: f64,
    spent: RwLock<f64>,
    breaker: CircuitBreaker,
    store: Arc<dyn AgentStore>,
}

impl ResourceGovernor {
    /// Build a governor from config, seeding cumulative spend from the
    /// store. A failing store degrades to a zero seed and in-memory state.
    pub fn new(config: &Config, store: Arc<dyn AgentStore>) -> Self {
        let seed = store.read_total_spend().unwrap_or(0.0);
        let breaker_cfg = BreakerConfig {
            threshold: config.limits.breaker_threshold,
            cooldown_secs: config.limits.breaker_cooldown_secs as i64,
            calls_per_minute: config.limits.calls_per_minute,
        };
        Self {
            models: config.models.clone(),
            cap: config.budget.cap_usd,
            spent: RwLock::new(seed),
            breaker: CircuitBreaker::new(breaker_cfg, store.clone()),
            store,
        }
    }

    pub fn cap(&self) -> f64 {
        self.cap
    }

    /// Remaining budget. May be transiently negative when a single call's
    /// cost overshoots what was left — the cap informs tier selection, it is
    /// not enforced pre-call.
    pub fn budget_remaining(&self) -> f64 {
        self.cap - *self.spent.read().unwrap()
    }

    /// Current affordability tier from the remaining/cap ratio: full budget
    /// runs strong, a degraded budget runs fast, a low budget runs cheap.
    /// Premium is never entered on budget state alone.
    pub fn tier(&self) -> Tier {
        if self.cap <= 0.0 {
            return Tier::Cheap;
        }
        let ratio = self.budget_remaining() / self.cap;
        if ratio >= 0.5 {
            Tier::Strong
        } else if ratio >= 0.1 {
            Tier::Fast
        } else {
            Tier::Cheap
        }
    }

    /// Catalogue entries in the given tier, in preference order.
    pub fn models_in_tier(&self, tier: Tier) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter().filter(move |m| classify_tier(m) == tier)
    }

    /// First eligible model in the requested tier: circuit closed, rate
    /// window unsaturated. Returns `None` when the tier has nothing to
    /// offer — the caller may retry one tier down, never up.
    pub fn pick(&self, tier: Tier) -> Option<&ModelDescriptor> {
        self.models_in_tier(tier)
            .find(|m| self.breaker.circuit_closed(&m.id) && self.breaker.admit(&m.id))
    }

    /// `pick` at the current affordability tier.
    pub fn pick_current(&self) -> Option<&ModelDescriptor> {
        self.pick(self.tier())
    }

    /// Walk from the requested tier downward until a model is eligible.
    pub fn pick_with_fallback(&self, tier: Tier) -> Option<&ModelDescriptor> {
        let mut current = Some(tier);
        while let Some(t) = current {
            if let Some(model) = self.pick(t) {
                return Some(model);
            }
            current = t.step_down();
        }
        None
    }

    /// Compute the cost of a call, add it to cumulative spend, persist the
    /// charge best-effort, and return the computed value. The governor does
    /// not deduplicate; idempotency against double charging is the caller's
    /// concern.
    pub fn record_cost(&self, model_id: &str, units_in: u64, units_out: u64) -> f64 {
        let (rate_in, rate_out) = self
            .models
            .iter()
            .find(|m| m.id == model_id)
            .map(|m| (m.input_price.unwrap_or(0.0), m.output_price.unwrap_or(0.0)))
            .unwrap_or((0.0, 0.0));

        let cost =
            (units_in as f64 / 1_000_000.0) * rate_in + (units_out as f64 / 1_000_000.0) * rate_out;

        {
            let mut spent = self.spent.write().unwrap();
            *spent += cost;
        }
        let _ = self.store.append_cost(model_id, units_in, units_out, cost);

        metrics::record_cost(model_id, cost);
        events::emit(events::Event::budget_charged(
            model_id,
            cost,
            self.budget_remaining(),
        ));
        cost
    }

    pub fn circuit_closed(&self, model_id: &str) -> bool {
        self.breaker.circuit_closed(model_id)
    }

    pub fn trip(&self, model_id: &str) {
        self.breaker.record_failure(model_id);
    }

    pub fn reset(&self, model_id: &str) {
        self.breaker.record_success(model_id);
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The full catalogue, preference order preserved.
    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AgentStore, MemoryStore};

    fn governor_with_cap(cap: f64) -> ResourceGovernor {
        let mut config = Config::with_builtin_models();
        config.budget.cap_usd = cap;
        ResourceGovernor::new(&config, Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_classify_tier_thresholds() {
        let m = |p: Option<f64>| ModelDescriptor {
            id: "m".to_string(),
            input_price: p,
            output_price: p,
            context_window: 128_000,
        };
        assert_eq!(classify_tier(&m(Some(15.0))), Tier::Premium);
        assert_eq!(classify_tier(&m(Some(10.0))), Tier::Premium);
        assert_eq!(classify_tier(&m(Some(5.0))), Tier::Strong);
        assert_eq!(classify_tier(&m(Some(2.0))), Tier::Strong);
        assert_eq!(classify_tier(&m(Some(0.5))), Tier::Fast);
        assert_eq!(classify_tier(&m(Some(0.1))), Tier::Fast);
        assert_eq!(classify_tier(&m(Some(0.01))), Tier::Cheap);
        assert_eq!(classify_tier(&m(None)), Tier::Cheap);
    }

    #[test]
    fn test_budget_accounting() {
        let gov = governor_with_cap(10.0);
        assert_eq!(gov.budget_remaining(), 10.0);

        // claude-sonnet-4: $3/1M in, $15/1M out.
        // 10_000 in = $0.03, ~1_333 out = $0.02 -> $0.05
        let cost = gov.record_cost("claude-sonnet-4", 10_000, 1_333);
        assert!((cost - 0.049995).abs() < 1e-6);
        assert!((gov.budget_remaining() - 9.95).abs() < 1e-4);

        // Non-increasing under repeated charges.
        let before = gov.budget_remaining();
        gov.record_cost("claude-sonnet-4", 1_000, 100);
        assert!(gov.budget_remaining() < before);
    }

    #[test]
    fn test_unknown_model_charges_nothing() {
        let gov = governor_with_cap(10.0);
        assert_eq!(gov.record_cost("no-such-model", 1_000_000, 1_000_000), 0.0);
        assert_eq!(gov.budget_remaining(), 10.0);
    }

    #[test]
    fn test_tier_degrades_with_spend() {
        let gov = governor_with_cap(10.0);
        assert_eq!(gov.tier(), Tier::Strong);

        // Spend past half the cap: gpt-4 at $30/1M in.
        gov.record_cost("gpt-4", 200_000, 0); // $6
        assert_eq!(gov.tier(), Tier::Fast);

        gov.record_cost("gpt-4", 110_000, 0); // +$3.3 -> $0.7 left
        assert_eq!(gov.tier(), Tier::Cheap);
    }

    #[test]
    fn test_pick_respects_preference_order_and_circuits() {
        let gov = governor_with_cap(10.0);

        // Strong tier preference order: claude-sonnet-4 then gpt-4o.
        assert_eq!(gov.pick(Tier::Strong).unwrap().id, "claude-sonnet-4");

        for _ in 0..3 {
            gov.trip("claude-sonnet-4");
        }
        assert_eq!(gov.pick(Tier::Strong).unwrap().id, "gpt-4o");

        for _ in 0..3 {
            gov.trip("gpt-4o");
        }
        assert!(gov.pick(Tier::Strong).is_none());

        // Fallback steps down, never up.
        assert_eq!(
            gov.pick_with_fallback(Tier::Strong).unwrap().id,
            "claude-haiku-3-5"
        );
    }

    #[test]
    fn test_trip_and_reset_delegate() {
        let gov = governor_with_cap(10.0);
        for _ in 0..3 {
            gov.trip("gpt-4o");
        }
        assert!(!gov.circuit_closed("gpt-4o"));
        gov.reset("gpt-4o");
        assert!(gov.circuit_closed("gpt-4o"));
    }

    #[test]
    fn test_spend_seeds_from_store() {
        let store = Arc::new(MemoryStore::new());
        store.append_cost("gpt-4o", 0, 0, 4.0).unwrap();
        let mut config = Config::with_builtin_models();
        config.budget.cap_usd = 10.0;
        let gov = ResourceGovernor::new(&config, store);
        assert!((gov.budget_remaining() - 6.0).abs() < 1e-9);
    }
}
