//! taskpilot — an autonomous agent control plane.
//!
//! The crate sits between a user request and a pool of remote LLM backends
//! of varying cost and capability. Four tightly coupled pieces do the work:
//!
//! - [`governor`] — tier classification, budget accounting, per-model
//!   circuit breaker and rate limiting. Decides which model the loop may
//!   call.
//! - [`executor`] — the multi-pattern reasoning loop (direct, react,
//!   pre_act, rewoo, reflexion) over a bounded step count and wall-clock
//!   budget, dispatching to a fixed tool table.
//! - [`firewall`] — the output safety gate every piece of text passes
//!   before it reaches a tool or the user.
//! - [`convergence`] — the termination detector for iterative refinement
//!   loops.
//!
//! [`executor::Executor::run`] is the sole entry point downstream callers
//! need; [`firewall::evaluate`] and [`firewall::sanitize`] are usable
//! independently by any component emitting model or tool output.

pub mod config;
pub mod convergence;
pub mod error;
pub mod events;
pub mod executor;
pub mod firewall;
pub mod governor;
pub mod llm;
pub mod metrics;
pub mod safety;
pub mod store;
pub mod tools;

pub use config::{Config, ModelDescriptor};
pub use convergence::{ConvergenceDetector, ConvergenceVerdict, IterationRecord};
pub use error::{AgentError, RunFailure};
pub use executor::{Executor, ReasoningPattern, RunOutcome, Task};
pub use firewall::Verdict;
pub use governor::{classify_tier, ResourceGovernor, Tier};
pub use llm::{CompletionClient, HttpCompletionClient};
pub use store::{AgentStore, JsonFileStore, MemoryStore};
pub use tools::ToolRegistry;
