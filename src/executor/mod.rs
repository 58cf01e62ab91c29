//! The reasoning loop.
//!
//! A run selects a pattern once, then iterates against a bounded step count
//! and a cooperative wall-clock budget. Every model call goes through the
//! governor, every tool call through the permission gate, and every piece of
//! text entering the trace through the firewall.
//!
//! The wall-clock limit is checked at step boundaries only: a single
//! oversized model or tool call can overrun it. That mirrors the sequential
//! design — no call within a run executes concurrently with another.

pub mod parse;
pub mod patterns;

pub use parse::{Action, ParsedStep, ANSWER_SENTINEL};
pub use patterns::ReasoningPattern;

use crate::config::{Config, ShellConfig};
use crate::convergence::{ConvergenceDetector, IterationRecord};
use crate::error::{AgentError, RunFailure};
use crate::events;
use crate::firewall;
use crate::governor::{ResourceGovernor, Tier};
use crate::llm::{governed_complete, ChatMessage, CompletionClient};
use crate::metrics;
use crate::tools::{self, ToolContext, ToolRegistry};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Structured task handed in by the upstream classification stage.
#[derive(Debug, Clone, Default)]
pub struct Task {
    pub text: String,
    pub intent: Option<String>,
    pub entities: Vec<String>,
    pub axioms: Vec<String>,
}

impl Task {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// One thought -> action -> observation entry.
#[derive(Debug, Clone)]
pub struct TraceStep {
    pub thought: String,
    pub action: String,
    pub observation: String,
}

/// Per-run trace, owned exclusively by the run.
#[derive(Debug)]
pub struct ExecutionTrace {
    pub run_id: String,
    pub steps: Vec<TraceStep>,
    started: Instant,
}

impl ExecutionTrace {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            steps: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn push(&mut self, thought: impl Into<String>, action: impl Into<String>, observation: impl Into<String>) {
        self.steps.push(TraceStep {
            thought: thought.into(),
            action: action.into(),
            observation: observation.into(),
        });
    }
}

/// Successful termination of a run. Step- and time-limit terminations are
/// successes too, carrying `truncated` and the best partial answer.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub answer: String,
    pub steps: usize,
    pub pattern_used: ReasoningPattern,
    pub cost: f64,
    pub truncated: bool,
}

static VIOLATIONS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)violations?\s*[:=]\s*(\d+)").expect("violations pattern"));

static REWOO_CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^#E(\d+)\s*=\s*([a-z][a-z0-9_]*)\s*(.*)$").expect("rewoo pattern")
});

static PLAN_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\d+[.)]\s+(.+)$").expect("plan pattern"));

/// Upper bound on reflexion self-correction rounds.
const MAX_REFLEXION_ATTEMPTS: usize = 3;

/// The agent executor. Holds shared process resources by reference; all
/// per-run state lives in the trace.
pub struct Executor<'a> {
    governor: &'a ResourceGovernor,
    client: &'a dyn CompletionClient,
    tools: &'a ToolRegistry,
    shell: ShellConfig,
    max_steps: usize,
    wall_clock: Duration,
    cancel: Arc<AtomicBool>,
}

impl<'a> Executor<'a> {
    pub fn new(
        governor: &'a ResourceGovernor,
        client: &'a dyn CompletionClient,
        tools: &'a ToolRegistry,
        config: &Config,
    ) -> Self {
        Self {
            governor,
            client,
            tools,
            shell: config.shell.clone(),
            max_steps: config.limits.max_steps,
            wall_clock: Duration::from_secs(config.limits.wall_clock_secs),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative cancellation handle: setting it skips the next loop
    /// iteration in favor of immediate termination with the trace so far.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run a task to completion.
    ///
    /// `pattern` overrides classification when supplied; the override always
    /// wins. The run terminates with an answer, a truncated partial answer,
    /// or a failure that reports trace length, elapsed time, and reason.
    pub fn run(
        &self,
        task: &Task,
        pattern: Option<ReasoningPattern>,
    ) -> Result<RunOutcome, RunFailure> {
        let mut trace = ExecutionTrace::new();
        let budget_before = self.governor.budget_remaining();

        if task.text.trim().is_empty() {
            return Err(RunFailure {
                reason: AgentError::Validation("empty task text".to_string()),
                trace_len: 0,
                elapsed: trace.elapsed(),
            });
        }

        let pattern_used = self.select_pattern(task, pattern);
        events::emit(events::Event::run_started(
            &trace.run_id,
            pattern_used.as_str(),
        ));

        let result = match pattern_used {
            ReasoningPattern::Direct => self.run_direct(task),
            ReasoningPattern::React => self.react_loop(task, &mut trace, &[]),
            ReasoningPattern::PreAct => self.run_pre_act(task, &mut trace),
            ReasoningPattern::Rewoo => self.run_rewoo(task, &mut trace),
            ReasoningPattern::Reflexion => self.run_reflexion(task, &mut trace),
        };

        let cost = budget_before - self.governor.budget_remaining();

        match result.and_then(|(answer, truncated)| {
            firewall::sanitize(Ok(answer)).map(|answer| (answer, truncated))
        }) {
            Ok((answer, truncated)) => {
                events::emit(events::Event::run_finished(
                    &trace.run_id,
                    trace.len(),
                    truncated,
                    cost,
                ));
                Ok(RunOutcome {
                    answer,
                    steps: trace.len(),
                    pattern_used,
                    cost,
                    truncated,
                })
            }
            Err(reason) => {
                let elapsed = trace.elapsed();
                events::emit(events::Event::run_failed(
                    &trace.run_id,
                    &reason.to_string(),
                    trace.len(),
                    elapsed.as_millis() as u64,
                ));
                Err(RunFailure {
                    reason,
                    trace_len: trace.len(),
                    elapsed,
                })
            }
        }
    }

    /// Override wins; otherwise classifier call, then pure heuristic only on
    /// classifier failure.
    fn select_pattern(&self, task: &Task, explicit: Option<ReasoningPattern>) -> ReasoningPattern {
        if let Some(pattern) = explicit {
            return pattern;
        }
        let messages = patterns::classifier_messages(&task.text);
        match governed_complete(self.governor, self.client, Tier::Cheap, &messages) {
            Ok(completion) => patterns::parse_classifier_reply(&completion.content)
                .unwrap_or_else(|| patterns::heuristic(&task.text)),
            Err(_) => patterns::heuristic(&task.text),
        }
    }

    /// Truncation cause if the run must stop at this boundary.
    fn stop_cause(&self, trace: &ExecutionTrace) -> Option<&'static str> {
        if self.cancel.load(Ordering::SeqCst) {
            return Some("run cancelled");
        }
        if trace.len() >= self.max_steps {
            return Some("step limit reached");
        }
        if trace.elapsed() >= self.wall_clock {
            return Some("time limit reached");
        }
        None
    }

    fn partial_answer(trace: &ExecutionTrace, cause: &str) -> String {
        let best = trace
            .steps
            .iter()
            .rev()
            .find_map(|s| {
                if !s.observation.trim().is_empty() {
                    Some(s.observation.clone())
                } else if !s.thought.trim().is_empty() {
                    Some(s.thought.clone())
                } else {
                    None
                }
            });
        match best {
            Some(partial) => format!("[{}] partial result: {}", cause, partial),
            None => format!("[{}] no partial result available", cause),
        }
    }

    fn system_prompt(&self, task: &Task) -> String {
        let mut prompt = String::from(
            "You are an autonomous task agent. At each step reply with exactly:\n\
             Thought: <your reasoning>\n\
             Action: <tool_name> <json arguments>\n\
             or finish with:\n\
             ANSWER: <final answer>\n\n\
             Available tools:\n",
        );
        prompt.push_str(&self.tools.catalogue());
        if !task.axioms.is_empty() {
            prompt.push_str("\n\nConstraints that must hold:\n");
            for axiom in &task.axioms {
                prompt.push_str(&format!("- {}\n", axiom));
            }
        }
        prompt
    }

    fn step_messages(
        &self,
        task: &Task,
        trace: &ExecutionTrace,
        extra_context: &[String],
    ) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.system_prompt(task))];

        let mut task_text = task.text.clone();
        if let Some(intent) = &task.intent {
            task_text.push_str(&format!("\n(intent: {})", intent));
        }
        if !task.entities.is_empty() {
            task_text.push_str(&format!("\n(entities: {})", task.entities.join(", ")));
        }
        messages.push(ChatMessage::user(task_text));

        for context in extra_context {
            messages.push(ChatMessage::user(format!(
                "Critique to address in this attempt:\n{}",
                context
            )));
        }

        for step in &trace.steps {
            messages.push(ChatMessage::assistant(format!(
                "Thought: {}\nAction: {}",
                step.thought, step.action
            )));
            messages.push(ChatMessage::user(format!("Observation: {}", step.observation)));
        }
        messages
    }

    /// Dispatch one tool action and return the observation text.
    ///
    /// Unknown tools, gate rejections, tool errors, and firewall blocks all
    /// become observations — never run failures.
    fn dispatch(&self, name: &str, args: &Value) -> String {
        let Some(tool) = self.tools.get(name) else {
            return format!("unknown tool: {}", name);
        };

        if let Some(AgentError::ToolBlocked { reason }) = tools::gate(tool, args) {
            metrics::record_tool_invocation(name, false);
            events::emit(events::Event::tool_blocked(name, &reason));
            return reason;
        }

        let ctx = ToolContext {
            governor: self.governor,
            client: self.client,
            shell: &self.shell,
        };

        let started = Instant::now();
        let result = tool.invoke(args, &ctx);
        let duration_ms = started.elapsed().as_millis() as u64;
        metrics::record_tool_invocation(name, result.is_ok());
        events::emit(events::Event::tool_invoked(name, result.is_ok(), duration_ms));

        match result {
            Ok(text) => match firewall::sanitize(Ok(text)) {
                Ok(text) => text,
                // Fatal to the step, not the run: the reason replaces the
                // observation so it always surfaces in the trace.
                Err(err) => err.to_string(),
            },
            Err(message) => format!("tool {} failed: {}", name, message),
        }
    }

    /// Single model call, no tools.
    fn run_direct(&self, task: &Task) -> Result<(String, bool), AgentError> {
        let messages = vec![
            ChatMessage::system(format!(
                "Answer the task directly. Reply with `{} <answer>`. No tools, no preamble.",
                ANSWER_SENTINEL
            )),
            ChatMessage::user(task.text.clone()),
        ];
        let completion = governed_complete(self.governor, self.client, self.governor.tier(), &messages)?;
        Ok((extract_answer(&completion.content), false))
    }

    /// The default thought -> action -> observation loop. `extra_context`
    /// carries reflexion critiques; empty for plain react.
    fn react_loop(
        &self,
        task: &Task,
        trace: &mut ExecutionTrace,
        extra_context: &[String],
    ) -> Result<(String, bool), AgentError> {
        loop {
            if let Some(cause) = self.stop_cause(trace) {
                return Ok((Self::partial_answer(trace, cause), true));
            }

            let messages = self.step_messages(task, trace, extra_context);
            let completion =
                governed_complete(self.governor, self.client, self.governor.tier(), &messages)?;
            let parsed = parse::parse_response(&completion.content);

            match parsed.action {
                Action::Final { answer } => return Ok((answer, false)),
                Action::Continue => {
                    trace.push(
                        parsed.thought,
                        "continue",
                        "no actionable step parsed; continuing",
                    );
                }
                Action::Tool { name, args } => {
                    let observation = self.dispatch(&name, &args);
                    trace.push(parsed.thought, format!("{} {}", name, args), observation);
                }
            }
        }
    }

    /// Plan up front, then execute the plan sequentially.
    fn run_pre_act(
        &self,
        task: &Task,
        trace: &mut ExecutionTrace,
    ) -> Result<(String, bool), AgentError> {
        let plan_messages = vec![
            ChatMessage::system(
                "Produce an ordered plan for the task as numbered lines (`1. ...`). \
                 Nothing but the numbered plan.",
            ),
            ChatMessage::user(task.text.clone()),
        ];
        let completion =
            governed_complete(self.governor, self.client, self.governor.tier(), &plan_messages)?;

        let plan: Vec<String> = PLAN_LINE_RE
            .captures_iter(&completion.content)
            .map(|c| c[1].trim().to_string())
            .take(self.max_steps)
            .collect();

        if plan.is_empty() {
            // Unplannable output: recover into the default loop.
            return self.react_loop(task, trace, &[]);
        }

        trace.push(
            format!("planned {} step(s)", plan.len()),
            "plan",
            plan.join("\n"),
        );

        for (index, item) in plan.iter().enumerate() {
            if let Some(cause) = self.stop_cause(trace) {
                return Ok((Self::partial_answer(trace, cause), true));
            }

            let mut messages = self.step_messages(task, trace, &[]);
            messages.push(ChatMessage::user(format!(
                "Execute plan step {} of {}: {}\nReply with Thought/Action, or ANSWER if done.",
                index + 1,
                plan.len(),
                item
            )));
            let completion =
                governed_complete(self.governor, self.client, self.governor.tier(), &messages)?;
            let parsed = parse::parse_response(&completion.content);

            match parsed.action {
                Action::Final { answer } => return Ok((answer, false)),
                Action::Continue => {
                    trace.push(parsed.thought, "continue", format!("plan step {} noted", index + 1));
                }
                Action::Tool { name, args } => {
                    let observation = self.dispatch(&name, &args);
                    trace.push(parsed.thought, format!("{} {}", name, args), observation);
                }
            }
        }

        // All steps executed without a declared answer: one synthesis call.
        let mut messages = self.step_messages(task, trace, &[]);
        messages.push(ChatMessage::user(format!(
            "All plan steps are executed. Reply with `{} <final answer>`.",
            ANSWER_SENTINEL
        )));
        let completion =
            governed_complete(self.governor, self.client, self.governor.tier(), &messages)?;
        Ok((extract_answer(&completion.content), false))
    }

    /// Plan worker calls once, execute them without re-consulting the model,
    /// then solve with the gathered evidence.
    fn run_rewoo(
        &self,
        task: &Task,
        trace: &mut ExecutionTrace,
    ) -> Result<(String, bool), AgentError> {
        let plan_messages = vec![
            ChatMessage::system(format!(
                "Plan evidence-gathering worker calls for the task without seeing their \
                 results. Emit one line per call: `#E1 = tool_name {{json args}}`. \
                 Available tools:\n{}",
                self.tools.catalogue()
            )),
            ChatMessage::user(task.text.clone()),
        ];
        let completion =
            governed_complete(self.governor, self.client, self.governor.tier(), &plan_messages)?;

        let calls: Vec<(String, String, Value)> = REWOO_CALL_RE
            .captures_iter(&completion.content)
            .map(|c| {
                (
                    format!("#E{}", &c[1]),
                    c[2].to_string(),
                    parse::parse_args(&c[3]),
                )
            })
            .take(self.max_steps)
            .collect();

        if calls.is_empty() {
            return self.react_loop(task, trace, &[]);
        }

        for (label, name, args) in &calls {
            if let Some(cause) = self.stop_cause(trace) {
                return Ok((Self::partial_answer(trace, cause), true));
            }
            let observation = self.dispatch(name, args);
            trace.push(label.clone(), format!("{} {}", name, args), observation);
        }

        let evidence = trace
            .steps
            .iter()
            .map(|s| format!("{}: {}", s.thought, s.observation))
            .collect::<Vec<_>>()
            .join("\n");
        let solver_messages = vec![
            ChatMessage::system(format!(
                "Answer the task using the gathered evidence. Reply with `{} <answer>`.",
                ANSWER_SENTINEL
            )),
            ChatMessage::user(format!("Task: {}\n\nEvidence:\n{}", task.text, evidence)),
        ];
        let completion =
            governed_complete(self.governor, self.client, self.governor.tier(), &solver_messages)?;
        Ok((extract_answer(&completion.content), false))
    }

    /// Execute, self-critique, retry with the critique as added context.
    /// Convergence-tracked on the critic's violation count.
    fn run_reflexion(
        &self,
        task: &Task,
        trace: &mut ExecutionTrace,
    ) -> Result<(String, bool), AgentError> {
        let detector = ConvergenceDetector::new();
        let mut history: Vec<IterationRecord> = Vec::new();
        let mut critiques: Vec<String> = Vec::new();
        let mut best_answer = String::new();

        for attempt in 1..=MAX_REFLEXION_ATTEMPTS {
            if let Some(cause) = self.stop_cause(trace) {
                if best_answer.is_empty() {
                    return Ok((Self::partial_answer(trace, cause), true));
                }
                return Ok((best_answer, true));
            }

            let (answer, truncated) = self.react_loop(task, trace, &critiques)?;
            best_answer = answer;
            if truncated {
                return Ok((best_answer, true));
            }

            let critic_messages = vec![
                ChatMessage::system(
                    "You are a strict critic. Count the concrete problems remaining in the \
                     answer. Reply `violations: N` on the first line, then list them.",
                ),
                ChatMessage::user(format!("Task: {}\n\nAnswer: {}", task.text, best_answer)),
            ];
            let critique =
                match governed_complete(self.governor, self.client, self.governor.tier(), &critic_messages) {
                    Ok(completion) => completion.content,
                    // The answer exists; a dead critic is not worth failing the run.
                    Err(_) => return Ok((best_answer, false)),
                };

            let violations = VIOLATIONS_RE
                .captures(&critique)
                .and_then(|c| c[1].parse::<f64>().ok())
                .unwrap_or(0.0);
            let current = IterationRecord::new().with("violations", violations);
            let verdict = detector.track(&history, &current);

            trace.push(
                format!("self-critique attempt {}", attempt),
                "reflexion",
                critique.clone(),
            );

            if verdict.should_stop || verdict.plateau || verdict.oscillating {
                return Ok((best_answer, false));
            }
            history.push(current);
            critiques.push(critique);
        }

        Ok((best_answer, false))
    }
}

/// Pull the text after the answer sentinel, or the whole reply when the
/// model skipped the prefix.
fn extract_answer(content: &str) -> String {
    match parse::parse_response(content).action {
        Action::Final { answer } => answer,
        _ => content.trim().to_string(),
    }
}
