use anyhow::Result;
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::sync::Arc;

use taskpilot::config::{app_dir, Config};
use taskpilot::executor::{Executor, ReasoningPattern, Task};
use taskpilot::governor::ResourceGovernor;
use taskpilot::llm::HttpCompletionClient;
use taskpilot::store::{AgentStore, JsonFileStore, MemoryStore};
use taskpilot::tools::ToolRegistry;
use taskpilot::{metrics, RunOutcome};

#[derive(Parser)]
#[command(name = "taskpilot", version, about = "Autonomous agent control plane")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single task to completion
    Run {
        /// The task text
        task: String,
        /// Force a reasoning pattern (direct, react, pre_act, rewoo, reflexion)
        #[arg(long)]
        pattern: Option<ReasoningPattern>,
        /// Override the step limit
        #[arg(long)]
        max_steps: Option<usize>,
        /// Stream run/model/tool/circuit events to stderr
        #[arg(long, short)]
        verbose: bool,
    },
    /// Interactive loop
    Repl,
    /// Budget, tier, and circuit status
    Status,
    /// Dump collected metrics
    Metrics {
        /// Emit the JSON snapshot instead of Prometheus text
        #[arg(long)]
        json: bool,
    },
}

fn open_store() -> Arc<dyn AgentStore> {
    match JsonFileStore::open_default() {
        Ok(store) => Arc::new(store),
        Err(err) => {
            eprintln!("warning: state store unavailable ({}); running in-memory", err);
            Arc::new(MemoryStore::new())
        }
    }
}

fn print_outcome(outcome: &RunOutcome) {
    println!("{}", outcome.answer);
    eprintln!(
        "[{} | {} step(s) | ${:.4}{}]",
        outcome.pattern_used,
        outcome.steps,
        outcome.cost,
        if outcome.truncated { " | truncated" } else { "" }
    );
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load()?;
    let store = open_store();

    match cli.command {
        Command::Run {
            task,
            pattern,
            max_steps,
            verbose,
        } => {
            if let Some(steps) = max_steps {
                config.limits.max_steps = steps;
            }
            if verbose {
                taskpilot::events::global().subscribe(|event| {
                    let payload = serde_json::to_string(&event.event_type).unwrap_or_default();
                    eprintln!("[{}] {}", event.subsystem, payload);
                });
            }
            let governor = ResourceGovernor::new(&config, store);
            let api_key = config.backend.resolve_api_key()?;
            let client = HttpCompletionClient::new(&config.backend.base_url, api_key)?;
            let tools = ToolRegistry::builtin();
            let executor = Executor::new(&governor, &client, &tools, &config);

            match executor.run(&Task::new(task), pattern) {
                Ok(outcome) => {
                    print_outcome(&outcome);
                    let _ = metrics::global().export_to_default_location();
                }
                Err(failure) => {
                    let _ = metrics::global().export_to_default_location();
                    return Err(anyhow::anyhow!("{}", failure));
                }
            }
        }
        Command::Repl => {
            let governor = ResourceGovernor::new(&config, store);
            let api_key = config.backend.resolve_api_key()?;
            let client = HttpCompletionClient::new(&config.backend.base_url, api_key)?;
            let tools = ToolRegistry::builtin();
            let executor = Executor::new(&governor, &client, &tools, &config);

            let mut editor = DefaultEditor::new()?;
            let history_path = app_dir().map(|d| d.join("history"));
            if let Some(path) = &history_path {
                let _ = editor.load_history(path);
            }

            loop {
                match editor.readline(">> ") {
                    Ok(line) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if line == "exit" || line == "quit" {
                            break;
                        }
                        let _ = editor.add_history_entry(line);
                        match executor.run(&Task::new(line), None) {
                            Ok(outcome) => print_outcome(&outcome),
                            Err(failure) => eprintln!("{}", failure),
                        }
                    }
                    Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                    Err(err) => {
                        eprintln!("readline error: {}", err);
                        break;
                    }
                }
            }

            if let Some(path) = &history_path {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                let _ = editor.save_history(path);
            }
        }
        Command::Status => {
            let governor = ResourceGovernor::new(&config, store);
            println!(
                "budget: ${:.4} remaining of ${:.2} (tier: {})",
                governor.budget_remaining(),
                governor.cap(),
                governor.tier()
            );
            match governor.pick_current() {
                Some(model) => println!("next pick: {}", model.id),
                None => println!("next pick: none eligible"),
            }
            println!("models:");
            for model in governor.models() {
                let tier = taskpilot::classify_tier(model);
                let circuit = if governor.circuit_closed(&model.id) {
                    "closed"
                } else {
                    "open"
                };
                println!(
                    "  {:<20} {:<8} circuit: {:<6} window: {}/min",
                    model.id,
                    tier.to_string(),
                    circuit,
                    governor.breaker().window_len(&model.id),
                );
            }
        }
        Command::Metrics { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&metrics::snapshot())?);
            } else {
                print!("{}", metrics::prometheus());
            }
        }
    }

    Ok(())
}
