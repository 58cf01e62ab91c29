//! Model-calling client.
//!
//! A single blocking `complete(model_id, messages)` entry point behind the
//! `CompletionClient` trait, plus the OpenAI-compatible HTTP implementation.
//! `governed_complete` layers governor selection, rate admission, and the
//! circuit breaker on top; it is the one path every model call in the crate
//! goes through.

use crate::error::AgentError;
use crate::governor::{ResourceGovernor, Tier};
use crate::{events, metrics};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Result of a completion call: content plus token volumes.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub content: String,
    pub units_in: u64,
    pub units_out: u64,
}

/// The model-calling contract. One blocking call, explicit outcome.
pub trait CompletionClient: Send + Sync {
    fn complete(&self, model_id: &str, messages: &[ChatMessage]) -> Result<Completion, AgentError>;
}

/// Blocking OpenAI-compatible chat completions client.
pub struct HttpCompletionClient {
    base_url: String,
    api_key: SecretString,
    http: reqwest::blocking::Client,
}

impl HttpCompletionClient {
    pub fn new(base_url: &str, api_key: SecretString) -> Result<Self, AgentError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| AgentError::Model {
                model: String::new(),
                message: format!("http client init: {}", e),
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl CompletionClient for HttpCompletionClient {
    fn complete(&self, model_id: &str, messages: &[ChatMessage]) -> Result<Completion, AgentError> {
        let body = json!({
            "model": model_id,
            "messages": messages,
        });

        let model_err = |message: String| AgentError::Model {
            model: model_id.to_string(),
            message,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .map_err(|e| model_err(e.to_string()))?
            .error_for_status()
            .map_err(|e| model_err(e.to_string()))?;

        let parsed: ChatResponse = response.json().map_err(|e| model_err(e.to_string()))?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| model_err("empty response".to_string()))?;
        let usage = parsed.usage.unwrap_or_default();

        Ok(Completion {
            content,
            units_in: usage.prompt_tokens,
            units_out: usage.completion_tokens,
        })
    }
}

/// A completion that went through the governor.
#[derive(Debug, Clone)]
pub struct GovernedCompletion {
    pub model_id: String,
    pub content: String,
    pub cost: f64,
}

/// Delay between fallback attempts after a model failure. Jittered so that
/// several processes hammering the same degraded backend desynchronize.
fn fallback_backoff() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(20..80))
}

/// Call a model chosen by the governor, walking down tiers on failure.
///
/// Within the starting tier the governor yields candidates in preference
/// order; each candidate must pass the circuit and rate-window checks, then
/// the call runs under the breaker guard so failures are counted. When a
/// tier is exhausted the next one down is tried. Exhausting the cheapest
/// tier surfaces `ModelUnavailable` (or `BudgetExhausted` when the budget is
/// gone too) — never a silent escalation to a pricier tier.
pub fn governed_complete(
    governor: &ResourceGovernor,
    client: &dyn CompletionClient,
    start_tier: Tier,
    messages: &[ChatMessage],
) -> Result<GovernedCompletion, AgentError> {
    let mut tier = Some(start_tier);
    let mut attempted = 0usize;

    while let Some(current) = tier {
        for model in governor.models_in_tier(current) {
            if !governor.breaker().circuit_closed(&model.id) {
                continue;
            }
            if !governor.breaker().admit(&model.id) {
                continue;
            }
            governor.breaker().record_call(&model.id);

            if attempted > 0 {
                std::thread::sleep(fallback_backoff());
            }
            attempted += 1;

            let started = Instant::now();
            let result = governor
                .breaker()
                .guard(&model.id, || client.complete(&model.id, messages));
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(completion) => {
                    let cost =
                        governor.record_cost(&model.id, completion.units_in, completion.units_out);
                    metrics::record_success(&model.id, duration_ms);
                    metrics::record_tokens(&model.id, completion.units_in, completion.units_out);
                    events::emit(events::Event::model_usage(
                        &model.id,
                        completion.units_in,
                        completion.units_out,
                        cost,
                        duration_ms,
                    ));
                    return Ok(GovernedCompletion {
                        model_id: model.id.clone(),
                        content: completion.content,
                        cost,
                    });
                }
                Err(err) => {
                    metrics::record_failure(&model.id, duration_ms);
                    events::emit(events::Event::model_error(&model.id, &err.to_string()));
                }
            }
        }
        tier = current.step_down();
    }

    let remaining = governor.budget_remaining();
    if remaining <= 0.0 {
        return Err(AgentError::BudgetExhausted { remaining });
    }
    Err(AgentError::ModelUnavailable {
        detail: format!(
            "no eligible model from tier {} down ({} attempt(s) made)",
            start_tier, attempted
        ),
    })
}

#[cfg(test)]
pub mod test_support {
    //! Scripted client for executor and tool tests.

    use super::*;
    use std::sync::Mutex;

    /// Returns canned responses in order; repeats the last one when the
    /// script runs out. An empty script fails every call.
    pub struct StubClient {
        script: Mutex<Vec<String>>,
        fail: bool,
    }

    impl StubClient {
        pub fn scripted(responses: &[&str]) -> Self {
            let mut script: Vec<String> = responses.iter().map(|s| s.to_string()).collect();
            script.reverse();
            Self {
                script: Mutex::new(script),
                fail: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                script: Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    impl CompletionClient for StubClient {
        fn complete(
            &self,
            model_id: &str,
            _messages: &[ChatMessage],
        ) -> Result<Completion, AgentError> {
            if self.fail {
                return Err(AgentError::Model {
                    model: model_id.to_string(),
                    message: "stubbed failure".to_string(),
                });
            }
            let mut script = self.script.lock().unwrap();
            let content = match script.len() {
                0 => String::new(),
                1 => script[0].clone(),
                _ => script.pop().unwrap(),
            };
            Ok(Completion {
                content,
                units_in: 100,
                units_out: 50,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_roles() {
        assert_eq!(ChatMessage::system("s").role, "system");
        assert_eq!(ChatMessage::user("u").role, "user");
        assert_eq!(ChatMessage::assistant("a").role, "assistant");
    }

    #[test]
    fn test_stub_client_replays_script() {
        let client = test_support::StubClient::scripted(&["one", "two"]);
        assert_eq!(client.complete("m", &[]).unwrap().content, "one");
        assert_eq!(client.complete("m", &[]).unwrap().content, "two");
        // Last response repeats.
        assert_eq!(client.complete("m", &[]).unwrap().content, "two");
    }
}
