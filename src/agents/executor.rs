//! Protocol engine: the completion / tool-call loop of one unit.
//!
//! Each [`ProtocolEngine::run`] walks a small state machine:
//!
//! ```text
//! AwaitingCompletion --(no call tokens)--> Final
//!        |  ^
//!        v  | (iterations < max)
//!   HasToolCalls --(iterations == max)--> forced completion --> Final
//! ```
//!
//! In `HasToolCalls` every call token is dispatched left to right. Unknown
//! capabilities, capability errors, panics and timeouts all become textual
//! results; the loop never aborts on a capability. The cleaned assistant
//! turn and one synthetic user turn listing all results are appended, and
//! the iteration count goes up by one.
//!
//! Only completion failures and completion timeouts surface as
//! [`EngineError`].

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use super::parser::{extract_tool_calls, strip_tool_calls, ToolCall};
use crate::blackboard::Blackboard;
use crate::hub::{Hub, Message, MessageKind};
use crate::llms::base_llm::{Completion, CompletionError, CompletionOptions, Turn};
use crate::llms::streaming::collect_text;
use crate::tools::base_tool::ToolArguments;
use crate::tools::registry::ToolRegistry;

/// Longest shared value quoted into a system prompt, in characters.
const SHARED_VALUE_PREVIEW: usize = 200;
/// Longest memory entry quoted into a system prompt, in characters.
const MEMORY_PREVIEW: usize = 300;

// ---------------------------------------------------------------------------
// Configuration & errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tool rounds before the forced final completion. `0` disables tools.
    pub max_iterations: usize,
    #[serde(default, with = "crate::config::opt_secs")]
    pub completion_timeout: Option<Duration>,
    #[serde(default, with = "crate::config::opt_secs")]
    pub tool_timeout: Option<Duration>,
    /// Consume completions as fragment streams.
    pub stream: bool,
    pub options: CompletionOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            completion_timeout: None,
            tool_timeout: None,
            stream: false,
            options: CompletionOptions::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
}

// ---------------------------------------------------------------------------
// Run records
// ---------------------------------------------------------------------------

/// Outcome of one dispatched call token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub name: String,
    pub arguments: ToolArguments,
    /// Capability output, or an error description.
    pub text: String,
    pub succeeded: bool,
}

/// Result of [`ProtocolEngine::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub output: String,
    /// Tool rounds executed.
    pub tool_iterations: usize,
    /// Completions requested, the forced one included.
    pub completions: usize,
    pub tool_results: Vec<ToolOutcome>,
}

enum Step {
    AwaitingCompletion,
    HasToolCalls { text: String, calls: Vec<ToolCall> },
    Final(String),
}

// ---------------------------------------------------------------------------
// ProtocolEngine
// ---------------------------------------------------------------------------

/// A named unit bound to a completion source and optionally to
/// capabilities, a hub and a blackboard.
pub struct ProtocolEngine {
    name: String,
    system_prompt: String,
    completion: Arc<dyn Completion>,
    tools: ToolRegistry,
    config: EngineConfig,
    hub: Option<Arc<Hub>>,
    blackboard: Option<Arc<Blackboard>>,
    /// Durable conversation: one user and one assistant turn per run.
    history: Mutex<Vec<Turn>>,
}

impl fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("name", &self.name)
            .field("model", &self.completion.model())
            .field("tools", &self.tools.names())
            .field("max_iterations", &self.config.max_iterations)
            .field("history_len", &self.history.lock().len())
            .finish()
    }
}

impl ProtocolEngine {
    pub fn new(name: impl Into<String>, completion: Arc<dyn Completion>) -> Self {
        Self {
            name: name.into(),
            system_prompt: String::new(),
            completion,
            tools: ToolRegistry::new(),
            config: EngineConfig::default(),
            hub: None,
            blackboard: None,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_hub(mut self, hub: Arc<Hub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn with_blackboard(mut self, blackboard: Arc<Blackboard>) -> Self {
        self.blackboard = Some(blackboard);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn hub(&self) -> Option<&Arc<Hub>> {
        self.hub.as_ref()
    }

    pub fn blackboard(&self) -> Option<&Arc<Blackboard>> {
        self.blackboard.as_ref()
    }

    /// Key under which the final output is shared.
    pub fn result_key(&self) -> String {
        format!("{}_result", self.name)
    }

    pub fn history(&self) -> Vec<Turn> {
        self.history.lock().clone()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    /// Run the completion / tool-call loop on `input`.
    pub async fn run(&self, input: &str) -> Result<RunOutcome, EngineError> {
        log::info!("{} processing: {}", self.name, preview(input, 100));
        if let Some(bb) = &self.blackboard {
            bb.update(&self.name, json!({"input": input, "status": "processing"}), "info");
        }

        let mut turns = self.build_turns(input);
        let mut iterations = 0usize;
        let mut completions = 0usize;
        let mut tool_results = Vec::new();
        let mut step = Step::AwaitingCompletion;

        let output = loop {
            step = match step {
                Step::AwaitingCompletion => {
                    let text = self.request_completion(&turns, &mut completions).await?;
                    let calls = if self.config.max_iterations == 0 {
                        Vec::new()
                    } else {
                        extract_tool_calls(&text)
                    };
                    if calls.is_empty() {
                        Step::Final(text)
                    } else {
                        Step::HasToolCalls { text, calls }
                    }
                }
                Step::HasToolCalls { text, calls } => {
                    log::debug!("{} requested {} tool call(s)", self.name, calls.len());
                    let mut round = Vec::with_capacity(calls.len());
                    for call in &calls {
                        round.push(self.dispatch(call).await);
                    }

                    turns.push(Turn::assistant(strip_tool_calls(&text, &calls)));
                    turns.push(Turn::user(summarize_results(&round)));
                    tool_results.extend(round);
                    iterations += 1;

                    if iterations >= self.config.max_iterations {
                        log::warn!(
                            "{} reached {} tool iteration(s), forcing final answer",
                            self.name,
                            iterations
                        );
                        Step::Final(self.request_completion(&turns, &mut completions).await?)
                    } else {
                        Step::AwaitingCompletion
                    }
                }
                Step::Final(text) => break text,
            };
        };

        self.finish(input, &output, iterations);
        Ok(RunOutcome {
            output,
            tool_iterations: iterations,
            completions,
            tool_results,
        })
    }

    fn finish(&self, input: &str, output: &str, iterations: usize) {
        {
            let mut history = self.history.lock();
            history.push(Turn::user(input));
            history.push(Turn::assistant(output));
        }
        if let Some(bb) = &self.blackboard {
            bb.update(
                &self.name,
                json!({"output": output, "status": "completed", "tool_iterations": iterations}),
                "result",
            );
            bb.share(&self.result_key(), json!(output), Some(&self.name));
        }
        log::info!("{} finished after {} tool iteration(s)", self.name, iterations);
    }

    async fn request_completion(&self, turns: &[Turn], counter: &mut usize) -> Result<String, EngineError> {
        *counter += 1;
        let call = async {
            if self.config.stream {
                let stream = self.completion.stream(turns, &self.config.options).await?;
                collect_text(stream).await
            } else {
                self.completion.complete(turns, &self.config.options).await
            }
        };

        let result = match self.config.completion_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result.map_err(EngineError::from),
                Err(_) => Err(EngineError::Timeout(limit)),
            },
            None => call.await.map_err(EngineError::from),
        };

        if let Err(e) = &result {
            log::error!("{} completion failed: {}", self.name, e);
            if let Some(bb) = &self.blackboard {
                bb.update(&self.name, json!({"error": e.to_string(), "status": "failed"}), "error");
            }
        }
        result
    }

    async fn dispatch(&self, call: &ToolCall) -> ToolOutcome {
        let Some(tool) = self.tools.get(&call.name) else {
            log::warn!("{} called unknown tool {}", self.name, call.name);
            let available = self.tools.names().join(", ");
            return ToolOutcome {
                name: call.name.clone(),
                arguments: call.arguments("input"),
                text: format!("Error: unknown tool '{}'. Available tools: {}", call.name, available),
                succeeded: false,
            };
        };

        let arguments = if call.has_pairs() {
            call.arguments(tool.default_argument_key())
        } else {
            tool.bare_arguments(&call.raw_args)
        };
        log::debug!("{} -> {} {:?}", self.name, call.name, arguments);

        let invocation = AssertUnwindSafe(tool.invoke(&arguments)).catch_unwind();
        let outcome = match self.config.tool_timeout {
            Some(limit) => tokio::time::timeout(limit, invocation).await.map_err(|_| limit),
            None => Ok(invocation.await),
        };

        let (text, succeeded) = match outcome {
            Ok(Ok(Ok(text))) => (text, true),
            Ok(Ok(Err(e))) => {
                log::warn!("Tool {} failed: {:#}", call.name, e);
                (format!("Error: tool '{}' failed: {:#}", call.name, e), false)
            }
            Ok(Err(_)) => {
                log::error!("Tool {} panicked", call.name);
                (format!("Error: tool '{}' panicked", call.name), false)
            }
            Err(limit) => {
                log::warn!("Tool {} timed out after {:?}", call.name, limit);
                (format!("Error: tool '{}' timed out after {:?}", call.name, limit), false)
            }
        };
        ToolOutcome {
            name: call.name.clone(),
            arguments,
            text,
            succeeded,
        }
    }

    // -----------------------------------------------------------------------
    // Prompt scaffolding
    // -----------------------------------------------------------------------

    fn build_turns(&self, input: &str) -> Vec<Turn> {
        let mut turns = Vec::new();
        let system = self.build_system_prompt();
        if !system.is_empty() {
            turns.push(Turn::system(system));
        }
        turns.extend(self.history.lock().iter().cloned());
        turns.push(Turn::user(input));
        turns
    }

    /// Base prompt plus tool, memory and shared-context sections.
    pub fn build_system_prompt(&self) -> String {
        let mut prompt = self.system_prompt.clone();

        if !self.tools.is_empty() && self.config.max_iterations > 0 {
            prompt.push_str("\n\n## Available tools\n");
            prompt.push_str(&self.tools.describe());
            prompt.push_str(
                "\n\nTo call a tool write `[TOOL_CALL:tool_name:arguments]`. \
                 Arguments are `key=value` pairs separated by commas, or a single value, \
                 e.g. `[TOOL_CALL:amap_maps_weather:city=北京]`.\n",
            );
        }

        if let Some(bb) = &self.blackboard {
            let memory = bb.get_memory_context();
            if !memory.is_empty() {
                prompt.push_str("\n\n## Relevant memory\n");
                for (kind, value) in &memory {
                    prompt.push_str(&format!("- {}: {}\n", kind, preview(&value_text(value), MEMORY_PREVIEW)));
                }
            }

            let shared = bb.get_all_shared();
            if !shared.is_empty() {
                prompt.push_str("\n\n## Shared context\n");
                for (key, value) in &shared {
                    prompt.push_str(&format!("- {}: {}\n", key, preview(&value_text(value), SHARED_VALUE_PREVIEW)));
                }
            }
        }

        prompt.trim().to_string()
    }

    // -----------------------------------------------------------------------
    // Messaging
    // -----------------------------------------------------------------------

    /// Send a message to `receiver` through the bound hub.
    ///
    /// The blackboard summary, if any, travels as message context. Returns
    /// `None` without a hub or without a reply.
    pub async fn send_to(&self, receiver: &str, kind: MessageKind, payload: Value) -> Option<Value> {
        let Some(hub) = &self.hub else {
            log::warn!("{} has no hub; message to {} dropped", self.name, receiver);
            return None;
        };
        let mut message = Message::new(self.name.clone(), receiver, kind, payload);
        if let Some(bb) = &self.blackboard {
            message = message.with_context(bb.context_summary());
        }
        hub.send(message).await
    }
}

/// The synthetic user turn listing every tool result of one round.
pub fn summarize_results(results: &[ToolOutcome]) -> String {
    let body = results
        .iter()
        .map(|r| format!("Tool {} result:\n{}", r.name, r.text))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Tool results:\n{}\n\nPlease give a complete answer based on these results.",
        body
    )
}

/// First `max_chars` characters of `text`.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
