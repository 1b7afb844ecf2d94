//! Offline completion source that replays canned text.
//!
//! Useful for tests and dry runs. Every call is recorded so callers can
//! inspect the turns a unit actually sent.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::llms::base_llm::{Completion, CompletionError, CompletionOptions, Turn};
use crate::llms::streaming::{from_fragments, TextStream};

type Responder = Arc<dyn Fn(&[Turn]) -> String + Send + Sync>;

enum Script {
    /// Pop one response per call; repeat `fallback` once drained.
    Queue {
        responses: VecDeque<String>,
        fallback: Option<String>,
    },
    Func(Responder),
}

/// Completion that answers from a script instead of a model.
pub struct ScriptedCompletion {
    script: Mutex<Script>,
    calls: Mutex<Vec<Vec<Turn>>>,
    delay: Option<Duration>,
    fragment_chars: usize,
}

impl std::fmt::Debug for ScriptedCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedCompletion")
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

impl ScriptedCompletion {
    fn with_script(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
            delay: None,
            fragment_chars: 8,
        }
    }

    /// Answer with `responses` in order; fail once they run out.
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(Script::Queue {
            responses: responses.into_iter().map(Into::into).collect(),
            fallback: None,
        })
    }

    /// Answer every call with `text`.
    pub fn repeating(text: impl Into<String>) -> Self {
        Self::with_script(Script::Queue {
            responses: VecDeque::new(),
            fallback: Some(text.into()),
        })
    }

    /// Compute each answer from the turns received.
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&[Turn]) -> String + Send + Sync + 'static,
    {
        Self::with_script(Script::Func(Arc::new(responder)))
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Turn lists received so far, one entry per call.
    pub fn calls(&self) -> Vec<Vec<Turn>> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn next_response(&self, turns: &[Turn]) -> Result<String, CompletionError> {
        self.calls.lock().push(turns.to_vec());
        let responder = {
            let mut script = self.script.lock();
            match &mut *script {
                Script::Queue { responses, fallback } => {
                    return responses
                        .pop_front()
                        .or_else(|| fallback.clone())
                        .ok_or_else(|| CompletionError::InvalidResponse("script exhausted".into()));
                }
                Script::Func(responder) => Arc::clone(responder),
            }
        };
        Ok(responder(turns))
    }
}

#[async_trait]
impl Completion for ScriptedCompletion {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, turns: &[Turn], _options: &CompletionOptions) -> Result<String, CompletionError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_response(turns)
    }

    async fn stream(&self, turns: &[Turn], options: &CompletionOptions) -> Result<TextStream, CompletionError> {
        let text = self.complete(turns, options).await?;
        let chars: Vec<char> = text.chars().collect();
        let fragments: Vec<String> = chars
            .chunks(self.fragment_chars.max(1))
            .map(|c| c.iter().collect())
            .collect();
        Ok(from_fragments(fragments))
    }
}
