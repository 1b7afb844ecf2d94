//! Completion collaborator interface.
//!
//! A [`Completion`] turns an ordered list of [`Turn`]s into text, either in
//! one piece or as a stream of fragments. Implementations must be
//! re-entrant: units call the same collaborator many times, possibly
//! concurrently.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::streaming::{self, TextStream};

// ---------------------------------------------------------------------------
// Turns
// ---------------------------------------------------------------------------

/// Speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message in a conversation, in the wire shape of chat APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

// ---------------------------------------------------------------------------
// Options & errors
// ---------------------------------------------------------------------------

/// Per-call sampling options. `None` leaves the provider default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Ask for a JSON object response where the provider supports it.
    #[serde(default)]
    pub json_mode: bool,
}

impl CompletionOptions {
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// Failures of a completion call.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("API key not configured")]
    MissingApiKey,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-retryable status from the provider.
    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Gave up after {attempts} attempt(s): {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

// ---------------------------------------------------------------------------
// Completion trait
// ---------------------------------------------------------------------------

/// A text completion source.
#[async_trait]
pub trait Completion: Send + Sync + fmt::Debug {
    /// Model identifier, for logging.
    fn model(&self) -> &str;

    /// Complete `turns` in one piece.
    async fn complete(&self, turns: &[Turn], options: &CompletionOptions) -> Result<String, CompletionError>;

    /// Complete `turns` as a lazy, finite, non-restartable fragment stream.
    ///
    /// The default yields the result of [`Completion::complete`] as a single
    /// fragment.
    async fn stream(&self, turns: &[Turn], options: &CompletionOptions) -> Result<TextStream, CompletionError> {
        let text = self.complete(turns, options).await?;
        Ok(streaming::once(text))
    }
}
