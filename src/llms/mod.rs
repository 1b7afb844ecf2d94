//! Completion collaborators.
//!
//! - [`base_llm`] - the [`Completion`] trait, turns and options
//! - [`streaming`] - fragment streams and SSE decoding
//! - [`providers`] - concrete completion sources

pub mod base_llm;
pub mod providers;
pub mod streaming;

// Re-exports for convenience
pub use base_llm::{Completion, CompletionError, CompletionOptions, Role, Turn};
pub use providers::{OpenAiCompatible, ScriptedCompletion};
pub use streaming::{collect_text, TextStream};
