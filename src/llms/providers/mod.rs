//! Completion provider implementations.
//!
//! | Provider | Module | Backend |
//! |----------|--------|---------|
//! | OpenAI-compatible | [`openai`] | any `/chat/completions` endpoint |
//! | Scripted | [`scripted`] | canned responses, no network |

pub mod openai;
pub mod scripted;

pub use openai::OpenAiCompatible;
pub use scripted::ScriptedCompletion;
