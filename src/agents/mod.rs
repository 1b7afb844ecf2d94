//! Units — the protocol engine and the specialists built on it.
//!
//! A unit is a [`ProtocolEngine`] (completion loop with inline tool calls)
//! optionally bound to a hub and a blackboard. [`SpecialistUnit`] adds the
//! per-role behavior used by the trip planner.

pub mod executor;
pub mod parser;
pub mod prompts;
pub mod specialized;

pub use executor::{EngineConfig, EngineError, ProtocolEngine, RunOutcome, ToolOutcome};
pub use parser::{extract_tool_calls, parse_arguments, strip_tool_calls, ToolCall};
pub use specialized::{SpecialistUnit, UnitRole};
