//! # tripcrew
//!
//! Multi-agent trip planning.
//!
//! Independent units (attraction search, lodging, weather, synthesis)
//! cooperate through a message [`hub`] and a per-session versioned
//! [`blackboard`]. Each unit drives a completion model through an inline
//! tool-call protocol ([`agents`]), and the [`planner`] sequences the units
//! and geofences the resulting plan.

pub mod agents;
pub mod blackboard;
pub mod config;
pub mod hub;
pub mod llms;
pub mod memory;
pub mod planner;
pub mod server;
pub mod tools;

pub use agents::{ProtocolEngine, SpecialistUnit};
pub use blackboard::{Blackboard, BlackboardStore};
pub use config::PlannerConfig;
pub use hub::{Hub, Message, MessageKind};
pub use llms::{Completion, OpenAiCompatible};
pub use planner::{TripOrchestrator, TripPlan, TripRequest};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
