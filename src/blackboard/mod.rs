//! Blackboard — versioned shared state of a coordination session.
//!
//! Units never talk to each other through the blackboard; they publish what
//! they know and read what others published. Three namespaces live on a
//! board:
//!
//! - **participant updates**: an append-only log per unit, each entry
//!   tagged with a category (`info`, `result`, `error`, ...);
//! - **shared values**: a flat key/value space, last writer wins;
//! - **memory context**: results pulled from long-term memory.
//!
//! # Versioning
//!
//! The version starts at 1 and every mutation increments it by exactly one.
//! Readers may use it to detect that something changed since they last
//! looked. A [`BlackboardSnapshot`] captures the whole board and can be
//! restored wholesale; restoring never lowers the version.
//!
//! # Concurrency
//!
//! A board is `Send + Sync`. Reads take a shared lock and return owned
//! copies, so no lock outlives the call.

pub mod slot;
pub mod store;
pub mod view;

pub use slot::{BoardAction, HistoryRecord, ParticipantLog, SharedSlot, UpdateRecord};
pub use store::BlackboardStore;
pub use view::{Blackboard, BlackboardSnapshot, BoardState};
