//! Message hub — registry, routing, broadcast and negotiation.
//!
//! The hub is the only channel units use to talk to each other directly.
//! It owns a registry of [`UnitHandle`]s keyed by unit name and an
//! append-only log of every [`Message`] it has seen.
//!
//! # Fail-soft routing
//!
//! A send never fails from the sender's point of view. Unknown receivers,
//! missing handlers, handler errors, panics and timeouts all come back as
//! `None` and are logged. One misbehaving unit cannot take the bus down.
//!
//! # Locking
//!
//! The registry and the log each sit behind a `parking_lot::Mutex`. Neither
//! lock is held while a handler runs, so handlers may send further messages
//! through the same hub.

pub mod bus;
pub mod handler;
pub mod message;
pub mod negotiation;

pub use bus::{BroadcastReply, Hub, HubConfig};
pub use handler::{handler_fn, FnHandler, MessageHandler, UnitHandle};
pub use message::{Message, MessageKind};
pub use negotiation::{NegotiationOutcome, NegotiationRound, ParticipantResponse};

use thiserror::Error;

/// Registry errors. Routing problems are never errors; see [`Hub::send`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// A unit with this name is already registered.
    #[error("unit already registered: {0}")]
    AlreadyRegistered(String),

    /// No unit with this name is registered.
    #[error("unknown unit: {0}")]
    UnknownUnit(String),
}
