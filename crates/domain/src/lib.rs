//! Shared domain types for Baton.
//!
//! Baton drives phase-structured agent sessions: an orchestrating client
//! reports completed phases with result payloads, Baton decides the next
//! phase and keeps the session durable. This crate holds the vocabulary the
//! other crates speak: the session record and its phase machine types, the
//! error taxonomy, structured trace events, and the configuration tree.

pub mod config;
pub mod error;
pub mod session;
pub mod trace;

pub use error::{Error, Result};
pub use session::{Phase, Role, Session, SessionUpdate, TaskItem, TaskPriority, TaskStatus};
pub use trace::TraceEvent;
