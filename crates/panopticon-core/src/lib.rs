//! # panopticon-core
//!
//! Core types for the Panopticon chat relay:
//! - Roles and the capability checks every handler goes through
//! - Identity snapshots resolved at handshake time
//! - Direct messages and their one-way soft-delete state
//! - Append-only audit entries
//!
//! This crate has no network code and no storage code.
//! The relay and its stores build on it.

pub mod audit;
pub mod error;
pub mod identity;
pub mod message;
pub mod role;

pub use audit::{ActionType, AuditEntry, AuditRecord, Severity};
pub use error::{Error, Result};
pub use identity::{AccountSummary, Identity, UserId, parse_id};
pub use message::{Message, MessageId, MessageRecord};
pub use role::Role;
