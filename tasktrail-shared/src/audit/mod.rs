//! Audit pipeline, producer side
//!
//! - [`message`]: the queued [`message::AuditMessage`] and its conversion to a
//!   stored record
//! - [`dispatcher`]: bounded, non-blocking hand-off from request handlers to
//!   the queue
//!
//! The consumer side lives in the `tasktrail-worker` crate.

pub mod dispatcher;
pub mod message;

pub use dispatcher::{AuditDispatcher, DispatchStats, DispatcherConfig, DispatcherHandle};
pub use message::{AuditMessage, FieldChange, AUDITED_ENTITY};
