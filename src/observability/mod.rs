//! Observability for dropnote
//!
//! Structured JSON logging: one log line = one event.

pub mod logger;

pub use logger::{Logger, Severity};
