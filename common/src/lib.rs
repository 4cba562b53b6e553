//! Shared types and helpers used by both `server` and `client`: the process-wide `CONFIG`,
//! the `CommonError` umbrella, and the wire DTOs that mirror `protocol`'s internal types for
//! JSON transport.

pub mod config;
pub mod error;
pub mod message;
pub mod wire;

pub use config::CONFIG;
