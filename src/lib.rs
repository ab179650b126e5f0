//! Completion-based TCP echo server core: a kernel-backed completion
//! queue, a per-connection state machine, and an optional TLS 1.2
//! record-layer engine driven from the same dispatch loop.

pub mod cli;
pub mod logging;
pub mod runtime;
pub mod signal;

pub use runtime::connection::Connection;
