//! The completion-dispatch core: the Completion Queue and Tokens, the
//! Connection state machine, the TLS Engine, the Credential Provider, the
//! Handler Contract, the Worker Pool, and the Acceptor.

pub mod acceptor;
pub mod completion;
pub mod connection;
pub mod credential;
pub mod handler;
pub mod tls_engine;
pub mod worker_pool;
