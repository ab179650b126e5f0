//! Completion tokens: the polymorphic header the original attaches to each
//! in-flight operation by subclassing the platform overlapped type (see
//! `original_source/IocpServer/Event.h`'s `Event`/`IoEvent`/`ReceiveEvent`
//! family). Here the tag *is* the trait object: each operation allocates a
//! `Box<dyn CompletionToken>`, double-boxed so its address fits in the
//! ring's 64-bit `user_data`, and the worker that observes the completion
//! reconstitutes and consumes it exactly once.

use std::sync::Arc;

use crate::runtime::acceptor::Acceptor;
use crate::runtime::connection::Connection;

pub trait CompletionToken: Send {
    /// Re-enters the connection (or acceptor) with the completion result.
    /// Takes `self` by value so the token cannot outlive this one dispatch.
    fn run(self: Box<Self>, result: i32);
}

/// Encodes a token as a `user_data` value. The outer `Box` exists only to
/// make the pointer thin (trait objects are fat pointers and don't fit in
/// a `u64` on their own).
pub fn token_to_user_data(token: Box<dyn CompletionToken>) -> u64 {
    let boxed: Box<Box<dyn CompletionToken>> = Box::new(token);
    Box::into_raw(boxed) as u64
}

/// # Safety
/// `user_data` must be a value previously returned by `token_to_user_data`
/// and not yet decoded.
pub unsafe fn user_data_to_token(user_data: u64) -> Box<dyn CompletionToken> {
    let boxed = unsafe { Box::from_raw(user_data as *mut Box<dyn CompletionToken>) };
    *boxed
}

/// Reclaims a token whose operation never made it onto the ring (the
/// `submit_entry` call failed after the token was already encoded). Without
/// this, a failed post would leak the token — the same allocation
/// `user_data_to_token` would otherwise reclaim on a real completion.
///
/// # Safety
/// `user_data` must be a value previously returned by `token_to_user_data`
/// for an entry that was never successfully submitted, and not yet decoded.
pub unsafe fn drop_undelivered(user_data: u64) {
    drop(unsafe { user_data_to_token(user_data) });
}

pub struct ReceiveToken {
    pub conn: Arc<Connection>,
}

impl CompletionToken for ReceiveToken {
    fn run(self: Box<Self>, result: i32) {
        self.conn.on_receive_completion(result);
    }
}

pub struct SendToken {
    pub conn: Arc<Connection>,
    pub buf: Arc<[u8]>,
    pub offset: usize,
}

impl CompletionToken for SendToken {
    fn run(self: Box<Self>, result: i32) {
        self.conn.on_send_completion(self.buf, self.offset, result);
    }
}

pub struct HandshakeReceiveToken {
    pub conn: Arc<Connection>,
}

impl CompletionToken for HandshakeReceiveToken {
    fn run(self: Box<Self>, result: i32) {
        self.conn.on_handshake_receive_completion(result);
    }
}

/// Owns the engine-produced output token until the send that carries it
/// completes, freeing the engine-allocated output buffer only after the
/// send completes.
pub struct HandshakeSendToken {
    pub conn: Arc<Connection>,
    pub buf: Vec<u8>,
}

impl CompletionToken for HandshakeSendToken {
    fn run(self: Box<Self>, _result: i32) {
        self.conn.on_handshake_send_completion();
    }
}

pub struct TlsReceiveToken {
    pub conn: Arc<Connection>,
}

impl CompletionToken for TlsReceiveToken {
    fn run(self: Box<Self>, result: i32) {
        self.conn.on_tls_receive_completion(result);
    }
}

/// Carries the plaintext-range payload for a send: the user's
/// original plaintext buffer and offset, the slice actually staged this
/// record (`chunk`), and the record's on-wire length for short-write
/// detection. Also owns the encrypted record bytes until the send
/// completes.
pub struct TlsSendToken {
    pub conn: Arc<Connection>,
    pub plaintext_buf: Arc<[u8]>,
    pub plaintext_offset: usize,
    pub chunk: usize,
    pub wire_buf: Vec<u8>,
}

impl CompletionToken for TlsSendToken {
    fn run(self: Box<Self>, result: i32) {
        let on_wire_total = self.wire_buf.len();
        self.conn.on_tls_send_completion(
            result,
            self.plaintext_buf,
            self.plaintext_offset,
            self.chunk,
            on_wire_total,
        );
    }
}

pub struct AcceptToken {
    pub acceptor: Arc<Acceptor>,
}

impl CompletionToken for AcceptToken {
    fn run(self: Box<Self>, result: i32) {
        self.acceptor.on_accept_completion(result);
    }
}
