//! The Handler Contract: the five callbacks a Connection invokes, and the
//! echo application as the reference implementation
//! (`original_source/IocpServer/EchoServer.h`/`.cpp`).

use std::sync::Arc;

use crate::runtime::connection::Connection;

pub trait ConnectionHandler: Send + Sync {
    /// The connection is ready (post-handshake for TLS); typically posts
    /// the first `receive`.
    fn on_started(&self, conn: &Arc<Connection>);

    /// `data` is the plaintext delivered by this completion.
    fn on_received(&self, conn: &Arc<Connection>, data: &[u8]);

    /// `sent` of `buf[offset..]` was accepted by the transport. The handler
    /// resubmits the tail (`buf`, `offset + sent`) if `sent` fell short.
    fn on_sent(&self, conn: &Arc<Connection>, buf: Arc<[u8]>, offset: usize, sent: usize);

    /// Terminal. The handler owns the decision to drop its last reference
    /// to the connection here.
    fn on_shutdown(&self, conn: &Arc<Connection>);

    /// Fatal session error; the handler is expected to call `shutdown()`.
    fn on_error(&self, conn: &Arc<Connection>);
}

/// Reference handler: echoes every received segment back to the peer,
/// re-arming a receive once a send fully drains.
#[derive(Default)]
pub struct EchoHandler;

impl EchoHandler {
    pub fn new() -> Self {
        Self
    }
}

impl ConnectionHandler for EchoHandler {
    fn on_started(&self, conn: &Arc<Connection>) {
        if !conn.receive() {
            conn.shutdown();
        }
    }

    fn on_received(&self, conn: &Arc<Connection>, data: &[u8]) {
        let buf: Arc<[u8]> = Arc::from(data);
        if !conn.send(buf, 0) {
            conn.shutdown();
        }
    }

    fn on_sent(&self, conn: &Arc<Connection>, buf: Arc<[u8]>, offset: usize, sent: usize) {
        let submitted = buf.len() - offset;
        let posted = if sent < submitted {
            conn.send(buf, offset + sent)
        } else {
            conn.receive()
        };
        if !posted {
            conn.shutdown();
        }
    }

    fn on_shutdown(&self, _conn: &Arc<Connection>) {
        log::info!("connection shut down");
    }

    fn on_error(&self, conn: &Arc<Connection>) {
        log::warn!("connection error");
        conn.shutdown();
    }
}
