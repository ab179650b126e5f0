//! Acceptor: accepts TCP sockets and instantiates a Connection per accept.
//! Grounded on `original_source/IocpServer/Main.cpp`'s accept loop, but
//! posted through the completion queue (`opcode::Accept`) instead of the
//! original's 20ms `accept()` poll — the same proactor style the rest of
//! the core already uses, and a closer match to the note in `Main.cpp`
//! itself that `WSAEventSelect`/async accept "is a better way".

use std::collections::HashMap;
use std::io;
use std::net::TcpListener;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use io_uring::{opcode, types};

use crate::runtime::completion::queue::CompletionQueue;
use crate::runtime::completion::token::{self, CompletionToken};
use crate::runtime::connection::Connection;
use crate::runtime::credential::CredentialProvider;
use crate::runtime::handler::{ConnectionHandler, EchoHandler};

pub struct Acceptor {
    listener: TcpListener,
    cq: Arc<CompletionQueue>,
    tls_enabled: bool,
    credential: Option<Arc<CredentialProvider>>,
    server_name: String,
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
    next_id: AtomicU64,
}

impl Acceptor {
    pub fn bind(
        port: u16,
        cq: Arc<CompletionQueue>,
        tls_enabled: bool,
        credential: Option<Arc<CredentialProvider>>,
        server_name: String,
    ) -> io::Result<Arc<Self>> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        Ok(Arc::new(Self {
            listener,
            cq,
            tls_enabled,
            credential,
            server_name,
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }))
    }

    pub fn start(self: &Arc<Self>) {
        self.post_accept();
    }

    /// Closes the listening socket; in-flight connections are unaffected.
    pub fn close(&self) {
        unsafe {
            libc::shutdown(self.listener.as_raw_fd(), libc::SHUT_RDWR);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    fn post_accept(self: &Arc<Self>) {
        let token: Box<dyn CompletionToken> = Box::new(token::AcceptToken {
            acceptor: Arc::clone(self),
        });
        let user_data = token::token_to_user_data(token);
        let entry = opcode::Accept::new(
            types::Fd(self.listener.as_raw_fd()),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
        .build()
        .user_data(user_data);
        if let Err(err) = unsafe { self.cq.submit_entry(entry) } {
            unsafe { token::drop_undelivered(user_data) };
            log::error!("failed to post accept: {err}");
        }
    }

    pub(crate) fn on_accept_completion(self: &Arc<Self>, result: i32) {
        if result < 0 {
            log::warn!("accept failed: {result}");
            self.post_accept();
            return;
        }

        let fd = result as RawFd;
        log::info!("accepted a connection");

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handler: Box<dyn ConnectionHandler> = Box::new(TrackingHandler {
            inner: Box::new(EchoHandler::new()),
            acceptor: Arc::clone(self),
            id,
        });
        let server_name = self.tls_enabled.then(|| self.server_name.clone());

        let conn = Connection::create(
            Arc::clone(&self.cq),
            fd,
            handler,
            self.tls_enabled,
            self.credential.clone(),
            server_name,
        );
        self.connections.lock().unwrap().insert(id, Arc::clone(&conn));
        if !conn.start() {
            log::error!("connection {id} was not in Init state at start()");
        }

        self.post_accept();
    }
}

/// Wraps the per-connection handler to remove the acceptor's table entry
/// once the connection reaches `Shutdown` — the Rust-native equivalent of
/// the original's rule that only `on_shutdown` may delete the Connection.
struct TrackingHandler {
    inner: Box<dyn ConnectionHandler>,
    acceptor: Arc<Acceptor>,
    id: u64,
}

impl ConnectionHandler for TrackingHandler {
    fn on_started(&self, conn: &Arc<Connection>) {
        self.inner.on_started(conn);
    }

    fn on_received(&self, conn: &Arc<Connection>, data: &[u8]) {
        self.inner.on_received(conn, data);
    }

    fn on_sent(&self, conn: &Arc<Connection>, buf: Arc<[u8]>, offset: usize, sent: usize) {
        self.inner.on_sent(conn, buf, offset, sent);
    }

    fn on_shutdown(&self, conn: &Arc<Connection>) {
        self.inner.on_shutdown(conn);
        self.acceptor.connections.lock().unwrap().remove(&self.id);
    }

    fn on_error(&self, conn: &Arc<Connection>) {
        self.inner.on_error(conn);
    }
}
