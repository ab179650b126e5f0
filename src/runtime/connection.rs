//! The Connection: owner of the socket, the state machine, the TLS context,
//! and the receive/send staging buffers. Grounded on
//! `original_source/IocpServer/ServerSocket.h`/`.cpp` for the plain-path
//! lifecycle and `original_source/SecureSocket/SecureSocket.cpp` for the
//! TLS handshake/record handling this re-expresses over `rustls`
//! (`runtime::tls_engine::TlsEngine`).
//!
//! Rust-native realization of the original's single-writer invariants: the
//! C++ original relies on the at-most-one-inflight-per-direction discipline to
//! skip locking `rx_buf`/`tx_buf`/`tls_ctx`/`state` entirely. Rust can't
//! take that on faith — the compiler needs `Send + Sync` proof — so those
//! fields live behind a `Mutex<ConnectionInner>` here. The atomic
//! `rx_inflight`/`tx_inflight` guards remain the actual concurrency
//! discipline; the mutex exists purely for soundness and is expected to be
//! uncontended.
//!
//! The user-facing receive/send buffers are plain Rust values (`&[u8]` in
//! callbacks, `Arc<[u8]>` for outbound data) rather than raw `(ptr, cap)`
//! pairs, since nothing here needs to cross an FFI boundary the way the
//! original's `SecBuffer` arrays do.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use io_uring::{opcode, types};

use crate::runtime::completion::queue::CompletionQueue;
use crate::runtime::completion::token::{self, CompletionToken};
use crate::runtime::credential::CredentialProvider;
use crate::runtime::handler::ConnectionHandler;
use crate::runtime::tls_engine::{AcceptStepStatus, DecryptStatus, TlsEngine};

const RX_BUF_INITIAL: usize = 16 * 1024;
const USER_BUF_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Handshake,
    Started,
    Shutdown,
}

struct ConnectionInner {
    state: State,
    /// Ciphertext / handshake-token accumulator. `rx_used` bytes at the
    /// front are valid; the rest is spare capacity.
    rx_buf: Vec<u8>,
    rx_used: usize,
    /// Reused destination buffer for plain-path receives.
    user_rx_buf: Vec<u8>,
    tls: Option<TlsEngine>,
    stream_sizes: Option<crate::runtime::tls_engine::StreamSizes>,
}

pub struct Connection {
    fd: RawFd,
    cq: Arc<CompletionQueue>,
    handler: Box<dyn ConnectionHandler>,
    tls_enabled: bool,
    credential: Option<Arc<CredentialProvider>>,
    server_name: Option<String>,
    inner: Mutex<ConnectionInner>,
    rx_inflight: AtomicBool,
    tx_inflight: AtomicBool,
}

impl Connection {
    /// Registers `fd` with the completion queue and returns a new
    /// Connection in `Init`.
    pub fn create(
        cq: Arc<CompletionQueue>,
        fd: RawFd,
        handler: Box<dyn ConnectionHandler>,
        tls_enabled: bool,
        credential: Option<Arc<CredentialProvider>>,
        server_name: Option<String>,
    ) -> Arc<Connection> {
        Arc::new(Connection {
            fd,
            cq,
            handler,
            tls_enabled,
            credential,
            server_name,
            inner: Mutex::new(ConnectionInner {
                state: State::Init,
                rx_buf: vec![0u8; RX_BUF_INITIAL],
                rx_used: 0,
                user_rx_buf: vec![0u8; USER_BUF_SIZE],
                tls: None,
                stream_sizes: None,
            }),
            rx_inflight: AtomicBool::new(false),
            tx_inflight: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> State {
        self.inner.lock().unwrap().state
    }

    pub fn is_shutdown(&self) -> bool {
        self.state() == State::Shutdown
    }

    /// `Init -> Started` (plain) or `Init -> Handshake` (TLS, posts the
    /// first handshake receive). Returns `false` if the connection was not
    /// in `Init` (the synchronous-rejection signal
    /// `original_source/IocpServer/ServerSocket.h`'s `Start` returns).
    pub fn start(self: &Arc<Self>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != State::Init {
            return false;
        }
        if !self.tls_enabled {
            inner.state = State::Started;
            drop(inner);
            self.handler.on_started(self);
            return true;
        }

        inner.state = State::Handshake;
        drop(inner);

        let credential = self
            .credential
            .clone()
            .expect("tls_enabled connection requires a credential provider");
        let server_name = self
            .server_name
            .clone()
            .unwrap_or_else(|| "localhost".to_string());

        let engine = credential
            .resolve(&server_name)
            .and_then(TlsEngine::new);
        match engine {
            Ok(engine) => {
                self.inner.lock().unwrap().tls = Some(engine);
                self.post_handshake_receive();
            }
            Err(err) => {
                log::error!("failed to acquire TLS credential for {server_name}: {err}");
                self.handler.on_error(self);
            }
        }
        true
    }

    /// Idempotent. If a TLS session was established, makes one best-effort,
    /// non-blocking attempt to write a `close_notify` alert (no wait for the
    /// peer's answering alert), then closes the socket and invokes
    /// `on_shutdown` exactly once, from whatever pre-`Shutdown` state the
    /// connection was in.
    pub fn shutdown(self: &Arc<Self>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == State::Shutdown {
            return false;
        }
        let was_established = inner.state == State::Started && self.tls_enabled;
        inner.state = State::Shutdown;
        let close_notify = if was_established {
            inner.tls.as_mut().and_then(|tls| tls.close_notify().ok())
        } else {
            None
        };
        drop(inner);
        if let Some(record) = close_notify {
            if !record.is_empty() {
                unsafe {
                    libc::send(
                        self.fd,
                        record.as_ptr() as *const _,
                        record.len(),
                        libc::MSG_NOSIGNAL | libc::MSG_DONTWAIT,
                    );
                }
            }
        }
        unsafe {
            libc::shutdown(self.fd, libc::SHUT_RDWR);
            libc::close(self.fd);
        }
        self.handler.on_shutdown(self);
        true
    }

    // ---- plain / TLS receive ------------------------------------------------

    /// Returns `false` if the connection was not in a state that can
    /// receive, or if the post itself failed synchronously (the caller is
    /// still notified through `on_error` in the latter case).
    pub fn receive(self: &Arc<Self>) -> bool {
        if self.tls_enabled {
            return self.tls_receive();
        }
        if self.state() != State::Started {
            return false;
        }
        if self.rx_inflight.swap(true, Ordering::AcqRel) {
            panic!("concurrent receive on the same connection");
        }
        let (ptr, len) = {
            let inner = self.inner.lock().unwrap();
            (inner.user_rx_buf.as_ptr() as *mut u8, inner.user_rx_buf.len())
        };
        let token: Box<dyn CompletionToken> = Box::new(token::ReceiveToken {
            conn: Arc::clone(self),
        });
        let user_data = token::token_to_user_data(token);
        let entry = opcode::Read::new(types::Fd(self.fd), ptr, len as u32)
            .build()
            .user_data(user_data);
        if let Err(err) = unsafe { self.cq.submit_entry(entry) } {
            unsafe { token::drop_undelivered(user_data) };
            self.rx_inflight.store(false, Ordering::Release);
            log::error!("failed to post receive: {err}");
            self.handler.on_error(self);
            return false;
        }
        true
    }

    pub(crate) fn on_receive_completion(self: &Arc<Self>, bytes_transferred: i32) {
        self.rx_inflight.store(false, Ordering::Release);
        if bytes_transferred < 0 {
            log::warn!("receive failed: {bytes_transferred}");
            self.handler.on_error(self);
            return;
        }
        if bytes_transferred == 0 {
            self.shutdown();
            return;
        }
        let n = bytes_transferred as usize;
        let data = {
            let inner = self.inner.lock().unwrap();
            inner.user_rx_buf[..n].to_vec()
        };
        self.handler.on_received(self, &data);
    }

    // ---- plain / TLS send ----------------------------------------------------

    pub fn send(self: &Arc<Self>, data: Arc<[u8]>, offset: usize) -> bool {
        if self.tls_enabled {
            return self.tls_send(data, offset);
        }
        if self.state() != State::Started {
            return false;
        }
        if self.tx_inflight.swap(true, Ordering::AcqRel) {
            panic!("concurrent send on the same connection");
        }
        let slice = &data[offset..];
        let ptr = slice.as_ptr();
        let len = slice.len();
        let token: Box<dyn CompletionToken> = Box::new(token::SendToken {
            conn: Arc::clone(self),
            buf: Arc::clone(&data),
            offset,
        });
        let user_data = token::token_to_user_data(token);
        let entry = opcode::Write::new(types::Fd(self.fd), ptr, len as u32)
            .build()
            .user_data(user_data);
        if let Err(err) = unsafe { self.cq.submit_entry(entry) } {
            unsafe { token::drop_undelivered(user_data) };
            self.tx_inflight.store(false, Ordering::Release);
            log::error!("failed to post send: {err}");
            self.handler.on_error(self);
            return false;
        }
        true
    }

    pub(crate) fn on_send_completion(self: &Arc<Self>, buf: Arc<[u8]>, offset: usize, bytes_transferred: i32) {
        self.tx_inflight.store(false, Ordering::Release);
        if bytes_transferred < 0 {
            log::warn!("send failed: {bytes_transferred}");
            self.handler.on_error(self);
            return;
        }
        let sent = bytes_transferred as usize;
        self.handler.on_sent(self, buf, offset, sent);
    }

    // ---- TLS handshake --------------------------------------------------------

    fn post_handshake_receive(self: &Arc<Self>) {
        let (ptr, len) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.rx_used == inner.rx_buf.len() {
                let new_len = inner.rx_buf.len() * 2;
                inner.rx_buf.resize(new_len, 0);
            }
            let ptr = unsafe { inner.rx_buf.as_mut_ptr().add(inner.rx_used) };
            let len = inner.rx_buf.len() - inner.rx_used;
            (ptr, len)
        };
        let token: Box<dyn CompletionToken> = Box::new(token::HandshakeReceiveToken {
            conn: Arc::clone(self),
        });
        let user_data = token::token_to_user_data(token);
        let entry = opcode::Read::new(types::Fd(self.fd), ptr, len as u32)
            .build()
            .user_data(user_data);
        if let Err(err) = unsafe { self.cq.submit_entry(entry) } {
            unsafe { token::drop_undelivered(user_data) };
            log::error!("failed to post handshake receive: {err}");
            self.handler.on_error(self);
        }
    }

    fn post_handshake_send(self: &Arc<Self>, output: Vec<u8>) -> bool {
        let token = Box::new(token::HandshakeSendToken {
            conn: Arc::clone(self),
            buf: output,
        });
        let ptr = token.buf.as_ptr();
        let len = token.buf.len();
        let token: Box<dyn CompletionToken> = token;
        let user_data = token::token_to_user_data(token);
        let entry = opcode::Write::new(types::Fd(self.fd), ptr, len as u32)
            .build()
            .user_data(user_data);
        match unsafe { self.cq.submit_entry(entry) } {
            Ok(()) => true,
            Err(err) => {
                unsafe { token::drop_undelivered(user_data) };
                log::error!("failed to post handshake send: {err}");
                false
            }
        }
    }

    pub(crate) fn on_handshake_send_completion(self: &Arc<Self>) {
        // Single-shot by construction; the token (and its buffer) is
        // dropped once `run()` returns.
    }

    pub(crate) fn on_handshake_receive_completion(self: &Arc<Self>, bytes_transferred: i32) {
        if bytes_transferred < 0 {
            log::warn!("handshake receive failed: {bytes_transferred}");
            self.handler.on_error(self);
            return;
        }
        if bytes_transferred == 0 {
            self.shutdown();
            return;
        }
        let n = bytes_transferred as usize;

        let step = {
            let mut inner = self.inner.lock().unwrap();
            inner.rx_used += n;
            let ConnectionInner { rx_buf, rx_used, tls, .. } = &mut *inner;
            let engine = tls.as_mut().expect("handshake completion without a TLS engine");
            engine.accept_step(&rx_buf[..*rx_used])
        };
        let (status, output) = match step {
            Ok(r) => r,
            Err(err) => {
                log::error!("TLS accept_step failed: {err}");
                self.handler.on_error(self);
                return;
            }
        };

        if !output.is_empty() && !self.post_handshake_send(output) {
            self.handler.on_error(self);
            return;
        }

        match status {
            AcceptStepStatus::IncompleteMessage => {
                self.post_handshake_receive();
            }
            AcceptStepStatus::ContinueNeeded { extra } => {
                if extra.is_some() {
                    // Pipelined application data arriving mid-handshake: reject
                    // rather than buffer it ahead of the handshake completing.
                    log::error!("unexpected pipelined bytes mid-handshake");
                    self.handler.on_error(self);
                    return;
                }
                self.inner.lock().unwrap().rx_used = 0;
                self.post_handshake_receive();
            }
            AcceptStepStatus::Ok { extra } => {
                {
                    let mut inner = self.inner.lock().unwrap();
                    if let Some(extra_len) = extra {
                        let total = inner.rx_used;
                        let start = total - extra_len;
                        inner.rx_buf.copy_within(start..total, 0);
                        inner.rx_used = extra_len;
                    } else {
                        inner.rx_used = 0;
                    }
                    let sizes = inner.tls.as_ref().unwrap().query_stream_sizes();
                    inner.stream_sizes = Some(sizes);
                    inner.state = State::Started;
                }
                self.handler.on_started(self);
            }
            AcceptStepStatus::Error => {
                self.handler.on_error(self);
            }
        }
    }

    // ---- TLS application receive ---------------------------------------------

    fn tls_receive(self: &Arc<Self>) -> bool {
        if self.state() != State::Started {
            return false;
        }
        let rx_used = self.inner.lock().unwrap().rx_used;
        if rx_used > 0 {
            self.tls_do_receive(0);
        } else {
            if self.rx_inflight.swap(true, Ordering::AcqRel) {
                panic!("concurrent receive on the same connection");
            }
            self.post_tls_receive();
        }
        true
    }

    fn post_tls_receive(self: &Arc<Self>) {
        let (ptr, len) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.rx_used == inner.rx_buf.len() {
                let new_len = inner.rx_buf.len() * 2;
                inner.rx_buf.resize(new_len, 0);
            }
            let ptr = unsafe { inner.rx_buf.as_mut_ptr().add(inner.rx_used) };
            let len = inner.rx_buf.len() - inner.rx_used;
            (ptr, len)
        };
        let token: Box<dyn CompletionToken> = Box::new(token::TlsReceiveToken {
            conn: Arc::clone(self),
        });
        let user_data = token::token_to_user_data(token);
        let entry = opcode::Read::new(types::Fd(self.fd), ptr, len as u32)
            .build()
            .user_data(user_data);
        if let Err(err) = unsafe { self.cq.submit_entry(entry) } {
            unsafe { token::drop_undelivered(user_data) };
            self.rx_inflight.store(false, Ordering::Release);
            log::error!("failed to post TLS receive: {err}");
            self.handler.on_error(self);
        }
    }

    pub(crate) fn on_tls_receive_completion(self: &Arc<Self>, bytes_transferred: i32) {
        if bytes_transferred < 0 {
            self.rx_inflight.store(false, Ordering::Release);
            log::warn!("TLS receive failed: {bytes_transferred}");
            self.handler.on_error(self);
            return;
        }
        if bytes_transferred == 0 {
            self.rx_inflight.store(false, Ordering::Release);
            self.shutdown();
            return;
        }
        self.tls_do_receive(bytes_transferred as usize);
    }

    fn tls_do_receive(self: &Arc<Self>, received: usize) {
        self.rx_inflight.store(false, Ordering::Release);

        let mut user_out = vec![0u8; USER_BUF_SIZE];
        let result = {
            let mut inner = self.inner.lock().unwrap();
            inner.rx_used += received;
            let ConnectionInner { rx_buf, rx_used, tls, .. } = &mut *inner;
            let engine = tls.as_mut().expect("TLS receive completion without an engine");
            engine.decrypt_record(&rx_buf[..*rx_used], &mut user_out)
        };

        let status = match result {
            Ok(s) => s,
            Err(err) => {
                log::error!("TLS decrypt_record failed: {err}");
                self.handler.on_error(self);
                return;
            }
        };

        match status {
            DecryptStatus::IncompleteMessage => {
                // Forced continuation: bypass the "have buffered bytes"
                // shortcut in `tls_receive`.
                self.rx_inflight.store(true, Ordering::Release);
                self.post_tls_receive();
            }
            DecryptStatus::ContextExpired | DecryptStatus::Renegotiate => {
                self.shutdown();
            }
            DecryptStatus::Error => {
                self.handler.on_error(self);
            }
            DecryptStatus::Ok { plaintext_len, extra } => {
                {
                    let mut inner = self.inner.lock().unwrap();
                    if let Some(extra_len) = extra {
                        let total = inner.rx_used;
                        let start = total - extra_len;
                        inner.rx_buf.copy_within(start..total, 0);
                        inner.rx_used = extra_len;
                    } else {
                        inner.rx_used = 0;
                    }
                }
                self.handler.on_received(self, &user_out[..plaintext_len]);
                self.drain_additional_plaintext();
            }
        }
    }

    /// A single TCP segment can carry more than one TLS record; `rustls`
    /// decodes all of them into its internal plaintext buffer in one
    /// `process_new_packets` call, but `decrypt_record` only drains the
    /// first `reader().read()` chunk. Keep calling `on_received` for
    /// whatever is left until the engine reports nothing more is buffered,
    /// so no already-decoded record is silently dropped or delayed until
    /// the next socket read.
    fn drain_additional_plaintext(self: &Arc<Self>) {
        loop {
            let mut user_out = vec![0u8; USER_BUF_SIZE];
            let read = {
                let mut inner = self.inner.lock().unwrap();
                let engine = inner.tls.as_mut().expect("plaintext drain without a TLS engine");
                engine.read_additional_plaintext(&mut user_out)
            };
            match read {
                Ok(Some(n)) => self.handler.on_received(self, &user_out[..n]),
                Ok(None) => break,
                Err(err) => {
                    log::error!("TLS read_additional_plaintext failed: {err}");
                    self.handler.on_error(self);
                    break;
                }
            }
        }
    }

    // ---- TLS application send --------------------------------------------------

    fn tls_send(self: &Arc<Self>, data: Arc<[u8]>, offset: usize) -> bool {
        if self.state() != State::Started {
            return false;
        }
        let max_payload = {
            let inner = self.inner.lock().unwrap();
            let sizes = inner
                .stream_sizes
                .expect("TLS send attempted before handshake completion");
            sizes
                .max_message
                .saturating_sub(sizes.header)
                .saturating_sub(sizes.trailer)
        };

        let remaining = &data[offset..];
        let chunk = remaining.len().min(max_payload);
        let plaintext = &remaining[..chunk];

        let encrypted = {
            let mut inner = self.inner.lock().unwrap();
            let engine = inner.tls.as_mut().expect("TLS send without an engine");
            match engine.encrypt_record(plaintext) {
                Ok(bytes) => bytes,
                Err(err) => {
                    drop(inner);
                    log::error!("TLS encrypt_record failed: {err}");
                    self.handler.on_error(self);
                    return false;
                }
            }
        };

        if self.tx_inflight.swap(true, Ordering::AcqRel) {
            panic!("concurrent send on the same connection");
        }

        let token = Box::new(token::TlsSendToken {
            conn: Arc::clone(self),
            plaintext_buf: data,
            plaintext_offset: offset,
            chunk,
            wire_buf: encrypted,
        });
        let ptr = token.wire_buf.as_ptr();
        let len = token.wire_buf.len();
        let token: Box<dyn CompletionToken> = token;
        let user_data = token::token_to_user_data(token);
        let entry = opcode::Write::new(types::Fd(self.fd), ptr, len as u32)
            .build()
            .user_data(user_data);
        if let Err(err) = unsafe { self.cq.submit_entry(entry) } {
            unsafe { token::drop_undelivered(user_data) };
            self.tx_inflight.store(false, Ordering::Release);
            log::error!("failed to post TLS send: {err}");
            self.handler.on_error(self);
            return false;
        }
        true
    }

    pub(crate) fn on_tls_send_completion(
        self: &Arc<Self>,
        bytes_transferred: i32,
        plaintext_buf: Arc<[u8]>,
        plaintext_offset: usize,
        chunk: usize,
        on_wire_total: usize,
    ) {
        self.tx_inflight.store(false, Ordering::Release);
        if bytes_transferred < 0 {
            log::warn!("TLS send failed: {bytes_transferred}");
            self.handler.on_error(self);
            return;
        }
        let written = bytes_transferred as usize;
        if written != on_wire_total {
            log::error!("short write on a TLS record ({written}/{on_wire_total}); session desynchronised");
            self.handler.on_error(self);
            return;
        }
        self.handler.on_sent(self, plaintext_buf, plaintext_offset, chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::handler::EchoHandler;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn test_cq() -> Arc<CompletionQueue> {
        Arc::new(CompletionQueue::new().expect("io_uring unavailable in test sandbox"))
    }

    /// `shutdown()` must be idempotent and must invoke `on_shutdown` exactly
    /// once even if called twice in a row.
    #[test]
    fn shutdown_is_idempotent() {
        struct CountingHandler(Arc<AtomicUsize>);
        impl ConnectionHandler for CountingHandler {
            fn on_started(&self, _conn: &Arc<Connection>) {}
            fn on_received(&self, _conn: &Arc<Connection>, _data: &[u8]) {}
            fn on_sent(&self, _conn: &Arc<Connection>, _buf: Arc<[u8]>, _offset: usize, _sent: usize) {}
            fn on_shutdown(&self, _conn: &Arc<Connection>) {
                self.0.fetch_add(1, AtomicOrdering::SeqCst);
            }
            fn on_error(&self, _conn: &Arc<Connection>) {}
        }

        let count = Arc::new(AtomicUsize::new(0));
        let (a, b) = unsafe {
            let mut fds = [0i32; 2];
            libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr());
            (fds[0], fds[1])
        };
        let _ = b;
        let conn = Connection::create(
            test_cq(),
            a,
            Box::new(CountingHandler(Arc::clone(&count))),
            false,
            None,
            None,
        );
        conn.start();
        conn.shutdown();
        conn.shutdown();
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
        assert!(conn.is_shutdown());
    }

    #[test]
    fn starts_in_started_state_when_plain() {
        let (a, b) = unsafe {
            let mut fds = [0i32; 2];
            libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr());
            (fds[0], fds[1])
        };
        let _ = b;
        let conn = Connection::create(test_cq(), a, Box::new(EchoHandler::new()), false, None, None);
        assert_eq!(conn.state(), State::Init);
        conn.start();
        assert_eq!(conn.state(), State::Started);
        conn.shutdown();
    }

    /// Drains and dispatches every completion currently (or imminently)
    /// queued, stopping as soon as nothing new shows up within a short
    /// window — a single-threaded stand-in for `worker_pool::worker_loop`
    /// sized for test use.
    fn pump(cq: &CompletionQueue, rounds: usize) {
        for _ in 0..rounds {
            let completions = cq.wait().expect("completion queue wait failed");
            for completion in completions {
                if completion.user_data == 0 {
                    continue;
                }
                let token = unsafe { token::user_data_to_token(completion.user_data) };
                token.run(completion.result);
            }
        }
    }

    /// Echo identity (plain path): a short message submitted by the
    /// peer comes back byte-for-byte once `on_started` -> `on_received` ->
    /// `on_sent` -> re-armed `receive` runs its course.
    #[test]
    fn echo_round_trip_over_socketpair() {
        use std::io::{Read, Write};
        use std::os::unix::io::FromRawFd;

        let (a, mut b) = unsafe {
            let mut fds = [0i32; 2];
            assert_eq!(
                libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()),
                0
            );
            (fds[0], std::os::unix::net::UnixStream::from_raw_fd(fds[1]))
        };

        let cq = test_cq();
        let conn = Connection::create(Arc::clone(&cq), a, Box::new(EchoHandler::new()), false, None, None);
        conn.start(); // posts the first receive

        b.write_all(b"hello").unwrap();
        pump(&cq, 1); // delivers the receive -> on_received -> send posted
        pump(&cq, 1); // delivers the send -> on_sent -> receive re-armed

        let mut out = [0u8; 5];
        b.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"hello");

        conn.shutdown();
    }

    /// Plain close: a peer that connects and closes
    /// without sending data yields exactly one `on_shutdown` and no
    /// `on_received`.
    #[test]
    fn peer_close_with_no_data_only_shuts_down() {
        use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

        struct CountingHandler {
            received: Arc<AtomicUsize>,
            shutdowns: Arc<AtomicUsize>,
        }
        impl ConnectionHandler for CountingHandler {
            fn on_started(&self, conn: &Arc<Connection>) {
                conn.receive();
            }
            fn on_received(&self, _conn: &Arc<Connection>, _data: &[u8]) {
                self.received.fetch_add(1, AtomicOrdering::SeqCst);
            }
            fn on_sent(&self, _conn: &Arc<Connection>, _buf: Arc<[u8]>, _offset: usize, _sent: usize) {}
            fn on_shutdown(&self, _conn: &Arc<Connection>) {
                self.shutdowns.fetch_add(1, AtomicOrdering::SeqCst);
            }
            fn on_error(&self, _conn: &Arc<Connection>) {}
        }

        let (a, b) = unsafe {
            let mut fds = [0i32; 2];
            assert_eq!(
                libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()),
                0
            );
            (fds[0], fds[1])
        };

        let received = Arc::new(AtomicUsize::new(0));
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let cq = test_cq();
        let conn = Connection::create(
            Arc::clone(&cq),
            a,
            Box::new(CountingHandler {
                received: Arc::clone(&received),
                shutdowns: Arc::clone(&shutdowns),
            }),
            false,
            None,
            None,
        );
        conn.start();

        unsafe {
            libc::close(b);
        }
        pump(&cq, 1); // delivers the zero-byte receive -> shutdown

        assert_eq!(received.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(shutdowns.load(AtomicOrdering::SeqCst), 1);
        assert!(conn.is_shutdown());
    }
}
