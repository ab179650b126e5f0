//! Process entry point. Wires together the completion queue, the worker
//! pool, the (optional) TLS credential provider, the acceptor, and the
//! Ctrl-C-driven drain sequence. Grounded on
//! `original_source/IocpServer/Main.cpp`'s `main`: create the completion
//! port, spawn workers, bind the listening socket, install the Ctrl-C
//! handler, run until signaled, then tear down in reverse order.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use echo_iocp::cli;
use echo_iocp::logging;
use echo_iocp::runtime::acceptor::Acceptor;
use echo_iocp::runtime::completion::queue::CompletionQueue;
use echo_iocp::runtime::credential::CredentialProvider;
use echo_iocp::runtime::worker_pool::WorkerPool;
use echo_iocp::signal;

const DEFAULT_PORT: u16 = 27015;
const MAX_WORKERS: usize = 64;
const CREDENTIAL_STORE_DIR: &str = "certs";
const SERVER_NAME: &str = "localhost";

fn main() -> ExitCode {
    let opts = match cli::parse(env::args().skip(1)) {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("{err}");
            eprintln!("usage: server [-t] [-v]");
            return ExitCode::FAILURE;
        }
    };

    logging::init(opts.verbose);

    let credential = if opts.tls {
        let provider = Arc::new(CredentialProvider::new(CREDENTIAL_STORE_DIR));
        if let Err(err) = provider.resolve(SERVER_NAME) {
            log::error!("failed to acquire TLS credential for {SERVER_NAME}: {err}");
            return ExitCode::FAILURE;
        }
        Some(provider)
    } else {
        None
    };

    let cq = match CompletionQueue::new() {
        Ok(cq) => Arc::new(cq),
        Err(err) => {
            log::error!("failed to create the completion queue: {err}");
            return ExitCode::FAILURE;
        }
    };

    let worker_count = worker_count();
    let workers = WorkerPool::spawn(Arc::clone(&cq), worker_count);
    log::info!("spawned {worker_count} completion workers");

    let acceptor = match Acceptor::bind(
        DEFAULT_PORT,
        Arc::clone(&cq),
        opts.tls,
        credential,
        SERVER_NAME.to_string(),
    ) {
        Ok(acceptor) => acceptor,
        Err(err) => {
            log::error!("failed to bind port {DEFAULT_PORT}: {err}");
            workers.shutdown(&cq);
            return ExitCode::FAILURE;
        }
    };
    acceptor.start();
    log::info!("listening on port {DEFAULT_PORT} (tls={})", opts.tls);

    let signal_rx = signal::install_handler();
    let _ = signal_rx.recv();

    log::info!("shutting down the listening socket...");
    acceptor.close();
    signal::drain(|| acceptor.connection_count());

    log::info!("stopping completion workers...");
    workers.shutdown(&cq);

    ExitCode::SUCCESS
}

/// `2 * cores`, capped at `MAX_WORKERS`, mirroring
/// `create_iocp_workers`'s `GetSystemInfo`-derived worker count.
fn worker_count() -> usize {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    (cores * 2).min(MAX_WORKERS)
}
