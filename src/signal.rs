//! Ctrl-C-driven graceful drain. Grounded on
//! `original_source/IocpServer/Main.cpp`'s `CtrlHandler`/`g_exit` pair: the
//! original sets a flag and sleeps five seconds inside the handler itself
//! (stalling the default terminate action); this re-expresses the same
//! "stop accepting, give in-flight work five seconds, then go" sequence as
//! an ordinary function the main thread drives, via the `ctrlc` crate
//! rather than `SetConsoleCtrlHandler`.

use std::sync::mpsc;
use std::time::{Duration, Instant};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Installs the process Ctrl-C handler and returns a receiver that yields
/// once, the moment the signal arrives.
pub fn install_handler() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        log::info!("terminating...");
        let _ = tx.send(());
    })
    .expect("failed to install Ctrl-C handler");
    rx
}

/// Blocks until `still_draining` reports zero in-flight connections or
/// `DRAIN_TIMEOUT` elapses, polling every `DRAIN_POLL_INTERVAL`.
pub fn drain(mut still_draining: impl FnMut() -> usize) {
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    loop {
        let remaining = still_draining();
        if remaining == 0 {
            return;
        }
        if Instant::now() >= deadline {
            log::warn!("drain timed out with {remaining} connection(s) still open");
            return;
        }
        std::thread::sleep(DRAIN_POLL_INTERVAL);
    }
}
