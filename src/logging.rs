//! Leveled stderr logger.
//!
//! Mirrors the original server's `Log` class: a process-wide level filter,
//! `[LEVEL] [thread] message` formatting, one lock-guarded writer shared by
//! every worker thread. Wired into the `log` crate so the rest of the crate
//! uses `log::info!`/`log::warn!`/etc. instead of a bespoke macro set.

use std::io::Write;
use std::sync::Mutex;

use log::{LevelFilter, Log, Metadata, Record};

struct StderrLogger {
    out: Mutex<std::io::Stderr>,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tid = current_thread_id();
        let mut out = self.out.lock().unwrap();
        let _ = writeln!(out, "[{:<5}] [{}] {}", record.level(), tid, record.args());
    }

    fn flush(&self) {
        let mut out = self.out.lock().unwrap();
        let _ = out.flush();
    }
}

fn current_thread_id() -> u64 {
    // std::thread::ThreadId has no stable numeric accessor; libc gettid is the
    // same identifier the original Log class captured via GetCurrentThreadId.
    #[cfg(target_os = "linux")]
    {
        unsafe { libc::syscall(libc::SYS_gettid) as u64 }
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

static LOGGER: StderrLogger = StderrLogger {
    out: Mutex::new(std::io::stderr()),
};

/// Installs the global logger. `verbose` selects `Trace` (the original's
/// `Verbose`), otherwise `Info` is the default floor.
pub fn init(verbose: bool) {
    let filter = if verbose {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    };
    log::set_max_level(filter);
    if log::set_logger(&LOGGER).is_err() {
        // Already initialized (e.g. in tests); not an error worth surfacing.
    }
}
