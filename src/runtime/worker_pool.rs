//! Worker Pool: N threads draining the Completion Queue and invoking each
//! token's `run` entry. Grounded on `original_source/IocpServer/Main.cpp`'s
//! `iocp_worker` loop: pull one completion, treat the sentinel as "stop",
//! otherwise dispatch and go around again.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::runtime::completion::queue::CompletionQueue;
use crate::runtime::completion::token;

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(cq: Arc<CompletionQueue>, count: usize) -> Self {
        let handles = (0..count)
            .map(|i| {
                let cq = Arc::clone(&cq);
                thread::Builder::new()
                    .name(format!("cq-worker-{i}"))
                    .spawn(move || worker_loop(cq))
                    .expect("failed to spawn a completion worker thread")
            })
            .collect();
        Self { handles }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Posts one stop sentinel per worker, then joins them. `std::thread`
    /// has no bounded join; the caller's 5-second Ctrl-C drain already
    /// bounds total shutdown latency upstream of this call.
    pub fn shutdown(self, cq: &CompletionQueue) {
        if let Err(err) = cq.post_stop_sentinels(self.handles.len()) {
            log::warn!("failed to post worker stop sentinels: {err}");
        }
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(cq: Arc<CompletionQueue>) {
    loop {
        let completions = match cq.wait() {
            Ok(c) => c,
            Err(err) => {
                log::warn!("completion queue wait failed: {err}");
                break;
            }
        };

        let mut stop = false;
        for completion in completions {
            if completion.user_data == 0 {
                log::info!("worker is stopping...");
                stop = true;
                continue;
            }
            let token = unsafe { token::user_data_to_token(completion.user_data) };
            token.run(completion.result);
        }
        if stop {
            break;
        }
    }
}
