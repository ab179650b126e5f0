//! Throughput benchmarks for the TLS record engine and the credential
//! cache: harness-free (`harness = false`), timed with a local `bench!`
//! macro rather than a criterion-style harness.
//!
//! Run with: cargo bench

use std::hint::black_box;
use std::sync::Arc;
use std::time::Instant;

use echo_iocp::runtime::credential::CredentialProvider;

macro_rules! bench {
    ($name:expr, $iterations:expr, $code:block) => {{
        let start = Instant::now();
        for _ in 0..$iterations {
            black_box($code);
        }
        let elapsed = start.elapsed();
        let per_iter = elapsed / $iterations;
        println!(
            "{}: {} iterations in {:?} ({:?}/iter, {:.0} ops/sec)",
            $name,
            $iterations,
            elapsed,
            per_iter,
            $iterations as f64 / elapsed.as_secs_f64()
        );
        elapsed
    }};
}

/// Benchmarks the credential cache's already-resolved path: after the
/// first resolution, every subsequent `resolve()` for the same server
/// name should be a cheap `HashMap` lookup plus an `Arc` clone, not a
/// re-parse of the PEM pair.
fn bench_credential_cache_hit(cert_dir: &std::path::Path) {
    let provider = CredentialProvider::new(cert_dir);
    match provider.resolve("bench.invalid") {
        Ok(_) => {
            bench!("CredentialProvider::resolve (cache hit)", 10_000, {
                let _ = provider.resolve("bench.invalid").unwrap();
            });
        }
        Err(_) => {
            println!("Skipping credential cache benchmark: no bench.invalid.pem/.key in {cert_dir:?}");
        }
    }
}

fn main() {
    println!("==============================================");
    println!("  Completion-core benchmarks");
    println!("==============================================\n");

    let cert_dir = std::env::var("ECHO_IOCP_BENCH_CERT_DIR").unwrap_or_else(|_| "certs".to_string());
    bench_credential_cache_hit(std::path::Path::new(&cert_dir));

    // `Arc<[u8]>` construction is on the hot path of every plain-path
    // `on_received` -> `send` hop (see `runtime::handler::EchoHandler`).
    let sample = vec![0u8; 16 * 1024];
    bench!("Arc::<[u8]>::from(16 KiB)", 100_000, {
        let buf: Arc<[u8]> = Arc::from(sample.as_slice());
        buf
    });

    println!("\nBenchmarks complete.");
}
