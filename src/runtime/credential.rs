//! Credential Provider.
//!
//! Stands in for the original's certificate-store lookup
//! (`original_source/SecureSocket/SecureSocket.cpp`'s `create_server_cred`,
//! which calls `AcquireCredentialsHandle` against the Windows "My" store by
//! subject-string match). Here the store is a local directory of PEM pairs,
//! matched by exact server name — no wildcard or SAN matching. Resolved
//! credentials are cached process-wide and never mutated after creation:
//! process-global, created on demand per server name.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;

static CACHE: OnceLock<Mutex<HashMap<String, Arc<ServerConfig>>>> = OnceLock::new();

pub struct CredentialProvider {
    store_dir: PathBuf,
}

impl CredentialProvider {
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
        }
    }

    /// Resolves `server_name` to a reusable TLS 1.2 server credential,
    /// loading `<server_name>.pem`/`<server_name>.key` from the store
    /// directory on first use and caching the result thereafter.
    pub fn resolve(&self, server_name: &str) -> io::Result<Arc<ServerConfig>> {
        let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
        if let Some(cfg) = cache.lock().unwrap().get(server_name) {
            return Ok(Arc::clone(cfg));
        }
        let cfg = Arc::new(self.load(server_name)?);
        cache
            .lock()
            .unwrap()
            .entry(server_name.to_string())
            .or_insert_with(|| Arc::clone(&cfg));
        Ok(cfg)
    }

    fn load(&self, server_name: &str) -> io::Result<ServerConfig> {
        let cert_path = self.store_dir.join(format!("{server_name}.pem"));
        let key_path = self.store_dir.join(format!("{server_name}.key"));
        let certs = load_certs(&cert_path)?;
        let key = load_key(&key_path)?;

        // SP_PROT_TLS1_2_SERVER + SCH_USE_STRONG_CRYPTO: restrict to TLS 1.2
        // and the crate's already-curated strong cipher suite list.
        ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS12])
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let file = fs::File::open(path)?;
    let mut reader = io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()
}

fn load_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    let file = fs::File::open(path)?;
    let mut reader = io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key in credential file"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_missing_store_fails_cleanly() {
        let provider = CredentialProvider::new("/nonexistent/credential/store");
        assert!(provider.resolve("example.invalid").is_err());
    }
}
