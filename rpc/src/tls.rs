//! rustls server configuration requiring client certificates.
//!
//! Failure to load any of the files is fatal at startup: the server never
//! falls back to plain HTTP on its own.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::server::AllowAnyAuthenticatedClient;
use rustls::{Certificate, PrivateKey, RootCertStore, ServerConfig};
use rustls_pemfile::Item;

use crate::error::RpcError;

#[derive(Clone, Debug)]
pub struct TlsPaths<'a> {
    pub cert: &'a Path,
    pub key: &'a Path,
    pub client_ca: &'a Path,
}

fn reader(path: &Path) -> Result<BufReader<File>, RpcError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| RpcError::Tls(format!("{}: {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>, RpcError> {
    let certs = rustls_pemfile::certs(&mut reader(path)?)
        .map_err(|e| RpcError::Tls(format!("{}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(RpcError::Tls(format!("no certificates in {}", path.display())));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_key(path: &Path) -> Result<PrivateKey, RpcError> {
    let items = rustls_pemfile::read_all(&mut reader(path)?)
        .map_err(|e| RpcError::Tls(format!("{}: {e}", path.display())))?;
    items
        .into_iter()
        .find_map(|item| match item {
            Item::PKCS8Key(key) | Item::RSAKey(key) | Item::ECKey(key) => Some(PrivateKey(key)),
            _ => None,
        })
        .ok_or_else(|| RpcError::Tls(format!("no private key in {}", path.display())))
}

/// Build a server config that presents `cert`/`key` and only accepts clients
/// whose certificate chains to `client_ca`.
pub fn load_tls(paths: &TlsPaths<'_>) -> Result<Arc<ServerConfig>, RpcError> {
    let certs = load_certs(paths.cert)?;
    let key = load_key(paths.key)?;

    let mut roots = RootCertStore::empty();
    for ca in load_certs(paths.client_ca)? {
        roots
            .add(&ca)
            .map_err(|e| RpcError::Tls(format!("client CA: {e}")))?;
    }

    let verifier = AllowAnyAuthenticatedClient::new(roots).boxed();
    let mut config = ServerConfig::builder()
        .with_safe_defaults()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| RpcError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}
