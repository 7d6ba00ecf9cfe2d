//! TLS key-pair loading.
//!
//! PEM certificate chain and private key files are read and validated at
//! configuration build time, so a bad key pair fails construction instead
//! of the first HTTPS start. Certificate management (rotation, ACME, etc.)
//! is out of scope — the files are loaded once.

use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;

use crate::error::Error;

/// Loads a PEM certificate chain and private key into a rustls server
/// config accepting TLS 1.2 and newer.
pub(crate) fn load_key_pair(cert_file: &Path, key_file: &Path) -> Result<Arc<ServerConfig>, Error> {
    let cert_pem = std::fs::read(cert_file).map_err(|e| tls_error(cert_file, e))?;
    let key_pem = std::fs::read(key_file).map_err(|e| tls_error(key_file, e))?;

    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(cert_file, e))?;
    if certs.is_empty() {
        return Err(Error::Tls {
            path: cert_file.to_owned(),
            reason: "no certificates found in PEM data".to_owned(),
        });
    }

    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|e| tls_error(key_file, e))?
        .ok_or_else(|| Error::Tls {
            path: key_file.to_owned(),
            reason: "no private key found in PEM data".to_owned(),
        })?;

    let config = ServerConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS12,
        &rustls::version::TLS13,
    ])
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| Error::Tls {
        path: cert_file.to_owned(),
        reason: e.to_string(),
    })?;

    Ok(Arc::new(config))
}

fn tls_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Tls { path: path.to_owned(), reason: e.to_string() }
}
