// SPDX-FileCopyrightText: 2026 Orgchat Relay Developers
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! TLS Certificate Management
//!
//! Loads the TLS listener's certificate from `{data_dir}/certs`, generating
//! a self-signed one on first boot and persisting it so the browser's
//! one-time manual trust step survives restarts. Certificate files are read
//! once at startup; nothing rewrites them while the relay runs.

use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::{self, pki_types};
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::error::CertError;

const CERT_DIR: &str = "certs";
const CERT_FILE: &str = "cert.pem";
const KEY_FILE: &str = "key.pem";

/// Builds a TLS acceptor from the persisted certificate, generating and
/// persisting a self-signed one when none exists yet.
pub fn load_or_generate(data_dir: &Path, hostnames: &[String]) -> Result<TlsAcceptor, CertError> {
    let cert_dir = data_dir.join(CERT_DIR);
    let cert_path = cert_dir.join(CERT_FILE);
    let key_path = cert_dir.join(KEY_FILE);

    if !cert_path.exists() || !key_path.exists() {
        generate_self_signed(&cert_dir, hostnames)?;
        info!("Generated self-signed certificate at {}", cert_path.display());
    }

    let certs = load_certs(&cert_path)?;
    let key = load_private_key(&key_path)?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| CertError::Invalid(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn generate_self_signed(cert_dir: &Path, hostnames: &[String]) -> Result<(), CertError> {
    fs::create_dir_all(cert_dir)?;

    let certified = rcgen::generate_simple_self_signed(hostnames.to_vec())
        .map_err(|e| CertError::Generate(e.to_string()))?;

    let cert_path = cert_dir.join(CERT_FILE);
    let key_path = cert_dir.join(KEY_FILE);
    fs::write(&cert_path, certified.cert.pem())?;
    fs::write(&key_path, certified.signing_key.serialize_pem())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&key_path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Loads PEM certificates from a file path.
fn load_certs(path: &Path) -> Result<Vec<pki_types::CertificateDer<'static>>, CertError> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CertError::Invalid(format!("{}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(CertError::Invalid(format!(
            "no certificates found in {}",
            path.display()
        )));
    }

    Ok(certs)
}

/// Loads a PEM private key from a file path.
fn load_private_key(path: &Path) -> Result<pki_types::PrivateKeyDer<'static>, CertError> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| CertError::Invalid(format!("{}: {}", path.display(), e)))?
        .ok_or_else(|| {
            CertError::Invalid(format!("no private key found in {}", path.display()))
        })
}
