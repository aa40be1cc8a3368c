//! Server-side TLS material
//!
//! Loads the host certificate from the Let's Encrypt live directory and
//! builds the rustls server configuration used by the DoT listener:
//! TLS 1.2 and 1.3 only, restricted to ECDHE + AES-GCM suites.
//!
//! A missing certificate is not fatal to the process — the DoT front-end is
//! simply disabled until material appears and the gateway is restarted.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig, SupportedCipherSuite};
use thiserror::Error;

/// Root of the ACME-managed certificate tree
const CERT_ROOT: &str = "/etc/letsencrypt/live";

/// TLS material errors
#[derive(Debug, Error)]
pub enum TlsError {
    /// Certificate chain could not be read or parsed
    #[error("failed to load certificate from {path}: {reason}")]
    Certificate {
        /// File that was attempted
        path: String,
        /// What went wrong
        reason: String,
    },

    /// Private key could not be read or parsed
    #[error("failed to load private key from {path}: {reason}")]
    PrivateKey {
        /// File that was attempted
        path: String,
        /// What went wrong
        reason: String,
    },

    /// rustls rejected the configuration
    #[error("TLS configuration error: {0}")]
    Config(String),
}

/// Install the process-wide crypto provider (idempotent)
pub fn init_crypto() {
    static CRYPTO_INIT: OnceLock<()> = OnceLock::new();
    CRYPTO_INIT.get_or_init(|| {
        let _ = ring::default_provider().install_default();
    });
}

/// Cipher suites offered by the DoT listener: ECDHE key exchange with
/// AES-GCM only, plus the matching TLS 1.3 suites.
fn allowed_cipher_suites() -> Vec<SupportedCipherSuite> {
    use rustls::crypto::ring::cipher_suite;
    vec![
        cipher_suite::TLS13_AES_256_GCM_SHA384,
        cipher_suite::TLS13_AES_128_GCM_SHA256,
        cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    ]
}

/// Path pair for a host's PEM material under the ACME live directory
#[must_use]
pub fn cert_paths_for_host(host: &str) -> (PathBuf, PathBuf) {
    let dir = Path::new(CERT_ROOT).join(host);
    (dir.join("fullchain.pem"), dir.join("privkey.pem"))
}

/// Build the DoT server configuration for `host` from its ACME material
///
/// # Errors
///
/// Returns `TlsError` when the material is missing or unparseable; callers
/// treat this as "DoT disabled", not as a startup failure.
pub fn server_config_for_host(host: &str) -> Result<Arc<ServerConfig>, TlsError> {
    let (cert_path, key_path) = cert_paths_for_host(host);
    server_config_from_pem(&cert_path, &key_path)
}

/// Build a server configuration from explicit PEM files
///
/// # Errors
///
/// Returns `TlsError` when reading or parsing fails.
pub fn server_config_from_pem(
    cert_path: &Path,
    key_path: &Path,
) -> Result<Arc<ServerConfig>, TlsError> {
    init_crypto();

    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let provider = CryptoProvider {
        cipher_suites: allowed_cipher_suites(),
        ..ring::default_provider()
    };

    let config = ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| TlsError::Config(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::Config(e.to_string()))?;

    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::Certificate {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut reader = BufReader::new(file);
    let mut certs = Vec::new();
    for cert in rustls_pemfile::certs(&mut reader) {
        match cert {
            Ok(cert) => certs.push(cert),
            Err(e) => {
                return Err(TlsError::Certificate {
                    path: path.display().to_string(),
                    reason: format!("failed to parse certificate: {e}"),
                });
            }
        }
    }

    if certs.is_empty() {
        return Err(TlsError::Certificate {
            path: path.display().to_string(),
            reason: "no certificates found".into(),
        });
    }

    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::PrivateKey {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut reader = BufReader::new(file);

    for key in rustls_pemfile::pkcs8_private_keys(&mut reader).flatten() {
        return Ok(PrivateKeyDer::Pkcs8(key));
    }

    if reader.get_mut().seek(SeekFrom::Start(0)).is_ok() {
        for key in rustls_pemfile::rsa_private_keys(&mut reader).flatten() {
            return Ok(PrivateKeyDer::Pkcs1(key));
        }
    }

    if reader.get_mut().seek(SeekFrom::Start(0)).is_ok() {
        for key in rustls_pemfile::ec_private_keys(&mut reader).flatten() {
            return Ok(PrivateKeyDer::Sec1(key));
        }
    }

    Err(TlsError::PrivateKey {
        path: path.display().to_string(),
        reason: "no valid private key found".into(),
    })
}
