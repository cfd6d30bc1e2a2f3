//! TLS listener assembly
//!
//! Builds the rustls server configuration from the `tls.*` options.
//! rustls only speaks TLS 1.2 and 1.3, so configured bounds below 1.2 are
//! clamped to 1.2 with a warning; a configured maximum caps the offer at
//! TLS 1.2. The `strict` cipher policy restricts the offered suites to
//! ECDSA AEAD suites plus the TLS 1.3 set.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use axum_server::tls_rustls::RustlsConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{CipherSuite, ServerConfig, SupportedProtocolVersion};
use tracing::warn;

use mistral_config::{CipherPolicy, TlsOptions, TlsVersion};

const STRICT_SUITES: &[CipherSuite] = &[
    CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    // TLS 1.3 suites stay available under the strict policy
    CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS13_AES_256_GCM_SHA384,
    CipherSuite::TLS13_AES_128_GCM_SHA256,
];

/// Build the listener TLS configuration.
pub fn build_rustls_config(options: &TlsOptions) -> Result<RustlsConfig> {
    let Some(chain) = options.chains.first() else {
        bail!("no TLS certificate chain configured");
    };
    if options.chains.len() > 1 {
        warn!(
            "{} certificate chains configured, only the first is served",
            options.chains.len()
        );
    }

    // a bad root bundle should stop the process at startup, not at the
    // first handshake
    for root in &options.roots {
        load_certs(root).with_context(|| format!("bad root CA bundle: {}", root.display()))?;
    }

    let certs = load_certs(&chain.chain_file)
        .with_context(|| format!("failed to load certificate chain: {}", chain.chain_file.display()))?;
    let key = load_key(&chain.key_file)
        .with_context(|| format!("failed to load private key: {}", chain.key_file.display()))?;

    if matches!(options.min_version, Some(v) if v < TlsVersion::Tls12) {
        warn!("TLS minimum below 1.2 requested, clamping to TLS 1.2");
    }
    let versions: &[&SupportedProtocolVersion] = match options.max_version {
        // every expressible maximum is at most TLS 1.2
        Some(_) => &[&rustls::version::TLS12],
        None => rustls::ALL_VERSIONS,
    };

    let mut provider = rustls::crypto::ring::default_provider();
    if options.ciphers == CipherPolicy::Strict {
        provider
            .cipher_suites
            .retain(|suite| STRICT_SUITES.contains(&suite.suite()));
    }

    let server_config = ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(versions)
        .context("failed to select TLS protocol versions")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("certificate chain and private key do not match")?;

    Ok(RustlsConfig::from_config(Arc::new(server_config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("cannot parse PEM certificates from {}", path.display()))?;
    if certs.is_empty() {
        bail!("no certificates found in {}", path.display());
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("cannot parse private key from {}", path.display()))?
        .with_context(|| format!("no private key found in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mistral_config::CertificateChain;
    use std::io::Write;

    fn write_self_signed(dir: &Path) -> CertificateChain {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();

        let cert_path = dir.join("chain.pem");
        let key_path = dir.join("key.pem");
        File::create(&cert_path)
            .unwrap()
            .write_all(cert.pem().as_bytes())
            .unwrap();
        File::create(&key_path)
            .unwrap()
            .write_all(key_pair.serialize_pem().as_bytes())
            .unwrap();

        CertificateChain {
            chain_file: cert_path,
            key_file: key_path,
        }
    }

    #[test]
    fn test_build_with_default_policy() {
        let dir = tempfile::tempdir().unwrap();
        let options = TlsOptions {
            chains: vec![write_self_signed(dir.path())],
            ..Default::default()
        };
        assert!(build_rustls_config(&options).is_ok());
    }

    #[test]
    fn test_build_with_strict_ciphers_and_capped_version() {
        let dir = tempfile::tempdir().unwrap();
        let options = TlsOptions {
            min_version: Some(TlsVersion::Tls10),
            max_version: Some(TlsVersion::Tls12),
            ciphers: CipherPolicy::Strict,
            chains: vec![write_self_signed(dir.path())],
            roots: vec![],
        };
        assert!(build_rustls_config(&options).is_ok());
    }

    #[test]
    fn test_missing_chain_is_rejected() {
        assert!(build_rustls_config(&TlsOptions::default()).is_err());
    }

    #[test]
    fn test_unreadable_root_bundle_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("roots.pem");
        File::create(&bogus).unwrap().write_all(b"not a pem").unwrap();

        let options = TlsOptions {
            chains: vec![write_self_signed(dir.path())],
            roots: vec![bogus],
            ..Default::default()
        };
        assert!(build_rustls_config(&options).is_err());
    }
}
