//! TLS material for the QUIC transport.
//!
//! QUIC always runs TLS 1.3. The listener presents either a certificate
//! loaded from PEM files or an ephemeral self-signed one; the dialer skips
//! certificate verification, since the relay carries opaque bytes and
//! does not authenticate its peers.

use std::sync::Arc;

use bridge_core::defaults::QUIC_ALPN;
use rcgen::{CertificateParams, KeyPair, PKCS_ECDSA_P256_SHA256};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::error::TransportError;
use crate::tls_config::TlsConfig;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Build the TLS server config used by the QUIC listener.
///
/// If `tls_config` is provided, loads cert/key from files.
/// Otherwise, generates an ephemeral self-signed certificate in memory.
pub fn build_server_crypto(
    tls_config: Option<&TlsConfig>,
) -> Result<rustls::ServerConfig, TransportError> {
    let (certs, key) = match tls_config {
        Some(cfg) => load_cert_files(&cfg.cert, &cfg.key)?,
        None => generate_self_signed()?,
    };

    let mut config = rustls::ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![QUIC_ALPN.to_vec()];

    Ok(config)
}

/// Build a TLS client config that skips certificate verification.
pub fn build_insecure_client_crypto() -> Result<rustls::ClientConfig, TransportError> {
    let mut config = rustls::ClientConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth();
    config.alpn_protocols = vec![QUIC_ALPN.to_vec()];

    Ok(config)
}

/// Generate a self-signed certificate in memory using rcgen.
fn generate_self_signed()
-> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TransportError> {
    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| TransportError::CertGeneration(e.to_string()))?;

    let params = CertificateParams::default();
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| TransportError::CertGeneration(e.to_string()))?;

    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    Ok((vec![cert_der], key_der))
}

/// Load certificate and private key from PEM files.
fn load_cert_files(
    cert_path: &str,
    key_path: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TransportError> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(cert_path)?);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .filter_map(|c| c.ok().map(|v| v.into_owned()))
        .collect();

    if certs.is_empty() {
        return Err(TransportError::Config(format!(
            "no certificates found in {}",
            cert_path
        )));
    }

    let mut reader = std::io::BufReader::new(std::fs::File::open(key_path)?);
    let key = loop {
        match rustls_pemfile::read_one(&mut reader)? {
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => break PrivateKeyDer::Pkcs8(key),
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => break PrivateKeyDer::Pkcs1(key),
            Some(rustls_pemfile::Item::Sec1Key(key)) => break PrivateKeyDer::Sec1(key),
            Some(_) => continue,
            None => {
                return Err(TransportError::Config(format!(
                    "no private key found in {}",
                    key_path
                )));
            }
        }
    };

    Ok((certs, key))
}

/// A TLS certificate verifier that accepts any certificate.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_signed_server_crypto() {
        let config = build_server_crypto(None).unwrap();
        assert_eq!(config.alpn_protocols, vec![QUIC_ALPN.to_vec()]);
    }

    #[test]
    fn test_missing_cert_file() {
        let tls = TlsConfig {
            cert: "/nonexistent/bridge-cert.pem".to_string(),
            key: "/nonexistent/bridge-key.pem".to_string(),
        };
        let err = build_server_crypto(Some(&tls)).unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[test]
    fn test_cert_files_round_trip() {
        let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let cert = CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();

        let dir = std::env::temp_dir().join(format!("bridge-tls-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();

        let tls = TlsConfig {
            cert: cert_path.to_string_lossy().into_owned(),
            key: key_path.to_string_lossy().into_owned(),
        };
        assert!(build_server_crypto(Some(&tls)).is_ok());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_insecure_client_crypto() {
        let config = build_insecure_client_crypto().unwrap();
        assert_eq!(config.alpn_protocols, vec![QUIC_ALPN.to_vec()]);
    }
}
