//! TLS transport layer for the legacy `Tls` auth type and VeNCrypt's
//! `TLS*`/`X509*` subauths (§4.5.1).
//!
//! rustls has no literal anonymous-Diffie-Hellman ciphersuite, so the
//! "anonymous" TLS* subauths are rendered as a `rustls::ClientConfig`
//! installed with a [`ServerCertVerifier`] that accepts any certificate
//! chain without inspecting it — the channel is encrypted but the peer
//! is not authenticated, matching the RFB spec's "TLS without
//! certificate checking" semantics. The `X509*` subauths instead use
//! the platform trust store (`rustls-native-certs`) plus, when
//! configured, an explicit CA/CRL/client cert from [`X509Credentials`].

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::verify_tls12_signature;
use rustls::crypto::verify_tls13_signature;
use rustls::{DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use crate::vnc::error::{CertProblem, VncError};
use crate::vnc::types::X509Credentials;

/// A verifier that accepts any certificate — used for VeNCrypt's
/// anonymous `TLS*` subauths where the point is encryption, not
/// authentication.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Build a `rustls::ClientConfig` for VeNCrypt's anonymous-DH-equivalent
/// `TLS*` subauths: encrypted, unauthenticated.
pub fn anonymous_client_config() -> Arc<rustls::ClientConfig> {
    let mut config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();
    config.enable_sni = false;
    Arc::new(config)
}

/// Build a `rustls::ClientConfig` for the `X509*` subauths: platform
/// trust roots plus any explicit CA/client cert configured via
/// [`X509Credentials`].
pub fn x509_client_config(creds: &X509Credentials) -> Result<Arc<rustls::ClientConfig>, VncError> {
    let mut roots = rustls::RootCertStore::empty();

    if let Some(ca_path) = &creds.ca_cert_path {
        let pem = std::fs::read(ca_path)
            .map_err(|e| VncError::TlsFailure(format!("reading CA cert {ca_path}: {e}")))?;
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert.map_err(|e| VncError::TlsFailure(format!("parsing CA cert: {e}")))?;
            roots
                .add(cert)
                .map_err(|e| VncError::CertificateInvalid(CertProblem::Algorithm).tap_log(&e))?;
        }
    } else {
        let native = rustls_native_certs::load_native_certs();
        for cert in native.certs {
            let _ = roots.add(cert);
        }
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);

    let config = if let (Some(cert_path), Some(key_path)) =
        (&creds.client_cert_path, &creds.client_key_path)
    {
        let cert_chain = load_cert_chain(cert_path)?;
        let key = load_private_key(key_path)?;
        builder
            .with_client_auth_cert(cert_chain, key)
            .map_err(|e| VncError::TlsFailure(format!("invalid client certificate: {e}")))?
    } else {
        builder.with_no_client_auth()
    };

    Ok(Arc::new(config))
}

fn load_cert_chain(path: &str) -> Result<Vec<CertificateDer<'static>>, VncError> {
    let pem = std::fs::read(path)
        .map_err(|e| VncError::TlsFailure(format!("reading client cert {path}: {e}")))?;
    rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| VncError::TlsFailure(format!("parsing client cert: {e}")))
}

fn load_private_key(path: &str) -> Result<rustls_pki_types::PrivateKeyDer<'static>, VncError> {
    let pem = std::fs::read(path)
        .map_err(|e| VncError::TlsFailure(format!("reading client key {path}: {e}")))?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| VncError::TlsFailure(format!("parsing client key: {e}")))?
        .ok_or_else(|| VncError::TlsFailure(format!("no private key found in {path}")))
}

/// Small ergonomic helper: log the underlying rustls error while
/// returning the caller's classified [`VncError`].
trait TapLog {
    fn tap_log(self, err: &impl std::fmt::Display) -> Self;
}

impl TapLog for VncError {
    fn tap_log(self, err: &impl std::fmt::Display) -> Self {
        log::warn!("certificate rejected: {err}");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_config_disables_sni() {
        let config = anonymous_client_config();
        assert!(!config.enable_sni);
    }

    #[test]
    fn x509_config_without_explicit_ca_uses_native_roots() {
        let creds = X509Credentials::default();
        // Must not error even when no explicit CA/client cert is configured —
        // falls back to the platform trust store.
        assert!(x509_client_config(&creds).is_ok());
    }

    #[test]
    fn x509_config_rejects_missing_ca_file() {
        let creds = X509Credentials {
            ca_cert_path: Some("/nonexistent/ca.pem".into()),
            ..Default::default()
        };
        assert!(x509_client_config(&creds).is_err());
    }
}
