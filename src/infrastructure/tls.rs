//! TLS configuration
//!
//! Builds rustls client and server configs. The handshake itself is pumped by
//! the transport.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use rustls_pemfile::{certs, private_key};

use crate::shared::error::TransportError;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client config. With `verify == false` any server certificate is accepted.
pub fn client_config(verify: bool) -> Result<Arc<ClientConfig>, TransportError> {
    let builder = ClientConfig::builder_with_provider(provider()).with_safe_default_protocol_versions()?;

    let config = if verify {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        tracing::warn!("TLS certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider())))
            .with_no_client_auth()
    };

    Ok(Arc::new(config))
}

/// Server config from PEM certificate chain and private key files.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, TransportError> {
    let cert_file = File::open(cert_path).map_err(|err| {
        TransportError::TlsConfig(format!("failed to open certificate file {}: {err}", cert_path.display()))
    })?;
    let key_file = File::open(key_path).map_err(|err| {
        TransportError::TlsConfig(format!("failed to open private key file {}: {err}", key_path.display()))
    })?;

    server_config_from_pem(&mut BufReader::new(cert_file), &mut BufReader::new(key_file))
}

/// Server config from in-memory PEM readers.
pub fn server_config_from_pem(
    cert_reader: &mut dyn BufRead,
    key_reader: &mut dyn BufRead,
) -> Result<Arc<ServerConfig>, TransportError> {
    let cert_chain: Vec<CertificateDer<'static>> = certs(cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| TransportError::TlsConfig(format!("failed to parse certificate chain: {err}")))?;

    if cert_chain.is_empty() {
        return Err(TransportError::TlsConfig("no certificates found".into()));
    }

    let key = private_key(key_reader)
        .map_err(|err| TransportError::TlsConfig(format!("failed to parse private key: {err}")))?
        .ok_or_else(|| TransportError::TlsConfig("no private key found".into()))?;

    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)?;

    Ok(Arc::new(config))
}

/// Verifier for `tls.verify = false`: trusts any certificate but still checks signatures.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
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
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
