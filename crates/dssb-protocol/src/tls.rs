//! Inline TLS upgrade
//!
//! DSS servers announce TLS in their greeting and then expect the client to
//! wrap the existing socket. Servers in this ecosystem run self-signed
//! certificates, so the client trusts whatever certificate is presented.
//! The hostname is still sent as SNI.

use dssb_core::{DssError, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Accepts any server certificate
#[derive(Debug)]
struct AcceptAnyCert {
    schemes: Vec<SignatureScheme>,
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

/// Build the client TLS configuration used for every upgrade.
pub fn client_config() -> Result<Arc<ClientConfig>> {
    let provider: Arc<CryptoProvider> = Arc::new(rustls::crypto::ring::default_provider());
    let schemes = provider
        .signature_verification_algorithms
        .supported_schemes();

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DssError::Internal(format!("tls config: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert { schemes }))
        .with_no_client_auth();

    Ok(Arc::new(config))
}

/// Wrap an established stream in TLS.
pub async fn upgrade<S>(
    config: Arc<ClientConfig>,
    host: &str,
    stream: S,
    timeout: Duration,
) -> Result<TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| DssError::InvalidAddress(format!("{host}: {e}")))?;

    tokio::time::timeout(timeout, TlsConnector::from(config).connect(server_name, stream))
        .await
        .map_err(|_| DssError::Timeout(timeout))?
        .map_err(|e| DssError::Network(format!("tls handshake failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_builds() {
        let config = client_config().unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_against_plain_peer_fails() {
        let (client, server) = tokio::io::duplex(1024);
        // Peer closes immediately instead of answering the ClientHello.
        drop(server);

        let result = upgrade(
            client_config().unwrap(),
            "localhost",
            client,
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(DssError::Network(_))));
    }
}
