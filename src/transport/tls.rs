//! TLS socket transport (C2 variant, spec §4.2, §6.2): `ssl://host:port`.
//! Enriched from `ciresnave-commy`'s `tokio-rustls` usage, since the teacher
//! carries no TLS stack of its own.

use super::socket::{connect_with_timeout, SocketOptions};
use super::stream::AnyStream;
use crate::error::TransportError;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Connect a TLS socket: TCP connect, tune, then handshake.
pub async fn connect_tls(
    host: &str,
    port: u16,
    sni_override: Option<&str>,
    connector: TlsConnector,
    options: &SocketOptions,
) -> Result<AnyStream, TransportError> {
    let addr = format!("{host}:{port}");
    debug!(%addr, "connecting tls socket");
    let tcp = connect_with_timeout(&addr, options).await?;

    let sni_host = sni_override.unwrap_or(host).to_string();
    let server_name = ServerName::try_from(sni_host.clone())
        .map_err(|_| TransportError::Tls(format!("invalid SNI host name: {sni_host}")))?;

    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| TransportError::Tls(e.to_string()))?;

    debug!(%addr, sni = %sni_host, "tls handshake complete");
    Ok(AnyStream::Tls(Box::new(stream)))
}

/// Build a connector trusting the CA certificates in a PEM bundle, the
/// `socket.trustStore` connection option (spec §6.2).
pub fn connector_from_ca_bundle(pem: &[u8]) -> Result<TlsConnector, TransportError> {
    let mut roots = rustls::RootCertStore::empty();
    let mut reader = std::io::Cursor::new(pem);
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| TransportError::Tls(e.to_string()))?;
        roots.add(cert).map_err(|e| TransportError::Tls(e.to_string()))?;
    }
    if roots.is_empty() {
        return Err(TransportError::Tls("trust store bundle contained no certificates".into()));
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}
