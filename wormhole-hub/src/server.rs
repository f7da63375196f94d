use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use thiserror::Error;

use crate::Context;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("certificate generation failed: {0}")]
    Certificate(#[from] rcgen::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Construct the QUIC side of the hub using sane defaults.
pub struct ServerBuilder {
    addr: std::net::SocketAddr,
    keep_alive: Duration,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            addr: "0.0.0.0:4242".parse().unwrap(),
            keep_alive: Duration::from_secs(5),
        }
    }

    /// Listen on the specified address.
    pub fn with_addr(self, addr: std::net::SocketAddr) -> Self {
        Self { addr, ..self }
    }

    /// Supply a certificate used for TLS.
    pub fn with_certificate(
        self,
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Server, ServerError> {
        // Agents present no client certificate; their only identity is the
        // identifier they register with.
        let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(chain, key)?;

        // Agents refuse the handshake unless the wormhole ALPN matches.
        config.alpn_protocols = vec![wormhole_proto::ALPN.to_vec()];

        let config: quinn::crypto::rustls::QuicServerConfig = config.try_into().unwrap();
        let mut config = quinn::ServerConfig::with_crypto(Arc::new(config));

        let mut transport = quinn::TransportConfig::default();
        transport.keep_alive_interval(Some(self.keep_alive));
        config.transport_config(Arc::new(transport));

        let endpoint = quinn::Endpoint::server(config, self.addr)?;

        Ok(Server { endpoint })
    }

    /// Generate a throwaway self-signed certificate, for deployments that
    /// pair with agents running with verification disabled.
    pub fn with_self_signed(self) -> Result<Server, ServerError> {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])?;
        let key = rustls::pki_types::PrivatePkcs8KeyDer::from(cert.signing_key.serialize_der());

        self.with_certificate(
            vec![cert.cert.into()],
            rustls::pki_types::PrivateKeyDer::Pkcs8(key),
        )
    }
}

/// The hub's QUIC endpoint, accepting agent connections.
pub struct Server {
    endpoint: quinn::Endpoint,
}

impl Server {
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.endpoint.local_addr()
    }

    /// Accept connections until the endpoint is closed. Each connection gets
    /// its own task running the session lifecycle against `ctx`.
    pub async fn run(&self, ctx: Context) {
        while let Some(incoming) = self.endpoint.accept().await {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let conn = match incoming.await {
                    Ok(conn) => conn,
                    Err(err) => {
                        log::debug!("handshake failed: {err}");
                        return;
                    }
                };

                if let Err(err) = crate::session::serve(conn, ctx).await {
                    log::warn!("session ended with error: {err}");
                }
            });
        }
    }

    /// Stop accepting and tear down every connection.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"hub is shutting down");
    }
}
