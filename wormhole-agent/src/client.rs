use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::lookup_host;
use url::Url;

use quinn::{crypto::rustls::QuicClientConfig, rustls};
use rustls::client::danger::ServerCertVerifier;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("cannot resolve hub address {0}")]
    UnresolvableHost(String),

    #[error("quic error: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Construct a [Client] used to dial the hub.
///
/// The only choice an agent has to make is whether the hub's certificate is
/// checked: [`ClientBuilder::with_system_roots`] for hubs behind real
/// certificates, [`ClientBuilder::with_no_certificate_verification`] for
/// hubs running on a generated self-signed one.
pub struct ClientBuilder {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    /// Trust the hub only if its certificate chains to a system root.
    pub fn with_system_roots(self) -> Result<Client, ClientError> {
        let native = rustls_native_certs::load_native_certs();
        for err in &native.errors {
            log::warn!("system root store: {err}");
        }

        let mut roots = rustls::RootCertStore::empty();
        let (added, unusable) = roots.add_parsable_certificates(native.certs);
        log::debug!("trusting {added} system roots, {unusable} unusable");

        let crypto = self
            .tls13()
            .with_root_certificates(roots)
            .with_no_client_auth();

        self.into_client(crypto)
    }

    /// Accept whatever certificate the hub presents.
    ///
    /// # Safety
    /// Anyone on the path can impersonate the hub. Pair this only with hubs
    /// on networks the agent already trusts, such as a self-signed hub
    /// reached over a VPN or in local development.
    pub unsafe fn with_no_certificate_verification(self) -> Result<Client, ClientError> {
        let verifier = TrustAnyHub(self.provider.clone());

        let crypto = self
            .tls13()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();

        self.into_client(crypto)
    }

    // The hub speaks TLS 1.3 only.
    fn tls13(&self) -> rustls::ConfigBuilder<rustls::ClientConfig, rustls::WantsVerifier> {
        rustls::ClientConfig::builder_with_provider(self.provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])
            .expect("the ring provider supports TLS 1.3")
    }

    fn into_client(self, mut crypto: rustls::ClientConfig) -> Result<Client, ClientError> {
        // The hub refuses the handshake unless the wormhole ALPN matches.
        crypto.alpn_protocols = vec![wormhole_proto::ALPN.to_vec()];

        let crypto =
            QuicClientConfig::try_from(crypto).expect("TLS 1.3 cipher suites are available");
        let mut config = quinn::ClientConfig::new(Arc::new(crypto));

        // Agents sit behind NAT; keep-alives hold the mapping open while the
        // tunnel is idle.
        let mut transport = quinn::TransportConfig::default();
        transport.keep_alive_interval(Some(Duration::from_secs(5)));
        config.transport_config(transport.into());

        let endpoint = quinn::Endpoint::client("[::]:0".parse().unwrap())?;

        Ok(Client { endpoint, config })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A client for dialing the hub's QUIC endpoint.
pub struct Client {
    endpoint: quinn::Endpoint,
    config: quinn::ClientConfig,
}

impl Client {
    /// Dial the hub named by `url` and wait for the handshake.
    pub async fn connect(&self, url: &Url) -> Result<quinn::Connection, ClientError> {
        let host = url
            .host_str()
            .ok_or_else(|| ClientError::UnresolvableHost(url.to_string()))?;

        // Brackets around an IPv6 literal are URL syntax, not part of the name.
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = url.port().unwrap_or(4242);

        // An agent has exactly one hub; the first resolved address is the
        // one dialed, there is no fallback racing.
        let remote = lookup_host((host, port))
            .await
            .map_err(|_| ClientError::UnresolvableHost(host.to_string()))?
            .next()
            .ok_or_else(|| ClientError::UnresolvableHost(host.to_string()))?;

        let connecting = self.endpoint.connect_with(self.config.clone(), remote, host)?;
        Ok(connecting.await?)
    }
}

// The insecurity toggle: registration is identifier-self-declaration anyway,
// so a hub on a throwaway certificate is a supported (if weak) deployment.
#[derive(Debug)]
struct TrustAnyHub(Arc<rustls::crypto::CryptoProvider>);

impl ServerCertVerifier for TrustAnyHub {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        // The client config pins TLS 1.3, so this path cannot be reached.
        Err(rustls::Error::General("TLS 1.2 is never offered".into()))
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        // The certificate is taken on faith, but the handshake signature is
        // still checked so a corrupted exchange fails instead of connecting.
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
