//! DSS listing client

use crate::codec::{self, Greeting};
use crate::tls;
use dssb_core::{DssError, QueryConfig, Result, ServerKey, ServerSnapshot};
use rustls::ClientConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Something that can fetch a server's listing
pub trait ServerQuery: Send + Sync {
    /// Query one server. No retries.
    fn query(
        &self,
        key: &ServerKey,
        timeout: Duration,
    ) -> impl Future<Output = Result<ServerSnapshot>> + Send;
}

/// Network client speaking the DSS listing handshake
#[derive(Clone)]
pub struct DssClient {
    /// Shared TLS configuration for servers that require an upgrade
    tls_config: Arc<ClientConfig>,

    /// Largest frame accepted from a server
    max_frame_size: usize,
}

impl DssClient {
    pub fn new(config: &QueryConfig) -> Result<Self> {
        Ok(Self {
            tls_config: tls::client_config()?,
            max_frame_size: config.max_frame_size,
        })
    }

    /// Perform one greeting + listing round trip against `host:port`.
    ///
    /// `timeout` bounds the connect, the TLS handshake and every frame read.
    pub async fn query(&self, host: &str, port: u16, timeout: Duration) -> Result<ServerSnapshot> {
        let mut stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| DssError::Timeout(timeout))?
            .map_err(|e| DssError::Network(format!("connect to {host}:{port}: {e}")))?;
        // Best effort; small frames should not wait on Nagle.
        let _ = stream.set_nodelay(true);

        let greeting_frame = codec::read_frame(&mut stream, self.max_frame_size, timeout).await?;
        let greeting = codec::decode_greeting(&greeting_frame)?;

        tracing::debug!(
            host,
            port,
            protocol_version = greeting.protocol_version,
            network_version = %greeting.network_version_str(),
            tls = greeting.requires_tls(),
            "received greeting"
        );

        if greeting.requires_tls() {
            let mut tls_stream =
                tls::upgrade(Arc::clone(&self.tls_config), host, stream, timeout).await?;
            self.request_listing(&mut tls_stream, &greeting, timeout).await
        } else {
            self.request_listing(&mut stream, &greeting, timeout).await
        }
    }

    async fn request_listing<S>(
        &self,
        stream: &mut S,
        greeting: &Greeting,
        timeout: Duration,
    ) -> Result<ServerSnapshot>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        codec::write_frame(stream, &codec::encode_listing_request(greeting), timeout).await?;
        let reply = codec::read_frame(stream, self.max_frame_size, timeout).await?;
        codec::decode_list_server(&reply)
    }
}

impl ServerQuery for DssClient {
    async fn query(&self, key: &ServerKey, timeout: Duration) -> Result<ServerSnapshot> {
        DssClient::query(self, &key.ip, key.port, timeout).await
    }
}
