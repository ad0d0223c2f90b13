use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, warn};

/// Finished handshakes waiting for the HTTP server to pick them up.
const ACCEPT_BACKLOG: usize = 64;

/// Certificate resolver that reads the PEM pair from disk on every handshake,
/// so a rotated certificate is picked up without a restart.
#[derive(Debug)]
pub struct ReloadingCertResolver {
    cert_path: PathBuf,
    key_path: PathBuf,
    provider: Arc<CryptoProvider>,
}

impl ReloadingCertResolver {
    pub fn new(cert_path: PathBuf, key_path: PathBuf, provider: Arc<CryptoProvider>) -> Self {
        Self {
            cert_path,
            key_path,
            provider,
        }
    }

    /// Read and parse the current certificate chain and private key.
    pub fn load(&self) -> Result<Arc<CertifiedKey>> {
        let certs = CertificateDer::pem_file_iter(&self.cert_path)
            .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
            .map_err(|e| {
                anyhow!(
                    "Failed to read certificate {}: {:?}",
                    self.cert_path.display(),
                    e
                )
            })?;
        if certs.is_empty() {
            anyhow::bail!("No certificates found in {}", self.cert_path.display());
        }

        let key = PrivateKeyDer::from_pem_file(&self.key_path).map_err(|e| {
            anyhow!(
                "Failed to read private key {}: {:?}",
                self.key_path.display(),
                e
            )
        })?;
        let signing_key = self
            .provider
            .key_provider
            .load_private_key(key)
            .with_context(|| format!("Unsupported private key in {}", self.key_path.display()))?;

        Ok(Arc::new(CertifiedKey::new(certs, signing_key)))
    }
}

impl ResolvesServerCert for ReloadingCertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        match self.load() {
            Ok(key) => Some(key),
            Err(e) => {
                // Surfaces to the client as a failed handshake.
                warn!("TLS certificate unavailable: {:#}", e);
                None
            }
        }
    }
}

/// Server config backed by [`ReloadingCertResolver`], advertising h2 and http/1.1.
pub fn server_config(cert_path: PathBuf, key_path: PathBuf) -> Result<ServerConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let resolver = ReloadingCertResolver::new(cert_path, key_path, provider.clone());

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("Failed to select TLS protocol versions")?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(resolver));
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// TCP listener that terminates TLS before handing connections to axum.
///
/// Handshakes run on their own tasks under a timeout, so a slow client does not
/// hold up the accept loop.
pub struct TlsListener {
    local_addr: SocketAddr,
    streams: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
    accept_task: JoinHandle<()>,
}

impl TlsListener {
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        config: ServerConfig,
        handshake_timeout: Duration,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        let acceptor = TlsAcceptor::from(Arc::new(config));
        let accept_task = tokio::spawn(accept_loop(listener, acceptor, handshake_timeout, tx));

        Ok(Self {
            local_addr,
            streams: rx,
            accept_task,
        })
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.streams.recv().await {
            Some(conn) => conn,
            None => {
                error!("TLS accept loop stopped; no further connections will be accepted");
                std::future::pending().await
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
    tx: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
) {
    while !tx.is_closed() {
        let (tcp, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                // Usually EMFILE; back off instead of spinning.
                warn!("TCP accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(handshake_timeout, acceptor.accept(tcp)).await {
                Ok(Ok(stream)) => {
                    if tx.send((stream, peer)).await.is_err() {
                        debug!(%peer, "Dropping TLS connection, listener closed");
                    }
                }
                Ok(Err(e)) => debug!(%peer, "TLS handshake failed: {}", e),
                Err(_) => debug!(%peer, "TLS handshake timed out"),
            }
        });
    }
}
