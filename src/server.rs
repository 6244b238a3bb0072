use crate::common::TlsConfig;
use crate::config::Config;
use crate::error::ProxyError;
use crate::proxy::RewritingProxy;
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Accept loop in front of a [`RewritingProxy`], plain HTTP or TLS.
pub struct ProxyServer {
    proxy: RewritingProxy,
    addr: SocketAddr,
    tls: Option<(String, String)>,
}

impl ProxyServer {
    pub fn new(config: Arc<Config>) -> Self {
        let addr = config.listen_addr;
        let tls = match (&config.private_key, &config.certificate) {
            (Some(key), Some(cert)) => Some((key.clone(), cert.clone())),
            _ => None,
        };
        Self {
            proxy: RewritingProxy::new(config),
            addr,
            tls,
        }
    }

    pub async fn run(self) -> Result<(), ProxyError> {
        info!("Binding listener to: {}", self.addr);
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener until it fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ProxyError> {
        let local_addr = listener.local_addr()?;
        let acceptor = match &self.tls {
            Some((private_key_path, cert_path)) => {
                info!("Enabling HTTPS/TLS mode");
                debug!("Loading TLS certificate from: {}", cert_path);
                debug!("Loading TLS private key from: {}", private_key_path);
                TlsConfig::validate_tls_files(private_key_path, cert_path)?;
                let tls_config = TlsConfig::create_config(private_key_path, cert_path)?;
                Some(TlsAcceptor::from(Arc::new(tls_config)))
            }
            None => None,
        };

        let scheme = if acceptor.is_some() { "https" } else { "http" };
        info!("Rewriting proxy listening on: {}://{}", scheme, local_addr);

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            let proxy = self.proxy.clone();

            match acceptor.clone() {
                Some(acceptor) => {
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls_stream) => serve_connection(tls_stream, proxy, remote_addr).await,
                            Err(e) => warn!("Error establishing TLS connection from {}: {}", remote_addr, e),
                        }
                    });
                }
                None => {
                    tokio::spawn(serve_connection(stream, proxy, remote_addr));
                }
            }
        }
    }
}

async fn serve_connection<S>(stream: S, proxy: RewritingProxy, remote_addr: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    debug!("Accepted connection from {}", remote_addr);
    let service = service_fn(move |req| {
        let proxy = proxy.clone();
        async move { Ok::<_, Infallible>(proxy.handle(req).await) }
    });

    if let Err(e) = ServerBuilder::new()
        .keep_alive(true)
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        error!("Error serving connection from {}: {}", remote_addr, e);
    }
}
