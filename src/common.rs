use crate::body::{self, ProxyBody};
use crate::error::ProxyError;
use hyper::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use hyper::{Response, StatusCode};
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader;

/// Response builders shared by the proxy and the server loop.
pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Plain-text response with a custom status
    pub fn error(status: StatusCode, message: &str) -> Response<ProxyBody> {
        let mut response = Response::new(body::full(message.to_string()));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        response
    }

    /// Plain-text rejection carrying the error's own status
    pub fn from_error(error: &ProxyError) -> Response<ProxyBody> {
        Self::error(error.status(), &error.to_string())
    }

    pub fn html(status: StatusCode, page: String) -> Response<ProxyBody> {
        let mut response = Response::new(body::full(page));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response
    }
}

/// TLS configuration for the listener
pub struct TlsConfig;

impl TlsConfig {
    /// Creates a TLS configuration from certificate and key files
    pub fn create_config(private_key_path: &str, cert_path: &str) -> Result<ServerConfig, ProxyError> {
        let mut private_key_file = BufReader::new(
            File::open(private_key_path)
                .map_err(|e| ProxyError::Tls(format!("Failed to open private key file: {}", e)))?,
        );
        let mut cert_file = BufReader::new(
            File::open(cert_path).map_err(|e| ProxyError::Tls(format!("Failed to open certificate file: {}", e)))?,
        );

        let certs = rustls_pemfile::certs(&mut cert_file)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ProxyError::Tls(format!("Failed to read certificate: {}", e)))?;
        if certs.is_empty() {
            return Err(ProxyError::Tls("No valid certificate found".to_string()));
        }

        let private_key = rustls_pemfile::private_key(&mut private_key_file)
            .map_err(|e| ProxyError::Tls(format!("Failed to read private key: {}", e)))?
            .ok_or_else(|| ProxyError::Tls("No valid private key found".to_string()))?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, private_key)
            .map_err(|e| ProxyError::Tls(format!("Failed to create TLS config: {}", e)))?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(config)
    }

    /// Validates TLS files exist and are readable before starting server
    pub fn validate_tls_files(private_key_path: &str, cert_path: &str) -> Result<(), ProxyError> {
        File::open(private_key_path)
            .map_err(|e| ProxyError::Tls(format!("Private key file not accessible: {}", e)))?;
        File::open(cert_path).map_err(|e| ProxyError::Tls(format!("Certificate file not accessible: {}", e)))?;
        Ok(())
    }
}
