use hyper::StatusCode;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Domain not in whitelist: {0}")]
    DomainNotAllowed(String),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),
}

impl ProxyError {
    /// Status code surfaced to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidTarget(_) | ProxyError::Url(_) => StatusCode::BAD_REQUEST,
            ProxyError::DomainNotAllowed(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ProxyError::InvalidTarget("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::DomainNotAllowed("evil.com".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ProxyError::UpstreamUnreachable("refused".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let parse_err = url::Url::parse("not a url").unwrap_err();
        assert_eq!(ProxyError::from(parse_err).status(), StatusCode::BAD_REQUEST);
    }
}
