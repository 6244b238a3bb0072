//! Turns an incoming request into the upstream URL it stands for.
//!
//! Resolution order, first match wins:
//!
//! 1. absolute-form request for a foreign host (plain forward proxying)
//! 2. `/` without a query: the homepage
//! 3. `/proxy?url=...`
//! 4. `/{separator}{absolute-url}`
//! 5. `/?query`: the query re-attached to the origin of the page in `Referer`
//! 6. a relative path resolved against the page in `Referer`
//! 7. a dot-less path is a search keyword
//! 8. anything else is a domain missing its scheme
//!
//! Steps 5 and 6 recover root-relative links that slipped past the rewriter.
//! They trust whatever proxied page the browser reports as `Referer`, so they
//! are a best-effort guess and can pick the wrong site when several proxied
//! tabs are open.

use crate::codec::{ProxyOrigin, parse_embedded};
use crate::config::Config;
use crate::error::ProxyError;
use http::HeaderMap;
use http::header::REFERER;
use hyper::Uri;
use log::debug;
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Homepage,
    /// Fetch and rewrite so that the client keeps browsing through the proxy.
    Proxied(Url),
    /// Absolute-form request for a host that is not ours; fetched as-is.
    Forward(Url),
}

impl Resolution {
    pub fn target(&self) -> Option<&Url> {
        match self {
            Resolution::Homepage => None,
            Resolution::Proxied(url) | Resolution::Forward(url) => Some(url),
        }
    }
}

pub struct TargetResolver<'a> {
    config: &'a Config,
}

impl<'a> TargetResolver<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Resolves the request and applies the domain whitelist to the result.
    pub fn resolve(&self, origin: &ProxyOrigin, uri: &Uri, headers: &HeaderMap) -> Result<Resolution, ProxyError> {
        let resolution = self.resolve_target(origin, uri, headers)?;
        if let Some(target) = resolution.target() {
            self.check_whitelist(target)?;
        }
        debug!("Resolved {} -> {:?}", uri, resolution);
        Ok(resolution)
    }

    fn resolve_target(&self, origin: &ProxyOrigin, uri: &Uri, headers: &HeaderMap) -> Result<Resolution, ProxyError> {
        if let Some(target) = self.forward_target(uri)? {
            return Ok(Resolution::Forward(target));
        }

        if !self.config.is_proxy_host(origin.host()) {
            return Err(ProxyError::InvalidTarget(format!("{} is not a proxy host", origin.host())));
        }

        let path = uri.path();
        let query = uri.query().filter(|q| !q.is_empty());

        if path == "/" && query.is_none() && self.config.homepage {
            return Ok(Resolution::Homepage);
        }

        if path == "/proxy" {
            let param = query.and_then(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .find(|(key, _)| key == "url")
                    .map(|(_, value)| value.into_owned())
            });
            return match param {
                Some(value) => parse_embedded(value.trim())
                    .map(Resolution::Proxied)
                    .ok_or_else(|| ProxyError::InvalidTarget(format!("Not an absolute URL: {}", value))),
                None => Err(ProxyError::InvalidTarget("Missing url parameter".to_string())),
            };
        }

        let path_and_query = match query {
            Some(q) => format!("{}?{}", path, q),
            None => path.to_string(),
        };

        if let Some(target) = origin.decode(&path_and_query) {
            return Ok(Resolution::Proxied(target));
        }

        let referer_target = Self::referer_target(origin, headers);

        if path == "/" {
            // A query on the bare root: a root-relative search/navigation link.
            return match (referer_target, query) {
                (Some(mut target), Some(q)) => {
                    target.set_path("/");
                    target.set_query(Some(q));
                    target.set_fragment(None);
                    Ok(Resolution::Proxied(target))
                }
                _ => Err(ProxyError::InvalidTarget("Empty target".to_string())),
            };
        }

        if let Some(base) = referer_target {
            if let Ok(target) = base.join(&path_and_query) {
                return Ok(Resolution::Proxied(target));
            }
        }

        self.heuristic_target(origin, path, query).map(Resolution::Proxied)
    }

    fn forward_target(&self, uri: &Uri) -> Result<Option<Url>, ProxyError> {
        let (Some(_), Some(authority)) = (uri.scheme(), uri.authority()) else {
            return Ok(None);
        };
        if self.config.is_proxy_host(authority.as_str()) {
            return Ok(None);
        }
        let target = Url::parse(&uri.to_string())?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(ProxyError::InvalidTarget(format!("Unsupported scheme: {}", target.scheme())));
        }
        Ok(Some(target))
    }

    fn referer_target(origin: &ProxyOrigin, headers: &HeaderMap) -> Option<Url> {
        let referer = headers.get(REFERER)?.to_str().ok()?;
        origin.decode(referer)
    }

    // The split on '.' misfires for dot-less hosts and for keywords that
    // contain a dot; both are kept as they are.
    fn heuristic_target(&self, origin: &ProxyOrigin, path: &str, query: Option<&str>) -> Result<Url, ProxyError> {
        let remainder = origin.strip_separator(path.trim_start_matches('/'));
        let keyword = percent_decode_str(remainder).decode_utf8_lossy();
        let keyword = keyword.trim();

        if keyword.is_empty() {
            return Err(ProxyError::InvalidTarget("Empty target".to_string()));
        }

        if !keyword.contains('.') {
            let search = format!("{}{}", self.config.search_url, utf8_percent_encode(keyword, NON_ALPHANUMERIC));
            return Url::parse(&search)
                .map_err(|e| ProxyError::InvalidTarget(format!("Bad search URL {}: {}", search, e)));
        }

        let candidate = match query {
            Some(q) => format!("https://{}?{}", remainder, q),
            None => format!("https://{}", remainder),
        };
        Url::parse(&candidate)
            .ok()
            .filter(|url| url.host_str().is_some_and(|host| !host.is_empty()))
            .ok_or_else(|| ProxyError::InvalidTarget(format!("Cannot resolve {}", remainder)))
    }

    pub fn check_whitelist(&self, target: &Url) -> Result<(), ProxyError> {
        if self.config.allowed_domains.is_empty() {
            return Ok(());
        }
        let host = target.host_str().unwrap_or_default();
        if matches_domain_pattern(host, &self.config.allowed_domains) {
            Ok(())
        } else {
            Err(ProxyError::DomainNotAllowed(host.to_string()))
        }
    }
}

/// Matches a host against NO_PROXY style patterns:
/// - "example.com" matches example.com and any subdomain
/// - ".example.com" and "*.example.com" match subdomains only
pub fn matches_domain_pattern(host: &str, patterns: &[String]) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    patterns.iter().any(|pattern| {
        let pattern = pattern.trim().to_ascii_lowercase();
        if let Some(domain) = pattern.strip_prefix("*.").or_else(|| pattern.strip_prefix('.')) {
            host.ends_with(&format!(".{}", domain))
        } else {
            !pattern.is_empty() && (host == pattern || host.ends_with(&format!(".{}", pattern)))
        }
    })
}
