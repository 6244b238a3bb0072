//! Proxy URL codec.
//!
//! A target such as `https://example.com/a?b=1` is addressed through the proxy
//! as `https://proxy.test/{separator}https://example.com/a?b=1`. Everything the
//! rewriters emit goes through [`ProxyOrigin::encode`], and everything the
//! resolver reads back goes through [`ProxyOrigin::decode`], so a rewritten
//! page, a rewritten redirect and a typed-in URL all look the same.

use std::borrow::Cow;
use url::Url;

/// The public origin of the proxy plus the separator token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyOrigin {
    scheme: String,
    host: String,
    separator: String,
    root: String,
    prefix: String,
}

impl ProxyOrigin {
    pub fn new(scheme: &str, host: &str, separator: &str) -> Self {
        let root = format!("{}://{}/", scheme, host);
        let prefix = format!("{}{}", root, separator);
        Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            separator: separator.to_string(),
            root,
            prefix,
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// `{scheme}://{host}/{separator}`, the text every encoded URL starts with.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn encode(&self, target: &Url) -> String {
        format!("{}{}", self.prefix, target.as_str())
    }

    /// True if `url` already points at the proxy origin.
    pub fn is_encoded(&self, url: &str) -> bool {
        strip_prefix_ignore_case(url, &self.root).is_some()
    }

    /// Recovers the target from a proxy-addressed URL or a bare request path
    /// (`/sep/https://...`, query included). `None` means the input is not in
    /// path-embedded form and the caller has to try something else.
    pub fn decode(&self, url: &str) -> Option<Url> {
        let path = if url.starts_with('/') { url } else { self.strip_origin(url)? };
        parse_embedded(self.strip_separator(&path[1..]))
    }

    /// Path (with leading `/`) of a URL served by this proxy host, either scheme.
    pub fn strip_origin<'a>(&self, url: &'a str) -> Option<&'a str> {
        let rest = strip_prefix_ignore_case(url, "https://")
            .or_else(|| strip_prefix_ignore_case(url, "http://"))?;
        let rest = strip_prefix_ignore_case(rest, &self.host)?;
        rest.starts_with('/').then_some(rest)
    }

    pub fn strip_separator<'a>(&self, path: &'a str) -> &'a str {
        if self.separator.is_empty() {
            return path;
        }
        path.strip_prefix(self.separator.as_str()).unwrap_or(path)
    }
}

/// Per-request rewriting state: where we are served from and what we fetched.
#[derive(Debug, Clone)]
pub struct ProxyContext {
    origin: ProxyOrigin,
    target: Url,
}

impl ProxyContext {
    pub fn new(origin: ProxyOrigin, target: Url) -> Self {
        Self { origin, target }
    }

    pub fn origin(&self) -> &ProxyOrigin {
        &self.origin
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Absolute upstream URL for an embedded reference, or `None` when the
    /// value must be left exactly as it is.
    pub fn resolve(&self, raw: &str) -> Option<Url> {
        let value = raw.trim();
        if value.is_empty()
            || value.starts_with('#')
            || strip_prefix_ignore_case(value, "data:").is_some()
            || strip_prefix_ignore_case(value, "javascript:").is_some()
            || self.origin.is_encoded(value)
        {
            return None;
        }

        let normalized: Cow<'_, str> = if value.starts_with("//") {
            Cow::Owned(format!("{}:{}", self.target.scheme(), value))
        } else {
            Cow::Borrowed(value)
        };

        let absolute = self.target.join(&normalized).ok()?;
        matches!(absolute.scheme(), "http" | "https").then_some(absolute)
    }

    /// Proxy-addressed form of an embedded reference; `None` leaves it untouched.
    pub fn rewrite_url(&self, raw: &str) -> Option<String> {
        self.resolve(raw).map(|absolute| self.origin.encode(&absolute))
    }
}

/// Parses the part of a proxy path after the separator as an absolute
/// `http(s)` URL.
pub(crate) fn parse_embedded(remainder: &str) -> Option<Url> {
    let repaired = repair_scheme_slashes(remainder)?;
    let url = Url::parse(&repaired).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

// Front-ends that merge slashes turn `/https://x` into `/https:/x`.
fn repair_scheme_slashes(remainder: &str) -> Option<Cow<'_, str>> {
    for scheme in ["https:", "http:"] {
        if let Some(rest) = strip_prefix_ignore_case(remainder, scheme) {
            if rest.starts_with("//") {
                return Some(Cow::Borrowed(remainder));
            }
            if rest.starts_with('/') {
                return Some(Cow::Owned(format!("{}//{}", scheme, rest.trim_start_matches('/'))));
            }
            return None;
        }
    }
    None
}

pub(crate) fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    value
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &value[prefix.len()..])
}
