use crate::codec::ProxyContext;
use crate::config::BrowserEmulation;
use http::header::{
    ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, HOST,
    HeaderName, HeaderValue, LOCATION, ORIGIN, REFERER, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use http::{HeaderMap, StatusCode};
use log::{debug, warn};
use url::Url;

/// Client headers that survive into the upstream request.
const FORWARDED_REQUEST_HEADERS: &[&str] = &[
    "cookie",
    "range",
    "if-none-match",
    "if-modified-since",
    "if-match",
    "if-unmodified-since",
    "if-range",
    "content-type",
    "content-length",
];

/// Upstream headers that would stop the rewritten page from framing or
/// loading proxied resources.
const BLOCKING_RESPONSE_HEADERS: &[&str] = &[
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
    "x-content-type-options",
];

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS, PATCH, HEAD";

static X_REQUESTED_WITH: HeaderName = HeaderName::from_static("x-requested-with");
static SEC_FETCH_DEST: HeaderName = HeaderName::from_static("sec-fetch-dest");
static SEC_FETCH_MODE: HeaderName = HeaderName::from_static("sec-fetch-mode");
static SEC_FETCH_SITE: HeaderName = HeaderName::from_static("sec-fetch-site");
static SEC_FETCH_USER: HeaderName = HeaderName::from_static("sec-fetch-user");

pub struct HeaderTranslator<'a> {
    emulation: &'a BrowserEmulation,
}

impl<'a> HeaderTranslator<'a> {
    pub fn new(emulation: &'a BrowserEmulation) -> Self {
        Self { emulation }
    }

    /// Builds the upstream request headers from scratch.
    pub fn outbound(&self, client: &HeaderMap, target: &Url) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for name in FORWARDED_REQUEST_HEADERS {
            for value in client.get_all(*name) {
                headers.append(*name, value.clone());
            }
        }

        let emulation = self.emulation;
        set_header(&mut headers, USER_AGENT, &emulation.user_agent);
        set_header(&mut headers, ACCEPT, &emulation.accept);
        set_header(&mut headers, ACCEPT_LANGUAGE, &emulation.accept_language);
        set_header(&mut headers, ACCEPT_ENCODING, &emulation.accept_encoding);
        set_header(&mut headers, CONNECTION, &emulation.connection);
        set_header(&mut headers, UPGRADE_INSECURE_REQUESTS, &emulation.upgrade_insecure_requests);
        set_header(&mut headers, SEC_FETCH_DEST.clone(), &emulation.sec_fetch_dest);
        set_header(&mut headers, SEC_FETCH_MODE.clone(), &emulation.sec_fetch_mode);
        set_header(&mut headers, SEC_FETCH_SITE.clone(), &emulation.sec_fetch_site);
        set_header(&mut headers, SEC_FETCH_USER.clone(), &emulation.sec_fetch_user);

        let host = match (target.host_str(), target.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };
        set_header(&mut headers, HOST, &host);
        set_header(&mut headers, ORIGIN, &target.origin().ascii_serialization());
        set_header(&mut headers, REFERER, target.as_str());

        if let Some(value) = xhr_marker(client) {
            headers.insert(X_REQUESTED_WITH.clone(), value);
        }

        headers
    }

    /// Adjusts upstream response headers in place. `ctx` is `None` for plain
    /// forward-proxy responses, which keep their `Location` untouched.
    pub fn inbound(&self, status: StatusCode, headers: &mut HeaderMap, ctx: Option<&ProxyContext>) {
        for name in BLOCKING_RESPONSE_HEADERS.iter().chain(HOP_BY_HOP_HEADERS) {
            headers.remove(*name);
        }

        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
        headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));

        if let (true, Some(ctx)) = (status.is_redirection(), ctx) {
            rewrite_location(headers, ctx);
        }
    }
}

/// Drops headers describing the upstream body once it has been rewritten.
pub fn mark_body_rewritten(headers: &mut HeaderMap, decoded: bool) {
    headers.remove(CONTENT_LENGTH);
    if decoded {
        headers.remove(CONTENT_ENCODING);
    }
}

fn rewrite_location(headers: &mut HeaderMap, ctx: &ProxyContext) {
    let Some(location) = headers.get(LOCATION).and_then(|v| v.to_str().ok()) else {
        return;
    };

    match ctx.rewrite_url(location).map(|rewritten| HeaderValue::from_str(&rewritten)) {
        Some(Ok(value)) => {
            debug!("Redirect {} -> {:?}", location, value);
            headers.insert(LOCATION, value);
        }
        Some(Err(e)) => warn!("Rewritten Location is not a valid header value: {}", e),
        None => debug!("Location left unchanged: {}", location),
    }
}

fn xhr_marker(client: &HeaderMap) -> Option<HeaderValue> {
    let requested_with = client.get(&X_REQUESTED_WITH);
    let is_xml_http = requested_with.is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"XMLHttpRequest"));
    let wants_json = client
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));

    if !is_xml_http && !wants_json {
        return None;
    }
    Some(requested_with.cloned().unwrap_or_else(|| HeaderValue::from_static("XMLHttpRequest")))
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => warn!("Skipping invalid value for header {}", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ProxyOrigin;
    use http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};

    fn target() -> Url {
        Url::parse("https://example.com:8443/a/b?c=d").unwrap()
    }

    fn ctx() -> ProxyContext {
        ProxyContext::new(ProxyOrigin::new("https", "proxy.test", "----"), target())
    }

    #[test]
    fn test_outbound_keeps_only_allow_list() {
        let emulation = BrowserEmulation::default();
        let mut client = HeaderMap::new();
        client.insert(COOKIE, HeaderValue::from_static("session=abc"));
        client.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-www-form-urlencoded"));
        client.insert("if-none-match", HeaderValue::from_static("\"etag\""));
        client.insert("authorization", HeaderValue::from_static("Bearer secret"));
        client.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        client.insert(HOST, HeaderValue::from_static("proxy.test"));

        let headers = HeaderTranslator::new(&emulation).outbound(&client, &target());

        assert_eq!(headers.get(COOKIE).unwrap(), "session=abc");
        assert_eq!(headers.get("if-none-match").unwrap(), "\"etag\"");
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/x-www-form-urlencoded");
        assert!(headers.get("authorization").is_none());
        assert!(headers.get("x-forwarded-for").is_none());
        assert!(headers.get(&X_REQUESTED_WITH).is_none());

        assert_eq!(headers.get(HOST).unwrap(), "example.com:8443");
        assert_eq!(headers.get(ORIGIN).unwrap(), "https://example.com:8443");
        assert_eq!(headers.get(REFERER).unwrap(), "https://example.com:8443/a/b?c=d");
        assert_eq!(headers.get(USER_AGENT).unwrap(), emulation.user_agent.as_str());
        assert_eq!(headers.get(ACCEPT_ENCODING).unwrap(), "gzip, deflate");
        assert_eq!(headers.get("sec-fetch-mode").unwrap(), "navigate");
    }

    #[test]
    fn test_outbound_host_omits_default_port() {
        let emulation = BrowserEmulation::default();
        let target = Url::parse("https://example.com:443/").unwrap();
        let headers = HeaderTranslator::new(&emulation).outbound(&HeaderMap::new(), &target);
        assert_eq!(headers.get(HOST).unwrap(), "example.com");
    }

    #[test]
    fn test_outbound_xhr_detection() {
        let emulation = BrowserEmulation::default();
        let translator = HeaderTranslator::new(&emulation);

        let mut client = HeaderMap::new();
        client.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain"));
        let headers = translator.outbound(&client, &target());
        assert_eq!(headers.get(&X_REQUESTED_WITH).unwrap(), "XMLHttpRequest");

        let mut client = HeaderMap::new();
        client.insert("x-requested-with", HeaderValue::from_static("xmlhttprequest"));
        let headers = translator.outbound(&client, &target());
        assert_eq!(headers.get(&X_REQUESTED_WITH).unwrap(), "xmlhttprequest");
    }

    #[test]
    fn test_inbound_strips_blocking_headers_and_sets_cors() {
        let emulation = BrowserEmulation::default();
        let mut headers = HeaderMap::new();
        headers.insert("content-security-policy", HeaderValue::from_static("default-src 'self'"));
        headers.insert("content-security-policy-report-only", HeaderValue::from_static("default-src 'self'"));
        headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
        headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("https://example.com"));

        HeaderTranslator::new(&emulation).inbound(StatusCode::OK, &mut headers, Some(&ctx()));

        for name in BLOCKING_RESPONSE_HEADERS {
            assert!(headers.get(*name).is_none(), "{name} should be stripped");
        }
        assert!(headers.get("transfer-encoding").is_none());
        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_METHODS).unwrap(), ALLOWED_METHODS);
        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_HEADERS).unwrap(), "*");
        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(), "true");
    }

    #[test]
    fn test_inbound_keeps_each_set_cookie() {
        let emulation = BrowserEmulation::default();
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1; Path=/"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2; Path=/; HttpOnly"));

        HeaderTranslator::new(&emulation).inbound(StatusCode::OK, &mut headers, Some(&ctx()));

        let cookies: Vec<_> = headers.get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies, vec!["a=1; Path=/", "b=2; Path=/; HttpOnly"]);
    }

    #[test]
    fn test_redirect_location_is_reencoded() {
        let emulation = BrowserEmulation::default();
        let translator = HeaderTranslator::new(&emulation);
        let ctx = ctx();

        for (location, expected) in [
            ("/login?next=%2F", "https://example.com:8443/login?next=%2F"),
            ("https://accounts.example.org/x", "https://accounts.example.org/x"),
            ("c", "https://example.com:8443/a/c"),
        ] {
            let mut headers = HeaderMap::new();
            headers.insert(LOCATION, HeaderValue::from_str(location).unwrap());
            translator.inbound(StatusCode::FOUND, &mut headers, Some(&ctx));

            let rewritten = headers.get(LOCATION).unwrap().to_str().unwrap();
            assert!(rewritten.starts_with("https://proxy.test/----"));
            assert_eq!(ctx.origin().decode(rewritten).unwrap().as_str(), expected);
        }
    }

    #[test]
    fn test_location_untouched_outside_redirects_and_forward_mode() {
        let emulation = BrowserEmulation::default();
        let translator = HeaderTranslator::new(&emulation);

        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("/created/1"));
        translator.inbound(StatusCode::CREATED, &mut headers, Some(&ctx()));
        assert_eq!(headers.get(LOCATION).unwrap(), "/created/1");

        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("/elsewhere"));
        translator.inbound(StatusCode::MOVED_PERMANENTLY, &mut headers, None);
        assert_eq!(headers.get(LOCATION).unwrap(), "/elsewhere");
    }

    #[test]
    fn test_mark_body_rewritten() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("42"));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        mark_body_rewritten(&mut headers, false);
        assert!(headers.get(CONTENT_LENGTH).is_none());
        assert!(headers.get(CONTENT_ENCODING).is_some());
        mark_body_rewritten(&mut headers, true);
        assert!(headers.get(CONTENT_ENCODING).is_none());
    }
}
