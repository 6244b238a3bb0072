use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{
    ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HOST, LOCATION, REFERER, SET_COOKIE,
    USER_AGENT,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use mirrorgate::config::{BrowserEmulation, Config};
use mirrorgate::{ProxyServer, RewritingProxy};
use std::convert::Infallible;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

const PAGE: &str = r#"<html><head><title>Upstream</title><link rel="stylesheet" href="/style.css"></head><body><a href="/about">About</a><img src="logo.png"><a href="data:text/plain,hi">inline</a></body></html>"#;
const STYLE: &str = "body{background:url(/img.png)}";

fn reply(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .body(Full::new(body.into()))
        .unwrap()
}

async fn upstream(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method().clone(), req.uri().path()) {
        (Method::GET, "/page") => reply(StatusCode::OK, "text/html; charset=utf-8", PAGE),
        (Method::GET, "/style.css") => reply(StatusCode::OK, "text/css", STYLE),
        (Method::GET, "/gzip") => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(PAGE.as_bytes()).unwrap();
            let mut response = reply(StatusCode::OK, "text/html", encoder.finish().unwrap());
            response.headers_mut().insert(CONTENT_ENCODING, "gzip".parse().unwrap());
            response
        }
        (Method::GET, "/redirect") => {
            let mut response = reply(StatusCode::FOUND, "text/plain", "");
            response.headers_mut().insert(LOCATION, "/landing?from=redirect".parse().unwrap());
            response
        }
        (Method::GET, "/cookies") => {
            let mut response = reply(StatusCode::OK, "text/plain", "cookies");
            let headers = response.headers_mut();
            headers.append(SET_COOKIE, "a=1; Path=/".parse().unwrap());
            headers.append(SET_COOKIE, "b=2; Path=/".parse().unwrap());
            headers.insert("content-security-policy", "default-src 'self'".parse().unwrap());
            headers.insert("x-frame-options", "DENY".parse().unwrap());
            response
        }
        (Method::POST, "/echo") => {
            let user_agent = req.headers().get(USER_AGENT).cloned();
            let body = req.into_body().collect().await.unwrap().to_bytes();
            let mut response = reply(StatusCode::OK, "text/plain", body);
            if let Some(user_agent) = user_agent {
                response.headers_mut().insert("x-upstream-user-agent", user_agent);
            }
            response
        }
        (Method::GET, "/") => {
            let query = req.uri().query().unwrap_or_default().to_string();
            reply(StatusCode::OK, "text/plain", format!("root:{}", query))
        }
        _ => reply(StatusCode::NOT_FOUND, "text/plain", "not found"),
    };
    Ok(response)
}

async fn spawn_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(upstream))
                    .await;
            });
        }
    });
    addr
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.proxy_hosts = vec!["proxy.test".to_string()];
    config.separator = "----".to_string();
    config.request_timeout_secs = Some(5);
    config
}

fn proxy() -> RewritingProxy {
    RewritingProxy::new(Arc::new(test_config()))
}

fn get(path: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .uri(path)
        .header(HOST, "proxy.test")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

async fn body_text<B>(response: Response<B>) -> String
where
    B: hyper::body::Body,
    B::Error: std::fmt::Debug,
{
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_html_links_point_back_through_proxy() {
    let upstream = spawn_upstream().await;
    let response = proxy().handle(get(&format!("/----http://{}/page", upstream))).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(CONTENT_LENGTH).is_none());

    let html = body_text(response).await;
    let prefix = format!("https://proxy.test/----http://{}", upstream);
    assert!(html.contains(&format!(r#"href="{}/about""#, prefix)), "{}", html);
    assert!(html.contains(&format!(r#"href="{}/style.css""#, prefix)));
    assert!(html.contains(&format!(r#"src="{}/logo.png""#, prefix)));
    assert!(html.contains(&format!(r#"data-original-src="http://{}/logo.png""#, upstream)));
    assert!(html.contains(r#"href="data:text/plain,hi""#));
    assert!(html.contains("<script>"));
}

#[tokio::test]
async fn test_fallback_script_can_be_disabled() {
    let upstream = spawn_upstream().await;
    let mut config = test_config();
    config.fallback.enabled = false;
    let proxy = RewritingProxy::new(Arc::new(config));

    let html = body_text(proxy.handle(get(&format!("/----http://{}/page", upstream))).await).await;
    assert!(!html.contains("<script>"));
    assert!(html.contains("https://proxy.test/----"));
}

#[tokio::test]
async fn test_css_urls_are_rewritten() {
    let upstream = spawn_upstream().await;
    let response = proxy().handle(get(&format!("/----http://{}/style.css", upstream))).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        format!("body{{background:url(https://proxy.test/----http://{}/img.png)}}", upstream)
    );
}

#[tokio::test]
async fn test_gzip_page_is_decoded_and_rewritten() {
    let upstream = spawn_upstream().await;
    let response = proxy().handle(get(&format!("/----http://{}/gzip", upstream))).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(CONTENT_ENCODING).is_none());
    let html = body_text(response).await;
    assert!(html.contains(&format!("https://proxy.test/----http://{}/about", upstream)));
}

#[tokio::test]
async fn test_redirect_location_stays_on_proxy() {
    let upstream = spawn_upstream().await;
    let response = proxy().handle(get(&format!("/----http://{}/redirect", upstream))).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(LOCATION).unwrap(),
        format!("https://proxy.test/----http://{}/landing?from=redirect", upstream).as_str()
    );
}

#[tokio::test]
async fn test_cookies_kept_and_blocking_headers_dropped() {
    let upstream = spawn_upstream().await;
    let response = proxy().handle(get(&format!("/----http://{}/cookies", upstream))).await;

    let headers = response.headers();
    let cookies: Vec<_> = headers.get_all(SET_COOKIE).iter().collect();
    assert_eq!(cookies.len(), 2);
    assert!(headers.get("content-security-policy").is_none());
    assert!(headers.get("x-frame-options").is_none());
    assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
}

#[tokio::test]
async fn test_post_body_and_browser_headers_reach_upstream() {
    let upstream = spawn_upstream().await;
    let req = Request::builder()
        .method(Method::POST)
        .uri(format!("/----http://{}/echo", upstream))
        .header(HOST, "proxy.test")
        .header(USER_AGENT, "curl/8.0")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Full::new(Bytes::from_static(b"name=value")))
        .unwrap();

    let response = proxy().handle(req).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-upstream-user-agent").unwrap(),
        BrowserEmulation::default().user_agent.as_str()
    );
    assert_eq!(body_text(response).await, "name=value");
}

// Recovery relies on the Referer the browser sends, so it only works while
// that Referer is a proxied page.
#[tokio::test]
async fn test_root_query_recovered_from_referer() {
    let upstream = spawn_upstream().await;
    let mut req = get("/?q=cats");
    req.headers_mut().insert(
        REFERER,
        format!("https://proxy.test/----http://{}/page", upstream).parse().unwrap(),
    );

    let response = proxy().handle(req).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "root:q=cats");
}

#[tokio::test]
async fn test_relative_path_recovered_from_referer() {
    let upstream = spawn_upstream().await;
    let mut req = get("/style.css");
    req.headers_mut().insert(
        REFERER,
        format!("https://proxy.test/----http://{}/page", upstream).parse().unwrap(),
    );

    let response = proxy().handle(req).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("https://proxy.test/----"));
}

#[tokio::test]
async fn test_rejections() {
    let mut config = test_config();
    config.allowed_domains = vec!["example.com".to_string()];
    let proxy = RewritingProxy::new(Arc::new(config));

    let response = proxy.handle(get("/----https://evil.com/")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = proxy.handle(get("/proxy")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unreachable_upstream_gets_diagnostic_page() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let response = proxy().handle(get(&format!("/----http://{}/page", dead))).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let page = body_text(response).await;
    assert!(page.contains(&format!("http://{}/page", dead)));
}

#[tokio::test]
async fn test_homepage_served_and_disabled() {
    let response = proxy().handle(get("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("<form"));

    let mut config = test_config();
    config.homepage = false;
    let response = RewritingProxy::new(Arc::new(config)).handle(get("/")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_server_over_socket() {
    let upstream = spawn_upstream().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();
    tokio::spawn(ProxyServer::new(Arc::new(test_config())).serve(listener));

    let client = Client::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
    let req = Request::builder()
        .uri(format!("http://{}/----http://{}/page", proxy_addr, upstream))
        .header(HOST, "proxy.test")
        .body(Full::new(Bytes::new()))
        .unwrap();

    let response = client.request(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains(&format!("https://proxy.test/----http://{}/about", upstream)));
}
