use crate::body::{self, ProxyBody};
use crate::codec::{ProxyContext, ProxyOrigin};
use crate::common::ResponseBuilder;
use crate::config::Config;
use crate::content::{ContentKind, ContentRewriter};
use crate::error::{BoxError, ProxyError};
use crate::headers::HeaderTranslator;
use crate::html_rewriter::HtmlOptions;
use crate::pages;
use crate::resolver::{Resolution, TargetResolver};
use hyper::body::{Body, Bytes};
use hyper::header::{CONTENT_LENGTH, HOST};
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

pub type HttpClient = Client<HttpsConnector<HttpConnector>, ProxyBody>;

/// Handles one request end to end: resolve, fetch, translate headers, rewrite.
///
/// Nothing is carried over between requests apart from the shared config and
/// the client's connection pool.
#[derive(Clone)]
pub struct RewritingProxy {
    config: Arc<Config>,
    client: HttpClient,
}

impl RewritingProxy {
    pub fn new(config: Arc<Config>) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(config.connect_timeout_secs.map(Duration::from_secs));

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host.unwrap_or(10))
            .pool_idle_timeout(config.pool_idle_timeout_secs.map(Duration::from_secs))
            .build(HttpsConnector::new_with_connector(http));

        Self { config, client }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let Some(host) = request_host(&req) else {
            return ResponseBuilder::error(StatusCode::BAD_REQUEST, "Missing Host header");
        };
        let origin = ProxyOrigin::new(&self.config.proxy_scheme, &host, &self.config.separator);

        let resolution = match TargetResolver::new(&self.config).resolve(&origin, req.uri(), req.headers()) {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!("Rejected {} {}: {}", req.method(), req.uri(), e);
                return ResponseBuilder::from_error(&e);
            }
        };

        let (target, ctx) = match resolution {
            Resolution::Homepage => return ResponseBuilder::html(StatusCode::OK, pages::homepage()),
            Resolution::Proxied(target) => {
                let ctx = ProxyContext::new(origin, target.clone());
                (target, Some(ctx))
            }
            Resolution::Forward(target) => (target, None),
        };

        match self.forward(req, &target, ctx).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Upstream request to {} failed: {}", target, e);
                ResponseBuilder::html(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    pages::upstream_error_page(target.as_str(), &e.to_string()),
                )
            }
        }
    }

    async fn forward<B>(
        &self,
        req: Request<B>,
        target: &Url,
        ctx: Option<ProxyContext>,
    ) -> Result<Response<ProxyBody>, ProxyError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, client_body) = req.into_parts();
        let translator = HeaderTranslator::new(&self.config.browser_emulation);

        let mut upstream_url = target.clone();
        upstream_url.set_fragment(None);
        let uri: Uri = upstream_url
            .as_str()
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| ProxyError::InvalidTarget(e.to_string()))?;

        let mut headers = translator.outbound(&parts.headers, target);
        let outbound_body = if parts.method == Method::GET || parts.method == Method::HEAD {
            headers.remove(CONTENT_LENGTH);
            body::empty()
        } else {
            body::boxed(client_body)
        };

        let mut upstream_req = Request::new(outbound_body);
        *upstream_req.method_mut() = parts.method.clone();
        *upstream_req.uri_mut() = uri;
        *upstream_req.headers_mut() = headers;

        let response = match self.config.request_timeout_secs {
            Some(secs) => timeout(Duration::from_secs(secs), self.client.request(upstream_req))
                .await
                .map_err(|_| ProxyError::UpstreamUnreachable(format!("Request timed out after {}s", secs)))?,
            None => self.client.request(upstream_req).await,
        }
        .map_err(|e| ProxyError::UpstreamUnreachable(error_chain(&e)))?;

        let (mut response_parts, upstream_body) = response.into_parts();
        info!("{} {} -> {}", parts.method, target, response_parts.status);

        translator.inbound(response_parts.status, &mut response_parts.headers, ctx.as_ref());

        let body = match ctx {
            Some(ctx) if carries_body(&parts.method, response_parts.status) => {
                let options = match ContentKind::from_headers(&response_parts.headers) {
                    ContentKind::Html => HtmlOptions::for_context(&self.config, &ctx),
                    _ => HtmlOptions::default(),
                };
                ContentRewriter::new(ctx, options)
                    .rewrite(&mut response_parts.headers, upstream_body)
                    .await?
            }
            _ => body::boxed(upstream_body),
        };

        Ok(Response::from_parts(response_parts, body))
    }
}

fn request_host<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
}

fn carries_body(method: &Method, status: StatusCode) -> bool {
    method != Method::HEAD && status != StatusCode::NO_CONTENT && status != StatusCode::NOT_MODIFIED
}

// The legacy client's top-level error only says which stage failed.
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    debug!("Upstream error chain: {}", message);
    message
}
