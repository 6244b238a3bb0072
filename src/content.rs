//! Content-type dispatch for upstream bodies.
//!
//! HTML is rewritten incrementally: a spawned task pulls upstream frames,
//! feeds them through the decoder and a `Send` `lol_html` rewriter, and pushes
//! rewritten chunks through a bounded channel into a [`ChannelBody`]. CSS and
//! JavaScript are buffered and rewritten whole.
//! Everything else passes through untouched.

use crate::body::{self, ChannelBody, ProxyBody};
use crate::codec::ProxyContext;
use crate::css_rewriter::CssRewriter;
use crate::error::{BoxError, ProxyError};
use crate::headers::mark_body_rewritten;
use crate::html_rewriter::{self, HtmlOptions};
use crate::js_rewriter::JsRewriter;
use bytes::Bytes;
use flate2::write::{GzDecoder, ZlibDecoder};
use http::HeaderMap;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use http_body_util::BodyExt;
use hyper::body::Body;
use log::{debug, warn};
use lol_html::send::HtmlRewriter;
use std::borrow::Cow;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Css,
    JavaScript,
    Other,
}

impl ContentKind {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return ContentKind::Other;
        };
        let media_type = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();

        if media_type == "text/html" || media_type == "application/xhtml+xml" {
            ContentKind::Html
        } else if media_type == "text/css" {
            ContentKind::Css
        } else if media_type.contains("javascript") || media_type.contains("ecmascript") {
            ContentKind::JavaScript
        } else {
            ContentKind::Other
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::from_content_type(headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()))
    }
}

/// Undoes the upstream `Content-Encoding` so the rewriters see plain text.
pub enum BodyDecoder {
    Identity,
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(ZlibDecoder<Vec<u8>>),
}

impl BodyDecoder {
    /// `None` for encodings we cannot undo; such bodies are passed through.
    pub fn for_encoding(content_encoding: Option<&str>) -> Option<Self> {
        match content_encoding.map(|e| e.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("identity") => Some(BodyDecoder::Identity),
            Some("gzip") | Some("x-gzip") => Some(BodyDecoder::Gzip(GzDecoder::new(Vec::new()))),
            Some("deflate") => Some(BodyDecoder::Deflate(ZlibDecoder::new(Vec::new()))),
            Some(_) => None,
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        match headers.get(CONTENT_ENCODING) {
            Some(value) => Self::for_encoding(Some(value.to_str().ok()?)),
            None => Some(BodyDecoder::Identity),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, BodyDecoder::Identity)
    }

    /// Feeds one chunk and returns whatever plain bytes are ready.
    pub fn decode<'a>(&mut self, chunk: &'a [u8]) -> io::Result<Cow<'a, [u8]>> {
        match self {
            BodyDecoder::Identity => Ok(Cow::Borrowed(chunk)),
            BodyDecoder::Gzip(decoder) => {
                decoder.write_all(chunk)?;
                Ok(Cow::Owned(std::mem::take(decoder.get_mut())))
            }
            BodyDecoder::Deflate(decoder) => {
                decoder.write_all(chunk)?;
                Ok(Cow::Owned(std::mem::take(decoder.get_mut())))
            }
        }
    }

    pub fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            BodyDecoder::Identity => Ok(Vec::new()),
            BodyDecoder::Gzip(decoder) => decoder.finish(),
            BodyDecoder::Deflate(decoder) => decoder.finish(),
        }
    }
}

pub struct ContentRewriter {
    ctx: ProxyContext,
    html: HtmlOptions,
}

impl ContentRewriter {
    pub fn new(ctx: ProxyContext, html: HtmlOptions) -> Self {
        Self { ctx, html }
    }

    /// Picks the rewriter for the response and adjusts `headers` to match the
    /// body it returns. Headers are final once this returns.
    pub async fn rewrite<B>(self, headers: &mut HeaderMap, body: B) -> Result<ProxyBody, ProxyError>
    where
        B: Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: Into<BoxError> + Send,
    {
        let kind = ContentKind::from_headers(headers);
        if kind == ContentKind::Other {
            return Ok(body::boxed(body));
        }

        let Some(decoder) = BodyDecoder::from_headers(headers) else {
            debug!("Passing {:?} body through, encoding {:?} not supported", kind, headers.get(CONTENT_ENCODING));
            return Ok(body::boxed(body));
        };
        let decoded = !decoder.is_identity();

        if kind == ContentKind::Html {
            mark_body_rewritten(headers, decoded);
            return Ok(body::boxed(stream_html(body, decoder, self.ctx, self.html)));
        }

        let raw = body
            .collect()
            .await
            .map_err(|e| ProxyError::Http(Into::<BoxError>::into(e).to_string()))?
            .to_bytes();

        let plain = match decode_all(decoder, &raw) {
            Ok(plain) => plain,
            Err(e) => {
                warn!("Cannot decode {:?} body from {}: {}", kind, self.ctx.target(), e);
                return Ok(body::full(raw));
            }
        };
        mark_body_rewritten(headers, decoded);

        let Ok(text) = std::str::from_utf8(&plain) else {
            debug!("{:?} body from {} is not UTF-8, left unrewritten", kind, self.ctx.target());
            return Ok(body::full(plain));
        };

        let rewritten = match kind {
            ContentKind::Css => CssRewriter::new(&self.ctx).rewrite(text),
            _ => JsRewriter::new(&self.ctx).rewrite(text),
        };
        Ok(body::full(rewritten))
    }
}

fn decode_all(mut decoder: BodyDecoder, raw: &Bytes) -> io::Result<Bytes> {
    if decoder.is_identity() {
        return Ok(raw.clone());
    }
    let mut plain = decoder.decode(raw)?.into_owned();
    plain.extend_from_slice(&decoder.finish()?);
    Ok(Bytes::from(plain))
}

/// Streams `body` through the HTML rewriter.
pub fn stream_html<B>(body: B, decoder: BodyDecoder, ctx: ProxyContext, options: HtmlOptions) -> ChannelBody
where
    B: Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: Into<BoxError> + Send,
{
    let (output_tx, output_rx) = mpsc::channel::<Result<Bytes, BoxError>>(CHANNEL_CAPACITY);
    tokio::spawn(rewrite_html(body, output_tx, decoder, ctx, options));
    ChannelBody::new(output_rx)
}

async fn rewrite_html<B>(
    mut body: B,
    output: mpsc::Sender<Result<Bytes, BoxError>>,
    mut decoder: BodyDecoder,
    ctx: ProxyContext,
    options: HtmlOptions,
) where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError> + Send,
{
    let sink = Mutex::new(Vec::new());
    let mut rewriter = HtmlRewriter::new(html_rewriter::settings(&ctx, &options), |c: &[u8]| {
        sink.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(c)
    });

    while let Some(frame) = body.frame().await {
        let result = match frame {
            Ok(frame) => match frame.into_data() {
                Ok(chunk) => decoder
                    .decode(&chunk)
                    .map_err(BoxError::from)
                    .and_then(|plain| rewriter.write(&plain).map_err(rewrite_error)),
                Err(_) => continue,
            },
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!("HTML rewrite of {} aborted: {}", ctx.target(), e);
            let _ = output.send(Err(e)).await;
            return;
        }
        // A closed channel means the client went away; returning drops
        // `body` and with it the upstream fetch.
        if !flush(&sink, &output).await {
            debug!("Client went away while streaming {}", ctx.target());
            return;
        }
    }

    let result = decoder.finish().map_err(BoxError::from).and_then(|tail| {
        rewriter.write(&tail).map_err(rewrite_error)?;
        rewriter.end().map_err(rewrite_error)
    });
    if let Err(e) = result {
        warn!("HTML rewrite of {} failed at end of document: {}", ctx.target(), e);
        let _ = output.send(Err(e)).await;
        return;
    }
    flush(&sink, &output).await;
}

async fn flush(sink: &Mutex<Vec<u8>>, output: &mpsc::Sender<Result<Bytes, BoxError>>) -> bool {
    let chunk = std::mem::take(&mut *sink.lock().unwrap_or_else(PoisonError::into_inner));
    chunk.is_empty() || output.send(Ok(Bytes::from(chunk))).await.is_ok()
}

fn rewrite_error(e: lol_html::errors::RewritingError) -> BoxError {
    format!("HTML rewriting error: {}", e).into()
}
