//! Best-effort URL rewriting for JavaScript text.
//!
//! Only quoted literals that are exactly an absolute `http(s)://` URL are
//! touched. Template literals, escaped slashes (`https:\/\/`), concatenated or
//! computed URLs are left as they are, and a string that merely looks like a
//! URL is rewritten even if the script never fetches it.

use crate::codec::ProxyContext;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static URL_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(https?://[^"\\\s]*)"|'(https?://[^'\\\s]*)'"#).unwrap());

pub struct JsRewriter<'a> {
    ctx: &'a ProxyContext,
}

impl<'a> JsRewriter<'a> {
    pub fn new(ctx: &'a ProxyContext) -> Self {
        Self { ctx }
    }

    pub fn rewrite(&self, script: &str) -> String {
        URL_LITERAL
            .replace_all(script, |caps: &Captures| {
                let (quote, value) = match caps.get(1) {
                    Some(m) => ('"', m.as_str()),
                    None => ('\'', caps.get(2).map_or("", |m| m.as_str())),
                };
                match self.ctx.rewrite_url(value) {
                    Some(rewritten) => format!("{}{}{}", quote, rewritten, quote),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}
