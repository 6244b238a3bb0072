//! Regex-based URL rewriting for stylesheets, `<style>` bodies and `style`
//! attributes.
//!
//! This is a lexical pass, not a CSS parser. Three patterns are recognised:
//!
//! * `@import "x.css"` / `@import 'x.css'` (the `@import url(...)` form is
//!   covered by the next pass)
//! * `url(...)`, quoted or bare
//! * bare string candidates inside `image-set(...)` / `-webkit-image-set(...)`
//!
//! URLs inside comments are rewritten too, and URLs assembled any other way
//! are missed; both are accepted. Already-encoded URLs are skipped, so running
//! the passes one after another never double-encodes.

use crate::codec::ProxyContext;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static IMPORT_STRING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(@import\s+)(?:"([^"]*)"|'([^']*)')"#).unwrap());

static URL_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^'"\s)]*))\s*\)"#).unwrap());

static IMAGE_SET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)((?:-webkit-)?image-set\()((?:[^()]|\([^()]*\))*)\)").unwrap());

// Nested functions are matched first so their quoted arguments are left alone.
static IMAGE_SET_CANDIDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)((?:url|type)\([^()]*\))|"([^"]*)"|'([^']*)'"#).unwrap());

pub struct CssRewriter<'a> {
    ctx: &'a ProxyContext,
}

impl<'a> CssRewriter<'a> {
    pub fn new(ctx: &'a ProxyContext) -> Self {
        Self { ctx }
    }

    pub fn rewrite(&self, css: &str) -> String {
        let css = IMPORT_STRING.replace_all(css, |caps: &Captures| {
            let (quote, value) = quoted(caps, 2, 3);
            match self.ctx.rewrite_url(value) {
                Some(rewritten) => format!("{}{}{}{}", &caps[1], quote, rewritten, quote),
                None => caps[0].to_string(),
            }
        });

        let css = URL_FUNCTION.replace_all(&css, |caps: &Captures| {
            let (quote, value) = match caps.get(3) {
                Some(bare) => ("", bare.as_str()),
                None => quoted(caps, 1, 2),
            };
            match self.ctx.rewrite_url(value) {
                Some(rewritten) => format!("url({}{}{})", quote, rewritten, quote),
                None => caps[0].to_string(),
            }
        });

        let css = IMAGE_SET.replace_all(&css, |caps: &Captures| {
            let candidates = IMAGE_SET_CANDIDATE.replace_all(&caps[2], |inner: &Captures| {
                if inner.get(1).is_some() {
                    return inner[0].to_string();
                }
                let (quote, value) = quoted(inner, 2, 3);
                match self.ctx.rewrite_url(value) {
                    Some(rewritten) => format!("{}{}{}", quote, rewritten, quote),
                    None => inner[0].to_string(),
                }
            });
            format!("{}{})", &caps[1], candidates)
        });

        css.into_owned()
    }
}

fn quoted<'t>(caps: &Captures<'t>, double: usize, single: usize) -> (&'static str, &'t str) {
    match (caps.get(double), caps.get(single)) {
        (Some(m), _) => ("\"", m.as_str()),
        (None, Some(m)) => ("'", m.as_str()),
        (None, None) => ("", ""),
    }
}
