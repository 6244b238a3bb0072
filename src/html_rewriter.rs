//! Streaming HTML rewriting on top of `lol_html`.
//!
//! Every URL-bearing attribute is described once in [`RULES`]; a single
//! dispatch function applies the matching [`RewriteKind`]. Per-site rules and
//! the fallback script are layered on through [`HtmlOptions`].

use crate::codec::ProxyContext;
use crate::config::Config;
use crate::css_rewriter::CssRewriter;
use crate::pages;
use log::debug;
use lol_html::html_content::ContentType;
use lol_html::send::{Element, HtmlRewriter, Settings};
use lol_html::{element, text};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteKind {
    Url,
    /// URL, plus the resolved original in `data-original-src` and a one-shot
    /// `onerror` that falls back to it.
    ImageSource,
    Srcset,
    MetaContent,
    InlineStyle,
}

#[derive(Debug)]
pub struct RewriteRule {
    pub selector: &'static str,
    pub attribute: &'static str,
    pub kind: RewriteKind,
}

const fn rule(selector: &'static str, attribute: &'static str, kind: RewriteKind) -> RewriteRule {
    RewriteRule { selector, attribute, kind }
}

pub static RULES: &[RewriteRule] = &[
    rule("a[href]", "href", RewriteKind::Url),
    rule("area[href]", "href", RewriteKind::Url),
    rule("link[href]", "href", RewriteKind::Url),
    rule("base[href]", "href", RewriteKind::Url),
    rule("form[action]", "action", RewriteKind::Url),
    rule("img[src]", "src", RewriteKind::ImageSource),
    rule("img[srcset]", "srcset", RewriteKind::Srcset),
    rule("source[srcset]", "srcset", RewriteKind::Srcset),
    rule("script[src]", "src", RewriteKind::Url),
    rule("iframe[src]", "src", RewriteKind::Url),
    rule("source[src]", "src", RewriteKind::Url),
    rule("video[src]", "src", RewriteKind::Url),
    rule("audio[src]", "src", RewriteKind::Url),
    rule("embed[src]", "src", RewriteKind::Url),
    rule("track[src]", "src", RewriteKind::Url),
    rule("video[poster]", "poster", RewriteKind::Url),
    rule("object[data]", "data", RewriteKind::Url),
    rule("meta[content]", "content", RewriteKind::MetaContent),
    rule("[style]", "style", RewriteKind::InlineStyle),
];

pub const IMAGE_ONERROR: &str =
    "this.onerror=null;if(this.src!==this.dataset.originalSrc){this.src=this.dataset.originalSrc;}";

const URL_META_NAMES: &[&str] = &[
    "og:image",
    "og:image:url",
    "og:image:secure_url",
    "og:url",
    "twitter:image",
    "twitter:image:src",
];

/// Page-level extras decided once per response.
#[derive(Debug, Clone, Default)]
pub struct HtmlOptions {
    /// Attributes rewritten as URLs on any element.
    pub extra_attributes: Vec<String>,
    pub rewrite_style_elements: bool,
    /// Markup appended to `<head>`.
    pub head_script: Option<String>,
}

impl HtmlOptions {
    pub fn for_context(config: &Config, ctx: &ProxyContext) -> Self {
        let host = ctx.target().host_str().unwrap_or_default();
        let mut options = HtmlOptions::default();

        for site in config.site_rules_for(host) {
            for attribute in &site.extra_attributes {
                if !is_valid_attribute_name(attribute) {
                    debug!("Ignoring unusable attribute name {:?} for {}", attribute, host);
                    continue;
                }
                if !options.extra_attributes.iter().any(|a| a.eq_ignore_ascii_case(attribute)) {
                    options.extra_attributes.push(attribute.to_ascii_lowercase());
                }
            }
            options.rewrite_style_elements |= site.rewrite_style_elements;
        }

        if config.fallback.inject_script() {
            options.head_script = Some(pages::fallback_script(ctx));
        }
        options
    }
}

/// Attribute names usable in an `[attr]` selector without escaping.
pub fn is_valid_attribute_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// `lol_html` settings rewriting pages fetched for `ctx`. Handlers are `Send`
/// so a streaming rewrite can live inside a spawned task.
pub fn settings<'h>(ctx: &'h ProxyContext, options: &'h HtmlOptions) -> Settings<'h, 'static> {
    let mut handlers = Vec::with_capacity(RULES.len() + options.extra_attributes.len() + 2);

    for rule in RULES {
        handlers.push(element!(rule.selector, move |el| {
            rewrite_attribute(el, rule.attribute, rule.kind, ctx);
            Ok(())
        }));
    }

    for attribute in options.extra_attributes.iter().filter(|a| is_valid_attribute_name(a)) {
        let selector = format!("[{}]", attribute);
        handlers.push(element!(selector, move |el| {
            rewrite_attribute(el, attribute, RewriteKind::Url, ctx);
            Ok(())
        }));
    }

    if let Some(script) = options.head_script.as_deref() {
        handlers.push(element!("head", move |el| {
            el.append(script, ContentType::Html);
            Ok(())
        }));
    }

    if options.rewrite_style_elements {
        let mut buffer = String::new();
        handlers.push(text!("style", move |chunk| {
            buffer.push_str(chunk.as_str());
            if chunk.last_in_text_node() {
                let css = CssRewriter::new(ctx).rewrite(&buffer);
                chunk.replace(&css, ContentType::Html);
                buffer.clear();
            } else {
                chunk.remove();
            }
            Ok(())
        }));
    }

    Settings {
        element_content_handlers: handlers,
        ..Settings::new_send()
    }
}

/// Rewrites a complete document in one go.
pub fn rewrite_document(
    html: &[u8],
    ctx: &ProxyContext,
    options: &HtmlOptions,
) -> Result<Vec<u8>, lol_html::errors::RewritingError> {
    let mut output = Vec::with_capacity(html.len() + html.len() / 4);
    let mut rewriter = HtmlRewriter::new(settings(ctx, options), |c: &[u8]| output.extend_from_slice(c));
    rewriter.write(html)?;
    rewriter.end()?;
    Ok(output)
}

fn rewrite_attribute(el: &mut Element<'_, '_>, attribute: &str, kind: RewriteKind, ctx: &ProxyContext) {
    let Some(value) = el.get_attribute(attribute) else {
        return;
    };

    let rewritten = match kind {
        RewriteKind::Url => ctx.rewrite_url(&value),
        RewriteKind::ImageSource => match ctx.resolve(&value) {
            Some(absolute) => {
                set_attribute(el, "data-original-src", absolute.as_str());
                set_attribute(el, "onerror", IMAGE_ONERROR);
                Some(ctx.origin().encode(&absolute))
            }
            None => None,
        },
        RewriteKind::Srcset => Some(rewrite_srcset(&value, ctx)),
        RewriteKind::MetaContent => rewrite_meta_content(el, &value, ctx),
        RewriteKind::InlineStyle => Some(CssRewriter::new(ctx).rewrite(&value)),
    };

    match rewritten {
        Some(new_value) if new_value != value => set_attribute(el, attribute, &new_value),
        _ => {}
    }
}

fn set_attribute(el: &mut Element<'_, '_>, name: &str, value: &str) {
    if let Err(e) = el.set_attribute(name, value) {
        debug!("Cannot set {} on <{}>: {}", name, el.tag_name(), e);
    }
}

/// Rewrites each `url [descriptor]` candidate, keeping the descriptor.
/// A srcset with nothing to rewrite is returned as it was.
pub fn rewrite_srcset(srcset: &str, ctx: &ProxyContext) -> String {
    let mut changed = false;
    let candidates: Vec<String> = srcset_candidates(srcset)
        .into_iter()
        .map(|(url, descriptor)| {
            let url = match ctx.rewrite_url(url) {
                Some(rewritten) => {
                    changed = true;
                    rewritten
                }
                None => url.to_string(),
            };
            if descriptor.is_empty() { url } else { format!("{} {}", url, descriptor) }
        })
        .collect();

    if changed { candidates.join(", ") } else { srcset.to_string() }
}

/// Splits a srcset into `(url, descriptor)` pairs.
///
/// A URL runs up to the next whitespace, so the comma inside a `data:` URL
/// stays part of it. A candidate ends at a comma after its descriptor, or at
/// commas trailing the URL itself. Commas inside parentheses in a descriptor
/// do not split.
fn srcset_candidates(srcset: &str) -> Vec<(&str, &str)> {
    let mut candidates = Vec::new();
    let mut rest = srcset;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        let url_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (url, after) = rest.split_at(url_end);
        if url.ends_with(',') {
            candidates.push((url.trim_end_matches(','), ""));
            rest = after;
            continue;
        }

        let mut depth = 0usize;
        let descriptor_end = after
            .char_indices()
            .find(|&(_, c)| match c {
                '(' => {
                    depth += 1;
                    false
                }
                ')' => {
                    depth = depth.saturating_sub(1);
                    false
                }
                ',' => depth == 0,
                _ => false,
            })
            .map_or(after.len(), |(i, _)| i);
        candidates.push((url, after[..descriptor_end].trim()));
        rest = &after[descriptor_end..];
    }

    candidates
}

fn rewrite_meta_content(el: &Element<'_, '_>, content: &str, ctx: &ProxyContext) -> Option<String> {
    let is_refresh = el
        .get_attribute("http-equiv")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("refresh"));
    if is_refresh {
        return rewrite_refresh(content, ctx);
    }

    let is_url_meta = ["property", "name"]
        .iter()
        .filter_map(|name| el.get_attribute(name))
        .map(|v| v.to_ascii_lowercase())
        .any(|v| URL_META_NAMES.contains(&v.trim()));
    if is_url_meta { ctx.rewrite_url(content) } else { None }
}

/// `5; url='/next'` keeps its delay and quoting, only the target changes.
pub fn rewrite_refresh(content: &str, ctx: &ProxyContext) -> Option<String> {
    let idx = content.to_ascii_lowercase().find("url=")?;
    let (head, target) = content.split_at(idx + "url=".len());
    let target = target.trim();

    let quote = target.chars().next().filter(|c| *c == '"' || *c == '\'');
    let inner = match quote {
        Some(q) => target.trim_matches(q),
        None => target,
    };

    let rewritten = ctx.rewrite_url(inner)?;
    Some(match quote {
        Some(q) => format!("{}{}{}{}", head, q, rewritten, q),
        None => format!("{}{}", head, rewritten),
    })
}
