pub mod body;
pub mod codec;
pub mod common;
pub mod config;
pub mod config_validation;
pub mod content;
pub mod css_rewriter;
pub mod error;
pub mod headers;
pub mod html_rewriter;
pub mod js_rewriter;
pub mod logging;
pub mod pages;
pub mod proxy;
pub mod resolver;
pub mod server;

pub use config::Config;
pub use error::ProxyError;
pub use proxy::RewritingProxy;
pub use server::ProxyServer;
