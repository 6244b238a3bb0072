use crate::error::ProxyError;
use crate::resolver::matches_domain_pattern;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

fn default_true() -> bool {
    true
}

fn default_proxy_scheme() -> String {
    "https".to_string()
}

fn default_search_url() -> String {
    "https://duckduckgo.com/?q=".to_string()
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl From<&LogLevel> for log::LevelFilter {
    fn from(level: &LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutputType {
    Stdout,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogTarget {
    #[serde(rename = "type")]
    pub output_type: LogOutputType,
    pub path: Option<PathBuf>,
    pub level: Option<LogLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<LogLevel>,
    pub format: Option<LogFormat>,
    pub targets: Option<Vec<LogTarget>>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Some(LogLevel::Info),
            format: Some(LogFormat::Text),
            targets: Some(vec![LogTarget {
                output_type: LogOutputType::Stdout,
                path: None,
                level: None,
            }]),
        }
    }
}

/// Header values sent upstream so the target sees an ordinary desktop browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserEmulation {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    /// Only encodings the rewriter can decode should be listed here, otherwise
    /// compressed documents are passed through unrewritten.
    pub accept_encoding: String,
    pub connection: String,
    pub upgrade_insecure_requests: String,
    pub sec_fetch_dest: String,
    pub sec_fetch_mode: String,
    pub sec_fetch_site: String,
    pub sec_fetch_user: String,
}

impl Default for BrowserEmulation {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/100.0.4896.127 Safari/537.36".to_string(),
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.9".to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            accept_encoding: "gzip, deflate".to_string(),
            connection: "keep-alive".to_string(),
            upgrade_insecure_requests: "1".to_string(),
            sec_fetch_dest: "document".to_string(),
            sec_fetch_mode: "navigate".to_string(),
            sec_fetch_site: "none".to_string(),
            sec_fetch_user: "?1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Inject the client-side recovery script into rewritten pages.
    #[serde(default = "default_true")]
    pub auto_reload: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_reload: true,
        }
    }
}

impl FallbackConfig {
    pub fn inject_script(&self) -> bool {
        self.enabled && self.auto_reload
    }
}

/// Extra rewriting for sites matching `host_pattern`.
///
/// `host_pattern` uses the same syntax as the domain whitelist
/// (`example.com`, `.example.com`, `*.example.com`), plus `*` for every site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteRule {
    pub host_pattern: String,
    /// Attributes rewritten as URLs on any element, e.g. lazy-load `data-src`.
    #[serde(default)]
    pub extra_attributes: Vec<String>,
    #[serde(default)]
    pub rewrite_style_elements: bool,
}

impl SiteRule {
    pub fn applies_to(&self, host: &str) -> bool {
        self.host_pattern == "*"
            || matches_domain_pattern(host, std::slice::from_ref(&self.host_pattern))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    // Hosts (optionally with port) that serve proxy-addressed URLs.
    // Empty accepts whatever Host the client sends.
    #[serde(default)]
    pub proxy_hosts: Vec<String>,
    #[serde(default = "default_proxy_scheme")]
    pub proxy_scheme: String,
    #[serde(default)]
    pub separator: String,
    #[serde(default = "default_true")]
    pub homepage: bool,
    // Domain whitelist, empty allows all
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default = "default_search_url")]
    pub search_url: String,
    #[serde(default)]
    pub browser_emulation: BrowserEmulation,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub site_rules: Vec<SiteRule>,
    // Upstream transport
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
    #[serde(default)]
    pub pool_idle_timeout_secs: Option<u64>,
    // TLS for the listener
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub certificate: Option<String>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            proxy_hosts: Vec::new(),
            proxy_scheme: default_proxy_scheme(),
            separator: String::new(),
            homepage: true,
            allowed_domains: Vec::new(),
            search_url: default_search_url(),
            browser_emulation: BrowserEmulation::default(),
            fallback: FallbackConfig::default(),
            site_rules: Vec::new(),
            connect_timeout_secs: Some(10),
            request_timeout_secs: None,
            pool_max_idle_per_host: Some(10),
            pool_idle_timeout_secs: Some(90),
            private_key: None,
            certificate: None,
            logging: None,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ProxyError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("Cannot read {}: {}", path, e)))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ProxyError> {
        serde_json::from_str(content).map_err(|e| ProxyError::Config(format!("Invalid configuration: {}", e)))
    }

    pub fn to_file(&self, path: &str) -> Result<(), ProxyError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ProxyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Whether `host` (a `Host` header value, port included) is one of ours.
    pub fn is_proxy_host(&self, host: &str) -> bool {
        if self.proxy_hosts.is_empty() {
            return true;
        }
        let hostname = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
        self.proxy_hosts
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(host) || candidate.eq_ignore_ascii_case(hostname))
    }

    pub fn site_rules_for<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a SiteRule> + 'a {
        self.site_rules.iter().filter(move |rule| rule.applies_to(host))
    }
}
