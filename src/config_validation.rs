//! Startup validation of a [`Config`].
//!
//! Problems that would make the proxy misbehave are errors; settings that
//! work but are probably unintended are warnings.

use crate::config::Config;
use crate::html_rewriter::is_valid_attribute_name;
use http::HeaderValue;
use http::uri::Authority;
use std::str::FromStr;
use url::Url;

/// Validation result
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    pub fn success() -> Self {
        Self {
            is_valid: true,
            errors: vec![],
            warnings: vec![],
            suggestions: vec![],
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
        self.is_valid = false;
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn add_suggestion(&mut self, suggestion: String) {
        self.suggestions.push(suggestion);
    }
}

pub struct ConfigValidator<'a> {
    config: &'a Config,
}

impl<'a> ConfigValidator<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::success();

        self.validate_proxy_origin(&mut result);
        self.validate_separator(&mut result);
        self.validate_whitelist(&mut result);
        self.validate_search_url(&mut result);
        self.validate_site_rules(&mut result);
        self.validate_browser_emulation(&mut result);
        self.validate_transport(&mut result);
        self.validate_tls(&mut result);

        result
    }

    fn validate_proxy_origin(&self, result: &mut ValidationResult) {
        let config = self.config;
        if config.proxy_scheme != "http" && config.proxy_scheme != "https" {
            result.add_error(format!(
                "proxy_scheme must be \"http\" or \"https\", got {:?}",
                config.proxy_scheme
            ));
        }

        if config.proxy_hosts.is_empty() {
            result.add_warning("proxy_hosts is empty: every Host header is treated as a proxy host".to_string());
            result.add_suggestion("List the public host name(s) of the proxy in proxy_hosts".to_string());
        }

        for host in &config.proxy_hosts {
            if host.contains("://") || host.contains('/') {
                result.add_error(format!("Proxy host {:?} must be a bare host[:port], without scheme or path", host));
            } else if Authority::from_str(host).is_err() {
                result.add_error(format!("Proxy host {:?} is not a valid host[:port]", host));
            }
        }
    }

    fn validate_separator(&self, result: &mut ValidationResult) {
        let separator = &self.config.separator;
        if separator.is_empty() {
            result.add_suggestion(
                "A separator (e.g. \"----\") keeps proxied paths from being mistaken for site paths".to_string(),
            );
            return;
        }

        if separator.chars().any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '%' | ':')) {
            result.add_error(format!(
                "Separator {:?} must not contain whitespace, '/', '?', '#', '%' or ':'",
                separator
            ));
        }
        if separator.to_ascii_lowercase().starts_with("http") {
            result.add_error(format!("Separator {:?} must not start with \"http\"", separator));
        }
    }

    fn validate_whitelist(&self, result: &mut ValidationResult) {
        for domain in &self.config.allowed_domains {
            let trimmed = domain.trim();
            if trimmed.is_empty() {
                result.add_error("allowed_domains contains an empty entry".to_string());
            } else if trimmed.contains("://") || trimmed.contains('/') {
                result.add_error(format!("Whitelist entry {:?} must be a domain, not a URL", domain));
            }
        }
    }

    fn validate_search_url(&self, result: &mut ValidationResult) {
        match Url::parse(&self.config.search_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                if url.query().is_none() {
                    result.add_warning(format!(
                        "search_url {:?} has no query; keywords are appended as-is",
                        self.config.search_url
                    ));
                }
            }
            Ok(_) => result.add_error(format!("search_url {:?} must be http or https", self.config.search_url)),
            Err(e) => result.add_error(format!("search_url {:?} is invalid: {}", self.config.search_url, e)),
        }
    }

    fn validate_site_rules(&self, result: &mut ValidationResult) {
        for rule in &self.config.site_rules {
            if rule.host_pattern.trim().is_empty() {
                result.add_error("Site rule with an empty host_pattern".to_string());
            }
            for attribute in &rule.extra_attributes {
                if !is_valid_attribute_name(attribute) {
                    result.add_error(format!(
                        "Site rule {:?}: attribute {:?} must start with a letter and contain only letters, digits, '-' or '_'",
                        rule.host_pattern, attribute
                    ));
                }
            }
            if rule.extra_attributes.is_empty() && !rule.rewrite_style_elements {
                result.add_warning(format!("Site rule {:?} has no effect", rule.host_pattern));
            }
        }
    }

    fn validate_browser_emulation(&self, result: &mut ValidationResult) {
        let emulation = &self.config.browser_emulation;
        for (name, value) in [
            ("user_agent", &emulation.user_agent),
            ("accept", &emulation.accept),
            ("accept_language", &emulation.accept_language),
            ("accept_encoding", &emulation.accept_encoding),
            ("connection", &emulation.connection),
            ("upgrade_insecure_requests", &emulation.upgrade_insecure_requests),
            ("sec_fetch_dest", &emulation.sec_fetch_dest),
            ("sec_fetch_mode", &emulation.sec_fetch_mode),
            ("sec_fetch_site", &emulation.sec_fetch_site),
            ("sec_fetch_user", &emulation.sec_fetch_user),
        ] {
            if HeaderValue::from_str(value).is_err() {
                result.add_error(format!("browser_emulation.{} is not a valid header value", name));
            }
        }

        let encodings = emulation.accept_encoding.to_ascii_lowercase();
        if ["br", "zstd"].iter().any(|e| encodings.split(',').any(|part| part.trim().starts_with(e))) {
            result.add_warning(
                "accept_encoding lists br/zstd; such responses are passed through without rewriting".to_string(),
            );
        }
    }

    fn validate_transport(&self, result: &mut ValidationResult) {
        let config = self.config;
        if config.request_timeout_secs == Some(0) {
            result.add_error("request_timeout_secs must be greater than 0".to_string());
        }
        if config.connect_timeout_secs == Some(0) {
            result.add_error("connect_timeout_secs must be greater than 0".to_string());
        }
        if let (Some(connect), Some(request)) = (config.connect_timeout_secs, config.request_timeout_secs) {
            if connect > request {
                result.add_warning(format!(
                    "connect_timeout_secs ({}) exceeds request_timeout_secs ({})",
                    connect, request
                ));
            }
        }
        if config.pool_max_idle_per_host == Some(0) {
            result.add_suggestion("pool_max_idle_per_host = 0 disables connection reuse".to_string());
        }
    }

    fn validate_tls(&self, result: &mut ValidationResult) {
        match (&self.config.private_key, &self.config.certificate) {
            (Some(_), None) => result.add_error("private_key is set but certificate is missing".to_string()),
            (None, Some(_)) => result.add_error("certificate is set but private_key is missing".to_string()),
            (Some(_), Some(_)) if self.config.proxy_scheme == "http" => result.add_warning(
                "TLS is enabled on the listener but proxy_scheme is \"http\"; rewritten links will use http"
                    .to_string(),
            ),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteRule;

    fn base_config() -> Config {
        let mut config = Config::default();
        config.proxy_hosts = vec!["proxy.test".to_string(), "localhost:8080".to_string()];
        config.separator = "----".to_string();
        config
    }

    #[test]
    fn test_default_setup_is_valid() {
        let result = ConfigValidator::new(&base_config()).validate();
        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_empty_proxy_hosts_warns() {
        let mut config = base_config();
        config.proxy_hosts.clear();
        let result = ConfigValidator::new(&config).validate();
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_bad_proxy_hosts_and_scheme() {
        let mut config = base_config();
        config.proxy_hosts = vec!["https://proxy.test".to_string(), "bad host".to_string()];
        config.proxy_scheme = "ftp".to_string();
        let result = ConfigValidator::new(&config).validate();
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 3);
    }

    #[test]
    fn test_separator_rules() {
        for separator in ["a/b", "x y", "http-", "----?"] {
            let mut config = base_config();
            config.separator = separator.to_string();
            assert!(!ConfigValidator::new(&config).validate().is_valid, "{separator:?} should be rejected");
        }

        let mut config = base_config();
        config.separator = String::new();
        let result = ConfigValidator::new(&config).validate();
        assert!(result.is_valid);
        assert!(!result.suggestions.is_empty());
    }

    #[test]
    fn test_site_rule_attributes() {
        let mut config = base_config();
        config.site_rules.push(SiteRule {
            host_pattern: "example.com".to_string(),
            extra_attributes: vec!["data-src".to_string(), "xlink:href".to_string()],
            rewrite_style_elements: false,
        });
        let result = ConfigValidator::new(&config).validate();
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("xlink:href"));
    }

    #[test]
    fn test_tls_pairing() {
        let mut config = base_config();
        config.private_key = Some("key.pem".to_string());
        assert!(!ConfigValidator::new(&config).validate().is_valid);

        config.certificate = Some("cert.pem".to_string());
        assert!(ConfigValidator::new(&config).validate().is_valid);
    }

    #[test]
    fn test_search_url_and_encoding() {
        let mut config = base_config();
        config.search_url = "not a url".to_string();
        config.browser_emulation.accept_encoding = "gzip, br".to_string();
        let result = ConfigValidator::new(&config).validate();
        assert!(!result.is_valid);
        assert!(result.warnings.iter().any(|w| w.contains("br/zstd")));
    }

    #[test]
    fn test_whitelist_entries() {
        let mut config = base_config();
        config.allowed_domains = vec!["example.com".to_string(), "https://evil.com/".to_string(), " ".to_string()];
        let result = ConfigValidator::new(&config).validate();
        assert_eq!(result.errors.len(), 2);
    }
}
