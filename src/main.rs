use anyhow::{Context, bail};
use clap::Parser;
use log::{error, info, warn};
use mirrorgate::config::{Config, LogFormat, LogLevel, LoggingConfig, SiteRule};
use mirrorgate::config_validation::ConfigValidator;
use mirrorgate::logging::{CustomLogger, init_fallback, parse_log_format, parse_log_level};
use mirrorgate::server::ProxyServer;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser)]
#[clap(
    version,
    about = "A URL-rewriting web proxy: browse any site through https://<proxy>/<separator><target-url>"
)]
struct Args {
    #[clap(short, long, value_name = "ADDR", help = "Listen address (e.g., 127.0.0.1:8080)")]
    listen: Option<SocketAddr>,

    #[clap(short, long, value_name = "FILE", help = "Configuration file path")]
    config: Option<String>,

    #[clap(long = "proxy-host", value_name = "HOST", help = "Public host[:port] of the proxy (can be used multiple times)")]
    proxy_hosts: Vec<String>,

    #[clap(long, value_name = "SCHEME", help = "Scheme used in rewritten proxy URLs: http or https")]
    scheme: Option<String>,

    #[clap(long, value_name = "TEXT", help = "Separator between the proxy origin and the target URL (e.g., ----)")]
    separator: Option<String>,

    #[clap(long = "allow-domain", value_name = "DOMAIN", help = "Whitelisted target domain (can be used multiple times)")]
    allowed_domains: Vec<String>,

    #[clap(long, value_name = "URL", help = "Search URL prefix used for keyword input")]
    search_url: Option<String>,

    #[clap(long, help = "Do not serve the URL-entry homepage at /")]
    no_homepage: bool,

    #[clap(long, help = "Do not inject the client-side fallback script")]
    no_fallback: bool,

    #[clap(long, value_name = "SECONDS", help = "Upstream connect timeout in seconds")]
    connect_timeout: Option<u64>,

    #[clap(long, value_name = "SECONDS", help = "Upstream request timeout in seconds")]
    request_timeout: Option<u64>,

    #[clap(long, value_name = "NUM", help = "Maximum idle upstream connections per host")]
    pool_max_idle: Option<usize>,

    #[clap(long, value_name = "FILE", help = "Private key file path for HTTPS")]
    private_key: Option<String>,

    #[clap(long, value_name = "FILE", help = "Certificate file path for HTTPS")]
    certificate: Option<String>,

    #[clap(long, value_name = "LEVEL", value_parser = parse_log_level, help = "Log level: trace, debug, info, warn, error")]
    log_level: Option<LogLevel>,

    #[clap(long, value_name = "FORMAT", value_parser = parse_log_format, help = "Log format: text or json")]
    log_format: Option<LogFormat>,

    #[clap(long, value_name = "FILE", help = "Generate a sample configuration file")]
    generate_config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(config_file) = &args.generate_config {
        sample_config()
            .to_file(config_file)
            .with_context(|| format!("Failed to write sample configuration to {}", config_file))?;
        println!("Sample configuration file generated: {}", config_file);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(config_file) => {
            if !Path::new(config_file).exists() {
                bail!("Configuration file not found: {}", config_file);
            }
            Config::from_file(config_file)
                .with_context(|| format!("Failed to load configuration from {}", config_file))?
        }
        None => Config::default(),
    };
    apply_args(&mut config, &args);

    init_logging(&config, &args)?;

    let validation = ConfigValidator::new(&config).validate();
    for warning in &validation.warnings {
        warn!("Configuration: {}", warning);
    }
    for suggestion in &validation.suggestions {
        info!("Configuration hint: {}", suggestion);
    }
    if !validation.is_valid {
        for problem in &validation.errors {
            error!("Configuration error: {}", problem);
        }
        bail!("Invalid configuration ({} error(s))", validation.errors.len());
    }

    info!("Starting mirrorgate...");
    let server = ProxyServer::new(Arc::new(config));
    let server_handle = tokio::spawn(server.run());

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e).context("Server error"),
                Err(e) => return Err(e).context("Server task failed"),
            }
        }
    }

    info!("mirrorgate stopped");
    Ok(())
}

fn apply_args(config: &mut Config, args: &Args) {
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if !args.proxy_hosts.is_empty() {
        config.proxy_hosts = args.proxy_hosts.clone();
    }
    if let Some(scheme) = &args.scheme {
        config.proxy_scheme = scheme.to_ascii_lowercase();
    }
    if let Some(separator) = &args.separator {
        config.separator = separator.clone();
    }
    if !args.allowed_domains.is_empty() {
        config.allowed_domains = args.allowed_domains.clone();
    }
    if let Some(search_url) = &args.search_url {
        config.search_url = search_url.clone();
    }
    if args.no_homepage {
        config.homepage = false;
    }
    if args.no_fallback {
        config.fallback.enabled = false;
    }
    if args.connect_timeout.is_some() {
        config.connect_timeout_secs = args.connect_timeout;
    }
    if args.request_timeout.is_some() {
        config.request_timeout_secs = args.request_timeout;
    }
    if args.pool_max_idle.is_some() {
        config.pool_max_idle_per_host = args.pool_max_idle;
    }
    if args.private_key.is_some() {
        config.private_key = args.private_key.clone();
    }
    if args.certificate.is_some() {
        config.certificate = args.certificate.clone();
    }
    if let Some(logging) = config.logging.as_mut() {
        if args.log_level.is_some() {
            logging.level = args.log_level.clone();
        }
        if args.log_format.is_some() {
            logging.format = args.log_format.clone();
        }
    }
}

fn init_logging(config: &Config, args: &Args) -> anyhow::Result<()> {
    match &config.logging {
        Some(logging) => CustomLogger::init(logging.clone()).context("Failed to initialise logging"),
        None => {
            init_fallback(
                &args.log_level.clone().unwrap_or_default(),
                &args.log_format.clone().unwrap_or_default(),
            );
            Ok(())
        }
    }
}

fn sample_config() -> Config {
    let mut config = Config::default();
    config.proxy_hosts = vec!["localhost:8080".to_string()];
    config.separator = "----".to_string();
    config.allowed_domains = vec!["example.com".to_string(), "wikipedia.org".to_string()];
    config.request_timeout_secs = Some(30);
    config.site_rules = vec![SiteRule {
        host_pattern: "*.wikipedia.org".to_string(),
        extra_attributes: vec!["data-src".to_string()],
        rewrite_style_elements: true,
    }];
    config.logging = Some(LoggingConfig::default());
    config
}
