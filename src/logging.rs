use crate::config::{LogFormat, LogLevel, LogOutputType, LogTarget, LoggingConfig};
use crate::error::ProxyError;
use chrono::{DateTime, Utc};
use log::{LevelFilter, Record};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::sync::Mutex;

pub struct CustomLogger {
    targets: Vec<LogTarget>,
    default_level: LevelFilter,
    format: LogFormat,
    writers: Vec<Mutex<BufWriter<Box<dyn Write + Send>>>>,
}

impl CustomLogger {
    pub fn new(config: LoggingConfig) -> Result<Self, ProxyError> {
        let format = config.format.unwrap_or_default();
        let default_level = LevelFilter::from(&config.level.unwrap_or_default());
        let targets = config.targets.unwrap_or_default();

        let mut writers = Vec::with_capacity(targets.len());
        for target in &targets {
            let writer: Box<dyn Write + Send> = match target.output_type {
                LogOutputType::Stdout => Box::new(std::io::stdout()),
                LogOutputType::File => {
                    let path = target
                        .path
                        .as_ref()
                        .ok_or_else(|| ProxyError::Config("File log target requires a path".to_string()))?;
                    let file = OpenOptions::new().create(true).append(true).open(path).map_err(|e| {
                        ProxyError::Config(format!("Cannot open log file {}: {}", path.display(), e))
                    })?;
                    Box::new(file)
                }
            };
            writers.push(Mutex::new(BufWriter::new(writer)));
        }

        Ok(Self {
            targets,
            default_level,
            format,
            writers,
        })
    }

    pub fn init(config: LoggingConfig) -> Result<(), ProxyError> {
        let logger = Self::new(config)?;
        let max_level = logger.max_level();
        log::set_boxed_logger(Box::new(logger)).map_err(|e| ProxyError::Config(e.to_string()))?;
        log::set_max_level(max_level);
        Ok(())
    }

    fn target_level(&self, target: &LogTarget) -> LevelFilter {
        target.level.as_ref().map(LevelFilter::from).unwrap_or(self.default_level)
    }

    fn max_level(&self) -> LevelFilter {
        self.targets
            .iter()
            .map(|target| self.target_level(target))
            .max()
            .unwrap_or(LevelFilter::Off)
    }

    fn format_text(&self, record: &Record) -> String {
        let timestamp: DateTime<Utc> = Utc::now();
        format!(
            "{} [{}] [{}] {}",
            timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    }

    fn format_json(&self, record: &Record) -> String {
        json_line(record)
    }
}

impl log::Log for CustomLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.targets.iter().any(|target| metadata.level() <= self.target_level(target))
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let message = match self.format {
            LogFormat::Text => self.format_text(record),
            LogFormat::Json => self.format_json(record),
        };

        for (target, writer) in self.targets.iter().zip(&self.writers) {
            if record.level() > self.target_level(target) {
                continue;
            }
            if let Ok(mut writer) = writer.lock() {
                let _ = writeln!(writer, "{}", message);
                let _ = writer.flush();
            }
        }
    }

    fn flush(&self) {
        for writer in &self.writers {
            if let Ok(mut w) = writer.lock() {
                let _ = w.flush();
            }
        }
    }
}

fn json_line(record: &Record) -> String {
    let timestamp: DateTime<Utc> = Utc::now();
    json!({
        "timestamp": timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        "level": record.level().to_string().to_lowercase(),
        "target": record.target(),
        "module": record.module_path().unwrap_or("unknown"),
        "message": record.args().to_string(),
    })
    .to_string()
}

/// env_logger setup used when the config has no `logging` block. `RUST_LOG`
/// still wins over `level`.
pub fn init_fallback(level: &LogLevel, format: &LogFormat) {
    let env = env_logger::Env::default().default_filter_or(level.to_string());
    let mut builder = env_logger::Builder::from_env(env);
    if *format == LogFormat::Json {
        builder.format(|buf, record| writeln!(buf, "{}", json_line(record)));
    }
    builder.init();
}

pub fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    match s.to_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        _ => Err(format!("Invalid log level: {}. Must be one of: trace, debug, info, warn, error", s)),
    }
}

pub fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    match s.to_lowercase().as_str() {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        _ => Err(format!("Invalid log format: {}. Must be one of: text, json", s)),
    }
}
