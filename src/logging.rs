use chrono::Local;
use log::{LevelFilter, Metadata, Record};
use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Appends timestamped records to a log file.
pub struct Logger {
    file: Mutex<std::fs::File>,
    level: LevelFilter,
}

impl Logger {
    pub fn new(log_file: &str, level: LevelFilter) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;

        Ok(Self {
            file: Mutex::new(file),
            level,
        })
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            if let Ok(mut file) = self.file.lock() {
                let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                let _ = writeln!(
                    file,
                    "{} [{}] {}: {}",
                    timestamp,
                    record.level(),
                    record.target(),
                    record.args()
                );
            }
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

pub fn parse_level(level: &str) -> Result<LevelFilter> {
    LevelFilter::from_str(level)
        .map_err(|_| Error::ConfigError(format!("Unknown log level '{}'", level)))
}

/// Installs the file logger when `log_file` is set, `env_logger` otherwise.
/// `RUST_LOG` takes precedence over `level` for `env_logger`.
pub fn init(level: &str, log_file: Option<&str>) -> Result<()> {
    let level = parse_level(level)?;
    match log_file {
        Some(path) => {
            let logger = Logger::new(path, level)?;
            log::set_boxed_logger(Box::new(logger))
                .map_err(|e| Error::ConfigError(e.to_string()))?;
            log::set_max_level(level);
        }
        None => {
            env_logger::Builder::new()
                .filter_level(level)
                .parse_default_env()
                .try_init()
                .map_err(|e| Error::ConfigError(e.to_string()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Log;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug").unwrap(), LevelFilter::Debug);
        assert_eq!(parse_level("WARN").unwrap(), LevelFilter::Warn);
        assert!(parse_level("loud").is_err());
    }

    #[test]
    fn test_file_logger_writes_enabled_records() {
        let path = std::env::temp_dir().join(format!("bonding-exchange-log-{}.log", std::process::id()));
        let path_str = path.to_string_lossy().to_string();
        let logger = Logger::new(&path_str, LevelFilter::Info).unwrap();

        logger.log(
            &Record::builder()
                .level(log::Level::Info)
                .target("settlement")
                .args(format_args!("trade settled"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(log::Level::Debug)
                .target("settlement")
                .args(format_args!("hidden"))
                .build(),
        );
        logger.flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[INFO] settlement: trade settled"));
        assert!(!contents.contains("hidden"));
        let _ = std::fs::remove_file(&path);
    }
}
