use flexi_logger::{
    default_format, detailed_format, Duplicate, FileSpec, Logger, LoggerHandle,
};

use crate::config::LoggingConfig;
use crate::error::MigrateError;

const DEPENDENCY_LEVEL: &str = "warn";

/// Builds the flexi_logger spec: our own level for this crate, warnings only
/// for everything else.
pub fn log_spec(config: &LoggingConfig) -> String {
    format!("{}, vocab_migrate={}", DEPENDENCY_LEVEL, config.level)
}

/// Starts logging. `RUST_LOG` overrides the configured level.
///
/// The returned handle must be kept alive for the duration of the program.
pub fn init(config: &LoggingConfig) -> Result<LoggerHandle, MigrateError> {
    let logger = Logger::try_with_env_or_str(log_spec(config))?;

    let logger = match &config.dir {
        Some(dir) => logger
            .log_to_file(FileSpec::default().directory(dir).basename("vocab-migrate"))
            .format_for_files(detailed_format)
            .duplicate_to_stderr(Duplicate::Warn)
            .format_for_stderr(default_format),
        None => logger.log_to_stderr().format_for_stderr(default_format),
    };

    Ok(logger.start()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_spec_scopes_level_to_crate() {
        let config = LoggingConfig {
            level: "debug".into(),
            dir: None,
        };
        assert_eq!(log_spec(&config), "warn, vocab_migrate=debug");
    }

    #[test]
    fn test_log_spec_parses() {
        let config = LoggingConfig {
            level: "trace".into(),
            dir: None,
        };
        assert!(flexi_logger::LogSpecification::parse(log_spec(&config)).is_ok());
    }
}
