use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::MigrateError;

const ENV_PREFIX: &str = "VOCAB_MIGRATE_";
const CONFIG_FILE: &str = "config.toml";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    /// Write logs to files in this directory instead of stderr.
    pub dir: Option<PathBuf>,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const DEFAULT_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            level: Self::DEFAULT_LEVEL.to_string(),
            dir: None,
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.level.clone();
        self.level = self.level.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.level.as_str()) {
            eprintln!(
                "Config error: log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::DEFAULT_LEVEL
            );
            self.level = Self::DEFAULT_LEVEL.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// Location of the vocabulary database file.
    pub db_path: Option<PathBuf>,
    /// Where backups are written. Defaults to the database's directory.
    pub backup_dir: Option<PathBuf>,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: None,
            backup_dir: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Loads defaults, then the TOML file, then `VOCAB_MIGRATE_*` environment
    /// variables (nested keys separated by `__`, e.g. `VOCAB_MIGRATE_LOGGING__LEVEL`).
    ///
    /// With no explicit `config_path`, `config.toml` in the platform data
    /// directory is used if it exists. An explicit path must exist.
    pub fn load(config_path: Option<&Path>) -> Result<Self, MigrateError> {
        let file = match config_path {
            Some(path) => {
                if !path.is_file() {
                    return Err(MigrateError::PreconditionFailed(format!(
                        "Config file does not exist: {}",
                        path.display()
                    )));
                }
                Some(path.to_path_buf())
            }
            None => Self::default_config_path().filter(|p| p.is_file()),
        };

        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = &file {
            figment = figment.merge(Toml::file(file));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Config = figment.extract()?;
        config.ensure_valid();

        Ok(config)
    }

    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "vocab-migrate")
            .map(|dirs| dirs.data_local_dir().join(CONFIG_FILE))
    }

    pub fn to_toml(&self) -> Result<String, MigrateError> {
        toml::to_string_pretty(self)
            .map_err(|e| MigrateError::Error(format!("Failed to serialize config: {}", e)))
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        Jail::expect_with(|jail| {
            let config = Config::load(Some(&jail.directory().join("empty.toml")));
            assert!(matches!(config, Err(MigrateError::PreconditionFailed(_))));

            jail.create_file("empty.toml", "")?;
            let config = Config::load(Some(Path::new("empty.toml"))).unwrap();
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env_precedence() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "vocab.toml",
                r#"
                db_path = "/data/vocab.db"
                backup_dir = "/data/backups"

                [logging]
                level = "debug"
                "#,
            )?;

            let config = Config::load(Some(Path::new("vocab.toml"))).unwrap();
            assert_eq!(config.db_path, Some(PathBuf::from("/data/vocab.db")));
            assert_eq!(config.backup_dir, Some(PathBuf::from("/data/backups")));
            assert_eq!(config.logging.level, "debug");

            jail.set_env("VOCAB_MIGRATE_DB_PATH", "/other/vocab.db");
            jail.set_env("VOCAB_MIGRATE_LOGGING__LEVEL", "warn");
            let config = Config::load(Some(Path::new("vocab.toml"))).unwrap();
            assert_eq!(config.db_path, Some(PathBuf::from("/other/vocab.db")));
            assert_eq!(config.logging.level, "warn");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level_falls_back() {
        Jail::expect_with(|jail| {
            jail.create_file("vocab.toml", "[logging]\nlevel = \" LOUD \"\n")?;
            let config = Config::load(Some(Path::new("vocab.toml"))).unwrap();
            assert_eq!(config.logging.level, "info");

            jail.create_file("vocab.toml", "[logging]\nlevel = \" Trace \"\n")?;
            let config = Config::load(Some(Path::new("vocab.toml"))).unwrap();
            assert_eq!(config.logging.level, "trace");
            Ok(())
        });
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        Jail::expect_with(|jail| {
            jail.create_file("vocab.toml", "db_path = [")?;
            let config = Config::load(Some(Path::new("vocab.toml")));
            assert!(matches!(config, Err(MigrateError::ConfigError(_))));
            Ok(())
        });
    }

    #[test]
    fn test_to_toml_skips_unset_paths() {
        let config = Config {
            db_path: Some(PathBuf::from("/data/vocab.db")),
            ..Config::default()
        };
        let text = config.to_toml().unwrap();
        assert!(text.contains("db_path = \"/data/vocab.db\""));
        assert!(!text.contains("backup_dir"));
        assert!(text.contains("level = \"info\""));
    }
}
