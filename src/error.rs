use rusqlite::Error as RusqliteError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::schema::MigrationKind;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error), // Converts io::Error into MigrateError automatically

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError), // Converts rusqlite::Error automatically

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors

    #[error("Configuration error: {0}")]
    ConfigError(#[from] Box<figment::Error>),

    /// Nothing was mutated: the database or its backup could not be prepared.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// The transaction was rolled back; the database is in its pre-run state.
    #[error(
        "Migration '{migration}' failed and was rolled back: {source}\nBackup file: {}",
        .backup.display()
    )]
    MutationFailed {
        migration: MigrationKind,
        backup: PathBuf,
        source: Box<MigrateError>,
    },

    /// The transaction committed but the resulting state is not what was expected.
    #[error(
        "Migration '{migration}' committed but verification failed: {}\nRestore from backup file: {}",
        .failures.join("; "),
        .backup.display()
    )]
    VerificationFailed {
        migration: MigrationKind,
        backup: PathBuf,
        failures: Vec<String>,
    },
}

impl MigrateError {
    pub fn exit_code(&self) -> i32 {
        match self {
            MigrateError::PreconditionFailed(_) => 2,
            MigrateError::MutationFailed { .. } => 3,
            MigrateError::VerificationFailed { .. } => 4,
            _ => 1,
        }
    }
}

impl From<figment::Error> for MigrateError {
    fn from(err: figment::Error) -> Self {
        MigrateError::ConfigError(Box::new(err))
    }
}

impl From<flexi_logger::FlexiLoggerError> for MigrateError {
    fn from(err: flexi_logger::FlexiLoggerError) -> Self {
        MigrateError::Error(format!("Failed to initialize logging: {}", err))
    }
}
