mod drop_learned_count;
mod drop_word_progress;
mod rebuild;

use clap::ValueEnum;
use log::{info, warn};
use rusqlite::{Connection, Transaction};
use strum::{Display, EnumIter};

use crate::error::MigrateError;

pub use drop_learned_count::DropLearnedCount;
pub use drop_word_progress::DropWordProgress;
pub use rebuild::TableRebuild;

/// The one-time migrations this tool knows about, in the order they must run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, ValueEnum)]
#[strum(serialize_all = "kebab-case")]
pub enum MigrationKind {
    /// Move word_progress rows into user_study_progress, then drop word_progress
    DropWordProgress,
    /// Rebuild study_progress without the learned_count column
    DropLearnedCount,
}

impl MigrationKind {
    /// Tag embedded in the backup file name.
    pub fn step_tag(&self) -> &'static str {
        match self {
            MigrationKind::DropWordProgress => "step1",
            MigrationKind::DropLearnedCount => "step2",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MigrationKind::DropWordProgress => "Drop the word_progress table",
            MigrationKind::DropLearnedCount => "Drop study_progress.learned_count",
        }
    }

    pub fn migration(&self) -> Box<dyn Migration> {
        match self {
            MigrationKind::DropWordProgress => Box::new(DropWordProgress),
            MigrationKind::DropLearnedCount => Box::new(DropLearnedCount),
        }
    }
}

/// A single idempotent schema migration.
///
/// The runner owns backup, connection and transaction handling; implementors
/// only describe the guard, the mutation and the post-commit checks.
pub trait Migration {
    fn kind(&self) -> MigrationKind;

    /// False when the database is already in the migrated state.
    fn is_needed(&self, conn: &Connection) -> Result<bool, MigrateError>;

    /// Performs the mutation. Runs inside a transaction the caller commits.
    fn apply(&self, tx: &Transaction<'_>) -> Result<MutationReport, MigrateError>;

    /// Re-reads the committed database and checks the expected end state.
    fn verify(
        &self,
        conn: &Connection,
        report: &MutationReport,
    ) -> Result<Verification, MigrateError>;
}

/// Row counts observed while mutating, used by verification and reporting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationReport {
    /// Rows found in the table being migrated away from or rebuilt.
    pub source_rows: i64,
    /// Rows written by the copy statement.
    pub copied_rows: usize,
    /// Rows in the table that is verified afterwards, before mutating.
    pub baseline_rows: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub description: String,
    pub passed: bool,
}

/// Outcome of the post-commit checks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Verification {
    checks: Vec<Check>,
}

impl Verification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, passed: bool, description: impl Into<String>) {
        let description = description.into();
        if passed {
            info!("  [OK] {}", description);
        } else {
            warn!("  [FAIL] {}", description);
        }
        self.checks.push(Check {
            description,
            passed,
        });
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    pub fn failures(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.description.clone())
            .collect()
    }
}
