use std::path::{Path, PathBuf};

use chrono::Local;
use log::{error, info, warn, Level};
use logging_timer::timer;
use rusqlite::TransactionBehavior;

use crate::backup::{Backup, BackupFile};
use crate::database::Database;
use crate::error::MigrateError;
use crate::schema::{Migration, MutationReport, Verification};

/// How a migration run ended when it did not fail.
#[derive(Debug)]
pub enum Outcome {
    /// The guard found the database already migrated; nothing was mutated.
    AlreadyApplied { backup: BackupFile },
    /// The mutation committed and every verification check passed.
    Applied {
        backup: BackupFile,
        report: MutationReport,
        verification: Verification,
    },
    /// The mutation ran and was rolled back on purpose.
    DryRun {
        backup: BackupFile,
        report: MutationReport,
    },
}

impl Outcome {
    pub fn backup(&self) -> &BackupFile {
        match self {
            Outcome::AlreadyApplied { backup }
            | Outcome::Applied { backup, .. }
            | Outcome::DryRun { backup, .. } => backup,
        }
    }
}

/// Drives a single migration through
/// backup → connect → guard → mutate (one transaction) → commit → verify.
pub struct MigrationRunner {
    db_path: PathBuf,
    backup_dir: Option<PathBuf>,
    dry_run: bool,
}

impl MigrationRunner {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            backup_dir: None,
            dry_run: false,
        }
    }

    pub fn with_backup_dir(mut self, backup_dir: Option<&Path>) -> Self {
        self.backup_dir = backup_dir.map(Path::to_path_buf);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn run(&self, migration: &dyn Migration) -> Result<Outcome, MigrateError> {
        let kind = migration.kind();
        info!("=== Migration {}: {} ===", kind, kind.description());

        if !self.db_path.is_file() {
            return Err(MigrateError::PreconditionFailed(format!(
                "Database file does not exist: {}",
                self.db_path.display()
            )));
        }

        info!("Step 1: back up database");
        let backup = Backup::create(
            &self.db_path,
            self.backup_dir.as_deref(),
            kind.step_tag(),
            Local::now(),
        )?;

        info!("Step 2: connect to database");
        let mut db = Database::open(&self.db_path)?;

        info!("Step 3: check whether migration is needed");
        if !migration.is_needed(db.conn())? {
            info!("Migration {} already applied, no changes made", kind);
            return Ok(Outcome::AlreadyApplied { backup });
        }

        info!("Step 4: migrate");
        let report = match self.mutate(&mut db, migration) {
            Ok(report) => report,
            Err(e) => {
                error!("Migration {} failed, transaction rolled back: {}", kind, e);
                return Err(MigrateError::MutationFailed {
                    migration: kind,
                    backup: backup.path().to_path_buf(),
                    source: Box::new(e),
                });
            }
        };

        if self.dry_run {
            info!("Dry run: changes rolled back");
            return Ok(Outcome::DryRun { backup, report });
        }

        info!("Step 5: verify");
        let verification = match migration.verify(db.conn(), &report) {
            Ok(verification) => verification,
            Err(e) => {
                error!("Migration {} committed but could not be verified: {}", kind, e);
                return Err(MigrateError::VerificationFailed {
                    migration: kind,
                    backup: backup.path().to_path_buf(),
                    failures: vec![format!("verification could not complete: {}", e)],
                });
            }
        };
        if !verification.passed() {
            return Err(MigrateError::VerificationFailed {
                migration: kind,
                backup: backup.path().to_path_buf(),
                failures: verification.failures(),
            });
        }

        info!("Migration {} completed", kind);
        Ok(Outcome::Applied {
            backup,
            report,
            verification,
        })
    }

    /// Runs `apply` with foreign key enforcement switched off, so dropping a
    /// parent table neither cascades into nor is blocked by its children.
    /// The previous setting is restored afterwards on every path.
    fn mutate(
        &self,
        db: &mut Database,
        migration: &dyn Migration,
    ) -> Result<MutationReport, MigrateError> {
        let _tmr = timer!(Level::Debug; "MigrationRunner::mutate", "{}", migration.kind());

        // Must be set outside the transaction
        let foreign_keys = Database::foreign_keys_enabled(db.conn())?;
        Database::set_foreign_keys(db.conn(), false)?;

        let result = self.mutate_in_transaction(db, migration);

        if let Err(e) = Database::set_foreign_keys(db.conn(), foreign_keys) {
            warn!("Failed to restore foreign_keys = {}: {}", foreign_keys, e);
        }
        result
    }

    /// Runs `apply` in an IMMEDIATE transaction. The transaction is rolled back
    /// when `apply` fails, when it leaves new foreign key violations behind,
    /// when this is a dry run, or if commit fails.
    fn mutate_in_transaction(
        &self,
        db: &mut Database,
        migration: &dyn Migration,
    ) -> Result<MutationReport, MigrateError> {
        let tx = db
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing_violations = Database::foreign_key_violations(&tx)?;

        // Dropping `tx` on the error path rolls it back
        let report = migration.apply(&tx)?;

        let new_violations: Vec<String> = Database::foreign_key_violations(&tx)?
            .into_iter()
            .filter(|v| !existing_violations.contains(v))
            .collect();
        if !new_violations.is_empty() {
            return Err(MigrateError::Error(format!(
                "Foreign key check failed: {}",
                new_violations.join("; ")
            )));
        }

        if self.dry_run {
            tx.rollback()?;
        } else {
            tx.commit()?;
        }
        Ok(report)
    }
}
