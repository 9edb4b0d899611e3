use log::info;
use rusqlite::{Connection, Transaction};

use crate::database::Database;
use crate::error::MigrateError;

use super::{Migration, MigrationKind, MutationReport, Verification};

const LEGACY_TABLE: &str = "word_progress";
const TARGET_TABLE: &str = "user_study_progress";

/// Copies legacy progress into `user_study_progress`.
///
/// `state` is 1 only when `is_learned` is exactly 1; any other flag value,
/// including NULL, becomes 0. Rows whose `(word_id, dict_name)` already exist
/// in the target are skipped, never overwritten, whether or not the target
/// enforces that key. Repeated legacy keys keep the first row. Any other
/// constraint failure aborts the statement.
pub const MIGRATE_WORD_PROGRESS_SQL: &str = r#"
INSERT INTO user_study_progress
    (word_id, dict_name, state, last_modified)
SELECT
    w.word_id,
    w.dict_name,
    CASE WHEN w.is_learned = 1 THEN 1 ELSE 0 END AS state,
    w.learn_time AS last_modified
FROM word_progress w
WHERE NOT EXISTS (
    SELECT 1 FROM user_study_progress u
    WHERE u.word_id = w.word_id AND u.dict_name = w.dict_name
)
AND NOT EXISTS (
    SELECT 1 FROM word_progress earlier
    WHERE earlier.word_id = w.word_id
      AND earlier.dict_name = w.dict_name
      AND earlier.rowid < w.rowid
)
"#;

pub const DROP_WORD_PROGRESS_SQL: &str = "DROP TABLE word_progress";

/// Migration 1: fold `word_progress` into `user_study_progress` and drop it.
pub struct DropWordProgress;

impl Migration for DropWordProgress {
    fn kind(&self) -> MigrationKind {
        MigrationKind::DropWordProgress
    }

    fn is_needed(&self, conn: &Connection) -> Result<bool, MigrateError> {
        let exists = Database::table_exists(conn, LEGACY_TABLE)?;
        if !exists {
            info!("{} table does not exist, nothing to migrate", LEGACY_TABLE);
        }
        Ok(exists)
    }

    fn apply(&self, tx: &Transaction<'_>) -> Result<MutationReport, MigrateError> {
        let source_rows = Database::row_count(tx, LEGACY_TABLE)?;
        info!("{} table has {} row(s)", LEGACY_TABLE, source_rows);

        let target_exists = Database::table_exists(tx, TARGET_TABLE)?;
        let baseline_rows = if target_exists {
            Database::row_count(tx, TARGET_TABLE)?
        } else {
            0
        };

        let mut copied_rows = 0;
        if source_rows > 0 {
            if !target_exists {
                return Err(MigrateError::Error(format!(
                    "{} rows need migrating but table {} does not exist",
                    source_rows, TARGET_TABLE
                )));
            }
            copied_rows = tx.execute(MIGRATE_WORD_PROGRESS_SQL, [])?;
            info!(
                "Migrated {} row(s) into {} ({} skipped as already present)",
                copied_rows,
                TARGET_TABLE,
                source_rows - copied_rows as i64
            );
        }

        tx.execute(DROP_WORD_PROGRESS_SQL, [])?;
        info!("Dropped {} table", LEGACY_TABLE);

        Ok(MutationReport {
            source_rows,
            copied_rows,
            baseline_rows,
        })
    }

    fn verify(
        &self,
        conn: &Connection,
        report: &MutationReport,
    ) -> Result<Verification, MigrateError> {
        let mut verification = Verification::new();

        verification.check(
            !Database::table_exists(conn, LEGACY_TABLE)?,
            format!("{} table no longer exists", LEGACY_TABLE),
        );

        if Database::table_exists(conn, TARGET_TABLE)? {
            let count = Database::row_count(conn, TARGET_TABLE)?;
            let expected = report.baseline_rows + report.copied_rows as i64;
            verification.check(
                count == expected,
                format!(
                    "{} has {} row(s) (expected {} = {} existing + {} migrated)",
                    TARGET_TABLE, count, expected, report.baseline_rows, report.copied_rows
                ),
            );
        } else {
            verification.check(
                report.copied_rows == 0,
                format!("{} does not exist and no rows were migrated", TARGET_TABLE),
            );
        }

        Ok(verification)
    }
}
