use log::{info, warn};
use rusqlite::{Connection, Transaction};

use crate::database::Database;
use crate::error::MigrateError;

use super::{Migration, MigrationKind, MutationReport, TableRebuild, Verification};

const TABLE: &str = "study_progress";
const DROPPED_COLUMN: &str = "learned_count";

/// Column set of `study_progress` once `learned_count` is gone.
pub const STUDY_PROGRESS_COLUMNS_SQL: &str = r#"
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    dict_name TEXT UNIQUE NOT NULL,
    daily_words INTEGER DEFAULT 20,
    study_mode INTEGER DEFAULT 0,
    last_study_time TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
"#;

pub const STUDY_PROGRESS_COLUMNS: [&str; 6] = [
    "id",
    "dict_name",
    "daily_words",
    "study_mode",
    "last_study_time",
    "created_at",
];

/// Migration 2: rebuild `study_progress` without `learned_count`.
pub struct DropLearnedCount;

impl DropLearnedCount {
    fn rebuild() -> TableRebuild<'static> {
        TableRebuild {
            table: TABLE,
            columns_sql: STUDY_PROGRESS_COLUMNS_SQL,
            retained: &STUDY_PROGRESS_COLUMNS,
        }
    }

    fn log_columns(conn: &Connection, heading: &str) -> Result<(), MigrateError> {
        info!("{} {} columns:", heading, TABLE);
        for column in Database::columns(conn, TABLE)? {
            info!("  - {} ({})", column.name, column.decl_type);
        }
        Ok(())
    }
}

impl Migration for DropLearnedCount {
    fn kind(&self) -> MigrationKind {
        MigrationKind::DropLearnedCount
    }

    fn is_needed(&self, conn: &Connection) -> Result<bool, MigrateError> {
        if !Database::table_exists(conn, TABLE)? {
            warn!("{} table does not exist, nothing to migrate", TABLE);
            return Ok(false);
        }

        Self::log_columns(conn, "Current")?;

        let needed = Database::has_column(conn, TABLE, DROPPED_COLUMN)?;
        if !needed {
            info!("{} column does not exist, nothing to migrate", DROPPED_COLUMN);
        }
        Ok(needed)
    }

    fn apply(&self, tx: &Transaction<'_>) -> Result<MutationReport, MigrateError> {
        let rebuilt = Self::rebuild().execute(tx)?;
        if !rebuilt.recreated_indexes.is_empty() {
            info!("Recreated index(es): {}", rebuilt.recreated_indexes.join(", "));
        }
        if !rebuilt.dropped_indexes.is_empty() {
            warn!("Dropped index(es): {}", rebuilt.dropped_indexes.join(", "));
        }
        if !rebuilt.recreated_triggers.is_empty() {
            info!("Recreated trigger(s): {}", rebuilt.recreated_triggers.join(", "));
        }
        if !rebuilt.dropped_triggers.is_empty() {
            warn!("Dropped trigger(s): {}", rebuilt.dropped_triggers.join(", "));
        }

        Ok(MutationReport {
            source_rows: rebuilt.source_rows,
            copied_rows: rebuilt.copied_rows,
            baseline_rows: rebuilt.source_rows,
        })
    }

    fn verify(
        &self,
        conn: &Connection,
        report: &MutationReport,
    ) -> Result<Verification, MigrateError> {
        let mut verification = Verification::new();

        Self::log_columns(conn, "New")?;
        let columns = Database::column_names(conn, TABLE)?;

        verification.check(
            !columns.iter().any(|c| c == DROPPED_COLUMN),
            format!("{} column removed", DROPPED_COLUMN),
        );
        verification.check(
            columns.iter().map(String::as_str).eq(STUDY_PROGRESS_COLUMNS),
            format!(
                "{} columns are [{}]",
                TABLE,
                STUDY_PROGRESS_COLUMNS.join(", ")
            ),
        );
        verification.check(
            Database::has_unique_index_on(conn, TABLE, &["dict_name"])?,
            format!("{}.dict_name is still UNIQUE", TABLE),
        );

        let count = Database::row_count(conn, TABLE)?;
        verification.check(
            count == report.baseline_rows,
            format!(
                "{} has {} row(s) (expected {})",
                TABLE, count, report.baseline_rows
            ),
        );

        Ok(verification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::{insert_study_progress, legacy_conn};
    use pretty_assertions::assert_eq;

    type Row = (i64, String, Option<i64>, Option<i64>, Option<String>, Option<String>);

    fn rows(conn: &Connection) -> Vec<Row> {
        let mut stmt = conn
            .prepare(
                "SELECT id, dict_name, daily_words, study_mode, last_study_time, created_at
                 FROM study_progress ORDER BY id",
            )
            .unwrap();
        stmt.query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        })
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
    }

    fn run(conn: &mut Connection) -> (MutationReport, Verification) {
        let tx = conn.transaction().unwrap();
        let report = DropLearnedCount.apply(&tx).unwrap();
        tx.commit().unwrap();
        let verification = DropLearnedCount.verify(conn, &report).unwrap();
        (report, verification)
    }

    #[test]
    fn test_gre_row_loses_learned_count() {
        let mut conn = legacy_conn();
        insert_study_progress(&conn, 1, "gre", 20, 0, "2024-01-01", "2024-01-01", 150);

        assert!(DropLearnedCount.is_needed(&conn).unwrap());
        let (report, verification) = run(&mut conn);

        assert!(verification.passed(), "{:?}", verification.failures());
        assert_eq!(report.source_rows, 1);
        assert_eq!(report.copied_rows, 1);
        assert_eq!(
            Database::column_names(&conn, "study_progress").unwrap(),
            STUDY_PROGRESS_COLUMNS.to_vec()
        );
        assert_eq!(
            rows(&conn),
            vec![(
                1,
                "gre".to_string(),
                Some(20),
                Some(0),
                Some("2024-01-01".to_string()),
                Some("2024-01-01".to_string())
            )]
        );
    }

    #[test]
    fn test_all_rows_preserved_by_primary_key() {
        let mut conn = legacy_conn();
        insert_study_progress(&conn, 3, "gre", 30, 1, "2024-02-01", "2023-12-01", 10);
        insert_study_progress(&conn, 7, "toefl", 15, 0, "2024-02-02", "2023-12-02", 0);
        insert_study_progress(&conn, 12, "cet6", 50, 2, "2024-02-03", "2023-12-03", 999);
        conn.execute(
            "INSERT INTO study_progress (id, dict_name, last_study_time, created_at)
             VALUES (20, 'ielts', NULL, '2023-12-04')",
            [],
        )
        .unwrap();
        let before = rows(&conn);

        let (report, verification) = run(&mut conn);

        assert!(verification.passed(), "{:?}", verification.failures());
        assert_eq!(report.baseline_rows, 4);
        assert_eq!(rows(&conn), before);
    }

    #[test]
    fn test_defaults_and_constraints_survive() {
        let mut conn = legacy_conn();
        insert_study_progress(&conn, 5, "gre", 20, 0, "2024-01-01", "2024-01-01", 1);
        run(&mut conn);

        conn.execute("INSERT INTO study_progress (dict_name) VALUES ('toefl')", [])
            .unwrap();
        let (id, daily_words, study_mode, created_at): (i64, i64, i64, Option<String>) = conn
            .query_row(
                "SELECT id, daily_words, study_mode, created_at
                 FROM study_progress WHERE dict_name = 'toefl'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(id, 6);
        assert_eq!(daily_words, 20);
        assert_eq!(study_mode, 0);
        assert!(created_at.is_some());

        let duplicate = conn.execute("INSERT INTO study_progress (dict_name) VALUES ('gre')", []);
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_not_needed_after_migration() {
        let mut conn = legacy_conn();
        run(&mut conn);
        assert!(!DropLearnedCount.is_needed(&conn).unwrap());
    }

    #[test]
    fn test_missing_table_is_not_needed() {
        let conn = legacy_conn();
        conn.execute("DROP TABLE study_progress", []).unwrap();
        assert!(!DropLearnedCount.is_needed(&conn).unwrap());
    }

    #[test]
    fn test_verification_detects_row_loss() {
        let mut conn = legacy_conn();
        insert_study_progress(&conn, 1, "gre", 20, 0, "2024-01-01", "2024-01-01", 150);
        let (mut report, _) = run(&mut conn);

        report.baseline_rows = 2;
        let verification = DropLearnedCount.verify(&conn, &report).unwrap();
        assert!(!verification.passed());
        assert_eq!(verification.failures().len(), 1);
    }
}
