use std::fmt::Write;

use rusqlite::Connection;
use strum::IntoEnumIterator;

use crate::database::Database;
use crate::error::MigrateError;
use crate::schema::MigrationKind;

const RULE_WIDTH: usize = 60;

pub struct Inspector;

impl Inspector {
    /// Describes every user table, optionally with its columns, followed by
    /// whether each migration is still pending.
    pub fn report(conn: &Connection, show_columns: bool) -> Result<String, MigrateError> {
        let mut out = String::new();
        let rule = "=".repeat(RULE_WIDTH);

        writeln!(out, "=== Tables ===").map_err(Self::fmt_err)?;
        writeln!(out).map_err(Self::fmt_err)?;

        for table in Database::tables(conn)? {
            let rows = Database::row_count(conn, &table.name)?;
            writeln!(out, "Table: {} ({} rows)", table.name, rows).map_err(Self::fmt_err)?;
            if let Some(sql) = &table.sql {
                writeln!(out, "{}", sql).map_err(Self::fmt_err)?;
            }

            if show_columns {
                for column in Database::columns(conn, &table.name)? {
                    let mut flags = Vec::new();
                    if column.pk > 0 {
                        flags.push("PK".to_string());
                    }
                    if column.not_null {
                        flags.push("NOT NULL".to_string());
                    }
                    if let Some(default) = &column.default_value {
                        flags.push(format!("DEFAULT {}", default));
                    }
                    writeln!(
                        out,
                        "  - {} ({}){}",
                        column.name,
                        column.decl_type,
                        if flags.is_empty() {
                            String::new()
                        } else {
                            format!(" [{}]", flags.join(", "))
                        }
                    )
                    .map_err(Self::fmt_err)?;
                }

                for index in Database::indexes(conn, &table.name)? {
                    let kind = match index.origin.as_str() {
                        "pk" => "primary key",
                        "u" => "unique constraint",
                        _ if index.unique => "unique index",
                        _ => "index",
                    };
                    writeln!(
                        out,
                        "  * {} ({}) on [{}]",
                        index.name,
                        kind,
                        index.columns.join(", ")
                    )
                    .map_err(Self::fmt_err)?;
                }
            }

            writeln!(out).map_err(Self::fmt_err)?;
            writeln!(out, "{}", rule).map_err(Self::fmt_err)?;
            writeln!(out).map_err(Self::fmt_err)?;
        }

        writeln!(out, "=== Migrations ===").map_err(Self::fmt_err)?;
        for kind in MigrationKind::iter() {
            let status = if kind.migration().is_needed(conn)? {
                "pending"
            } else {
                "applied"
            };
            writeln!(out, "{:<20} {:<8} {}", kind.to_string(), status, kind.description())
                .map_err(Self::fmt_err)?;
        }

        Ok(out)
    }

    fn fmt_err(e: std::fmt::Error) -> MigrateError {
        MigrateError::Error(format!("Failed to format report: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::{insert_study_progress, legacy_conn};

    #[test]
    fn test_report_lists_tables_and_pending_migrations() {
        let conn = legacy_conn();
        insert_study_progress(&conn, 1, "gre", 20, 0, "2024-01-01", "2024-01-01", 150);

        let report = Inspector::report(&conn, false).unwrap();
        assert!(report.contains("Table: study_progress (1 rows)"));
        assert!(report.contains("Table: word_progress (0 rows)"));
        assert!(report.contains("CREATE TABLE user_study_progress"));
        assert!(!report.contains("sqlite_sequence"));
        assert!(!report.contains("  - dict_name"));
        assert!(report.contains("drop-word-progress   pending"));
        assert!(report.contains("drop-learned-count   pending"));
    }

    #[test]
    fn test_report_with_columns() {
        let conn = legacy_conn();
        let report = Inspector::report(&conn, true).unwrap();
        assert!(report.contains("  - id (INTEGER) [PK]"));
        assert!(report.contains("  - dict_name (TEXT) [NOT NULL]"));
        assert!(report.contains("  - daily_words (INTEGER) [DEFAULT 20]"));
        assert!(report.contains("(unique constraint) on [dict_name]"));
        assert!(report.contains("(unique constraint) on [word_id, dict_name]"));
    }

    #[test]
    fn test_report_after_migrations() {
        let conn = legacy_conn();
        conn.execute_batch(
            "DROP TABLE word_progress;
             ALTER TABLE study_progress DROP COLUMN learned_count;",
        )
        .unwrap();

        let report = Inspector::report(&conn, false).unwrap();
        assert!(report.contains("drop-word-progress   applied"));
        assert!(report.contains("drop-learned-count   applied"));
    }
}
