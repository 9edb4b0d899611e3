use log::{debug, info, warn};
use rusqlite::{params, Connection};

use crate::database::Database;
use crate::error::MigrateError;

/// Projects a table onto a reduced column set.
///
/// SQLite cannot drop a column in place, so the table is recreated as
/// `<table>_new` with `columns_sql` as its body, the `retained` columns are
/// copied across by name, the old table is dropped and the new one renamed.
/// Must run inside a transaction so that a failure at any step leaves the
/// original table untouched.
#[derive(Debug, Clone)]
pub struct TableRebuild<'a> {
    pub table: &'a str,
    /// Column definitions and table constraints of the rebuilt table.
    pub columns_sql: &'a str,
    /// Columns copied from the old table, in the order they are listed.
    pub retained: &'a [&'a str],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebuildReport {
    pub source_rows: i64,
    pub copied_rows: usize,
    pub recreated_indexes: Vec<String>,
    pub dropped_indexes: Vec<String>,
    pub recreated_triggers: Vec<String>,
    pub dropped_triggers: Vec<String>,
}

impl TableRebuild<'_> {
    pub fn temp_table(&self) -> String {
        format!("{}_new", self.table)
    }

    pub fn execute(&self, conn: &Connection) -> Result<RebuildReport, MigrateError> {
        let temp_table = self.temp_table();
        self.check_preconditions(conn, &temp_table)?;

        let mut report = RebuildReport {
            source_rows: Database::row_count(conn, self.table)?,
            ..Default::default()
        };

        // Explicit indexes disappear with the old table; keep the ones that
        // only touch retained columns so they can be recreated afterwards.
        let mut kept_indexes = Vec::new();
        for index in Database::indexes(conn, self.table)? {
            let Some(sql) = index.sql else {
                continue;
            };
            if index
                .columns
                .iter()
                .all(|c| self.retained.contains(&c.as_str()))
            {
                kept_indexes.push((index.name, sql));
            } else {
                warn!(
                    "Index {} references a removed column and will not be recreated",
                    index.name
                );
                report.dropped_indexes.push(index.name);
            }
        }

        // Triggers go with the old table too. One that names a removed column
        // would fail on its next firing, so it is reported instead.
        let removed: Vec<String> = Database::column_names(conn, self.table)?
            .into_iter()
            .filter(|c| !self.retained.contains(&c.as_str()))
            .collect();
        let mut kept_triggers = Vec::new();
        for trigger in Database::triggers(conn, self.table)? {
            if Self::mentions_any(&trigger.sql, &removed) {
                warn!(
                    "Trigger {} references a removed column and will not be recreated",
                    trigger.name
                );
                report.dropped_triggers.push(trigger.name);
            } else {
                kept_triggers.push(trigger);
            }
        }

        let old_sequence = Database::sequence_value(conn, self.table)?;

        let table = Database::quote_ident(self.table);
        let temp = Database::quote_ident(&temp_table);
        let column_list = self
            .retained
            .iter()
            .map(|c| Database::quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        info!("Rebuilding table {}...", self.table);

        conn.execute(&format!("CREATE TABLE {} ({})", temp, self.columns_sql), [])?;
        info!("  Created {}", temp_table);

        report.copied_rows = conn.execute(
            &format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                temp, column_list, column_list, table
            ),
            [],
        )?;
        info!("  Copied {} row(s)", report.copied_rows);

        conn.execute(&format!("DROP TABLE {}", table), [])?;
        info!("  Dropped old {}", self.table);

        // Views or triggers naming the old table must not block the rename
        conn.pragma_update(None, "legacy_alter_table", true)?;
        let renamed = conn.execute(&format!("ALTER TABLE {} RENAME TO {}", temp, table), []);
        conn.pragma_update(None, "legacy_alter_table", false)?;
        renamed?;
        info!("  Renamed {} to {}", temp_table, self.table);

        for (name, sql) in kept_indexes {
            conn.execute(&sql, [])?;
            debug!("  Recreated index {}", name);
            report.recreated_indexes.push(name);
        }

        for trigger in kept_triggers {
            conn.execute(&trigger.sql, [])?;
            debug!("  Recreated trigger {}", trigger.name);
            report.recreated_triggers.push(trigger.name);
        }

        if let Some(old_seq) = old_sequence {
            if self.columns_sql.to_ascii_uppercase().contains("AUTOINCREMENT") {
                self.restore_sequence(conn, old_seq)?;
            }
        }

        Ok(report)
    }

    fn check_preconditions(&self, conn: &Connection, temp_table: &str) -> Result<(), MigrateError> {
        if self.retained.is_empty() {
            return Err(MigrateError::Error(format!(
                "Rebuild of {} retains no columns",
                self.table
            )));
        }

        if !Database::table_exists(conn, self.table)? {
            return Err(MigrateError::Error(format!(
                "Table {} does not exist",
                self.table
            )));
        }

        if Database::table_exists(conn, temp_table)? {
            return Err(MigrateError::Error(format!(
                "Table {} already exists; remove it before rebuilding {}",
                temp_table, self.table
            )));
        }

        let existing = Database::column_names(conn, self.table)?;
        let missing: Vec<&str> = self
            .retained
            .iter()
            .copied()
            .filter(|c| !existing.iter().any(|e| e == c))
            .collect();
        if !missing.is_empty() {
            return Err(MigrateError::Error(format!(
                "Table {} has no column(s): {}",
                self.table,
                missing.join(", ")
            )));
        }

        Ok(())
    }

    /// True when `sql` contains any of `columns` as a whole identifier.
    fn mentions_any(sql: &str, columns: &[String]) -> bool {
        sql.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .any(|word| columns.iter().any(|col| col.eq_ignore_ascii_case(word)))
    }

    /// Keeps ids that were handed out and later deleted from being reissued.
    fn restore_sequence(&self, conn: &Connection, old_seq: i64) -> Result<(), MigrateError> {
        let updated = conn.execute(
            "UPDATE sqlite_sequence SET seq = MAX(seq, ?2) WHERE name = ?1",
            params![self.table, old_seq],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
                params![self.table, old_seq],
            )?;
        }
        debug!("  Restored sqlite_sequence for {} to at least {}", self.table, old_seq);
        Ok(())
    }
}
