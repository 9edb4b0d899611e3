use log::{debug, info};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};

use crate::error::MigrateError;

/// One row of `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub pk: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub sql: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub unique: bool,
    /// "c" for CREATE INDEX, "u" for a UNIQUE constraint, "pk" for a primary key.
    pub origin: String,
    pub columns: Vec<String>,
    /// Only present for explicitly created indexes.
    pub sql: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerInfo {
    pub name: String,
    pub sql: String,
}

/// Owns the connection to the vocabulary database for the duration of a run.
///
/// The connection is closed when the `Database` is dropped, on every exit path.
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, MigrateError> {
        Self::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)
    }

    pub fn open_read_only(path: &Path) -> Result<Self, MigrateError> {
        Self::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
    }

    fn open_with_flags(path: &Path, flags: OpenFlags) -> Result<Self, MigrateError> {
        // Never let a typo create a fresh empty database
        if !path.is_file() {
            return Err(MigrateError::PreconditionFailed(format!(
                "Database file does not exist: {}",
                path.display()
            )));
        }

        let conn = Connection::open_with_flags(path, flags | OpenFlags::SQLITE_OPEN_NO_MUTEX)?;
        info!("Connected to database: {}", path.display());

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Double-quotes an identifier for interpolation into SQL text.
    pub fn quote_ident(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, MigrateError> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>, MigrateError> {
        let mut stmt = conn.prepare(
            "SELECT name, type, \"notnull\", dflt_value, pk
             FROM pragma_table_info(?1)
             ORDER BY cid",
        )?;

        let rows = stmt.query_map([table], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                decl_type: row.get(1)?,
                not_null: row.get(2)?,
                default_value: row.get(3)?,
                pk: row.get(4)?,
            })
        })?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?);
        }
        Ok(columns)
    }

    pub fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>, MigrateError> {
        Ok(Self::columns(conn, table)?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    pub fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, MigrateError> {
        Ok(Self::columns(conn, table)?.iter().any(|c| c.name == column))
    }

    pub fn row_count(conn: &Connection, table: &str) -> Result<i64, MigrateError> {
        let sql = format!("SELECT COUNT(*) FROM {}", Self::quote_ident(table));
        let count = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }

    /// User tables with their CREATE statements, excluding SQLite's internal tables.
    pub fn tables(conn: &Connection) -> Result<Vec<TableInfo>, MigrateError> {
        let mut stmt = conn.prepare(
            "SELECT name, sql FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(TableInfo {
                name: row.get(0)?,
                sql: row.get(1)?,
            })
        })?;

        let mut tables = Vec::new();
        for row in rows {
            tables.push(row?);
        }
        Ok(tables)
    }

    pub fn indexes(conn: &Connection, table: &str) -> Result<Vec<IndexInfo>, MigrateError> {
        let mut list_stmt = conn.prepare(
            "SELECT il.name, il.\"unique\", il.origin, m.sql
             FROM pragma_index_list(?1) il
             LEFT JOIN sqlite_master m ON m.type = 'index' AND m.name = il.name
             ORDER BY il.name",
        )?;

        let listed = list_stmt.query_map([table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut info_stmt =
            conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;

        let mut indexes = Vec::new();
        for entry in listed {
            let (name, unique, origin, sql) = entry?;
            let columns = info_stmt
                .query_map([&name], |row| row.get::<_, Option<String>>(0))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                // Expression index terms have no column name
                .map(|c| c.unwrap_or_default())
                .collect();

            indexes.push(IndexInfo {
                name,
                unique,
                origin,
                columns,
                sql,
            });
        }
        Ok(indexes)
    }

    pub fn has_unique_index_on(
        conn: &Connection,
        table: &str,
        columns: &[&str],
    ) -> Result<bool, MigrateError> {
        Ok(Self::indexes(conn, table)?
            .iter()
            .any(|idx| idx.unique && idx.columns.iter().map(String::as_str).eq(columns.iter().copied())))
    }

    /// Current AUTOINCREMENT high-water mark for `table`, if SQLite tracks one.
    pub fn sequence_value(conn: &Connection, table: &str) -> Result<Option<i64>, MigrateError> {
        if !Self::table_exists(conn, "sqlite_sequence")? {
            return Ok(None);
        }

        let seq = conn
            .query_row(
                "SELECT seq FROM sqlite_sequence WHERE name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seq)
    }

    /// Triggers attached to `table`, with the statements that created them.
    pub fn triggers(conn: &Connection, table: &str) -> Result<Vec<TriggerInfo>, MigrateError> {
        let mut stmt = conn.prepare(
            "SELECT name, sql FROM sqlite_master
             WHERE type = 'trigger' AND tbl_name = ?1
             ORDER BY name",
        )?;

        let rows = stmt.query_map([table], |row| {
            Ok(TriggerInfo {
                name: row.get(0)?,
                sql: row.get(1)?,
            })
        })?;

        let mut triggers = Vec::new();
        for row in rows {
            triggers.push(row?);
        }
        Ok(triggers)
    }

    pub fn foreign_keys_enabled(conn: &Connection) -> Result<bool, MigrateError> {
        let enabled = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
        Ok(enabled)
    }

    /// Has no effect while a transaction is open.
    pub fn set_foreign_keys(conn: &Connection, enabled: bool) -> Result<(), MigrateError> {
        conn.pragma_update(None, "foreign_keys", enabled)?;
        Ok(())
    }

    /// Rows reported by `PRAGMA foreign_key_check`, one line per violation.
    pub fn foreign_key_violations(conn: &Connection) -> Result<Vec<String>, MigrateError> {
        let mut stmt = conn.prepare(
            "SELECT \"table\", rowid, parent FROM pragma_foreign_key_check",
        )?;

        let rows = stmt.query_map([], |row| {
            let table: String = row.get(0)?;
            let rowid: Option<i64> = row.get(1)?;
            let parent: String = row.get(2)?;
            Ok(match rowid {
                Some(rowid) => format!("{} row {} references missing {} row", table, rowid, parent),
                None => format!("{} references missing {} row", table, parent),
            })
        })?;

        let mut violations = Vec::new();
        for row in rows {
            violations.push(row?);
        }
        Ok(violations)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        debug!("Database connection closed: {}", self.path.display());
    }
}
