use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::{debug, info};

use crate::error::MigrateError;
use crate::hash::Hash;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// A byte-identical copy of the database taken before a migration mutates it.
#[derive(Debug, Clone)]
pub struct BackupFile {
    path: PathBuf,
    sha256: String,
}

impl BackupFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

pub struct Backup;

impl Backup {
    /// Copies `db_path` to `<dir>/<stem>_backup_<tag>_<timestamp>.db`.
    ///
    /// `backup_dir` defaults to the directory containing the database. An
    /// existing file is never overwritten: a numeric suffix is added instead.
    /// The copy is hashed and compared against the source before returning.
    pub fn create(
        db_path: &Path,
        backup_dir: Option<&Path>,
        step_tag: &str,
        timestamp: DateTime<Local>,
    ) -> Result<BackupFile, MigrateError> {
        if !db_path.is_file() {
            return Err(MigrateError::PreconditionFailed(format!(
                "Database file does not exist: {}",
                db_path.display()
            )));
        }

        let dir = match backup_dir {
            Some(dir) => dir.to_path_buf(),
            None => db_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        fs::create_dir_all(&dir).map_err(|e| {
            MigrateError::PreconditionFailed(format!(
                "Cannot create backup directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let path = Self::available_path(&dir, db_path, step_tag, timestamp);
        debug!("Copying {} to {}", db_path.display(), path.display());

        fs::copy(db_path, &path).map_err(|e| {
            MigrateError::PreconditionFailed(format!(
                "Failed to back up {} to {}: {}",
                db_path.display(),
                path.display(),
                e
            ))
        })?;

        let source_hash = Self::hash(db_path)?;
        let backup_hash = Self::hash(&path)?;
        if source_hash != backup_hash {
            return Err(MigrateError::PreconditionFailed(format!(
                "Backup {} does not match the database (sha256 {} vs {})",
                path.display(),
                Hash::short_hash(&backup_hash),
                Hash::short_hash(&source_hash)
            )));
        }

        info!(
            "Database backed up to: {} (sha256 {})",
            path.display(),
            Hash::short_hash(&backup_hash)
        );

        Ok(BackupFile {
            path,
            sha256: backup_hash,
        })
    }

    fn hash(path: &Path) -> Result<String, MigrateError> {
        Hash::compute_sha2_hash(path).map_err(|e| {
            MigrateError::PreconditionFailed(format!(
                "Failed to hash {} while verifying backup: {}",
                path.display(),
                e
            ))
        })
    }

    pub fn file_name(db_path: &Path, step_tag: &str, timestamp: DateTime<Local>) -> String {
        let stem = db_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "database".to_owned());

        format!(
            "{}_backup_{}_{}.db",
            stem,
            step_tag,
            timestamp.format(TIMESTAMP_FORMAT)
        )
    }

    fn available_path(
        dir: &Path,
        db_path: &Path,
        step_tag: &str,
        timestamp: DateTime<Local>,
    ) -> PathBuf {
        let name = Self::file_name(db_path, step_tag, timestamp);
        let candidate = dir.join(&name);
        if !candidate.exists() {
            return candidate;
        }

        let base = name.trim_end_matches(".db");
        let mut n = 2;
        loop {
            let candidate = dir.join(format!("{}_{}.db", base, n));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn test_file_name_format() {
        let name = Backup::file_name(Path::new("/data/vocab.db"), "step2", fixed_time());
        assert_eq!(name, "vocab_backup_step2_20240309_140507.db");
    }

    #[test]
    fn test_backup_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("vocab.db");
        fs::write(&db_path, b"pretend this is sqlite").unwrap();

        let backup = Backup::create(&db_path, None, "step1", fixed_time()).unwrap();

        assert_eq!(backup.path(), dir.path().join("vocab_backup_step1_20240309_140507.db"));
        assert_eq!(fs::read(backup.path()).unwrap(), fs::read(&db_path).unwrap());
        assert_eq!(backup.sha256(), Hash::compute_sha2_hash(&db_path).unwrap());
    }

    #[test]
    fn test_backup_never_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("vocab.db");
        fs::write(&db_path, b"first").unwrap();
        let first = Backup::create(&db_path, None, "step1", fixed_time()).unwrap();

        fs::write(&db_path, b"second").unwrap();
        let second = Backup::create(&db_path, None, "step1", fixed_time()).unwrap();

        assert_ne!(first.path(), second.path());
        assert_eq!(
            second.path(),
            dir.path().join("vocab_backup_step1_20240309_140507_2.db")
        );
        assert_eq!(fs::read(first.path()).unwrap(), b"first");
        assert_eq!(fs::read(second.path()).unwrap(), b"second");
    }

    #[test]
    fn test_backup_into_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("vocab.db");
        fs::write(&db_path, b"data").unwrap();
        let backup_dir = dir.path().join("backups").join("nested");

        let backup = Backup::create(&db_path, Some(&backup_dir), "step2", fixed_time()).unwrap();
        assert!(backup.path().starts_with(&backup_dir));
        assert!(backup.path().is_file());
    }

    #[test]
    fn test_hash_failure_is_precondition_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = Backup::hash(&dir.path().join("vanished.db")).unwrap_err();
        assert!(matches!(err, MigrateError::PreconditionFailed(_)));
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("vanished.db"));
    }

    #[test]
    fn test_missing_database_is_precondition_failure() {
        let dir = tempfile::tempdir().unwrap();
        let result = Backup::create(&dir.path().join("absent.db"), None, "step1", fixed_time());
        assert!(matches!(result, Err(MigrateError::PreconditionFailed(_))));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
