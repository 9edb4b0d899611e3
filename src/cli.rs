use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::{debug, info};
use strum::IntoEnumIterator;

use crate::config::Config;
use crate::database::Database;
use crate::error::MigrateError;
use crate::hash::Hash;
use crate::inspect::Inspector;
use crate::runner::{MigrationRunner, Outcome};
use crate::schema::MigrationKind;

const BANNER_WIDTH: usize = 60;

#[derive(Parser)]
#[command(
    name = "vocab-migrate",
    version,
    about = "One-time schema migrations for the vocabulary database"
)]
pub struct Cli {
    /// Path to the SQLite database (overrides config and VOCAB_MIGRATE_DB_PATH)
    #[arg(long = "db", short = 'd', global = true)]
    pub db: Option<PathBuf>,

    /// Config file (default: config.toml in the platform data directory)
    #[arg(long = "config", short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Directory for backup files (default: next to the database)
    #[arg(long = "backup-dir", global = true)]
    pub backup_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show table schemas and which migrations are pending
    Inspect {
        /// Also list each table's columns
        #[arg(long = "columns", default_value_t = false)]
        columns: bool,
    },

    /// Back up the database and run migrations (default: all, in order)
    Migrate {
        /// Migrations to run
        #[arg(value_enum)]
        migrations: Vec<MigrationKind>,

        /// Run each migration and roll it back instead of committing
        #[arg(long = "dry-run", default_value_t = false)]
        dry_run: bool,
    },

    /// Print the effective configuration
    Config,
}

impl Cli {
    pub fn handle_command_line() -> Result<(), MigrateError> {
        let args = Cli::parse();

        let mut config = Config::load(args.config.as_deref())?;
        if args.db.is_some() {
            config.db_path = args.db.clone();
        }
        if args.backup_dir.is_some() {
            config.backup_dir = args.backup_dir.clone();
        }

        // Keep the handle alive until we return
        let _logger = crate::logging::init(&config.logging)?;
        debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());

        match args.command {
            Command::Inspect { columns } => Self::inspect(&config, columns),
            Command::Migrate {
                migrations,
                dry_run,
            } => Self::migrate(&config, &Self::ordered(&migrations), dry_run),
            Command::Config => {
                print!("{}", config.to_toml()?);
                Ok(())
            }
        }
    }

    /// Requested migrations in their declared order, each once; none means all.
    fn ordered(requested: &[MigrationKind]) -> Vec<MigrationKind> {
        MigrationKind::iter()
            .filter(|kind| requested.is_empty() || requested.contains(kind))
            .collect()
    }

    fn db_path(config: &Config) -> Result<&Path, MigrateError> {
        config.db_path.as_deref().ok_or_else(|| {
            MigrateError::PreconditionFailed(
                "No database path configured: pass --db, set VOCAB_MIGRATE_DB_PATH or db_path in the config file"
                    .to_string(),
            )
        })
    }

    fn inspect(config: &Config, columns: bool) -> Result<(), MigrateError> {
        let db = Database::open_read_only(Self::db_path(config)?)?;
        print!("{}", Inspector::report(db.conn(), columns)?);
        Ok(())
    }

    fn migrate(config: &Config, kinds: &[MigrationKind], dry_run: bool) -> Result<(), MigrateError> {
        let db_path = Self::db_path(config)?;
        let runner = MigrationRunner::new(db_path)
            .with_backup_dir(config.backup_dir.as_deref())
            .with_dry_run(dry_run);

        let banner = "=".repeat(BANNER_WIDTH);
        for kind in kinds {
            let outcome = runner.run(kind.migration().as_ref())?;

            println!("{}", banner);
            println!("{}: {}", kind, kind.description());
            match &outcome {
                Outcome::AlreadyApplied { .. } => {
                    println!("Already applied, no changes made");
                }
                Outcome::Applied {
                    report,
                    verification,
                    ..
                } => {
                    println!(
                        "Migration completed: {} source row(s), {} copied",
                        report.source_rows, report.copied_rows
                    );
                    for check in verification.checks() {
                        println!("  [OK] {}", check.description);
                    }
                }
                Outcome::DryRun { report, .. } => {
                    println!(
                        "Dry run: {} source row(s), {} would be copied; rolled back",
                        report.source_rows, report.copied_rows
                    );
                }
            }
            println!(
                "Backup file: {} (sha256 {})",
                outcome.backup().path().display(),
                Hash::short_hash(outcome.backup().sha256())
            );
            println!("{}", banner);
        }

        info!("All requested migrations finished");
        Ok(())
    }
}
